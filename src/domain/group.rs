//! Group Entity
//!
//! A row of the planning chart. Two levels: lots (no parent) and the
//! task groups under them.

use serde::{Deserialize, Serialize};
use super::entity::Entity;

/// Prefix of task group ids
pub const TASK_GROUP_PREFIX: &str = "task-";

/// Group id paired with the item of task `task_id`
pub fn task_group_id(task_id: &str) -> String {
    format!("{}{}", TASK_GROUP_PREFIX, task_id)
}

/// Task id encoded in a task group id
pub fn task_id_from_group(group_id: &str) -> Option<&str> {
    group_id.strip_prefix(TASK_GROUP_PREFIX).filter(|id| !id.is_empty())
}

/// A lot or task row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Unique identifier
    pub id: String,
    /// Label without numbering
    pub name: String,
    /// Numbered label ("2. Gros œuvre", "2.1 Fondations")
    pub title: String,
    /// Owning lot (None = lot)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Color shared by a lot and its tasks
    pub lot_color: String,
}

impl Group {
    /// Create a lot row; the title is filled in by renumbering
    pub fn new_lot(id: String, name: String, lot_color: String) -> Self {
        Self {
            title: name.clone(),
            id,
            name,
            parent_id: None,
            lot_color,
        }
    }

    /// Create the row of task `task_id` under `lot`
    pub fn new_task(task_id: &str, name: String, lot: &Group) -> Self {
        Self {
            id: task_group_id(task_id),
            title: name.clone(),
            name,
            parent_id: Some(lot.id.clone()),
            lot_color: lot.lot_color.clone(),
        }
    }

    pub fn is_lot(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Task id when this is a task row
    pub fn task_id(&self) -> Option<&str> {
        if self.is_lot() {
            None
        } else {
            task_id_from_group(&self.id)
        }
    }
}

impl Entity for Group {
    fn id(&self) -> &str {
        &self.id
    }
}
