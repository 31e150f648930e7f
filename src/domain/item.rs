//! Item Entity
//!
//! A time-boxed bar bound to one group. Task items carry the task id;
//! each lot has exactly one header item spanning its tasks.

use serde::{Deserialize, Serialize};
use super::entity::Entity;
use crate::time;

/// Id of the header item of `lot_id`
pub fn header_item_id(lot_id: &str) -> String {
    format!("{}-header", lot_id)
}

/// A bar on the timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Unique identifier (the task id for task items)
    pub id: String,
    /// Owning group id
    pub group: String,
    /// Bar label
    #[serde(default)]
    pub content: String,
    /// Start of the first day (ms epoch)
    pub start_time: i64,
    /// Last millisecond of the last day (ms epoch)
    pub end_time: i64,
    /// Completion percentage 0-100
    #[serde(default)]
    pub progress: u8,
    /// Summary bar of a lot
    #[serde(rename = "isHeader", default)]
    pub is_header: bool,
    /// Copy of the owning lot's color
    #[serde(rename = "lotColor", default)]
    pub lot_color: String,
}

impl Item {
    /// Create a task bar; the span is day-aligned on creation
    pub fn new_task(task_id: String, group: String, content: String, start_time: i64, end_time: i64, progress: u8, lot_color: String) -> Self {
        Self {
            id: task_id,
            group,
            content,
            start_time: time::start_of_day(start_time),
            end_time: time::end_of_day(end_time),
            progress: progress.min(100),
            is_header: false,
            lot_color,
        }
    }

    /// Create the summary bar of a lot
    pub fn new_header(lot_id: &str, content: String, start_time: i64, end_time: i64, lot_color: String) -> Self {
        Self {
            id: header_item_id(lot_id),
            group: lot_id.to_string(),
            content,
            start_time: time::start_of_day(start_time),
            end_time: time::end_of_day(end_time),
            progress: 0,
            is_header: true,
            lot_color,
        }
    }

    pub fn duration(&self) -> i64 {
        self.end_time - self.start_time
    }

    /// True when both ends sit on day boundaries
    pub fn is_day_aligned(&self) -> bool {
        self.start_time == time::start_of_day(self.start_time) && self.end_time == time::end_of_day(self.end_time)
    }
}

impl Entity for Item {
    fn id(&self) -> &str {
        &self.id
    }
}
