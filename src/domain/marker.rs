//! Marker Entity
//!
//! User-defined date lines drawn across the chart.

use serde::{Deserialize, Serialize};
use super::entity::Entity;

/// Marker kind determines default color and label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    /// Site opening
    Start,
    /// Handover
    End,
    #[default]
    Other,
}

impl MarkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerKind::Start => "start",
            MarkerKind::End => "end",
            MarkerKind::Other => "other",
        }
    }

    pub fn default_color(&self) -> &'static str {
        match self {
            MarkerKind::Start => "#2e7d32",
            MarkerKind::End => "#c62828",
            MarkerKind::Other => "#1565c0",
        }
    }
}

/// A dated marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: String,
    /// Marker instant (ms epoch, start of day)
    pub date: i64,
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: MarkerKind,
    pub color: String,
}

impl Entity for Marker {
    fn id(&self) -> &str {
        &self.id
    }
}
