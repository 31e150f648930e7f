//! Planning Configuration
//!
//! Tunables for default spans, palette, zoom bounds and persistence.
//! Loaded from a JSON file; every field falls back to its default.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{DomainError, DomainResult};
use crate::time::DAY_MS;

/// Lot colors, assigned by lot index
pub const DEFAULT_PALETTE: [&str; 8] = [
    "#e57373", "#64b5f6", "#81c784", "#ffb74d", "#ba68c8", "#4db6ac", "#f06292", "#a1887f",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlanningConfig {
    /// Lot color palette
    pub palette: Vec<String>,
    /// Header span of a lot without tasks
    pub default_lot_span_days: i64,
    /// Duration of a task without an end date
    pub default_task_duration_days: i64,
    /// Fallback start offset per lot index
    pub lot_stagger_days: i64,
    /// Fallback start offset per task index
    pub task_stagger_days: i64,
    /// Narrowest visible window
    pub min_zoom_ms: i64,
    /// Widest visible window
    pub max_zoom_ms: i64,
    /// Zoom step applied by zoom in / zoom out
    pub zoom_factor: f64,
    /// Pointer travel before a press becomes a drag
    pub drag_threshold_px: f64,
    /// Quiet period before an auto-save writes
    pub autosave_debounce_ms: u64,
    /// Storage key prefix, followed by the project id
    pub storage_key_prefix: String,
    /// Largest payload written before degrading the save
    pub max_payload_bytes: usize,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
            default_lot_span_days: 30,
            default_task_duration_days: 5,
            lot_stagger_days: 7,
            task_stagger_days: 2,
            min_zoom_ms: 30 * DAY_MS,
            max_zoom_ms: 365 * DAY_MS,
            zoom_factor: 1.5,
            drag_threshold_px: pointer_dragdrop::DRAG_THRESHOLD_PX,
            autosave_debounce_ms: 1000,
            storage_key_prefix: "planning_".to_string(),
            max_payload_bytes: 5 * 1024 * 1024,
        }
    }
}

impl PlanningConfig {
    pub fn from_json_str(raw: &str) -> DomainResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file; a missing file yields the defaults
    pub fn load(path: &Path) -> DomainResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no planning config, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.palette.is_empty() {
            return Err(DomainError::InvalidInput("palette must not be empty".into()));
        }
        if self.min_zoom_ms <= 0 || self.max_zoom_ms < self.min_zoom_ms {
            return Err(DomainError::InvalidInput(format!(
                "zoom bounds {}..{} are invalid",
                self.min_zoom_ms, self.max_zoom_ms
            )));
        }
        if self.zoom_factor <= 1.0 {
            return Err(DomainError::InvalidInput("zoom factor must be greater than 1".into()));
        }
        if self.default_lot_span_days < 1 || self.default_task_duration_days < 1 {
            return Err(DomainError::InvalidInput("default spans must be at least one day".into()));
        }
        Ok(())
    }

    /// Palette color of lot `index`
    pub fn lot_color(&self, index: usize) -> String {
        self.palette[index % self.palette.len()].clone()
    }

    /// Storage key of `project_id`
    pub fn storage_key(&self, project_id: &str) -> String {
        format!("{}{}", self.storage_key_prefix, project_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlanningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_zoom_ms, 30 * DAY_MS);
        assert_eq!(config.max_zoom_ms, 365 * DAY_MS);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PlanningConfig::from_json_str(r##"{"autosaveDebounceMs": 250, "palette": ["#111"]}"##).unwrap();
        assert_eq!(config.autosave_debounce_ms, 250);
        assert_eq!(config.lot_color(5), "#111");
        assert_eq!(config.default_lot_span_days, 30);
    }

    #[test]
    fn test_rejects_bad_zoom() {
        let err = PlanningConfig::from_json_str(r#"{"minZoomMs": 10, "maxZoomMs": 5}"#).unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = PlanningConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, PlanningConfig::default());
    }

    #[test]
    fn test_storage_key() {
        assert_eq!(PlanningConfig::default().storage_key("p42"), "planning_p42");
    }
}
