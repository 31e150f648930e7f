//! Synchronization Engine
//!
//! Builds the planning from the project's work breakdown (lots and their
//! tasks) as delivered by upstream documents.
//!
//! Upstream documents come in several shapes; `normalize_feed` is the only
//! place that knows about them and yields `SpecLot` values.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::PlanningConfig;
use crate::domain::{Group, Item};
use crate::store::PlanningState;
use crate::time;

/// A task of the inbound feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecTask {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub progress: Option<u8>,
}

/// A lot of the inbound feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecLot {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<SpecTask>,
}

// ========================
// Feed normalization
// ========================

const LOT_LIST_KEYS: [&str; 2] = ["lots", "workPackages"];
const TASK_LIST_KEYS: [&str; 4] = ["tasks", "taches", "items", "children"];
const NAME_KEYS: [&str; 6] = ["name", "title", "designation", "label", "nom", "libelle"];
const ID_KEYS: [&str; 3] = ["id", "_id", "uuid"];
const START_KEYS: [&str; 5] = ["startDate", "start_date", "start", "dateDebut", "debut"];
const END_KEYS: [&str; 5] = ["endDate", "end_date", "end", "dateFin", "fin"];
const PROGRESS_KEYS: [&str; 3] = ["progress", "avancement", "percent"];

/// Turn any known upstream shape into canonical lots.
/// Missing or malformed input yields an empty list.
pub fn normalize_feed(feed: &Value) -> Vec<SpecLot> {
    let lots = match feed {
        Value::Array(lots) => lots,
        Value::Object(obj) => match LOT_LIST_KEYS.iter().find_map(|k| obj.get(*k)) {
            Some(Value::Array(lots)) => lots,
            _ => {
                tracing::warn!("lot feed has no lot list");
                return Vec::new();
            }
        },
        Value::Null => return Vec::new(),
        _ => {
            tracing::warn!("lot feed is not a list of lots");
            return Vec::new();
        }
    };

    lots.iter()
        .enumerate()
        .filter_map(|(i, raw)| {
            let Value::Object(_) = raw else {
                tracing::warn!(index = i, "skipping malformed lot");
                return None;
            };
            let tasks = TASK_LIST_KEYS
                .iter()
                .find_map(|k| raw.get(*k).and_then(Value::as_array))
                .map(|tasks| tasks.iter().enumerate().filter_map(|(j, t)| normalize_task(j, t)).collect())
                .unwrap_or_default();
            Some(SpecLot {
                id: pick_id(raw).unwrap_or_default(),
                name: pick_str(raw, &NAME_KEYS).unwrap_or_else(|| format!("Lot {}", i + 1)),
                tasks,
            })
        })
        .collect()
}

fn normalize_task(index: usize, raw: &Value) -> Option<SpecTask> {
    if !raw.is_object() {
        tracing::warn!(index, "skipping malformed task");
        return None;
    }
    Some(SpecTask {
        id: pick_id(raw),
        name: pick_str(raw, &NAME_KEYS).unwrap_or_else(|| format!("Task {}", index + 1)),
        start_date: pick_date(raw, &START_KEYS),
        end_date: pick_date(raw, &END_KEYS),
        progress: pick_progress(raw),
    })
}

fn pick_str(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| raw.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Ids may be strings or numbers upstream
fn pick_id(raw: &Value) -> Option<String> {
    ID_KEYS.iter().find_map(|k| match raw.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn pick_date(raw: &Value, keys: &[&str]) -> Option<NaiveDate> {
    let text = pick_str(raw, keys)?;
    let date = time::parse_date(&text);
    if date.is_none() {
        tracing::warn!(value = %text, "ignoring unparseable date");
    }
    date
}

fn pick_progress(raw: &Value) -> Option<u8> {
    PROGRESS_KEYS.iter().find_map(|k| {
        let value = raw.get(*k)?;
        let number = value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.trim().trim_end_matches('%').parse::<f64>().ok()))?;
        Some(number.round().clamp(0.0, 100.0) as u8)
    })
}

// ========================
// Engine
// ========================

pub struct SyncEngine {
    config: PlanningConfig,
}

impl SyncEngine {
    pub fn new(config: PlanningConfig) -> Self {
        Self { config }
    }

    /// Build a fresh planning from `lots`
    pub fn synchronize(&self, lots: &[SpecLot], today: NaiveDate) -> PlanningState {
        self.synchronize_with(lots, today, None)
    }

    /// Build a planning from `lots`. Tasks whose id already exists in
    /// `previous` keep their span and progress unless the feed carries them.
    pub fn synchronize_with(&self, lots: &[SpecLot], today: NaiveDate, previous: Option<&PlanningState>) -> PlanningState {
        let config = &self.config;
        let mut state = PlanningState::default();
        let mut used: HashSet<String> = HashSet::new();

        for (i, spec_lot) in lots.iter().enumerate() {
            let base = if spec_lot.id.trim().is_empty() {
                format!("lot-{}", Uuid::new_v4().simple())
            } else {
                format!("lot-{}", spec_lot.id.trim())
            };
            let lot_id = unique_id(base, &mut used);
            let lot = Group::new_lot(lot_id.clone(), spec_lot.name.clone(), config.lot_color(i));
            let mut tasks = Vec::with_capacity(spec_lot.tasks.len());
            let mut span: Option<(i64, i64)> = None;

            for (j, spec_task) in spec_lot.tasks.iter().enumerate() {
                let base = spec_task
                    .id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
                let task_id = unique_id(base, &mut used);
                let earlier = previous.and_then(|p| p.task_item(&task_id));

                let duration = config.default_task_duration_days;
                let stagger = (i as i64).saturating_mul(config.lot_stagger_days).saturating_add((j as i64).saturating_mul(config.task_stagger_days));
                let with_duration = |start: NaiveDate| time::shift_date(start, duration).map(|end| (start, end));
                let resolved = match (spec_task.start_date, spec_task.end_date, earlier) {
                    (Some(start), Some(end), _) if end >= start => Some((start, end)),
                    (Some(start), Some(end), _) => {
                        tracing::warn!(task = %task_id, %start, %end, "end before start, using default duration");
                        with_duration(start)
                    }
                    (Some(start), None, _) => with_duration(start),
                    (None, Some(end), _) => time::shift_date(end, -duration).map(|start| (start, end)),
                    (None, None, Some(item)) => Some((time::ms_to_date(item.start_time), time::ms_to_date(item.end_time))),
                    (None, None, None) => None,
                };
                let (start, end) = resolved.unwrap_or_else(|| {
                    if spec_task.start_date.is_some() || spec_task.end_date.is_some() {
                        tracing::warn!(task = %task_id, "dates out of range, using default schedule");
                    }
                    let start = time::shift_date(today, stagger).unwrap_or(today);
                    (start, time::shift_date(start, duration).unwrap_or(start))
                });
                let progress = spec_task.progress.or(earlier.map(|item| item.progress)).unwrap_or(0);

                let (start_time, end_time) = time::day_span(start, end);
                span = Some(match span {
                    None => (start_time, end_time),
                    Some((lo, hi)) => (lo.min(start_time), hi.max(end_time)),
                });

                let row = Group::new_task(&task_id, spec_task.name.clone(), &lot);
                let item = Item::new_task(task_id, row.id.clone(), row.name.clone(), start_time, end_time, progress, lot.lot_color.clone());
                tasks.push((row, item));
            }

            let (start, end) = span.unwrap_or_else(|| crate::aggregate::default_window(today, config.default_lot_span_days));
            state.items.push(Item::new_header(&lot.id, lot.name.clone(), start, end, lot.lot_color.clone()));
            state.groups.push(lot);
            for (row, item) in tasks {
                state.groups.push(row);
                state.items.push(item);
            }
        }

        crate::store::renumber(&mut state);
        tracing::info!(lots = lots.len(), items = state.items.len(), "planning synchronized");
        state
    }
}

/// Keep user data that lives outside the work breakdown: markers,
/// attachments and the collapse flags of lots that still exist.
pub fn carry_over(previous: &PlanningState, mut fresh: PlanningState) -> PlanningState {
    fresh.markers = previous.markers.clone();
    fresh.attachments = previous.attachments.clone();
    fresh.collapsed = previous
        .collapsed
        .iter()
        .filter(|(lot_id, _)| fresh.group(lot_id).is_some())
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    fresh
}

/// `id`, or `id` with a random suffix when already taken
fn unique_id(id: String, used: &mut HashSet<String>) -> String {
    let mut candidate = id.clone();
    while used.contains(&candidate) {
        let suffix = Uuid::new_v4().simple().to_string();
        candidate = format!("{}-{}", id, &suffix[..8]);
    }
    if candidate != id {
        tracing::warn!(original = %id, rewritten = %candidate, "duplicate id in lot feed");
    }
    used.insert(candidate.clone());
    candidate
}
