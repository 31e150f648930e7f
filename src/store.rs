//! Planning Model Store
//!
//! Single source of truth for render and edit operations. Holds an
//! immutable snapshot; every mutation works on a copy, runs the finalize
//! pass (ordering, numbering, reference repair, header spans) and swaps the
//! copy in only when everything succeeded.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate;
use crate::config::PlanningConfig;
use crate::domain::{position_of, task_group_id, DomainError, DomainResult, Group, Item, Marker, MarkerKind};
use crate::repair::{self, RepairReport};
use crate::time;

/// Global planning state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanningState {
    /// Lots and task rows, each lot followed by its tasks
    pub groups: Vec<Group>,
    /// Header and task bars
    pub items: Vec<Item>,
    /// Collapse flag per lot id
    pub collapsed: BTreeMap<String, bool>,
    /// Date markers
    pub markers: Vec<Marker>,
    /// Large binary payloads (data URLs), dropped first when storage is short
    pub attachments: BTreeMap<String, String>,
}

impl PlanningState {
    pub fn lots(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter().filter(|g| g.is_lot())
    }

    /// Task rows of `lot_id` in display order
    pub fn tasks_of<'a>(&'a self, lot_id: &'a str) -> impl Iterator<Item = &'a Group> + 'a {
        self.groups.iter().filter(move |g| g.parent_id.as_deref() == Some(lot_id))
    }

    /// Non-header items whose group's parent is `lot_id`
    pub fn task_items_of<'a>(&'a self, lot_id: &'a str) -> impl Iterator<Item = &'a Item> + 'a {
        self.items.iter().filter(move |item| {
            !item.is_header
                && self
                    .group(&item.group)
                    .is_some_and(|g| g.parent_id.as_deref() == Some(lot_id))
        })
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Non-header item of `task_id`
    pub fn task_item(&self, task_id: &str) -> Option<&Item> {
        self.items.iter().find(|i| !i.is_header && i.id == task_id)
    }

    pub fn header_of(&self, lot_id: &str) -> Option<&Item> {
        self.items.iter().find(|i| i.is_header && i.group == lot_id)
    }

    /// Lot owning the task row of `task_id`
    pub fn lot_of_task(&self, task_id: &str) -> Option<&Group> {
        let parent = self.group(&task_group_id(task_id))?.parent_id.as_deref()?;
        self.group(parent)
    }

    pub fn is_collapsed(&self, lot_id: &str) -> bool {
        self.collapsed.get(lot_id).copied().unwrap_or(false)
    }
}

/// Immutable view handed to renderers, exporters and the persistence layer
pub type Snapshot = Arc<PlanningState>;

/// Fields of a task created by hand
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub name: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub progress: u8,
}

/// Partial task edit; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub progress: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct NewMarker {
    pub date: NaiveDate,
    pub title: String,
    pub kind: MarkerKind,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MarkerUpdate {
    pub date: Option<NaiveDate>,
    pub title: Option<String>,
    pub kind: Option<MarkerKind>,
    pub color: Option<String>,
}

/// Owner of the planning snapshot
pub struct ModelStore {
    state: Snapshot,
    config: PlanningConfig,
    /// Pinned "today" (None = system clock)
    today: Option<NaiveDate>,
}

impl ModelStore {
    pub fn new(config: PlanningConfig) -> Self {
        Self {
            state: Arc::new(PlanningState::default()),
            config,
            today: None,
        }
    }

    /// Pin the date used for default spans
    pub fn set_today(&mut self, today: NaiveDate) {
        self.today = Some(today);
    }

    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(time::today)
    }

    pub fn config(&self) -> &PlanningConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.state)
    }

    fn default_window(&self) -> (i64, i64) {
        aggregate::default_window(self.today(), self.config.default_lot_span_days)
    }

    /// Apply `f` to a copy of the state, finalize it and publish it
    fn mutate<T>(&mut self, f: impl FnOnce(&mut PlanningState, &PlanningConfig, NaiveDate) -> DomainResult<T>) -> DomainResult<(T, Snapshot)> {
        let today = self.today();
        let window = self.default_window();
        let mut next = (*self.state).clone();

        let out = f(&mut next, &self.config, today)?;
        finalize(&mut next, window);

        self.state = Arc::new(next);
        Ok((out, self.snapshot()))
    }

    // ========================
    // Whole-state operations
    // ========================

    /// Install a rebuilt state (sync, structural repair) after finalizing it
    pub fn replace(&mut self, state: PlanningState) -> Snapshot {
        let mut next = state;
        finalize(&mut next, self.default_window());
        self.state = Arc::new(next);
        self.snapshot()
    }

    /// Drop everything
    pub fn reset(&mut self) -> Snapshot {
        self.state = Arc::new(PlanningState::default());
        self.snapshot()
    }

    /// Run the reference repair pass on demand
    pub fn repair_references(&mut self) -> DomainResult<(RepairReport, Snapshot)> {
        self.mutate(|state, _, _| Ok(repair::repair_references(state)))
    }

    // ========================
    // Lots
    // ========================

    pub fn add_lot(&mut self, name: &str) -> DomainResult<(String, Snapshot)> {
        let name = required_name(name)?;
        self.mutate(|state, config, today| {
            let id = format!("lot-{}", Uuid::new_v4().simple());
            let color = config.lot_color(state.lots().count());
            let (start, end) = aggregate::default_window(today, config.default_lot_span_days);

            state.items.push(Item::new_header(&id, name.clone(), start, end, color.clone()));
            state.groups.push(Group::new_lot(id.clone(), name, color));
            tracing::debug!(lot = %id, "lot added");
            Ok(id)
        })
    }

    pub fn rename_lot(&mut self, lot_id: &str, name: &str) -> DomainResult<Snapshot> {
        let name = required_name(name)?;
        self.mutate(|state, _, _| {
            let lot = find_lot_mut(state, lot_id)?;
            lot.name = name;
            Ok(())
        })
        .map(|(_, snap)| snap)
    }

    /// Change a lot color; tasks and bars follow
    pub fn recolor_lot(&mut self, lot_id: &str, color: &str) -> DomainResult<Snapshot> {
        if color.trim().is_empty() {
            return Err(DomainError::InvalidInput("color must not be empty".into()));
        }
        self.mutate(|state, _, _| {
            find_lot_mut(state, lot_id)?.lot_color = color.to_string();
            let rows: Vec<String> = state
                .groups
                .iter_mut()
                .filter(|g| g.id == lot_id || g.parent_id.as_deref() == Some(lot_id))
                .map(|g| {
                    g.lot_color = color.to_string();
                    g.id.clone()
                })
                .collect();
            for item in state.items.iter_mut().filter(|i| rows.contains(&i.group)) {
                item.lot_color = color.to_string();
            }
            Ok(())
        })
        .map(|(_, snap)| snap)
    }

    /// Move a lot to `index` among lots; its tasks follow
    pub fn move_lot(&mut self, lot_id: &str, index: usize) -> DomainResult<Snapshot> {
        self.mutate(|state, _, _| {
            let from = position_of(&state.groups, lot_id)
                .filter(|&i| state.groups[i].is_lot())
                .ok_or_else(|| DomainError::NotFound(format!("Lot {}", lot_id)))?;
            let lot = state.groups.remove(from);
            let at = state
                .groups
                .iter()
                .enumerate()
                .filter(|(_, g)| g.is_lot())
                .nth(index)
                .map(|(i, _)| i)
                .unwrap_or(state.groups.len());
            state.groups.insert(at, lot);
            Ok(())
        })
        .map(|(_, snap)| snap)
    }

    /// Delete a lot with all its task rows and bars
    pub fn delete_lot(&mut self, lot_id: &str) -> DomainResult<Snapshot> {
        self.mutate(|state, _, _| {
            find_lot_mut(state, lot_id)?;

            let task_rows: Vec<String> = state.tasks_of(lot_id).map(|g| g.id.clone()).collect();
            let task_ids: Vec<String> = state
                .tasks_of(lot_id)
                .filter_map(|g| g.task_id().map(str::to_string))
                .collect();

            state.groups.retain(|g| g.id != lot_id && g.parent_id.as_deref() != Some(lot_id));
            state.items.retain(|i| {
                i.group != lot_id && !task_rows.contains(&i.group) && !(!i.is_header && task_ids.contains(&i.id))
            });
            state.collapsed.remove(lot_id);
            tracing::debug!(lot = %lot_id, tasks = task_rows.len(), "lot deleted");
            Ok(())
        })
        .map(|(_, snap)| snap)
    }

    pub fn toggle_collapse(&mut self, lot_id: &str) -> DomainResult<Snapshot> {
        self.mutate(|state, _, _| {
            find_lot_mut(state, lot_id)?;
            let flag = state.collapsed.entry(lot_id.to_string()).or_insert(false);
            *flag = !*flag;
            Ok(())
        })
        .map(|(_, snap)| snap)
    }

    // ========================
    // Tasks
    // ========================

    pub fn add_task(&mut self, lot_id: &str, task: NewTask) -> DomainResult<(String, Snapshot)> {
        let name = required_name(&task.name)?;
        self.mutate(|state, config, today| {
            let lot = find_lot_mut(state, lot_id)?.clone();
            let start = task.start.unwrap_or(today);
            let end = match task.end {
                Some(end) => end,
                None => time::shift_date(start, config.default_task_duration_days)
                    .ok_or_else(|| DomainError::InvalidInput(format!("start {} is out of range", start)))?,
            };
            let (start_time, end_time) = checked_span(start, end)?;

            let id = Uuid::new_v4().simple().to_string();
            let row = Group::new_task(&id, name, &lot);
            state.items.push(Item::new_task(
                id.clone(),
                row.id.clone(),
                row.name.clone(),
                start_time,
                end_time,
                task.progress,
                lot.lot_color.clone(),
            ));
            state.groups.push(row);
            Ok(id)
        })
    }

    /// Rename, reschedule or set progress of a task
    pub fn update_task(&mut self, task_id: &str, update: TaskUpdate) -> DomainResult<Snapshot> {
        let name = update.name.as_deref().map(required_name).transpose()?;
        self.mutate(|state, _, _| {
            let item = find_task_item_mut(state, task_id)?;
            let start = update.start.unwrap_or_else(|| time::ms_to_date(item.start_time));
            let end = update.end.unwrap_or_else(|| time::ms_to_date(item.end_time));
            let (start_time, end_time) = checked_span(start, end)?;

            item.start_time = start_time;
            item.end_time = end_time;
            if let Some(progress) = update.progress {
                item.progress = progress.min(100);
            }
            if let Some(name) = name {
                item.content = name.clone();
                if let Some(row) = state.groups.iter_mut().find(|g| g.id == task_group_id(task_id)) {
                    row.name = name;
                }
            }
            Ok(())
        })
        .map(|(_, snap)| snap)
    }

    /// Commit a dragged or resized span (ms epoch, aligned to whole days)
    pub fn set_item_span(&mut self, item_id: &str, start_time: i64, end_time: i64) -> DomainResult<Snapshot> {
        self.mutate(|state, _, _| {
            let item = state
                .items
                .iter_mut()
                .find(|i| i.id == item_id)
                .ok_or_else(|| DomainError::NotFound(format!("Item {}", item_id)))?;
            if item.is_header {
                return Err(DomainError::InvalidInput("header items follow their tasks".into()));
            }
            let start = time::start_of_day(start_time);
            let end = time::end_of_day(end_time);
            if end <= start {
                return Err(DomainError::InvalidInput("end must be after start".into()));
            }
            item.start_time = start;
            item.end_time = end;
            Ok(())
        })
        .map(|(_, snap)| snap)
    }

    /// Move a task to `index` within its lot
    pub fn move_task(&mut self, task_id: &str, index: usize) -> DomainResult<Snapshot> {
        self.mutate(|state, _, _| {
            let row_id = task_group_id(task_id);
            let from = position_of(&state.groups, &row_id)
                .ok_or_else(|| DomainError::NotFound(format!("Task {}", task_id)))?;
            let row = state.groups.remove(from);
            let lot_id = row.parent_id.clone().unwrap_or_default();

            let siblings: Vec<usize> = state
                .groups
                .iter()
                .enumerate()
                .filter(|(_, g)| g.parent_id.as_deref() == Some(lot_id.as_str()))
                .map(|(i, _)| i)
                .collect();
            let at = match siblings.get(index) {
                Some(&i) => i,
                None => siblings
                    .last()
                    .map(|&i| i + 1)
                    .or_else(|| position_of(&state.groups, &lot_id).map(|i| i + 1))
                    .unwrap_or(state.groups.len()),
            };
            state.groups.insert(at, row);
            Ok(())
        })
        .map(|(_, snap)| snap)
    }

    pub fn delete_task(&mut self, task_id: &str) -> DomainResult<Snapshot> {
        self.mutate(|state, _, _| {
            let row_id = task_group_id(task_id);
            let groups_before = state.groups.len();
            let items_before = state.items.len();

            state.groups.retain(|g| g.id != row_id);
            state.items.retain(|i| i.is_header || (i.id != task_id && i.group != row_id));

            if state.groups.len() == groups_before && state.items.len() == items_before {
                return Err(DomainError::NotFound(format!("Task {}", task_id)));
            }
            Ok(())
        })
        .map(|(_, snap)| snap)
    }

    // ========================
    // Markers
    // ========================

    pub fn add_marker(&mut self, marker: NewMarker) -> DomainResult<(String, Snapshot)> {
        let title = required_name(&marker.title)?;
        self.mutate(|state, _, _| {
            let id = format!("marker-{}", Uuid::new_v4().simple());
            state.markers.push(Marker {
                id: id.clone(),
                date: time::date_to_ms(marker.date),
                title,
                kind: marker.kind,
                color: marker.color.unwrap_or_else(|| marker.kind.default_color().to_string()),
            });
            Ok(id)
        })
    }

    pub fn update_marker(&mut self, marker_id: &str, update: MarkerUpdate) -> DomainResult<Snapshot> {
        let title = update.title.as_deref().map(required_name).transpose()?;
        self.mutate(|state, _, _| {
            let marker = state
                .markers
                .iter_mut()
                .find(|m| m.id == marker_id)
                .ok_or_else(|| DomainError::NotFound(format!("Marker {}", marker_id)))?;
            if let Some(date) = update.date {
                marker.date = time::date_to_ms(date);
            }
            if let Some(title) = title {
                marker.title = title;
            }
            if let Some(kind) = update.kind {
                marker.kind = kind;
            }
            if let Some(color) = update.color {
                marker.color = color;
            }
            Ok(())
        })
        .map(|(_, snap)| snap)
    }

    pub fn delete_marker(&mut self, marker_id: &str) -> DomainResult<Snapshot> {
        self.mutate(|state, _, _| {
            let index = position_of(&state.markers, marker_id)
                .ok_or_else(|| DomainError::NotFound(format!("Marker {}", marker_id)))?;
            state.markers.remove(index);
            Ok(())
        })
        .map(|(_, snap)| snap)
    }

    // ========================
    // Attachments
    // ========================

    pub fn set_attachment(&mut self, key: &str, data: String) -> DomainResult<Snapshot> {
        self.mutate(|state, _, _| {
            state.attachments.insert(key.to_string(), data);
            Ok(())
        })
        .map(|(_, snap)| snap)
    }

    pub fn remove_attachment(&mut self, key: &str) -> DomainResult<Snapshot> {
        self.mutate(|state, _, _| {
            state
                .attachments
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| DomainError::NotFound(format!("Attachment {}", key)))
        })
        .map(|(_, snap)| snap)
    }
}

// ========================
// Finalize pass
// ========================

/// Restore every derived invariant of `state`
pub fn finalize(state: &mut PlanningState, default_window: (i64, i64)) -> RepairReport {
    normalize_order(state);
    renumber(state);
    let report = repair::repair_references(state);
    aggregate::recompute_headers(state, default_window);
    normalize_item_order(state);
    report
}

/// Lay groups out as lot, its tasks, next lot... keeping relative order.
/// Rows whose lot is missing stay at the end.
pub fn normalize_order(state: &mut PlanningState) {
    let mut ordered = Vec::with_capacity(state.groups.len());
    for lot in state.groups.iter().filter(|g| g.is_lot()) {
        ordered.push(lot.clone());
        ordered.extend(state.tasks_of(&lot.id).cloned());
    }
    let leftovers: Vec<Group> = state
        .groups
        .iter()
        .filter(|g| !ordered.iter().any(|o| o.id == g.id))
        .cloned()
        .collect();
    ordered.extend(leftovers);
    state.groups = ordered;
}

/// Order items like their rows: header first, then task bars
fn normalize_item_order(state: &mut PlanningState) {
    let rank = |item: &Item| -> (usize, bool) {
        let row = position_of(&state.groups, &item.group).unwrap_or(usize::MAX);
        (row, !item.is_header)
    };
    let mut items = std::mem::take(&mut state.items);
    items.sort_by_key(|item| rank(item));
    state.items = items;
}

/// Recompute titles from array position: "1. Lot", "1.1 Task"
pub fn renumber(state: &mut PlanningState) {
    let mut lot_index = 0;
    let mut task_index = 0;
    let mut current_lot: Option<String> = None;

    for group in state.groups.iter_mut() {
        if group.is_lot() {
            lot_index += 1;
            task_index = 0;
            current_lot = Some(group.id.clone());
            group.title = format!("{}. {}", lot_index, group.name);
        } else if group.parent_id == current_lot {
            task_index += 1;
            group.title = format!("{}.{} {}", lot_index, task_index, group.name);
        } else {
            group.title = group.name.clone();
        }
    }
}

fn required_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::InvalidInput("name must not be empty".into()));
    }
    Ok(name.to_string())
}

/// Whole-day span of `start..=end`
fn checked_span(start: NaiveDate, end: NaiveDate) -> DomainResult<(i64, i64)> {
    if end < start {
        return Err(DomainError::InvalidInput(format!("end {} is before start {}", end, start)));
    }
    Ok(time::day_span(start, end))
}

fn find_lot_mut<'a>(state: &'a mut PlanningState, lot_id: &str) -> DomainResult<&'a mut Group> {
    state
        .groups
        .iter_mut()
        .find(|g| g.id == lot_id && g.is_lot())
        .ok_or_else(|| DomainError::NotFound(format!("Lot {}", lot_id)))
}

fn find_task_item_mut<'a>(state: &'a mut PlanningState, task_id: &str) -> DomainResult<&'a mut Item> {
    state
        .items
        .iter_mut()
        .find(|i| !i.is_header && i.id == task_id)
        .ok_or_else(|| DomainError::NotFound(format!("Task {}", task_id)))
}
