//! Repair
//!
//! Restores group/item references without discarding user data.
//! `repair_references` is the cheap pass run after every mutation;
//! `structural_repair` rebuilds the whole hierarchy when numbering or
//! links drifted too far for the incremental pass.

use std::collections::HashSet;

use chrono::NaiveDate;

use crate::aggregate;
use crate::config::PlanningConfig;
use crate::domain::{task_group_id, task_id_from_group, Group, Item};
use crate::store::{self, PlanningState};
use crate::time;

/// What a reference repair pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Items whose `group` was rewritten to their task row
    pub relinked: Vec<String>,
    /// Rows and items whose color was realigned with their lot
    pub recolored: Vec<String>,
    /// Items without any matching task row (left untouched)
    pub orphans: Vec<String>,
}

impl RepairReport {
    pub fn is_clean(&self) -> bool {
        self.relinked.is_empty() && self.recolored.is_empty()
    }
}

/// Relink task items to `task-<item.id>` and realign colors.
/// Never creates groups; orphans are only reported. Idempotent.
pub fn repair_references(state: &mut PlanningState) -> RepairReport {
    let mut report = RepairReport::default();

    // Task rows take their lot's color
    let lot_colors: Vec<(String, String)> = state.lots().map(|g| (g.id.clone(), g.lot_color.clone())).collect();
    for row in state.groups.iter_mut().filter(|g| !g.is_lot()) {
        let parent_color = lot_colors
            .iter()
            .find(|(id, _)| Some(id) == row.parent_id.as_ref())
            .map(|(_, color)| color);
        if let Some(color) = parent_color {
            if &row.lot_color != color {
                row.lot_color = color.clone();
                report.recolored.push(row.id.clone());
            }
        }
    }

    for item in state.items.iter_mut().filter(|i| !i.is_header) {
        let expected = task_group_id(&item.id);
        match state.groups.iter().find(|g| g.id == expected) {
            Some(row) => {
                if item.group != expected {
                    tracing::warn!(item = %item.id, from = %item.group, to = %expected, "relinking task item");
                    item.group = expected;
                    item.lot_color = row.lot_color.clone();
                    report.relinked.push(item.id.clone());
                } else if item.lot_color != row.lot_color {
                    item.lot_color = row.lot_color.clone();
                    report.recolored.push(item.id.clone());
                }
            }
            None => {
                tracing::warn!(item = %item.id, group = %item.group, "task item has no row");
                report.orphans.push(item.id.clone());
            }
        }
    }

    if !report.is_clean() {
        tracing::info!(
            relinked = report.relinked.len(),
            recolored = report.recolored.len(),
            orphans = report.orphans.len(),
            "reference repair applied"
        );
    }
    report
}

/// Outcome of a structural rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuralReport {
    pub lots: usize,
    pub tasks: usize,
    /// Task ids whose span or progress could not be recovered
    pub defaulted: Vec<String>,
    /// Items that were attached to a lot row and became tasks
    pub recovered: Vec<String>,
    /// Rows or items that could not be placed under any lot
    pub dropped: Vec<String>,
}

/// Rebuild groups and items from the flat task list, keeping task ids and,
/// when an item can be found, its span and progress.
pub fn structural_repair(state: &PlanningState, config: &PlanningConfig, today: NaiveDate) -> (PlanningState, StructuralReport) {
    let mut report = StructuralReport::default();
    let mut rebuilt = PlanningState {
        markers: state.markers.clone(),
        attachments: state.attachments.clone(),
        ..Default::default()
    };

    let mut seen_lots = HashSet::new();
    let lots: Vec<&Group> = state.lots().filter(|g| seen_lots.insert(g.id.clone())).collect();
    let mut placed_tasks: HashSet<String> = HashSet::new();
    let today_ms = time::date_to_ms(today);

    for (i, lot) in lots.iter().enumerate() {
        rebuilt.groups.push(Group::new_lot(lot.id.clone(), lot.name.clone(), lot.lot_color.clone()));
        if let Some(&flag) = state.collapsed.get(&lot.id) {
            rebuilt.collapsed.insert(lot.id.clone(), flag);
        }

        // Task rows first, then bars that were hung directly on the lot row
        let mut tasks: Vec<(String, String)> = state
            .tasks_of(&lot.id)
            .filter_map(|row| row.task_id().map(|id| (id.to_string(), row.name.clone())))
            .collect();
        for item in state.items.iter().filter(|i| !i.is_header && i.group == lot.id) {
            report.recovered.push(item.id.clone());
            tasks.push((item.id.clone(), item.content.clone()));
        }

        let mut j = 0i64;
        for (task_id, name) in tasks {
            if !placed_tasks.insert(task_id.clone()) {
                report.dropped.push(task_id);
                continue;
            }
            let row = Group::new_task(&task_id, name.clone(), lot);
            let original = state
                .task_item(&task_id)
                .or_else(|| state.items.iter().find(|it| !it.is_header && it.group == row.id));

            let item = match original {
                Some(orig) => Item::new_task(task_id.clone(), row.id.clone(), name, orig.start_time, orig.end_time, orig.progress, lot.lot_color.clone()),
                None => {
                    let start = time::add_days(today_ms, i as i64 * config.lot_stagger_days + j * config.task_stagger_days);
                    let end = time::add_days(start, config.default_task_duration_days);
                    report.defaulted.push(task_id.clone());
                    Item::new_task(task_id.clone(), row.id.clone(), name, start, end, 0, lot.lot_color.clone())
                }
            };
            rebuilt.groups.push(row);
            rebuilt.items.push(item);
            report.tasks += 1;
            j += 1;
        }
        report.lots += 1;
    }

    // Anything not reached from a lot is reported, not guessed
    for row in state.groups.iter().filter(|g| !g.is_lot()) {
        let placed = task_id_from_group(&row.id).is_some_and(|id| placed_tasks.contains(id));
        if !placed {
            report.dropped.push(row.id.clone());
        }
    }
    for item in state.items.iter().filter(|i| !i.is_header && !placed_tasks.contains(&i.id)) {
        report.dropped.push(item.id.clone());
    }

    let window = aggregate::default_window(today, config.default_lot_span_days);
    store::finalize(&mut rebuilt, window);

    tracing::info!(
        lots = report.lots,
        tasks = report.tasks,
        recovered = report.recovered.len(),
        dropped = report.dropped.len(),
        "structural repair rebuilt planning"
    );
    (rebuilt, report)
}
