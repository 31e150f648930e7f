//! Aggregation
//!
//! Derived values of the planning: lot header spans and progress roll-up.
//! Progress is never stored, it is computed from the task items on demand.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::domain::{Group, Item};
use crate::store::PlanningState;
use crate::time;

/// Placeholder span of a lot without tasks: today .. today + `span_days`
pub fn default_window(today: NaiveDate, span_days: i64) -> (i64, i64) {
    let start = time::date_to_ms(today);
    (start, time::end_of_day(time::add_days(start, span_days)))
}

/// min(start)..max(end) over the lot's task items
pub fn task_span(state: &PlanningState, lot_id: &str) -> Option<(i64, i64)> {
    state.task_items_of(lot_id).fold(None, |acc, item| match acc {
        None => Some((item.start_time, item.end_time)),
        Some((start, end)) => Some((start.min(item.start_time), end.max(item.end_time))),
    })
}

/// First and last instant of the whole schedule
pub fn schedule_extent(state: &PlanningState) -> Option<(i64, i64)> {
    state.items.iter().fold(None, |acc, item| match acc {
        None => Some((item.start_time, item.end_time)),
        Some((start, end)) => Some((start.min(item.start_time), end.max(item.end_time))),
    })
}

/// Set each lot's header to the exact span of its tasks (or `default`
/// when it has none). Creates missing headers, drops duplicate headers and
/// headers whose lot is gone. Returns the number of items touched.
pub fn recompute_headers(state: &mut PlanningState, default: (i64, i64)) -> usize {
    let lots: Vec<Group> = state.lots().cloned().collect();
    let mut touched = 0;

    let before = state.items.len();
    let mut seen = std::collections::HashSet::new();
    state.items.retain(|item| {
        if !item.is_header {
            return true;
        }
        let owned = lots.iter().any(|lot| lot.id == item.group);
        if !owned {
            tracing::warn!(item = %item.id, group = %item.group, "dropping header of missing lot");
        }
        owned && seen.insert(item.group.clone())
    });
    touched += before - state.items.len();

    for lot in &lots {
        let (start, end) = task_span(state, &lot.id).unwrap_or(default);
        match state.items.iter_mut().find(|i| i.is_header && i.group == lot.id) {
            Some(header) => {
                if header.start_time != start || header.end_time != end || header.lot_color != lot.lot_color || header.content != lot.name {
                    header.start_time = start;
                    header.end_time = end;
                    header.lot_color = lot.lot_color.clone();
                    header.content = lot.name.clone();
                    touched += 1;
                }
            }
            None => {
                tracing::debug!(lot = %lot.id, "creating missing header item");
                state.items.push(Item::new_header(&lot.id, lot.name.clone(), start, end, lot.lot_color.clone()));
                touched += 1;
            }
        }
    }
    touched
}

/// Rounded mean of the lot's task progress (0 without tasks)
pub fn lot_progress(state: &PlanningState, lot_id: &str) -> u8 {
    let (sum, count) = state
        .task_items_of(lot_id)
        .fold((0u32, 0u32), |(sum, count), item| (sum + u32::from(item.progress), count + 1));
    if count == 0 {
        return 0;
    }
    ((sum + count / 2) / count) as u8
}

/// Progress of every lot, keyed by lot id
pub fn progress_by_lot(state: &PlanningState) -> BTreeMap<String, u8> {
    state
        .lots()
        .map(|lot| (lot.id.clone(), lot_progress(state, &lot.id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{date_to_ms, DAY_MS};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn lot_with_tasks(spans: &[(i64, i64, u8)]) -> PlanningState {
        let lot = Group::new_lot("lot-1".into(), "Gros œuvre".into(), "#e57373".into());
        let mut state = PlanningState::default();
        state.items.push(Item::new_header("lot-1", "Gros œuvre".into(), 0, 0, lot.lot_color.clone()));
        for (i, (start, end, progress)) in spans.iter().enumerate() {
            let id = format!("t{}", i);
            let task = Group::new_task(&id, format!("Task {}", i), &lot);
            state.items.push(Item::new_task(id, task.id.clone(), task.name.clone(), *start, *end, *progress, lot.lot_color.clone()));
            state.groups.push(task);
        }
        state.groups.insert(0, lot);
        state
    }

    #[test]
    fn test_header_spans_tasks_exactly() {
        let jan1 = date_to_ms(date(2024, 1, 1));
        let jan5 = date_to_ms(date(2024, 1, 5));
        let mut state = lot_with_tasks(&[(jan1, jan1 + 9 * DAY_MS, 0), (jan5, jan5 + 15 * DAY_MS, 0)]);

        recompute_headers(&mut state, (0, 0));
        let header = state.header_of("lot-1").unwrap();
        assert_eq!(header.start_time, jan1);
        assert_eq!(header.end_time, time::end_of_day(date_to_ms(date(2024, 1, 20))));
    }

    #[test]
    fn test_empty_lot_gets_default_window() {
        let mut state = lot_with_tasks(&[]);
        let window = default_window(date(2024, 6, 1), 30);
        recompute_headers(&mut state, window);
        let header = state.header_of("lot-1").unwrap();
        assert_eq!((header.start_time, header.end_time), window);
        assert_eq!(window.1 - window.0 + 1, 31 * DAY_MS);
    }

    #[test]
    fn test_recompute_is_stable() {
        let mut state = lot_with_tasks(&[(0, DAY_MS, 0)]);
        recompute_headers(&mut state, (0, 0));
        assert_eq!(recompute_headers(&mut state, (0, 0)), 0);
    }

    #[test]
    fn test_missing_and_stale_headers() {
        let mut state = lot_with_tasks(&[(0, DAY_MS, 0)]);
        state.items.retain(|i| !i.is_header);
        state.items.push(Item::new_header("lot-gone", "Old".into(), 0, 0, "#000".into()));

        recompute_headers(&mut state, (0, 0));
        assert!(state.header_of("lot-1").is_some());
        assert!(state.items.iter().all(|i| i.group != "lot-gone"));
        assert_eq!(state.items.iter().filter(|i| i.is_header).count(), 1);
    }

    #[test]
    fn test_progress_rollup() {
        let state = lot_with_tasks(&[(0, DAY_MS, 50), (0, DAY_MS, 25)]);
        assert_eq!(lot_progress(&state, "lot-1"), 38);
        assert_eq!(progress_by_lot(&state).get("lot-1"), Some(&38));

        let empty = lot_with_tasks(&[]);
        assert_eq!(lot_progress(&empty, "lot-1"), 0);
    }

    #[test]
    fn test_schedule_extent() {
        let state = lot_with_tasks(&[(DAY_MS, 2 * DAY_MS, 0), (5 * DAY_MS, 9 * DAY_MS, 0)]);
        let (start, end) = schedule_extent(&state).unwrap();
        assert_eq!(start, 0);
        assert_eq!(end, 10 * DAY_MS - 1);
        assert!(schedule_extent(&PlanningState::default()).is_none());
    }
}
