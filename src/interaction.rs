//! Interaction Controller
//!
//! Turns pointer events into schedule changes. Pointer tracking (press,
//! threshold, click vs drag, drop validity) is delegated to
//! `pointer_dragdrop::DndState`; this module maps pixel offsets to time,
//! snaps to whole days and owns the visible window (zoom and pan).
//!
//! The controller never mutates the model: a finished gesture yields a
//! `GestureOutcome` that the caller commits.

use pointer_dragdrop::{DndState, DropOutcome, Point};
use serde::{Deserialize, Serialize};

use crate::config::PlanningConfig;
use crate::store::PlanningState;
use crate::time::{self, DAY_MS};

/// Which side of a bar is being dragged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeEdge {
    Start,
    End,
}

/// What the pointer went down on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerTarget {
    Item(String),
    ItemEdge(String, ResizeEdge),
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleWindow {
    pub start: i64,
    pub end: i64,
}

impl VisibleWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    pub fn midpoint(&self) -> i64 {
        self.start + self.duration() / 2
    }

    fn shifted(&self, delta_ms: i64) -> Self {
        Self::new(self.start + delta_ms, self.end + delta_ms)
    }

    pub fn contains(&self, ms: i64) -> bool {
        (self.start..=self.end).contains(&ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GestureState {
    Idle,
    Dragging { item_id: String },
    Resizing { item_id: String, edge: ResizeEdge },
    PanningView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cursor {
    Default,
    Grab,
    Grabbing,
    ColResize,
}

/// Live span shown while a bar is dragged
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanPreview {
    pub item_id: String,
    pub start_time: i64,
    pub end_time: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GestureOutcome {
    None,
    Clicked(String),
    Moved { item_id: String, start_time: i64, end_time: i64 },
    Resized { item_id: String, start_time: i64, end_time: i64 },
    Panned(VisibleWindow),
    Cancelled,
    Rejected(String),
}

impl GestureOutcome {
    /// Span to commit, if the gesture changed one
    pub fn committed_span(&self) -> Option<(&str, i64, i64)> {
        match self {
            GestureOutcome::Moved { item_id, start_time, end_time }
            | GestureOutcome::Resized { item_id, start_time, end_time } => Some((item_id.as_str(), *start_time, *end_time)),
            _ => None,
        }
    }
}

/// What was grabbed, with the values at press time
#[derive(Debug, Clone, PartialEq)]
enum Grab {
    Move { item_id: String, start: i64, end: i64 },
    Resize { item_id: String, edge: ResizeEdge, start: i64, end: i64 },
    Pan { origin: VisibleWindow },
}

pub struct InteractionController {
    dnd: DndState<Grab>,
    window: VisibleWindow,
    viewport_width_px: f64,
    min_zoom_ms: i64,
    max_zoom_ms: i64,
    zoom_factor: f64,
    preview: Option<SpanPreview>,
}

impl InteractionController {
    pub fn new(config: &PlanningConfig, window: VisibleWindow, viewport_width_px: f64) -> Self {
        let mut controller = Self {
            dnd: DndState::with_threshold(config.drag_threshold_px),
            window,
            viewport_width_px: viewport_width_px.max(1.0),
            min_zoom_ms: config.min_zoom_ms,
            max_zoom_ms: config.max_zoom_ms,
            zoom_factor: config.zoom_factor,
            preview: None,
        };
        controller.zoom_to(window.duration());
        controller
    }

    pub fn window(&self) -> VisibleWindow {
        self.window
    }

    pub fn set_window(&mut self, window: VisibleWindow) {
        self.window = window;
        self.zoom_to(window.duration());
    }

    pub fn set_viewport_width(&mut self, width_px: f64) {
        if width_px > 0.0 {
            self.viewport_width_px = width_px;
        }
    }

    /// Milliseconds represented by one horizontal pixel
    pub fn ms_per_px(&self) -> f64 {
        self.window.duration() as f64 / self.viewport_width_px
    }

    pub fn state(&self) -> GestureState {
        match self.dnd.pending() {
            Some(Grab::Move { item_id, .. }) if self.dnd.is_dragging() => GestureState::Dragging { item_id: item_id.clone() },
            Some(Grab::Resize { item_id, edge, .. }) if self.dnd.is_dragging() => {
                GestureState::Resizing { item_id: item_id.clone(), edge: *edge }
            }
            Some(Grab::Pan { .. }) if self.dnd.is_dragging() => GestureState::PanningView,
            _ => GestureState::Idle,
        }
    }

    /// True from pointer-down until the gesture ends
    pub fn is_active(&self) -> bool {
        self.dnd.pending().is_some()
    }

    pub fn cursor(&self) -> Cursor {
        match (self.dnd.pending(), self.dnd.is_dragging()) {
            (None, _) => Cursor::Default,
            (Some(Grab::Resize { .. }), _) => Cursor::ColResize,
            (Some(_), false) => Cursor::Grab,
            (Some(_), true) => Cursor::Grabbing,
        }
    }

    pub fn preview(&self) -> Option<&SpanPreview> {
        self.preview.as_ref()
    }

    // ========================
    // Pointer events
    // ========================

    pub fn pointer_down(&mut self, target: PointerTarget, at: Point, state: &PlanningState) -> GestureOutcome {
        if self.is_active() {
            self.cancel();
        }
        let (item_id, edge) = match target {
            PointerTarget::Background => {
                self.dnd.press(Grab::Pan { origin: self.window }, at);
                return GestureOutcome::None;
            }
            PointerTarget::Item(item_id) => (item_id, None),
            PointerTarget::ItemEdge(item_id, edge) => (item_id, Some(edge)),
        };
        let Some(item) = state.item(&item_id) else {
            return GestureOutcome::Rejected(format!("unknown item {}", item_id));
        };
        if item.is_header {
            tracing::debug!(item = %item_id, "header items follow their tasks");
            return GestureOutcome::Rejected(format!("header {} cannot be moved", item_id));
        }
        let (start, end) = (item.start_time, item.end_time);
        let grab = match edge {
            None => Grab::Move { item_id, start, end },
            Some(edge) => Grab::Resize { item_id, edge, start, end },
        };
        self.dnd.press(grab, at);
        GestureOutcome::None
    }

    pub fn pointer_move(&mut self, at: Point) {
        let Some((dx, _)) = self.dnd.motion(at) else {
            return;
        };
        let delta_ms = self.px_to_ms(dx);
        match self.dnd.pending().cloned() {
            Some(Grab::Move { item_id, start, end }) => {
                let (start_time, end_time) = moved_span(start, end, delta_ms);
                self.preview = Some(SpanPreview { item_id, start_time, end_time });
            }
            Some(Grab::Resize { item_id, edge, start, end }) => {
                let (start_time, end_time) = resized_span(start, end, edge, delta_ms);
                self.preview = Some(SpanPreview { item_id, start_time, end_time });
            }
            Some(Grab::Pan { origin }) => self.window = origin.shifted(-delta_ms),
            None => {}
        }
    }

    pub fn pointer_up(&mut self, at: Point, over_valid_target: bool) -> GestureOutcome {
        self.preview = None;
        match self.dnd.release(at, over_valid_target) {
            DropOutcome::Idle => GestureOutcome::None,
            DropOutcome::Click(Grab::Move { item_id, .. }) | DropOutcome::Click(Grab::Resize { item_id, .. }) => {
                GestureOutcome::Clicked(item_id)
            }
            DropOutcome::Click(Grab::Pan { .. }) => GestureOutcome::None,
            DropOutcome::Cancelled(grab) => {
                if let Grab::Pan { origin } = grab {
                    self.window = origin;
                }
                GestureOutcome::Cancelled
            }
            DropOutcome::Dropped { key, dx, .. } => {
                let delta_ms = self.px_to_ms(dx);
                match key {
                    Grab::Move { item_id, start, end } => {
                        let (start_time, end_time) = moved_span(start, end, delta_ms);
                        tracing::debug!(item = %item_id, start_time, end_time, "bar moved");
                        GestureOutcome::Moved { item_id, start_time, end_time }
                    }
                    Grab::Resize { item_id, edge, start, end } => {
                        let (start_time, end_time) = resized_span(start, end, edge, delta_ms);
                        if end_time <= start_time {
                            return GestureOutcome::Rejected(format!("resize of {} would end before it starts", item_id));
                        }
                        GestureOutcome::Resized { item_id, start_time, end_time }
                    }
                    Grab::Pan { origin } => {
                        self.window = origin.shifted(-delta_ms);
                        GestureOutcome::Panned(self.window)
                    }
                }
            }
        }
    }

    /// Abort the current gesture without any change
    pub fn cancel(&mut self) -> GestureOutcome {
        self.preview = None;
        match self.dnd.cancel() {
            Some(Grab::Pan { origin }) => {
                self.window = origin;
                GestureOutcome::Cancelled
            }
            Some(_) => GestureOutcome::Cancelled,
            None => GestureOutcome::None,
        }
    }

    // ========================
    // Zoom and pan
    // ========================

    pub fn zoom_in(&mut self) -> VisibleWindow {
        let duration = (self.window.duration() as f64 / self.zoom_factor).round() as i64;
        self.zoom_to(duration)
    }

    pub fn zoom_out(&mut self) -> VisibleWindow {
        let duration = (self.window.duration() as f64 * self.zoom_factor).round() as i64;
        self.zoom_to(duration)
    }

    /// Resize the window around its midpoint, within the zoom bounds
    pub fn zoom_to(&mut self, duration_ms: i64) -> VisibleWindow {
        let duration = time::clamp_zoom(duration_ms, self.min_zoom_ms, self.max_zoom_ms);
        let start = self.window.midpoint() - duration / 2;
        self.window = VisibleWindow::new(start, start + duration);
        self.window
    }

    /// Shift the window; positive `dx` reveals earlier dates
    pub fn pan_by_px(&mut self, dx: f64) -> VisibleWindow {
        self.window = self.window.shifted(-self.px_to_ms(dx));
        self.window
    }

    fn px_to_ms(&self, dx: f64) -> i64 {
        (dx * self.ms_per_px()).round() as i64
    }
}

/// Move keeping the duration; the start lands on the nearest midnight
fn moved_span(start: i64, end: i64, delta_ms: i64) -> (i64, i64) {
    let new_start = time::snap_to_day(start + delta_ms);
    (new_start, new_start + (end - start))
}

/// Only the dragged edge moves. The end edge snaps on the boundary after
/// the last day so the result stays an end-of-day instant.
fn resized_span(start: i64, end: i64, edge: ResizeEdge, delta_ms: i64) -> (i64, i64) {
    match edge {
        ResizeEdge::Start => (time::snap_to_day(start + delta_ms), end),
        ResizeEdge::End => (start, time::snap_to_day(end + 1 + delta_ms) - 1),
    }
}

/// Window of `days` starting at midnight of `start`
pub fn window_from(start: chrono::NaiveDate, days: i64) -> VisibleWindow {
    let start = time::date_to_ms(start);
    VisibleWindow::new(start, start + days * DAY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Group, Item};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// 30 days over 300 px: one pixel is a tenth of a day
    fn controller() -> InteractionController {
        InteractionController::new(&PlanningConfig::default(), window_from(date(2024, 1, 1), 30), 300.0)
    }

    fn state() -> PlanningState {
        let lot = Group::new_lot("lot-1".into(), "Gros œuvre".into(), "#1".into());
        let row = Group::new_task("t1", "Fondations".into(), &lot);
        let (start, end) = time::day_span(date(2024, 1, 1), date(2024, 1, 10));
        let mut state = PlanningState::default();
        state.items.push(Item::new_header("lot-1", "Gros œuvre".into(), start, end, "#1".into()));
        state.items.push(Item::new_task("t1".into(), row.id.clone(), "Fondations".into(), start, end, 0, "#1".into()));
        state.groups = vec![lot, row];
        state
    }

    fn drag(controller: &mut InteractionController, target: PointerTarget, dx: f64) -> GestureOutcome {
        let state = state();
        assert_eq!(controller.pointer_down(target, Point::new(100.0, 10.0), &state), GestureOutcome::None);
        controller.pointer_move(Point::new(100.0 + dx / 2.0, 10.0));
        controller.pointer_move(Point::new(100.0 + dx, 10.0));
        controller.pointer_up(Point::new(100.0 + dx, 10.0), true)
    }

    #[test]
    fn test_three_day_drag_preserves_duration() {
        let mut c = controller();
        let outcome = drag(&mut c, PointerTarget::Item("t1".into()), 30.0);
        let (id, start, end) = outcome.committed_span().unwrap();
        assert_eq!(id, "t1");
        assert_eq!(start, time::date_to_ms(date(2024, 1, 4)));
        assert_eq!(end, time::end_of_day(time::date_to_ms(date(2024, 1, 13))));
        assert_eq!(end - start, 10 * DAY_MS - 1);
    }

    #[test]
    fn test_partial_day_drag_snaps_to_nearest() {
        let mut c = controller();
        // 3.4 days rounds down, 3.6 days rounds up
        let outcome = drag(&mut c, PointerTarget::Item("t1".into()), 34.0);
        let (_, start, end) = outcome.committed_span().unwrap();
        assert_eq!(start, time::date_to_ms(date(2024, 1, 4)));
        assert_eq!(start, time::start_of_day(start));
        assert_eq!(end, time::end_of_day(end));

        let outcome = drag(&mut c, PointerTarget::Item("t1".into()), -36.0);
        let (_, start, _) = outcome.committed_span().unwrap();
        assert_eq!(start, time::date_to_ms(date(2023, 12, 28)));
    }

    #[test]
    fn test_preview_while_dragging() {
        let mut c = controller();
        let state = state();
        c.pointer_down(PointerTarget::Item("t1".into()), Point::new(0.0, 0.0), &state);
        assert_eq!(c.cursor(), Cursor::Grab);
        c.pointer_move(Point::new(20.0, 0.0));
        assert_eq!(c.state(), GestureState::Dragging { item_id: "t1".into() });
        assert_eq!(c.cursor(), Cursor::Grabbing);
        assert_eq!(c.preview().unwrap().start_time, time::date_to_ms(date(2024, 1, 3)));

        assert_eq!(c.cancel(), GestureOutcome::Cancelled);
        assert!(c.preview().is_none());
        assert_eq!(c.state(), GestureState::Idle);
    }

    #[test]
    fn test_click_below_threshold() {
        let mut c = controller();
        let state = state();
        c.pointer_down(PointerTarget::Item("t1".into()), Point::new(0.0, 0.0), &state);
        c.pointer_move(Point::new(3.0, 0.0));
        assert_eq!(c.pointer_up(Point::new(3.0, 0.0), true), GestureOutcome::Clicked("t1".into()));
    }

    #[test]
    fn test_header_and_unknown_items_rejected() {
        let mut c = controller();
        let state = state();
        let outcome = c.pointer_down(PointerTarget::Item("lot-1-header".into()), Point::default(), &state);
        assert!(matches!(outcome, GestureOutcome::Rejected(_)));
        assert!(!c.is_active());
        let outcome = c.pointer_down(PointerTarget::ItemEdge("nope".into(), ResizeEdge::End), Point::default(), &state);
        assert!(matches!(outcome, GestureOutcome::Rejected(_)));
    }

    #[test]
    fn test_release_outside_target_cancels() {
        let mut c = controller();
        let state = state();
        c.pointer_down(PointerTarget::Item("t1".into()), Point::new(0.0, 0.0), &state);
        c.pointer_move(Point::new(50.0, 0.0));
        assert_eq!(c.pointer_up(Point::new(50.0, 0.0), false), GestureOutcome::Cancelled);
    }

    #[test]
    fn test_resize_end_edge() {
        let mut c = controller();
        let outcome = drag(&mut c, PointerTarget::ItemEdge("t1".into(), ResizeEdge::End), 20.0);
        match outcome {
            GestureOutcome::Resized { start_time, end_time, .. } => {
                assert_eq!(start_time, time::date_to_ms(date(2024, 1, 1)));
                assert_eq!(end_time, time::end_of_day(time::date_to_ms(date(2024, 1, 12))));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_resize_past_start_rejected() {
        let mut c = controller();
        let outcome = drag(&mut c, PointerTarget::ItemEdge("t1".into(), ResizeEdge::End), -120.0);
        assert!(matches!(outcome, GestureOutcome::Rejected(_)));

        let outcome = drag(&mut c, PointerTarget::ItemEdge("t1".into(), ResizeEdge::Start), 100.0);
        assert!(matches!(outcome, GestureOutcome::Rejected(_)));
    }

    #[test]
    fn test_pan_gesture_and_cancel() {
        let mut c = controller();
        let before = c.window();
        let outcome = drag(&mut c, PointerTarget::Background, 50.0);
        assert_eq!(outcome, GestureOutcome::Panned(c.window()));
        assert_eq!(c.window().start, before.start - 5 * DAY_MS);
        assert_eq!(c.window().duration(), before.duration());

        let state = state();
        let panned = c.window();
        c.pointer_down(PointerTarget::Background, Point::new(0.0, 0.0), &state);
        c.pointer_move(Point::new(-80.0, 0.0));
        assert_eq!(c.state(), GestureState::PanningView);
        assert_ne!(c.window(), panned);
        c.cancel();
        assert_eq!(c.window(), panned);
    }

    #[test]
    fn test_zoom_clamped_and_centred() {
        let mut c = controller();
        let mid = c.window().midpoint();

        c.zoom_in();
        assert_eq!(c.window().duration(), 30 * DAY_MS);
        for _ in 0..20 {
            c.zoom_out();
        }
        assert_eq!(c.window().duration(), 365 * DAY_MS);
        assert!((c.window().midpoint() - mid).abs() <= 1);

        c.zoom_to(60 * DAY_MS);
        assert_eq!(c.window().duration(), 60 * DAY_MS);
        assert!((c.window().midpoint() - mid).abs() <= 1);
    }

    #[test]
    fn test_pan_by_px() {
        let mut c = controller();
        let before = c.window();
        let after = c.pan_by_px(-10.0);
        assert_eq!(after.start, before.start + DAY_MS);
        assert_eq!(after.duration(), before.duration());
    }
}
