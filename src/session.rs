//! Planning Session
//!
//! One open project: the model store, the interaction controller, the
//! synchronization engine and the auto-saver working together. Every
//! committed change schedules a debounced save and, when a task's dates
//! moved, notifies the task-update callback.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use pointer_dragdrop::Point;
use tokio::sync::watch;

use crate::aggregate;
use crate::config::PlanningConfig;
use crate::domain::{DomainError, DomainResult};
use crate::export::{self, ExportOptions, PrintDocument, RangeMode};
use crate::interaction::{self, GestureOutcome, InteractionController, PointerTarget, VisibleWindow};
use crate::persistence::{AutoSaver, PersistenceAdapter, SaveReport, SaveStatus, SuppressionGuard};
use crate::repair::StructuralReport;
use crate::store::{MarkerUpdate, ModelStore, NewMarker, NewTask, Snapshot, TaskUpdate};
use crate::sync::{self, SpecLot, SyncEngine};
use crate::time;
use crate::tree::{self, VisibleView};

/// Called with (task id, first day, last day) after a task was rescheduled
pub type TaskUpdateCallback = Box<dyn Fn(&str, NaiveDate, NaiveDate) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Pinned "today" (None = system clock)
    pub today: Option<NaiveDate>,
    pub viewport_width_px: f64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            today: None,
            viewport_width_px: 1200.0,
        }
    }
}

pub struct PlanningSession {
    project_id: String,
    store: ModelStore,
    controller: InteractionController,
    engine: SyncEngine,
    adapter: Arc<PersistenceAdapter>,
    saver: AutoSaver,
    /// Held from pointer-down until the gesture settles
    gesture_guard: Option<SuppressionGuard>,
    on_task_update: Option<TaskUpdateCallback>,
}

impl PlanningSession {
    /// Restore the saved planning of `project_id`, or start empty
    pub async fn open(
        project_id: &str,
        config: PlanningConfig,
        adapter: Arc<PersistenceAdapter>,
        options: SessionOptions,
    ) -> DomainResult<Self> {
        Self::open_with(project_id, config, adapter, options, None).await
    }

    /// Restore the saved planning of `project_id`, or build it from `lots`
    /// when nothing usable is saved. A saved planning is never overwritten.
    pub async fn open_or_sync(
        project_id: &str,
        config: PlanningConfig,
        adapter: Arc<PersistenceAdapter>,
        options: SessionOptions,
        lots: &[SpecLot],
    ) -> DomainResult<Self> {
        Self::open_with(project_id, config, adapter, options, Some(lots)).await
    }

    async fn open_with(
        project_id: &str,
        config: PlanningConfig,
        adapter: Arc<PersistenceAdapter>,
        options: SessionOptions,
        seed: Option<&[SpecLot]>,
    ) -> DomainResult<Self> {
        config.validate()?;
        let key = config.storage_key(project_id);
        let mut store = ModelStore::new(config.clone());
        if let Some(today) = options.today {
            store.set_today(today);
        }
        let engine = SyncEngine::new(config.clone());

        let restored = match adapter.load(&key).await {
            Ok(Some(state)) => {
                store.replace(state);
                tracing::info!(project = %project_id, "planning restored");
                true
            }
            Ok(None) => {
                tracing::info!(project = %project_id, "no saved planning");
                false
            }
            Err(DomainError::Serialization(e)) => {
                tracing::warn!(project = %project_id, error = %e, "saved planning is unreadable, starting empty");
                false
            }
            Err(e) => return Err(e),
        };
        let seeded = match seed {
            Some(lots) if !restored => {
                store.replace(engine.synchronize(lots, store.today()));
                tracing::info!(project = %project_id, lots = lots.len(), "planning built from lot feed");
                true
            }
            _ => false,
        };

        let snapshot = store.snapshot();
        let window = aggregate::schedule_extent(&snapshot)
            .map(|(start, end)| VisibleWindow::new(start, end))
            .unwrap_or_else(|| interaction::window_from(store.today(), config.default_lot_span_days));
        let controller = InteractionController::new(&config, window, options.viewport_width_px);
        let saver = AutoSaver::new(Arc::clone(&adapter), key, Duration::from_millis(config.autosave_debounce_ms));

        let session = Self {
            project_id: project_id.to_string(),
            store,
            controller,
            engine,
            adapter,
            saver,
            gesture_guard: None,
            on_task_update: None,
        };
        if seeded {
            session.saver.schedule(session.store.snapshot());
        }
        Ok(session)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn config(&self) -> &PlanningConfig {
        self.store.config()
    }

    pub fn set_task_update_callback(&mut self, callback: TaskUpdateCallback) {
        self.on_task_update = Some(callback);
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SaveStatus> {
        self.adapter.subscribe()
    }

    pub fn visible_view(&self) -> VisibleView {
        tree::visible_view(&self.snapshot())
    }

    fn committed(&self, snapshot: Snapshot) -> Snapshot {
        self.saver.schedule(Arc::clone(&snapshot));
        snapshot
    }

    fn notify_task(&self, task_id: &str) {
        let (Some(callback), Some(item)) = (&self.on_task_update, self.store.snapshot().task_item(task_id).cloned()) else {
            return;
        };
        callback(task_id, time::ms_to_date(item.start_time), time::ms_to_date(item.end_time));
    }

    fn ensure_no_gesture(&self, operation: &str) -> DomainResult<()> {
        if self.controller.is_active() {
            return Err(DomainError::Conflict(format!("{} while a gesture is in progress", operation)));
        }
        Ok(())
    }

    // ========================
    // Synchronization and repair
    // ========================

    /// Rebuild lots and tasks from the lot feed
    pub fn resync(&mut self, lots: &[SpecLot]) -> DomainResult<Snapshot> {
        self.ensure_no_gesture("re-synchronization")?;
        let snapshot = {
            let _guard = self.adapter.suppression().acquire()?;
            let previous = self.store.snapshot();
            let fresh = self.engine.synchronize_with(lots, self.store.today(), Some(&previous));
            self.store.replace(sync::carry_over(&previous, fresh))
        };
        tracing::info!(project = %self.project_id, lots = lots.len(), "planning re-synchronized");
        Ok(self.committed(snapshot))
    }

    /// `resync` from a raw upstream document
    pub fn resync_from_json(&mut self, feed: &serde_json::Value) -> DomainResult<Snapshot> {
        let lots = sync::normalize_feed(feed);
        self.resync(&lots)
    }

    pub fn structural_repair(&mut self) -> DomainResult<(StructuralReport, Snapshot)> {
        self.ensure_no_gesture("structural repair")?;
        let (report, snapshot) = {
            let _guard = self.adapter.suppression().acquire()?;
            let (rebuilt, report) = crate::repair::structural_repair(&self.store.snapshot(), self.store.config(), self.store.today());
            (report, self.store.replace(rebuilt))
        };
        Ok((report, self.committed(snapshot)))
    }

    // ========================
    // Gestures
    // ========================

    pub fn window(&self) -> VisibleWindow {
        self.controller.window()
    }

    pub fn controller(&self) -> &InteractionController {
        &self.controller
    }

    pub fn set_window(&mut self, window: VisibleWindow) {
        self.controller.set_window(window);
    }

    pub fn set_viewport_width(&mut self, width_px: f64) {
        self.controller.set_viewport_width(width_px);
    }

    pub fn zoom_in(&mut self) -> VisibleWindow {
        self.controller.zoom_in()
    }

    pub fn zoom_out(&mut self) -> VisibleWindow {
        self.controller.zoom_out()
    }

    pub fn zoom_to(&mut self, duration_ms: i64) -> VisibleWindow {
        self.controller.zoom_to(duration_ms)
    }

    pub fn pan_by_px(&mut self, dx: f64) -> VisibleWindow {
        self.controller.pan_by_px(dx)
    }

    /// Start a gesture; saving stays suppressed until it settles
    pub fn pointer_down(&mut self, target: PointerTarget, at: Point) -> DomainResult<GestureOutcome> {
        let snapshot = self.store.snapshot();
        let outcome = self.controller.pointer_down(target, at, &snapshot);
        if self.controller.is_active() && self.gesture_guard.is_none() {
            match self.adapter.suppression().acquire() {
                Ok(guard) => self.gesture_guard = Some(guard),
                Err(e) => {
                    self.controller.cancel();
                    return Err(e);
                }
            }
        }
        Ok(outcome)
    }

    pub fn pointer_move(&mut self, at: Point) {
        self.controller.pointer_move(at);
    }

    /// Finish the gesture and commit a moved or resized span
    pub fn pointer_up(&mut self, at: Point, over_valid_target: bool) -> GestureOutcome {
        let outcome = self.controller.pointer_up(at, over_valid_target);
        let committed = match outcome.committed_span() {
            Some((item_id, start, end)) => match self.store.set_item_span(item_id, start, end) {
                Ok(snapshot) => Some((item_id.to_string(), snapshot)),
                Err(e) => {
                    tracing::debug!(item = %item_id, error = %e, "gesture rejected by the model");
                    self.gesture_guard = None;
                    return GestureOutcome::Rejected(e.to_string());
                }
            },
            None => None,
        };
        self.gesture_guard = None;

        if let Some((item_id, snapshot)) = committed {
            self.committed(snapshot);
            self.notify_task(&item_id);
        }
        outcome
    }

    /// Abort the gesture without touching the model
    pub fn cancel_gesture(&mut self) -> GestureOutcome {
        let outcome = self.controller.cancel();
        self.gesture_guard = None;
        outcome
    }

    // ========================
    // Edits
    // ========================

    pub fn add_lot(&mut self, name: &str) -> DomainResult<(String, Snapshot)> {
        let (id, snapshot) = self.store.add_lot(name)?;
        Ok((id, self.committed(snapshot)))
    }

    pub fn rename_lot(&mut self, lot_id: &str, name: &str) -> DomainResult<Snapshot> {
        let snapshot = self.store.rename_lot(lot_id, name)?;
        Ok(self.committed(snapshot))
    }

    pub fn recolor_lot(&mut self, lot_id: &str, color: &str) -> DomainResult<Snapshot> {
        let snapshot = self.store.recolor_lot(lot_id, color)?;
        Ok(self.committed(snapshot))
    }

    pub fn move_lot(&mut self, lot_id: &str, index: usize) -> DomainResult<Snapshot> {
        let snapshot = self.store.move_lot(lot_id, index)?;
        Ok(self.committed(snapshot))
    }

    pub fn delete_lot(&mut self, lot_id: &str) -> DomainResult<Snapshot> {
        let snapshot = self.store.delete_lot(lot_id)?;
        Ok(self.committed(snapshot))
    }

    pub fn toggle_collapse(&mut self, lot_id: &str) -> DomainResult<Snapshot> {
        let snapshot = self.store.toggle_collapse(lot_id)?;
        Ok(self.committed(snapshot))
    }

    pub fn add_task(&mut self, lot_id: &str, task: NewTask) -> DomainResult<(String, Snapshot)> {
        let (id, snapshot) = self.store.add_task(lot_id, task)?;
        let snapshot = self.committed(snapshot);
        self.notify_task(&id);
        Ok((id, snapshot))
    }

    pub fn update_task(&mut self, task_id: &str, update: TaskUpdate) -> DomainResult<Snapshot> {
        let rescheduled = update.start.is_some() || update.end.is_some();
        let snapshot = self.store.update_task(task_id, update)?;
        let snapshot = self.committed(snapshot);
        if rescheduled {
            self.notify_task(task_id);
        }
        Ok(snapshot)
    }

    pub fn move_task(&mut self, task_id: &str, index: usize) -> DomainResult<Snapshot> {
        let snapshot = self.store.move_task(task_id, index)?;
        Ok(self.committed(snapshot))
    }

    pub fn delete_task(&mut self, task_id: &str) -> DomainResult<Snapshot> {
        let snapshot = self.store.delete_task(task_id)?;
        Ok(self.committed(snapshot))
    }

    pub fn add_marker(&mut self, marker: NewMarker) -> DomainResult<(String, Snapshot)> {
        let (id, snapshot) = self.store.add_marker(marker)?;
        Ok((id, self.committed(snapshot)))
    }

    pub fn update_marker(&mut self, marker_id: &str, update: MarkerUpdate) -> DomainResult<Snapshot> {
        let snapshot = self.store.update_marker(marker_id, update)?;
        Ok(self.committed(snapshot))
    }

    pub fn delete_marker(&mut self, marker_id: &str) -> DomainResult<Snapshot> {
        let snapshot = self.store.delete_marker(marker_id)?;
        Ok(self.committed(snapshot))
    }

    pub fn set_attachment(&mut self, key: &str, data: String) -> DomainResult<Snapshot> {
        let snapshot = self.store.set_attachment(key, data)?;
        Ok(self.committed(snapshot))
    }

    pub fn remove_attachment(&mut self, key: &str) -> DomainResult<Snapshot> {
        let snapshot = self.store.remove_attachment(key)?;
        Ok(self.committed(snapshot))
    }

    pub fn repair_references(&mut self) -> DomainResult<Snapshot> {
        let (report, snapshot) = self.store.repair_references()?;
        if !report.orphans.is_empty() {
            tracing::warn!(orphans = report.orphans.len(), "items without task rows remain");
        }
        Ok(self.committed(snapshot))
    }

    /// Drop the whole planning of this project
    pub fn reset(&mut self) -> DomainResult<Snapshot> {
        self.ensure_no_gesture("reset")?;
        let snapshot = self.store.reset();
        Ok(self.committed(snapshot))
    }

    // ========================
    // Export and persistence
    // ========================

    /// Print document of the current snapshot; a visible-range export
    /// without an explicit window uses the one on screen
    pub fn export(&self, options: &ExportOptions) -> DomainResult<PrintDocument> {
        let mut options = options.clone();
        if options.range == RangeMode::Visible && options.visible.is_none() {
            options.visible = Some(self.controller.window());
        }
        export::build_print_document(&self.snapshot(), &options)
    }

    /// Write the current snapshot now, dropping any pending auto-save
    pub async fn flush(&self) -> DomainResult<SaveReport> {
        self.saver.flush(&self.snapshot()).await
    }

    /// Remove the saved planning of this project
    pub async fn delete_saved(&self) -> DomainResult<bool> {
        self.saver.cancel();
        self.adapter.delete(self.saver.key()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task_group_id;
    use crate::interaction::ResizeEdge;
    use crate::repository::MemoryStore;
    use crate::sync::SpecTask;
    use crate::time::DAY_MS;
    use std::sync::Mutex;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn feed() -> Vec<SpecLot> {
        let task = |id: &str, start, end| SpecTask { id: Some(id.into()), name: id.to_uppercase(), start_date: Some(start), end_date: Some(end), progress: None };
        vec![
            SpecLot { id: "go".into(), name: "Gros œuvre".into(), tasks: vec![task("t1", date(2024, 1, 1), date(2024, 1, 10)), task("t2", date(2024, 1, 5), date(2024, 1, 20))] },
            SpecLot { id: "so".into(), name: "Second œuvre".into(), tasks: vec![task("t3", date(2024, 2, 1), date(2024, 2, 10))] },
        ]
    }

    async fn open(adapter: Arc<PersistenceAdapter>) -> PlanningSession {
        let options = SessionOptions { today: Some(date(2024, 1, 1)), viewport_width_px: 300.0 };
        PlanningSession::open("p1", PlanningConfig::default(), adapter, options).await.unwrap()
    }

    fn adapter() -> Arc<PersistenceAdapter> {
        Arc::new(PersistenceAdapter::new(Arc::new(MemoryStore::new()), 1 << 20))
    }

    #[tokio::test]
    async fn test_deleted_lot_leaves_no_reference_in_saved_state() {
        let adapter = adapter();
        let mut session = open(adapter.clone()).await;
        session.resync(&feed()).unwrap();
        session.toggle_collapse("lot-go").unwrap();

        session.delete_lot("lot-go").unwrap();
        session.flush().await.unwrap();

        let saved = adapter.load("planning_p1").await.unwrap().unwrap();
        assert!(saved.groups.iter().all(|g| g.id != "lot-go" && g.parent_id.as_deref() != Some("lot-go")));
        assert!(saved.items.iter().all(|i| i.group != "lot-go" && i.id != "t1" && i.id != "t2"));
        assert!(!saved.collapsed.contains_key("lot-go"));
        assert_eq!(saved.group("lot-so").unwrap().title, "1. Second œuvre");
    }

    #[tokio::test]
    async fn test_open_or_sync_builds_only_missing_plannings() {
        let adapter = adapter();
        let options = SessionOptions { today: Some(date(2024, 1, 1)), viewport_width_px: 300.0 };

        let session = PlanningSession::open_or_sync("p1", PlanningConfig::default(), adapter.clone(), options.clone(), &feed())
            .await
            .unwrap();
        assert_eq!(session.snapshot().lots().count(), 2);
        assert_eq!(session.window().start, time::date_to_ms(date(2024, 1, 1)));
        session.flush().await.unwrap();

        let mut trimmed = feed();
        trimmed.truncate(1);
        let reopened = PlanningSession::open_or_sync("p1", PlanningConfig::default(), adapter.clone(), options, &trimmed)
            .await
            .unwrap();
        assert_eq!(reopened.snapshot().lots().count(), 2);
        assert!(reopened.snapshot().task_item("t3").is_some());
    }

    #[tokio::test]
    async fn test_three_day_drag_moves_task_and_header() {
        let mut session = open(adapter()).await;
        session.resync(&feed()).unwrap();
        session.set_window(interaction::window_from(date(2024, 1, 1), 30));

        let calls: Arc<Mutex<Vec<(String, NaiveDate, NaiveDate)>>> = Arc::default();
        let sink = Arc::clone(&calls);
        session.set_task_update_callback(Box::new(move |id, start, end| {
            sink.lock().unwrap().push((id.to_string(), start, end));
        }));

        session.pointer_down(PointerTarget::Item("t1".into()), Point::new(50.0, 0.0)).unwrap();
        session.pointer_move(Point::new(65.0, 0.0));
        session.pointer_move(Point::new(80.0, 0.0));
        let outcome = session.pointer_up(Point::new(80.0, 0.0), true);
        assert!(matches!(outcome, GestureOutcome::Moved { .. }));

        let snap = session.snapshot();
        let t1 = snap.task_item("t1").unwrap();
        assert_eq!(time::ms_to_date(t1.start_time), date(2024, 1, 4));
        assert_eq!(time::ms_to_date(t1.end_time), date(2024, 1, 13));
        assert_eq!(t1.end_time - t1.start_time, 10 * DAY_MS - 1);

        // Header follows the tasks exactly
        let header = snap.header_of("lot-go").unwrap();
        assert_eq!(header.start_time, t1.start_time);
        assert_eq!(time::ms_to_date(header.end_time), date(2024, 1, 20));

        assert_eq!(calls.lock().unwrap().as_slice(), &[("t1".to_string(), date(2024, 1, 4), date(2024, 1, 13))]);
    }

    #[tokio::test]
    async fn test_gesture_holds_suppression_and_blocks_resync() {
        let adapter = adapter();
        let mut session = open(adapter.clone()).await;
        session.resync(&feed()).unwrap();

        session.pointer_down(PointerTarget::Item("t3".into()), Point::new(0.0, 0.0)).unwrap();
        assert!(adapter.suppression().is_suppressed());
        assert!(matches!(session.resync(&feed()), Err(DomainError::Conflict(_))));
        assert!(matches!(session.structural_repair(), Err(DomainError::Conflict(_))));

        assert_eq!(session.cancel_gesture(), GestureOutcome::Cancelled);
        assert!(!adapter.suppression().is_suppressed());
        assert!(session.resync(&feed()).is_ok());
    }

    #[tokio::test]
    async fn test_rejected_resize_keeps_model() {
        let mut session = open(adapter()).await;
        session.resync(&feed()).unwrap();
        session.set_window(interaction::window_from(date(2024, 1, 1), 30));
        let before = session.snapshot();

        session.pointer_down(PointerTarget::ItemEdge("t1".into(), ResizeEdge::End), Point::new(100.0, 0.0)).unwrap();
        session.pointer_move(Point::new(-100.0, 0.0));
        let outcome = session.pointer_up(Point::new(-100.0, 0.0), true);

        assert!(matches!(outcome, GestureOutcome::Rejected(_)));
        assert!(Arc::ptr_eq(&before, &session.snapshot()));
    }

    #[tokio::test]
    async fn test_drop_outside_target_changes_nothing() {
        let adapter = adapter();
        let mut session = open(adapter.clone()).await;
        session.resync(&feed()).unwrap();
        let before = session.snapshot();

        session.pointer_down(PointerTarget::Item("t1".into()), Point::new(0.0, 0.0)).unwrap();
        session.pointer_move(Point::new(90.0, 0.0));
        assert_eq!(session.pointer_up(Point::new(90.0, 0.0), false), GestureOutcome::Cancelled);
        assert!(Arc::ptr_eq(&before, &session.snapshot()));
        assert!(!adapter.suppression().is_suppressed());
    }

    #[tokio::test]
    async fn test_reopen_restores_saved_planning() {
        let adapter = adapter();
        let mut session = open(adapter.clone()).await;
        session.resync(&feed()).unwrap();
        session
            .add_marker(NewMarker { date: date(2024, 1, 15), title: "Réception".into(), kind: crate::domain::MarkerKind::End, color: None })
            .unwrap();
        session.flush().await.unwrap();
        let saved = session.snapshot();

        let reopened = open(adapter.clone()).await;
        assert_eq!(*reopened.snapshot(), *saved);
        // Window opens on the whole schedule
        assert_eq!(reopened.window().start, time::date_to_ms(date(2024, 1, 1)));
    }

    #[tokio::test]
    async fn test_resync_keeps_markers_and_edits_callback() {
        let mut session = open(adapter()).await;
        session.resync(&feed()).unwrap();
        session
            .add_marker(NewMarker { date: date(2024, 1, 2), title: "Ouverture".into(), kind: crate::domain::MarkerKind::Start, color: None })
            .unwrap();

        let calls: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&calls);
        session.set_task_update_callback(Box::new(move |id, _, _| sink.lock().unwrap().push(id.to_string())));

        session.update_task("t3", TaskUpdate { progress: Some(40), ..Default::default() }).unwrap();
        session.update_task("t3", TaskUpdate { end: Some(date(2024, 2, 12)), ..Default::default() }).unwrap();
        assert_eq!(calls.lock().unwrap().as_slice(), &["t3".to_string()]);

        let snap = session.resync(&feed()).unwrap();
        assert_eq!(snap.markers.len(), 1);
        assert_eq!(snap.group(&task_group_id("t3")).unwrap().title, "2.1 T3");
    }

    #[tokio::test]
    async fn test_export_uses_visible_window() {
        let mut session = open(adapter()).await;
        session.resync(&feed()).unwrap();
        session.set_window(interaction::window_from(date(2024, 1, 1), 30));

        let doc = session.export(&ExportOptions { range: RangeMode::Visible, ..Default::default() }).unwrap();
        assert_eq!((doc.range_start, doc.range_end), (date(2024, 1, 1), date(2024, 1, 30)));
        assert_eq!(doc.day_count, 30);
    }
}
