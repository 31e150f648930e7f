//! Persistence Adapter
//!
//! Saves and restores the planning under a project-scoped key of a
//! `KeyValueStore`. Writes to one key are serialized; auto-save is
//! debounced and held back while a `SuppressionGuard` is alive.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::domain::{DomainError, DomainResult, Group, Item, Marker};
use crate::repository::KeyValueStore;
use crate::store::{PlanningState, Snapshot};

/// Stored shape of a planning
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPlanning {
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub collapsed_lots: BTreeMap<String, bool>,
    #[serde(default)]
    pub custom_markers: Vec<Marker>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attachments: BTreeMap<String, String>,
    /// ms epoch of the write
    #[serde(default)]
    pub last_saved: i64,
}

impl PersistedPlanning {
    pub fn from_state(state: &PlanningState, last_saved: i64) -> Self {
        Self {
            groups: state.groups.clone(),
            items: state.items.clone(),
            collapsed_lots: state.collapsed.clone(),
            custom_markers: state.markers.clone(),
            attachments: state.attachments.clone(),
            last_saved,
        }
    }

    pub fn into_state(self) -> PlanningState {
        PlanningState {
            groups: self.groups,
            items: self.items,
            collapsed: self.collapsed_lots,
            markers: self.custom_markers,
            attachments: self.attachments,
        }
    }
}

pub fn encode(state: &PlanningState, last_saved: i64) -> DomainResult<String> {
    Ok(serde_json::to_string(&PersistedPlanning::from_state(state, last_saved))?)
}

pub fn decode(raw: &str) -> DomainResult<PlanningState> {
    let persisted: PersistedPlanning = serde_json::from_str(raw)?;
    Ok(persisted.into_state())
}

// ========================
// Status
// ========================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SaveStatus {
    #[default]
    Idle,
    /// A debounced save is waiting
    Pending,
    Saving,
    /// Written at `at`; `degraded` when attachments had to be left out
    Saved { at: i64, degraded: bool },
    Failed(String),
}

/// What a successful save wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveReport {
    pub bytes: usize,
    pub degraded: bool,
}

// ========================
// Suppression
// ========================

/// Flag that holds auto-save back during gestures and bulk rewrites
#[derive(Debug, Clone, Default)]
pub struct SaveSuppression {
    flag: Arc<AtomicBool>,
}

impl SaveSuppression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag until the returned guard is dropped.
    /// Not reentrant: fails with `Conflict` while another guard is alive.
    pub fn acquire(&self) -> DomainResult<SuppressionGuard> {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DomainError::Conflict("save suppression already held".into()))?;
        Ok(SuppressionGuard { flag: Arc::clone(&self.flag) })
    }

    pub fn is_suppressed(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Lowers the suppression flag on drop
#[derive(Debug)]
pub struct SuppressionGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for SuppressionGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ========================
// Adapter
// ========================

pub struct PersistenceAdapter {
    store: Arc<dyn KeyValueStore>,
    max_payload_bytes: usize,
    /// One lock per storage key
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    status: watch::Sender<SaveStatus>,
    suppression: SaveSuppression,
}

impl PersistenceAdapter {
    pub fn new(store: Arc<dyn KeyValueStore>, max_payload_bytes: usize) -> Self {
        let (status, _) = watch::channel(SaveStatus::Idle);
        Self {
            store,
            max_payload_bytes,
            locks: Mutex::new(HashMap::new()),
            status,
            suppression: SaveSuppression::new(),
        }
    }

    pub fn suppression(&self) -> &SaveSuppression {
        &self.suppression
    }

    /// Receiver of save status changes
    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> SaveStatus {
        self.status.borrow().clone()
    }

    fn set_status(&self, status: SaveStatus) {
        self.status.send_replace(status);
    }

    /// Run `work` while holding the lock of `key`. The lock entry is
    /// dropped from the map once nobody else waits on it.
    async fn with_key_lock<T, F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = Arc::clone(self.locks.lock().await.entry(key.to_string()).or_default());
        let out = {
            let _serialized = lock.lock().await;
            work().await
        };

        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks.get(key).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(key);
        }
        out
    }

    /// Write `state` under `key`. When the full payload is refused, a second
    /// attempt without attachments is made.
    pub async fn save(&self, key: &str, state: &PlanningState) -> DomainResult<SaveReport> {
        self.with_key_lock(key, || self.save_locked(key, state)).await
    }

    /// `save`, unless `still_wanted` turns false by the time the key is free
    async fn save_if<W>(&self, key: &str, state: &PlanningState, still_wanted: W) -> DomainResult<Option<SaveReport>>
    where
        W: Fn() -> bool,
    {
        let still_wanted = &still_wanted;
        self.with_key_lock(key, move || async move {
            if !still_wanted() {
                tracing::trace!(key, "superseded save skipped");
                return Ok(None);
            }
            self.save_locked(key, state).await.map(Some)
        })
        .await
    }

    async fn save_locked(&self, key: &str, state: &PlanningState) -> DomainResult<SaveReport> {
        self.set_status(SaveStatus::Saving);

        let now = chrono::Utc::now().timestamp_millis();
        let result = match self.write(key, state, now).await {
            Ok(bytes) => Ok(SaveReport { bytes, degraded: false }),
            Err(err @ (DomainError::QuotaExceeded(_) | DomainError::Serialization(_))) if !state.attachments.is_empty() => {
                tracing::warn!(key, error = %err, attachments = state.attachments.len(), "retrying save without attachments");
                let lean = PlanningState { attachments: BTreeMap::new(), ..state.clone() };
                self.write(key, &lean, now).await.map(|bytes| SaveReport { bytes, degraded: true })
            }
            Err(err) => Err(err),
        };

        match &result {
            Ok(report) => {
                tracing::debug!(key, bytes = report.bytes, degraded = report.degraded, "planning saved");
                self.set_status(SaveStatus::Saved { at: now, degraded: report.degraded });
            }
            Err(err) => {
                tracing::error!(key, error = %err, "planning save failed");
                self.set_status(SaveStatus::Failed(err.to_string()));
            }
        }
        result
    }

    async fn write(&self, key: &str, state: &PlanningState, now: i64) -> DomainResult<usize> {
        let payload = encode(state, now)?;
        if payload.len() > self.max_payload_bytes {
            return Err(DomainError::QuotaExceeded(format!(
                "payload of {} bytes exceeds {} bytes",
                payload.len(),
                self.max_payload_bytes
            )));
        }
        self.store.put(key, &payload).await?;
        Ok(payload.len())
    }

    /// Planning stored under `key`, if any
    pub async fn load(&self, key: &str) -> DomainResult<Option<PlanningState>> {
        let raw = self.with_key_lock(key, || self.store.get(key)).await?;
        raw.as_deref().map(decode).transpose()
    }

    pub async fn delete(&self, key: &str) -> DomainResult<bool> {
        self.with_key_lock(key, || self.store.delete(key)).await
    }

    /// Storage keys of all saved plannings under `prefix`
    pub async fn keys(&self, prefix: &str) -> DomainResult<Vec<String>> {
        self.store.keys(prefix).await
    }
}

// ========================
// Debounced auto-save
// ========================

/// Coalesces bursts of changes into one write after a quiet period
pub struct AutoSaver {
    adapter: Arc<PersistenceAdapter>,
    key: String,
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl AutoSaver {
    pub fn new(adapter: Arc<PersistenceAdapter>, key: impl Into<String>, delay: Duration) -> Self {
        Self {
            adapter,
            key: key.into(),
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Save `snapshot` once no newer schedule arrived for `delay`.
    /// While saving is suppressed the timer re-arms.
    /// Must be called within a tokio runtime.
    pub fn schedule(&self, snapshot: Snapshot) {
        let mine = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.adapter.set_status(SaveStatus::Pending);

        let adapter = Arc::clone(&self.adapter);
        let generation = Arc::clone(&self.generation);
        let key = self.key.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                if generation.load(Ordering::Acquire) != mine {
                    return;
                }
                if adapter.suppression().is_suppressed() {
                    tracing::trace!(key = %key, "auto-save held back");
                    continue;
                }
                // Errors are reported through the status channel
                let _ = adapter
                    .save_if(&key, &snapshot, || generation.load(Ordering::Acquire) == mine)
                    .await;
                return;
            }
        });
    }

    /// Drop any pending save and write `snapshot` now
    pub async fn flush(&self, snapshot: &PlanningState) -> DomainResult<SaveReport> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.adapter.save(&self.key, snapshot).await
    }

    /// Forget the pending save, if any
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MarkerKind;
    use crate::repository::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn sample() -> PlanningState {
        let lot = Group::new_lot("lot-1".into(), "Gros œuvre".into(), "#e57373".into());
        let row = Group::new_task("t1", "Fondations".into(), &lot);
        let mut state = PlanningState::default();
        state.items.push(Item::new_header("lot-1", "Gros œuvre".into(), 0, 86_399_999, "#e57373".into()));
        state.items.push(Item::new_task("t1".into(), row.id.clone(), "Fondations".into(), 0, 86_399_999, 30, "#e57373".into()));
        state.groups = vec![lot, row];
        state.collapsed.insert("lot-1".into(), true);
        state.markers.push(Marker { id: "m1".into(), date: 0, title: "Début".into(), kind: MarkerKind::Start, color: "#4caf50".into() });
        state
    }

    /// Counts writes
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl KeyValueStore for CountingStore {
        async fn get(&self, key: &str) -> DomainResult<Option<String>> {
            self.inner.get(key).await
        }
        async fn put(&self, key: &str, value: &str) -> DomainResult<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.inner.put(key, value).await
        }
        async fn delete(&self, key: &str) -> DomainResult<bool> {
            self.inner.delete(key).await
        }
        async fn keys(&self, prefix: &str) -> DomainResult<Vec<String>> {
            self.inner.keys(prefix).await
        }
    }

    /// Writes take `delay` and leave a begin/end trace
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
        trace: std::sync::Mutex<Vec<&'static str>>,
    }

    impl SlowStore {
        fn new(delay: Duration) -> Self {
            Self { inner: MemoryStore::new(), delay, trace: Default::default() }
        }

        fn trace(&self) -> Vec<&'static str> {
            self.trace.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl KeyValueStore for SlowStore {
        async fn get(&self, key: &str) -> DomainResult<Option<String>> {
            self.inner.get(key).await
        }
        async fn put(&self, key: &str, value: &str) -> DomainResult<()> {
            self.trace.lock().unwrap().push("begin");
            tokio::time::sleep(self.delay).await;
            let result = self.inner.put(key, value).await;
            self.trace.lock().unwrap().push("end");
            result
        }
        async fn delete(&self, key: &str) -> DomainResult<bool> {
            self.inner.delete(key).await
        }
        async fn keys(&self, prefix: &str) -> DomainResult<Vec<String>> {
            self.inner.keys(prefix).await
        }
    }

    #[test]
    fn test_payload_shape() {
        let json: serde_json::Value = serde_json::from_str(&encode(&sample(), 42).unwrap()).unwrap();
        assert!(json.get("collapsedLots").is_some());
        assert!(json.get("customMarkers").is_some());
        assert_eq!(json["lastSaved"], 42);
        assert_eq!(json["items"][1]["isHeader"], false);
        assert_eq!(json["groups"][1]["parentId"], "lot-1");
        assert!(json.get("attachments").is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let adapter = PersistenceAdapter::new(Arc::new(MemoryStore::new()), 1 << 20);
        let state = sample();

        adapter.save("planning_p1", &state).await.unwrap();
        let loaded = adapter.load("planning_p1").await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(adapter.load("planning_other").await.unwrap().is_none());
        assert!(matches!(adapter.status(), SaveStatus::Saved { degraded: false, .. }));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_error() {
        let store = Arc::new(MemoryStore::new());
        store.put("planning_p1", "{not json").await.unwrap();
        let adapter = PersistenceAdapter::new(store, 1 << 20);
        assert!(matches!(adapter.load("planning_p1").await, Err(DomainError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_degraded_save_drops_attachments() {
        let mut state = sample();
        let lean_size = encode(&state, 0).unwrap().len();
        state.attachments.insert("logo".into(), "x".repeat(4096));

        let adapter = PersistenceAdapter::new(Arc::new(MemoryStore::new().with_quota(lean_size + 64)), 1 << 20);
        let mut status = adapter.subscribe();

        let report = adapter.save("planning_p1", &state).await.unwrap();
        assert!(report.degraded);
        assert!(status.has_changed().unwrap());
        assert!(matches!(*status.borrow_and_update(), SaveStatus::Saved { degraded: true, .. }));

        let loaded = adapter.load("planning_p1").await.unwrap().unwrap();
        assert!(loaded.attachments.is_empty());
        assert_eq!(loaded.groups, state.groups);
    }

    #[tokio::test]
    async fn test_save_fails_when_lean_payload_too_large() {
        let adapter = PersistenceAdapter::new(Arc::new(MemoryStore::new()), 16);
        let err = adapter.save("planning_p1", &sample()).await.unwrap_err();
        assert!(matches!(err, DomainError::QuotaExceeded(_)));
        assert!(matches!(adapter.status(), SaveStatus::Failed(_)));
    }

    #[test]
    fn test_suppression_guard_is_scoped() {
        let suppression = SaveSuppression::new();
        {
            let _guard = suppression.acquire().unwrap();
            assert!(suppression.is_suppressed());
            assert!(matches!(suppression.acquire(), Err(DomainError::Conflict(_))));
        }
        assert!(!suppression.is_suppressed());
    }

    #[test]
    fn test_suppression_released_on_error_path() {
        fn failing(suppression: &SaveSuppression) -> DomainResult<()> {
            let _guard = suppression.acquire()?;
            Err(DomainError::Internal("boom".into()))
        }
        let suppression = SaveSuppression::new();
        assert!(failing(&suppression).is_err());
        assert!(!suppression.is_suppressed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_autosave_debounces_bursts() {
        let store = Arc::new(CountingStore::default());
        let adapter = Arc::new(PersistenceAdapter::new(store.clone(), 1 << 20));
        let saver = AutoSaver::new(adapter.clone(), "planning_p1", Duration::from_millis(1000));

        let mut state = sample();
        for progress in [10, 20, 30] {
            state.items[1].progress = progress;
            saver.schedule(Arc::new(state.clone()));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(adapter.status(), SaveStatus::Pending);
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
        let loaded = adapter.load("planning_p1").await.unwrap().unwrap();
        assert_eq!(loaded.items[1].progress, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autosave_waits_for_suppression() {
        let store = Arc::new(CountingStore::default());
        let adapter = Arc::new(PersistenceAdapter::new(store.clone(), 1 << 20));
        let saver = AutoSaver::new(adapter.clone(), "planning_p1", Duration::from_millis(1000));

        let guard = adapter.suppression().acquire().unwrap();
        saver.schedule(Arc::new(sample()));
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);

        drop(guard);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_cancels_pending() {
        let store = Arc::new(CountingStore::default());
        let adapter = Arc::new(PersistenceAdapter::new(store.clone(), 1 << 20));
        let saver = AutoSaver::new(adapter.clone(), "planning_p1", Duration::from_millis(1000));

        saver.schedule(Arc::new(PlanningState::default()));
        saver.flush(&sample()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2000)).await;

        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.load("planning_p1").await.unwrap().unwrap(), sample());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_to_one_key_do_not_interleave() {
        let store = Arc::new(SlowStore::new(Duration::from_millis(200)));
        let adapter = Arc::new(PersistenceAdapter::new(store.clone(), 1 << 20));
        let saver = AutoSaver::new(adapter.clone(), "planning_p1", Duration::from_millis(1000));

        let mut later = sample();
        later.items[1].progress = 90;
        let first_plan = sample();
        let (first, second) = tokio::join!(adapter.save("planning_p1", &first_plan), saver.flush(&later));
        first.unwrap();
        second.unwrap();

        assert_eq!(store.trace(), vec!["begin", "end", "begin", "end"]);
        assert_eq!(adapter.load("planning_p1").await.unwrap().unwrap().items[1].progress, 90);
        assert!(adapter.locks.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_save_queued_behind_flush_is_dropped() {
        let store = Arc::new(SlowStore::new(Duration::from_millis(500)));
        let adapter = Arc::new(PersistenceAdapter::new(store.clone(), 1 << 20));
        let saver = AutoSaver::new(adapter.clone(), "planning_p1", Duration::from_millis(100));

        let busy = tokio::spawn({
            let adapter = adapter.clone();
            async move { adapter.save("planning_p1", &PlanningState::default()).await }
        });
        let mut stale = sample();
        stale.items[1].progress = 10;
        saver.schedule(Arc::new(stale));

        // The debounced write is now waiting for the key
        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut fresh = sample();
        fresh.items[1].progress = 80;
        saver.flush(&fresh).await.unwrap();
        busy.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(store.trace().len(), 4);
        assert_eq!(adapter.load("planning_p1").await.unwrap().unwrap().items[1].progress, 80);
    }
}
