//! Sync orchestrator.
//!
//! Decides when to reconcile with the remote store and runs one
//! pull → merge → apply → push cycle at a time. Scheduling state is owned by
//! each [`SyncEngine`] instance:
//!
//! - `Idle` → `Scheduled` when a local mutation arms the debounce timer;
//! - `Idle`/`Scheduled` → `InFlight` when a cycle starts;
//! - `InFlight` → `PendingRetry` when another cycle is requested meanwhile;
//! - back to `Idle` (or `Scheduled`) when the cycle ends, with a delayed
//!   follow-up cycle if one was requested.
//!
//! The scheduler lock is never held across an await.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::checkpoint::SyncCheckpoint;
use super::transport::{SyncTarget, SyncTransport};
use crate::config::SyncConfig;
use crate::merge::merge_snapshots;
use crate::models::{Collection, Snapshot};
use crate::snapshot::build_sync_snapshot;
use crate::store::{EntityStore, MutationObserver};
use crate::timestamp::{format_iso, snapshot_stamp};

/// Callback run after every applied merge
pub type SyncListener = Arc<dyn Fn() + Send + Sync>;

/// Scheduling phase of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Scheduled,
    InFlight,
    PendingRetry,
}

/// What asked for a sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Debounce timer after local mutations
    Debounced,
    /// Periodic background poll
    Poll,
    /// Follow-up of a cycle requested while another was in flight
    Retry,
    /// Initial cycle after [`SyncEngine::start`]
    Startup,
    /// Explicit user request
    Manual,
}

impl SyncTrigger {
    /// Silent cycles log at debug level; manual ones are user-visible
    pub const fn is_silent(self) -> bool {
        !matches!(self, Self::Manual)
    }
}

/// Result of one [`SyncEngine::perform_sync`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No usable sync endpoint in the local settings
    NotConfigured,
    /// A cycle was already running; a follow-up was scheduled instead
    Coalesced,
    /// The cycle reconciled and, if needed, pushed
    Completed {
        pushed: bool,
        remote_present: bool,
        stamp: i64,
    },
    /// Merged state was applied locally but the push failed
    PushFailed { stamp: i64, error: String },
}

/// Point-in-time view of the engine for hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub dirty: bool,
    pub checkpoint: i64,
}

/// Remote state as seen by one cycle
enum RemoteState {
    /// Fetch failed or the payload was unusable
    Absent,
    Present(Snapshot),
}

impl RemoteState {
    fn has_data(&self) -> bool {
        match self {
            Self::Absent => false,
            Self::Present(snapshot) => snapshot.has_data(),
        }
    }
}

struct Scheduler {
    phase: SyncPhase,
    dirty: bool,
    /// Bumped on every local mutation; lets a cycle tell whether writes
    /// landed while its push was in flight.
    mutation_seq: u64,
    timer: Option<JoinHandle<()>>,
    timer_generation: u64,
    poll: Option<JoinHandle<()>>,
}

impl Scheduler {
    const fn new() -> Self {
        Self {
            phase: SyncPhase::Idle,
            dirty: false,
            mutation_seq: 0,
            timer: None,
            timer_generation: 0,
            poll: None,
        }
    }

    fn resting_phase(&self) -> SyncPhase {
        if self.timer.is_some() {
            SyncPhase::Scheduled
        } else {
            SyncPhase::Idle
        }
    }
}

/// Offline-first sync orchestrator over an [`EntityStore`]
pub struct SyncEngine<T: SyncTransport + 'static> {
    inner: Arc<EngineInner<T>>,
}

impl<T: SyncTransport + 'static> Clone for SyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<T> {
    self_ref: Weak<Self>,
    store: Arc<EntityStore>,
    transport: T,
    checkpoint: SyncCheckpoint,
    config: SyncConfig,
    scheduler: Mutex<Scheduler>,
    listeners: Mutex<Vec<SyncListener>>,
}

impl<T: SyncTransport + 'static> SyncEngine<T> {
    /// Create an engine and subscribe it to the store's local mutations.
    pub fn new(
        store: Arc<EntityStore>,
        transport: T,
        checkpoint: SyncCheckpoint,
        config: SyncConfig,
    ) -> Self {
        let inner = Arc::new_cyclic(|self_ref| EngineInner {
            self_ref: self_ref.clone(),
            store,
            transport,
            checkpoint,
            config,
            scheduler: Mutex::new(Scheduler::new()),
            listeners: Mutex::new(Vec::new()),
        });
        inner
            .store
            .observe(Arc::downgrade(&inner) as Weak<dyn MutationObserver>);
        Self { inner }
    }

    /// Start background behavior: mark dirty when local data is ahead of the
    /// checkpoint, begin periodic polling and optionally schedule a first
    /// silent cycle. Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.inner.mark_dirty_if_ahead();
        self.inner.start_polling();
        if self.inner.config.sync_on_start {
            let mut scheduler = self.inner.lock_scheduler();
            self.inner
                .arm_timer(&mut scheduler, self.inner.config.debounce(), SyncTrigger::Startup);
        }
    }

    /// Compare local state against the checkpoint and set the dirty flag if
    /// local data is strictly newer. Returns whether the flag was set.
    ///
    /// Does nothing without a configured sync endpoint.
    pub fn mark_dirty_if_ahead(&self) -> bool {
        self.inner.mark_dirty_if_ahead()
    }

    /// Run one sync cycle now, or coalesce into the one in flight.
    pub async fn perform_sync(&self, trigger: SyncTrigger) -> SyncOutcome {
        self.inner.perform_sync(trigger).await
    }

    /// Record a local mutation and (re)arm the debounce timer.
    ///
    /// The store calls this automatically for writes made through it.
    pub fn notify_local_change(&self, collection: Collection) {
        self.inner.on_local_mutation(collection);
    }

    /// Register a callback invoked after each applied merge, in registration
    /// order. A panicking listener is logged and skipped.
    pub fn register_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    pub fn status(&self) -> SyncStatus {
        let scheduler = self.inner.lock_scheduler();
        SyncStatus {
            phase: scheduler.phase,
            dirty: scheduler.dirty,
            checkpoint: self.inner.checkpoint.get(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock_scheduler().dirty
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.inner.store
    }

    /// Cancel the debounce timer and the poll task. A cycle already in flight
    /// runs to completion.
    pub fn shutdown(&self) {
        let mut scheduler = self.inner.lock_scheduler();
        if let Some(timer) = scheduler.timer.take() {
            timer.abort();
        }
        if let Some(poll) = scheduler.poll.take() {
            poll.abort();
        }
        if scheduler.phase == SyncPhase::Scheduled {
            scheduler.phase = SyncPhase::Idle;
        }
    }
}

impl<T: SyncTransport + 'static> EngineInner<T> {
    fn lock_scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn target(&self) -> Option<SyncTarget> {
        SyncTarget::from_settings(self.store.settings().as_ref())
    }

    fn mark_dirty_if_ahead(&self) -> bool {
        if self.target().is_none() {
            return false;
        }
        let local_stamp = build_sync_snapshot(self.store.as_ref()).stamp();
        let checkpoint = self.checkpoint.get();
        if local_stamp <= checkpoint {
            return false;
        }
        tracing::info!(
            "Local data ({}) is ahead of the last sync checkpoint ({}); marking dirty",
            format_iso(local_stamp),
            format_iso(checkpoint)
        );
        self.lock_scheduler().dirty = true;
        true
    }

    fn start_polling(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime available; background sync polling disabled");
            return;
        };
        let period = self.config.poll_interval();
        let weak = self.self_ref.clone();
        let poll = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await; // skip immediate tick
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.perform_sync(SyncTrigger::Poll).await;
            }
        });

        let mut scheduler = self.lock_scheduler();
        if let Some(previous) = scheduler.poll.replace(poll) {
            previous.abort();
        }
    }

    /// Replace any armed timer with one firing `trigger` after `delay`.
    fn arm_timer(&self, scheduler: &mut Scheduler, delay: Duration, trigger: SyncTrigger) {
        if let Some(timer) = scheduler.timer.take() {
            timer.abort();
        }
        scheduler.timer_generation += 1;
        let generation = scheduler.timer_generation;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime available; sync deferred to the next poll");
            return;
        };
        let weak = self.self_ref.clone();
        scheduler.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire_timer(generation, trigger);
            }
        }));
        if scheduler.phase == SyncPhase::Idle {
            scheduler.phase = SyncPhase::Scheduled;
        }
    }

    /// Runs without awaiting, so aborting a timer can never cut a cycle short:
    /// the cycle itself runs in its own task.
    fn fire_timer(self: Arc<Self>, generation: u64, trigger: SyncTrigger) {
        {
            let mut scheduler = self.lock_scheduler();
            if scheduler.timer_generation != generation {
                return;
            }
            scheduler.timer = None;
        }
        tokio::spawn(async move {
            self.perform_sync(trigger).await;
        });
    }

    async fn perform_sync(&self, trigger: SyncTrigger) -> SyncOutcome {
        let Some(target) = self.target() else {
            let mut scheduler = self.lock_scheduler();
            if scheduler.phase == SyncPhase::Scheduled {
                scheduler.phase = scheduler.resting_phase();
            }
            if !trigger.is_silent() {
                tracing::info!("Sync skipped: no sync endpoint configured");
            }
            return SyncOutcome::NotConfigured;
        };

        {
            let mut scheduler = self.lock_scheduler();
            match scheduler.phase {
                SyncPhase::InFlight | SyncPhase::PendingRetry => {
                    scheduler.phase = SyncPhase::PendingRetry;
                    tracing::debug!("Sync already in flight; follow-up scheduled ({trigger:?})");
                    return SyncOutcome::Coalesced;
                }
                SyncPhase::Idle | SyncPhase::Scheduled => {
                    if let Some(timer) = scheduler.timer.take() {
                        timer.abort();
                    }
                    scheduler.phase = SyncPhase::InFlight;
                }
            }
        }

        let remote = match self.transport.fetch(&target).await {
            Ok(snapshot) => RemoteState::Present(snapshot),
            Err(error) => {
                if trigger.is_silent() {
                    tracing::debug!("Remote snapshot unavailable, treating as absent: {error}");
                } else {
                    tracing::warn!("Remote snapshot unavailable, treating as absent: {error}");
                }
                RemoteState::Absent
            }
        };

        // Local state is read after the fetch and replaced in the same step,
        // so writes made while the GET was pending are part of the merge.
        // The mutation sequence is captured under the same store lock: any
        // write missing from `merged` notifies after it and keeps `dirty` set.
        let mut local_has_data = false;
        let mut captured = (false, 0);
        let merged = self.store.reconcile_without_triggering_sync(|current| {
            captured = {
                let scheduler = self.lock_scheduler();
                (scheduler.dirty, scheduler.mutation_seq)
            };
            let local = Snapshot::stamped_by_content(current.clone());
            local_has_data = local.has_data();
            match &remote {
                RemoteState::Present(remote) => merge_snapshots(&local, remote),
                RemoteState::Absent => merge_snapshots(&local, &Snapshot::default()),
            }
        });
        let (dirty, mutation_seq) = captured;
        self.notify_listeners();

        let stamp = snapshot_stamp(&merged.collections);
        let remote_present = matches!(remote, RemoteState::Present(_));
        let bootstrap = !remote.has_data() && local_has_data;
        let outcome = if dirty || bootstrap {
            match self.transport.push(&target, &merged).await {
                Ok(()) => {
                    self.checkpoint.set(stamp);
                    log_cycle(
                        trigger,
                        &format!("Sync pushed snapshot at {}", format_iso(stamp)),
                    );
                    SyncOutcome::Completed {
                        pushed: true,
                        remote_present,
                        stamp,
                    }
                }
                Err(error) => {
                    tracing::warn!("Sync push failed; local changes stay pending: {error}");
                    SyncOutcome::PushFailed {
                        stamp,
                        error: error.to_string(),
                    }
                }
            }
        } else {
            self.checkpoint.set(stamp);
            log_cycle(
                trigger,
                &format!("Sync up to date at {}", format_iso(stamp)),
            );
            SyncOutcome::Completed {
                pushed: false,
                remote_present,
                stamp,
            }
        };

        self.finish_cycle(&outcome, mutation_seq);
        outcome
    }

    fn finish_cycle(&self, outcome: &SyncOutcome, mutation_seq: u64) {
        let mut scheduler = self.lock_scheduler();
        let succeeded = matches!(outcome, SyncOutcome::Completed { .. });
        if succeeded && scheduler.mutation_seq == mutation_seq {
            scheduler.dirty = false;
        }

        let follow_up = scheduler.phase == SyncPhase::PendingRetry;
        scheduler.phase = SyncPhase::Idle;
        if follow_up {
            let delay = if succeeded {
                self.config.retry_after_success()
            } else {
                self.config.retry_after_failure()
            };
            self.arm_timer(&mut scheduler, delay, SyncTrigger::Retry);
        }
        scheduler.phase = scheduler.resting_phase();
    }

    fn notify_listeners(&self) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                tracing::error!("Sync listener panicked; continuing sync cycle");
            }
        }
    }
}

impl<T: SyncTransport + 'static> MutationObserver for EngineInner<T> {
    fn on_local_mutation(&self, collection: Collection) {
        let mut scheduler = self.lock_scheduler();
        scheduler.dirty = true;
        scheduler.mutation_seq += 1;
        tracing::debug!("Local {collection} changed; sync scheduled");
        self.arm_timer(&mut scheduler, self.config.debounce(), SyncTrigger::Debounced);
    }
}

fn log_cycle(trigger: SyncTrigger, message: &str) {
    if trigger.is_silent() {
        tracing::debug!("{message}");
    } else {
        tracing::info!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupStore;
    use crate::models::{Collections, Entity};
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::sync::transport::{TransportError, TransportResult};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::OnceLock;
    use tokio::sync::Notify;

    const ENDPOINT: &str = "https://sync.example.com/state";

    /// In-process remote. Optionally parks every fetch until released.
    #[derive(Default)]
    struct FakeRemote {
        snapshot: Mutex<Option<Snapshot>>,
        fail_fetch: bool,
        fail_push: bool,
        gate: Option<Arc<Notify>>,
        fetches: AtomicUsize,
        pushes: Mutex<Vec<Snapshot>>,
    }

    impl FakeRemote {
        fn with_snapshot(value: Value) -> Self {
            Self {
                snapshot: Mutex::new(Some(serde_json::from_value(value).unwrap())),
                ..Self::default()
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }

        fn push_count(&self) -> usize {
            self.pushes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SyncTransport for FakeRemote {
        async fn fetch(&self, _target: &SyncTarget) -> TransportResult<Snapshot> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail_fetch {
                return Err(TransportError::Api("HTTP 503".to_string()));
            }
            Ok(self.snapshot.lock().unwrap().clone().unwrap_or_default())
        }

        async fn push(&self, _target: &SyncTarget, snapshot: &Snapshot) -> TransportResult<()> {
            if self.fail_push {
                return Err(TransportError::Api("HTTP 500".to_string()));
            }
            self.pushes.lock().unwrap().push(snapshot.clone());
            *self.snapshot.lock().unwrap() = Some(snapshot.clone());
            Ok(())
        }
    }

    fn current(store: &EntityStore) -> Collections {
        crate::snapshot::SnapshotSource::collections(store)
    }

    fn entity(value: Value) -> Entity {
        Entity::from_value(value).unwrap()
    }

    fn configured_store(kv: Arc<dyn KeyValueStore>) -> Arc<EntityStore> {
        let store = EntityStore::open(kv.clone()).with_backup(BackupStore::new(kv, 5));
        store.apply_without_triggering_sync(Collections {
            settings: Some(entity(json!({"syncEndpoint": ENDPOINT, "syncKey": "k1"}))),
            ..Collections::default()
        });
        Arc::new(store)
    }

    fn engine(remote: Arc<FakeRemote>) -> (Arc<MemoryStore>, SyncEngine<Arc<FakeRemote>>) {
        let kv = Arc::new(MemoryStore::new());
        let store = configured_store(kv.clone());
        let engine = SyncEngine::new(
            store,
            remote,
            SyncCheckpoint::new(kv.clone()),
            SyncConfig::default(),
        );
        (kv, engine)
    }

    #[tokio::test]
    async fn not_configured_without_endpoint() {
        let kv = Arc::new(MemoryStore::new());
        let remote = Arc::new(FakeRemote::default());
        let engine = SyncEngine::new(
            Arc::new(EntityStore::open(kv.clone())),
            remote.clone(),
            SyncCheckpoint::new(kv),
            SyncConfig::default(),
        );

        assert_eq!(engine.perform_sync(SyncTrigger::Manual).await, SyncOutcome::NotConfigured);
        assert_eq!(remote.fetch_count(), 0);
        assert!(!engine.mark_dirty_if_ahead());
    }

    #[tokio::test]
    async fn fetch_failure_keeps_local_state_and_bootstraps_push() {
        let remote = Arc::new(FakeRemote {
            fail_fetch: true,
            ..FakeRemote::default()
        });
        let (_kv, engine) = engine(remote.clone());
        let products: Vec<Entity> = (1..=3)
            .map(|n| entity(json!({"id": format!("P{n}"), "updatedAt": n * 100})))
            .collect();
        engine
            .store()
            .apply_without_triggering_sync(Collections {
                products,
                ..current(engine.store())
            });
        let before = current(engine.store());

        let outcome = engine.perform_sync(SyncTrigger::Manual).await;

        assert_eq!(
            outcome,
            SyncOutcome::Completed {
                pushed: true,
                remote_present: false,
                stamp: 300
            }
        );
        assert_eq!(current(engine.store()), before);
        assert_eq!(remote.push_count(), 1);
        assert_eq!(remote.pushes.lock().unwrap()[0].collections, before);
        assert_eq!(engine.status().checkpoint, 300);
        assert_eq!(engine.status().phase, SyncPhase::Idle);
    }

    #[tokio::test]
    async fn clean_state_against_populated_remote_pulls_without_push() {
        let remote = Arc::new(FakeRemote::with_snapshot(json!({
            "orders": [{"code": "DH-1", "updatedAt": 200, "status": "PAID"}]
        })));
        let (_kv, engine) = engine(remote.clone());
        engine.store().apply_without_triggering_sync(Collections {
            orders: vec![entity(json!({"code": "DH-1", "updatedAt": 100, "status": "NEW"}))],
            ..current(engine.store())
        });

        let outcome = engine.perform_sync(SyncTrigger::Poll).await;

        assert_eq!(
            outcome,
            SyncOutcome::Completed {
                pushed: false,
                remote_present: true,
                stamp: 200
            }
        );
        assert_eq!(remote.push_count(), 0);
        let orders = engine.store().orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].str_field("status"), Some("PAID"));
        assert_eq!(engine.status().checkpoint, 200);
    }

    #[tokio::test]
    async fn dirty_state_is_pushed_and_cleared() {
        let remote = Arc::new(FakeRemote::with_snapshot(json!({
            "products": [{"id": "P9", "updatedAt": 50}]
        })));
        let (_kv, engine) = engine(remote.clone());
        engine
            .store()
            .set_products(vec![entity(json!({"id": "P1", "updatedAt": 80}))]);
        assert!(engine.is_dirty());

        let outcome = engine.perform_sync(SyncTrigger::Manual).await;

        assert!(matches!(outcome, SyncOutcome::Completed { pushed: true, .. }));
        assert!(!engine.is_dirty());
        let pushed = remote.pushes.lock().unwrap()[0].clone();
        assert_eq!(pushed.collections.products.len(), 2);
        // Credentials never travel from remote into local settings.
        assert_eq!(
            engine
                .store()
                .settings()
                .and_then(|s| s.str_field("syncEndpoint").map(str::to_string))
                .as_deref(),
            Some(ENDPOINT)
        );
        engine.shutdown();
    }

    #[tokio::test]
    async fn push_failure_keeps_dirty_and_checkpoint() {
        let remote = Arc::new(FakeRemote {
            fail_push: true,
            ..FakeRemote::with_snapshot(json!({"products": [{"id": "P9"}]}))
        });
        let (_kv, engine) = engine(remote.clone());
        engine.notify_local_change(Collection::Products);

        let outcome = engine.perform_sync(SyncTrigger::Manual).await;

        assert!(matches!(outcome, SyncOutcome::PushFailed { .. }));
        assert!(engine.is_dirty());
        assert_eq!(engine.status().checkpoint, 0);
        engine.shutdown();
    }

    #[tokio::test]
    async fn overlapping_requests_are_single_flight() {
        let gate = Arc::new(Notify::new());
        let remote = Arc::new(FakeRemote {
            gate: Some(gate.clone()),
            ..FakeRemote::default()
        });
        let (_kv, engine) = engine(remote.clone());
        engine.inner.lock_scheduler().dirty = true;

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.perform_sync(SyncTrigger::Manual).await }
        });
        while remote.fetch_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(engine.status().phase, SyncPhase::InFlight);

        let second = engine.perform_sync(SyncTrigger::Manual).await;
        assert_eq!(second, SyncOutcome::Coalesced);
        assert_eq!(engine.status().phase, SyncPhase::PendingRetry);

        gate.notify_one();
        let first = first.await.unwrap();
        assert!(matches!(first, SyncOutcome::Completed { pushed: true, .. }));
        assert_eq!(remote.fetch_count(), 1);
        assert_eq!(remote.push_count(), 1);
        // The coalesced request becomes a delayed follow-up, not a second call.
        assert_eq!(engine.status().phase, SyncPhase::Scheduled);
        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn coalesced_request_runs_after_success_backoff() {
        let gate = Arc::new(Notify::new());
        let remote = Arc::new(FakeRemote {
            gate: Some(gate.clone()),
            ..FakeRemote::default()
        });
        let (_kv, engine) = engine(remote.clone());

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.perform_sync(SyncTrigger::Manual).await }
        });
        while remote.fetch_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(engine.perform_sync(SyncTrigger::Manual).await, SyncOutcome::Coalesced);
        gate.notify_one();
        first.await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(remote.fetch_count(), 1);

        // Release the follow-up's fetch once it starts.
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(200)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(remote.fetch_count(), 2);
        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_mutations_collapse_into_one_debounced_cycle() {
        let remote = Arc::new(FakeRemote::default());
        let (_kv, engine) = engine(remote.clone());

        for n in 0..5 {
            engine
                .store()
                .set_products(vec![entity(json!({"id": "P1", "updatedAt": n}))]);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(engine.status().phase, SyncPhase::Scheduled);
        assert_eq!(remote.fetch_count(), 0);

        tokio::time::sleep(Duration::from_millis(800)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(remote.fetch_count(), 1);
        assert_eq!(remote.push_count(), 1);
        assert!(!engine.is_dirty());
        assert_eq!(engine.status().phase, SyncPhase::Idle);
    }

    #[tokio::test]
    async fn startup_marks_dirty_when_local_is_ahead_of_checkpoint() {
        let remote = Arc::new(FakeRemote::default());
        let (kv, engine) = engine(remote);
        SyncCheckpoint::new(kv).set(500);
        engine.store().apply_without_triggering_sync(Collections {
            orders: vec![entity(json!({"code": "DH-1", "updatedAt": 800}))],
            ..current(engine.store())
        });

        assert!(!engine.is_dirty());
        assert!(engine.mark_dirty_if_ahead());
        assert!(engine.is_dirty());
    }

    #[tokio::test]
    async fn startup_leaves_clean_state_when_checkpoint_is_current() {
        let remote = Arc::new(FakeRemote::default());
        let (kv, engine) = engine(remote);
        SyncCheckpoint::new(kv).set(800);
        engine.store().apply_without_triggering_sync(Collections {
            orders: vec![entity(json!({"code": "DH-1", "updatedAt": 800}))],
            ..current(engine.store())
        });

        assert!(!engine.mark_dirty_if_ahead());
        assert!(!engine.is_dirty());
    }

    #[tokio::test]
    async fn listeners_run_in_order_and_survive_panics() {
        let remote = Arc::new(FakeRemote::default());
        let (_kv, engine) = engine(remote);
        let calls = Arc::new(Mutex::new(Vec::new()));

        engine.register_listener({
            let calls = calls.clone();
            move || calls.lock().unwrap().push("first")
        });
        engine.register_listener(|| panic!("listener failure"));
        engine.register_listener({
            let calls = calls.clone();
            move || calls.lock().unwrap().push("third")
        });

        let outcome = engine.perform_sync(SyncTrigger::Manual).await;

        assert!(matches!(outcome, SyncOutcome::Completed { .. }));
        assert_eq!(*calls.lock().unwrap(), vec!["first", "third"]);
    }

    #[tokio::test]
    async fn applying_merge_does_not_mark_dirty() {
        let remote = Arc::new(FakeRemote::with_snapshot(json!({
            "products": [{"id": "P1", "updatedAt": 10}]
        })));
        let (_kv, engine) = engine(remote);

        engine.perform_sync(SyncTrigger::Poll).await;

        assert_eq!(engine.store().products().len(), 1);
        assert!(!engine.is_dirty());
        assert_eq!(engine.status().phase, SyncPhase::Idle);
    }

    #[tokio::test]
    async fn merged_state_is_backed_up() {
        let remote = Arc::new(FakeRemote::with_snapshot(json!({
            "customers": {"c1": {"name": "An", "updatedAt": 10}}
        })));
        let (_kv, engine) = engine(remote);

        engine.perform_sync(SyncTrigger::Poll).await;

        let backup = engine.store().backup().unwrap().latest().unwrap();
        assert!(backup.collections.customers.contains_key("c1"));
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    /// Makes one local product write right after the next backup write, i.e.
    /// just after a sync cycle applied its merge.
    #[derive(Default)]
    struct WriteAfterApply {
        inner: MemoryStore,
        store: OnceLock<Weak<EntityStore>>,
        armed: AtomicBool,
    }

    impl KeyValueStore for WriteAfterApply {
        fn get(&self, key: &str) -> crate::Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> crate::Result<()> {
            self.inner.set(key, value)?;
            if key == "shopsync.backup.latest" && self.armed.swap(false, Ordering::SeqCst) {
                if let Some(store) = self.store.get().and_then(Weak::upgrade) {
                    store.set_products(vec![entity(json!({"id": "P-new", "updatedAt": 999}))]);
                }
            }
            Ok(())
        }

        fn remove(&self, key: &str) -> crate::Result<()> {
            self.inner.remove(key)
        }
    }

    #[tokio::test]
    async fn write_right_after_apply_stays_pending_and_is_pushed_next() {
        let remote = Arc::new(FakeRemote::with_snapshot(json!({
            "products": [{"id": "P9", "updatedAt": 50}]
        })));
        let kv = Arc::new(WriteAfterApply::default());
        let store = configured_store(kv.clone());
        kv.store.set(Arc::downgrade(&store)).unwrap();
        let engine = SyncEngine::new(
            store,
            remote.clone(),
            SyncCheckpoint::new(kv.clone()),
            SyncConfig::default(),
        );
        kv.armed.store(true, Ordering::SeqCst);

        let outcome = engine.perform_sync(SyncTrigger::Poll).await;
        assert!(matches!(outcome, SyncOutcome::Completed { pushed: false, .. }));
        assert!(engine.is_dirty());

        let outcome = engine.perform_sync(SyncTrigger::Manual).await;
        assert!(matches!(outcome, SyncOutcome::Completed { pushed: true, .. }));
        let pushed = remote.pushes.lock().unwrap().last().cloned().unwrap();
        assert!(pushed
            .collections
            .products
            .iter()
            .any(|product| product.key("id").as_deref() == Some("P-new")));
        assert!(!engine.is_dirty());
        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn started_engine_polls_on_interval() {
        let remote = Arc::new(FakeRemote::default());
        let kv = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(
            configured_store(kv.clone()),
            remote.clone(),
            SyncCheckpoint::new(kv),
            SyncConfig {
                sync_on_start: false,
                ..SyncConfig::default()
            },
        );

        engine.start();
        tokio::time::sleep(Duration::from_secs(44)).await;
        settle().await;
        assert_eq!(remote.fetch_count(), 0);
        assert_eq!(engine.status().phase, SyncPhase::Idle);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(remote.fetch_count(), 1);

        tokio::time::sleep(Duration::from_secs(45)).await;
        settle().await;
        assert_eq!(remote.fetch_count(), 2);

        engine.shutdown();
        tokio::time::sleep(Duration::from_secs(90)).await;
        settle().await;
        assert_eq!(remote.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_schedules_one_startup_cycle() {
        let remote = Arc::new(FakeRemote::default());
        let (_kv, engine) = engine(remote.clone());

        engine.start();
        assert_eq!(engine.status().phase, SyncPhase::Scheduled);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        settle().await;
        assert_eq!(remote.fetch_count(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        settle().await;
        assert_eq!(remote.fetch_count(), 1);
        assert_eq!(engine.status().phase, SyncPhase::Idle);
        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn coalesced_request_after_failed_push_waits_failure_backoff() {
        let gate = Arc::new(Notify::new());
        let remote = Arc::new(FakeRemote {
            gate: Some(gate.clone()),
            fail_push: true,
            ..FakeRemote::default()
        });
        let (_kv, engine) = engine(remote.clone());

        let first = tokio::spawn({
            let engine = engine.clone();
            async move { engine.perform_sync(SyncTrigger::Manual).await }
        });
        while remote.fetch_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(engine.perform_sync(SyncTrigger::Manual).await, SyncOutcome::Coalesced);
        gate.notify_one();
        assert!(matches!(first.await.unwrap(), SyncOutcome::PushFailed { .. }));
        assert_eq!(engine.status().phase, SyncPhase::Scheduled);

        // Release the follow-up's fetch once it starts.
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(2_900)).await;
        settle().await;
        assert_eq!(remote.fetch_count(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(remote.fetch_count(), 2);
        engine.shutdown();
    }
}
