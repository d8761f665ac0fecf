//! End-to-end scenarios for the offline queue + sync engine, driven
//! through `SyncContext` with in-memory fakes at every capability
//! boundary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use ringside_sync::{
    ConnectivitySource, ExitBlockReason, MutationKind, MutationStatus, MemoryStore,
    MutationSender, NetworkChange, NetworkInfo, OfflineQueue, QueueStore, SendError,
    SqliteStore, SyncConfig, SyncContext, SyncManager, SyncStatus,
};

// ============================================================================
// Helpers
// ============================================================================

/// Manually switchable connectivity source.
struct ManualConnectivity {
    info: Mutex<NetworkInfo>,
}

impl ManualConnectivity {
    fn new(is_online: bool) -> Arc<Self> {
        Arc::new(Self {
            info: Mutex::new(NetworkInfo::basic(is_online)),
        })
    }

    fn set_online(&self, is_online: bool) {
        self.info.lock().unwrap().is_online = is_online;
    }
}

impl ConnectivitySource for ManualConnectivity {
    fn sample(&self) -> NetworkInfo {
        *self.info.lock().unwrap()
    }
}

/// Sender with a settable outcome and a call counter.
struct FakeSender {
    outcome: Mutex<Result<(), SendError>>,
    calls: AtomicUsize,
}

impl FakeSender {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(Ok(())),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(error: SendError) -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(Err(error)),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MutationSender for FakeSender {
    async fn send(&self, _kind: MutationKind, _payload: &Value) -> Result<(), SendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.lock().unwrap().clone()
    }
}

/// Sender that never responds; every attempt times out.
struct StalledSender;

#[async_trait]
impl MutationSender for StalledSender {
    async fn send(&self, _kind: MutationKind, _payload: &Value) -> Result<(), SendError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

fn test_config() -> SyncConfig {
    SyncConfig {
        max_concurrency: 4,
        max_retries: 2,
        base_backoff_ms: 0,
        max_backoff_ms: 0,
        sync_interval_ms: 30_000,
        send_timeout_ms: 500,
        network_debounce_ms: 200,
    }
}

fn init_context(
    config: SyncConfig,
    store: Arc<dyn QueueStore>,
    connectivity: Arc<dyn ConnectivitySource>,
    sender: Arc<dyn MutationSender>,
) -> Arc<SyncContext> {
    SyncContext::init(config, store, connectivity, sender).expect("context init")
}

fn score_payload(armband: u32) -> Value {
    serde_json::json!({"armband": armband, "class_id": "open-b", "score": 197.5})
}

/// Poll until `done` or the deadline passes (virtual time under paused
/// clocks, wall time otherwise).
async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached before deadline");
}

// ============================================================================
// Scenario 1: offline scoring, reconnect, automatic drain
// ============================================================================

#[tokio::test(start_paused = true)]
async fn offline_scores_drain_automatically_on_reconnect() {
    let connectivity = ManualConnectivity::new(false);
    let sender = FakeSender::ok();
    let ctx = init_context(
        test_config(),
        Arc::new(MemoryStore::new()),
        Arc::clone(&connectivity) as Arc<dyn ConnectivitySource>,
        Arc::clone(&sender) as Arc<dyn MutationSender>,
    );

    for armband in [4, 7, 12] {
        ctx.enqueue(MutationKind::ScoreSubmit, score_payload(armband))
            .unwrap();
    }
    assert_eq!(ctx.pending_count(), 3);
    assert_eq!(sender.calls(), 0, "nothing sent while offline");

    // Platform reports connectivity back; the debounced transition kicks
    // the scheduler, which drains the backlog.
    connectivity.set_online(true);
    ctx.network().report_change();

    wait_until(|| ctx.pending_count() == 0).await;
    wait_until(|| ctx.sync_state().status == SyncStatus::Idle).await;

    assert_eq!(sender.calls(), 3);
    assert!(ctx.sync_state().last_sync_time.is_some());
    ctx.dispose();
}

// ============================================================================
// Scenario 2: persistent timeouts exhaust retries
// ============================================================================

#[tokio::test(start_paused = true)]
async fn timeouts_exhaust_retries_and_surface_error() {
    let connectivity = ManualConnectivity::new(true);
    let ctx = init_context(
        test_config(), // max_retries: 2, zero backoff
        Arc::new(MemoryStore::new()),
        connectivity as Arc<dyn ConnectivitySource>,
        Arc::new(StalledSender),
    );

    let id = ctx
        .enqueue(MutationKind::ScoreSubmit, score_payload(3))
        .unwrap();

    // Each manual drain times the send out and burns one retry.
    ctx.manual_sync().await;
    ctx.manual_sync().await;
    let state = ctx.manual_sync().await;

    let item = ctx.queue().get(&id).expect("item retained");
    assert_eq!(item.status, MutationStatus::Failed);
    assert_eq!(item.retry_count, 2);
    assert!(item.last_error.as_deref().unwrap_or("").contains("exceeded"));
    assert_eq!(ctx.failed_count(), 1);
    assert_eq!(state.status, SyncStatus::Error);
    ctx.dispose();
}

// ============================================================================
// Scenario 3: safe-exit around a pending score
// ============================================================================

#[tokio::test]
async fn exit_unblocks_once_scores_are_delivered() {
    let connectivity = ManualConnectivity::new(true);
    let sender = FakeSender::ok();
    let ctx = init_context(
        test_config(),
        Arc::new(MemoryStore::new()),
        connectivity as Arc<dyn ConnectivitySource>,
        Arc::clone(&sender) as Arc<dyn MutationSender>,
    );

    ctx.enqueue(MutationKind::ScoreSubmit, score_payload(21))
        .unwrap();

    let check = ctx.can_safely_exit();
    assert!(!check.allowed);
    assert_eq!(check.reason, Some(ExitBlockReason::PendingScores));
    assert!(ctx.force_exit().is_err(), "scores have no bypass");

    ctx.manual_sync().await;

    let check = ctx.can_safely_exit();
    assert!(check.allowed);
    assert!(check.reason.is_none());
    ctx.dispose();
}

#[tokio::test]
async fn offline_exit_is_a_bypassable_warning() {
    let connectivity = ManualConnectivity::new(false);
    let ctx = init_context(
        test_config(),
        Arc::new(MemoryStore::new()),
        connectivity as Arc<dyn ConnectivitySource>,
        FakeSender::ok() as Arc<dyn MutationSender>,
    );

    let check = ctx.can_safely_exit();
    assert!(!check.allowed);
    assert_eq!(check.reason, Some(ExitBlockReason::Offline));
    ctx.force_exit().expect("offline warning is bypassable");
    ctx.dispose();
}

// ============================================================================
// Scenario 4: connectivity flapping coalesces
// ============================================================================

#[tokio::test(start_paused = true)]
async fn rapid_flapping_produces_one_sync_trigger() {
    let connectivity = ManualConnectivity::new(false);
    let sender = FakeSender::ok();
    let ctx = init_context(
        test_config(), // 200ms debounce
        Arc::new(MemoryStore::new()),
        Arc::clone(&connectivity) as Arc<dyn ConnectivitySource>,
        Arc::clone(&sender) as Arc<dyn MutationSender>,
    );

    let transitions: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    let transitions_clone = Arc::clone(&transitions);
    let _unsub = ctx.network().subscribe(Arc::new(move |change: &NetworkChange| {
        transitions_clone
            .lock()
            .unwrap()
            .push(change.current.is_online);
    }));

    // 5 transitions within 200ms, ending online
    for i in 0..5 {
        connectivity.set_online(i % 2 == 0);
        ctx.network().report_change();
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    tokio::time::sleep(Duration::from_millis(600)).await;

    let seen = transitions.lock().unwrap().clone();
    assert_eq!(seen, vec![true], "five flaps, one coalesced notification");
    ctx.dispose();
}

// ============================================================================
// Restart: the queue survives a process boundary
// ============================================================================

#[tokio::test]
async fn queue_round_trips_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ringside.db");

    let before: Vec<String> = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let queue = OfflineQueue::new(store as Arc<dyn QueueStore>).unwrap();
        let a = queue
            .enqueue(MutationKind::ScoreSubmit, score_payload(5))
            .unwrap();
        let b = queue
            .enqueue(
                MutationKind::CheckInChange,
                serde_json::json!({"armband": 5, "status": "checked-in"}),
            )
            .unwrap();
        // One failed attempt before the "crash"
        queue.mark_syncing(&a).unwrap();
        queue.mark_failed(&a, "server error", false).unwrap();
        vec![a, b]
    };

    // "Restart": fresh store handle, fresh queue
    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let queue = OfflineQueue::new(store as Arc<dyn QueueStore>).unwrap();

    let reloaded = queue.snapshot();
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded[0].id, before[0]);
    assert_eq!(reloaded[1].id, before[1]);
    assert_eq!(reloaded[0].kind, MutationKind::ScoreSubmit);
    assert_eq!(reloaded[0].payload, score_payload(5));
    assert_eq!(reloaded[0].status, MutationStatus::Failed);
    assert_eq!(reloaded[0].retry_count, 1);
    assert_eq!(reloaded[1].status, MutationStatus::Pending);
    assert_eq!(reloaded[1].retry_count, 0);
}

#[tokio::test]
async fn in_flight_item_is_recovered_as_pending_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ringside.db");

    let id = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let queue = OfflineQueue::new(store as Arc<dyn QueueStore>).unwrap();
        let id = queue
            .enqueue(MutationKind::ScoreSubmit, score_payload(9))
            .unwrap();
        queue.mark_syncing(&id).unwrap();
        id // crash with the send in flight
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let queue = OfflineQueue::new(store as Arc<dyn QueueStore>).unwrap();
    let item = queue.get(&id).unwrap();
    assert_eq!(item.status, MutationStatus::Pending);
}

// ============================================================================
// Ordering: store commit order tracks enqueue order under load
// ============================================================================

#[tokio::test]
async fn commit_order_matches_enqueue_order_under_concurrent_drain() {
    use tokio::sync::Notify;

    struct GatedSender {
        release: Arc<Notify>,
        started: Arc<Notify>,
    }

    #[async_trait]
    impl MutationSender for GatedSender {
        async fn send(&self, _kind: MutationKind, _payload: &Value) -> Result<(), SendError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    let release = Arc::new(Notify::new());
    let started = Arc::new(Notify::new());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let queue = Arc::new(OfflineQueue::new(Arc::clone(&store) as Arc<dyn QueueStore>).unwrap());
    let manager = Arc::new(SyncManager::new(
        SyncConfig {
            max_concurrency: 1,
            ..test_config()
        },
        Arc::clone(&queue),
        Arc::new(GatedSender {
            release: Arc::clone(&release),
            started: Arc::clone(&started),
        }),
    ));

    let first = queue
        .enqueue(MutationKind::ScoreSubmit, score_payload(1))
        .unwrap();

    let drain_task = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.manual_sync().await })
    };
    started.notified().await;

    // Enqueue while the drain has an item in flight: commit order in the
    // store must still be enqueue order.
    let second = queue
        .enqueue(MutationKind::CheckInChange, serde_json::json!({"n": 2}))
        .unwrap();
    let third = queue
        .enqueue(MutationKind::ClassStatusChange, serde_json::json!({"n": 3}))
        .unwrap();

    let persisted: Vec<String> = store
        .load_all()
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(persisted, vec![first.clone(), second.clone(), third.clone()]);

    release.notify_one();
    release.notify_one();
    release.notify_one();
    drain_task.await.unwrap();
}

// ============================================================================
// Aggregate counts follow enqueue/succeed bookkeeping
// ============================================================================

#[tokio::test]
async fn pending_count_tracks_enqueues_minus_successes() {
    let queue =
        OfflineQueue::new(Arc::new(MemoryStore::new()) as Arc<dyn QueueStore>).unwrap();

    let mut ids = Vec::new();
    for i in 0..10 {
        ids.push(
            queue
                .enqueue(MutationKind::CheckInChange, serde_json::json!({ "n": i }))
                .unwrap(),
        );
        assert_eq!(queue.pending_count(), i + 1);
    }

    for (done, id) in ids.iter().enumerate() {
        queue.mark_syncing(id).unwrap();
        queue.mark_succeeded(id).unwrap();
        assert_eq!(queue.pending_count(), 10 - done - 1);
    }
    assert_eq!(queue.pending_count(), 0);
}

// ============================================================================
// Failed items: requeue and discard paths
// ============================================================================

#[tokio::test]
async fn rejected_mutation_waits_for_explicit_requeue() {
    let connectivity = ManualConnectivity::new(true);
    let sender = FakeSender::failing(SendError::validation("unknown class id"));
    let ctx = init_context(
        test_config(),
        Arc::new(MemoryStore::new()),
        connectivity as Arc<dyn ConnectivitySource>,
        Arc::clone(&sender) as Arc<dyn MutationSender>,
    );

    let id = ctx
        .enqueue(MutationKind::ScoreSubmit, score_payload(2))
        .unwrap();
    let state = ctx.manual_sync().await;

    assert_eq!(state.status, SyncStatus::Error);
    assert_eq!(ctx.failed_count(), 1);
    assert_eq!(sender.calls(), 1);

    // Automatic drains leave the terminal item alone
    ctx.manual_sync().await;
    assert_eq!(sender.calls(), 1);

    // Operator fixes the class list upstream and retries by hand
    *sender.outcome.lock().unwrap() = Ok(());
    ctx.queue().requeue(&id).unwrap();
    let state = ctx.manual_sync().await;
    assert_eq!(state.status, SyncStatus::Idle);
    assert_eq!(ctx.failed_count(), 0);
    assert_eq!(sender.calls(), 2);
    ctx.dispose();
}

#[tokio::test]
async fn discarding_a_failed_change_unblocks_exit() {
    let connectivity = ManualConnectivity::new(true);
    let sender = FakeSender::failing(SendError::validation("armband not entered"));
    let ctx = init_context(
        test_config(),
        Arc::new(MemoryStore::new()),
        connectivity as Arc<dyn ConnectivitySource>,
        sender as Arc<dyn MutationSender>,
    );

    let id = ctx
        .enqueue(
            MutationKind::CheckInChange,
            serde_json::json!({"armband": 99}),
        )
        .unwrap();
    ctx.manual_sync().await;
    assert_eq!(ctx.failed_count(), 1);
    assert!(!ctx.can_safely_exit().allowed);

    ctx.queue().discard(&id).unwrap();
    assert!(ctx.can_safely_exit().allowed);
    ctx.dispose();
}
