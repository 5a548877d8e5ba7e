//! Connection supervision: state machine, retry backoff, and open-request
//! scheduling.
//!
//! The supervisor owns the `disconnected -> connecting -> connected` state
//! machine. Network loss can force `connected -> disconnected` at any time;
//! reconnection backs off exponentially and gives up into a terminal
//! `Failed` state after the attempt cap, which only an explicit user retry
//! leaves. Rapid document switching is tamed by debouncing open requests
//! and a freshest-wins token that suppresses completions of superseded
//! opens.

use crate::awareness::{AwarenessTracker, AwarenessUpdate};
use crate::events::{EngineEvent, EventBus};
use crate::fs::FileStore;
use crate::identity::VaultIdentity;
use crate::metadata::{
    MetadataChange, MetadataError, ReconcileReport, VaultMetadataReconciler, FULL_REDIFF_INTERVAL,
};
use crate::offline::{OfflineQueue, OperationApplier, QueueError, ReplayReport};
use crate::session::SessionSlot;
use crate::surface::Notifier;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use web_time::Instant;

/// Coalescing window for bursts of open requests.
pub const OPEN_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Metadata reconciliation failed: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Offline queue error: {0}")]
    Queue(#[from] QueueError),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Retry attempts exhausted; requires explicit user retry
    Failed,
}

/// Reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Cap on the backoff delay
    pub max_delay: Duration,
    /// Exponential backoff multiplier
    pub backoff_factor: f64,
    /// Attempts before giving up into `Failed` (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: Some(10),
        }
    }
}

/// Next reconnection delay for an attempt number (1-based).
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// Reconnection bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ReconnectState {
    pub attempts: u32,
    /// When to attempt the next reconnection (ms since epoch)
    pub next_attempt_at: Option<u64>,
    pub current_delay: Duration,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, now_ms: u64, config: &ReconnectConfig) {
        self.attempts += 1;
        self.current_delay = calculate_backoff(self.attempts, config);
        self.next_attempt_at = Some(now_ms + self.current_delay.as_millis() as u64);
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.next_attempt_at.map(|t| now_ms >= t).unwrap_or(false)
    }

    pub fn exhausted(&self, config: &ReconnectConfig) -> bool {
        config
            .max_attempts
            .map(|max| self.attempts >= max)
            .unwrap_or(false)
    }
}

/// What happened after a disconnect was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnection {
    /// Retry scheduled after this delay
    RetryScheduled(Duration),
    /// Attempt cap reached; terminal until explicit retry
    Failed,
}

/// The connection state machine.
pub struct ConnectionSupervisor {
    state: ConnectionState,
    config: ReconnectConfig,
    reconnect: ReconnectState,
    events: Option<Arc<EventBus>>,
}

impl ConnectionSupervisor {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            reconnect: ReconnectState::new(),
            events: None,
        }
    }

    /// Publish every state transition as `ConnectionChanged`.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, state: ConnectionState) {
        self.state = state;
        if let Some(events) = &self.events {
            events.publish(EngineEvent::ConnectionChanged { state });
        }
    }

    pub fn reconnect_state(&self) -> &ReconnectState {
        &self.reconnect
    }

    /// Begin a connection attempt (explicit open or retry scheduler).
    /// Refused from `Failed`, which only `retry()` leaves.
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Disconnected => {
                self.transition(ConnectionState::Connecting);
                true
            }
            _ => false,
        }
    }

    /// Record a successful connection. The caller must follow up with
    /// `ClientSession::resync` since reconciliation and awareness both go
    /// stale while offline.
    pub fn on_connected(&mut self) {
        self.transition(ConnectionState::Connected);
        self.reconnect.reset();
        tracing::info!("Connected");
    }

    /// Record a disconnect (from any state). Schedules the next retry or
    /// transitions to the terminal `Failed` state.
    pub fn on_disconnected(&mut self, now_ms: u64) -> Disconnection {
        if self.reconnect.exhausted(&self.config) {
            self.transition(ConnectionState::Failed);
            tracing::warn!(
                "Giving up after {} reconnect attempt(s)",
                self.reconnect.attempts
            );
            return Disconnection::Failed;
        }

        self.transition(ConnectionState::Disconnected);
        self.reconnect.schedule(now_ms, &self.config);
        tracing::info!(
            "Disconnected; retrying in {:?} (attempt {})",
            self.reconnect.current_delay,
            self.reconnect.attempts
        );
        Disconnection::RetryScheduled(self.reconnect.current_delay)
    }

    /// Whether the retry scheduler should attempt a connection now.
    pub fn should_retry(&self, now_ms: u64) -> bool {
        self.state == ConnectionState::Disconnected && self.reconnect.is_due(now_ms)
    }

    /// Explicit user retry out of the terminal `Failed` state.
    pub fn retry(&mut self) {
        if self.state == ConnectionState::Failed {
            self.reconnect.reset();
            self.transition(ConnectionState::Connecting);
        }
    }
}

impl Default for ConnectionSupervisor {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

/// A pending, debounced open request.
struct PendingOpen {
    path: String,
    token: u64,
    requested_at: Instant,
}

/// Debounces open requests and hands out freshest-wins tokens.
///
/// Each request gets a monotonically increasing token. A burst of requests
/// inside the debounce window coalesces to the newest one; completions
/// carrying a superseded token must be suppressed by the caller (side
/// effects already applied are not rolled back).
pub struct OpenScheduler {
    latest_token: u64,
    pending: Option<PendingOpen>,
    debounce: Duration,
}

impl OpenScheduler {
    pub fn new() -> Self {
        Self::with_debounce(OPEN_DEBOUNCE)
    }

    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            latest_token: 0,
            pending: None,
            debounce,
        }
    }

    /// Queue an open request, superseding any pending one.
    pub fn request(&mut self, path: &str) -> u64 {
        self.latest_token += 1;
        if let Some(old) = &self.pending {
            tracing::debug!("Open of {} superseded by {}", old.path, path);
        }
        self.pending = Some(PendingOpen {
            path: path.to_string(),
            token: self.latest_token,
            requested_at: Instant::now(),
        });
        self.latest_token
    }

    /// Take the pending request once its debounce window has elapsed.
    pub fn take_due(&mut self) -> Option<(String, u64)> {
        let due = self
            .pending
            .as_ref()
            .map(|p| p.requested_at.elapsed() >= self.debounce)
            .unwrap_or(false);
        if !due {
            return None;
        }
        self.pending.take().map(|p| (p.path, p.token))
    }

    /// Whether a completion with this token is still the freshest request.
    /// Stale completions must be dropped, not applied.
    pub fn is_current(&self, token: u64) -> bool {
        token == self.latest_token
    }
}

impl Default for OpenScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything after a reconnect resync: the reconciliation report, the
/// offline replay report, and the awareness updates to re-publish.
#[derive(Debug)]
pub struct ResyncReport {
    pub reconcile: ReconcileReport,
    pub replay: ReplayReport,
    pub awareness: Vec<AwarenessUpdate>,
}

/// The client's per-vault state, owned in one place instead of scattered
/// ambient globals, so teardown and tests stay deterministic.
pub struct ClientSession<F: FileStore, N: Notifier> {
    pub identity: VaultIdentity,
    pub awareness: Arc<Mutex<AwarenessTracker>>,
    pub slot: SessionSlot<F, N>,
    pub reconciler: VaultMetadataReconciler<F, N>,
    pub queue: OfflineQueue<F>,
    events: Arc<EventBus>,
    last_rediff: Option<Instant>,
}

impl<F: FileStore + Clone, N: Notifier> ClientSession<F, N> {
    pub fn new(
        identity: VaultIdentity,
        awareness: Arc<Mutex<AwarenessTracker>>,
        reconciler: VaultMetadataReconciler<F, N>,
        queue: OfflineQueue<F>,
    ) -> Self {
        Self {
            identity,
            awareness,
            slot: SessionSlot::new(),
            reconciler,
            queue,
            events: Arc::new(EventBus::new()),
            last_rediff: None,
        }
    }

    /// The engine event bus. Hosts subscribe here; document sessions and
    /// resolvers created for this vault should be handed a clone.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Whether the periodic full re-diff is due. The host drives the
    /// timer and calls `resync` when this returns true; `resync` resets
    /// the interval.
    pub fn rediff_due(&self) -> bool {
        self.last_rediff
            .map(|at| at.elapsed() >= FULL_REDIFF_INTERVAL)
            .unwrap_or(true)
    }

    /// The full disconnected -> connected resync pass: reconcile the vault
    /// tree, replay queued offline operations, and collect the local
    /// awareness records for re-publishing.
    pub async fn resync<A: OperationApplier>(
        &mut self,
        local_paths: &[String],
        local_folders: &[String],
        applier: &mut A,
    ) -> Result<ResyncReport> {
        let reconcile = self.reconciler.reconcile(local_paths, local_folders).await?;
        let replay = self.queue.set_connected(true, applier).await?;
        let awareness = self.awareness.lock().unwrap().local_updates();
        self.last_rediff = Some(Instant::now());

        self.events.publish(EngineEvent::QueueReplayed {
            applied: replay.applied,
            remaining: self.queue.size(),
        });

        Ok(ResyncReport {
            reconcile,
            replay,
            awareness,
        })
    }

    /// Route a remote awareness update into the tracker, publishing
    /// `PresenceChanged` when the visible state changed.
    pub fn apply_remote_presence(&self, update: AwarenessUpdate) -> bool {
        let mut awareness = self.awareness.lock().unwrap();
        let user_id = update
            .record
            .as_ref()
            .map(|r| r.user_id.clone())
            .or_else(|| awareness.remote_user(&update.scope, update.client_id));
        let cleared = update.record.is_none();

        let changed = awareness.apply_remote(update);
        drop(awareness);

        if changed {
            if let Some(user_id) = user_id {
                self.events
                    .publish(EngineEvent::PresenceChanged { user_id, cleared });
            }
        }
        changed
    }

    /// Import a remote vault-metadata update, mirror the resulting
    /// changes into the local tree, and publish `VaultTreeChanged` for
    /// each one.
    pub async fn apply_remote_metadata(&mut self, data: &[u8]) -> Result<Vec<MetadataChange>> {
        let changes = self.reconciler.metadata.import(data)?;
        self.reconciler.mirror_remote_changes(&changes).await?;

        for change in &changes {
            let (path, removed) = match change {
                MetadataChange::FileAdded(path) | MetadataChange::FolderAdded(path) => {
                    (path, false)
                }
                MetadataChange::FileRemoved(path) | MetadataChange::FolderRemoved(path) => {
                    (path, true)
                }
            };
            self.events.publish(EngineEvent::VaultTreeChanged {
                path: path.clone(),
                removed,
            });
        }
        Ok(changes)
    }

    /// Record loss of connectivity; subsequent file operations queue
    /// offline until the next resync.
    pub async fn go_offline(&mut self) -> Result<()> {
        struct Never;

        #[async_trait::async_trait]
        impl OperationApplier for Never {
            async fn apply(
                &mut self,
                _op: &crate::offline::OfflineOperation,
            ) -> std::result::Result<crate::offline::ApplyOutcome, String> {
                unreachable!("replay never runs on a disconnect transition")
            }
        }

        self.queue.set_connected(false, &mut Never).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::awareness::{AwarenessRecord, AwarenessScope};
    use crate::fs::InMemoryFs;
    use crate::metadata::VaultMetadata;
    use crate::offline::{ApplyOutcome, OfflineOperation, OperationKind};
    use crate::surface::RecordingNotifier;
    use async_trait::async_trait;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ReconnectConfig::default();

        assert_eq!(calculate_backoff(1, &config), Duration::from_secs(5));
        assert_eq!(calculate_backoff(2, &config), Duration::from_secs(10));
        assert_eq!(calculate_backoff(3, &config), Duration::from_secs(20));
        assert_eq!(calculate_backoff(4, &config), Duration::from_secs(40));
        assert_eq!(calculate_backoff(5, &config), Duration::from_secs(60));
        assert_eq!(calculate_backoff(12, &config), Duration::from_secs(60));
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut sup = ConnectionSupervisor::default();
        assert_eq!(sup.state(), ConnectionState::Disconnected);

        assert!(sup.begin_connect());
        assert_eq!(sup.state(), ConnectionState::Connecting);

        sup.on_connected();
        assert_eq!(sup.state(), ConnectionState::Connected);
        assert_eq!(sup.reconnect_state().attempts, 0);
    }

    #[test]
    fn test_disconnect_schedules_retry() {
        let mut sup = ConnectionSupervisor::default();
        sup.begin_connect();
        sup.on_connected();

        let result = sup.on_disconnected(1000);
        assert_eq!(result, Disconnection::RetryScheduled(Duration::from_secs(5)));
        assert_eq!(sup.state(), ConnectionState::Disconnected);

        // Too early, then due
        assert!(!sup.should_retry(3000));
        assert!(sup.should_retry(6000));
    }

    #[test]
    fn test_attempt_counter_resets_on_connect() {
        let mut sup = ConnectionSupervisor::default();

        sup.on_disconnected(0);
        sup.on_disconnected(10_000);
        assert_eq!(sup.reconnect_state().attempts, 2);

        sup.begin_connect();
        sup.on_connected();
        assert_eq!(sup.reconnect_state().attempts, 0);

        // Next failure starts from the initial delay again
        let result = sup.on_disconnected(20_000);
        assert_eq!(result, Disconnection::RetryScheduled(Duration::from_secs(5)));
    }

    #[test]
    fn test_exhausted_attempts_become_terminal_failure() {
        let mut sup = ConnectionSupervisor::new(ReconnectConfig {
            max_attempts: Some(2),
            ..Default::default()
        });

        assert!(matches!(
            sup.on_disconnected(0),
            Disconnection::RetryScheduled(_)
        ));
        assert!(matches!(
            sup.on_disconnected(10_000),
            Disconnection::RetryScheduled(_)
        ));
        assert_eq!(sup.on_disconnected(30_000), Disconnection::Failed);
        assert_eq!(sup.state(), ConnectionState::Failed);

        // No automatic retry out of Failed
        assert!(!sup.should_retry(u64::MAX));
        assert!(!sup.begin_connect());

        // Explicit user retry resets the machine
        sup.retry();
        assert_eq!(sup.state(), ConnectionState::Connecting);
        assert_eq!(sup.reconnect_state().attempts, 0);
    }

    #[test]
    fn test_open_scheduler_coalesces_bursts() {
        let mut scheduler = OpenScheduler::with_debounce(Duration::ZERO);

        let token_a = scheduler.request("a.md");
        let token_b = scheduler.request("b.md");
        let token_c = scheduler.request("c.md");

        // Only the newest request survives the burst
        let (path, token) = scheduler.take_due().expect("window elapsed");
        assert_eq!(path, "c.md");
        assert_eq!(token, token_c);
        assert!(scheduler.take_due().is_none());

        // Superseded completions are stale
        assert!(!scheduler.is_current(token_a));
        assert!(!scheduler.is_current(token_b));
        assert!(scheduler.is_current(token_c));
    }

    #[test]
    fn test_open_scheduler_waits_for_debounce() {
        let mut scheduler = OpenScheduler::with_debounce(Duration::from_secs(3600));
        scheduler.request("a.md");
        assert!(scheduler.take_due().is_none());
    }

    struct FsApplier {
        fs: Arc<InMemoryFs>,
    }

    #[async_trait]
    impl OperationApplier for FsApplier {
        async fn apply(
            &mut self,
            op: &OfflineOperation,
        ) -> std::result::Result<ApplyOutcome, String> {
            match op.kind {
                OperationKind::Create => {
                    let content = op.content.as_deref().unwrap_or("");
                    self.fs
                        .write(&op.path, content.as_bytes())
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok(ApplyOutcome::Applied)
                }
                _ => Ok(ApplyOutcome::AlreadySatisfied),
            }
        }
    }

    async fn client_session(
        fs: Arc<InMemoryFs>,
    ) -> ClientSession<Arc<InMemoryFs>, RecordingNotifier> {
        let identity = VaultIdentity::generate();
        let reconciler = VaultMetadataReconciler::new(
            Arc::clone(&fs),
            RecordingNotifier::new(),
            VaultMetadata::new(&identity.vault_id),
        );
        let queue = OfflineQueue::load(Arc::clone(&fs), &identity.vault_id)
            .await
            .unwrap();
        ClientSession::new(
            identity,
            Arc::new(Mutex::new(AwarenessTracker::new(1))),
            reconciler,
            queue,
        )
    }

    #[tokio::test]
    async fn test_resync_reconciles_replays_and_republishes() {
        let fs = Arc::new(InMemoryFs::new());
        let mut client = client_session(Arc::clone(&fs)).await;

        // Offline: user created a file, which queued an operation
        client
            .queue
            .enqueue(
                OfflineOperation::new(OperationKind::Create, "queued.md", "alice", 100)
                    .with_content("offline edit"),
            )
            .await
            .unwrap();
        client.reconciler.on_local_create("queued.md").await.unwrap();

        // Presence was set while offline too
        client.awareness.lock().unwrap().set_local(
            AwarenessScope::Vault,
            AwarenessRecord {
                user_id: "alice".into(),
                name: "alice".into(),
                color: "#30bced".into(),
                color_light: "#30bced33".into(),
                current_file: None,
                timestamp: 100,
            },
        );

        // Remote metadata gained a file while we were away
        client.reconciler.metadata.add_path("remote.md").unwrap();
        // (simulating: that add arrived from the server, not from us)

        let mut applier = FsApplier { fs: Arc::clone(&fs) };
        let report = client
            .resync(&["queued.md".into()], &[], &mut applier)
            .await
            .unwrap();

        assert_eq!(report.replay.applied, 1);
        assert_eq!(report.awareness.len(), 1);
        assert!(fs.exists("queued.md").await.unwrap());
        assert!(fs.exists("remote.md").await.unwrap());
        assert_eq!(client.queue.size(), 0);
    }

    #[test]
    fn test_transitions_publish_connection_changed() {
        let events = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_cb = Arc::clone(&seen);
        let _sub = events.subscribe(move |event| {
            if let EngineEvent::ConnectionChanged { state } = event {
                seen_cb.lock().unwrap().push(state);
            }
        });

        let mut sup = ConnectionSupervisor::default().with_events(Arc::clone(&events));
        sup.begin_connect();
        sup.on_connected();
        sup.on_disconnected(0);

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected,
            ]
        );
    }

    #[tokio::test]
    async fn test_resync_publishes_replay_and_resets_rediff_timer() {
        let fs = Arc::new(InMemoryFs::new());
        let mut client = client_session(Arc::clone(&fs)).await;

        // A fresh session has never diffed, so the first pass is due
        assert!(client.rediff_due());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let _sub = client.events().subscribe(move |event| {
            if let EngineEvent::QueueReplayed { applied, remaining } = event {
                seen_cb.lock().unwrap().push((applied, remaining));
            }
        });

        client
            .queue
            .enqueue(
                OfflineOperation::new(OperationKind::Create, "queued.md", "alice", 100)
                    .with_content("x"),
            )
            .await
            .unwrap();

        let mut applier = FsApplier { fs: Arc::clone(&fs) };
        client.resync(&[], &[], &mut applier).await.unwrap();

        assert_eq!(seen.lock().unwrap().as_slice(), &[(1, 0)]);
        assert!(!client.rediff_due());
    }

    #[tokio::test]
    async fn test_remote_presence_routes_and_publishes() {
        let fs = Arc::new(InMemoryFs::new());
        let client = client_session(Arc::clone(&fs)).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let _sub = client.events().subscribe(move |event| {
            if let EngineEvent::PresenceChanged { user_id, cleared } = event {
                seen_cb.lock().unwrap().push((user_id, cleared));
            }
        });

        let set = AwarenessUpdate {
            client_id: 2,
            scope: AwarenessScope::Vault,
            record: Some(AwarenessRecord {
                user_id: "bob".into(),
                name: "bob".into(),
                color: "#30bced".into(),
                color_light: "#30bced33".into(),
                current_file: None,
                timestamp: 100,
            }),
        };
        assert!(client.apply_remote_presence(set.clone()));
        // Replaying the same record changes nothing and stays silent
        assert!(!client.apply_remote_presence(set));

        let clear = AwarenessUpdate {
            client_id: 2,
            scope: AwarenessScope::Vault,
            record: None,
        };
        assert!(client.apply_remote_presence(clear));

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[("bob".to_string(), false), ("bob".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_remote_metadata_publishes_tree_changes() {
        let fs = Arc::new(InMemoryFs::new());
        let mut client = client_session(Arc::clone(&fs)).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let _sub = client.events().subscribe(move |event| {
            if let EngineEvent::VaultTreeChanged { path, removed } = event {
                seen_cb.lock().unwrap().push((path, removed));
            }
        });

        // A peer added a file to the shared metadata
        let peer = VaultMetadata::new(&client.identity.vault_id);
        peer.add_path("from-peer.md").unwrap();

        let changes = client
            .apply_remote_metadata(&peer.export_snapshot())
            .await
            .unwrap();

        assert_eq!(changes.len(), 1);
        assert!(fs.exists("from-peer.md").await.unwrap());
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[("from-peer.md".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_go_offline_marks_queue_disconnected() {
        let fs = Arc::new(InMemoryFs::new());
        let mut client = client_session(Arc::clone(&fs)).await;

        let mut applier = FsApplier { fs: Arc::clone(&fs) };
        client.resync(&[], &[], &mut applier).await.unwrap();
        assert!(client.queue.is_connected());

        client.go_offline().await.unwrap();
        assert!(!client.queue.is_connected());
    }
}
