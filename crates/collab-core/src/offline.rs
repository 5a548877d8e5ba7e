//! Durable queue of file/folder operations made while disconnected.
//!
//! Operations are appended with a generated id and timestamp, persisted
//! immediately to `.collab/offline-queue.json`, and replayed in timestamp
//! order when connectivity returns. Replay halts at the first hard failure
//! so per-path ordering is never violated; already-satisfied operations
//! (delete of a missing file, create of an identical file) are skipped.

use crate::fs::{FileStore, FsError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const QUEUE_FILE: &str = ".collab/offline-queue.json";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Corrupt queue file: {0}")]
    Corrupt(String),

    #[error("Replay failed for {path}: {reason}")]
    Replay { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Kind of a queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Create,
    Delete,
    Rename,
    Move,
    CreateFolder,
    DeleteFolder,
}

/// One queued operation. Immutable once created; removed only after its
/// effect is confirmed applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineOperation {
    pub id: String,
    pub kind: OperationKind,
    pub path: String,
    /// Target path for rename/move
    pub new_path: Option<String>,
    /// Content for create
    pub content: Option<String>,
    /// Milliseconds since epoch
    pub timestamp: u64,
    pub user_id: String,
}

impl OfflineOperation {
    pub fn new(kind: OperationKind, path: &str, user_id: &str, timestamp: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            path: path.to_string(),
            new_path: None,
            content: None,
            timestamp,
            user_id: user_id.to_string(),
        }
    }

    pub fn with_new_path(mut self, new_path: &str) -> Self {
        self.new_path = Some(new_path.to_string());
        self
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.content = Some(content.to_string());
        self
    }
}

/// Outcome of applying one operation during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Effect confirmed applied
    Applied,
    /// Precondition already holds (e.g. delete target gone) — skip
    AlreadySatisfied,
}

/// Applies replayed operations through the normal reconciliation path.
#[async_trait]
pub trait OperationApplier: Send {
    async fn apply(&mut self, op: &OfflineOperation) -> std::result::Result<ApplyOutcome, String>;
}

/// Result of one replay pass.
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub applied: usize,
    pub skipped: usize,
    /// Set when replay halted early; remaining operations stay queued
    pub halted_at: Option<String>,
}

/// Persistent offline operation queue for one vault.
pub struct OfflineQueue<F: FileStore> {
    fs: F,
    /// Vault this queue belongs to (queues are keyed by vault on disk)
    vault_id: String,
    ops: Vec<OfflineOperation>,
    connected: bool,
}

/// On-disk format: all vaults' queues in one file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedQueues {
    queues: std::collections::HashMap<String, Vec<OfflineOperation>>,
}

impl<F: FileStore> OfflineQueue<F> {
    /// Load the queue for a vault, creating an empty one if none exists.
    pub async fn load(fs: F, vault_id: &str) -> Result<Self> {
        let all = Self::load_all(&fs).await?;
        let ops = all.queues.get(vault_id).cloned().unwrap_or_default();

        if !ops.is_empty() {
            tracing::info!("Loaded {} pending offline operation(s)", ops.len());
        }

        Ok(Self {
            fs,
            vault_id: vault_id.to_string(),
            ops,
            connected: false,
        })
    }

    async fn load_all(fs: &F) -> Result<PersistedQueues> {
        if !fs.exists(QUEUE_FILE).await? {
            return Ok(PersistedQueues::default());
        }
        let bytes = fs.read(QUEUE_FILE).await?;
        serde_json::from_slice(&bytes).map_err(|e| QueueError::Corrupt(e.to_string()))
    }

    async fn persist(&self) -> Result<()> {
        let mut all = Self::load_all(&self.fs).await?;
        all.queues.insert(self.vault_id.clone(), self.ops.clone());
        let bytes =
            serde_json::to_vec_pretty(&all).map_err(|e| QueueError::Corrupt(e.to_string()))?;
        self.fs.mkdir(crate::identity::COLLAB_DIR).await?;
        self.fs.write(QUEUE_FILE, &bytes).await?;
        Ok(())
    }

    /// Append an operation and persist immediately.
    pub async fn enqueue(&mut self, op: OfflineOperation) -> Result<()> {
        tracing::debug!("Queued offline {:?} for {}", op.kind, op.path);
        self.ops.push(op);
        self.persist().await
    }

    pub fn size(&self) -> usize {
        self.ops.len()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Drop all pending operations.
    pub async fn clear(&mut self) -> Result<()> {
        self.ops.clear();
        self.persist().await
    }

    /// Pending operations in replay order (stable sort keeps enqueue order
    /// for equal timestamps).
    pub fn pending(&self) -> Vec<OfflineOperation> {
        let mut ops = self.ops.clone();
        ops.sort_by_key(|op| op.timestamp);
        ops
    }

    /// Record a connectivity transition. On false -> true, replays the
    /// queue through the applier.
    pub async fn set_connected<A: OperationApplier>(
        &mut self,
        connected: bool,
        applier: &mut A,
    ) -> Result<ReplayReport> {
        let was_connected = self.connected;
        self.connected = connected;

        if connected && !was_connected {
            self.replay(applier).await
        } else {
            Ok(ReplayReport::default())
        }
    }

    /// Replay pending operations one at a time, strictly in timestamp
    /// order. Halts at the first hard failure; everything from that point
    /// on stays queued for the next connectivity transition.
    async fn replay<A: OperationApplier>(&mut self, applier: &mut A) -> Result<ReplayReport> {
        let mut report = ReplayReport::default();
        let ordered = self.pending();

        for op in &ordered {
            match applier.apply(op).await {
                Ok(ApplyOutcome::Applied) => {
                    report.applied += 1;
                    self.ops.retain(|o| o.id != op.id);
                }
                Ok(ApplyOutcome::AlreadySatisfied) => {
                    tracing::debug!("Offline op already satisfied, skipping: {}", op.path);
                    report.skipped += 1;
                    self.ops.retain(|o| o.id != op.id);
                }
                Err(reason) => {
                    tracing::warn!("Offline replay halted at {}: {}", op.path, reason);
                    report.halted_at = Some(op.path.clone());
                    break;
                }
            }
        }

        self.persist().await?;

        if report.applied > 0 || report.skipped > 0 {
            tracing::info!(
                "Replayed offline queue: {} applied, {} skipped, {} remaining",
                report.applied,
                report.skipped,
                self.ops.len()
            );
        }

        Ok(report)
    }
}
