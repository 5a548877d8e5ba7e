//! Vault-wide metadata reconciliation.
//!
//! The shared metadata document (`{vaultId}/vault-metadata`) holds two
//! replicated ordered lists, `paths` and `folders`. Presence in those lists
//! is the source of truth for "this file should exist on every client"; the
//! local tree is a cache reconciled toward it. Recent local operations
//! (inside the grace window) take precedence so we never undo the user's
//! own just-made change.

use crate::conflict::{ConflictInfo, ResolutionOutcome};
use crate::doc::metadata_doc_name;
use crate::fs::{FileStore, FsError};
use crate::surface::Notifier;
use loro::{ExportMode, LoroDoc, LoroValue, VersionVector};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use web_time::Instant;

/// How long a local create/delete shields a path from being treated as a
/// structural conflict (and from remote echo reactions).
pub const GRACE_WINDOW: Duration = Duration::from_secs(60);

/// Interval for the periodic full re-diff that catches missed change
/// events. The host drives the timer through `ClientSession::rediff_due`
/// and runs `resync` when it fires.
pub const FULL_REDIFF_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("CRDT error: {0}")]
    Crdt(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Validate a vault-relative path before it enters the shared lists.
pub fn validate_vault_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(MetadataError::InvalidPath("empty path".into()));
    }
    if path.contains("..") {
        return Err(MetadataError::InvalidPath("path traversal".into()));
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(MetadataError::InvalidPath("absolute or backslash path".into()));
    }
    if path.contains("//") {
        return Err(MetadataError::InvalidPath("empty path segment".into()));
    }
    if path.contains('\0') || path.chars().any(|c| c.is_control()) {
        return Err(MetadataError::InvalidPath("control character".into()));
    }
    if path.len() > 1024 {
        return Err(MetadataError::InvalidPath("path too long".into()));
    }
    Ok(())
}

/// A remote metadata change, observed in list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataChange {
    FileAdded(String),
    FileRemoved(String),
    FolderAdded(String),
    FolderRemoved(String),
}

/// The replicated vault metadata document.
pub struct VaultMetadata {
    doc: LoroDoc,
    name: String,
}

impl VaultMetadata {
    pub fn new(vault_id: &str) -> Self {
        Self {
            doc: LoroDoc::new(),
            name: metadata_doc_name(vault_id),
        }
    }

    /// The replicated document name (`{vaultId}/vault-metadata`).
    pub fn name(&self) -> &str {
        &self.name
    }

    fn list_values(&self, container: &str) -> Vec<String> {
        let list = self.doc.get_list(container);
        let mut values = Vec::new();
        if let LoroValue::List(items) = list.get_deep_value() {
            for item in items.iter() {
                if let LoroValue::String(s) = item {
                    values.push(s.to_string());
                }
            }
        }
        values
    }

    fn list_insert(&self, container: &str, value: &str) -> Result<()> {
        let list = self.doc.get_list(container);
        list.push(value)
            .map_err(|e| MetadataError::Crdt(e.to_string()))?;
        self.doc.commit();
        Ok(())
    }

    fn list_remove(&self, container: &str, value: &str) -> Result<bool> {
        let values = self.list_values(container);
        if let Some(idx) = values.iter().position(|v| v == value) {
            let list = self.doc.get_list(container);
            list.delete(idx, 1)
                .map_err(|e| MetadataError::Crdt(e.to_string()))?;
            self.doc.commit();
            return Ok(true);
        }
        Ok(false)
    }

    pub fn paths(&self) -> Vec<String> {
        self.list_values("paths")
    }

    pub fn folders(&self) -> Vec<String> {
        self.list_values("folders")
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.paths().iter().any(|p| p == path)
    }

    pub fn contains_folder(&self, path: &str) -> bool {
        self.folders().iter().any(|p| p == path)
    }

    pub fn add_path(&self, path: &str) -> Result<()> {
        validate_vault_path(path)?;
        if !self.contains_path(path) {
            self.list_insert("paths", path)?;
        }
        Ok(())
    }

    pub fn remove_path(&self, path: &str) -> Result<bool> {
        self.list_remove("paths", path)
    }

    pub fn add_folder(&self, path: &str) -> Result<()> {
        validate_vault_path(path)?;
        if !self.contains_folder(path) {
            self.list_insert("folders", path)?;
        }
        Ok(())
    }

    pub fn remove_folder(&self, path: &str) -> Result<bool> {
        self.list_remove("folders", path)
    }

    pub fn version(&self) -> VersionVector {
        self.doc.state_vv()
    }

    pub fn export_snapshot(&self) -> Vec<u8> {
        self.doc
            .export(ExportMode::Snapshot)
            .expect("snapshot export cannot fail")
    }

    pub fn export_updates(&self, from: &VersionVector) -> Vec<u8> {
        self.doc
            .export(ExportMode::updates(from))
            .expect("update export cannot fail")
    }

    /// Import remote metadata and report what changed, in list order.
    pub fn import(&mut self, data: &[u8]) -> Result<Vec<MetadataChange>> {
        let paths_before: HashSet<String> = self.paths().into_iter().collect();
        let folders_before: HashSet<String> = self.folders().into_iter().collect();

        self.doc
            .import(data)
            .map_err(|e| MetadataError::Crdt(e.to_string()))?;

        let mut changes = Vec::new();
        let paths_after = self.paths();
        let paths_after_set: HashSet<String> = paths_after.iter().cloned().collect();
        for path in &paths_after {
            if !paths_before.contains(path) {
                changes.push(MetadataChange::FileAdded(path.clone()));
            }
        }
        for path in &paths_before {
            if !paths_after_set.contains(path) {
                changes.push(MetadataChange::FileRemoved(path.clone()));
            }
        }

        let folders_after = self.folders();
        let folders_after_set: HashSet<String> = folders_after.iter().cloned().collect();
        for path in &folders_after {
            if !folders_before.contains(path) {
                changes.push(MetadataChange::FolderAdded(path.clone()));
            }
        }
        for path in &folders_before {
            if !folders_after_set.contains(path) {
                changes.push(MetadataChange::FolderRemoved(path.clone()));
            }
        }

        Ok(changes)
    }
}

/// Tracks paths the user just created or deleted locally.
///
/// Entries expire after the grace window so a stale mark can never
/// suppress a genuine remote change later on.
#[derive(Clone)]
pub struct RecentOps {
    marks: Arc<Mutex<HashMap<String, Instant>>>,
    ttl: Duration,
}

impl RecentOps {
    pub fn new() -> Self {
        Self::with_ttl(GRACE_WINDOW)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            marks: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Mark a path as just touched by a local operation.
    pub fn mark(&self, path: &str) {
        self.marks
            .lock()
            .unwrap()
            .insert(path.to_string(), Instant::now());
    }

    /// Whether the path is still inside the grace window.
    pub fn within_grace(&self, path: &str) -> bool {
        let marks = self.marks.lock().unwrap();
        marks
            .get(path)
            .map(|t| t.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    /// Drop expired marks to bound memory.
    pub fn cleanup_expired(&self) {
        let mut marks = self.marks.lock().unwrap();
        marks.retain(|_, t| t.elapsed() < self.ttl);
    }
}

impl Default for RecentOps {
    fn default() -> Self {
        Self::new()
    }
}

/// Report from one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Local-only paths pushed into the shared metadata
    pub pushed: Vec<String>,
    /// Remote-only paths materialized as empty local files/folders
    pub pulled: Vec<String>,
    /// Structure conflicts escalated to the resolver
    pub conflicts: Vec<ConflictInfo>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.pushed.is_empty() && self.pulled.is_empty() && self.conflicts.is_empty()
    }
}

/// Keeps the local file/folder tree consistent with the shared metadata.
pub struct VaultMetadataReconciler<F: FileStore, N: Notifier> {
    fs: F,
    notifier: N,
    pub metadata: VaultMetadata,
    recent: RecentOps,
}

impl<F: FileStore, N: Notifier> VaultMetadataReconciler<F, N> {
    pub fn new(fs: F, notifier: N, metadata: VaultMetadata) -> Self {
        Self {
            fs,
            notifier,
            metadata,
            recent: RecentOps::new(),
        }
    }

    pub fn with_grace_window(mut self, ttl: Duration) -> Self {
        self.recent = RecentOps::with_ttl(ttl);
        self
    }

    pub fn recent(&self) -> &RecentOps {
        &self.recent
    }

    /// Record a local file create/write. Marks the grace window and pushes
    /// the path into the shared metadata.
    pub async fn on_local_create(&mut self, path: &str) -> Result<()> {
        self.recent.mark(path);
        self.metadata.add_path(path)
    }

    /// Record a local file delete.
    pub async fn on_local_delete(&mut self, path: &str) -> Result<()> {
        self.recent.mark(path);
        self.metadata.remove_path(path)?;
        Ok(())
    }

    /// Record a local rename/move.
    pub async fn on_local_rename(&mut self, path: &str, new_path: &str) -> Result<()> {
        self.recent.mark(path);
        self.recent.mark(new_path);
        self.metadata.remove_path(path)?;
        self.metadata.add_path(new_path)
    }

    /// Record a local folder create.
    pub async fn on_local_create_folder(&mut self, path: &str) -> Result<()> {
        self.recent.mark(path);
        self.metadata.add_folder(path)
    }

    /// Record a local folder delete.
    pub async fn on_local_delete_folder(&mut self, path: &str) -> Result<()> {
        self.recent.mark(path);
        self.metadata.remove_folder(path)?;
        Ok(())
    }

    /// Full reconciliation pass between the local tree and the shared
    /// metadata, run on every (re)connect and on the periodic re-diff.
    ///
    /// Returns structure conflicts for the caller to route through the
    /// `ConflictResolver`; pure existence differences never raise one.
    pub async fn reconcile(
        &mut self,
        local_paths: &[String],
        local_folders: &[String],
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        self.reconcile_list(local_paths, false, &mut report).await?;
        self.reconcile_list(local_folders, true, &mut report).await?;

        if !report.pushed.is_empty() && !report.pulled.is_empty() {
            self.notifier.notify(&format!(
                "Vault merge: shared {} local item(s), received {} remote item(s)",
                report.pushed.len(),
                report.pulled.len()
            ));
        }

        self.recent.cleanup_expired();
        Ok(report)
    }

    async fn reconcile_list(
        &mut self,
        local: &[String],
        folders: bool,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let remote: Vec<String> = if folders {
            self.metadata.folders()
        } else {
            self.metadata.paths()
        };

        let local_set: HashSet<&String> = local.iter().collect();
        let remote_set: HashSet<&String> = remote.iter().collect();

        let local_only: Vec<&String> = local.iter().filter(|p| !remote_set.contains(p)).collect();
        let remote_only: Vec<&String> = remote.iter().filter(|p| !local_set.contains(p)).collect();

        if local_only.is_empty() && remote_only.is_empty() {
            return Ok(());
        }

        // Simultaneous independent growth: merge both directions, no
        // conflict objects for pure existence differences.
        if !local_only.is_empty() && !remote_only.is_empty() {
            for path in local_only {
                self.push_to_metadata(path, folders)?;
                report.pushed.push(path.clone());
            }
            for path in remote_only {
                self.materialize(path, folders).await?;
                report.pulled.push(path.clone());
            }
            return Ok(());
        }

        // One-sided growth: propagate, but escalate paths outside the
        // grace window as structure conflicts.
        for path in local_only {
            if self.recent.within_grace(path) {
                self.push_to_metadata(path, folders)?;
                report.pushed.push(path.clone());
            } else {
                let local_ts = self
                    .fs
                    .stat(path)
                    .await
                    .map(|s| s.mtime_millis)
                    .unwrap_or(0);
                report.conflicts.push(ConflictInfo::structure(path, local_ts, 0));
            }
        }

        for path in remote_only {
            if self.recent.within_grace(path) {
                // Our own pending delete: propagate it to the shared list.
                if folders {
                    self.metadata.remove_folder(path)?;
                } else {
                    self.metadata.remove_path(path)?;
                }
                tracing::debug!("Propagated pending local delete of {}", path);
            } else {
                self.materialize(path, folders).await?;
                report.pulled.push(path.clone());
            }
        }

        Ok(())
    }

    fn push_to_metadata(&self, path: &str, folders: bool) -> Result<()> {
        if folders {
            self.metadata.add_folder(path)
        } else {
            self.metadata.add_path(path)
        }
    }

    /// Create the local counterpart of a remote-only path. Files are
    /// materialized empty; their content arrives through document sync.
    async fn materialize(&self, path: &str, folder: bool) -> Result<()> {
        if self.fs.exists(path).await? {
            return Ok(());
        }
        if folder {
            self.fs.mkdir(path).await?;
        } else {
            self.fs.write(path, b"").await?;
        }
        tracing::debug!("Materialized remote path locally: {}", path);
        Ok(())
    }

    /// Apply a resolved structure conflict.
    ///
    /// The side is inferred from current state: a path present locally but
    /// absent from metadata is a local-only conflict, and vice versa.
    pub async fn apply_structure_decision(
        &mut self,
        conflict: &ConflictInfo,
        outcome: ResolutionOutcome,
    ) -> Result<()> {
        let path = &conflict.file_path;
        let exists_locally = self.fs.exists(path).await?;
        let in_metadata = self.metadata.contains_path(path) || self.metadata.contains_folder(path);

        match (exists_locally, in_metadata, outcome) {
            // Local-only path: keep it (push) or drop it
            (true, false, ResolutionOutcome::LocalApplied) => {
                self.metadata.add_path(path)?;
            }
            (true, false, _) => {
                self.recent.mark(path);
                self.fs.delete(path).await?;
            }
            // Remote-only path: materialize or remove from the shared list
            (false, true, ResolutionOutcome::RemoteApplied) => {
                self.materialize(path, false).await?;
            }
            (false, true, _) => {
                self.metadata.remove_path(path)?;
            }
            _ => {} // Already consistent
        }
        Ok(())
    }

    /// Mirror a batch of remote metadata changes into the local tree
    /// (continuous mode). Changes inside the grace window are echoes of
    /// our own operations and are skipped.
    pub async fn mirror_remote_changes(&mut self, changes: &[MetadataChange]) -> Result<()> {
        for change in changes {
            match change {
                MetadataChange::FileAdded(path) => {
                    if !self.recent.within_grace(path) {
                        self.materialize(path, false).await?;
                    }
                }
                MetadataChange::FolderAdded(path) => {
                    if !self.recent.within_grace(path) {
                        self.materialize(path, true).await?;
                    }
                }
                MetadataChange::FileRemoved(path) | MetadataChange::FolderRemoved(path) => {
                    if !self.recent.within_grace(path) && self.fs.exists(path).await? {
                        self.recent.mark(path);
                        self.fs.delete(path).await?;
                        tracing::info!("Removed {} (deleted remotely)", path);
                    }
                }
            }
        }
        Ok(())
    }
}
