//! Conflict detection and resolution.
//!
//! Every conflict resolves to a terminal state: merged, one side applied,
//! or both sides preserved as backup files. Nothing is ever left
//! unresolved or silently dropped. The auto policy's timestamp fallback
//! writes the losing side to a backup before applying the winner, so no
//! resolution path discards an edit outright.

use crate::events::{EngineEvent, EventBus};
use crate::fs::{FileStore, FsError};
use crate::surface::Notifier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),
}

pub type Result<T> = std::result::Result<T, ConflictError>;

/// Kind of detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictType {
    /// Both sides hold different content for the same file
    Content,
    /// File/folder existence disagrees between local tree and vault metadata
    Structure,
    /// Both sides edited while one was offline
    Concurrent,
}

/// Which side a resolution applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    Merged,
    LocalApplied,
    RemoteApplied,
    BackedUp,
}

/// Resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionPolicy {
    /// Try merge, then timestamp (losing side backed up)
    #[default]
    Auto,
    /// Ask the user through a `ConflictPrompt`
    Manual,
    /// Always preserve both sides as backups, apply remote
    Backup,
}

/// User's choice for a manually resolved conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualChoice {
    KeepLocal,
    KeepRemote,
    AttemptMerge,
    CreateBackups,
}

/// Asks the user to pick a resolution. Blocks only the affected document.
#[async_trait]
pub trait ConflictPrompt: Send + Sync {
    async fn choose(&self, conflict: &ConflictInfo) -> ManualChoice;
}

/// A detected conflict, constructed transiently and dropped on resolution.
#[derive(Debug, Clone)]
pub struct ConflictInfo {
    pub conflict_type: ConflictType,
    pub file_path: String,
    pub local_version: String,
    pub remote_version: String,
    /// Milliseconds since epoch
    pub local_timestamp: u64,
    pub remote_timestamp: u64,
    pub is_resolvable: bool,
    pub suggested: ResolutionOutcome,
}

impl ConflictInfo {
    /// Build a content conflict, suggesting the fresher side.
    pub fn content(
        path: &str,
        local: String,
        remote: String,
        local_ts: u64,
        remote_ts: u64,
    ) -> Self {
        Self {
            conflict_type: ConflictType::Content,
            file_path: path.to_string(),
            suggested: if local_ts >= remote_ts {
                ResolutionOutcome::LocalApplied
            } else {
                ResolutionOutcome::RemoteApplied
            },
            local_version: local,
            remote_version: remote,
            local_timestamp: local_ts,
            remote_timestamp: remote_ts,
            is_resolvable: true,
        }
    }

    /// Build a structure conflict (existence disagreement).
    pub fn structure(path: &str, local_ts: u64, remote_ts: u64) -> Self {
        Self {
            conflict_type: ConflictType::Structure,
            file_path: path.to_string(),
            local_version: String::new(),
            remote_version: String::new(),
            local_timestamp: local_ts,
            remote_timestamp: remote_ts,
            is_resolvable: true,
            suggested: if local_ts >= remote_ts {
                ResolutionOutcome::LocalApplied
            } else {
                ResolutionOutcome::RemoteApplied
            },
        }
    }
}

/// Best-effort line-based merge of two versions of a text document.
///
/// A line counts as "changed" when it does not appear in the other
/// version. The merge is declared safe only when the two versions still
/// share at least one common line to act as a backbone; each side's
/// changed lines are then combined by appending every remote line not
/// already present, preserving local line order first.
///
/// Known simplification: with no stored common ancestor this cannot
/// detect true overlapping edits to the same original line, so it stays
/// deliberately conservative and callers must treat `None` as
/// "unmergeable", falling back to timestamp or backup resolution.
pub fn heuristic_merge(local: &str, remote: &str) -> Option<String> {
    if local.is_empty() {
        return Some(remote.to_string());
    }
    if remote.is_empty() {
        return Some(local.to_string());
    }

    let local_lines: Vec<&str> = local.lines().collect();
    let remote_lines: Vec<&str> = remote.lines().collect();

    let local_set: std::collections::HashSet<&str> = local_lines.iter().copied().collect();
    let remote_set: std::collections::HashSet<&str> = remote_lines.iter().copied().collect();

    // No shared backbone: both sides rewrote everything, overlap is certain.
    if local_set.is_disjoint(&remote_set) {
        return None;
    }

    let mut merged: Vec<&str> = local_lines.clone();
    for line in &remote_lines {
        if !local_set.contains(line) {
            merged.push(line);
        }
    }

    Some(merged.join("\n"))
}

/// Resolves conflicts against the canonical file through a `FileStore`.
pub struct ConflictResolver<F: FileStore, N: Notifier> {
    fs: F,
    notifier: N,
    policy: ResolutionPolicy,
    prompt: Option<Arc<dyn ConflictPrompt>>,
    events: Option<Arc<EventBus>>,
}

impl<F: FileStore, N: Notifier> ConflictResolver<F, N> {
    pub fn new(fs: F, notifier: N, policy: ResolutionPolicy) -> Self {
        Self {
            fs,
            notifier,
            policy,
            prompt: None,
            events: None,
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn ConflictPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> ResolutionPolicy {
        self.policy
    }

    /// Resolve a conflict to a terminal state.
    ///
    /// Content conflicts are applied to the canonical file here; structure
    /// conflicts only pick a winning side, which the reconciler then
    /// materializes. The backup strategy is the universal fallback for
    /// unresolvable conflicts.
    pub async fn resolve(&self, conflict: &ConflictInfo) -> Result<ResolutionOutcome> {
        // Structure conflicts carry no content (the version fields are
        // empty placeholders). They only pick a winning side, which the
        // reconciler materializes; every write path below would clobber a
        // real file with those placeholders, regardless of policy.
        let outcome = if conflict.conflict_type == ConflictType::Structure {
            self.timestamp_winner(conflict)
        } else if !conflict.is_resolvable {
            self.backup_both(conflict).await?
        } else {
            match self.policy {
                ResolutionPolicy::Auto => self.resolve_auto(conflict).await?,
                ResolutionPolicy::Manual => self.resolve_manual(conflict).await?,
                ResolutionPolicy::Backup => self.backup_both(conflict).await?,
            }
        };

        if let Some(events) = &self.events {
            events.publish(EngineEvent::ConflictResolved {
                path: conflict.file_path.clone(),
                conflict_type: conflict.conflict_type,
            });
        }
        Ok(outcome)
    }

    async fn resolve_auto(&self, conflict: &ConflictInfo) -> Result<ResolutionOutcome> {
        if let Some(merged) = heuristic_merge(&conflict.local_version, &conflict.remote_version) {
            self.fs.write(&conflict.file_path, merged.as_bytes()).await?;
            tracing::info!("Merged conflicting versions of {}", conflict.file_path);
            self.notifier
                .notify(&format!("Merged changes in {}", conflict.file_path));
            return Ok(ResolutionOutcome::Merged);
        }

        // Merge impossible: later timestamp wins, loser goes to a backup
        // named with the loser's own timestamp.
        let winner = self.timestamp_winner(conflict);
        let (winning, losing, label, loser_ts) = match winner {
            ResolutionOutcome::LocalApplied => (
                &conflict.local_version,
                &conflict.remote_version,
                "remote",
                conflict.remote_timestamp,
            ),
            _ => (
                &conflict.remote_version,
                &conflict.local_version,
                "local",
                conflict.local_timestamp,
            ),
        };

        let backup = backup_path(&conflict.file_path, label, loser_ts);
        self.fs.write(&backup, losing.as_bytes()).await?;
        self.fs
            .write(&conflict.file_path, winning.as_bytes())
            .await?;

        self.notifier.notify(&format!(
            "Conflict in {}: kept the newer version, older version saved as {}",
            conflict.file_path, backup
        ));
        Ok(winner)
    }

    async fn resolve_manual(&self, conflict: &ConflictInfo) -> Result<ResolutionOutcome> {
        let Some(prompt) = &self.prompt else {
            // No way to ask: fall back to preserving everything.
            return self.backup_both(conflict).await;
        };

        match prompt.choose(conflict).await {
            ManualChoice::KeepLocal => {
                self.fs
                    .write(&conflict.file_path, conflict.local_version.as_bytes())
                    .await?;
                Ok(ResolutionOutcome::LocalApplied)
            }
            ManualChoice::KeepRemote => {
                self.fs
                    .write(&conflict.file_path, conflict.remote_version.as_bytes())
                    .await?;
                Ok(ResolutionOutcome::RemoteApplied)
            }
            ManualChoice::AttemptMerge => {
                match heuristic_merge(&conflict.local_version, &conflict.remote_version) {
                    Some(merged) => {
                        self.fs.write(&conflict.file_path, merged.as_bytes()).await?;
                        Ok(ResolutionOutcome::Merged)
                    }
                    None => self.backup_both(conflict).await,
                }
            }
            ManualChoice::CreateBackups => self.backup_both(conflict).await,
        }
    }

    /// Preserve both sides as sibling backups and apply remote to the
    /// canonical path.
    async fn backup_both(&self, conflict: &ConflictInfo) -> Result<ResolutionOutcome> {
        let local_backup = backup_path(&conflict.file_path, "local", conflict.local_timestamp);
        let remote_backup = backup_path(&conflict.file_path, "remote", conflict.remote_timestamp);

        self.fs
            .write(&local_backup, conflict.local_version.as_bytes())
            .await?;
        self.fs
            .write(&remote_backup, conflict.remote_version.as_bytes())
            .await?;
        self.fs
            .write(&conflict.file_path, conflict.remote_version.as_bytes())
            .await?;

        tracing::info!(
            "Preserved both versions of {} as {} and {}",
            conflict.file_path,
            local_backup,
            remote_backup
        );
        self.notifier.notify(&format!(
            "Conflict in {}: both versions kept ({}, {})",
            conflict.file_path, local_backup, remote_backup
        ));
        Ok(ResolutionOutcome::BackedUp)
    }

    fn timestamp_winner(&self, conflict: &ConflictInfo) -> ResolutionOutcome {
        if conflict.local_timestamp >= conflict.remote_timestamp {
            ResolutionOutcome::LocalApplied
        } else {
            ResolutionOutcome::RemoteApplied
        }
    }
}

/// Backup sibling path: `notes/a.md` -> `notes/a.local-123.md`.
pub fn backup_path(path: &str, side: &str, timestamp: u64) -> String {
    match path.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !stem.ends_with('/') => {
            format!("{}.{}-{}.{}", stem, side, timestamp, ext)
        }
        _ => format!("{}.{}-{}", path, side, timestamp),
    }
}
