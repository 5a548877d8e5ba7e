//! Stable vault/user identity, generated once and persisted.
//!
//! Stored as JSON at `.collab/identity.json` inside the vault. The vault id
//! only changes through an explicit `join_vault`, which flags a full merge
//! so the reconciler pushes the entire local tree into the new vault.

use crate::fs::{FileStore, FsError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Directory for engine-private state inside the vault.
pub const COLLAB_DIR: &str = ".collab";

const IDENTITY_FILE: &str = ".collab/identity.json";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Corrupt identity file: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, IdentityError>;

/// Stable identifiers for this client within a vault.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultIdentity {
    /// Shared vault identifier (same for all members)
    pub vault_id: String,
    /// This client's user identifier
    pub user_id: String,
    /// Set after `join_vault` until the first full reconcile completes
    #[serde(default)]
    pub pending_full_merge: bool,
}

impl VaultIdentity {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        Self {
            vault_id: Uuid::new_v4().to_string(),
            user_id: Uuid::new_v4().to_string(),
            pending_full_merge: false,
        }
    }

    /// Load the persisted identity, or generate and persist a new one.
    pub async fn load_or_generate<F: FileStore>(fs: &F) -> Result<Self> {
        if fs.exists(IDENTITY_FILE).await? {
            let bytes = fs.read(IDENTITY_FILE).await?;
            let identity: Self = serde_json::from_slice(&bytes)
                .map_err(|e| IdentityError::Corrupt(e.to_string()))?;
            return Ok(identity);
        }

        let identity = Self::generate();
        identity.save(fs).await?;
        tracing::info!("Generated new vault identity: {}", identity.vault_id);
        Ok(identity)
    }

    /// Persist to disk.
    pub async fn save<F: FileStore>(&self, fs: &F) -> Result<()> {
        fs.mkdir(COLLAB_DIR).await?;
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| IdentityError::Corrupt(e.to_string()))?;
        fs.write(IDENTITY_FILE, &bytes).await?;
        Ok(())
    }

    /// Switch to another vault. Flags a full merge so the next reconcile
    /// pushes every local path into the new vault's metadata.
    pub async fn join_vault<F: FileStore>(&mut self, fs: &F, vault_id: &str) -> Result<()> {
        if vault_id == self.vault_id {
            return Ok(());
        }
        tracing::info!("Joining vault {} (was {})", vault_id, self.vault_id);
        self.vault_id = vault_id.to_string();
        self.pending_full_merge = true;
        self.save(fs).await
    }

    /// Clear the merge flag once the full reconcile has run.
    pub async fn full_merge_done<F: FileStore>(&mut self, fs: &F) -> Result<()> {
        if self.pending_full_merge {
            self.pending_full_merge = false;
            self.save(fs).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;

    #[tokio::test]
    async fn test_identity_survives_restart() {
        let fs = InMemoryFs::new();

        let first = VaultIdentity::load_or_generate(&fs).await.unwrap();
        let second = VaultIdentity::load_or_generate(&fs).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_join_vault_flags_full_merge() {
        let fs = InMemoryFs::new();

        let mut identity = VaultIdentity::load_or_generate(&fs).await.unwrap();
        identity.join_vault(&fs, "shared-team-vault").await.unwrap();

        assert_eq!(identity.vault_id, "shared-team-vault");
        assert!(identity.pending_full_merge);

        // Flag survives a reload
        let reloaded = VaultIdentity::load_or_generate(&fs).await.unwrap();
        assert!(reloaded.pending_full_merge);

        identity.full_merge_done(&fs).await.unwrap();
        let reloaded = VaultIdentity::load_or_generate(&fs).await.unwrap();
        assert!(!reloaded.pending_full_merge);
    }

    #[tokio::test]
    async fn test_join_same_vault_is_noop() {
        let fs = InMemoryFs::new();

        let mut identity = VaultIdentity::load_or_generate(&fs).await.unwrap();
        let vault_id = identity.vault_id.clone();
        identity.join_vault(&fs, &vault_id).await.unwrap();

        assert!(!identity.pending_full_merge);
    }
}
