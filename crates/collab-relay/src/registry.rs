//! Server-side vault membership and session bookkeeping.
//!
//! Vault records are created lazily on the first connection referencing a
//! vault id; that first user becomes the owner. Membership grows
//! monotonically. Sessions are owned exclusively by this registry and are
//! evicted by the background sweep once inactive past the timeout.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Sessions idle longer than this are evicted by the sweep.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// A member's role within a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultRole {
    Owner,
    Member,
}

/// One vault's membership.
#[derive(Debug)]
pub struct VaultRecord {
    pub vault_id: String,
    pub owner: String,
    pub members: HashSet<String>,
    pub permissions: HashMap<String, VaultRole>,
}

impl VaultRecord {
    fn new(vault_id: &str, owner: &str) -> Self {
        let mut members = HashSet::new();
        members.insert(owner.to_string());
        let mut permissions = HashMap::new();
        permissions.insert(owner.to_string(), VaultRole::Owner);
        Self {
            vault_id: vault_id.to_string(),
            owner: owner.to_string(),
            members,
            permissions,
        }
    }
}

/// One accepted connection's session state.
#[derive(Debug, Clone)]
pub struct ServerSession {
    pub connection_id: u64,
    pub vault_id: String,
    pub user_id: String,
    pub ip_address: String,
    /// Milliseconds since epoch
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
}

/// Registry of vaults and live sessions.
pub struct ServerSessionRegistry {
    vaults: HashMap<String, VaultRecord>,
    sessions: HashMap<u64, ServerSession>,
}

impl ServerSessionRegistry {
    pub fn new() -> Self {
        Self {
            vaults: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    /// Ensure a vault record exists. Returns true when this call created
    /// it (the caller becomes its owner).
    pub fn register_vault(&mut self, vault_id: &str, owner_id: &str) -> bool {
        if self.vaults.contains_key(vault_id) {
            return false;
        }
        tracing::info!("Vault {} created, owner {}", vault_id, owner_id);
        self.vaults
            .insert(vault_id.to_string(), VaultRecord::new(vault_id, owner_id));
        true
    }

    /// Register an accepted connection's session. Creates the vault lazily
    /// and adds the user to its membership. Returns false if the
    /// connection id is already registered.
    pub fn register_session(
        &mut self,
        connection_id: u64,
        vault_id: &str,
        user_id: &str,
        ip_address: &str,
        now_ms: u64,
    ) -> bool {
        if self.sessions.contains_key(&connection_id) {
            return false;
        }

        self.register_vault(vault_id, user_id);
        let vault = self.vaults.get_mut(vault_id).expect("just ensured");
        if vault.members.insert(user_id.to_string()) {
            vault
                .permissions
                .insert(user_id.to_string(), VaultRole::Member);
            tracing::info!("User {} joined vault {}", user_id, vault_id);
        }

        self.sessions.insert(
            connection_id,
            ServerSession {
                connection_id,
                vault_id: vault_id.to_string(),
                user_id: user_id.to_string(),
                ip_address: ip_address.to_string(),
                created_at_ms: now_ms,
                last_activity_ms: now_ms,
            },
        );
        true
    }

    pub fn session(&self, connection_id: u64) -> Option<&ServerSession> {
        self.sessions.get(&connection_id)
    }

    pub fn vault(&self, vault_id: &str) -> Option<&VaultRecord> {
        self.vaults.get(vault_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Mark activity on a connection (resets its inactivity clock).
    pub fn touch(&mut self, connection_id: u64, now_ms: u64) {
        if let Some(session) = self.sessions.get_mut(&connection_id) {
            session.last_activity_ms = now_ms;
        }
    }

    /// Connection ids of every other session in the same vault.
    pub fn vault_peers(&self, connection_id: u64) -> Vec<u64> {
        let Some(session) = self.sessions.get(&connection_id) else {
            return Vec::new();
        };
        self.sessions
            .values()
            .filter(|s| s.vault_id == session.vault_id && s.connection_id != connection_id)
            .map(|s| s.connection_id)
            .collect()
    }

    /// Live connections currently held by an IP.
    pub fn connections_for_ip(&self, ip_address: &str) -> usize {
        self.sessions
            .values()
            .filter(|s| s.ip_address == ip_address)
            .count()
    }

    /// Remove a connection's session. Vault membership is retained.
    pub fn cleanup(&mut self, connection_id: u64) -> Option<ServerSession> {
        self.sessions.remove(&connection_id)
    }

    /// Evict sessions inactive beyond the timeout. Returns their ids so
    /// the server can close the underlying sockets.
    pub fn sweep_inactive(&mut self, now_ms: u64, timeout: Duration) -> Vec<u64> {
        let timeout_ms = timeout.as_millis() as u64;
        let expired: Vec<u64> = self
            .sessions
            .values()
            .filter(|s| now_ms.saturating_sub(s.last_activity_ms) > timeout_ms)
            .map(|s| s.connection_id)
            .collect();

        for id in &expired {
            if let Some(session) = self.sessions.remove(id) {
                tracing::info!(
                    "Evicted inactive session {} (user {}, vault {})",
                    id,
                    session.user_id,
                    session.vault_id
                );
            }
        }
        expired
    }
}

impl Default for ServerSessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_user_becomes_owner() {
        let mut registry = ServerSessionRegistry::new();

        assert!(registry.register_session(1, "vault-1", "alice", "1.2.3.4", 0));
        assert!(registry.register_session(2, "vault-1", "bob", "5.6.7.8", 0));

        let vault = registry.vault("vault-1").unwrap();
        assert_eq!(vault.owner, "alice");
        assert_eq!(vault.permissions.get("alice"), Some(&VaultRole::Owner));
        assert_eq!(vault.permissions.get("bob"), Some(&VaultRole::Member));
        assert_eq!(vault.members.len(), 2);
    }

    #[test]
    fn test_duplicate_connection_id_rejected() {
        let mut registry = ServerSessionRegistry::new();

        assert!(registry.register_session(1, "vault-1", "alice", "1.2.3.4", 0));
        assert!(!registry.register_session(1, "vault-1", "alice", "1.2.3.4", 0));
    }

    #[test]
    fn test_vault_peers_excludes_self_and_other_vaults() {
        let mut registry = ServerSessionRegistry::new();
        registry.register_session(1, "vault-1", "alice", "1.2.3.4", 0);
        registry.register_session(2, "vault-1", "bob", "5.6.7.8", 0);
        registry.register_session(3, "vault-2", "carol", "9.9.9.9", 0);

        let peers = registry.vault_peers(1);
        assert_eq!(peers, vec![2]);
        assert!(registry.vault_peers(99).is_empty());
    }

    #[test]
    fn test_cleanup_keeps_membership() {
        let mut registry = ServerSessionRegistry::new();
        registry.register_session(1, "vault-1", "alice", "1.2.3.4", 0);

        let session = registry.cleanup(1).unwrap();
        assert_eq!(session.user_id, "alice");
        assert!(registry.session(1).is_none());

        // Membership grows monotonically; disconnecting does not remove it
        assert!(registry.vault("vault-1").unwrap().members.contains("alice"));
    }

    #[test]
    fn test_connections_per_ip() {
        let mut registry = ServerSessionRegistry::new();
        registry.register_session(1, "vault-1", "alice", "1.2.3.4", 0);
        registry.register_session(2, "vault-2", "alice", "1.2.3.4", 0);
        registry.register_session(3, "vault-1", "bob", "5.6.7.8", 0);

        assert_eq!(registry.connections_for_ip("1.2.3.4"), 2);
        assert_eq!(registry.connections_for_ip("5.6.7.8"), 1);
    }

    #[test]
    fn test_sweep_evicts_only_inactive() {
        let mut registry = ServerSessionRegistry::new();
        registry.register_session(1, "vault-1", "alice", "1.2.3.4", 0);
        registry.register_session(2, "vault-1", "bob", "5.6.7.8", 0);

        // Bob stays active
        registry.touch(2, 100_000);

        let timeout = Duration::from_secs(60);
        let evicted = registry.sweep_inactive(100_000, timeout);

        assert_eq!(evicted, vec![1]);
        assert!(registry.session(1).is_none());
        assert!(registry.session(2).is_some());
    }
}
