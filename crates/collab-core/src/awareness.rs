//! Presence (awareness) tracking at document and vault scope.
//!
//! Awareness is ephemeral: absence of a record means the user is not
//! present. A session MUST clear its local record when it closes or
//! switches documents — a record left behind is a ghost entry, and the
//! tracker treats that as a bug, not a tolerated state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Presence palette shared by all clients so colors are stable per pick.
const PRESENCE_COLORS: &[(&str, &str)] = &[
    ("#30bced", "#30bced33"),
    ("#6eeb83", "#6eeb8333"),
    ("#ffbc42", "#ffbc4233"),
    ("#ecd444", "#ecd44433"),
    ("#ee6352", "#ee635233"),
    ("#9ac2c9", "#9ac2c933"),
    ("#8acb88", "#8acb8833"),
    ("#1be7ff", "#1be7ff33"),
];

/// Pick a random presence color pair (color, light variant).
pub fn random_color() -> (&'static str, &'static str) {
    use rand::Rng;
    let idx = rand::rng().random_range(0..PRESENCE_COLORS.len());
    PRESENCE_COLORS[idx]
}

/// One user's ephemeral presence record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AwarenessRecord {
    pub user_id: String,
    pub name: String,
    pub color: String,
    pub color_light: String,
    /// Path the user currently has open, if any
    pub current_file: Option<String>,
    /// Milliseconds since epoch; disambiguates reconnection races
    pub timestamp: u64,
}

impl AwarenessRecord {
    /// Build a record for a user with a randomly assigned palette color.
    /// The caller fills in `current_file` and `timestamp` when attaching.
    pub fn new(user_id: &str, name: &str) -> Self {
        let (color, color_light) = random_color();
        Self {
            user_id: user_id.to_string(),
            name: name.to_string(),
            color: color.to_string(),
            color_light: color_light.to_string(),
            current_file: None,
            timestamp: 0,
        }
    }
}

/// Scope an awareness update applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AwarenessScope {
    /// Visible to clients viewing one document
    Document(String),
    /// Visible to every client in the vault
    Vault,
}

/// Tracks local and remote presence for one client.
///
/// Remote records are keyed by the per-connection client id of their
/// origin, so two tabs of the same user show up separately and a record
/// can be removed precisely when its connection goes away.
pub struct AwarenessTracker {
    /// Our per-connection client id
    client_id: u64,
    /// Our record per scope (at most one per scope)
    local: HashMap<AwarenessScope, AwarenessRecord>,
    /// Remote records per scope, keyed by origin client id
    remote: HashMap<AwarenessScope, HashMap<u64, AwarenessRecord>>,
}

/// A change produced by `set_local`/`clear_local`, ready to broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwarenessUpdate {
    pub client_id: u64,
    pub scope: AwarenessScope,
    /// None means the record was cleared
    pub record: Option<AwarenessRecord>,
}

impl AwarenessTracker {
    pub fn new(client_id: u64) -> Self {
        Self {
            client_id,
            local: HashMap::new(),
            remote: HashMap::new(),
        }
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Set our record for a scope. Returns the update to broadcast.
    pub fn set_local(&mut self, scope: AwarenessScope, record: AwarenessRecord) -> AwarenessUpdate {
        self.local.insert(scope.clone(), record.clone());
        AwarenessUpdate {
            client_id: self.client_id,
            scope,
            record: Some(record),
        }
    }

    /// Clear our record for a scope. Must be called before a session
    /// detaches from a document. Returns the removal to broadcast, or None
    /// if there was nothing to clear.
    pub fn clear_local(&mut self, scope: &AwarenessScope) -> Option<AwarenessUpdate> {
        self.local.remove(scope)?;
        Some(AwarenessUpdate {
            client_id: self.client_id,
            scope: scope.clone(),
            record: None,
        })
    }

    /// All local updates, for re-publishing after a reconnect.
    pub fn local_updates(&self) -> Vec<AwarenessUpdate> {
        self.local
            .iter()
            .map(|(scope, record)| AwarenessUpdate {
                client_id: self.client_id,
                scope: scope.clone(),
                record: Some(record.clone()),
            })
            .collect()
    }

    /// Apply a remote update. Last write wins, decided by timestamp; an
    /// update older than the stored record is dropped. Records travel
    /// whole over the wire with a single timestamp covering every field,
    /// so replacing the record wholesale and merging it field by field
    /// yield the same result. Returns true if the visible state changed.
    pub fn apply_remote(&mut self, update: AwarenessUpdate) -> bool {
        if update.client_id == self.client_id {
            return false; // Our own echo
        }

        let scope_map = self.remote.entry(update.scope).or_default();
        match update.record {
            Some(record) => {
                if let Some(existing) = scope_map.get(&update.client_id) {
                    if existing.timestamp > record.timestamp {
                        return false;
                    }
                    if *existing == record {
                        return false;
                    }
                }
                scope_map.insert(update.client_id, record);
                true
            }
            None => scope_map.remove(&update.client_id).is_some(),
        }
    }

    /// Drop every record originating from a disconnected client.
    pub fn forget_client(&mut self, client_id: u64) {
        for scope_map in self.remote.values_mut() {
            scope_map.remove(&client_id);
        }
    }

    /// User id behind a remote record, if one is present.
    pub fn remote_user(&self, scope: &AwarenessScope, client_id: u64) -> Option<String> {
        self.remote
            .get(scope)?
            .get(&client_id)
            .map(|r| r.user_id.clone())
    }

    /// Remote records currently present in a scope.
    pub fn remote_records(&self, scope: &AwarenessScope) -> Vec<&AwarenessRecord> {
        self.remote
            .get(scope)
            .map(|m| m.values().collect())
            .unwrap_or_default()
    }

    /// Whether a client has a record in a scope (ghost-presence check).
    pub fn contains(&self, scope: &AwarenessScope, client_id: u64) -> bool {
        if client_id == self.client_id {
            return self.local.contains_key(scope);
        }
        self.remote
            .get(scope)
            .map(|m| m.contains_key(&client_id))
            .unwrap_or(false)
    }
}
