//! Wire protocol between client and relay.
//!
//! Messages are bincode-encoded. The relay treats document payloads as
//! opaque bytes and only routes on the document name; CRDT semantics stay
//! entirely client-side.
//!
//! Sync handshake per document:
//! 1. On open, the client sends `DocRequest` with its current version.
//! 2. The relay (or a peer holding state) answers with `DocState` carrying
//!    everything missing since that version.
//! 3. Thereafter, edits flow as incremental `DocUpdate`s, broadcast to all
//!    other clients of the vault.

use crate::awareness::AwarenessUpdate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard cap on a single wire message. Larger frames are rejected at the
/// socket with close code 1009.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Message too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    TooLarge(usize),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Every message exchanged over a relay connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    /// Request a document's state, carrying our encoded version vector
    /// (empty for a brand-new client).
    DocRequest { doc: String, version: Vec<u8> },

    /// Full or catch-up document state in reply to a `DocRequest`.
    DocState { doc: String, data: Vec<u8> },

    /// Incremental document update to broadcast.
    DocUpdate { doc: String, data: Vec<u8> },

    /// Presence change (set or clear).
    Awareness(AwarenessUpdate),

    /// Vault metadata update (the `{vaultId}/vault-metadata` document).
    MetadataUpdate { data: Vec<u8> },

    /// A peer's connection went away; drop its presence records.
    PeerGone { client_id: u64 },
}

impl WireMessage {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes =
            bincode::serialize(self).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(data.len()));
        }
        bincode::deserialize(data).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// The document this message routes on, if it is document-scoped.
    pub fn doc_name(&self) -> Option<&str> {
        match self {
            WireMessage::DocRequest { doc, .. }
            | WireMessage::DocState { doc, .. }
            | WireMessage::DocUpdate { doc, .. } => Some(doc),
            _ => None,
        }
    }
}
