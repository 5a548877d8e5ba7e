//! collab-core: client engine for collaborative vault synchronization.
//!
//! This crate provides:
//! - Replicated document sessions over Loro CRDTs
//! - Presence (awareness) tracking at document and vault scope
//! - A durable offline operation queue with ordered replay
//! - Conflict detection and resolution (merge / timestamp / backup)
//! - Vault metadata reconciliation between the local tree and peers
//! - Connection supervision with backoff and open-request coalescing
//! - FileStore, TextSurface and Notifier capability abstractions

pub mod awareness;
pub mod conflict;
pub mod doc;
pub mod events;
pub mod fs;
pub mod identity;
pub mod metadata;
pub mod offline;
pub mod protocol;
pub mod session;
pub mod supervisor;
pub mod surface;

pub use awareness::{AwarenessRecord, AwarenessScope, AwarenessTracker, AwarenessUpdate};
pub use conflict::{ConflictInfo, ConflictResolver, ConflictType, ResolutionPolicy};
pub use doc::SharedDocument;
pub use events::{EngineEvent, EventBus, Subscription};
pub use fs::{FileEntry, FileStat, FileStore, InMemoryFs};
pub use identity::VaultIdentity;
pub use metadata::{MetadataChange, VaultMetadata, VaultMetadataReconciler};
pub use offline::{OfflineOperation, OfflineQueue, OperationKind};
pub use protocol::{WireMessage, MAX_MESSAGE_SIZE};
pub use session::{DocumentSession, SessionSlot};
pub use supervisor::{ClientSession, ConnectionState, ConnectionSupervisor, OpenScheduler};
pub use surface::{Notifier, TextSurface};
