//! Per-document sync sessions.
//!
//! A `DocumentSession` owns one replicated document's lifecycle: initial
//! sync policy on open, continuous local/remote reconciliation while
//! attached, and a single teardown path that flushes presence. Exactly one
//! session is active per client; the `SessionSlot` enforces that by closing
//! the previous session before the next one attaches.

use crate::awareness::{AwarenessRecord, AwarenessScope, AwarenessTracker, AwarenessUpdate};
use crate::conflict::{ConflictError, ConflictInfo, ConflictResolver, ResolutionOutcome};
use crate::doc::{DocumentError, SharedDocument};
use crate::events::{EngineEvent, EventBus};
use crate::fs::{FileStore, FsError};
use crate::surface::{Notifier, TextSurface};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Conflict resolution failed: {0}")]
    Conflict(#[from] ConflictError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Current time in milliseconds since epoch.
pub fn now_millis() -> u64 {
    use web_time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Invoked after a remote update changed the visible content.
pub type RemoteSyncCallback = Box<dyn Fn(&str) + Send + Sync>;

/// How the initial sync settled the document's starting content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialSync {
    /// Replicated doc was empty; seeded from local content
    SeededFromLocal,
    /// Local was empty; remote content applied directly
    AdoptedRemote,
    /// Both sides had content and differed; went through the resolver
    Resolved(ResolutionOutcome),
    /// Both sides already agreed
    AlreadyConsistent,
}

/// One open document's sync session.
pub struct DocumentSession<F: FileStore, N: Notifier> {
    path: String,
    doc: SharedDocument,
    last_known_content: String,
    fs: F,
    surface: Arc<dyn TextSurface>,
    awareness: Arc<Mutex<AwarenessTracker>>,
    resolver: Arc<ConflictResolver<F, N>>,
    on_remote_sync: Option<RemoteSyncCallback>,
    events: Option<Arc<EventBus>>,
    closed: bool,
}

impl<F: FileStore + Clone, N: Notifier> DocumentSession<F, N> {
    /// Open a session for `path`, settling initial content per policy.
    ///
    /// `initial_remote` is the replicated state delivered by the server's
    /// initial-sync handshake; the caller must not construct a session
    /// until that handshake completes (an unanswered handshake stays in
    /// "connecting" at the supervisor level).
    pub async fn open(
        vault_id: &str,
        path: &str,
        initial_remote: Option<&[u8]>,
        fs: F,
        surface: Arc<dyn TextSurface>,
        awareness: Arc<Mutex<AwarenessTracker>>,
        resolver: Arc<ConflictResolver<F, N>>,
    ) -> Result<(Self, InitialSync)> {
        let doc = match initial_remote {
            Some(bytes) => SharedDocument::from_bytes(vault_id, path, bytes)?,
            None => SharedDocument::new(vault_id, path),
        };

        let local = match surface.get_text(path).await {
            Some(text) => text,
            None => match fs.read(path).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(FsError::NotFound(_)) => String::new(),
                Err(e) => return Err(e.into()),
            },
        };

        let mut session = Self {
            path: path.to_string(),
            doc,
            last_known_content: String::new(),
            fs,
            surface,
            awareness,
            resolver,
            on_remote_sync: None,
            events: None,
            closed: false,
        };

        let outcome = session.settle_initial(&local).await?;
        Ok((session, outcome))
    }

    async fn settle_initial(&mut self, local: &str) -> Result<InitialSync> {
        let remote = self.doc.text();

        let outcome = if self.doc.is_empty() && !local.is_empty() {
            // First writer wins for brand-new shared documents
            self.doc.update_text(local)?;
            self.last_known_content = local.to_string();
            tracing::debug!("Seeded {} from local content", self.path);
            InitialSync::SeededFromLocal
        } else if !remote.is_empty() && local.is_empty() {
            self.apply_content(&remote).await?;
            InitialSync::AdoptedRemote
        } else if !remote.is_empty() && remote != local {
            let local_ts = self
                .fs
                .stat(&self.path)
                .await
                .map(|s| s.mtime_millis)
                .unwrap_or(0);
            // The replicated side is as fresh as this handshake
            let conflict = ConflictInfo::content(
                &self.path,
                local.to_string(),
                remote.clone(),
                local_ts,
                now_millis(),
            );
            let resolution = self.resolver.resolve(&conflict).await?;

            // The resolver wrote the canonical file; converge doc and editor
            let canonical = self.fs.read(&self.path).await?;
            let canonical = String::from_utf8_lossy(&canonical).into_owned();
            self.doc.update_text(&canonical)?;
            self.surface.set_text(&self.path, &canonical).await;
            self.last_known_content = canonical;
            InitialSync::Resolved(resolution)
        } else {
            self.last_known_content = local.to_string();
            InitialSync::AlreadyConsistent
        };

        Ok(outcome)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn doc(&self) -> &SharedDocument {
        &self.doc
    }

    pub fn last_known_content(&self) -> &str {
        &self.last_known_content
    }

    /// Register the remote-sync callback (replaces any previous one).
    pub fn on_remote_sync(&mut self, callback: RemoteSyncCallback) {
        self.on_remote_sync = Some(callback);
    }

    /// Attach the engine event bus; remote updates that change visible
    /// content publish `DocumentSynced`.
    pub fn set_events(&mut self, events: Arc<EventBus>) {
        self.events = Some(events);
    }

    /// Publish presence for this document. Returns the update to broadcast.
    pub fn attach_presence(&self, mut record: AwarenessRecord) -> AwarenessUpdate {
        record.current_file = Some(self.path.clone());
        record.timestamp = now_millis();
        self.awareness
            .lock()
            .unwrap()
            .set_local(AwarenessScope::Document(self.path.clone()), record)
    }

    /// Apply a remote document update. Returns true if visible content
    /// changed (and was propagated to the editor and the file).
    pub async fn apply_remote(&mut self, data: &[u8]) -> Result<bool> {
        if !self.doc.import(data)? {
            return Ok(false);
        }
        let text = self.doc.text();
        if text == self.last_known_content {
            return Ok(false);
        }
        self.apply_content(&text).await?;
        if let Some(callback) = &self.on_remote_sync {
            callback(&text);
        }
        if let Some(events) = &self.events {
            events.publish(EngineEvent::DocumentSynced {
                path: self.path.clone(),
            });
        }
        Ok(true)
    }

    /// Record a local edit. Returns the update bytes to broadcast, or None
    /// if the edit was an echo of the current replicated state.
    pub async fn local_edit(&mut self, new_content: &str) -> Result<Option<Vec<u8>>> {
        let before = self.doc.version();
        if !self.doc.update_text(new_content)? {
            return Ok(None);
        }
        self.last_known_content = new_content.to_string();
        self.fs.write(&self.path, new_content.as_bytes()).await?;
        Ok(Some(self.doc.export_updates(&before)))
    }

    async fn apply_content(&mut self, text: &str) -> Result<()> {
        self.fs.write(&self.path, text.as_bytes()).await?;
        self.surface.set_text(&self.path, text).await;
        self.last_known_content = text.to_string();
        Ok(())
    }

    /// The single teardown path: flush presence and detach. Returns the
    /// awareness removal to broadcast, if a record was present.
    pub fn close(&mut self) -> Option<AwarenessUpdate> {
        if self.closed {
            return None;
        }
        self.closed = true;
        let scope = AwarenessScope::Document(self.path.clone());
        self.awareness.lock().unwrap().clear_local(&scope)
    }
}

impl<F: FileStore, N: Notifier> Drop for DocumentSession<F, N> {
    fn drop(&mut self) {
        // A dropped-but-not-closed session would leave a ghost presence
        // record; clear it here as a backstop.
        if !self.closed {
            let scope = AwarenessScope::Document(self.path.clone());
            self.awareness.lock().unwrap().clear_local(&scope);
        }
    }
}

/// Holds the single active session; opening a new one releases the old.
pub struct SessionSlot<F: FileStore, N: Notifier> {
    current: Option<DocumentSession<F, N>>,
}

impl<F: FileStore + Clone, N: Notifier> SessionSlot<F, N> {
    pub fn new() -> Self {
        Self { current: None }
    }

    pub fn active(&self) -> Option<&DocumentSession<F, N>> {
        self.current.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut DocumentSession<F, N>> {
        self.current.as_mut()
    }

    /// Install a new session, cleanly releasing the previous one first.
    /// Returns the outgoing awareness removal to broadcast, if any.
    pub fn replace(&mut self, session: DocumentSession<F, N>) -> Option<AwarenessUpdate> {
        let removal = self.current.as_mut().and_then(|s| s.close());
        self.current = Some(session);
        removal
    }

    /// Close the active session, if any.
    pub fn close(&mut self) -> Option<AwarenessUpdate> {
        let removal = self.current.as_mut().and_then(|s| s.close());
        self.current = None;
        removal
    }
}

impl<F: FileStore + Clone, N: Notifier> Default for SessionSlot<F, N> {
    fn default() -> Self {
        Self::new()
    }
}
