//! End-to-end properties across simulated clients: convergence under
//! reordered delivery, presence hygiene on document switches, and the
//! offline -> reconnect -> replay cycle.

use collab_core::awareness::{AwarenessRecord, AwarenessScope, AwarenessTracker};
use collab_core::conflict::{ConflictResolver, ResolutionPolicy};
use collab_core::fs::{FileStore, InMemoryFs};
use collab_core::metadata::{VaultMetadata, VaultMetadataReconciler};
use collab_core::offline::{
    ApplyOutcome, OfflineOperation, OfflineQueue, OperationApplier, OperationKind,
};
use collab_core::session::DocumentSession;
use collab_core::surface::{BufferSurface, RecordingNotifier, TextSurface};
use collab_core::SharedDocument;
use std::sync::{Arc, Mutex};

struct Client {
    fs: Arc<InMemoryFs>,
    surface: Arc<BufferSurface>,
    awareness: Arc<Mutex<AwarenessTracker>>,
    resolver: Arc<ConflictResolver<Arc<InMemoryFs>, RecordingNotifier>>,
}

impl Client {
    fn new(client_id: u64) -> Self {
        let fs = Arc::new(InMemoryFs::new());
        Self {
            surface: Arc::new(BufferSurface::new()),
            awareness: Arc::new(Mutex::new(AwarenessTracker::new(client_id))),
            resolver: Arc::new(ConflictResolver::new(
                Arc::clone(&fs),
                RecordingNotifier::new(),
                ResolutionPolicy::Auto,
            )),
            fs,
        }
    }

    async fn open(
        &self,
        path: &str,
        initial_remote: Option<&[u8]>,
    ) -> DocumentSession<Arc<InMemoryFs>, RecordingNotifier> {
        DocumentSession::open(
            "vault-1",
            path,
            initial_remote,
            Arc::clone(&self.fs),
            Arc::clone(&self.surface) as Arc<dyn TextSurface>,
            Arc::clone(&self.awareness),
            Arc::clone(&self.resolver),
        )
        .await
        .unwrap()
        .0
    }
}

fn presence(user: &str, ts: u64) -> AwarenessRecord {
    let mut record = AwarenessRecord::new(user, user);
    record.timestamp = ts;
    record
}

#[tokio::test]
async fn clients_converge_under_reordered_delivery() {
    let alice = Client::new(1);
    let bob = Client::new(2);

    // Alice seeds the document, Bob joins from her snapshot
    alice.fs.write("notes/plan.md", b"# Plan\n").await.unwrap();
    let mut session_a = alice.open("notes/plan.md", None).await;
    let mut session_b = bob
        .open("notes/plan.md", Some(&session_a.doc().export_snapshot()))
        .await;

    // Three edits on each side while updates are in flight
    let mut updates_a = Vec::new();
    for line in ["# Plan\n- alice 1\n", "# Plan\n- alice 1\n- alice 2\n"] {
        if let Some(update) = session_a.local_edit(line).await.unwrap() {
            updates_a.push(update);
        }
    }
    let mut updates_b = Vec::new();
    for line in ["# Plan\n- bob 1\n", "# Plan\n- bob 1\n- bob 2\n"] {
        if let Some(update) = session_b.local_edit(line).await.unwrap() {
            updates_b.push(update);
        }
    }

    // Deliver in opposite orders (network reordering)
    for update in updates_b.iter().rev() {
        session_a.apply_remote(update).await.unwrap();
    }
    for update in updates_a.iter() {
        session_b.apply_remote(update).await.unwrap();
    }

    assert_eq!(session_a.doc().text(), session_b.doc().text());
    let text = session_a.doc().text();
    assert!(text.contains("alice 2"));
    assert!(text.contains("bob 2"));

    // Editor and file caught up on both sides
    assert_eq!(
        alice.fs.read("notes/plan.md").await.unwrap(),
        text.as_bytes()
    );
    assert_eq!(
        bob.surface.get_text("notes/plan.md").await.as_deref(),
        Some(text.as_str())
    );
}

#[tokio::test]
async fn switching_documents_leaves_no_ghost_presence() {
    let alice = Client::new(1);
    let bob = Client::new(2);

    let mut session = alice.open("a.md", None).await;
    let update = session.attach_presence(presence("alice", 100));
    bob.awareness.lock().unwrap().apply_remote(update);

    let scope_a = AwarenessScope::Document("a.md".into());
    assert!(bob.awareness.lock().unwrap().contains(&scope_a, 1));

    // Alice switches to b.md: the close broadcasts a removal
    let removal = session.close().expect("presence was set");
    bob.awareness.lock().unwrap().apply_remote(removal);

    let mut session = alice.open("b.md", None).await;
    let update = session.attach_presence(presence("alice", 200));
    bob.awareness.lock().unwrap().apply_remote(update);

    let bob_awareness = bob.awareness.lock().unwrap();
    assert!(!bob_awareness.contains(&scope_a, 1));
    assert!(bob_awareness.contains(&AwarenessScope::Document("b.md".into()), 1));
}

struct FsApplier {
    fs: Arc<InMemoryFs>,
}

#[async_trait::async_trait]
impl OperationApplier for FsApplier {
    async fn apply(&mut self, op: &OfflineOperation) -> Result<ApplyOutcome, String> {
        match op.kind {
            OperationKind::Create => {
                if self.fs.exists(&op.path).await.map_err(|e| e.to_string())? {
                    return Ok(ApplyOutcome::AlreadySatisfied);
                }
                let content = op.content.as_deref().unwrap_or("");
                self.fs
                    .write(&op.path, content.as_bytes())
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(ApplyOutcome::Applied)
            }
            OperationKind::Delete => {
                if !self.fs.exists(&op.path).await.map_err(|e| e.to_string())? {
                    return Ok(ApplyOutcome::AlreadySatisfied);
                }
                self.fs.delete(&op.path).await.map_err(|e| e.to_string())?;
                Ok(ApplyOutcome::Applied)
            }
            _ => Ok(ApplyOutcome::AlreadySatisfied),
        }
    }
}

#[tokio::test]
async fn offline_queue_survives_restart_and_replays_in_order() {
    let fs = Arc::new(InMemoryFs::new());

    // Session one: edits made while disconnected
    {
        let mut queue = OfflineQueue::load(Arc::clone(&fs), "vault-1").await.unwrap();
        queue
            .enqueue(
                OfflineOperation::new(OperationKind::Create, "draft.md", "alice", 100)
                    .with_content("v1"),
            )
            .await
            .unwrap();
        queue
            .enqueue(OfflineOperation::new(
                OperationKind::Delete,
                "draft.md",
                "alice",
                200,
            ))
            .await
            .unwrap();
    }

    // Process restart: reload from disk, then connectivity returns
    let mut queue = OfflineQueue::load(Arc::clone(&fs), "vault-1").await.unwrap();
    assert_eq!(queue.size(), 2);

    let mut applier = FsApplier { fs: Arc::clone(&fs) };
    let report = queue.set_connected(true, &mut applier).await.unwrap();

    // Create ran before delete, so the file ends up gone
    assert_eq!(report.applied, 2);
    assert!(report.halted_at.is_none());
    assert!(!fs.exists("draft.md").await.unwrap());
    assert_eq!(queue.size(), 0);
}

#[tokio::test]
async fn reconnect_reconciles_both_directions() {
    // While client X was offline, it created a file locally and a peer
    // added one to the shared metadata.
    let fs = Arc::new(InMemoryFs::new());
    fs.write("offline-note.md", b"written offline").await.unwrap();

    let peer_metadata = VaultMetadata::new("vault-1");
    peer_metadata.add_path("peer-note.md").unwrap();

    let mut metadata = VaultMetadata::new("vault-1");
    metadata.import(&peer_metadata.export_snapshot()).unwrap();

    let mut reconciler =
        VaultMetadataReconciler::new(Arc::clone(&fs), RecordingNotifier::new(), metadata);

    let report = reconciler
        .reconcile(&["offline-note.md".into()], &[])
        .await
        .unwrap();

    assert_eq!(report.pushed, vec!["offline-note.md"]);
    assert_eq!(report.pulled, vec!["peer-note.md"]);
    assert!(report.conflicts.is_empty());
    assert!(fs.exists("peer-note.md").await.unwrap());

    // The push is visible to the peer after the next metadata exchange
    let mut peer_metadata = peer_metadata;
    peer_metadata
        .import(&reconciler.metadata.export_snapshot())
        .unwrap();
    assert!(peer_metadata.contains_path("offline-note.md"));
}

#[tokio::test]
async fn divergence_while_offline_resolves_on_reopen() {
    // Both clients edited notes/a.md from the same base while disconnected.
    let base = SharedDocument::new("vault-1", "notes/a.md");
    base.update_text("base\n").unwrap();
    let snapshot = base.export_snapshot();

    let remote = {
        let mut doc = SharedDocument::new("vault-1", "notes/a.md");
        doc.import(&snapshot).unwrap();
        doc.update_text("base\nremote addition\n").unwrap();
        doc
    };

    let client = Client::new(1);
    client
        .fs
        .write("notes/a.md", b"base\nlocal addition\n")
        .await
        .unwrap();

    // Reopening against the remote state routes through the resolver
    let session = client
        .open("notes/a.md", Some(&remote.export_snapshot()))
        .await;

    let text = session.doc().text();
    assert!(text.contains("local addition"));
    assert!(text.contains("remote addition"));
    assert_eq!(
        client.fs.read("notes/a.md").await.unwrap(),
        text.as_bytes()
    );
}
