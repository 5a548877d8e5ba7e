//! SharedDocument: replicated wrapper for a single document's text.
//!
//! Each open document is a Loro document with a single `content` LoroText.
//! Documents are addressed as `{vaultId}/{relativePath}` so one relay can
//! host many vaults without collisions.

use loro::{ExportMode, LoroDoc, LoroText, UpdateOptions, VersionVector};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("CRDT error: {0}")]
    Crdt(String),
}

pub type Result<T> = std::result::Result<T, DocumentError>;

/// Build the replicated document name for a path within a vault.
pub fn doc_name(vault_id: &str, path: &str) -> String {
    format!("{}/{}", vault_id, path)
}

/// The vault-wide metadata document name.
pub fn metadata_doc_name(vault_id: &str) -> String {
    format!("{}/vault-metadata", vault_id)
}

/// A single document's replicated text state.
pub struct SharedDocument {
    doc: LoroDoc,
    name: String,
}

impl SharedDocument {
    /// Create an empty document addressed as `{vault_id}/{path}`.
    pub fn new(vault_id: &str, path: &str) -> Self {
        Self {
            doc: LoroDoc::new(),
            name: doc_name(vault_id, path),
        }
    }

    /// Create a document by importing existing replicated bytes.
    pub fn from_bytes(vault_id: &str, path: &str, bytes: &[u8]) -> Result<Self> {
        let doc = LoroDoc::new();
        doc.import(bytes)
            .map_err(|e| DocumentError::Crdt(e.to_string()))?;
        Ok(Self {
            doc,
            name: doc_name(vault_id, path),
        })
    }

    /// The replicated document name (`{vaultId}/{path}`).
    pub fn name(&self) -> &str {
        &self.name
    }

    fn content(&self) -> LoroText {
        self.doc.get_text("content")
    }

    /// Current text content.
    pub fn text(&self) -> String {
        self.content().to_string()
    }

    /// Whether the replicated content is empty.
    pub fn is_empty(&self) -> bool {
        self.content().is_empty()
    }

    /// Update the content by computing and applying a line-based diff.
    ///
    /// Returns false when the text is already identical (no ops produced,
    /// which keeps sync echoes from looping).
    pub fn update_text(&self, new_content: &str) -> Result<bool> {
        let content = self.content();
        if content.to_string() == new_content {
            return Ok(false);
        }

        content
            .update_by_line(new_content, UpdateOptions::default())
            .map_err(|e| DocumentError::Crdt(format!("{:?}", e)))?;
        self.doc.commit();
        Ok(true)
    }

    /// Current version vector.
    pub fn version(&self) -> VersionVector {
        self.doc.state_vv()
    }

    /// Export a full snapshot.
    pub fn export_snapshot(&self) -> Vec<u8> {
        self.doc
            .export(ExportMode::Snapshot)
            .expect("snapshot export cannot fail")
    }

    /// Export updates since a version.
    pub fn export_updates(&self, from: &VersionVector) -> Vec<u8> {
        self.doc
            .export(ExportMode::updates(from))
            .expect("update export cannot fail")
    }

    /// Import replicated data. Returns true if the document changed.
    pub fn import(&mut self, data: &[u8]) -> Result<bool> {
        let before = self.doc.state_vv();
        self.doc
            .import(data)
            .map_err(|e| DocumentError::Crdt(e.to_string()))?;
        Ok(self.doc.state_vv() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_names() {
        assert_eq!(doc_name("vault-1", "notes/a.md"), "vault-1/notes/a.md");
        assert_eq!(metadata_doc_name("vault-1"), "vault-1/vault-metadata");
    }

    #[test]
    fn test_update_and_sync() {
        let a = SharedDocument::new("v", "a.md");
        a.update_text("line1\nline2").unwrap();

        let mut b = SharedDocument::new("v", "a.md");
        b.import(&a.export_snapshot()).unwrap();

        assert_eq!(b.text(), "line1\nline2");
    }

    #[test]
    fn test_update_text_no_change() {
        let doc = SharedDocument::new("v", "a.md");
        doc.update_text("hello").unwrap();

        assert!(!doc.update_text("hello").unwrap());
        assert_eq!(doc.text(), "hello");
    }

    #[test]
    fn test_concurrent_edits_converge() {
        let base = SharedDocument::new("v", "a.md");
        base.update_text("shared base\n").unwrap();
        let snapshot = base.export_snapshot();

        let mut a = SharedDocument::from_bytes("v", "a.md", &snapshot).unwrap();
        let mut b = SharedDocument::from_bytes("v", "a.md", &snapshot).unwrap();

        a.update_text("shared base\nfrom a\n").unwrap();
        b.update_text("shared base\nfrom b\n").unwrap();

        // Exchange updates in opposite orders
        let ua = a.export_snapshot();
        let ub = b.export_snapshot();
        a.import(&ub).unwrap();
        b.import(&ua).unwrap();

        assert_eq!(a.text(), b.text());
        assert!(a.text().contains("from a"));
        assert!(a.text().contains("from b"));
    }

    #[test]
    fn test_import_is_idempotent() {
        let a = SharedDocument::new("v", "a.md");
        a.update_text("content").unwrap();
        let snapshot = a.export_snapshot();

        let mut b = SharedDocument::new("v", "a.md");
        assert!(b.import(&snapshot).unwrap());
        assert!(!b.import(&snapshot).unwrap());
    }
}
