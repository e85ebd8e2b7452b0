use super::{apply_update, merge_into, ConnectionStore, Document, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-process document store.
///
/// Same semantics as the SQLite store. Each write holds the shard lock for
/// its key, so an update is atomic per user. Counts writes so callers can
/// assert that a flow did not touch storage.
#[derive(Debug, Default)]
pub struct MemoryConnectionStore {
    documents: DashMap<String, Document>,
    writes: AtomicUsize,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document directly (does not count as a write).
    pub fn insert_document(&self, user_id: &str, document: Document) {
        self.documents.insert(user_id.to_string(), document);
    }

    /// Snapshot of a stored document.
    pub fn document(&self, user_id: &str) -> Option<Document> {
        self.documents.get(user_id).map(|doc| doc.value().clone())
    }

    /// Number of successful writes since creation.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn get_document(&self, user_id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.document(user_id))
    }

    async fn upsert_merge(&self, user_id: &str, fields: Document) -> Result<(), StoreError> {
        let mut entry = self.documents.entry(user_id.to_string()).or_default();
        merge_into(entry.value_mut(), fields);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_fields(
        &self,
        user_id: &str,
        set_fields: Document,
        delete_fields: &[&str],
    ) -> Result<(), StoreError> {
        let mut entry = self
            .documents
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;
        apply_update(entry.value_mut(), set_fields, delete_fields);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
