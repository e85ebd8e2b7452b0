//! Per-user document storage for GitHub connections.
//!
//! One document per user in the `users` collection, keyed by the caller's
//! `sub` claim. Writes either merge fields into the document (creating it if
//! needed) or set and delete fields in a single atomic update. Deleted fields
//! are removed from the document, never written as null.
//!
//! Implementations:
//! - [`SqliteConnectionStore`]: JSON documents in SQLite (production)
//! - [`MemoryConnectionStore`]: in-process map (tests, local runs)

use async_trait::async_trait;
use thiserror::Error;

mod memory;
mod record;
mod sqlite;

pub use memory::MemoryConnectionStore;
pub use record::{fields, Document, UserConnectionRecord};
pub use sqlite::SqliteConnectionStore;

/// Collection holding user documents
pub const USERS_COLLECTION: &str = "users";

/// Store failures. Nothing retries internally.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Backend call failed
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// `update_fields` targeted a document that does not exist
    #[error("document not found for user '{0}'")]
    NotFound(String),
    /// Stored document does not match the record layout
    #[error("stored document is malformed: {0}")]
    Malformed(String),
}

/// Keyed document store for connection records.
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Raw document for a user, or `None` if absent.
    async fn get_document(&self, user_id: &str) -> Result<Option<Document>, StoreError>;

    /// Create the document if absent, otherwise merge `fields` into it.
    /// Fields not named in `fields` are left untouched.
    async fn upsert_merge(&self, user_id: &str, fields: Document) -> Result<(), StoreError>;

    /// Set `set_fields` and remove `delete_fields` on an existing document
    /// as one atomic write.
    async fn update_fields(
        &self,
        user_id: &str,
        set_fields: Document,
        delete_fields: &[&str],
    ) -> Result<(), StoreError>;

    /// Typed connection record for a user, or `None` if absent.
    async fn get(&self, user_id: &str) -> Result<Option<UserConnectionRecord>, StoreError> {
        let Some(document) = self.get_document(user_id).await? else {
            return Ok(None);
        };
        Ok(Some(UserConnectionRecord::from_document(user_id, &document)))
    }
}

/// Merge `fields` into `document`, overwriting existing keys.
pub(crate) fn merge_into(document: &mut Document, fields: Document) {
    for (key, value) in fields {
        document.insert(key, value);
    }
}

/// Apply an update: set first, then remove deleted keys.
pub(crate) fn apply_update(document: &mut Document, set_fields: Document, delete_fields: &[&str]) {
    merge_into(document, set_fields);
    for key in delete_fields {
        document.remove(*key);
    }
}
