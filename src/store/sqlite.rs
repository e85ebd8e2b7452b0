//! Document storage using SQLite.
//!
//! Each user document is a JSON object in one row. Merges and field updates
//! run as read-modify-write inside a single transaction, so a write either
//! fully applies or not at all.

use super::{
    apply_update, merge_into, ConnectionStore, Document, StoreError, USERS_COLLECTION,
};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

/// SQLite-backed document store.
///
/// # Schema
/// ```sql
/// CREATE TABLE documents (
///     collection TEXT NOT NULL,
///     id TEXT NOT NULL,
///     body TEXT NOT NULL,        -- JSON object
///     updated_at TEXT NOT NULL,  -- ISO 8601 timestamp
///     PRIMARY KEY (collection, id)
/// );
/// ```
///
/// The connection is opened on first use and shared afterwards; concurrent
/// first requests wait for a single open instead of racing.
pub struct SqliteConnectionStore {
    path: PathBuf,
    collection: String,
    conn: OnceCell<Mutex<Connection>>,
}

impl SqliteConnectionStore {
    /// Store over the `users` collection in the database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
            collection: USERS_COLLECTION.to_string(),
            conn: OnceCell::new(),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Open the database now instead of on first request.
    pub async fn warm_up(&self) -> Result<(), StoreError> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> Result<&Mutex<Connection>, StoreError> {
        self.conn
            .get_or_try_init(|| async {
                debug!(path = %self.path.display(), "Opening document store");
                open_database(&self.path).map(Mutex::new)
            })
            .await
    }
}

fn open_database(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path).map_err(unavailable("Failed to open database"))?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
        [],
    )
    .map_err(unavailable("Failed to create documents table"))?;

    Ok(conn)
}

fn unavailable(context: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::Unavailable(format!("{}: {}", context, e))
}

fn lock(conn: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    conn.lock()
        .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
}

fn read_document(
    conn: &Connection,
    collection: &str,
    user_id: &str,
) -> Result<Option<Document>, StoreError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, user_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(unavailable("Failed to read document"))?;

    body.map(|raw| match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::Malformed("document body is not an object".to_string())),
        Err(e) => Err(StoreError::Malformed(e.to_string())),
    })
    .transpose()
}

fn write_document(
    tx: &Transaction<'_>,
    collection: &str,
    user_id: &str,
    document: &Document,
) -> Result<(), StoreError> {
    let body = serde_json::to_string(document).map_err(|e| StoreError::Malformed(e.to_string()))?;
    let now = Utc::now().to_rfc3339();

    tx.execute(
        r#"
        INSERT INTO documents (collection, id, body, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(collection, id) DO UPDATE SET
            body = excluded.body,
            updated_at = excluded.updated_at
        "#,
        params![collection, user_id, body, now],
    )
    .map_err(unavailable("Failed to write document"))?;

    Ok(())
}

impl SqliteConnectionStore {
    fn merge_sync(
        &self,
        conn: &Mutex<Connection>,
        user_id: &str,
        fields: Document,
    ) -> Result<(), StoreError> {
        let mut guard = lock(conn)?;
        let tx = guard
            .transaction()
            .map_err(unavailable("Failed to begin transaction"))?;

        let mut document = read_document(&tx, &self.collection, user_id)?.unwrap_or_default();
        merge_into(&mut document, fields);
        write_document(&tx, &self.collection, user_id, &document)?;

        tx.commit().map_err(unavailable("Failed to commit merge"))
    }

    fn update_sync(
        &self,
        conn: &Mutex<Connection>,
        user_id: &str,
        set_fields: Document,
        delete_fields: &[&str],
    ) -> Result<(), StoreError> {
        let mut guard = lock(conn)?;
        let tx = guard
            .transaction()
            .map_err(unavailable("Failed to begin transaction"))?;

        let mut document = read_document(&tx, &self.collection, user_id)?
            .ok_or_else(|| StoreError::NotFound(user_id.to_string()))?;
        apply_update(&mut document, set_fields, delete_fields);
        write_document(&tx, &self.collection, user_id, &document)?;

        tx.commit().map_err(unavailable("Failed to commit update"))
    }
}

#[async_trait]
impl ConnectionStore for SqliteConnectionStore {
    async fn get_document(&self, user_id: &str) -> Result<Option<Document>, StoreError> {
        let conn = self.connection().await?;
        let guard = lock(conn)?;
        read_document(&guard, &self.collection, user_id)
    }

    async fn upsert_merge(&self, user_id: &str, fields: Document) -> Result<(), StoreError> {
        let conn = self.connection().await?;
        self.merge_sync(conn, user_id, fields)
    }

    async fn update_fields(
        &self,
        user_id: &str,
        set_fields: Document,
        delete_fields: &[&str],
    ) -> Result<(), StoreError> {
        let conn = self.connection().await?;
        self.update_sync(conn, user_id, set_fields, delete_fields)
    }
}
