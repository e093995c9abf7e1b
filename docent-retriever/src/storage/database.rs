//! SQLite connection setup, schema and row decoding.
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE documents (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     title TEXT NOT NULL,
//!     path TEXT NOT NULL,
//!     content TEXT NOT NULL,
//!     embedding BLOB,                  -- f16 whole-document embedding
//!     version INTEGER NOT NULL,        -- starts at 1, +1 per revision
//!     created_at INTEGER NOT NULL,     -- unix seconds
//!     updated_at INTEGER NOT NULL
//! );
//!
//! CREATE TABLE document_history (      -- content replaced by a revision
//!     id, document_id, version, content, changed_by, changed_at
//! );
//!
//! CREATE TABLE hierarchy_nodes (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     document_id INTEGER NOT NULL REFERENCES documents(id),
//!     parent_id INTEGER REFERENCES hierarchy_nodes(id),
//!     title TEXT NOT NULL,
//!     content TEXT NOT NULL,
//!     embedding BLOB NOT NULL,
//!     level INTEGER NOT NULL,          -- 1..=6
//!     seq INTEGER NOT NULL,            -- unique per document
//! );
//!
//! CREATE TABLE relationships (source_id, target_id, kind, strength);
//! CREATE TABLE keywords (node_id, term, importance, embedding);
//! CREATE TABLE embedding_models (model_id, dimension, normalized, registered_at);
//! ```
//!
//! Embeddings are stored as raw native-endian `f16` bytes.

use super::{
    Document, HierarchyNode, HistoryEntry, Keyword, RelationshipEdge, StorageError, StorageResult,
};
use chrono::{DateTime, Utc};
use half::f16;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of the database file created inside the base directory.
pub const DATABASE_FILE: &str = ".docent.db";

/// Handle to the index database.
#[derive(Clone, Debug)]
pub struct Database {
    path: Option<PathBuf>,
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database file at `path`.
    pub async fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await?;
        Self::new_with_pool(Some(path.to_path_buf()), pool).await
    }

    /// Opens a private in-memory database, for tests.
    ///
    /// Every connection to `sqlite::memory:` is a separate database, so the pool
    /// holds exactly one connection and never recycles it.
    pub async fn open_memory() -> StorageResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true))
            .await?;
        Self::new_with_pool(None, pool).await
    }

    async fn new_with_pool(path: Option<PathBuf>, pool: SqlitePool) -> StorageResult<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { path, pool })
    }

    async fn create_tables(pool: &SqlitePool) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                path TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB,
                version INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL,
                version INTEGER NOT NULL,
                content TEXT NOT NULL,
                changed_by TEXT,
                changed_at INTEGER NOT NULL,
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hierarchy_nodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL,
                parent_id INTEGER,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                level INTEGER NOT NULL CHECK (level BETWEEN 1 AND 6),
                seq INTEGER NOT NULL,
                CONSTRAINT unique_node_seq UNIQUE(document_id, seq),
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE,
                FOREIGN KEY (parent_id) REFERENCES hierarchy_nodes(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relationships (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id INTEGER NOT NULL,
                target_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                strength REAL NOT NULL CHECK (strength >= 0.0 AND strength <= 1.0),
                FOREIGN KEY (source_id) REFERENCES hierarchy_nodes(id) ON DELETE CASCADE,
                FOREIGN KEY (target_id) REFERENCES hierarchy_nodes(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS keywords (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id INTEGER NOT NULL,
                term TEXT NOT NULL,
                importance REAL NOT NULL,
                embedding BLOB NOT NULL,
                FOREIGN KEY (node_id) REFERENCES hierarchy_nodes(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embedding_models (
                model_id TEXT PRIMARY KEY,
                dimension INTEGER NOT NULL,
                normalized BOOLEAN NOT NULL DEFAULT FALSE,
                registered_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_history_document ON document_history(document_id, version)",
            "CREATE INDEX IF NOT EXISTS idx_nodes_document ON hierarchy_nodes(document_id, seq)",
            "CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_id, strength)",
            "CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_id)",
            "CREATE INDEX IF NOT EXISTS idx_keywords_node ON keywords(node_id)",
            "CREATE INDEX IF NOT EXISTS idx_keywords_term ON keywords(term)",
        ] {
            sqlx::query(statement).execute(pool).await?;
        }

        Ok(())
    }

    /// Get the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Path of the database file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Encodes an embedding for a BLOB column.
pub fn encode_embedding(embedding: &[f16]) -> &[u8] {
    bytemuck::cast_slice::<f16, u8>(embedding)
}

/// Decodes a BLOB column written by [`encode_embedding`].
///
/// Copies pairwise instead of casting because SQLite buffers carry no
/// alignment guarantee.
pub fn decode_embedding(table: &'static str, id: i64, bytes: &[u8]) -> StorageResult<Vec<f16>> {
    if bytes.len() % 2 != 0 {
        return Err(StorageError::CorruptEmbedding {
            table,
            id,
            len: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| f16::from_ne_bytes([pair[0], pair[1]]))
        .collect())
}

pub fn timestamp(secs: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StorageError::InvalidRecord(format!("timestamp {secs} out of range")))
}

pub(crate) const DOCUMENT_COLUMNS: &str =
    "id, title, path, content, embedding, version, created_at, updated_at";

pub(crate) fn document_from_row(row: &SqliteRow) -> StorageResult<Document> {
    let id: i64 = row.try_get("id")?;
    let embedding = row
        .try_get::<Option<Vec<u8>>, _>("embedding")?
        .map(|bytes| decode_embedding("documents", id, &bytes))
        .transpose()?;
    Ok(Document {
        id,
        title: row.try_get("title")?,
        path: row.try_get("path")?,
        content: row.try_get("content")?,
        embedding,
        version: row.try_get("version")?,
        created_at: timestamp(row.try_get("created_at")?)?,
        updated_at: timestamp(row.try_get("updated_at")?)?,
    })
}

pub(crate) fn history_from_row(row: &SqliteRow) -> StorageResult<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        version: row.try_get("version")?,
        content: row.try_get("content")?,
        changed_by: row.try_get("changed_by")?,
        changed_at: timestamp(row.try_get("changed_at")?)?,
    })
}

pub(crate) const NODE_COLUMNS: &str =
    "n.id, n.document_id, n.parent_id, n.title, n.content, n.embedding, n.level, n.seq";

pub(crate) fn node_from_row(row: &SqliteRow) -> StorageResult<HierarchyNode> {
    let id: i64 = row.try_get("id")?;
    let bytes: Vec<u8> = row.try_get("embedding")?;
    let level: i64 = row.try_get("level")?;
    let seq: i64 = row.try_get("seq")?;
    Ok(HierarchyNode {
        id,
        document_id: row.try_get("document_id")?,
        parent_id: row.try_get("parent_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        embedding: decode_embedding("hierarchy_nodes", id, &bytes)?,
        level: u8::try_from(level)
            .map_err(|_| StorageError::InvalidRecord(format!("node {id} has level {level}")))?,
        seq: u32::try_from(seq)
            .map_err(|_| StorageError::InvalidRecord(format!("node {id} has seq {seq}")))?,
    })
}

pub(crate) fn edge_from_row(row: &SqliteRow) -> StorageResult<RelationshipEdge> {
    let kind: String = row.try_get("edge_kind")?;
    let strength: f64 = row.try_get("edge_strength")?;
    Ok(RelationshipEdge {
        id: row.try_get("edge_id")?,
        source_id: row.try_get("edge_source_id")?,
        target_id: row.try_get("edge_target_id")?,
        kind: kind.parse()?,
        strength: strength as f32,
    })
}

pub(crate) fn keyword_from_row(row: &SqliteRow) -> StorageResult<Keyword> {
    let id: i64 = row.try_get("keyword_id")?;
    let bytes: Vec<u8> = row.try_get("keyword_embedding")?;
    let importance: f64 = row.try_get("keyword_importance")?;
    Ok(Keyword {
        id,
        node_id: row.try_get("keyword_node_id")?,
        term: row.try_get("keyword_term")?,
        importance: importance as f32,
        embedding: decode_embedding("keywords", id, &bytes)?,
    })
}
