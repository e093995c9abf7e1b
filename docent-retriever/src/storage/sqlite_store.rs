//! SQLite implementation of the storage traits
//!
//! Vector queries are answered in memory: candidate rows are loaded, scored
//! with cosine similarity and sorted. That is adequate for the expected corpus
//! size (documentation sets, not web crawls).

use super::database::{
    DOCUMENT_COLUMNS, Database, NODE_COLUMNS, document_from_row, edge_from_row, encode_embedding,
    history_from_row, keyword_from_row, node_from_row,
};
use super::{
    CombinedStore, Document, DocumentId, DocumentRevision, DocumentStore, EmbeddingModelMetadata,
    HierarchyDraft, HierarchyNode, HierarchyStore, HistoryEntry, IndexStats, Keyword, KeywordMatch,
    NewDocument, NewEdge, NodeId, ReadSnapshot, RelatedNode, RelationshipEdge, StorageError,
    StorageResult, VectorStore,
};
use async_trait::async_trait;
use docent_embed::vector::cosine_similarity;
use half::f16;
use sqlx::{Row, Sqlite, SqliteConnection, Transaction};
use std::path::Path;

const KEYWORD_COLUMNS: &str = "k.id AS keyword_id, k.node_id AS keyword_node_id, k.term AS keyword_term, \
     k.importance AS keyword_importance, k.embedding AS keyword_embedding";

const EDGE_COLUMNS: &str = "r.id AS edge_id, r.source_id AS edge_source_id, r.target_id AS edge_target_id, \
     r.kind AS edge_kind, r.strength AS edge_strength";

/// SQLite-backed [`CombinedStore`].
#[derive(Clone, Debug)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn open(path: &Path) -> StorageResult<Self> {
        Ok(Self::new(Database::open(path).await?))
    }

    pub async fn open_memory() -> StorageResult<Self> {
        Ok(Self::new(Database::open_memory().await?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Deletes keywords, then edges, then nodes of a document.
    async fn clear_hierarchy(
        tx: &mut Transaction<'_, Sqlite>,
        document_id: DocumentId,
    ) -> StorageResult<()> {
        sqlx::query(
            "DELETE FROM keywords WHERE node_id IN
             (SELECT id FROM hierarchy_nodes WHERE document_id = ?1)",
        )
        .bind(document_id)
        .execute(&mut **tx)
        .await?;

        Self::clear_edges(tx, document_id).await?;

        sqlx::query("DELETE FROM hierarchy_nodes WHERE document_id = ?1")
            .bind(document_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn clear_edges(
        tx: &mut Transaction<'_, Sqlite>,
        document_id: DocumentId,
    ) -> StorageResult<()> {
        sqlx::query(
            "DELETE FROM relationships WHERE source_id IN
             (SELECT id FROM hierarchy_nodes WHERE document_id = ?1)
             OR target_id IN (SELECT id FROM hierarchy_nodes WHERE document_id = ?1)",
        )
        .bind(document_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_edge(tx: &mut Transaction<'_, Sqlite>, edge: &NewEdge) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO relationships (source_id, target_id, kind, strength)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(edge.source_id)
        .bind(edge.target_id)
        .bind(edge.kind.as_str())
        .bind(f64::from(edge.strength.clamp(0.0, 1.0)))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Writes `draft` for a document whose previous hierarchy is already gone.
    async fn write_hierarchy(
        tx: &mut Transaction<'_, Sqlite>,
        document_id: DocumentId,
        draft: &HierarchyDraft,
    ) -> StorageResult<Vec<NodeId>> {
        draft.validate()?;

        let mut ids: Vec<NodeId> = Vec::with_capacity(draft.nodes.len());
        for node in &draft.nodes {
            let parent_id = node.parent.map(|index| ids[index]);
            let result = sqlx::query(
                "INSERT INTO hierarchy_nodes
                 (document_id, parent_id, title, content, embedding, level, seq)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(document_id)
            .bind(parent_id)
            .bind(&node.title)
            .bind(&node.content)
            .bind(encode_embedding(&node.embedding))
            .bind(i64::from(node.level))
            .bind(i64::from(node.seq))
            .execute(&mut **tx)
            .await?;
            let node_id = result.last_insert_rowid();
            ids.push(node_id);

            for keyword in &node.keywords {
                sqlx::query(
                    "INSERT INTO keywords (node_id, term, importance, embedding)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .bind(node_id)
                .bind(&keyword.term)
                .bind(f64::from(keyword.importance))
                .bind(encode_embedding(&keyword.embedding))
                .execute(&mut **tx)
                .await?;
            }
        }

        for edge in &draft.edges {
            let edge = NewEdge {
                source_id: ids[edge.source],
                target_id: ids[edge.target],
                kind: edge.kind,
                strength: edge.strength,
            };
            Self::insert_edge(tx, &edge).await?;
        }

        Ok(ids)
    }

    async fn fetch_document(
        tx: &mut Transaction<'_, Sqlite>,
        id: DocumentId,
    ) -> StorageResult<Document> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StorageError::DocumentNotFound(id))?;
        document_from_row(&row)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert_document(
        &self,
        document: NewDocument,
        hierarchy: &HierarchyDraft,
    ) -> StorageResult<Document> {
        let now = Self::now();
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            "INSERT INTO documents (title, path, content, embedding, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
        )
        .bind(&document.title)
        .bind(&document.path)
        .bind(&document.content)
        .bind(document.embedding.as_deref().map(encode_embedding))
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        Self::write_hierarchy(&mut tx, id, hierarchy).await?;
        let stored = Self::fetch_document(&mut tx, id).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn get_document(&self, id: DocumentId) -> StorageResult<Option<Document>> {
        let mut conn = self.db.pool().acquire().await?;
        read_document(&mut conn, id).await
    }

    async fn list_documents(&self) -> StorageResult<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY id"
        ))
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn revise_document(
        &self,
        id: DocumentId,
        revision: DocumentRevision,
        hierarchy: &HierarchyDraft,
    ) -> StorageResult<Document> {
        let now = Self::now();
        let mut tx = self.db.pool().begin().await?;
        let current = Self::fetch_document(&mut tx, id).await?;

        sqlx::query(
            "INSERT INTO document_history (document_id, version, content, changed_by, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(id)
        .bind(current.version)
        .bind(&current.content)
        .bind(revision.changed_by.as_deref())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE documents SET content = ?1, embedding = ?2, version = version + 1, updated_at = ?3
             WHERE id = ?4",
        )
        .bind(&revision.content)
        .bind(revision.embedding.as_deref().map(encode_embedding))
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        Self::clear_hierarchy(&mut tx, id).await?;
        Self::write_hierarchy(&mut tx, id, hierarchy).await?;

        let stored = Self::fetch_document(&mut tx, id).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn delete_document(&self, id: DocumentId) -> StorageResult<bool> {
        let mut tx = self.db.pool().begin().await?;
        Self::clear_hierarchy(&mut tx, id).await?;
        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn document_history(&self, id: DocumentId) -> StorageResult<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            "SELECT id, document_id, version, content, changed_by, changed_at
             FROM document_history WHERE document_id = ?1 ORDER BY version, id",
        )
        .bind(id)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(history_from_row).collect()
    }
}

#[async_trait]
impl HierarchyStore for SqliteStore {
    async fn replace_hierarchy(
        &self,
        document_id: DocumentId,
        draft: &HierarchyDraft,
    ) -> StorageResult<Vec<NodeId>> {
        let mut tx = self.db.pool().begin().await?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM documents WHERE id = ?1")
            .bind(document_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StorageError::DocumentNotFound(document_id));
        }

        Self::clear_hierarchy(&mut tx, document_id).await?;
        let ids = Self::write_hierarchy(&mut tx, document_id, draft).await?;
        tx.commit().await?;
        Ok(ids)
    }

    async fn document_nodes(&self, document_id: DocumentId) -> StorageResult<Vec<HierarchyNode>> {
        let rows = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM hierarchy_nodes n WHERE n.document_id = ?1 ORDER BY n.seq"
        ))
        .bind(document_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(node_from_row).collect()
    }

    async fn get_node(&self, id: NodeId) -> StorageResult<Option<HierarchyNode>> {
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM hierarchy_nodes n WHERE n.id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    async fn node_keywords(&self, node_id: NodeId) -> StorageResult<Vec<Keyword>> {
        let rows = sqlx::query(&format!(
            "SELECT {KEYWORD_COLUMNS} FROM keywords k WHERE k.node_id = ?1
             ORDER BY k.importance DESC, k.id"
        ))
        .bind(node_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(keyword_from_row).collect()
    }

    async fn document_edges(
        &self,
        document_id: DocumentId,
    ) -> StorageResult<Vec<RelationshipEdge>> {
        let rows = sqlx::query(&format!(
            "SELECT {EDGE_COLUMNS} FROM relationships r
             JOIN hierarchy_nodes n ON n.id = r.source_id
             WHERE n.document_id = ?1 ORDER BY r.id"
        ))
        .bind(document_id)
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(edge_from_row).collect()
    }

    async fn replace_edges(
        &self,
        document_id: DocumentId,
        edges: &[NewEdge],
    ) -> StorageResult<usize> {
        let mut tx = self.db.pool().begin().await?;

        let node_ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM hierarchy_nodes WHERE document_id = ?1")
                .bind(document_id)
                .fetch_all(&mut *tx)
                .await?;
        for edge in edges {
            if !node_ids.contains(&edge.source_id) || !node_ids.contains(&edge.target_id) {
                return Err(StorageError::InvalidRecord(format!(
                    "edge {} -> {} leaves document {document_id}",
                    edge.source_id, edge.target_id
                )));
            }
        }

        Self::clear_edges(&mut tx, document_id).await?;
        for edge in edges {
            Self::insert_edge(&mut tx, edge).await?;
        }
        tx.commit().await?;
        Ok(edges.len())
    }

    async fn related_nodes(&self, node_id: NodeId, limit: usize) -> StorageResult<Vec<RelatedNode>> {
        let mut conn = self.db.pool().acquire().await?;
        read_related(&mut conn, node_id, limit).await
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn search_nodes(
        &self,
        query: &[f16],
        limit: usize,
    ) -> StorageResult<Vec<(HierarchyNode, f32)>> {
        let mut conn = self.db.pool().acquire().await?;
        rank_nodes(&mut conn, query, limit).await
    }

    async fn search_keywords(
        &self,
        fragment: &str,
        query: &[f16],
        limit: usize,
    ) -> StorageResult<Vec<KeywordMatch>> {
        let mut conn = self.db.pool().acquire().await?;
        rank_keywords(&mut conn, fragment, query, limit).await
    }
}

#[async_trait]
impl CombinedStore for SqliteStore {
    async fn register_embedding_model(&self, model: &EmbeddingModelMetadata) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO embedding_models (model_id, dimension, normalized, registered_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(model_id) DO UPDATE SET
                dimension = excluded.dimension,
                normalized = excluded.normalized
            "#,
        )
        .bind(&model.model_id)
        .bind(model.dimension as i64)
        .bind(model.normalized)
        .bind(Self::now())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn embedding_models(&self) -> StorageResult<Vec<EmbeddingModelMetadata>> {
        let rows = sqlx::query(
            "SELECT model_id, dimension, normalized FROM embedding_models
             ORDER BY registered_at, model_id",
        )
        .fetch_all(self.db.pool())
        .await?;
        rows.iter()
            .map(|row| {
                let dimension: i64 = row.try_get("dimension")?;
                Ok(EmbeddingModelMetadata {
                    model_id: row.try_get("model_id")?,
                    dimension: dimension as usize,
                    normalized: row.try_get("normalized")?,
                })
            })
            .collect()
    }

    async fn stats(&self) -> StorageResult<IndexStats> {
        let pool = self.db.pool();
        let count = |table: &'static str| {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            async move {
                let n: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
                Ok::<usize, StorageError>(n as usize)
            }
        };

        Ok(IndexStats {
            documents_count: count("documents").await?,
            nodes_count: count("hierarchy_nodes").await?,
            edges_count: count("relationships").await?,
            keywords_count: count("keywords").await?,
            models_count: count("embedding_models").await?,
        })
    }

    async fn snapshot(&self) -> StorageResult<Box<dyn ReadSnapshot>> {
        // Deferred BEGIN: under WAL the snapshot is taken by the first SELECT
        // and holds until the transaction ends.
        let tx = self.db.pool().begin().await?;
        Ok(Box::new(SqliteSnapshot { tx }))
    }
}

/// [`ReadSnapshot`] over an open read transaction. Dropping it rolls back.
pub struct SqliteSnapshot {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl ReadSnapshot for SqliteSnapshot {
    async fn search_keywords(
        &mut self,
        fragment: &str,
        query: &[f16],
        limit: usize,
    ) -> StorageResult<Vec<KeywordMatch>> {
        rank_keywords(&mut self.tx, fragment, query, limit).await
    }

    async fn search_nodes(
        &mut self,
        query: &[f16],
        limit: usize,
    ) -> StorageResult<Vec<(HierarchyNode, f32)>> {
        rank_nodes(&mut self.tx, query, limit).await
    }

    async fn related_nodes(
        &mut self,
        node_id: NodeId,
        limit: usize,
    ) -> StorageResult<Vec<RelatedNode>> {
        read_related(&mut self.tx, node_id, limit).await
    }

    async fn get_document(&mut self, id: DocumentId) -> StorageResult<Option<Document>> {
        read_document(&mut self.tx, id).await
    }

    async fn release(self: Box<Self>) -> StorageResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

async fn read_document(
    conn: &mut SqliteConnection,
    id: DocumentId,
) -> StorageResult<Option<Document>> {
    let row = sqlx::query(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(document_from_row).transpose()
}

async fn read_related(
    conn: &mut SqliteConnection,
    node_id: NodeId,
    limit: usize,
) -> StorageResult<Vec<RelatedNode>> {
    let rows = sqlx::query(&format!(
        "SELECT {EDGE_COLUMNS}, {NODE_COLUMNS} FROM relationships r
         JOIN hierarchy_nodes n ON n.id = r.target_id
         WHERE r.source_id = ?1
         ORDER BY r.strength DESC, r.id
         LIMIT ?2"
    ))
    .bind(node_id)
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(RelatedNode {
                edge: edge_from_row(row)?,
                node: node_from_row(row)?,
            })
        })
        .collect()
}

async fn rank_nodes(
    conn: &mut SqliteConnection,
    query: &[f16],
    limit: usize,
) -> StorageResult<Vec<(HierarchyNode, f32)>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let rows = sqlx::query(&format!(
        "SELECT {NODE_COLUMNS} FROM hierarchy_nodes n ORDER BY n.id"
    ))
    .fetch_all(&mut *conn)
    .await?;

    let mut scored = rows
        .iter()
        .map(|row| {
            let node = node_from_row(row)?;
            let similarity = cosine_similarity(query, &node.embedding);
            Ok((node, similarity))
        })
        .collect::<StorageResult<Vec<_>>>()?;

    // Stable: equal similarities stay in id order.
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(limit);
    Ok(scored)
}

async fn rank_keywords(
    conn: &mut SqliteConnection,
    fragment: &str,
    query: &[f16],
    limit: usize,
) -> StorageResult<Vec<KeywordMatch>> {
    if limit == 0 || fragment.is_empty() {
        return Ok(Vec::new());
    }

    // Terms are stored lower-cased, so lowering the fragment makes the
    // match case-insensitive beyond ASCII too.
    let escaped = fragment
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{escaped}%");

    let rows = sqlx::query(&format!(
        "SELECT {KEYWORD_COLUMNS}, {NODE_COLUMNS} FROM keywords k
         JOIN hierarchy_nodes n ON n.id = k.node_id
         WHERE k.term LIKE ?1 ESCAPE '\\'
         ORDER BY k.id"
    ))
    .bind(&pattern)
    .fetch_all(&mut *conn)
    .await?;

    let mut matches = rows
        .iter()
        .map(|row| {
            let keyword = keyword_from_row(row)?;
            let node = node_from_row(row)?;
            let similarity = cosine_similarity(query, &keyword.embedding);
            Ok(KeywordMatch {
                keyword,
                node,
                similarity,
            })
        })
        .collect::<StorageResult<Vec<_>>>()?;

    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    matches.truncate(limit);
    Ok(matches)
}
