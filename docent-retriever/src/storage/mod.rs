//! Storage abstraction layer for docent-retriever
//!
//! The index is four entity kinds per document (hierarchy nodes, relationship
//! edges, keywords, and the document row itself) plus an embedding model
//! registry. The traits here describe what the indexing and search pipelines
//! need from a backend; [`sqlite_store::SqliteStore`] is the implementation.
//!
//! ## Key Components
//!
//! - **DocumentStore**: document rows, versions and edit history
//! - **HierarchyStore**: nodes, keywords and edges of one document
//! - **VectorStore**: cosine top-K over node embeddings and keyword lookup
//! - **CombinedStore**: all of the above plus the model registry and statistics
//! - **ReadSnapshot**: the reads a search needs, all against one committed state
//!
//! ## Atomic rebuilds
//!
//! Writes that touch a document's hierarchy take a complete [`HierarchyDraft`]
//! and apply it in one transaction: existing keywords, edges and nodes are
//! deleted (in that order) and the draft inserted in their place. Drafts
//! reference their own nodes by position, so parent links and edges can be
//! computed before any node has a database id.
//!
//! Readers that issue several queries and need them to agree (search: keyword
//! stage, semantic stage, edge expansion, document lookup) go through
//! [`CombinedStore::snapshot`]. A rebuild committing midway is invisible to
//! an open snapshot.
//!
//! ```text
//! DocumentStore ──┐
//! HierarchyStore ─┼─ CombinedStore ── SqliteStore
//! VectorStore ────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use half::f16;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod database;
pub mod sqlite_store;

/// Database ID for a document.
pub type DocumentId = i64;

/// Database ID for a hierarchy node.
pub type NodeId = i64;

/// Errors raised by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("document {0} not found")]
    DocumentNotFound(DocumentId),

    #[error("corrupt embedding in {table} row {id}: {len} bytes is not a whole number of f16 values")]
    CorruptEmbedding {
        table: &'static str,
        id: i64,
        len: usize,
    },

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A Markdown document and its whole-document embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub path: String,
    pub content: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f16>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when a document is first stored.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub path: String,
    pub content: String,
    pub embedding: Option<Vec<f16>>,
}

/// Replacement content for an existing document.
#[derive(Debug, Clone)]
pub struct DocumentRevision {
    pub content: String,
    pub embedding: Option<Vec<f16>>,
    pub changed_by: Option<String>,
}

/// A previous version of a document, recorded when it is revised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub document_id: DocumentId,
    /// Version number the content had before the revision
    pub version: i64,
    pub content: String,
    pub changed_by: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// One stored Markdown section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchyNode {
    pub id: NodeId,
    pub document_id: DocumentId,
    pub parent_id: Option<NodeId>,
    pub title: String,
    pub content: String,
    #[serde(skip)]
    pub embedding: Vec<f16>,
    pub level: u8,
    pub seq: u32,
}

/// Kind of a relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// Two sections with the same header level
    #[serde(rename = "structural-sibling")]
    Sibling,
    /// Two sections whose embeddings are close
    #[serde(rename = "semantic")]
    Semantic,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sibling => "structural-sibling",
            Self::Semantic => "semantic",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structural-sibling" => Ok(Self::Sibling),
            "semantic" => Ok(Self::Semantic),
            other => Err(StorageError::InvalidRecord(format!(
                "unknown relationship kind '{other}'"
            ))),
        }
    }
}

/// A directed, scored edge between two nodes of the same document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipEdge {
    pub id: i64,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub kind: RelationshipKind,
    pub strength: f32,
}

/// An edge to insert between two already stored nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEdge {
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub kind: RelationshipKind,
    pub strength: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keyword {
    pub id: i64,
    pub node_id: NodeId,
    pub term: String,
    pub importance: f32,
    #[serde(skip)]
    pub embedding: Vec<f16>,
}

/// A keyword whose term matched a text query, with the node that owns it.
#[derive(Debug, Clone)]
pub struct KeywordMatch {
    pub keyword: Keyword,
    pub node: HierarchyNode,
    /// Cosine similarity between the query and keyword embeddings
    pub similarity: f32,
}

/// A node reached by following an edge.
#[derive(Debug, Clone)]
pub struct RelatedNode {
    pub edge: RelationshipEdge,
    pub node: HierarchyNode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordDraft {
    pub term: String,
    pub importance: f32,
    pub embedding: Vec<f16>,
}

/// A node not yet stored; `parent` is an index into [`HierarchyDraft::nodes`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDraft {
    pub title: String,
    pub content: String,
    pub level: u8,
    pub seq: u32,
    pub parent: Option<usize>,
    pub embedding: Vec<f16>,
    pub keywords: Vec<KeywordDraft>,
}

/// An edge between two draft nodes, by index into [`HierarchyDraft::nodes`].
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeDraft {
    pub source: usize,
    pub target: usize,
    pub kind: RelationshipKind,
    pub strength: f32,
}

/// Everything derived from one document's content, ready to be written at once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HierarchyDraft {
    pub nodes: Vec<NodeDraft>,
    pub edges: Vec<EdgeDraft>,
}

impl HierarchyDraft {
    pub fn keyword_count(&self) -> usize {
        self.nodes.iter().map(|n| n.keywords.len()).sum()
    }

    /// Checks that every index refers to an earlier or existing node.
    pub fn validate(&self) -> StorageResult<()> {
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                if parent >= i {
                    return Err(StorageError::InvalidRecord(format!(
                        "node {i} has parent {parent}, which does not precede it"
                    )));
                }
            }
        }
        for edge in &self.edges {
            if edge.source >= self.nodes.len() || edge.target >= self.nodes.len() {
                return Err(StorageError::InvalidRecord(format!(
                    "edge {} -> {} is out of range",
                    edge.source, edge.target
                )));
            }
        }
        Ok(())
    }
}

/// Metadata about the embedding model used for stored vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingModelMetadata {
    pub model_id: String,
    pub dimension: usize,
    pub normalized: bool,
}

impl EmbeddingModelMetadata {
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimension,
            normalized: false,
        }
    }

    pub fn with_normalized(mut self, normalized: bool) -> Self {
        self.normalized = normalized;
        self
    }
}

/// Row counts across the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub documents_count: usize,
    pub nodes_count: usize,
    pub edges_count: usize,
    pub keywords_count: usize,
    pub models_count: usize,
}

/// Document rows and their history.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stores a new document together with its hierarchy, atomically.
    async fn insert_document(
        &self,
        document: NewDocument,
        hierarchy: &HierarchyDraft,
    ) -> StorageResult<Document>;

    async fn get_document(&self, id: DocumentId) -> StorageResult<Option<Document>>;

    /// All documents, ordered by id.
    async fn list_documents(&self) -> StorageResult<Vec<Document>>;

    /// Records the current content in history, replaces it, bumps the version
    /// and swaps in the new hierarchy, all in one transaction.
    async fn revise_document(
        &self,
        id: DocumentId,
        revision: DocumentRevision,
        hierarchy: &HierarchyDraft,
    ) -> StorageResult<Document>;

    /// Deletes a document and everything derived from it. Returns false if it did not exist.
    async fn delete_document(&self, id: DocumentId) -> StorageResult<bool>;

    /// History entries, oldest first.
    async fn document_history(&self, id: DocumentId) -> StorageResult<Vec<HistoryEntry>>;
}

/// Nodes, keywords and edges of individual documents.
#[async_trait]
pub trait HierarchyStore: Send + Sync {
    /// Replaces the document's nodes, keywords and edges with `draft` in one
    /// transaction. Returns the new node ids in draft order.
    async fn replace_hierarchy(
        &self,
        document_id: DocumentId,
        draft: &HierarchyDraft,
    ) -> StorageResult<Vec<NodeId>>;

    /// Nodes of a document ordered by `seq`.
    async fn document_nodes(&self, document_id: DocumentId) -> StorageResult<Vec<HierarchyNode>>;

    async fn get_node(&self, id: NodeId) -> StorageResult<Option<HierarchyNode>>;

    /// Keywords of a node, most important first.
    async fn node_keywords(&self, node_id: NodeId) -> StorageResult<Vec<Keyword>>;

    /// Edges whose source belongs to the document, in insertion order.
    async fn document_edges(&self, document_id: DocumentId)
    -> StorageResult<Vec<RelationshipEdge>>;

    /// Replaces every edge of the document with `edges`. Returns the number inserted.
    async fn replace_edges(&self, document_id: DocumentId, edges: &[NewEdge])
    -> StorageResult<usize>;

    /// Targets of a node's outgoing edges, strongest first, ties in insertion order.
    async fn related_nodes(&self, node_id: NodeId, limit: usize)
    -> StorageResult<Vec<RelatedNode>>;
}

/// Similarity queries over stored embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The `limit` nodes most similar to `query`, most similar first.
    async fn search_nodes(
        &self,
        query: &[f16],
        limit: usize,
    ) -> StorageResult<Vec<(HierarchyNode, f32)>>;

    /// Keywords whose term contains `fragment` (case-insensitive), ranked by
    /// similarity between `query` and the keyword embedding, at most `limit`.
    async fn search_keywords(
        &self,
        fragment: &str,
        query: &[f16],
        limit: usize,
    ) -> StorageResult<Vec<KeywordMatch>>;
}

/// Unified store used by the engine.
#[async_trait]
pub trait CombinedStore: DocumentStore + HierarchyStore + VectorStore + Send + Sync {
    async fn register_embedding_model(&self, model: &EmbeddingModelMetadata) -> StorageResult<()>;

    async fn embedding_models(&self) -> StorageResult<Vec<EmbeddingModelMetadata>>;

    async fn stats(&self) -> StorageResult<IndexStats>;

    /// Opens a read view fixed to the state committed when its first query runs.
    async fn snapshot(&self) -> StorageResult<Box<dyn ReadSnapshot>>;
}

/// Consistent read view over the whole index.
///
/// Same queries and orderings as the [`VectorStore`], [`HierarchyStore`] and
/// [`DocumentStore`] methods of the same names.
#[async_trait]
pub trait ReadSnapshot: Send {
    async fn search_keywords(
        &mut self,
        fragment: &str,
        query: &[f16],
        limit: usize,
    ) -> StorageResult<Vec<KeywordMatch>>;

    async fn search_nodes(
        &mut self,
        query: &[f16],
        limit: usize,
    ) -> StorageResult<Vec<(HierarchyNode, f32)>>;

    async fn related_nodes(&mut self, node_id: NodeId, limit: usize)
    -> StorageResult<Vec<RelatedNode>>;

    async fn get_document(&mut self, id: DocumentId) -> StorageResult<Option<Document>>;

    /// Ends the read view now instead of on drop.
    async fn release(self: Box<Self>) -> StorageResult<()>;
}
