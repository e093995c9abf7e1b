//! High-level engine that owns the index and exposes every operation on it.
//!
//! [`IndexingEngine`] wires the pieces together:
//!
//! ```text
//! create/update/index ─ DocumentLocks ─ HierarchyBuilder ─ store (one transaction)
//!                                          │
//!                                 parser, keywords, EmbeddingAdapter, RelationshipEngine
//!
//! search ─ SearchCache ─ HierarchicalSearch ─ store
//! ```
//!
//! ## Consistency
//!
//! A rebuild computes its whole [`HierarchyDraft`] (embeddings included) before
//! the store is touched, then writes it in a single transaction. A failure at
//! any point leaves the previously indexed state untouched, and readers only
//! ever see the old or the new hierarchy. Rebuilds of the same document are
//! additionally serialised through [`DocumentLocks`]; different documents
//! proceed in parallel.
//!
//! ## Model compatibility
//!
//! The first engine to open an index registers its embedding model. Opening
//! the index later with a model of a different dimension fails with
//! [`EngineError::IncompatibleModel`], since stored and query vectors would no
//! longer be comparable.
//!
//! [`HierarchyDraft`]: crate::storage::HierarchyDraft

use super::cache::{CacheStats, SearchCache};
use super::document_locks::DocumentLocks;
use super::hierarchy_builder::HierarchyBuilder;
use super::relationships::RelationshipEngine;
use super::search::{HierarchicalSearch, SearchResult};
use super::structure::{DocumentGraph, DocumentStructure};
use crate::config::EngineConfig;
use crate::error::{EngineError, IndexError, SearchError, StructureError};
use crate::storage::sqlite_store::SqliteStore;
use crate::storage::{
    CombinedStore, Document, DocumentId, DocumentRevision, EmbeddingModelMetadata, HistoryEntry,
    IndexStats, NewDocument, StorageError,
};
use docent_context::KeywordExtractor;
use docent_embed::{EmbeddingAdapter, EmbeddingStats};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Counts from one hierarchy rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub document_id: DocumentId,
    pub nodes: usize,
    pub edges: usize,
    pub keywords: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub index: IndexStats,
    pub model_id: String,
    pub dimension: usize,
    pub embedding: EmbeddingStats,
    pub cache: Option<CacheStats>,
}

pub struct IndexingEngine {
    config: EngineConfig,
    store: Arc<dyn CombinedStore>,
    adapter: Arc<EmbeddingAdapter>,
    builder: HierarchyBuilder,
    search: HierarchicalSearch,
    cache: Option<SearchCache>,
    locks: DocumentLocks,
}

impl IndexingEngine {
    /// Opens (creating if needed) the index under `base_dir`.
    pub async fn open(config: EngineConfig, base_dir: &Path) -> Result<Self, EngineError> {
        config.validate()?;
        let path = config.database_path(base_dir);
        info!("Opening index at {}", path.display());
        let store = SqliteStore::open(&path).await?;
        let adapter = EmbeddingAdapter::from_config(&config.embedding).await?;
        Self::with_parts(config, Arc::new(store), Arc::new(adapter)).await
    }

    /// Opens a throwaway in-memory index.
    pub async fn open_memory(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let store = SqliteStore::open_memory().await?;
        let adapter = EmbeddingAdapter::from_config(&config.embedding).await?;
        Self::with_parts(config, Arc::new(store), Arc::new(adapter)).await
    }

    /// Assembles an engine from an existing store and adapter.
    ///
    /// The adapter is authoritative for the vector dimension; the embedding
    /// section of `config` is not consulted.
    pub async fn with_parts(
        config: EngineConfig,
        store: Arc<dyn CombinedStore>,
        adapter: Arc<EmbeddingAdapter>,
    ) -> Result<Self, EngineError> {
        Self::check_model(store.as_ref(), &adapter).await?;

        let builder = HierarchyBuilder::new(
            Arc::clone(&adapter),
            KeywordExtractor::new(config.keywords.clone()),
            RelationshipEngine::new(config.relationships),
        );
        let search = HierarchicalSearch::new(
            Arc::clone(&store),
            Arc::clone(&adapter),
            config.search.clone(),
        );
        let cache = SearchCache::from_config(&config.cache);

        info!(
            "Engine ready: model {} ({} dimensions, provider {}), cache {}",
            adapter.model_id(),
            adapter.dimension(),
            adapter.provider_name(),
            if cache.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            config,
            store,
            adapter,
            builder,
            search,
            cache,
            locks: DocumentLocks::new(),
        })
    }

    async fn check_model(
        store: &dyn CombinedStore,
        adapter: &EmbeddingAdapter,
    ) -> Result<(), EngineError> {
        for model in store.embedding_models().await? {
            if model.dimension != adapter.dimension() {
                return Err(EngineError::IncompatibleModel {
                    registered_model: model.model_id,
                    registered: model.dimension,
                    configured_model: adapter.model_id().to_string(),
                    configured: adapter.dimension(),
                });
            }
            if model.model_id != adapter.model_id() {
                warn!(
                    "Index also holds vectors from {}; similarity with {} may be unreliable",
                    model.model_id,
                    adapter.model_id()
                );
            }
        }
        let metadata = EmbeddingModelMetadata::new(adapter.model_id(), adapter.dimension())
            .with_normalized(adapter.normalizes());
        store.register_embedding_model(&metadata).await?;
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn adapter(&self) -> &EmbeddingAdapter {
        &self.adapter
    }

    /// Stores a new document and indexes it.
    pub async fn create_document(
        &self,
        title: &str,
        path: &str,
        content: &str,
    ) -> Result<Document, IndexError> {
        let started = Instant::now();
        let draft = self.builder.draft(content).await?;
        let embedding = self.adapter.embed(content).await?;

        let document = self
            .store
            .insert_document(
                NewDocument {
                    title: title.to_string(),
                    path: path.to_string(),
                    content: content.to_string(),
                    embedding: Some(embedding),
                },
                &draft,
            )
            .await?;

        info!(
            "Created document {} '{}': {} nodes, {} edges, {} keywords in {:?}",
            document.id,
            document.title,
            draft.nodes.len(),
            draft.edges.len(),
            draft.keyword_count(),
            started.elapsed()
        );
        Ok(document)
    }

    /// Replaces a document's content, records the previous version in its
    /// history and re-indexes it, atomically.
    pub async fn update_document(
        &self,
        id: DocumentId,
        content: &str,
        changed_by: Option<&str>,
    ) -> Result<Document, IndexError> {
        let _guard = self.locks.lock(id).await;
        self.require_document(id).await?;

        let started = Instant::now();
        let draft = self.builder.draft(content).await?;
        let embedding = self.adapter.embed(content).await?;

        let document = self
            .store
            .revise_document(
                id,
                DocumentRevision {
                    content: content.to_string(),
                    embedding: Some(embedding),
                    changed_by: changed_by.map(str::to_string),
                },
                &draft,
            )
            .await?;

        info!(
            "Updated document {} to version {}: {} nodes, {} edges in {:?}",
            id,
            document.version,
            draft.nodes.len(),
            draft.edges.len(),
            started.elapsed()
        );
        Ok(document)
    }

    /// Rebuilds the hierarchy of document `id` from `content`.
    ///
    /// The stored document row is left as is; use [`Self::update_document`]
    /// to change content and hierarchy together.
    pub async fn index_document(&self, id: DocumentId, content: &str) -> Result<(), IndexError> {
        let _guard = self.locks.lock(id).await;
        self.rebuild(id, content).await.map(|_| ())
    }

    /// Rebuilds the hierarchy of document `id` from its stored content.
    pub async fn reindex_document(&self, id: DocumentId) -> Result<IndexReport, IndexError> {
        let _guard = self.locks.lock(id).await;
        let document = self.require_document(id).await?;
        self.rebuild(id, &document.content).await
    }

    async fn rebuild(&self, id: DocumentId, content: &str) -> Result<IndexReport, IndexError> {
        self.require_document(id).await?;
        let started = Instant::now();
        let draft = self.builder.draft(content).await?;
        self.store.replace_hierarchy(id, &draft).await?;

        let report = IndexReport {
            document_id: id,
            nodes: draft.nodes.len(),
            edges: draft.edges.len(),
            keywords: draft.keyword_count(),
        };
        info!(
            "Indexed document {}: {} nodes, {} edges, {} keywords in {:?}",
            id,
            report.nodes,
            report.edges,
            report.keywords,
            started.elapsed()
        );
        Ok(report)
    }

    /// Re-derives the edge set of a document from its stored nodes.
    /// Returns the number of edges written.
    pub async fn link_document(&self, id: DocumentId) -> Result<usize, IndexError> {
        let _guard = self.locks.lock(id).await;
        self.require_document(id).await?;
        let nodes = self.store.document_nodes(id).await?;
        let edges = self.builder.edges_for(&nodes);
        let written = self.store.replace_edges(id, &edges).await?;
        debug!("Linked document {}: {} edges over {} nodes", id, written, nodes.len());
        Ok(written)
    }

    /// Deletes a document with its hierarchy and history.
    pub async fn delete_document(&self, id: DocumentId) -> Result<(), IndexError> {
        let deleted = {
            let _guard = self.locks.lock(id).await;
            self.store.delete_document(id).await?
        };
        self.locks.forget(id);
        if !deleted {
            return Err(IndexError::DocumentNotFound(id));
        }
        info!("Deleted document {}", id);
        Ok(())
    }

    async fn require_document(&self, id: DocumentId) -> Result<Document, StorageError> {
        self.store
            .get_document(id)
            .await?
            .ok_or(StorageError::DocumentNotFound(id))
    }

    /// Ranked results for `query`, served from the cache when possible.
    ///
    /// A blank query or a zero limit yields no results without any embedding work.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        if let Some(cache) = &self.cache {
            if let Some(results) = cache.get(query, limit).await {
                return Ok(results);
            }
        }

        let results = self.search.search(query, limit).await?;

        if let Some(cache) = &self.cache {
            cache.insert(query, limit, results.clone()).await;
        }
        Ok(results)
    }

    /// [`Self::search`] with the configured default limit.
    pub async fn search_default(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        self.search(query, self.config.search.default_limit).await
    }

    pub async fn get_document(&self, id: DocumentId) -> Result<Document, StructureError> {
        Ok(self.require_document(id).await?)
    }

    /// The section tree of a document.
    pub async fn get_structure(&self, id: DocumentId) -> Result<DocumentStructure, StructureError> {
        let document = self.require_document(id).await?;
        let nodes = self.store.document_nodes(id).await?;
        Ok(DocumentStructure::build(&document, nodes))
    }

    pub async fn get_graph(&self, id: DocumentId) -> Result<DocumentGraph, StructureError> {
        self.require_document(id).await?;
        let nodes = self.store.document_nodes(id).await?;
        let edges = self.store.document_edges(id).await?;
        Ok(DocumentGraph::build(id, &nodes, &edges))
    }

    /// Previous versions of a document, oldest first.
    pub async fn document_history(&self, id: DocumentId) -> Result<Vec<HistoryEntry>, StructureError> {
        self.require_document(id).await?;
        Ok(self.store.document_history(id).await?)
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>, StorageError> {
        self.store.list_documents().await
    }

    pub async fn stats(&self) -> Result<EngineStats, StorageError> {
        Ok(EngineStats {
            index: self.store.stats().await?,
            model_id: self.adapter.model_id().to_string(),
            dimension: self.adapter.dimension(),
            embedding: self.adapter.stats(),
            cache: self.cache_stats().await,
        })
    }

    /// `None` when caching is disabled.
    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }

    pub async fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::cache::CacheConfig;
    use anyhow::Result;
    use docent_embed::EmbedConfig;
    use tempfile::tempdir;

    fn config() -> EngineConfig {
        EngineConfig::default().with_embedding(EmbedConfig::hashing(64))
    }

    #[tokio::test]
    async fn test_create_and_structure() -> Result<()> {
        let engine = IndexingEngine::open_memory(config()).await?;
        let doc = engine
            .create_document("Guide", "guide.md", "# A\nhello\n## B\nworld\n## C\nfoo")
            .await?;
        assert_eq!(doc.version, 1);
        assert_eq!(doc.embedding.as_ref().map(Vec::len), Some(64));

        let structure = engine.get_structure(doc.id).await?;
        assert_eq!(structure.roots.len(), 1);
        assert_eq!(structure.roots[0].children.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_documents() -> Result<()> {
        let engine = IndexingEngine::open_memory(config()).await?;
        assert!(matches!(
            engine.get_structure(5).await,
            Err(StructureError::NotFound(5))
        ));
        assert!(matches!(
            engine.index_document(5, "# x").await,
            Err(IndexError::DocumentNotFound(5))
        ));
        assert!(matches!(
            engine.update_document(5, "# x", None).await,
            Err(IndexError::DocumentNotFound(5))
        ));
        assert!(matches!(
            engine.delete_document(5).await,
            Err(IndexError::DocumentNotFound(5))
        ));
        assert!(matches!(
            engine.link_document(5).await,
            Err(IndexError::DocumentNotFound(5))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_query_does_no_work() -> Result<()> {
        let engine = IndexingEngine::open_memory(config()).await?;
        assert!(engine.search("   ", 5).await?.is_empty());
        assert!(engine.search("anything", 0).await?.is_empty());
        assert_eq!(engine.adapter().stats(), EmbeddingStats::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_reopen_with_other_dimension_fails() -> Result<()> {
        let dir = tempdir()?;
        let engine = IndexingEngine::open(config(), dir.path()).await?;
        engine.create_document("T", "t.md", "# T\nbody").await?;
        drop(engine);

        let reopened = IndexingEngine::open(config(), dir.path()).await?;
        assert_eq!(reopened.list_documents().await?.len(), 1);
        drop(reopened);

        let other = EngineConfig::default().with_embedding(EmbedConfig::hashing(32));
        let err = IndexingEngine::open(other, dir.path()).await.err();
        assert!(matches!(
            err,
            Some(EngineError::IncompatibleModel {
                registered: 64,
                configured: 32,
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_registers_model_normalization() -> Result<()> {
        let dir = tempdir()?;
        let raw = config().with_embedding(EmbedConfig::hashing(64).with_normalize(false));
        let engine = IndexingEngine::open(raw, dir.path()).await?;
        assert!(!engine.adapter().normalizes());
        let models = engine.store.embedding_models().await?;
        assert_eq!(models.len(), 1);
        assert!(!models[0].normalized);
        drop(engine);

        let engine = IndexingEngine::open(config(), dir.path()).await?;
        let models = engine.store.embedding_models().await?;
        assert_eq!(models.len(), 1);
        assert!(models[0].normalized);
        Ok(())
    }

    #[tokio::test]
    async fn test_stats() -> Result<()> {
        let engine =
            IndexingEngine::open_memory(config().with_cache(CacheConfig::disabled())).await?;
        engine
            .create_document("Guide", "guide.md", "# A\nhello\n## B\nworld\n## C\nfoo")
            .await?;
        let stats = engine.stats().await?;
        assert_eq!(stats.index.documents_count, 1);
        assert_eq!(stats.index.nodes_count, 3);
        assert_eq!(stats.index.models_count, 1);
        assert_eq!(stats.model_id, "hashing:feature-hash-64");
        assert!(stats.cache.is_none());
        Ok(())
    }
}
