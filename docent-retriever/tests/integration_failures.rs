//! Failure-path tests for the engine facade
//!
//! These tests verify that:
//! - An embedding failure during an update leaves the stored document untouched
//! - Missing documents surface as not-found errors
//! - A failed search is an error, is not cached, and recovers with the provider

use anyhow::Result;
use async_trait::async_trait;
use docent_embed::{
    EmbedConfig, EmbedError, EmbeddingAdapter, EmbeddingProvider, EmbeddingResult,
    HashingProvider, f16,
};
use docent_retriever::storage::sqlite_store::SqliteStore;
use docent_retriever::storage::{CombinedStore, DocumentStore, HierarchyStore};
use docent_retriever::{EngineConfig, IndexError, IndexingEngine, SearchError, StructureError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Hashing embeddings that start failing once `fail` is set.
struct FlakyProvider {
    inner: HashingProvider,
    fail: AtomicBool,
}

impl FlakyProvider {
    fn new(dimension: usize) -> Self {
        Self {
            inner: HashingProvider::new(dimension),
            fail: AtomicBool::new(false),
        }
    }

    fn check(&self) -> docent_embed::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(EmbedError::embedding_gen(std::io::Error::other("provider offline")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyProvider {
    async fn embed_text(&self, text: &str) -> docent_embed::Result<Vec<f16>> {
        self.check()?;
        self.inner.embed_text(text).await
    }

    async fn embed_texts(&self, texts: &[String]) -> docent_embed::Result<EmbeddingResult> {
        self.check()?;
        self.inner.embed_texts(texts).await
    }

    fn embedding_dimension(&self) -> usize {
        self.inner.embedding_dimension()
    }

    fn provider_name(&self) -> &str {
        "flaky"
    }
}

#[tokio::test]
async fn test_failed_update_leaves_document_unchanged() -> Result<()> {
    let provider = Arc::new(FlakyProvider::new(32));
    let adapter = EmbeddingAdapter::new(provider.clone(), "flaky", 32, true)?;
    let store = Arc::new(SqliteStore::open_memory().await?);
    let engine = IndexingEngine::with_parts(
        EngineConfig::default(),
        Arc::clone(&store) as Arc<dyn CombinedStore>,
        Arc::new(adapter),
    )
    .await?;

    let content = "# Service\nRuns the service.\n## Ports\nListens on 8080.";
    let doc = engine.create_document("Service", "service.md", content).await?;
    let nodes_before = store.document_nodes(doc.id).await?;
    let edges_before = store.document_edges(doc.id).await?;

    provider.fail.store(true, Ordering::SeqCst);
    let err = engine
        .update_document(doc.id, "# Service\nEverything changed.", Some("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Embedding(_)));

    let stored = store.get_document(doc.id).await?.unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.content, content);
    assert_eq!(store.document_nodes(doc.id).await?, nodes_before);
    assert_eq!(store.document_edges(doc.id).await?, edges_before);
    assert!(store.document_history(doc.id).await?.is_empty());

    // Reindexing fails the same way and also leaves the hierarchy alone.
    assert!(engine.reindex_document(doc.id).await.is_err());
    assert_eq!(store.document_nodes(doc.id).await?, nodes_before);

    provider.fail.store(false, Ordering::SeqCst);
    let updated = engine
        .update_document(doc.id, "# Service\nEverything changed.", Some("bob"))
        .await?;
    assert_eq!(updated.version, 2);
    Ok(())
}

#[tokio::test]
async fn test_failed_create_writes_nothing() -> Result<()> {
    let provider = Arc::new(FlakyProvider::new(32));
    let adapter = EmbeddingAdapter::new(provider.clone(), "flaky", 32, true)?;
    let store = Arc::new(SqliteStore::open_memory().await?);
    let engine = IndexingEngine::with_parts(
        EngineConfig::default(),
        Arc::clone(&store) as Arc<dyn CombinedStore>,
        Arc::new(adapter),
    )
    .await?;

    provider.fail.store(true, Ordering::SeqCst);
    assert!(engine.create_document("A", "a.md", "# A\ntext").await.is_err());

    let stats = store.stats().await?;
    assert_eq!(stats.documents_count, 0);
    assert_eq!(stats.nodes_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_documents_are_not_found() -> Result<()> {
    let engine = IndexingEngine::open_memory(
        EngineConfig::default().with_embedding(EmbedConfig::hashing(32)),
    )
    .await?;

    assert!(matches!(
        engine.update_document(404, "# X", None).await,
        Err(IndexError::DocumentNotFound(404))
    ));
    assert!(matches!(
        engine.reindex_document(404).await,
        Err(IndexError::DocumentNotFound(404))
    ));
    assert!(matches!(
        engine.link_document(404).await,
        Err(IndexError::DocumentNotFound(404))
    ));
    assert!(matches!(
        engine.delete_document(404).await,
        Err(IndexError::DocumentNotFound(404))
    ));
    assert!(matches!(
        engine.get_structure(404).await,
        Err(StructureError::NotFound(404))
    ));
    assert!(engine.search("anything", 5).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_failed_search_is_not_cached() -> Result<()> {
    let provider = Arc::new(FlakyProvider::new(32));
    let adapter = EmbeddingAdapter::new(provider.clone(), "flaky", 32, true)?;
    let store = Arc::new(SqliteStore::open_memory().await?);
    let engine = IndexingEngine::with_parts(
        EngineConfig::default(),
        Arc::clone(&store) as Arc<dyn CombinedStore>,
        Arc::new(adapter),
    )
    .await?;
    let content = "# Service\nRuns the service.\n## Ports\nListens on 8080.";
    engine.create_document("Service", "service.md", content).await?;

    provider.fail.store(true, Ordering::SeqCst);
    assert!(matches!(
        engine.search("service ports", 5).await,
        Err(SearchError::Embedding(_))
    ));
    let cache = engine.cache_stats().await.unwrap();
    assert_eq!(cache.entries, 0);
    assert_eq!(cache.misses, 1);

    provider.fail.store(false, Ordering::SeqCst);
    let results = engine.search("service ports", 5).await?;
    assert!(!results.is_empty());
    let cache = engine.cache_stats().await.unwrap();
    assert_eq!(cache.hits, 0);
    assert_eq!(cache.misses, 2);
    assert_eq!(cache.entries, 1);

    // Once stored, the recovered results are what the cache serves.
    assert_eq!(engine.search("service ports", 5).await?, results);
    assert_eq!(engine.cache_stats().await.unwrap().hits, 1);
    Ok(())
}
