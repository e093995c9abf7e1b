//! The embedding boundary used by the indexing and search pipelines.
//!
//! [`EmbeddingAdapter`] wraps a provider and enforces the deployment's fixed
//! dimension: a provider with the wrong dimension is rejected at construction,
//! and any vector of the wrong length returned later fails the call instead of
//! reaching storage.
use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, create_provider};
use crate::vector::normalize;
use half::f16;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for calls made through an adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingStats {
    /// Number of requests forwarded to the provider
    pub calls: u64,
    /// Number of texts embedded across all requests
    pub texts: u64,
}

pub struct EmbeddingAdapter {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    normalize: bool,
    model_id: String,
    calls: AtomicU64,
    texts: AtomicU64,
}

impl std::fmt::Debug for EmbeddingAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingAdapter")
            .field("provider", &self.provider.provider_name())
            .field("model_id", &self.model_id)
            .field("dimension", &self.dimension)
            .field("normalize", &self.normalize)
            .finish()
    }
}

impl EmbeddingAdapter {
    /// Wraps `provider`, failing if it does not produce `dimension`-length vectors.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        model_id: impl Into<String>,
        dimension: usize,
        normalize: bool,
    ) -> Result<Self> {
        let actual = provider.embedding_dimension();
        if actual != dimension {
            return Err(EmbedError::dimension_mismatch(dimension, actual));
        }
        Ok(Self {
            provider,
            dimension,
            normalize,
            model_id: model_id.into(),
            calls: AtomicU64::new(0),
            texts: AtomicU64::new(0),
        })
    }

    /// Wraps an existing provider using the dimension and normalization of `config`.
    pub fn with_provider(
        provider: Arc<dyn EmbeddingProvider>,
        config: &EmbedConfig,
    ) -> Result<Self> {
        Self::new(provider, config.model_id(), config.dimension, config.normalize)
    }

    /// Builds the configured provider and wraps it.
    pub async fn from_config(config: &EmbedConfig) -> Result<Self> {
        let provider = create_provider(config).await?;
        Self::with_provider(provider, config)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    /// Whether returned vectors are scaled to unit length.
    pub fn normalizes(&self) -> bool {
        self.normalize
    }

    pub fn stats(&self) -> EmbeddingStats {
        EmbeddingStats {
            calls: self.calls.load(Ordering::Relaxed),
            texts: self.texts.load(Ordering::Relaxed),
        }
    }

    /// Embeds one text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f16>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.texts.fetch_add(1, Ordering::Relaxed);
        let vector = self.provider.embed_text(text).await?;
        self.finish(vector)
    }

    /// Embeds many texts, returning one vector per input in input order.
    ///
    /// An empty input returns immediately without calling the provider.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f16>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.texts.fetch_add(texts.len() as u64, Ordering::Relaxed);

        let result = self.provider.embed_texts(texts).await?;
        if result.len() != texts.len() {
            return Err(EmbedError::embedding_gen(std::io::Error::other(format!(
                "provider returned {} embeddings for {} texts",
                result.len(),
                texts.len()
            ))));
        }
        result
            .embeddings
            .into_iter()
            .map(|vector| self.finish(vector))
            .collect()
    }

    fn finish(&self, mut vector: Vec<f16>) -> Result<Vec<f16>> {
        if vector.len() != self.dimension {
            return Err(EmbedError::dimension_mismatch(self.dimension, vector.len()));
        }
        if self.normalize {
            normalize(&mut vector);
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::HashingProvider;
    use crate::provider::EmbeddingResult;
    use crate::vector::l2_norm;
    use async_trait::async_trait;

    /// Returns constant vectors of length `actual` while claiming `claimed`.
    struct FixedProvider {
        claimed: usize,
        actual: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        async fn embed_text(&self, _text: &str) -> Result<Vec<f16>> {
            Ok(vec![f16::from_f32(1.0); self.actual])
        }

        async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
            Ok(EmbeddingResult::new(vec![
                vec![f16::from_f32(1.0); self.actual];
                texts.len()
            ]))
        }

        fn embedding_dimension(&self) -> usize {
            self.claimed
        }

        fn provider_name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_rejects_wrong_dimension_at_construction() {
        let err = EmbeddingAdapter::new(Arc::new(HashingProvider::new(8)), "h", 16, true)
            .unwrap_err();
        assert!(matches!(
            err,
            EmbedError::DimensionMismatch {
                expected: 16,
                actual: 8
            }
        ));
    }

    #[tokio::test]
    async fn test_rejects_wrong_length_vectors() {
        let provider = Arc::new(FixedProvider {
            claimed: 4,
            actual: 3,
        });
        let adapter = EmbeddingAdapter::new(provider, "fixed", 4, false).unwrap();
        assert!(!adapter.normalizes());
        assert!(matches!(
            adapter.embed("x").await,
            Err(EmbedError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            adapter.embed_batch(&["a".to_string()]).await,
            Err(EmbedError::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_counts_calls() -> Result<()> {
        let config = EmbedConfig::hashing(32);
        let adapter = EmbeddingAdapter::from_config(&config).await?;
        assert_eq!(adapter.stats(), EmbeddingStats::default());

        adapter.embed("one").await?;
        adapter
            .embed_batch(&["two".to_string(), "three".to_string()])
            .await?;
        adapter.embed_batch(&[]).await?;

        assert_eq!(adapter.stats(), EmbeddingStats { calls: 2, texts: 3 });
        assert_eq!(adapter.model_id(), "hashing:feature-hash-32");
        Ok(())
    }

    #[test]
    fn test_normalizes_output() {
        let provider = Arc::new(FixedProvider {
            claimed: 3,
            actual: 3,
        });
        let adapter = EmbeddingAdapter::new(provider, "fixed", 3, true).unwrap();
        assert!(adapter.normalizes());
        let vector = tokio_test::block_on(adapter.embed("x")).unwrap();
        assert!((l2_norm(&vector) - 1.0).abs() < 1e-2);
    }
}
