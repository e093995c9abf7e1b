//! Configuration for embedding providers

use crate::error::{EmbedError, Result};
use fastembed::EmbeddingModel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which backend produces the vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local ONNX models run through fastembed.
    Fastembed,
    /// Deterministic feature hashing, no model files.
    Hashing,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fastembed => write!(f, "fastembed"),
            Self::Hashing => write!(f, "hashing"),
        }
    }
}

/// Configuration for embedding models
///
/// Deserializes from the `[embedding]` table of the engine configuration file;
/// missing keys take the values of [`EmbedConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    pub provider: ProviderKind,
    /// Name of the embedding model to use
    pub model_name: String,
    /// Length of every vector the deployment stores
    pub dimension: usize,
    /// Maximum batch size for embedding generation
    pub batch_size: usize,
    /// Whether to L2-normalize embeddings
    pub normalize: bool,
    /// Where downloaded model files are kept (fastembed's default when unset)
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Fastembed,
            model_name: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            batch_size: 32,
            normalize: true,
            cache_dir: None,
        }
    }
}

impl EmbedConfig {
    /// Configuration for a built-in fastembed model, with its native dimension.
    pub fn new(model_name: impl Into<String>) -> Self {
        let model_name = model_name.into();
        let dimension = builtin_model(&model_name)
            .map(|(_, dimension)| dimension)
            .unwrap_or(384);
        Self {
            model_name,
            dimension,
            ..Self::default()
        }
    }

    /// Configuration for the feature-hashing provider.
    pub fn hashing(dimension: usize) -> Self {
        Self {
            provider: ProviderKind::Hashing,
            model_name: format!("feature-hash-{dimension}"),
            dimension,
            ..Self::default()
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set whether to normalize embeddings (builder style)
    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    pub fn with_dimension(self, dimension: usize) -> Self {
        Self { dimension, ..self }
    }

    pub fn with_cache_dir<P: AsRef<Path>>(self, cache_dir: P) -> Self {
        Self {
            cache_dir: Some(cache_dir.as_ref().to_path_buf()),
            ..self
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Identifier recorded alongside stored vectors, e.g. `fastembed:all-MiniLM-L6-v2`.
    pub fn model_id(&self) -> String {
        format!("{}:{}", self.provider, self.model_name)
    }

    /// Checks the configuration without loading anything.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(EmbedError::invalid_config("dimension must be positive"));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be positive"));
        }
        if self.provider == ProviderKind::Fastembed {
            let (_, native) = builtin_model(&self.model_name).ok_or_else(|| {
                EmbedError::invalid_config(format!(
                    "unknown fastembed model '{}'",
                    self.model_name
                ))
            })?;
            if native != self.dimension {
                return Err(EmbedError::dimension_mismatch(self.dimension, native));
            }
        }
        Ok(())
    }
}

/// Maps the model names accepted in configuration to fastembed models and
/// their output dimension.
pub fn builtin_model(name: &str) -> Option<(EmbeddingModel, usize)> {
    let model = match name.to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
        "all-minilm-l12-v2" => (EmbeddingModel::AllMiniLML12V2, 384),
        "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
        "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
        "bge-large-en-v1.5" => (EmbeddingModel::BGELargeENV15, 1024),
        "paraphrase-multilingual-minilm-l12-v2" => (EmbeddingModel::ParaphraseMLMiniLML12V2, 384),
        "nomic-embed-text-v1.5" => (EmbeddingModel::NomicEmbedTextV15, 768),
        "multilingual-e5-small" => (EmbeddingModel::MultilingualE5Small, 384),
        _ => return None,
    };
    Some(model)
}
