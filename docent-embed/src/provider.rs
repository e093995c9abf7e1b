//! The provider trait and the fastembed-backed provider.
//!
//! Loading an ONNX model is slow, so loaded models live in a process-wide
//! table keyed by what determines the weights (model name and cache
//! directory). Creating a second provider for the same model reuses the
//! session instead of loading it again.

use crate::config::{EmbedConfig, ProviderKind, builtin_model};
use crate::error::{EmbedError, Result};
use crate::hashing::HashingProvider;
use crate::vector::to_f16;
use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, info};

/// Vectors produced by one batch call
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// One vector per input text, in input order
    pub embeddings: Vec<Vec<f16>>,
    /// Length of each vector (0 for an empty batch)
    pub dimension: usize,
}

impl EmbeddingResult {
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map_or(0, Vec::len);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Something that turns text into fixed-length half precision vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Embeds a batch; the result holds one vector per text, in order.
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    fn embedding_dimension(&self) -> usize;

    fn provider_name(&self) -> &str;
}

/// Builds the provider selected by `config.provider`.
pub async fn create_provider(config: &EmbedConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    config.validate()?;
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        ProviderKind::Fastembed => Arc::new(FastEmbedProvider::load(config).await?),
        ProviderKind::Hashing => Arc::new(HashingProvider::new(config.dimension)),
    };
    Ok(provider)
}

type SharedModel = Arc<Mutex<TextEmbedding>>;

#[derive(Clone)]
struct LoadedModel {
    session: SharedModel,
    dimension: usize,
}

static LOADED_MODELS: OnceLock<Mutex<HashMap<u64, LoadedModel>>> = OnceLock::new();

fn loaded_models() -> MutexGuard<'static, HashMap<u64, LoadedModel>> {
    LOADED_MODELS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Identifies the weights a config loads. Batch size and normalization only
/// affect how the model is called, so they are not part of the key.
fn model_key(config: &EmbedConfig) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(config.model_name().to_ascii_lowercase().as_bytes());
    hasher.write_u8(0);
    if let Some(dir) = &config.cache_dir {
        hasher.write(dir.to_string_lossy().as_bytes());
    }
    hasher.finish()
}

/// Loads the model on a blocking thread and measures its real output length.
async fn load_session(config: &EmbedConfig) -> Result<LoadedModel> {
    let (model, _) = builtin_model(config.model_name()).ok_or_else(|| {
        EmbedError::invalid_config(format!(
            "unknown fastembed model '{}'",
            config.model_name()
        ))
    })?;

    if let Some(dir) = &config.cache_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let name = config.model_name().to_string();
    let cache_dir = config.cache_dir.clone();
    tokio::task::spawn_blocking(move || -> Result<LoadedModel> {
        info!("Loading embedding model {name}");
        let mut options = InitOptions::new(model).with_show_download_progress(false);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }
        let mut session =
            TextEmbedding::try_new(options).map_err(|source| EmbedError::External { source })?;

        let sample = session
            .embed(vec!["dimension check".to_string()], None)
            .map_err(|source| EmbedError::External { source })?;
        let dimension = sample.first().map_or(0, Vec::len);
        info!("Loaded {name} ({dimension} dimensions)");

        Ok(LoadedModel {
            session: Arc::new(Mutex::new(session)),
            dimension,
        })
    })
    .await?
}

/// Local ONNX embeddings through fastembed.
#[derive(Clone)]
pub struct FastEmbedProvider {
    model_name: String,
    session: SharedModel,
    dimension: usize,
    batch_size: usize,
    normalize: bool,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Loads the configured model, or reuses it if this process already has.
    ///
    /// Fails with a dimension mismatch if the model's output length is not
    /// `config.dimension`.
    pub async fn load(config: &EmbedConfig) -> Result<Self> {
        let key = model_key(config);
        let cached = loaded_models().get(&key).cloned();
        let loaded = match cached {
            Some(loaded) => {
                debug!("Reusing loaded model {}", config.model_name());
                loaded
            }
            None => {
                let loaded = load_session(config).await?;
                loaded_models().entry(key).or_insert(loaded).clone()
            }
        };

        if loaded.dimension != config.dimension {
            return Err(EmbedError::dimension_mismatch(
                config.dimension,
                loaded.dimension,
            ));
        }

        Ok(Self {
            model_name: config.model_name().to_string(),
            session: loaded.session,
            dimension: loaded.dimension,
            batch_size: config.batch_size.max(1),
            normalize: config.normalize,
        })
    }

    /// Drops every loaded model. Providers already handed out keep theirs.
    pub fn unload_all() {
        loaded_models().clear();
        info!("Unloaded all embedding models");
    }

    /// Number of models currently loaded in this process.
    pub fn loaded_count() -> usize {
        loaded_models().len()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        self.embed_texts(&[text.to_string()])
            .await?
            .embeddings
            .pop()
            .ok_or_else(|| EmbedError::embedding_gen(std::io::Error::other("model returned no vector")))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!("Embedding batch of {} texts with {}", batch.len(), self.model_name);
            let batch = batch.to_vec();
            let session = Arc::clone(&self.session);
            let raw = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                session
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .embed(batch, None)
                    .map_err(|source| EmbedError::External { source })
            })
            .await??;
            vectors.extend(raw.iter().map(|v| to_f16(v, self.normalize)));
        }
        Ok(EmbeddingResult::new(vectors))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}
