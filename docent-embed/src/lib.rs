//! # docent-embed
//!
//! Embedding providers for docent, plus the adapter that the indexing and
//! search pipelines call through.
//!
//! ## Providers
//!
//! - [`FastEmbedProvider`]: local ONNX models via fastembed. Loaded models are
//!   cached process-wide, so constructing a second provider for the same model
//!   is cheap.
//! - [`HashingProvider`]: deterministic feature hashing with no model files,
//!   for offline use and tests.
//!
//! ## Quick Start
//!
//! ```no_run
//! use docent_embed::{EmbedConfig, EmbeddingAdapter};
//!
//! # async fn example() -> docent_embed::Result<()> {
//! let adapter = EmbeddingAdapter::from_config(&EmbedConfig::default()).await?;
//! let vector = adapter.embed("How do I configure the cache?").await?;
//! assert_eq!(vector.len(), adapter.dimension());
//! # Ok(())
//! # }
//! ```
//!
//! Vectors are half precision (`f16`); see [`vector`] for the math helpers.

pub mod adapter;
pub mod config;
pub mod error;
pub mod hashing;
pub mod provider;
pub mod vector;

pub use adapter::{EmbeddingAdapter, EmbeddingStats};
pub use config::{EmbedConfig, ProviderKind};
pub use error::{EmbedError, Result};
pub use hashing::HashingProvider;
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider, create_provider};
pub use vector::cosine_similarity;

// Re-exported so dependents name the same `f16` type.
pub use half::f16;
