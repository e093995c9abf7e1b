//! docent-retriever: hierarchical indexing and search over Markdown documentation
//!
//! Documents are split into their header hierarchy; every section gets an
//! embedding and a set of weighted keywords, and sections of the same document
//! are linked by sibling and semantic-similarity edges. Search combines keyword
//! matches, vector similarity and expansion along those edges into one ranked
//! list.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: Hierarchy builder, relationship engine, search, cache and the engine facade
//! - **[`storage`]**: Storage traits with the SQLite implementation
//! - **[`config`]**: TOML configuration
//! - **[`error`]**: Typed errors per operation family
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docent_retriever::{EngineConfig, IndexingEngine};
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = IndexingEngine::open(EngineConfig::default(), Path::new(".")).await?;
//! let doc = engine
//!     .create_document("Guide", "docs/guide.md", "# Install\nRun the installer.")
//!     .await?;
//! for hit in engine.search("installer", 5).await? {
//!     println!("{:.2} {} ({})", hit.relevance, hit.title, hit.match_type);
//! }
//! let tree = engine.get_structure(doc.id).await?;
//! print!("{}", tree.outline());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Markdown → Parser → Sections → Embeddings + Keywords → Edges → SQLite
//!                                                                  ↓
//!            Query → Cache → Keyword / Semantic / Expansion stages → Results
//! ```

pub mod config;
pub mod error;
pub mod retrieval;
pub mod storage;

pub use config::EngineConfig;
pub use error::{EngineError, IndexError, SearchError, StructureError};
pub use retrieval::indexing_engine::{EngineStats, IndexReport, IndexingEngine};
pub use retrieval::search::{MatchType, SearchResult};
