//! Engine configuration, loaded from TOML.
//!
//! Every table and key is optional; anything missing takes its default.
//!
//! ```toml
//! [database]
//! path = ".docent.db"          # relative paths resolve against the base directory
//!
//! [embedding]
//! provider = "fastembed"       # or "hashing"
//! model_name = "all-MiniLM-L6-v2"
//! dimension = 384
//!
//! [keywords]
//! max_keywords = 10
//!
//! [relationships]
//! semantic_threshold = 0.7
//!
//! [search]
//! default_limit = 5
//!
//! [cache]
//! ttl_secs = 300
//! ```

use crate::error::EngineError;
use crate::retrieval::cache::CacheConfig;
use crate::retrieval::relationships::RelationshipConfig;
use crate::retrieval::search::SearchConfig;
use crate::storage::database::DATABASE_FILE;
use docent_context::KeywordConfig;
use docent_embed::EmbedConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the base directory.
pub const CONFIG_FILE: &str = "docent.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DATABASE_FILE),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub embedding: EmbedConfig,
    pub keywords: KeywordConfig,
    pub relationships: RelationshipConfig,
    pub search: SearchConfig,
    pub cache: CacheConfig,
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Loads `docent.toml` from `base_dir` if present, defaults otherwise.
    pub fn discover(base_dir: &Path) -> Result<Self, EngineError> {
        let path = base_dir.join(CONFIG_FILE);
        if path.is_file() {
            Self::from_toml_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database.path = path.into();
        self
    }

    pub fn with_embedding(mut self, embedding: EmbedConfig) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn with_keywords(mut self, keywords: KeywordConfig) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_relationships(mut self, relationships: RelationshipConfig) -> Self {
        self.relationships = relationships;
        self
    }

    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Database location, with relative paths taken from `base_dir`.
    pub fn database_path(&self, base_dir: &Path) -> PathBuf {
        if self.database.path.is_absolute() {
            self.database.path.clone()
        } else {
            base_dir.join(&self.database.path)
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.embedding.validate()?;

        let unit = 0.0..=1.0;
        if !unit.contains(&self.relationships.sibling_strength) {
            return Err(EngineError::Config(format!(
                "relationships.sibling_strength must be within [0, 1], got {}",
                self.relationships.sibling_strength
            )));
        }
        if !unit.contains(&self.relationships.semantic_threshold) {
            return Err(EngineError::Config(format!(
                "relationships.semantic_threshold must be within [0, 1], got {}",
                self.relationships.semantic_threshold
            )));
        }
        if self.keywords.max_keywords == 0 {
            return Err(EngineError::Config(
                "keywords.max_keywords must be positive".to_string(),
            ));
        }
        if self.search.default_limit == 0 {
            return Err(EngineError::Config(
                "search.default_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
