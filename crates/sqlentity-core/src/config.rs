//! Engine configuration.

use crate::error::{ConfigError, Error, Result};
use serde::{Deserialize, Serialize};

/// Engine-wide settings.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use sqlentity_core::EngineConfig;
///
/// let config = EngineConfig::from_json(r#"{ "eager_load_max_depth": 2 }"#).unwrap();
/// assert_eq!(config.eager_load_max_depth, 2);
/// assert!(!config.allow_collision_statements);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest relation chain accepted by `eager_load`, in segments.
    pub eager_load_max_depth: usize,
    /// Include colliding select expressions that cannot be mapped to a
    /// table as `WHEN expr IS NOT NULL` branches instead of dropping them.
    pub allow_collision_statements: bool,
    /// Entries kept per `GetOneCache` before the least recently used is evicted.
    pub get_one_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            eager_load_max_depth: 3,
            allow_collision_statements: false,
            get_one_cache_size: 256,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid engine configuration: {}", e),
                source: Some(Box::new(e)),
            })
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn eager_load_max_depth(mut self, depth: usize) -> Self {
        self.eager_load_max_depth = depth;
        self
    }

    pub fn allow_collision_statements(mut self, allow: bool) -> Self {
        self.allow_collision_statements = allow;
        self
    }

    pub fn get_one_cache_size(mut self, size: usize) -> Self {
        self.get_one_cache_size = size;
        self
    }

    /// Reject settings the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.eager_load_max_depth == 0 {
            return Err(Error::Config(ConfigError {
                message: "eager_load_max_depth must be at least 1".to_string(),
                source: None,
            }));
        }
        Ok(())
    }
}
