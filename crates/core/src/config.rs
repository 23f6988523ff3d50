//! Engine configuration
//!
//! Loading configuration from files belongs to process bootstrap; the
//! engine only consumes an already built [`IndexConfig`].

use serde::{Deserialize, Serialize};

/// Tunables of the indexing engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Fail a commit when layers remain unmerged after all roots were merged
    ///
    /// When disabled the leftover layers are dropped with a warning.
    pub strict_layer_cleanup: bool,

    /// Drop indices that became empty while committing a registry
    pub evict_empty_indexes: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            strict_layer_cleanup: true,
            evict_empty_indexes: true,
        }
    }
}

impl IndexConfig {
    /// Configuration tolerant to leftover layers (bulk tooling)
    pub fn lenient() -> Self {
        Self {
            strict_layer_cleanup: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::default();
        assert!(config.strict_layer_cleanup);
        assert!(config.evict_empty_indexes);
        assert!(!IndexConfig::lenient().strict_layer_cleanup);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        #[derive(Serialize)]
        struct Partial {
            evict_empty_indexes: bool,
        }
        let bytes = rmp_serde::to_vec_named(&Partial {
            evict_empty_indexes: false,
        })
        .unwrap();
        let config: IndexConfig = rmp_serde::from_slice(&bytes).unwrap();
        assert!(config.strict_layer_cleanup);
        assert!(!config.evict_empty_indexes);
    }
}
