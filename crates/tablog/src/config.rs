//! Engine configuration types.

use serde::{Deserialize, Serialize};

/// What happens when a goal names a predicate with no clauses that was never
/// declared dynamic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPredicate {
    /// Raise an existence error
    Error,
    /// Fail silently
    Fail,
}

/// Configuration for a knowledge base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Trace every user predicate, not only spied ones
    pub trace_all: bool,
    /// Widest composite index key (number of columns)
    pub max_composite_columns: usize,
    /// Eligible columns considered for composite indexes
    pub max_indexable_columns: usize,
    /// Pick specialized dispatchers for static predicates
    pub specialize_static: bool,
    pub unknown_predicate: UnknownPredicate,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            trace_all: false,
            max_composite_columns: 3,
            max_indexable_columns: 9,
            specialize_static: true,
            unknown_predicate: UnknownPredicate::Error,
        }
    }
}

/// Hard cap on indexable columns; column sets are stored as `u32` bitmasks.
pub const INDEX_COLUMN_LIMIT: usize = 32;

impl EngineConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Index limits clamped to what the index tables support.
    pub(crate) fn index_limits(&self) -> (usize, usize) {
        let columns = self.max_indexable_columns.min(INDEX_COLUMN_LIMIT);
        let width = self.max_composite_columns.clamp(1, columns.max(1));
        (width, columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"trace_all": true, "unknown_predicate": "fail"}"#)
            .unwrap();
        assert!(config.trace_all);
        assert_eq!(config.unknown_predicate, UnknownPredicate::Fail);
        assert_eq!(config.max_composite_columns, 3);
        assert_eq!(config.max_indexable_columns, 9);
        assert!(config.specialize_static);
    }

    #[test]
    fn test_index_limits_are_clamped() {
        let config = EngineConfig {
            max_composite_columns: 0,
            max_indexable_columns: 100,
            ..EngineConfig::default()
        };
        assert_eq!(config.index_limits(), (1, INDEX_COLUMN_LIMIT));
    }
}
