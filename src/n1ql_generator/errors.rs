use thiserror::Error;

use super::query_parts::QueryType;

/// Compile-time failures. None are retryable and none are recovered locally:
/// a compile either fully succeeds or fully fails.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryGenerationError {
    #[error("Unsupported clause: {0}")]
    UnsupportedClause(String),

    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("Invalid correlation: {0} (only predicate-only subqueries over a single named collection are supported)")]
    InvalidCorrelation(String),

    #[error("Ambiguous hint: {0}")]
    AmbiguousHint(String),

    #[error("Rewrite target not found: {0} (the upstream query model is malformed)")]
    RewriteTargetNotFound(String),

    #[error("Conflicting query shape: {existing:?} is already set, cannot switch to {requested:?}")]
    ConflictingQueryShape {
        existing: QueryType,
        requested: QueryType,
    },
}
