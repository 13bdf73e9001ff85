//! n1ql-codegen - Query model to N1QL/SQL++ compiler
//!
//! This crate compiles a declarative, composable query description (a pipeline
//! of filtering, projection, joining, grouping, ordering and pagination steps
//! over typed data sources) into the textual query syntax of a document query
//! engine:
//! - An immutable query model built by an external front-end parser
//! - Metadata contracts for collection and field name resolution
//! - Alias assignment and extent linking across subquery boundaries
//! - Text generation for plain, existential, aggregate and grouped queries

pub mod engine_version;
pub mod metadata;
pub mod n1ql_generator;
pub mod query_model;

pub use engine_version::EngineVersion;
pub use n1ql_generator::{generate_query, QueryGenerationContext, QueryGenerationError, QueryType};
