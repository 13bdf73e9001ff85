//! The generator: compiles one query model into N1QL/SQL++ text.
//!
//! A compile is purely synchronous and performs no I/O; all state lives in
//! the per-compile [`QueryGenerationContext`] and the per-model parts
//! aggregator. Create one context per compile and the generator is safe to
//! call from any number of threads.

mod errors;
mod expr_translator;
mod extent_names;
mod function_registry;
mod model_visitor;
mod projection_rewriter;
mod query_parts;

pub use errors::QueryGenerationError;
pub use query_parts::QueryType;

use crate::engine_version::EngineVersion;
use crate::metadata::{CollectionNameResolver, FieldNameResolver};
use crate::query_model::{QueryModel, SourceId};

use extent_names::ExtentNameProvider;
use model_visitor::QueryModelVisitor;

/// Per-compile state shared by a visitor and every subquery visitor it
/// recurses into: alias assignment, metadata handles, the engine version
/// gate and the active grouping source.
pub struct QueryGenerationContext<'a> {
    pub(crate) extent_names: ExtentNameProvider,
    pub(crate) collections: &'a dyn CollectionNameResolver,
    pub(crate) fields: &'a dyn FieldNameResolver,
    pub(crate) version: EngineVersion,
    /// The source clause whose output the active grouping subquery produces.
    pub(crate) grouping_source: Option<SourceId>,
}

impl<'a> QueryGenerationContext<'a> {
    pub fn new(
        collections: &'a dyn CollectionNameResolver,
        fields: &'a dyn FieldNameResolver,
        version: EngineVersion,
    ) -> Self {
        QueryGenerationContext {
            extent_names: ExtentNameProvider::new(),
            collections,
            fields,
            version,
            grouping_source: None,
        }
    }
}

/// Compile a query model into a single query string.
///
/// Nested models compile recursively and are embedded as substrings; there
/// is no partial emission, a compile either fully succeeds or fails with the
/// offending node kind named in the error.
pub fn generate_query(
    model: &QueryModel,
    ctx: &mut QueryGenerationContext,
) -> Result<String, QueryGenerationError> {
    log::debug!("compiling query model");
    let mut visitor = QueryModelVisitor::new(ctx);
    visitor.visit_query_model(model)?;
    Ok(visitor.into_query())
}
