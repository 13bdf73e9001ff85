//! The query model: the parsed, structural representation of one composed
//! query pipeline.
//!
//! Models are produced by an external front-end parser and consumed read-only
//! by the generator. A model is one main source clause, an ordered list of
//! body clauses, a terminal select clause, and an ordered list of result
//! operators. Subqueries embed further models, forming an acyclic tree.

mod expr;

pub use expr::{BinaryOp, Expr, Literal, MemberRef, UnaryOp};

use serde::{Deserialize, Serialize};

/// Stable identity of one query-source clause node.
///
/// Alias assignment and extent linking key off this identity, never off
/// structural equality: two clauses that look alike are still distinct row
/// sources unless the parser gave them the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryModel {
    pub main: MainSource,
    pub body: Vec<BodyClause>,
    pub select: SelectClause,
    pub operators: Vec<ResultOperator>,
}

impl QueryModel {
    pub fn has_group_operator(&self) -> bool {
        self.operators
            .iter()
            .any(|op| matches!(op, ResultOperator::GroupBy(_)))
    }

    pub fn has_union_operator(&self) -> bool {
        self.operators
            .iter()
            .any(|op| matches!(op, ResultOperator::Union(_) | ResultOperator::Concat(_)))
    }

    pub fn has_default_if_empty(&self) -> bool {
        self.operators
            .iter()
            .any(|op| matches!(op, ResultOperator::DefaultIfEmpty))
    }
}

/// The main source clause: the first data source the pipeline iterates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainSource {
    pub id: SourceId,
    pub source: SourceExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceExpr {
    /// A named collection, resolved through the collection-name contract.
    Collection(String),
    /// An array-valued expression, e.g. a member access on an outer row.
    /// Only valid inside subqueries.
    Member(Expr),
    /// A nested model: a grouping subquery or a union-ordering subquery.
    SubQuery(Box<QueryModel>),
    /// A reference to a prior query source: either the grouping source (an
    /// aggregate over a grouped extent) or a group-join output being iterated.
    SourceRef(SourceId),
    /// A constant array.
    Array(Literal),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectClause {
    pub selector: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ordering {
    pub expr: Expr,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BodyClause {
    Where(WhereClause),
    OrderBy(OrderByClause),
    Join(JoinClause),
    GroupJoin(GroupJoinClause),
    Nest(NestClause),
    AdditionalSource(AdditionalSourceClause),
    UseKeys(UseKeysClause),
    Hint(HintClause),
}

impl BodyClause {
    /// Clause kind name for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            BodyClause::Where(_) => "where",
            BodyClause::OrderBy(_) => "order-by",
            BodyClause::Join(_) => "join",
            BodyClause::GroupJoin(_) => "group-join",
            BodyClause::Nest(_) => "nest",
            BodyClause::AdditionalSource(_) => "additional-source",
            BodyClause::UseKeys(_) => "use-keys",
            BodyClause::Hint(_) => "hint",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    pub predicate: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByClause {
    pub orderings: Vec<Ordering>,
}

/// An equi-join against another source.
///
/// `outer_key` is evaluated against the already-visible extents, `inner_key`
/// against the joined extent (conventionally the document key accessor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    pub id: SourceId,
    pub inner: JoinInner,
    pub outer_key: Expr,
    pub inner_key: Expr,
}

/// The inner side of a join or nest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JoinInner {
    Collection(String),
    /// A correlated form. Only the predicate-only shape over a single named
    /// collection is supported; anything else fails the compile.
    SubQuery(Box<QueryModel>),
}

/// A join producing a left-correlated group (compiled as a NEST until a later
/// additional-source clause flattens it back into a join).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupJoinClause {
    pub id: SourceId,
    pub join: JoinClause,
}

/// Correlates rows from another source into an array-valued field on the
/// outer row. `key_selector` yields the outer row's array of document keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestClause {
    pub id: SourceId,
    pub inner: JoinInner,
    pub key_selector: Expr,
    pub left_outer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalSourceClause {
    pub id: SourceId,
    pub source: AdditionalSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AdditionalSource {
    /// Unnest: iterate an array-valued member as an additional source.
    Member(Expr),
    /// Either an unnest with body clauses (optionally left-outer via a
    /// default-if-empty operator), or a flattening reference to a prior
    /// group-join.
    SubQuery(Box<QueryModel>),
}

/// Restricts the main source to an explicit list of document keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseKeysClause {
    pub keys: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashHint {
    Build,
    Probe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HintClause {
    UseHash(HashHint),
    UseIndex(String),
}

impl HintClause {
    pub fn kind_name(&self) -> &'static str {
        match self {
            HintClause::UseHash(_) => "USE HASH",
            HintClause::UseIndex(_) => "USE INDEX",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupByOperator {
    /// Grouping key; an object construction groups by a multipart key.
    pub key: Expr,
    /// Element selector; must be a bare source reference.
    pub element: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultOperator {
    Take(Expr),
    Skip(Expr),
    First,
    Single,
    Distinct,
    Explain,
    Any,
    All(Expr),
    Contains(Expr),
    GroupBy(GroupByOperator),
    Average,
    Count,
    Max,
    Min,
    Sum,
    Union(Box<QueryModel>),
    Concat(Box<QueryModel>),
    /// Marks an outer join inside unnest / group-join-flattening subqueries.
    DefaultIfEmpty,
}

impl ResultOperator {
    /// Operator kind name for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ResultOperator::Take(_) => "take",
            ResultOperator::Skip(_) => "skip",
            ResultOperator::First => "first",
            ResultOperator::Single => "single",
            ResultOperator::Distinct => "distinct",
            ResultOperator::Explain => "explain",
            ResultOperator::Any => "any",
            ResultOperator::All(_) => "all",
            ResultOperator::Contains(_) => "contains",
            ResultOperator::GroupBy(_) => "group-by",
            ResultOperator::Average => "average",
            ResultOperator::Count => "count",
            ResultOperator::Max => "max",
            ResultOperator::Min => "min",
            ResultOperator::Sum => "sum",
            ResultOperator::Union(_) => "union",
            ResultOperator::Concat(_) => "concat",
            ResultOperator::DefaultIfEmpty => "default-if-empty",
        }
    }
}
