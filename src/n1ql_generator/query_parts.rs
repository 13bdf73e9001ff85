//! Accumulates textual query fragments and assembles the final query.
//!
//! One aggregator per compiled query model, owned exclusively by its
//! visitor. The active query shape selects the assembly template; a shape is
//! set at most once on top of the Select/Subquery base.

use serde::{Deserialize, Serialize};

use crate::query_model::{HashHint, HintClause};

use super::errors::QueryGenerationError;
use super::expr_translator::escape_identifier;

/// The mutually exclusive textual template family a compiled query follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    Select,
    Subquery,
    SubqueryAny,
    SubqueryAll,
    MainAny,
    MainAll,
    Aggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    InnerJoin,
    LeftJoin,
    InnerNest,
    LeftNest,
    InnerUnnest,
    LeftUnnest,
}

impl JoinKind {
    fn keyword(&self) -> &'static str {
        match self {
            JoinKind::InnerJoin => "INNER JOIN",
            JoinKind::LeftJoin => "LEFT OUTER JOIN",
            JoinKind::InnerNest => "INNER NEST",
            JoinKind::LeftNest => "LEFT OUTER NEST",
            JoinKind::InnerUnnest => "INNER UNNEST",
            JoinKind::LeftUnnest => "LEFT OUTER UNNEST",
        }
    }
}

/// One participating data source, in emission order.
#[derive(Debug, Clone)]
pub struct ExtentPart {
    pub source: String,
    pub item_name: String,
    pub hints: Vec<HintClause>,
    /// Original clause identity, kept so a later flattening reference can
    /// find and convert this extent.
    pub query_source: Option<crate::query_model::SourceId>,
    pub kind: ExtentKind,
}

#[derive(Debug, Clone)]
pub enum ExtentKind {
    From,
    /// ANSI join/nest: `ON <left> <op> <right>` plus optional folded inner
    /// predicates.
    AnsiJoin {
        join_kind: JoinKind,
        left: String,
        op: &'static str,
        right: String,
        extra_predicates: Option<String>,
    },
    /// Legacy lookup join/nest: `ON KEYS <keys>`.
    LookupJoin {
        join_kind: JoinKind,
        on_keys: String,
    },
    Unnest {
        join_kind: JoinKind,
    },
}

impl ExtentPart {
    pub fn from_source(source: String, item_name: String) -> Self {
        ExtentPart {
            source,
            item_name,
            hints: Vec::new(),
            query_source: None,
            kind: ExtentKind::From,
        }
    }

    pub fn join_kind_mut(&mut self) -> Option<&mut JoinKind> {
        match &mut self.kind {
            ExtentKind::AnsiJoin { join_kind, .. }
            | ExtentKind::LookupJoin { join_kind, .. }
            | ExtentKind::Unnest { join_kind } => Some(join_kind),
            ExtentKind::From => None,
        }
    }

    fn render_hints(&self) -> String {
        let mut text = String::new();
        for hint in &self.hints {
            match hint {
                HintClause::UseHash(HashHint::Build) => text.push_str(" USE HASH(BUILD)"),
                HintClause::UseHash(HashHint::Probe) => text.push_str(" USE HASH(PROBE)"),
                HintClause::UseIndex(name) => {
                    text.push_str(&format!(" USE INDEX({})", escape_identifier(name)))
                }
            }
        }
        text
    }

    fn to_fragment(&self) -> String {
        match &self.kind {
            ExtentKind::From => format!(
                " FROM {} as {}{}",
                self.source,
                self.item_name,
                self.render_hints()
            ),
            ExtentKind::AnsiJoin {
                join_kind,
                left,
                op,
                right,
                extra_predicates,
            } => {
                let mut fragment = format!(
                    " {} {} as {}{} ON {} {} {}",
                    join_kind.keyword(),
                    self.source,
                    self.item_name,
                    self.render_hints(),
                    left,
                    op,
                    right
                );
                if let Some(extra) = extra_predicates {
                    fragment.push_str(&format!(" AND {}", extra));
                }
                fragment
            }
            ExtentKind::LookupJoin { join_kind, on_keys } => format!(
                " {} {} as {}{} ON KEYS {}",
                join_kind.keyword(),
                self.source,
                self.item_name,
                self.render_hints(),
                on_keys
            ),
            ExtentKind::Unnest { join_kind } => {
                format!(" {} {} as {}", join_kind.keyword(), self.source, self.item_name)
            }
        }
    }
}

/// A named computed value emitted after the extent list.
#[derive(Debug, Clone)]
pub struct LetPart {
    pub item_name: String,
    pub value: String,
}

#[derive(Debug, Default)]
pub struct QueryPartsAggregator {
    select_part: Option<String>,
    extents: Vec<ExtentPart>,
    let_parts: Vec<LetPart>,
    where_parts: Vec<String>,
    group_by_parts: Vec<String>,
    having_parts: Vec<String>,
    order_by_parts: Vec<String>,
    limit_part: Option<String>,
    offset_part: Option<String>,
    distinct: bool,
    explain: bool,
    aggregate_function: Option<&'static str>,
    /// Predicate of the SATISFIES clause for ALL-type queries.
    where_all_part: Option<String>,
    /// Iteration variable for ANY/ALL subquery templates.
    any_all_extent_name: Option<String>,
    /// Textual wrappers applied around the fully assembled query.
    wrapping_functions: Vec<String>,
    union_parts: Vec<String>,
    is_subquery: bool,
    explicit_type: Option<QueryType>,
}

impl QueryPartsAggregator {
    pub fn new() -> Self {
        QueryPartsAggregator::default()
    }

    pub fn new_subquery() -> Self {
        QueryPartsAggregator {
            is_subquery: true,
            ..QueryPartsAggregator::default()
        }
    }

    pub fn query_type(&self) -> QueryType {
        self.explicit_type.unwrap_or(if self.is_subquery {
            QueryType::Subquery
        } else {
            QueryType::Select
        })
    }

    /// Set the query shape. The first explicit assignment wins; a second one
    /// is a logic error in the upstream model.
    pub fn set_query_type(&mut self, requested: QueryType) -> Result<(), QueryGenerationError> {
        if let Some(existing) = self.explicit_type {
            return Err(QueryGenerationError::ConflictingQueryShape {
                existing,
                requested,
            });
        }
        self.explicit_type = Some(requested);
        Ok(())
    }

    pub fn set_select(&mut self, select: String) {
        self.select_part = Some(select);
    }

    pub fn add_extent(&mut self, extent: ExtentPart) {
        self.extents.push(extent);
    }

    pub fn extents_mut(&mut self) -> &mut Vec<ExtentPart> {
        &mut self.extents
    }

    /// Item names of all extents and let-bindings, for ALL-subquery selects.
    pub fn extent_item_names(&self) -> Vec<String> {
        self.extents
            .iter()
            .map(|extent| extent.item_name.clone())
            .chain(self.let_parts.iter().map(|part| part.item_name.clone()))
            .collect()
    }

    pub fn add_let(&mut self, part: LetPart) {
        self.let_parts.push(part);
    }

    pub fn add_where(&mut self, predicate: String) {
        self.where_parts.push(predicate);
    }

    pub fn add_group_by(&mut self, expr: String) {
        self.group_by_parts.push(expr);
    }

    pub fn add_having(&mut self, predicate: String) {
        self.having_parts.push(predicate);
    }

    /// Later order-by clauses take precedence over earlier ones, so each new
    /// clause is inserted ahead of the ones already present.
    pub fn add_order_by(&mut self, orderings: Vec<String>) {
        self.order_by_parts.insert(0, orderings.join(", "));
    }

    pub fn set_limit(&mut self, count: impl std::fmt::Display) {
        self.limit_part = Some(format!(" LIMIT {}", count));
    }

    pub fn set_offset(&mut self, count: impl std::fmt::Display) {
        self.offset_part = Some(format!(" OFFSET {}", count));
    }

    pub fn set_distinct(&mut self) {
        self.distinct = true;
    }

    pub fn set_explain(&mut self) {
        self.explain = true;
    }

    pub fn set_aggregate_function(&mut self, function: &'static str) {
        self.aggregate_function = Some(function);
    }

    pub fn set_where_all(&mut self, predicate: String) {
        self.where_all_part = Some(predicate);
    }

    pub fn set_any_all_extent_name(&mut self, name: String) {
        self.any_all_extent_name = Some(name);
    }

    pub fn add_wrapping_function(&mut self, function: String) {
        self.wrapping_functions.push(function);
    }

    pub fn add_union(&mut self, union_part: String) {
        self.union_parts.push(union_part);
    }

    /// Assemble the final query text for the active shape.
    pub fn build(&self) -> String {
        let query = match self.query_type() {
            QueryType::Select
            | QueryType::Subquery
            | QueryType::SubqueryAny
            | QueryType::SubqueryAll => self.build_select_query(),
            QueryType::MainAny | QueryType::MainAll => self.build_main_any_all_query(),
            QueryType::Aggregate => self.build_aggregate(),
        };

        let query = self
            .wrapping_functions
            .iter()
            .rev()
            .fold(query, |wrapped, function| format!("{}{}", function, wrapped));

        log::debug!("assembled query: {}", query);
        query
    }

    fn append_extents_and_lets(&self, sb: &mut String) {
        for extent in &self.extents {
            sb.push_str(&extent.to_fragment());
        }
        for (i, part) in self.let_parts.iter().enumerate() {
            sb.push_str(if i == 0 { " LET " } else { ", " });
            sb.push_str(&format!("{} = {}", part.item_name, part.value));
        }
    }

    fn build_select_query(&self) -> String {
        let query_type = self.query_type();
        let mut sb = String::new();

        match query_type {
            QueryType::Subquery => sb.push('('),
            QueryType::SubqueryAny => sb.push_str(&format!(
                "ANY {} IN (",
                self.any_all_extent_name.as_deref().unwrap_or_default()
            )),
            QueryType::SubqueryAll => sb.push_str(&format!(
                "EVERY {} IN (",
                self.any_all_extent_name.as_deref().unwrap_or_default()
            )),
            _ => {}
        }

        if self.explain && query_type == QueryType::Select {
            sb.push_str("EXPLAIN ");
        }

        sb.push_str("SELECT VALUE ");

        let select = self.select_part.as_deref().unwrap_or_default();
        if let Some(aggregate) = self.aggregate_function {
            sb.push_str(&format!(
                "{}({}{})",
                aggregate,
                if self.distinct { "DISTINCT " } else { "" },
                select
            ));
        } else {
            if self.distinct {
                sb.push_str("DISTINCT ");
            }
            sb.push_str(select);
        }

        self.append_extents_and_lets(&mut sb);

        if !self.where_parts.is_empty() {
            sb.push_str(&format!(" WHERE {}", self.where_parts.join(" AND ")));
        }
        if !self.group_by_parts.is_empty() {
            sb.push_str(&format!(" GROUP BY {}", self.group_by_parts.join(", ")));
        }
        if !self.having_parts.is_empty() {
            sb.push_str(&format!(" HAVING {}", self.having_parts.join(" AND ")));
        }

        for union_part in &self.union_parts {
            sb.push_str(union_part);
        }

        if !self.order_by_parts.is_empty() {
            sb.push_str(&format!(" ORDER BY {}", self.order_by_parts.join(", ")));
        }
        if let Some(limit) = &self.limit_part {
            sb.push_str(limit);
            // The target grammar only accepts OFFSET after LIMIT.
            if let Some(offset) = &self.offset_part {
                sb.push_str(offset);
            }
        }

        match query_type {
            QueryType::Subquery => sb.push(')'),
            QueryType::SubqueryAny => sb.push_str(") SATISFIES true END"),
            QueryType::SubqueryAll => sb.push_str(&format!(
                ") SATISFIES {} END",
                self.where_all_part.as_deref().unwrap_or_default()
            )),
            _ => {}
        }

        sb
    }

    /// Degenerate select returning a literal boolean, used when an
    /// existential operator terminates the main query.
    fn build_main_any_all_query(&self) -> String {
        let mut sb = String::new();

        sb.push_str(&format!(
            "SELECT VALUE {}",
            if self.query_type() == QueryType::MainAny {
                "true"
            } else {
                "false"
            }
        ));

        self.append_extents_and_lets(&mut sb);

        let mut has_where = false;
        if !self.where_parts.is_empty() {
            sb.push_str(&format!(" WHERE {}", self.where_parts.join(" AND ")));
            has_where = true;
        }

        if self.query_type() == QueryType::MainAll {
            sb.push_str(&format!(
                " {} NOT ({})",
                if has_where { "AND" } else { "WHERE" },
                self.where_all_part.as_deref().unwrap_or_default()
            ));
        }

        sb.push_str(" LIMIT 1");
        sb
    }

    /// Bare aggregate call, used when the aggregate is computed over an
    /// already-grouped extent.
    fn build_aggregate(&self) -> String {
        format!(
            "{}({})",
            self.aggregate_function.unwrap_or_default(),
            self.select_part.as_deref().unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_aggregator() -> QueryPartsAggregator {
        let mut parts = QueryPartsAggregator::new();
        parts.set_select("Extent1".into());
        parts.add_extent(ExtentPart::from_source("orders".into(), "Extent1".into()));
        parts
    }

    #[test]
    fn minimal_select() {
        assert_eq!(
            plain_aggregator().build(),
            "SELECT VALUE Extent1 FROM orders as Extent1"
        );
    }

    #[test]
    fn offset_is_suppressed_without_limit() {
        let mut parts = plain_aggregator();
        parts.set_offset("5");
        assert_eq!(
            parts.build(),
            "SELECT VALUE Extent1 FROM orders as Extent1"
        );

        parts.set_limit("10");
        assert_eq!(
            parts.build(),
            "SELECT VALUE Extent1 FROM orders as Extent1 LIMIT 10 OFFSET 5"
        );
    }

    #[test]
    fn unions_precede_order_by() {
        let mut parts = plain_aggregator();
        parts.add_union(" UNION SELECT VALUE Extent2 FROM archived as Extent2".into());
        parts.add_order_by(vec!["total ASC".into()]);
        assert_eq!(
            parts.build(),
            "SELECT VALUE Extent1 FROM orders as Extent1 UNION SELECT VALUE Extent2 FROM archived as Extent2 ORDER BY total ASC"
        );
    }

    #[test]
    fn later_order_by_clauses_take_precedence() {
        let mut parts = plain_aggregator();
        parts.add_order_by(vec!["Extent1.a ASC".into()]);
        parts.add_order_by(vec!["Extent1.b DESC".into()]);
        assert!(parts
            .build()
            .contains("ORDER BY Extent1.b DESC, Extent1.a ASC"));
    }

    #[test]
    fn shape_is_set_at_most_once() {
        let mut parts = QueryPartsAggregator::new();
        parts.set_query_type(QueryType::MainAny).unwrap();
        let err = parts.set_query_type(QueryType::MainAll).unwrap_err();
        assert!(matches!(
            err,
            QueryGenerationError::ConflictingQueryShape {
                existing: QueryType::MainAny,
                requested: QueryType::MainAll,
            }
        ));
    }

    #[test]
    fn subquery_shape_parenthesizes() {
        let mut parts = QueryPartsAggregator::new_subquery();
        parts.set_select("Extent1".into());
        parts.add_extent(ExtentPart::from_source("orders".into(), "Extent1".into()));
        assert_eq!(parts.build(), "(SELECT VALUE Extent1 FROM orders as Extent1)");
    }

    #[test]
    fn explain_is_emitted_for_main_selects_only() {
        let mut parts = plain_aggregator();
        parts.set_explain();
        assert!(parts.build().starts_with("EXPLAIN SELECT VALUE"));
    }

    #[test]
    fn aggregate_wraps_the_select_part() {
        let mut parts = plain_aggregator();
        parts.set_aggregate_function("COUNT");
        assert_eq!(
            parts.build(),
            "SELECT VALUE COUNT(Extent1) FROM orders as Extent1"
        );

        parts.set_distinct();
        assert_eq!(
            parts.build(),
            "SELECT VALUE COUNT(DISTINCT Extent1) FROM orders as Extent1"
        );
    }

    #[test]
    fn wrapping_functions_wrap_the_assembled_query() {
        let mut parts = QueryPartsAggregator::new_subquery();
        parts.set_select("Extent1.tag".into());
        parts.add_extent(ExtentPart::from_source("tags".into(), "Extent1".into()));
        parts.add_wrapping_function("'rust' IN ".into());
        assert_eq!(
            parts.build(),
            "'rust' IN (SELECT VALUE Extent1.tag FROM tags as Extent1)"
        );
    }

    #[test]
    fn main_all_negates_the_predicate() {
        let mut parts = QueryPartsAggregator::new();
        parts.add_extent(ExtentPart::from_source("orders".into(), "Extent1".into()));
        parts.set_query_type(QueryType::MainAll).unwrap();
        parts.set_where_all("Extent1.total > 0".into());
        assert_eq!(
            parts.build(),
            "SELECT VALUE false FROM orders as Extent1 WHERE NOT (Extent1.total > 0) LIMIT 1"
        );

        let mut parts = QueryPartsAggregator::new();
        parts.add_extent(ExtentPart::from_source("orders".into(), "Extent1".into()));
        parts.set_query_type(QueryType::MainAll).unwrap();
        parts.add_where("Extent1.open = true".into());
        parts.set_where_all("Extent1.total > 0".into());
        assert_eq!(
            parts.build(),
            "SELECT VALUE false FROM orders as Extent1 WHERE Extent1.open = true AND NOT (Extent1.total > 0) LIMIT 1"
        );
    }
}
