//! The query-model visitor: walks one model's clauses and result operators
//! in the order mandated by the target grammar, drives the expression
//! translator and alias provider, and deposits fragments into the parts
//! aggregator.
//!
//! One visitor per compiled model; subqueries recurse into fresh visitors
//! sharing the same generation context, so alias numbering and extent links
//! propagate while aggregator state stays exclusive to each compile.

use crate::query_model::{
    AdditionalSource, AdditionalSourceClause, BodyClause, Expr, GroupByOperator, HintClause,
    JoinClause, JoinInner, NestClause, OrderByClause, QueryModel, ResultOperator, SelectClause,
    SortDirection, SourceExpr, SourceId, UseKeysClause, WhereClause,
};

use super::errors::QueryGenerationError;
use super::expr_translator::{escape_identifier, render_literal, translate_expression};
use super::projection_rewriter::ProjectionRewriter;
use super::query_parts::{ExtentKind, ExtentPart, JoinKind, LetPart, QueryPartsAggregator, QueryType};
use super::QueryGenerationContext;

/// Tracks special status of the visiting process. A where clause is routed
/// to HAVING while `AfterGroupSubquery`; references after a union-ordering
/// subquery drop their alias prefix while `AfterUnionSortSubquery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitStatus {
    Normal,
    InGroupSubquery,
    AfterGroupSubquery,
    InUnionSortSubquery,
    AfterUnionSortSubquery,
}

pub struct QueryModelVisitor<'a, 'r> {
    ctx: &'a mut QueryGenerationContext<'r>,
    parts: QueryPartsAggregator,
    is_subquery: bool,
    /// An aggregate operator has been applied, which changes select handling.
    is_aggregated: bool,
    visit_status: VisitStatus,
    /// Maps references to the grouping output back to pre-grouping
    /// expressions while `AfterGroupSubquery`.
    grouping_rewriter: Option<ProjectionRewriter>,
}

impl<'a, 'r> QueryModelVisitor<'a, 'r> {
    pub fn new(ctx: &'a mut QueryGenerationContext<'r>) -> Self {
        QueryModelVisitor {
            ctx,
            parts: QueryPartsAggregator::new(),
            is_subquery: false,
            is_aggregated: false,
            visit_status: VisitStatus::Normal,
            grouping_rewriter: None,
        }
    }

    pub fn new_subquery(ctx: &'a mut QueryGenerationContext<'r>) -> Self {
        QueryModelVisitor {
            ctx,
            parts: QueryPartsAggregator::new_subquery(),
            is_subquery: true,
            is_aggregated: false,
            visit_status: VisitStatus::Normal,
            grouping_rewriter: None,
        }
    }

    pub fn visit_query_model(&mut self, model: &QueryModel) -> Result<(), QueryGenerationError> {
        self.visit_main_source(model)?;

        for clause in &model.body {
            self.visit_body_clause(clause, model)?;
        }

        for operator in &model.operators {
            self.visit_result_operator(operator)?;
        }

        // The select clause is visited last, so extents are linked before
        // being referenced and existential operators have already changed the
        // shape. Grouping subqueries contribute no select of their own, and
        // neither does the outer query of a union-ordering subquery or a
        // query terminated by a main existential operator.
        let query_type = self.parts.query_type();
        if self.visit_status != VisitStatus::InGroupSubquery
            && self.visit_status != VisitStatus::AfterUnionSortSubquery
            && query_type != QueryType::MainAny
            && query_type != QueryType::MainAll
        {
            self.visit_select_clause(&model.select, model)?;
        }

        Ok(())
    }

    pub fn into_query(self) -> String {
        self.parts.build()
    }

    fn extent_name(&mut self, id: SourceId) -> String {
        self.ctx.extent_names.extent_name(id)
    }

    /// Render an expression, remapping references to the grouping output
    /// back onto the grouping subquery's extents when one is in scope.
    fn expression(&mut self, expr: &Expr) -> Result<String, QueryGenerationError> {
        if self.visit_status == VisitStatus::AfterGroupSubquery {
            let rewriter = self.grouping_rewriter.as_ref().ok_or_else(|| {
                QueryGenerationError::RewriteTargetNotFound(
                    "no grouping projection is in scope".to_string(),
                )
            })?;
            let rewritten = rewriter.rewrite(expr)?;
            translate_expression(&rewritten, self.ctx)
        } else {
            translate_expression(expr, self.ctx)
        }
    }

    // ===== Main source =====

    fn visit_main_source(&mut self, model: &QueryModel) -> Result<(), QueryGenerationError> {
        let main = &model.main;
        match &main.source {
            SourceExpr::Collection(entity) => {
                let source = escape_identifier(&self.ctx.collections.collection_name(entity));
                let item_name = self.extent_name(main.id);
                self.parts.add_extent(ExtentPart::from_source(source, item_name));
            }
            SourceExpr::Member(expr) => {
                if !self.is_subquery {
                    return Err(QueryGenerationError::UnsupportedClause(
                        "member access in the main source is only supported in subqueries"
                            .to_string(),
                    ));
                }
                let source = self.expression(expr)?;
                let item_name = self.extent_name(main.id);
                self.parts.add_extent(ExtentPart::from_source(source, item_name));
            }
            SourceExpr::SubQuery(inner) => self.visit_sub_query_main_source(main.id, inner)?,
            SourceExpr::SourceRef(id) => {
                if self.ctx.grouping_source == Some(*id) {
                    // Aggregating over the grouped extent: reuse its alias and
                    // emit a bare aggregate call.
                    self.parts.set_query_type(QueryType::Aggregate)?;
                    self.ctx.extent_names.link(*id, main.id);
                } else {
                    // Iterating the array produced by a prior group join.
                    let source = self.extent_name(*id);
                    let item_name = self.extent_name(main.id);
                    self.parts.add_extent(ExtentPart::from_source(source, item_name));
                }
            }
            SourceExpr::Array(literal) => {
                let source = render_literal(literal);
                let item_name = self.extent_name(main.id);
                self.parts.add_extent(ExtentPart::from_source(source, item_name));
            }
        }
        Ok(())
    }

    fn visit_sub_query_main_source(
        &mut self,
        outer_id: SourceId,
        inner: &QueryModel,
    ) -> Result<(), QueryGenerationError> {
        if inner.has_group_operator() {
            // Clauses after the grouping apply to its output: the subquery
            // contributes extents, filters and GROUP BY to this compile, and
            // later where clauses become HAVING.
            self.visit_status = VisitStatus::InGroupSubquery;
            self.ctx.grouping_source = Some(outer_id);

            self.visit_query_model(inner)?;

            self.visit_status = VisitStatus::AfterGroupSubquery;
        } else if inner.has_union_operator() {
            // Ordering applies to the union output, whose columns carry the
            // projected names with no extent qualifier.
            self.visit_status = VisitStatus::InUnionSortSubquery;

            self.visit_query_model(inner)?;

            self.visit_status = VisitStatus::AfterUnionSortSubquery;
            self.ctx.extent_names.set_blank(outer_id);
        } else {
            return Err(QueryGenerationError::UnsupportedClause(
                "subqueries in the main source are only supported for grouping and unions"
                    .to_string(),
            ));
        }
        Ok(())
    }

    // ===== Body clauses =====

    fn visit_body_clause(
        &mut self,
        clause: &BodyClause,
        model: &QueryModel,
    ) -> Result<(), QueryGenerationError> {
        match clause {
            BodyClause::Where(where_clause) => self.visit_where_clause(where_clause),
            BodyClause::OrderBy(order_by) => self.visit_order_by_clause(order_by),
            BodyClause::Join(join) => {
                let part = self.parse_join_clause(join)?;
                self.parts.add_extent(part);
                Ok(())
            }
            BodyClause::GroupJoin(group_join) => {
                let part = self.parse_nest_join_clause(&group_join.join, group_join.id)?;
                self.parts.add_extent(part);
                Ok(())
            }
            BodyClause::Nest(nest) => {
                let part = self.parse_nest_clause(nest)?;
                self.parts.add_extent(part);
                Ok(())
            }
            BodyClause::AdditionalSource(additional) => self.visit_additional_source(additional),
            BodyClause::UseKeys(use_keys) => self.visit_use_keys_clause(use_keys, model),
            BodyClause::Hint(hint) => {
                let part = self.parts.extents_mut().first_mut().ok_or_else(|| {
                    QueryGenerationError::UnsupportedClause(
                        "hint clause with no extent to apply it to".to_string(),
                    )
                })?;
                Self::apply_hint(part, hint)
            }
        }
    }

    fn visit_where_clause(&mut self, clause: &WhereClause) -> Result<(), QueryGenerationError> {
        let predicate = self.expression(&clause.predicate)?;
        if self.visit_status == VisitStatus::AfterGroupSubquery {
            // Filters over the grouping output are HAVING statements.
            self.parts.add_having(predicate);
        } else {
            self.parts.add_where(predicate);
        }
        Ok(())
    }

    fn visit_order_by_clause(&mut self, clause: &OrderByClause) -> Result<(), QueryGenerationError> {
        if self.visit_status == VisitStatus::InGroupSubquery {
            // Sorting before grouping takes place has no effect.
            return Ok(());
        }

        let mut orderings = Vec::with_capacity(clause.orderings.len());
        for ordering in &clause.orderings {
            let direction = match ordering.direction {
                SortDirection::Ascending => "ASC",
                SortDirection::Descending => "DESC",
            };
            orderings.push(format!("{} {}", self.expression(&ordering.expr)?, direction));
        }
        self.parts.add_order_by(orderings);
        Ok(())
    }

    fn visit_use_keys_clause(
        &mut self,
        clause: &UseKeysClause,
        model: &QueryModel,
    ) -> Result<(), QueryGenerationError> {
        let item_name = self.extent_name(model.main.id);
        let keys = self.expression(&clause.keys)?;
        self.parts
            .add_where(format!("META({}).id IN {}", item_name, keys));
        Ok(())
    }

    fn apply_hint(part: &mut ExtentPart, hint: &HintClause) -> Result<(), QueryGenerationError> {
        if part
            .hints
            .iter()
            .any(|existing| std::mem::discriminant(existing) == std::mem::discriminant(hint))
        {
            return Err(QueryGenerationError::AmbiguousHint(format!(
                "only one {} hint is allowed per extent",
                hint.kind_name()
            )));
        }
        part.hints.push(hint.clone());
        Ok(())
    }

    // ===== Joins, nests, unnests =====

    fn require_bare_collection<'m>(
        sub: &'m QueryModel,
        clause_kind: &str,
    ) -> Result<&'m str, QueryGenerationError> {
        if !sub.operators.is_empty() {
            return Err(QueryGenerationError::InvalidCorrelation(format!(
                "{} inner sequence must not apply result operators",
                clause_kind
            )));
        }
        match &sub.main.source {
            SourceExpr::Collection(entity) => Ok(entity.as_str()),
            _ => Err(QueryGenerationError::InvalidCorrelation(format!(
                "{} inner sequence must be a named collection",
                clause_kind
            ))),
        }
    }

    fn is_key_accessor(expr: &Expr) -> bool {
        matches!(expr, Expr::Call { function, args }
            if function == "key" && args.len() == 1 && matches!(args[0], Expr::Source(_)))
    }

    /// Build the extent for a join against a named collection, choosing the
    /// ANSI or legacy lookup template by engine version.
    fn constant_join_part(
        &mut self,
        join: &JoinClause,
        entity: &str,
        join_kind: JoinKind,
    ) -> Result<ExtentPart, QueryGenerationError> {
        let source = escape_identifier(&self.ctx.collections.collection_name(entity));
        let item_name = self.extent_name(join.id);

        let kind = if self.ctx.version.supports_ansi_joins() {
            ExtentKind::AnsiJoin {
                join_kind,
                left: self.expression(&join.outer_key)?,
                op: "=",
                right: self.expression(&join.inner_key)?,
                extra_predicates: None,
            }
        } else {
            if !Self::is_key_accessor(&join.inner_key) {
                return Err(QueryGenerationError::UnsupportedClause(
                    "lookup joins require the document key accessor as the inner key".to_string(),
                ));
            }
            ExtentKind::LookupJoin {
                join_kind,
                on_keys: self.expression(&join.outer_key)?,
            }
        };

        Ok(ExtentPart {
            source,
            item_name,
            hints: Vec::new(),
            query_source: None,
            kind,
        })
    }

    fn parse_join_clause(&mut self, join: &JoinClause) -> Result<ExtentPart, QueryGenerationError> {
        match &join.inner {
            JoinInner::Collection(entity) => {
                self.constant_join_part(join, entity, JoinKind::InnerJoin)
            }
            JoinInner::SubQuery(sub) => {
                let entity = Self::require_bare_collection(sub, "join")?.to_string();

                // The subquery's clauses must resolve to the join's alias.
                self.ctx.extent_names.link(join.id, sub.main.id);

                let mut part = self.constant_join_part(join, &entity, JoinKind::InnerJoin)?;

                if matches!(part.kind, ExtentKind::AnsiJoin { .. }) {
                    // A filtered right-hand extent folds its predicates into
                    // the ON statement.
                    let extra = self.collect_inner_predicates(sub, &mut part, true)?;
                    if let ExtentKind::AnsiJoin {
                        extra_predicates, ..
                    } = &mut part.kind
                    {
                        *extra_predicates = extra;
                    }
                } else {
                    if sub
                        .body
                        .iter()
                        .any(|clause| !matches!(clause, BodyClause::Where(_)))
                    {
                        return Err(QueryGenerationError::InvalidCorrelation(
                            "only predicates are allowed on the inner side of a lookup join"
                                .to_string(),
                        ));
                    }
                    // Without ANSI joins the predicates join the outer filters.
                    for clause in &sub.body {
                        self.visit_body_clause(clause, sub)?;
                    }
                }

                Ok(part)
            }
        }
    }

    /// Render the where clauses of a predicate-only inner sequence, applying
    /// hints to the extent when allowed.
    fn collect_inner_predicates(
        &mut self,
        sub: &QueryModel,
        part: &mut ExtentPart,
        allow_hints: bool,
    ) -> Result<Option<String>, QueryGenerationError> {
        let mut predicates = Vec::new();
        for clause in &sub.body {
            match clause {
                BodyClause::Where(where_clause) => {
                    predicates.push(self.expression(&where_clause.predicate)?);
                }
                BodyClause::Hint(hint) if allow_hints => Self::apply_hint(part, hint)?,
                other => {
                    return Err(QueryGenerationError::InvalidCorrelation(format!(
                        "{} clause is not allowed on the inner side of a join",
                        other.kind_name()
                    )));
                }
            }
        }
        Ok(if predicates.is_empty() {
            None
        } else {
            Some(predicates.join(" AND "))
        })
    }

    /// A group join compiles to a NEST; a later flattening reference may
    /// convert it back into a plain join.
    fn parse_nest_join_clause(
        &mut self,
        join: &JoinClause,
        group_id: SourceId,
    ) -> Result<ExtentPart, QueryGenerationError> {
        // References to the join resolve through the owning group join.
        self.ctx.extent_names.link(join.id, group_id);

        match &join.inner {
            JoinInner::Collection(entity) => {
                let mut part = self.constant_join_part(join, entity, JoinKind::LeftNest)?;
                part.query_source = Some(group_id);
                Ok(part)
            }
            JoinInner::SubQuery(sub) => {
                let entity = Self::require_bare_collection(sub, "group join")?.to_string();

                if self.ctx.version.supports_ansi_joins() {
                    self.ctx.extent_names.link(join.id, sub.main.id);
                    let mut part = self.constant_join_part(join, &entity, JoinKind::LeftNest)?;
                    part.query_source = Some(group_id);
                    let extra = self.collect_inner_predicates(sub, &mut part, true)?;
                    if let ExtentKind::AnsiJoin {
                        extra_predicates, ..
                    } = &mut part.kind
                    {
                        *extra_predicates = extra;
                    }
                    Ok(part)
                } else {
                    // Nest under a temporary alias, then bind the group name
                    // to the filtered array.
                    let part =
                        self.legacy_filtered_nest(join, &entity, sub, JoinKind::LeftNest, group_id)?;
                    Ok(part)
                }
            }
        }
    }

    fn parse_nest_clause(&mut self, nest: &NestClause) -> Result<ExtentPart, QueryGenerationError> {
        let join_kind = if nest.left_outer {
            JoinKind::LeftNest
        } else {
            JoinKind::InnerNest
        };

        match &nest.inner {
            JoinInner::Collection(entity) => self.constant_nest_part(nest, entity, join_kind),
            JoinInner::SubQuery(sub) => {
                let entity = Self::require_bare_collection(sub, "nest")?.to_string();

                if self.ctx.version.supports_ansi_joins() {
                    // Extents are linked before the where clauses render, so
                    // the inner predicates use the nest's alias.
                    self.ctx.extent_names.link(nest.id, sub.main.id);
                    let mut part = self.constant_nest_part(nest, &entity, join_kind)?;
                    let extra = self.collect_inner_predicates(sub, &mut part, false)?;
                    if let ExtentKind::AnsiJoin {
                        extra_predicates, ..
                    } = &mut part.kind
                    {
                        *extra_predicates = extra;
                    }
                    Ok(part)
                } else {
                    let item_name = self.extent_name(nest.id);
                    let part = self.legacy_filtered_nest_inner(
                        &entity,
                        &nest.key_selector,
                        sub,
                        join_kind,
                        item_name.clone(),
                        None,
                    )?;
                    if !nest.left_outer {
                        // The filter runs after the NEST, so rows whose array
                        // filtered down to nothing must be dropped to keep
                        // inner-nest semantics.
                        self.parts
                            .add_where(format!("(ARRAY_LENGTH({}) > 0)", item_name));
                    }
                    Ok(part)
                }
            }
        }
    }

    fn constant_nest_part(
        &mut self,
        nest: &NestClause,
        entity: &str,
        join_kind: JoinKind,
    ) -> Result<ExtentPart, QueryGenerationError> {
        let source = escape_identifier(&self.ctx.collections.collection_name(entity));
        let item_name = self.extent_name(nest.id);

        let kind = if self.ctx.version.supports_ansi_joins() {
            ExtentKind::AnsiJoin {
                join_kind,
                left: format!("META({}).id", item_name),
                op: "IN",
                right: self.expression(&nest.key_selector)?,
                extra_predicates: None,
            }
        } else {
            ExtentKind::LookupJoin {
                join_kind,
                on_keys: self.expression(&nest.key_selector)?,
            }
        };

        Ok(ExtentPart {
            source,
            item_name,
            hints: Vec::new(),
            query_source: None,
            kind,
        })
    }

    /// Legacy filtered group-join: `LEFT NEST ... ON KEYS` under a temporary
    /// alias plus a LET binding the group name to the filtered array.
    fn legacy_filtered_nest(
        &mut self,
        join: &JoinClause,
        entity: &str,
        sub: &QueryModel,
        join_kind: JoinKind,
        group_id: SourceId,
    ) -> Result<ExtentPart, QueryGenerationError> {
        if !Self::is_key_accessor(&join.inner_key) {
            return Err(QueryGenerationError::UnsupportedClause(
                "lookup joins require the document key accessor as the inner key".to_string(),
            ));
        }
        let item_name = self.extent_name(join.id);
        let mut part = self.legacy_filtered_nest_inner(
            entity,
            &join.outer_key,
            sub,
            join_kind,
            item_name,
            Some(group_id),
        )?;
        part.query_source = Some(group_id);
        Ok(part)
    }

    fn legacy_filtered_nest_inner(
        &mut self,
        entity: &str,
        keys: &Expr,
        sub: &QueryModel,
        join_kind: JoinKind,
        let_name: String,
        query_source: Option<SourceId>,
    ) -> Result<ExtentPart, QueryGenerationError> {
        let source = escape_identifier(&self.ctx.collections.collection_name(entity));
        let temp_name = self.ctx.extent_names.unlinked_name();
        let on_keys = self.expression(keys)?;

        // The sub main source mints its own alias, used as the comprehension
        // iteration variable so the inner predicates resolve against it.
        let iterator = self.extent_name(sub.main.id);
        let mut predicates = Vec::new();
        for clause in &sub.body {
            match clause {
                BodyClause::Where(where_clause) => {
                    predicates.push(self.expression(&where_clause.predicate)?);
                }
                other => {
                    return Err(QueryGenerationError::InvalidCorrelation(format!(
                        "{} clause is not allowed on the inner side of a nest",
                        other.kind_name()
                    )));
                }
            }
        }

        let value = if predicates.is_empty() {
            format!("ARRAY {0} FOR {0} IN {1} END", iterator, temp_name)
        } else {
            format!(
                "ARRAY {0} FOR {0} IN {1} WHEN {2} END",
                iterator,
                temp_name,
                predicates.join(" AND ")
            )
        };
        self.parts.add_let(LetPart {
            item_name: let_name,
            value,
        });

        Ok(ExtentPart {
            source,
            item_name: temp_name,
            hints: Vec::new(),
            query_source,
            kind: ExtentKind::LookupJoin { join_kind, on_keys },
        })
    }

    fn visit_additional_source(
        &mut self,
        clause: &AdditionalSourceClause,
    ) -> Result<(), QueryGenerationError> {
        match &clause.source {
            AdditionalSource::Member(expr) => {
                // Unnest operation.
                let source = self.expression(expr)?;
                let item_name = self.extent_name(clause.id);
                self.parts.add_extent(ExtentPart {
                    source,
                    item_name,
                    hints: Vec::new(),
                    query_source: None,
                    kind: ExtentKind::Unnest {
                        join_kind: JoinKind::InnerUnnest,
                    },
                });
                Ok(())
            }
            AdditionalSource::SubQuery(sub) => match &sub.main.source {
                SourceExpr::SourceRef(ref_id) => {
                    self.flatten_group_join(clause.id, *ref_id, sub.has_default_if_empty())
                }
                SourceExpr::Member(expr) => {
                    let join_kind = if sub.has_default_if_empty() {
                        JoinKind::LeftUnnest
                    } else {
                        JoinKind::InnerUnnest
                    };
                    let source = self.expression(expr)?;
                    let item_name = self.extent_name(clause.id);
                    self.parts.add_extent(ExtentPart {
                        source,
                        item_name,
                        hints: Vec::new(),
                        query_source: None,
                        kind: ExtentKind::Unnest { join_kind },
                    });

                    // The subquery clauses use the unnest's alias, and its
                    // filters apply to the main query.
                    self.ctx.extent_names.link(clause.id, sub.main.id);
                    for body_clause in &sub.body {
                        self.visit_body_clause(body_clause, sub)?;
                    }
                    Ok(())
                }
                _ => Err(QueryGenerationError::UnsupportedClause(
                    "additional source must be a member access or a group-join reference"
                        .to_string(),
                )),
            },
        }
    }

    /// A flattening reference to a group join converts the NEST into an
    /// ordinary join, since the model iterates the group instead of nesting
    /// it.
    fn flatten_group_join(
        &mut self,
        clause_id: SourceId,
        ref_id: SourceId,
        left_outer: bool,
    ) -> Result<(), QueryGenerationError> {
        let position = self.parts.extents_mut().iter().position(|part| {
            part.query_source == Some(ref_id) && matches!(part.kind, ExtentKind::AnsiJoin { .. })
        });

        match position {
            Some(index) => {
                let converted = if left_outer {
                    JoinKind::LeftJoin
                } else {
                    JoinKind::InnerJoin
                };
                if let Some(join_kind) = self.parts.extents_mut()[index].join_kind_mut() {
                    *join_kind = converted;
                }
                // References to the flattened source get the join's alias.
                self.ctx.extent_names.link(ref_id, clause_id);
                Ok(())
            }
            None => Err(QueryGenerationError::UnsupportedClause(
                "additional source does not reference a group join that can be flattened"
                    .to_string(),
            )),
        }
    }

    // ===== Result operators =====

    fn visit_result_operator(
        &mut self,
        operator: &ResultOperator,
    ) -> Result<(), QueryGenerationError> {
        match operator {
            ResultOperator::Take(count) => {
                let count = self.expression(count)?;
                self.parts.set_limit(count);
            }
            ResultOperator::Skip(count) => {
                let count = self.expression(count)?;
                self.parts.set_offset(count);
            }
            ResultOperator::First => {
                // Short circuit: only one row is needed.
                self.parts.set_limit(1);
            }
            ResultOperator::Single => {
                // Two rows, so "more than one" is detectable downstream.
                self.parts.set_limit(2);
            }
            ResultOperator::Distinct => self.parts.set_distinct(),
            ResultOperator::Explain => self.parts.set_explain(),
            ResultOperator::Any => {
                let shape = if self.is_subquery {
                    QueryType::SubqueryAny
                } else {
                    QueryType::MainAny
                };
                self.parts.set_query_type(shape)?;
                if shape == QueryType::SubqueryAny {
                    // The iteration variable is unused for ANY, but generated
                    // for consistency with ALL.
                    let name = self.ctx.extent_names.unlinked_name();
                    self.parts.set_any_all_extent_name(name);
                }
            }
            ResultOperator::All(predicate) => self.visit_all_operator(predicate)?,
            ResultOperator::Contains(item) => {
                let item = self.expression(item)?;
                self.parts.add_wrapping_function(format!("{} IN ", item));
            }
            ResultOperator::GroupBy(group) => self.visit_group_operator(group)?,
            ResultOperator::Average => {
                self.parts.set_aggregate_function("AVG");
                self.is_aggregated = true;
            }
            ResultOperator::Count => {
                self.parts.set_aggregate_function("COUNT");
                self.is_aggregated = true;
            }
            ResultOperator::Max => {
                self.parts.set_aggregate_function("MAX");
                self.is_aggregated = true;
            }
            ResultOperator::Min => {
                self.parts.set_aggregate_function("MIN");
                self.is_aggregated = true;
            }
            ResultOperator::Sum => {
                self.parts.set_aggregate_function("SUM");
                self.is_aggregated = true;
            }
            ResultOperator::Union(second) => self.visit_union(second, true)?,
            ResultOperator::Concat(second) => self.visit_union(second, false)?,
            ResultOperator::DefaultIfEmpty => {
                return Err(QueryGenerationError::UnsupportedClause(format!(
                    "result operator '{}' is only supported on join and unnest subqueries",
                    operator.kind_name()
                )));
            }
        }

        Ok(())
    }

    fn visit_all_operator(&mut self, predicate: &Expr) -> Result<(), QueryGenerationError> {
        let shape = if self.is_subquery {
            QueryType::SubqueryAll
        } else {
            QueryType::MainAll
        };
        self.parts.set_query_type(shape)?;

        if shape == QueryType::SubqueryAll {
            // Each extent becomes a property of the subquery output, so
            // references inside the SATISFIES predicate are prefixed with the
            // iteration variable.
            let name = self.ctx.extent_names.unlinked_name();
            self.ctx.extent_names.set_prefix(Some(format!("{}.", name)));
            let rendered = self.expression(predicate);
            self.ctx.extent_names.set_prefix(None);
            self.parts.set_where_all(rendered?);
            self.parts.set_any_all_extent_name(name);
        } else {
            let rendered = self.expression(predicate)?;
            self.parts.set_where_all(rendered);
        }
        Ok(())
    }

    fn visit_group_operator(&mut self, group: &GroupByOperator) -> Result<(), QueryGenerationError> {
        let grouping_source = self.ctx.grouping_source.ok_or_else(|| {
            QueryGenerationError::UnsupportedClause(
                "group-by requires an owning grouping subquery".to_string(),
            )
        })?;

        let mut rewriter = ProjectionRewriter::new(grouping_source);

        // A multipart key contributes each component to the GROUP BY clause;
        // key references flatten through the record construction.
        if let Expr::Object(fields) = &group.key {
            for (_, expr) in fields {
                let rendered = self.expression(expr)?;
                self.parts.add_group_by(rendered);
            }
        } else {
            let rendered = self.expression(&group.key)?;
            self.parts.add_group_by(rendered);
        }
        rewriter.register("key", group.key.clone());

        match &group.element {
            Expr::Source(element_id) => {
                // References to the grouping output resolve to the grouped
                // extent.
                self.ctx.extent_names.link(*element_id, grouping_source);
            }
            _ => {
                return Err(QueryGenerationError::UnsupportedClause(
                    "group-by element selector must be a source reference".to_string(),
                ));
            }
        }

        self.grouping_rewriter = Some(rewriter);
        Ok(())
    }

    fn visit_union(
        &mut self,
        second: &QueryModel,
        distinct: bool,
    ) -> Result<(), QueryGenerationError> {
        // Derived context: alias numbering continues, grouping state does not
        // leak into the other branch.
        let saved_grouping = self.ctx.grouping_source.take();

        let mut visitor = QueryModelVisitor::new(&mut *self.ctx);
        let result = visitor
            .visit_query_model(second)
            .map(|_| visitor.into_query());

        self.ctx.grouping_source = saved_grouping;

        let query = result?;
        self.parts
            .add_union(format!("{}{}", if distinct { " UNION " } else { " UNION ALL " }, query));
        Ok(())
    }

    // ===== Select clause =====

    fn visit_select_clause(
        &mut self,
        select: &SelectClause,
        model: &QueryModel,
    ) -> Result<(), QueryGenerationError> {
        match self.parts.query_type() {
            QueryType::SubqueryAny => {
                // The select statement is unused for ANY subqueries; the
                // extent stands in for it.
                let name = self.extent_name(model.main.id);
                self.parts.set_select(name);
            }
            QueryType::SubqueryAll => {
                // ALL subqueries return every extent so the SATISFIES
                // predicate can reference them.
                let names = self.parts.extent_item_names().join(", ");
                self.parts.set_select(names);
            }
            _ => {
                let rendered = self.select_parameters(&select.selector)?;
                self.parts.set_select(rendered);
            }
        }
        Ok(())
    }

    fn select_parameters(&mut self, selector: &Expr) -> Result<String, QueryGenerationError> {
        if matches!(selector, Expr::Source(_)) && self.is_aggregated {
            // Aggregating whole rows of an extent: COUNT(*) and friends.
            return Ok("*".to_string());
        }
        self.expression(selector)
    }
}
