//! Rewrites references to a projection step's output into the expressions
//! that produced it.
//!
//! After a grouping subquery, select/having/order-by expressions reference
//! the synthetic grouping output. Emitting that output as a literal subquery
//! would be both invalid and wasteful; instead every matching member access
//! is replaced by the original sub-expression, recursively, so multi-level
//! record construction flattens completely.

use crate::query_model::{Expr, SourceId};

use super::errors::QueryGenerationError;

#[derive(Debug)]
pub struct ProjectionRewriter {
    /// Identity of the synthetic step output being rewritten away.
    source: SourceId,
    /// Member name of the step output -> original expression.
    members: Vec<(String, Expr)>,
}

impl ProjectionRewriter {
    pub fn new(source: SourceId) -> Self {
        ProjectionRewriter {
            source,
            members: Vec::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, expr: Expr) {
        self.members.push((name.into(), expr));
    }

    fn lookup(
        &self,
        members: &[(String, Expr)],
        name: &str,
    ) -> Result<Expr, QueryGenerationError> {
        members
            .iter()
            .find(|(member, _)| member == name)
            .map(|(_, expr)| expr.clone())
            .ok_or_else(|| {
                QueryGenerationError::RewriteTargetNotFound(format!(
                    "member '{}' is not produced by the prior projection",
                    name
                ))
            })
    }

    /// Produce an equivalent expression with every reference to the step
    /// output replaced by the original sub-expressions.
    pub fn rewrite(&self, expr: &Expr) -> Result<Expr, QueryGenerationError> {
        match expr {
            Expr::Property { base, member } => {
                let base = self.rewrite(base)?;
                match &base {
                    Expr::Source(id) if *id == self.source => {
                        self.lookup(&self.members, &member.name)
                    }
                    Expr::Object(fields) => self.lookup(fields, &member.name),
                    _ => Ok(Expr::Property {
                        base: Box::new(base),
                        member: member.clone(),
                    }),
                }
            }
            Expr::Binary { op, left, right } => Ok(Expr::Binary {
                op: *op,
                left: Box::new(self.rewrite(left)?),
                right: Box::new(self.rewrite(right)?),
            }),
            Expr::Unary { op, operand } => Ok(Expr::Unary {
                op: *op,
                operand: Box::new(self.rewrite(operand)?),
            }),
            Expr::Coalesce { left, right } => Ok(Expr::Coalesce {
                left: Box::new(self.rewrite(left)?),
                right: Box::new(self.rewrite(right)?),
            }),
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => Ok(Expr::Conditional {
                condition: Box::new(self.rewrite(condition)?),
                then: Box::new(self.rewrite(then)?),
                otherwise: Box::new(self.rewrite(otherwise)?),
            }),
            Expr::Call { function, args } => {
                let args: Result<Vec<Expr>, _> =
                    args.iter().map(|arg| self.rewrite(arg)).collect();
                Ok(Expr::Call {
                    function: function.clone(),
                    args: args?,
                })
            }
            Expr::Object(fields) => {
                let fields: Result<Vec<(String, Expr)>, _> = fields
                    .iter()
                    .map(|(name, expr)| Ok((name.clone(), self.rewrite(expr)?)))
                    .collect();
                Ok(Expr::Object(fields?))
            }
            // Subquery models resolve their own references through the
            // generation context; constants and source references pass
            // through untouched.
            Expr::SubQuery(_) | Expr::Constant(_) | Expr::Source(_) => Ok(expr.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_model::{BinaryOp, Literal};

    fn group_ref(name: &str) -> Expr {
        Expr::property(Expr::source(SourceId(10)), "Grouping", name)
    }

    fn pre_group_field(name: &str) -> Expr {
        Expr::property(Expr::source(SourceId(1)), "Order", name)
    }

    #[test]
    fn single_key_reference_resolves_to_the_key_expression() {
        let mut rewriter = ProjectionRewriter::new(SourceId(10));
        rewriter.register("key", pre_group_field("customerId"));

        let rewritten = rewriter.rewrite(&group_ref("key")).unwrap();
        assert_eq!(rewritten, pre_group_field("customerId"));
    }

    #[test]
    fn multipart_key_access_flattens_through_record_construction() {
        let key = Expr::Object(vec![
            ("region".into(), pre_group_field("region")),
            ("status".into(), pre_group_field("status")),
        ]);
        let mut rewriter = ProjectionRewriter::new(SourceId(10));
        rewriter.register("key", key);

        // g.key.region -> Extent1.region
        let access = Expr::property(group_ref("key"), "GroupKey", "region");
        let rewritten = rewriter.rewrite(&access).unwrap();
        assert_eq!(rewritten, pre_group_field("region"));
    }

    #[test]
    fn rewrite_recurses_through_operators() {
        let mut rewriter = ProjectionRewriter::new(SourceId(10));
        rewriter.register("key", pre_group_field("customerId"));

        let expr = Expr::binary(
            BinaryOp::Eq,
            group_ref("key"),
            Expr::constant(Literal::Str("c42".into())),
        );
        let rewritten = rewriter.rewrite(&expr).unwrap();
        assert_eq!(
            rewritten,
            Expr::binary(
                BinaryOp::Eq,
                pre_group_field("customerId"),
                Expr::constant(Literal::Str("c42".into())),
            )
        );
    }

    #[test]
    fn unrelated_references_pass_through() {
        let rewriter = ProjectionRewriter::new(SourceId(10));
        let expr = pre_group_field("total");
        assert_eq!(rewriter.rewrite(&expr).unwrap(), expr);
    }

    #[test]
    fn missing_member_is_a_contract_violation() {
        let mut rewriter = ProjectionRewriter::new(SourceId(10));
        rewriter.register("key", pre_group_field("customerId"));

        let err = rewriter.rewrite(&group_ref("value")).unwrap_err();
        assert!(matches!(
            err,
            QueryGenerationError::RewriteTargetNotFound(_)
        ));
        assert!(err.to_string().contains("value"));
    }
}
