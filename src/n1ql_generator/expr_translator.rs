//! Value-expression translation.
//!
//! Converts a single expression node into a target-language text fragment
//! with correct operator-precedence parenthesization. Nested query models
//! recurse into a fresh subquery visitor over the same generation context,
//! so alias numbering stays globally unique.

use chrono::SecondsFormat;

use crate::metadata::ValueRepr;
use crate::query_model::{BinaryOp, Expr, Literal, MemberRef, UnaryOp};

use super::errors::QueryGenerationError;
use super::function_registry;
use super::model_visitor::QueryModelVisitor;
use super::QueryGenerationContext;

/// Operator precedence, loosest first. Atoms rank above every operator.
fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And => 2,
        BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
        BinaryOp::Add | BinaryOp::Sub => 5,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
    }
}

fn expr_precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Binary { op, .. } => binary_precedence(*op),
        Expr::Unary { op: UnaryOp::Not, .. } => 3,
        Expr::Unary { op: UnaryOp::Neg, .. } => 7,
        _ => u8::MAX,
    }
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "=",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "AND",
        BinaryOp::Or => "OR",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
    }
}

fn is_associative(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::And | BinaryOp::Or | BinaryOp::Add | BinaryOp::Mul
    )
}

/// Translate one expression node into a text fragment.
pub fn translate_expression(
    expr: &Expr,
    ctx: &mut QueryGenerationContext,
) -> Result<String, QueryGenerationError> {
    match expr {
        Expr::Constant(literal) => Ok(render_literal(literal)),
        Expr::Source(id) => Ok(ctx.extent_names.extent_name(*id)),
        Expr::Property { base, member } => translate_property(base, member, ctx),
        Expr::Binary { op, left, right } => translate_binary(*op, left, right, ctx),
        Expr::Unary { op, operand } => translate_unary(*op, operand, ctx),
        Expr::Coalesce { left, right } => translate_coalesce(left, right, ctx),
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => Ok(format!(
            "CASE WHEN {} THEN {} ELSE {} END",
            translate_expression(condition, ctx)?,
            translate_expression(then, ctx)?,
            translate_expression(otherwise, ctx)?
        )),
        Expr::Call { function, args } => translate_call(function, args, ctx),
        Expr::Object(fields) => translate_object(fields, ctx),
        Expr::SubQuery(model) => {
            let mut visitor = QueryModelVisitor::new_subquery(ctx);
            visitor.visit_query_model(model)?;
            Ok(visitor.into_query())
        }
    }
}

fn translate_property(
    base: &Expr,
    member: &MemberRef,
    ctx: &mut QueryGenerationContext,
) -> Result<String, QueryGenerationError> {
    let mapping = ctx.fields.resolve(member);
    let base_text = translate_expression(base, ctx)?;
    let field = escape_identifier(&mapping.field);

    let access = if base_text.is_empty() {
        field
    } else {
        format!("{}.{}", base_text, field)
    };

    // Converter-aware coercion: stored -> declared, exactly one call.
    Ok(match (mapping.stored, mapping.declared) {
        (ValueRepr::Iso8601, ValueRepr::UnixMillis) => format!("STR_TO_MILLIS({})", access),
        (ValueRepr::UnixMillis, ValueRepr::Iso8601) => format!("MILLIS_TO_STR({})", access),
        _ => access,
    })
}

fn translate_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    ctx: &mut QueryGenerationContext,
) -> Result<String, QueryGenerationError> {
    let precedence = binary_precedence(op);

    let left_text = translate_expression(left, ctx)?;
    let left_text = if expr_precedence(left) < precedence {
        format!("({})", left_text)
    } else {
        left_text
    };

    let right_text = translate_expression(right, ctx)?;
    let right_precedence = expr_precedence(right);
    let needs_parens =
        right_precedence < precedence || (right_precedence == precedence && !is_associative(op));
    let right_text = if needs_parens {
        format!("({})", right_text)
    } else {
        right_text
    };

    Ok(format!("{} {} {}", left_text, binary_symbol(op), right_text))
}

fn translate_unary(
    op: UnaryOp,
    operand: &Expr,
    ctx: &mut QueryGenerationContext,
) -> Result<String, QueryGenerationError> {
    let (symbol, precedence) = match op {
        UnaryOp::Not => ("NOT ", 3),
        UnaryOp::Neg => ("-", 7),
    };
    let text = translate_expression(operand, ctx)?;
    let text = if expr_precedence(operand) < precedence {
        format!("({})", text)
    } else {
        text
    };
    Ok(format!("{}{}", symbol, text))
}

/// A chain of N coalescing operators renders as a single call with N+1
/// arguments. Right-nested chains are flattened into one argument list.
fn translate_coalesce(
    left: &Expr,
    right: &Expr,
    ctx: &mut QueryGenerationContext,
) -> Result<String, QueryGenerationError> {
    let mut args = vec![translate_expression(left, ctx)?];
    let mut rest = right;
    loop {
        match rest {
            Expr::Coalesce { left, right } => {
                args.push(translate_expression(left, ctx)?);
                rest = right;
            }
            other => {
                args.push(translate_expression(other, ctx)?);
                break;
            }
        }
    }
    Ok(format!("IFMISSINGORNULL({})", args.join(", ")))
}

fn translate_call(
    function: &str,
    args: &[Expr],
    ctx: &mut QueryGenerationContext,
) -> Result<String, QueryGenerationError> {
    let mapping = function_registry::lookup(function).ok_or_else(|| {
        QueryGenerationError::UnsupportedExpression(format!(
            "function call '{}/{}' has no translation",
            function,
            args.len()
        ))
    })?;

    if args.len() < mapping.min_args || args.len() > mapping.max_args {
        return Err(QueryGenerationError::UnsupportedExpression(format!(
            "function call '{}/{}' has the wrong number of arguments",
            function,
            args.len()
        )));
    }

    let rendered: Result<Vec<String>, _> = args
        .iter()
        .map(|arg| translate_expression(arg, ctx))
        .collect();
    let rendered = rendered?;

    Ok(match mapping.render {
        Some(render) => render(&rendered),
        None => format!("{}({})", mapping.target, rendered.join(", ")),
    })
}

fn translate_object(
    fields: &[(String, Expr)],
    ctx: &mut QueryGenerationContext,
) -> Result<String, QueryGenerationError> {
    let mut parts = Vec::with_capacity(fields.len());
    for (name, expr) in fields {
        parts.push(format!(
            "{}: {}",
            quote_string(name),
            translate_expression(expr, ctx)?
        ));
    }
    Ok(format!("{{{}}}", parts.join(", ")))
}

pub(crate) fn render_literal(literal: &Literal) -> String {
    match literal {
        Literal::Null => "NULL".to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => f.to_string(),
        Literal::Str(s) => quote_string(s),
        Literal::DateTime(dt) => quote_string(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Literal::Array(items) => {
            let rendered: Vec<String> = items.iter().map(render_literal).collect();
            format!("[{}]", rendered.join(", "))
        }
        Literal::Object(fields) => {
            let rendered: Vec<String> = fields
                .iter()
                .map(|(key, value)| format!("{}: {}", quote_string(key), render_literal(value)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
    }
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Escape an identifier with backticks when it is not a plain identifier.
pub(crate) fn escape_identifier(identifier: &str) -> String {
    let plain = !identifier.is_empty()
        && identifier
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if plain {
        identifier.to_string()
    } else {
        format!("`{}`", identifier.replace('`', "``"))
    }
}
