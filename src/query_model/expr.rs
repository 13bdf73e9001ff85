//! Value-level expression nodes.
//!
//! Expressions form a tree and may be shared structurally between clauses
//! (e.g. a grouping key referenced again in a later having or order-by).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{QueryModel, SourceId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    DateTime(DateTime<Utc>),
    Array(Vec<Literal>),
    Object(Vec<(String, Literal)>),
}

impl From<serde_json::Value> for Literal {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Literal::Null,
            serde_json::Value::Bool(b) => Literal::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Literal::Int(i)
                } else {
                    Literal::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Literal::Str(s),
            serde_json::Value::Array(items) => {
                Literal::Array(items.into_iter().map(Literal::from).collect())
            }
            serde_json::Value::Object(map) => Literal::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Literal::from(value)))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// A declared member of a declared entity kind, resolved to a serialized
/// field name through the field-name contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
}

impl MemberRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        MemberRef {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Constant(Literal),
    /// A reference to a query source; renders as the source's extent alias.
    Source(SourceId),
    Property {
        base: Box<Expr>,
        member: MemberRef,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Null-filling. Chains nest to the right and are flattened into a single
    /// n-ary call during translation.
    Coalesce {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// A call mapped to a target builtin through the function registry.
    Call {
        function: String,
        args: Vec<Expr>,
    },
    /// Record construction; renders as a value-object.
    Object(Vec<(String, Expr)>),
    /// An embedded sub-pipeline, compiled recursively.
    SubQuery(Box<QueryModel>),
}

impl Expr {
    pub fn constant(literal: Literal) -> Expr {
        Expr::Constant(literal)
    }

    pub fn source(id: SourceId) -> Expr {
        Expr::Source(id)
    }

    pub fn property(base: Expr, owner: impl Into<String>, name: impl Into<String>) -> Expr {
        Expr::Property {
            base: Box::new(base),
            member: MemberRef::new(owner, name),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn coalesce(left: Expr, right: Expr) -> Expr {
        Expr::Coalesce {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn conditional(condition: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn call(function: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call {
            function: function.into(),
            args,
        }
    }

    pub fn sub_query(model: QueryModel) -> Expr {
        Expr::SubQuery(Box::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_from_json_value() {
        assert_eq!(Literal::from(json!(null)), Literal::Null);
        assert_eq!(Literal::from(json!(true)), Literal::Bool(true));
        assert_eq!(Literal::from(json!(42)), Literal::Int(42));
        assert_eq!(Literal::from(json!("abc")), Literal::Str("abc".into()));
        assert_eq!(
            Literal::from(json!([1, "a"])),
            Literal::Array(vec![Literal::Int(1), Literal::Str("a".into())])
        );
        assert_eq!(
            Literal::from(json!({"a": 1})),
            Literal::Object(vec![("a".into(), Literal::Int(1))])
        );
    }
}
