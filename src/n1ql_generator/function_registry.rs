//! Call-signature to N1QL builtin mappings.
//!
//! Maps model-level function calls to target builtins, with arity bounds and
//! optional custom rendering for calls that do not translate 1:1. Unmapped
//! calls are a translation failure, never a silent pass-through.

use std::collections::HashMap;

#[derive(Clone)]
pub struct FunctionMapping {
    /// Model-level call name (lookup key).
    #[allow(dead_code)]
    pub name: &'static str,
    /// Target builtin name.
    pub target: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    /// Custom renderer for calls that are not a plain `TARGET(args)`.
    pub render: Option<fn(&[String]) -> String>,
}

impl FunctionMapping {
    const fn plain(name: &'static str, target: &'static str, arity: usize) -> Self {
        FunctionMapping {
            name,
            target,
            min_args: arity,
            max_args: arity,
            render: None,
        }
    }
}

pub fn lookup(name: &str) -> Option<&'static FunctionMapping> {
    FUNCTION_MAPPINGS.get(name)
}

lazy_static::lazy_static! {
    static ref FUNCTION_MAPPINGS: HashMap<&'static str, FunctionMapping> = {
        let mut m = HashMap::new();

        // ===== STRING FUNCTIONS =====

        m.insert("to_upper", FunctionMapping::plain("to_upper", "UPPER", 1));
        m.insert("to_lower", FunctionMapping::plain("to_lower", "LOWER", 1));
        m.insert("trim", FunctionMapping::plain("trim", "TRIM", 1));
        m.insert("length", FunctionMapping::plain("length", "LENGTH", 1));
        m.insert("substr", FunctionMapping {
            name: "substr",
            target: "SUBSTR",
            min_args: 2,
            max_args: 3,
            render: None,
        });
        m.insert("contains", FunctionMapping::plain("contains", "CONTAINS", 2));
        // starts_with(s, prefix): POSITION is zero-based
        m.insert("starts_with", FunctionMapping {
            name: "starts_with",
            target: "POSITION",
            min_args: 2,
            max_args: 2,
            render: Some(|args| format!("POSITION({}, {}) = 0", args[0], args[1])),
        });

        // ===== DATE/TIME FUNCTIONS =====

        m.insert("date_add", FunctionMapping::plain("date_add", "DATE_ADD_MILLIS", 3));
        m.insert("date_diff", FunctionMapping::plain("date_diff", "DATE_DIFF_MILLIS", 3));
        m.insert("date_part", FunctionMapping::plain("date_part", "DATE_PART_MILLIS", 2));

        // ===== NUMERIC FUNCTIONS =====

        m.insert("abs", FunctionMapping::plain("abs", "ABS", 1));
        m.insert("round", FunctionMapping {
            name: "round",
            target: "ROUND",
            min_args: 1,
            max_args: 2,
            render: None,
        });
        m.insert("floor", FunctionMapping::plain("floor", "FLOOR", 1));
        m.insert("ceil", FunctionMapping::plain("ceil", "CEIL", 1));

        // ===== METADATA ACCESSORS =====

        m.insert("meta", FunctionMapping::plain("meta", "META", 1));
        // Document key accessor
        m.insert("key", FunctionMapping {
            name: "key",
            target: "META",
            min_args: 1,
            max_args: 1,
            render: Some(|args| format!("META({}).id", args[0])),
        });

        m
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_signatures_resolve() {
        let mapping = lookup("to_upper").expect("to_upper should be mapped");
        assert_eq!(mapping.target, "UPPER");

        let key = lookup("key").expect("key should be mapped");
        let rendered = (key.render.expect("custom render"))(&["Extent1".to_string()]);
        assert_eq!(rendered, "META(Extent1).id");
    }

    #[test]
    fn unknown_signatures_do_not_resolve() {
        assert!(lookup("frobnicate").is_none());
    }

    #[test]
    fn variable_arity_bounds() {
        let substr = lookup("substr").unwrap();
        assert_eq!((substr.min_args, substr.max_args), (2, 3));
    }
}
