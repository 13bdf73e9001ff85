//! Engine version gate for clause features.
//!
//! The only capability consulted today is ANSI-style join support: engines
//! below 5.5 get the legacy lookup form (`JOIN ... ON KEYS`), everything at
//! or above it gets `JOIN ... ON <outer> = <inner>`.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
}

impl EngineVersion {
    /// First version with ANSI join/nest clauses.
    pub const ANSI_JOINS: EngineVersion = EngineVersion { major: 5, minor: 5 };

    pub fn new(major: u32, minor: u32) -> Self {
        EngineVersion { major, minor }
    }

    pub fn supports_ansi_joins(&self) -> bool {
        *self >= Self::ANSI_JOINS
    }
}

impl Default for EngineVersion {
    fn default() -> Self {
        EngineVersion::new(7, 1)
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(4, 5, false; "pre ansi")]
    #[test_case(5, 4, false; "minor below threshold")]
    #[test_case(5, 5, true; "threshold")]
    #[test_case(7, 1, true; "current")]
    fn ansi_join_gate(major: u32, minor: u32, expected: bool) {
        assert_eq!(EngineVersion::new(major, minor).supports_ansi_joins(), expected);
    }
}
