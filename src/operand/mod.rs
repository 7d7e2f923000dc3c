//! Operand strings from segmentation leaves, classified once into [`Operand`].
//!
//! Marker forms: `lower(x)`, `wildcard(*x*)`, `wildcard(x*)`, `wildcard(*x)`,
//! `regex(x)`, `gt(x)`, `gte(x)`, `lt(x)`, `lte(x)`, `inlist(id)`. Anything
//! else is an exact, case-sensitive match.

mod grammar;

use std::fmt;

use regex::Regex;

/// Numeric ordering operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Gte => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Lte => lhs <= rhs,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Gt => "gt",
            CompareOp::Gte => "gte",
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
        };
        f.write_str(s)
    }
}

/// A `regex(..)` operand. The pattern is compiled once and anchored at both
/// ends; a pattern that fails to compile never matches.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    compiled: Option<Regex>,
}

impl Pattern {
    #[must_use]
    pub fn new(source: &str) -> Self {
        let compiled = Regex::new(&format!("^(?:{source})$")).ok();
        if compiled.is_none() {
            tracing::debug!(pattern = source, "invalid regex operand");
        }
        Self {
            source: source.to_owned(),
            compiled,
        }
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.compiled.is_some()
    }

    pub(crate) fn is_full_match(&self, candidate: &str) -> bool {
        self.compiled
            .as_ref()
            .is_some_and(|re| re.is_match(candidate))
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// A classified operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Exact, case-sensitive equality.
    Equals(String),
    /// Case-insensitive equality.
    Lower(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Regex(Pattern),
    Compare { op: CompareOp, bound: String },
    /// List membership, answered by a
    /// [`ListMembershipService`](crate::services::ListMembershipService).
    InList(String),
}

impl Operand {
    /// Classify an operand string. Never fails: unknown markers are exact matches.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        use winnow::Parser;
        grammar::operand
            .parse(raw)
            .unwrap_or_else(|_| Operand::Equals(raw.trim().to_owned()))
    }

    /// Apply the operand to a candidate already in canonical tag form.
    ///
    /// [`Operand::InList`] always returns `false` here; membership needs a collaborator.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Operand::Equals(v) => candidate == v,
            Operand::Lower(v) => candidate.trim().to_lowercase() == v.to_lowercase(),
            Operand::Contains(v) => candidate.contains(v.as_str()),
            Operand::StartsWith(v) => candidate.starts_with(v.as_str()),
            Operand::EndsWith(v) => candidate.ends_with(v.as_str()),
            Operand::Regex(p) => p.is_full_match(candidate),
            Operand::Compare { op, bound } => {
                match (candidate.trim().parse::<f64>(), bound.parse::<f64>()) {
                    (Ok(lhs), Ok(rhs)) => op.holds(lhs, rhs),
                    _ => false,
                }
            }
            Operand::InList(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(operand: &str, candidate: &str) -> bool {
        Operand::parse(operand).matches(candidate)
    }

    #[test]
    fn exact_match_is_case_sensitive() {
        assert!(check("eq_value", "eq_value"));
        assert!(!check("eq_value", "Eq_Value"));
    }

    #[test]
    fn lower_ignores_case() {
        assert!(check("lower(something)", "SOMETHINg"));
        assert!(!check("lower(something)", "something else"));
    }

    #[test]
    fn wildcard_variants() {
        assert!(check("wildcard(*something*)", "asdsomethingxyz"));
        assert!(!check("wildcard(*something*)", "qwertyu"));
        assert!(check("wildcard(some*)", "something"));
        assert!(!check("wildcard(some*)", "awesome"));
        assert!(check("wildcard(*thing)", "something"));
        assert!(!check("wildcard(*thing)", "things"));
    }

    #[test]
    fn regex_is_full_match() {
        assert!(check("regex(myregex+)", "myregexxxxxx"));
        assert!(!check("regex(myregex+)", "myregeXxxxxx"));
        assert!(!check("regex(abc)", "xxabcxx"));
    }

    #[test]
    fn regex_with_nested_groups() {
        assert!(check(
            "regex(<(W[^>]*)(.*?)>)",
            "<WingifySDK id=1></WingifySDK>"
        ));
        assert!(!check(
            "regex(<(W[^>]*)(.*?)>)",
            "<wingifySDK id=1></WingifySDK>"
        ));
    }

    #[test]
    fn malformed_regex_never_matches() {
        let op = Operand::parse("regex(*)");
        match &op {
            Operand::Regex(p) => assert!(!p.is_valid()),
            other => panic!("expected regex operand, got {other:?}"),
        }
        assert!(!op.matches("*"));
        assert!(!op.matches(""));
    }

    #[test]
    fn ordering_operators() {
        assert!(check("gt(150)", "160"));
        assert!(!check("gt(150)", "150"));
        assert!(!check("gt(150)", "100"));
        assert!(check("gte(150)", "150"));
        assert!(check("lt(150)", "100"));
        assert!(!check("lt(150)", "150"));
        assert!(!check("lt(150)", "200"));
        assert!(check("lte(150)", "150"));
        assert!(check("lt(1.5)", "1.25"));
    }

    #[test]
    fn ordering_fails_closed_on_text() {
        assert!(!check("gt(150)", "abc"));
        assert!(!check("lt(150)", "abc"));
        assert!(!check("gt(abc)", "160"));
    }

    #[test]
    fn inlist_needs_a_collaborator() {
        assert!(!check("inlist(ns:1)", "anything"));
    }

    #[test]
    fn compare_op_display() {
        assert_eq!(CompareOp::Gte.to_string(), "gte");
        assert_eq!(CompareOp::Lt.to_string(), "lt");
    }
}
