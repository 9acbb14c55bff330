//! Result matcher grammar for metric specs
//!
//! `"*"` matches any value, `"!=X"` matches values unequal to `X`, and
//! anything else is an exact match against the return value's string form.

use serde::{Deserialize, Serialize};

/// Filter applied to an event's return value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultMatcher {
    /// Accept every value
    Any,
    /// Accept values whose string form differs
    NotEqual(String),
    /// Accept values whose string form matches
    Exact(String),
}

impl ResultMatcher {
    /// Parse a matcher spec. Empty specs match everything; unrecognized
    /// specs fall back to exact matching.
    pub fn parse(spec: &str) -> Self {
        if spec.is_empty() || spec == "*" {
            return ResultMatcher::Any;
        }
        if let Some(rest) = spec.strip_prefix("!=") {
            return ResultMatcher::NotEqual(rest.to_string());
        }
        ResultMatcher::Exact(spec.to_string())
    }

    /// Check a return value's string form; absent values only satisfy `Any`
    pub fn matches(&self, value: Option<&str>) -> bool {
        match self {
            ResultMatcher::Any => true,
            ResultMatcher::NotEqual(expected) => value.map_or(true, |v| v != expected),
            ResultMatcher::Exact(expected) => value.map_or(false, |v| v == expected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_matches_everything() {
        let m = ResultMatcher::parse("*");
        assert!(m.matches(Some("ok")));
        assert!(m.matches(Some("error")));
        assert!(m.matches(None));
    }

    #[test]
    fn test_not_equal() {
        let m = ResultMatcher::parse("!=ok");
        assert_eq!(m, ResultMatcher::NotEqual("ok".to_string()));
        assert!(!m.matches(Some("ok")));
        assert!(m.matches(Some("error")));
    }

    #[test]
    fn test_unrecognized_spec_is_exact_match() {
        let m = ResultMatcher::parse("ok");
        assert!(m.matches(Some("ok")));
        assert!(!m.matches(Some("error")));
        assert!(!m.matches(None));
    }

    #[test]
    fn test_empty_spec_matches_all() {
        assert_eq!(ResultMatcher::parse(""), ResultMatcher::Any);
    }
}
