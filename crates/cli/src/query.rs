//! Post-processing helpers backing the REPL's `GET_WHERE`/`COUNT`/`SUM`/
//! `AVG`/`MIN_MAX`/`SCAN_ORDER` commands.
//!
//! None of this is a query engine in its own right — every command here
//! is a linear pass over whatever [`engine::Engine::scan`] (or a filtered
//! subset of it) already returned. `pattern` means a prefix/suffix/infix
//! wildcard using `*`, matched the way a shell glob would, not a regular
//! expression.

use std::cmp::Ordering as CmpOrdering;

/// `field op value` as parsed off a `GET_WHERE` command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Key,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    Equals,
    NotEquals,
    Like,
    NotLike,
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
}

impl ConditionOp {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_ascii_uppercase().as_str() {
            "=" | "EQ" | "EQUALS" => ConditionOp::Equals,
            "!=" | "NE" | "NOT_EQUALS" => ConditionOp::NotEquals,
            "LIKE" => ConditionOp::Like,
            "NOT_LIKE" => ConditionOp::NotLike,
            ">" | "GT" => ConditionOp::GreaterThan,
            "<" | "LT" => ConditionOp::LessThan,
            ">=" | "GE" => ConditionOp::GreaterEqual,
            "<=" | "LE" => ConditionOp::LessEqual,
            _ => return None,
        })
    }
}

pub struct Condition<'a> {
    pub field: Field,
    pub op: ConditionOp,
    pub value: &'a str,
}

/// Evaluates `condition` against one `(key, value)` pair, both given as raw
/// bytes and compared lossily as UTF-8 — the same looseness the matched
/// dataset (plain text keys/values) always assumed.
pub fn evaluate(key: &[u8], value: &[u8], condition: &Condition) -> bool {
    let target = match condition.field {
        Field::Key => String::from_utf8_lossy(key),
        Field::Value => String::from_utf8_lossy(value),
    };
    let target = target.as_ref();

    match condition.op {
        ConditionOp::Equals => target == condition.value,
        ConditionOp::NotEquals => target != condition.value,
        ConditionOp::Like => match_pattern(target, condition.value),
        ConditionOp::NotLike => !match_pattern(target, condition.value),
        ConditionOp::GreaterThan => numeric_or_lexical_cmp(target, condition.value) == CmpOrdering::Greater,
        ConditionOp::LessThan => numeric_or_lexical_cmp(target, condition.value) == CmpOrdering::Less,
        ConditionOp::GreaterEqual => numeric_or_lexical_cmp(target, condition.value) != CmpOrdering::Less,
        ConditionOp::LessEqual => numeric_or_lexical_cmp(target, condition.value) != CmpOrdering::Greater,
    }
}

fn numeric_or_lexical_cmp(a: &str, b: &str) -> CmpOrdering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal),
        _ => a.cmp(b),
    }
}

/// A `*`-wildcard match: `*` matches any run of characters, everything
/// else must match literally. An empty pattern matches everything.
pub fn match_pattern(text: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    if !pattern.contains('*') {
        return text == pattern;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut rest = text;

    if let Some(first) = parts.first() {
        if !first.is_empty() {
            if !rest.starts_with(first) {
                return false;
            }
            rest = &rest[first.len()..];
        }
    }
    for part in &parts[1..parts.len().saturating_sub(1)] {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    if let Some(last) = parts.last() {
        if !last.is_empty() && parts.len() > 1 {
            return rest.ends_with(last);
        }
    }
    true
}

/// Parsed result of `SUM`/`AVG`/`MIN_MAX`: every value in the scanned set
/// that parses as an `f64`, counted and folded in one pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumericSummary {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl NumericSummary {
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Folds every `(key, value)` pair whose key matches `pattern` (empty =
/// match all) and whose value parses as a number into a running
/// count/sum/min/max.
pub fn summarize(entries: &[(Vec<u8>, Vec<u8>)], pattern: &str) -> NumericSummary {
    let mut summary = NumericSummary::default();
    for (key, value) in entries {
        let key = String::from_utf8_lossy(key);
        if !pattern.is_empty() && !match_pattern(&key, pattern) {
            continue;
        }
        let value = String::from_utf8_lossy(value);
        if let Ok(n) = value.parse::<f64>() {
            if summary.count == 0 {
                summary.min = n;
                summary.max = n;
            } else {
                summary.min = summary.min.min(n);
                summary.max = summary.max.max(n);
            }
            summary.sum += n;
            summary.count += 1;
        }
    }
    summary
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Some(SortOrder::Asc),
            "DESC" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

/// Orders an already-collected scan result; `entries` is assumed to come
/// back from `Engine::scan` in ascending key order already, so `Asc` is a
/// no-op and `Desc` reverses it.
pub fn apply_order(mut entries: Vec<(Vec<u8>, Vec<u8>)>, order: SortOrder) -> Vec<(Vec<u8>, Vec<u8>)> {
    if order == SortOrder::Desc {
        entries.reverse();
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_prefix_wildcard_matches() {
        assert!(match_pattern("score:math:1", "score:math:*"));
        assert!(!match_pattern("score:english:1", "score:math:*"));
    }

    #[test]
    fn pattern_suffix_wildcard_matches() {
        assert!(match_pattern("employee:1:salary", "*:salary"));
        assert!(!match_pattern("employee:1:name", "*:salary"));
    }

    #[test]
    fn pattern_without_wildcard_is_exact() {
        assert!(match_pattern("abc", "abc"));
        assert!(!match_pattern("abc", "ab"));
    }

    #[test]
    fn empty_pattern_matches_everything() {
        assert!(match_pattern("anything", ""));
    }

    #[test]
    fn evaluate_numeric_greater_than_compares_as_numbers_not_strings() {
        let cond = Condition { field: Field::Value, op: ConditionOp::GreaterThan, value: "50" };
        assert!(evaluate(b"price:1", b"80", &cond));
        assert!(!evaluate(b"price:2", b"25", &cond));
    }

    #[test]
    fn evaluate_like_on_key_field() {
        let cond = Condition { field: Field::Key, op: ConditionOp::Like, value: "product:*" };
        assert!(evaluate(b"product:1", b"laptop", &cond));
        assert!(!evaluate(b"price:1", b"1200", &cond));
    }

    #[test]
    fn summarize_ignores_non_numeric_values_and_unmatched_keys() {
        let entries = vec![
            (b"score:math:1".to_vec(), b"95".to_vec()),
            (b"score:math:2".to_vec(), b"87".to_vec()),
            (b"score:english:1".to_vec(), b"88".to_vec()),
            (b"label".to_vec(), b"not-a-number".to_vec()),
        ];
        let summary = summarize(&entries, "score:math:*");
        assert_eq!(summary.count, 2);
        assert_eq!(summary.sum, 182.0);
        assert_eq!(summary.min, 87.0);
        assert_eq!(summary.max, 95.0);
    }

    #[test]
    fn apply_order_desc_reverses_ascending_scan_output() {
        let entries = vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ];
        let desc = apply_order(entries, SortOrder::Desc);
        assert_eq!(desc[0].0, b"c");
        assert_eq!(desc[2].0, b"a");
    }
}
