//! Declarative universe selection.
//!
//! A [`FilterSpec`] describes how a session's symbol universe is computed:
//! a candidate source, a conjunction of per-symbol conditions evaluated
//! against a provider snapshot, optional sort keys, and a size cap.

use serde::Deserialize;
use serde_json::Value;

/// First stage of universe resolution: where candidate symbols come from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CandidateSource {
    Watchlist {
        #[serde(default)]
        symbols: Vec<String>,
    },
    Index {
        #[serde(default)]
        name: String,
    },
    InstrumentMaster {
        #[serde(default)]
        exchange: String,
        #[serde(default = "default_segment")]
        segment: String,
    },
}

fn default_segment() -> String {
    "cm".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Between,
}

/// One condition against a named snapshot field. Conditions combine with
/// logical AND; a symbol missing the field fails the condition.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SortKey {
    pub field: String,
    #[serde(default = "default_direction")]
    pub direction: SortDirection,
}

fn default_direction() -> SortDirection {
    SortDirection::Asc
}

/// Declarative universe selector, immutable from configure until the next
/// configure replaces it.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterSpec {
    pub candidates: CandidateSource,
    #[serde(default)]
    pub conditions: Vec<FilterCondition>,
    #[serde(default)]
    pub sort: Vec<SortKey>,
    #[serde(default = "default_max_symbols")]
    pub max_symbols: usize,
    #[serde(default)]
    pub refresh_seconds: u64,
    #[serde(default)]
    pub grace_seconds: u64,
}

fn default_max_symbols() -> usize {
    50
}

/// Evaluate one operator. Total: every input combination yields a boolean;
/// non-comparable operands fail closed.
#[must_use]
pub fn passes(value: &Value, op: FilterOp, target: &Value) -> bool {
    match op {
        FilterOp::Eq => values_equal(value, target),
        FilterOp::Ne => !values_equal(value, target),
        FilterOp::Gt => compare(value, target).is_some_and(|ord| ord == std::cmp::Ordering::Greater),
        FilterOp::Gte => compare(value, target).is_some_and(|ord| ord != std::cmp::Ordering::Less),
        FilterOp::Lt => compare(value, target).is_some_and(|ord| ord == std::cmp::Ordering::Less),
        FilterOp::Lte => {
            compare(value, target).is_some_and(|ord| ord != std::cmp::Ordering::Greater)
        }
        FilterOp::In => target
            .as_array()
            .is_some_and(|options| options.iter().any(|t| values_equal(value, t))),
        FilterOp::NotIn => target
            .as_array()
            .is_some_and(|options| !options.iter().any(|t| values_equal(value, t))),
        FilterOp::Between => between(value, target),
    }
}

/// Equality with numeric coercion, so `5` matches `5.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    let (x, y) = (a.as_f64()?, b.as_f64()?);
    x.partial_cmp(&y)
}

/// `[lo, hi]` inclusive on both ends.
fn between(value: &Value, target: &Value) -> bool {
    let Some(bounds) = target.as_array() else {
        return false;
    };
    if bounds.len() != 2 {
        return false;
    }
    let (Some(v), Some(lo), Some(hi)) = (value.as_f64(), bounds[0].as_f64(), bounds[1].as_f64())
    else {
        return false;
    };
    lo <= v && v <= hi
}
