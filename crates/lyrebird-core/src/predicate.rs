//! Request predicates: per-field conditions a stub imposes on the
//! decoded request payload before it may serve.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LyrebirdError, LyrebirdResult};

/// Field path (dot-separated) to the condition applied to it. All
/// entries must hold for the stub to match.
pub type PredicateSet = BTreeMap<String, Predicate>;

/// One field condition: an object of operator checks, or any other
/// JSON value compared by deep equality.
///
/// Untagged, so `{"==": "a"}` parses as operators and `"a"` or
/// `{"nested": "a"}` as a literal. An object mixing operator and plain
/// keys lands in the literal arm and is rejected by [`validate_set`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    Ops(BTreeMap<PredicateOp, Value>),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PredicateOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "~=")]
    Matches,
    #[serde(rename = "size")]
    Size,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "notin")]
    NotIn,
    #[serde(rename = "allin")]
    AllIn,
}

/// Walks a dot-separated path through objects (by key) and arrays
/// (by numeric index). An empty path yields the root.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// True when every predicate in the set holds against the payload.
pub fn matches(set: &PredicateSet, payload: &Value) -> bool {
    set.iter().all(|(path, predicate)| {
        let actual = resolve_path(payload, path);
        match predicate {
            Predicate::Ops(ops) => ops.iter().all(|(op, operand)| eval(*op, operand, actual)),
            Predicate::Literal(expected) => actual == Some(expected),
        }
    })
}

/// Rejects predicate sets that could never be evaluated: empty field
/// paths, `~=` operands that are not valid regular expressions, and
/// objects mixing operator keys with literal keys.
pub fn validate_set(set: &PredicateSet) -> LyrebirdResult<()> {
    for (path, predicate) in set {
        if path.is_empty() {
            return Err(LyrebirdError::InvalidArgument(
                "predicate field path must not be empty".into(),
            ));
        }
        match predicate {
            Predicate::Ops(ops) => {
                for (op, operand) in ops {
                    if *op == PredicateOp::Matches {
                        let pattern = operand.as_str().ok_or_else(|| {
                            LyrebirdError::InvalidPattern(format!(
                                "~= operand for {path} must be a string"
                            ))
                        })?;
                        Regex::new(pattern)
                            .map_err(|err| LyrebirdError::InvalidPattern(format!("{path}: {err}")))?;
                    }
                }
            }
            Predicate::Literal(Value::Object(map)) => {
                if map.keys().any(|key| is_operator_key(key)) {
                    return Err(LyrebirdError::InvalidArgument(format!(
                        "predicate for {path} mixes operators with literal keys"
                    )));
                }
            }
            Predicate::Literal(_) => {}
        }
    }
    Ok(())
}

fn is_operator_key(key: &str) -> bool {
    serde_json::from_value::<PredicateOp>(Value::String(key.to_string())).is_ok()
}

fn eval(op: PredicateOp, operand: &Value, actual: Option<&Value>) -> bool {
    if op == PredicateOp::Exists {
        return operand.as_bool() == Some(actual.is_some());
    }
    let Some(actual) = actual else {
        return false;
    };
    match op {
        PredicateOp::Eq => actual == operand,
        PredicateOp::Ne => actual != operand,
        PredicateOp::Gt => compare(actual, operand) == Some(Ordering::Greater),
        PredicateOp::Ge => matches!(compare(actual, operand), Some(Ordering::Greater | Ordering::Equal)),
        PredicateOp::Lt => compare(actual, operand) == Some(Ordering::Less),
        PredicateOp::Le => matches!(compare(actual, operand), Some(Ordering::Less | Ordering::Equal)),
        PredicateOp::Matches => match (actual.as_str(), operand.as_str()) {
            (Some(text), Some(pattern)) => {
                Regex::new(pattern).is_ok_and(|re| re.is_match(text))
            }
            _ => false,
        },
        PredicateOp::Size => {
            let len = match actual {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                _ => return false,
            };
            operand.as_u64() == Some(len as u64)
        }
        PredicateOp::In => operand.as_array().is_some_and(|set| set.contains(actual)),
        PredicateOp::NotIn => operand.as_array().is_some_and(|set| !set.contains(actual)),
        PredicateOp::AllIn => match (actual.as_array(), operand.as_array()) {
            (Some(items), Some(required)) => required.iter().all(|needed| items.contains(needed)),
            _ => false,
        },
        PredicateOp::Exists => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}
