//! Filter predicates: the closed operator set and how a predicate matches a
//! stored entity.
//!
//! Predicates are AND-combined by the query; there is no OR and no grouping.
//! Evaluation lives here so every backend that evaluates locally (the
//! in-memory backend, the emulator) agrees on the semantics.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::BackendError;
use crate::types::{KEY_FIELD, Key};

/// Comparison operators usable in a filter predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessOrEqual,
    /// Membership in a list. The comparison value must be an array.
    #[serde(rename = "in")]
    In,
    /// Non-membership in a list. The comparison value must be an array.
    #[serde(rename = "not in")]
    NotIn,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::GreaterOrEqual => ">=",
            FilterOperator::LessThan => "<",
            FilterOperator::LessOrEqual => "<=",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not in",
        }
    }

    /// Inequality operators constrain which sort orders a query may use.
    pub fn is_inequality(&self) -> bool {
        matches!(
            self,
            FilterOperator::GreaterThan
                | FilterOperator::GreaterOrEqual
                | FilterOperator::LessThan
                | FilterOperator::LessOrEqual
                | FilterOperator::NotIn
        )
    }

    fn accepts(&self, ordering: Option<Ordering>) -> bool {
        match self {
            FilterOperator::Equal | FilterOperator::In => ordering == Some(Ordering::Equal),
            FilterOperator::NotIn => ordering != Some(Ordering::Equal),
            FilterOperator::GreaterThan => ordering == Some(Ordering::Greater),
            FilterOperator::GreaterOrEqual => {
                matches!(ordering, Some(Ordering::Greater | Ordering::Equal))
            }
            FilterOperator::LessThan => ordering == Some(Ordering::Less),
            FilterOperator::LessOrEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "=" | "==" => Ok(FilterOperator::Equal),
            ">" => Ok(FilterOperator::GreaterThan),
            ">=" => Ok(FilterOperator::GreaterOrEqual),
            "<" => Ok(FilterOperator::LessThan),
            "<=" => Ok(FilterOperator::LessOrEqual),
            "in" | "IN" => Ok(FilterOperator::In),
            "not in" | "NOT IN" => Ok(FilterOperator::NotIn),
            other => Err(format!("unknown filter operator: {other}")),
        }
    }
}

/// The comparison value of a predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterValue {
    Value(Value),
    Key(Key),
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        FilterValue::Value(value)
    }
}

impl From<Key> for FilterValue {
    fn from(key: Key) -> Self {
        FilterValue::Key(key)
    }
}

/// A (field, operator, value) predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOperator,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOperator, value: impl Into<FilterValue>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Whether this predicate targets the entity key rather than a property.
    pub fn is_key_filter(&self) -> bool {
        self.field == KEY_FIELD
    }

    /// Check the predicate shape without evaluating it.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.is_key_filter() && matches!(self.value, FilterValue::Value(_)) {
            return Err(BackendError::invalid_argument(format!(
                "{KEY_FIELD} filter requires a key value"
            )));
        }
        match (&self.op, &self.value) {
            (FilterOperator::In | FilterOperator::NotIn, FilterValue::Value(Value::Array(values))) => {
                if values.len() > MAX_IN_VALUES {
                    return Err(BackendError::invalid_argument(format!(
                        "'{}' filter on '{}' allows at most {MAX_IN_VALUES} values (got {})",
                        self.op,
                        self.field,
                        values.len()
                    )));
                }
                Ok(())
            }
            (FilterOperator::In | FilterOperator::NotIn, _) => {
                Err(BackendError::invalid_argument(format!(
                    "'{}' filter on '{}' requires an array value",
                    self.op, self.field
                )))
            }
            _ => Ok(()),
        }
    }

    /// Evaluate the predicate against an entity.
    ///
    /// Entities lacking the filtered property never match, for any operator.
    /// Array-valued properties match when any element matches.
    pub fn matches(&self, key: &Key, doc: &Value) -> Result<bool, BackendError> {
        self.validate()?;

        if self.is_key_filter() {
            let FilterValue::Key(target) = &self.value else {
                return Ok(false);
            };
            return Ok(self.op.accepts(Some(key.cmp(target))));
        }

        let Some(actual) = lookup(doc, &self.field) else {
            return Ok(false);
        };

        match (&self.op, &self.value) {
            (FilterOperator::In, FilterValue::Value(Value::Array(candidates))) => {
                Ok(any_element(actual, |v| contains_equal(candidates, v)))
            }
            (FilterOperator::NotIn, FilterValue::Value(Value::Array(candidates))) => {
                Ok(!any_element(actual, |v| contains_equal(candidates, v)))
            }
            (op, FilterValue::Value(target)) => {
                Ok(any_element(actual, |v| op.accepts(compare_values(v, target))))
            }
            (op, FilterValue::Key(target)) => Ok(any_element(actual, |v| {
                serde_json::from_value::<Key>(v.clone())
                    .map(|k| op.accepts(Some(k.cmp(target))))
                    .unwrap_or(false)
            })),
        }
    }
}

/// Maximum number of values in an `in` / `not in` list.
pub const MAX_IN_VALUES: usize = 30;

fn any_element(actual: &Value, mut pred: impl FnMut(&Value) -> bool) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(pred),
        other => pred(other),
    }
}

fn contains_equal(candidates: &[Value], value: &Value) -> bool {
    candidates
        .iter()
        .any(|c| compare_values(value, c) == Some(Ordering::Equal))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Look up a dot-separated property path on a document.
///
/// Returns `None` if any segment is missing. An explicit `null` is present.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Compare two JSON values, returning an ordering if the types are comparable.
///
/// - Numbers: integers compared exactly, otherwise as f64
/// - Strings: compared lexicographically
/// - Booleans: false < true
/// - Null == Null
/// - Mismatched types: returns `None`
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Integers of either sign compare exactly; a float on either side falls
/// back to f64.
fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    fn as_int(n: &Number) -> Option<i128> {
        n.as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
    }

    match (as_int(a), as_int(b)) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

/// Total order used for sorting results, across value types.
///
/// Types rank null < number < boolean < string < array < object; values of
/// one type compare naturally.
pub fn sort_cmp(left: &Value, right: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::Bool(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b).unwrap_or_else(|| {
            let fa = a.as_f64().unwrap_or(f64::NAN);
            let fb = b.as_f64().unwrap_or(f64::NAN);
            fa.total_cmp(&fb)
        }),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                let ord = sort_cmp(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                let ord = ka.cmp(kb).then_with(|| sort_cmp(va, vb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            a.len().cmp(&b.len())
        }
        _ => compare_values(left, right).unwrap_or_else(|| rank(left).cmp(&rank(right))),
    }
}
