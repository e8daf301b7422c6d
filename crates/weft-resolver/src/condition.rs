//! Condition evaluation.

use std::str::FromStr;

use serde_json::Value;
use tracing::debug;
use weft_config::StepCondition;

use crate::error::{ConditionError, ResolveError};
use crate::reference::{ReferenceSource, resolve_value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
  Equals,
  NotEquals,
  GreaterThan,
  LessThan,
  Contains,
  Exists,
}

impl FromStr for ConditionOperator {
  type Err = ConditionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "equals" => Ok(Self::Equals),
      "not_equals" => Ok(Self::NotEquals),
      "greater_than" => Ok(Self::GreaterThan),
      "less_than" => Ok(Self::LessThan),
      "contains" => Ok(Self::Contains),
      "exists" => Ok(Self::Exists),
      other => Err(ConditionError::UnknownOperator {
        operator: other.to_string(),
      }),
    }
  }
}

/// Evaluate `condition` against `source`.
///
/// - `greater_than` / `less_than` coerce both operands to `f64` (numbers and
///   numeric strings) and fail if either cannot be coerced.
/// - `equals` / `not_equals` compare numerically when both operands are JSON
///   numbers, otherwise by textual representation.
/// - `contains` checks the textual representation of `left` for that of
///   `right`.
/// - `exists` is true iff `left` resolves to a non-null value; a missing
///   reference counts as null rather than an error.
pub fn evaluate_condition<S: ReferenceSource + ?Sized>(
  condition: &StepCondition,
  source: &S,
) -> Result<bool, ConditionError> {
  let operator: ConditionOperator = condition.operator.parse()?;

  let left = match (operator, resolve_value(&condition.left, source)) {
    (ConditionOperator::Exists, Err(ResolveError::MissingReference { .. })) => Value::Null,
    (_, resolved) => resolved?,
  };
  let right = match operator {
    ConditionOperator::Exists => Value::Null,
    _ => resolve_value(&condition.right, source)?,
  };

  let result = match operator {
    ConditionOperator::Equals => values_equal(&left, &right),
    ConditionOperator::NotEquals => !values_equal(&left, &right),
    ConditionOperator::GreaterThan => to_f64(&left)? > to_f64(&right)?,
    ConditionOperator::LessThan => to_f64(&left)? < to_f64(&right)?,
    ConditionOperator::Contains => as_text(&left).contains(&as_text(&right)),
    ConditionOperator::Exists => !left.is_null(),
  };

  debug!(
    operator = %condition.operator,
    left = %left,
    right = %right,
    result,
    "condition evaluated"
  );

  Ok(result)
}

fn values_equal(left: &Value, right: &Value) -> bool {
  match (left, right) {
    (Value::Number(l), Value::Number(r)) => l.as_f64() == r.as_f64(),
    _ => as_text(left) == as_text(right),
  }
}

/// Numeric view of a value: JSON numbers and strings that parse as numbers.
fn to_f64(value: &Value) -> Result<f64, ConditionError> {
  let not_numeric = || ConditionError::NotNumeric {
    value: value.to_string(),
  };
  match value {
    Value::Number(n) => n.as_f64().ok_or_else(not_numeric),
    Value::String(s) => s.trim().parse::<f64>().map_err(|_| not_numeric()),
    _ => Err(not_numeric()),
  }
}

/// Textual representation: strings without quotes, everything else as JSON.
fn as_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
