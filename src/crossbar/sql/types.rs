//! Core query value types.
//!
//! [`FieldValue`] is the value system every row field, literal and function
//! result flows through. Comparisons coerce across the numeric kinds so a
//! predicate like `age >= 18.0` works against integer columns.

use crate::crossbar::sql::error::SqlError;
use chrono::NaiveDateTime;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// A value in a row field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// SQL NULL value
    Null,
    /// Boolean value
    Boolean(bool),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point number
    Float(f64),
    /// Decimal for precise arithmetic
    Decimal(Decimal),
    /// UTF-8 string
    String(String),
    /// Date-time literal parsed with the configured date format
    Date(NaiveDateTime),
    /// UUID literal
    Uuid(Uuid),
    /// Collection of values, as produced by `(a, b, c)` literals and subqueries
    Array(Vec<FieldValue>),
    /// Nested row, as produced by the reference function
    Map(HashMap<String, FieldValue>),
}

impl FieldValue {
    /// Type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "NULL",
            FieldValue::Boolean(_) => "BOOLEAN",
            FieldValue::Integer(_) => "INTEGER",
            FieldValue::Float(_) => "FLOAT",
            FieldValue::Decimal(_) => "DECIMAL",
            FieldValue::String(_) => "STRING",
            FieldValue::Date(_) => "DATE",
            FieldValue::Uuid(_) => "UUID",
            FieldValue::Array(_) => "ARRAY",
            FieldValue::Map(_) => "MAP",
        }
    }

    /// True for integers, floats and decimals
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldValue::Integer(_) | FieldValue::Float(_) | FieldValue::Decimal(_)
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Truthiness used by boolean predicates over plain values
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Null => false,
            FieldValue::Boolean(value) => *value,
            FieldValue::Integer(value) => *value != 0,
            FieldValue::Float(value) => *value != 0.0,
            FieldValue::Decimal(value) => !value.is_zero(),
            FieldValue::String(value) => !value.is_empty(),
            _ => true,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(value) => Some(*value as f64),
            FieldValue::Float(value) => Some(*value),
            FieldValue::Decimal(value) => value.to_f64(),
            _ => None,
        }
    }

    /// Total order between two comparable values.
    ///
    /// Numeric kinds coerce to each other; any other cross-kind comparison is
    /// a type error. NULL is handled by the callers because its placement
    /// depends on the operation (ordering sorts it first, predicates fail it).
    pub fn compare(&self, other: &FieldValue) -> Result<Ordering, SqlError> {
        match (self, other) {
            (FieldValue::Integer(left), FieldValue::Integer(right)) => Ok(left.cmp(right)),
            (FieldValue::Decimal(left), FieldValue::Decimal(right)) => Ok(left.cmp(right)),
            (left, right) if left.is_numeric() && right.is_numeric() => {
                let left = left.as_float().ok_or_else(|| {
                    SqlError::type_error("comparable number", left.type_name())
                })?;
                let right = right.as_float().ok_or_else(|| {
                    SqlError::type_error("comparable number", right.type_name())
                })?;
                left.partial_cmp(&right)
                    .ok_or_else(|| SqlError::type_error("comparable number", "NaN"))
            }
            (FieldValue::String(left), FieldValue::String(right)) => Ok(left.cmp(right)),
            (FieldValue::Boolean(left), FieldValue::Boolean(right)) => Ok(left.cmp(right)),
            (FieldValue::Date(left), FieldValue::Date(right)) => Ok(left.cmp(right)),
            (FieldValue::Uuid(left), FieldValue::Uuid(right)) => Ok(left.cmp(right)),
            (left, right) => Err(SqlError::type_error(left.type_name(), right.type_name())),
        }
    }

    /// Equality with numeric coercion, never failing: incomparable kinds are
    /// simply not equal.
    pub fn loose_eq(&self, other: &FieldValue) -> bool {
        match self.compare(other) {
            Ok(ordering) => ordering == Ordering::Equal,
            Err(_) => self == other,
        }
    }

    /// Arithmetic used by the math evaluator function
    pub fn arithmetic(&self, operator: char, other: &FieldValue) -> Result<FieldValue, SqlError> {
        match (self, other) {
            (FieldValue::Integer(left), FieldValue::Integer(right)) => match operator {
                '+' => Ok(FieldValue::Integer(left + right)),
                '-' => Ok(FieldValue::Integer(left - right)),
                '*' => Ok(FieldValue::Integer(left * right)),
                '/' => {
                    if *right == 0 {
                        Err(SqlError::evaluation_error("Division by zero"))
                    } else if left % right == 0 {
                        Ok(FieldValue::Integer(left / right))
                    } else {
                        Ok(FieldValue::Float(*left as f64 / *right as f64))
                    }
                }
                _ => Err(SqlError::evaluation_error(format!(
                    "Unknown math connector '{}'",
                    operator
                ))),
            },
            (FieldValue::Decimal(left), FieldValue::Decimal(right)) => match operator {
                '+' => Ok(FieldValue::Decimal(left + right)),
                '-' => Ok(FieldValue::Decimal(left - right)),
                '*' => Ok(FieldValue::Decimal(left * right)),
                '/' => left
                    .checked_div(*right)
                    .map(FieldValue::Decimal)
                    .ok_or_else(|| SqlError::evaluation_error("Division by zero")),
                _ => Err(SqlError::evaluation_error(format!(
                    "Unknown math connector '{}'",
                    operator
                ))),
            },
            (left, right) if left.is_numeric() && right.is_numeric() => {
                let left = left
                    .as_float()
                    .ok_or_else(|| SqlError::type_error("number", left.type_name()))?;
                let right = right
                    .as_float()
                    .ok_or_else(|| SqlError::type_error("number", right.type_name()))?;
                match operator {
                    '+' => Ok(FieldValue::Float(left + right)),
                    '-' => Ok(FieldValue::Float(left - right)),
                    '*' => Ok(FieldValue::Float(left * right)),
                    '/' => {
                        if right == 0.0 {
                            Err(SqlError::evaluation_error("Division by zero"))
                        } else {
                            Ok(FieldValue::Float(left / right))
                        }
                    }
                    _ => Err(SqlError::evaluation_error(format!(
                        "Unknown math connector '{}'",
                        operator
                    ))),
                }
            }
            (FieldValue::String(left), right) if operator == '+' => {
                Ok(FieldValue::String(format!("{}{}", left, right.to_display_string())))
            }
            (left, right) => Err(SqlError::type_error(
                format!("numbers for '{}'", operator),
                format!("{} and {}", left.type_name(), right.type_name()),
            )),
        }
    }

    /// Human-readable representation, also used to build group hash keys
    pub fn to_display_string(&self) -> String {
        match self {
            FieldValue::Null => "NULL".to_string(),
            FieldValue::Boolean(value) => value.to_string(),
            FieldValue::Integer(value) => value.to_string(),
            FieldValue::Float(value) => value.to_string(),
            FieldValue::Decimal(value) => value.to_string(),
            FieldValue::String(value) => value.clone(),
            FieldValue::Date(value) => value.format("%Y-%m-%d %H:%M:%S").to_string(),
            FieldValue::Uuid(value) => value.to_string(),
            FieldValue::Array(values) => {
                let elements: Vec<String> =
                    values.iter().map(|value| value.to_display_string()).collect();
                format!("({})", elements.join(", "))
            }
            FieldValue::Map(values) => {
                let mut keys: Vec<&String> = values.keys().collect();
                keys.sort();
                let elements: Vec<String> = keys
                    .iter()
                    .map(|key| format!("{}: {}", key, values[*key].to_display_string()))
                    .collect();
                format!("{{{}}}", elements.join(", "))
            }
        }
    }

    /// Literal representation used by the round-trippable query form: strings
    /// and dates quoted, everything else as displayed.
    pub fn to_query_string(&self, date_format: &str) -> String {
        match self {
            FieldValue::String(value) => format!("'{}'", value.replace('\'', "\\'")),
            FieldValue::Date(value) => format!("'{}'", value.format(date_format)),
            FieldValue::Array(values) => {
                let elements: Vec<String> = values
                    .iter()
                    .map(|value| value.to_query_string(date_format))
                    .collect();
                format!("({})", elements.join(","))
            }
            other => other.to_display_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        FieldValue::Uuid(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_coercion() {
        let left = FieldValue::Integer(2);
        let right = FieldValue::Float(2.0);
        assert_eq!(left.compare(&right).unwrap(), Ordering::Equal);
        assert!(left.loose_eq(&right));
    }

    #[test]
    fn test_incomparable_kinds() {
        let left = FieldValue::String("a".to_string());
        let right = FieldValue::Integer(1);
        assert!(left.compare(&right).is_err());
        assert!(!left.loose_eq(&right));
    }

    #[test]
    fn test_integer_division_keeps_precision() {
        let exact = FieldValue::Integer(10)
            .arithmetic('/', &FieldValue::Integer(2))
            .unwrap();
        assert_eq!(exact, FieldValue::Integer(5));

        let inexact = FieldValue::Integer(5)
            .arithmetic('/', &FieldValue::Integer(2))
            .unwrap();
        assert_eq!(inexact, FieldValue::Float(2.5));
    }

    #[test]
    fn test_query_string_quoting() {
        let value = FieldValue::String("it's".to_string());
        assert_eq!(value.to_query_string("%Y-%m-%d"), "'it\\'s'");
    }
}
