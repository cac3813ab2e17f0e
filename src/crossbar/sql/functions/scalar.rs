//! Default scalar function layers.
//!
//! Each layer serves a family of names grouped by concern: math, string,
//! date, collection, object, parcel and reference resolution.

use super::{FunctionContext, ScalarFunction, MATH_EVAL_FUNCTION};
use crate::crossbar::sql::ast::Query;
use crate::crossbar::sql::datasource::Enlarged;
use crate::crossbar::sql::error::SqlError;
use crate::crossbar::sql::types::FieldValue;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;

fn missing_argument(name: &str) -> SqlError {
    SqlError::function_error(name, "Missing argument")
}

fn numeric_argument(name: &str, value: &FieldValue) -> Result<f64, SqlError> {
    match value {
        FieldValue::Integer(value) => Ok(*value as f64),
        FieldValue::Float(value) => Ok(*value),
        FieldValue::Decimal(value) => Ok(value.to_f64().unwrap_or(f64::NAN)),
        other => Err(SqlError::function_error(
            name,
            format!("Expected a number, got {}", other.type_name()),
        )),
    }
}

fn string_argument(name: &str, value: &FieldValue) -> Result<String, SqlError> {
    match value {
        FieldValue::String(value) => Ok(value.clone()),
        other => Ok(other.to_display_string()),
    }
}

/// Math layer: the math expression evaluator plus numeric helpers.
pub struct MathFunctions;

impl MathFunctions {
    pub const NAMES: &'static [&'static str] = &[
        MATH_EVAL_FUNCTION,
        "abs",
        "round",
        "ceil",
        "floor",
        "pow",
        "sqrt",
    ];

    /// Evaluate the alternating value/connector argument list produced by the
    /// parser. Multiplicative connectors bind before additive ones.
    fn math_eval(args: &[FieldValue]) -> Result<FieldValue, SqlError> {
        if args.is_empty() {
            return Err(missing_argument(MATH_EVAL_FUNCTION));
        }

        let mut values: Vec<FieldValue> = Vec::new();
        let mut connectors: Vec<char> = Vec::new();
        for (position, arg) in args.iter().enumerate() {
            if position % 2 == 0 {
                values.push(arg.clone());
            } else {
                match arg {
                    FieldValue::String(connector) if connector.len() == 1 => {
                        connectors.push(connector.chars().next().unwrap_or('+'));
                    }
                    other => {
                        return Err(SqlError::function_error(
                            MATH_EVAL_FUNCTION,
                            format!("Expected a connector, got '{}'", other),
                        ));
                    }
                }
            }
        }
        if values.len() != connectors.len() + 1 {
            return Err(SqlError::function_error(
                MATH_EVAL_FUNCTION,
                "Malformed math expression",
            ));
        }

        for pass in ["*/", "+-"] {
            let mut position = 0;
            while position < connectors.len() {
                let connector = connectors[position];
                if pass.contains(connector) {
                    let folded = values[position].arithmetic(connector, &values[position + 1])?;
                    values[position] = folded;
                    values.remove(position + 1);
                    connectors.remove(position);
                } else {
                    position += 1;
                }
            }
        }

        Ok(values.remove(0))
    }
}

impl ScalarFunction for MathFunctions {
    fn evaluate(
        &self,
        name: &str,
        args: &[FieldValue],
        _context: &FunctionContext,
    ) -> Result<FieldValue, SqlError> {
        if name.eq_ignore_ascii_case(MATH_EVAL_FUNCTION) {
            return Self::math_eval(args);
        }

        let first = args.first().ok_or_else(|| missing_argument(name))?;
        let value = numeric_argument(name, first)?;
        match name.to_lowercase().as_str() {
            "abs" => Ok(FieldValue::Float(value.abs())),
            "round" => Ok(FieldValue::Integer(value.round() as i64)),
            "ceil" => Ok(FieldValue::Integer(value.ceil() as i64)),
            "floor" => Ok(FieldValue::Integer(value.floor() as i64)),
            "sqrt" => Ok(FieldValue::Float(value.sqrt())),
            "pow" => {
                let exponent = args
                    .get(1)
                    .ok_or_else(|| missing_argument(name))
                    .and_then(|value| numeric_argument(name, value))?;
                Ok(FieldValue::Float(value.powf(exponent)))
            }
            other => Err(SqlError::function_error(other, "Unknown math function")),
        }
    }
}

/// String layer.
pub struct StringFunctions;

impl StringFunctions {
    pub const NAMES: &'static [&'static str] =
        &["concat", "length", "trim", "upper", "lower", "replace"];
}

impl ScalarFunction for StringFunctions {
    fn evaluate(
        &self,
        name: &str,
        args: &[FieldValue],
        _context: &FunctionContext,
    ) -> Result<FieldValue, SqlError> {
        match name.to_lowercase().as_str() {
            "concat" => {
                let mut value = String::new();
                for arg in args {
                    if !arg.is_null() {
                        value.push_str(&string_argument(name, arg)?);
                    }
                }
                Ok(FieldValue::String(value))
            }
            "length" => {
                let value = args.first().ok_or_else(|| missing_argument(name))?;
                Ok(FieldValue::Integer(
                    string_argument(name, value)?.chars().count() as i64,
                ))
            }
            "trim" => {
                let value = args.first().ok_or_else(|| missing_argument(name))?;
                Ok(FieldValue::String(
                    string_argument(name, value)?.trim().to_string(),
                ))
            }
            "upper" => {
                let value = args.first().ok_or_else(|| missing_argument(name))?;
                Ok(FieldValue::String(
                    string_argument(name, value)?.to_uppercase(),
                ))
            }
            "lower" => {
                let value = args.first().ok_or_else(|| missing_argument(name))?;
                Ok(FieldValue::String(
                    string_argument(name, value)?.to_lowercase(),
                ))
            }
            "replace" => {
                if args.len() != 3 {
                    return Err(SqlError::function_error(name, "Expected 3 arguments"));
                }
                let value = string_argument(name, &args[0])?;
                let from = string_argument(name, &args[1])?;
                let to = string_argument(name, &args[2])?;
                Ok(FieldValue::String(value.replace(&from, &to)))
            }
            other => Err(SqlError::function_error(other, "Unknown string function")),
        }
    }
}

/// Date layer.
pub struct DateFunctions;

impl DateFunctions {
    pub const NAMES: &'static [&'static str] = &["now", "dateFormat", "year", "month", "day"];
}

impl ScalarFunction for DateFunctions {
    fn evaluate(
        &self,
        name: &str,
        args: &[FieldValue],
        context: &FunctionContext,
    ) -> Result<FieldValue, SqlError> {
        use chrono::Datelike;

        let date_of = |value: &FieldValue| match value {
            FieldValue::Date(date) => Ok(*date),
            other => Err(SqlError::function_error(
                name,
                format!("Expected a date, got {}", other.type_name()),
            )),
        };

        match name.to_lowercase().as_str() {
            "now" => Ok(FieldValue::Date(Utc::now().naive_utc())),
            "dateformat" => {
                let value = args.first().ok_or_else(|| missing_argument(name))?;
                let format = match args.get(1) {
                    Some(FieldValue::String(format)) => format.clone(),
                    _ => context.date_format.to_string(),
                };
                Ok(FieldValue::String(
                    date_of(value)?.format(&format).to_string(),
                ))
            }
            "year" => {
                let value = args.first().ok_or_else(|| missing_argument(name))?;
                Ok(FieldValue::Integer(date_of(value)?.year() as i64))
            }
            "month" => {
                let value = args.first().ok_or_else(|| missing_argument(name))?;
                Ok(FieldValue::Integer(date_of(value)?.month() as i64))
            }
            "day" => {
                let value = args.first().ok_or_else(|| missing_argument(name))?;
                Ok(FieldValue::Integer(date_of(value)?.day() as i64))
            }
            other => Err(SqlError::function_error(other, "Unknown date function")),
        }
    }
}

/// Collection layer.
pub struct CollectionFunctions;

impl CollectionFunctions {
    pub const NAMES: &'static [&'static str] = &["size", "first", "last", "contains"];
}

impl ScalarFunction for CollectionFunctions {
    fn evaluate(
        &self,
        name: &str,
        args: &[FieldValue],
        _context: &FunctionContext,
    ) -> Result<FieldValue, SqlError> {
        let first = args.first().ok_or_else(|| missing_argument(name))?;
        let values = match first {
            FieldValue::Array(values) => values.as_slice(),
            FieldValue::Null => &[],
            other => {
                return Err(SqlError::function_error(
                    name,
                    format!("Expected an array, got {}", other.type_name()),
                ));
            }
        };

        match name.to_lowercase().as_str() {
            "size" => Ok(FieldValue::Integer(values.len() as i64)),
            "first" => Ok(values.first().cloned().unwrap_or(FieldValue::Null)),
            "last" => Ok(values.last().cloned().unwrap_or(FieldValue::Null)),
            "contains" => {
                let needle = args.get(1).ok_or_else(|| missing_argument(name))?;
                Ok(FieldValue::Boolean(
                    values.iter().any(|value| value.loose_eq(needle)),
                ))
            }
            other => Err(SqlError::function_error(
                other,
                "Unknown collection function",
            )),
        }
    }
}

/// Object layer: helpers over nested map values.
pub struct ObjectFunctions;

impl ObjectFunctions {
    pub const NAMES: &'static [&'static str] = &["get", "keys", "isNull", "isNotNull"];
}

impl ScalarFunction for ObjectFunctions {
    fn evaluate(
        &self,
        name: &str,
        args: &[FieldValue],
        _context: &FunctionContext,
    ) -> Result<FieldValue, SqlError> {
        match name.to_lowercase().as_str() {
            "get" => {
                let map = match args.first() {
                    Some(FieldValue::Map(map)) => map,
                    Some(other) => {
                        return Err(SqlError::function_error(
                            name,
                            format!("Expected a map, got {}", other.type_name()),
                        ));
                    }
                    None => return Err(missing_argument(name)),
                };
                let key = args.get(1).ok_or_else(|| missing_argument(name))?;
                Ok(map
                    .get(&key.to_display_string())
                    .cloned()
                    .unwrap_or(FieldValue::Null))
            }
            "keys" => match args.first() {
                Some(FieldValue::Map(map)) => {
                    let mut keys: Vec<String> = map.keys().cloned().collect();
                    keys.sort();
                    Ok(FieldValue::Array(
                        keys.into_iter().map(FieldValue::String).collect(),
                    ))
                }
                Some(other) => Err(SqlError::function_error(
                    name,
                    format!("Expected a map, got {}", other.type_name()),
                )),
                None => Err(missing_argument(name)),
            },
            "isnull" => {
                let value = args.first().ok_or_else(|| missing_argument(name))?;
                Ok(FieldValue::Boolean(value.is_null()))
            }
            "isnotnull" => {
                let value = args.first().ok_or_else(|| missing_argument(name))?;
                Ok(FieldValue::Boolean(!value.is_null()))
            }
            other => Err(SqlError::function_error(other, "Unknown object function")),
        }
    }
}

/// Parcel layer: serde round trips for values, the stand-in for the bson
/// helpers of the original system.
pub struct ParcelFunctions;

impl ParcelFunctions {
    pub const NAMES: &'static [&'static str] = &["toJson", "fromJson"];
}

impl ScalarFunction for ParcelFunctions {
    fn evaluate(
        &self,
        name: &str,
        args: &[FieldValue],
        _context: &FunctionContext,
    ) -> Result<FieldValue, SqlError> {
        match name.to_lowercase().as_str() {
            "tojson" => {
                let value = args.first().ok_or_else(|| missing_argument(name))?;
                let json = field_to_json(value);
                serde_json::to_string(&json)
                    .map(FieldValue::String)
                    .map_err(|ex| SqlError::function_error(name, ex.to_string()))
            }
            "fromjson" => {
                let value = args.first().ok_or_else(|| missing_argument(name))?;
                let text = string_argument(name, value)?;
                let json: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|ex| SqlError::function_error(name, ex.to_string()))?;
                Ok(json_to_field(&json))
            }
            other => Err(SqlError::function_error(other, "Unknown parcel function")),
        }
    }
}

/// Reference layer: resolve a UUID into the row it identifies.
pub struct ReferenceFunctions;

impl ReferenceFunctions {
    pub const NAMES: &'static [&'static str] = &["reference"];
}

impl ScalarFunction for ReferenceFunctions {
    fn evaluate(
        &self,
        name: &str,
        args: &[FieldValue],
        context: &FunctionContext,
    ) -> Result<FieldValue, SqlError> {
        let resource = match args.first() {
            Some(FieldValue::String(resource)) => resource.clone(),
            _ => return Err(SqlError::function_error(name, "Expected a resource name")),
        };
        let id = args.get(1).ok_or_else(|| missing_argument(name))?;

        let query = Query::new(resource);
        let rows = context.data_source.resource_data(&query)?;
        for row in rows {
            if let Some(value) = row.get("id") {
                if value.loose_eq(id) {
                    return Ok(FieldValue::Map(row.fields().clone()));
                }
            }
        }
        Ok(FieldValue::Null)
    }
}

/// Convert a field value into a serde_json value.
pub fn field_to_json(value: &FieldValue) -> serde_json::Value {
    match value {
        FieldValue::Null => serde_json::Value::Null,
        FieldValue::Boolean(value) => serde_json::Value::Bool(*value),
        FieldValue::Integer(value) => serde_json::Value::from(*value),
        FieldValue::Float(value) => serde_json::Value::from(*value),
        FieldValue::Decimal(value) => serde_json::Value::String(value.to_string()),
        FieldValue::String(value) => serde_json::Value::String(value.clone()),
        FieldValue::Date(value) => serde_json::Value::String(value.to_string()),
        FieldValue::Uuid(value) => serde_json::Value::String(value.to_string()),
        FieldValue::Array(values) => {
            serde_json::Value::Array(values.iter().map(field_to_json).collect())
        }
        FieldValue::Map(values) => {
            let mut object = serde_json::Map::new();
            for (key, value) in values {
                object.insert(key.clone(), field_to_json(value));
            }
            serde_json::Value::Object(object)
        }
    }
}

/// Convert a serde_json value into a field value.
pub fn json_to_field(value: &serde_json::Value) -> FieldValue {
    match value {
        serde_json::Value::Null => FieldValue::Null,
        serde_json::Value::Bool(value) => FieldValue::Boolean(*value),
        serde_json::Value::Number(value) => {
            if let Some(value) = value.as_i64() {
                FieldValue::Integer(value)
            } else {
                FieldValue::Float(value.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(value) => FieldValue::String(value.clone()),
        serde_json::Value::Array(values) => {
            FieldValue::Array(values.iter().map(json_to_field).collect())
        }
        serde_json::Value::Object(values) => {
            let mut map = HashMap::new();
            for (key, value) in values {
                map.insert(key.clone(), json_to_field(value));
            }
            FieldValue::Map(map)
        }
    }
}
