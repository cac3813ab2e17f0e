//! Default aggregate function layer: count, sum, product, mean.
//!
//! Aggregates apply to the final row collection and replace it with a single
//! summary row carrying the result under the function's label.

use super::AggregateFunction;
use crate::crossbar::sql::datasource::{DataRow, Enlarged};
use crate::crossbar::sql::error::SqlError;
use crate::crossbar::sql::types::FieldValue;

pub struct AggregateFunctions;

impl AggregateFunctions {
    pub const NAMES: &'static [&'static str] = &["count", "sum", "product", "mean"];
}

impl AggregateFunction for AggregateFunctions {
    fn apply(
        &self,
        name: &str,
        label: &str,
        values: &[FieldValue],
        rows: Vec<DataRow>,
    ) -> Result<Vec<DataRow>, SqlError> {
        let result = match name.to_lowercase().as_str() {
            "count" => FieldValue::Integer(rows.len() as i64),
            "sum" => fold_numeric(name, values, FieldValue::Integer(0), '+')?,
            "product" => fold_numeric(name, values, FieldValue::Integer(1), '*')?,
            "mean" => {
                let count = values.iter().filter(|value| !value.is_null()).count();
                if count == 0 {
                    FieldValue::Null
                } else {
                    let sum = fold_numeric(name, values, FieldValue::Integer(0), '+')?;
                    sum.arithmetic('/', &FieldValue::Integer(count as i64))?
                }
            }
            other => {
                return Err(SqlError::function_error(other, "Unknown aggregate function"));
            }
        };

        let mut summary = DataRow::new();
        summary.put(label, result);
        Ok(vec![summary])
    }
}

fn fold_numeric(
    name: &str,
    values: &[FieldValue],
    unit: FieldValue,
    connector: char,
) -> Result<FieldValue, SqlError> {
    let mut accumulated = unit;
    for value in values {
        if value.is_null() {
            continue;
        }
        if !value.is_numeric() {
            return Err(SqlError::function_error(
                name,
                format!("Cannot aggregate non-numeric value of type {}", value.type_name()),
            ));
        }
        accumulated = accumulated.arithmetic(connector, value)?;
    }
    Ok(accumulated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_ignores_values() {
        let rows = vec![DataRow::new(), DataRow::new(), DataRow::new()];
        let result = AggregateFunctions
            .apply("count", "count()", &[], rows)
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].get("count()"), Some(&FieldValue::Integer(3)));
    }

    #[test]
    fn test_mean_skips_nulls() {
        let rows = vec![DataRow::new(), DataRow::new(), DataRow::new()];
        let values = vec![
            FieldValue::Integer(10),
            FieldValue::Null,
            FieldValue::Integer(20),
        ];
        let result = AggregateFunctions
            .apply("mean", "m", &values, rows)
            .unwrap();
        assert_eq!(result[0].get("m"), Some(&FieldValue::Integer(15)));
    }

    #[test]
    fn test_sum_rejects_strings() {
        let rows = vec![DataRow::new()];
        let values = vec![FieldValue::from("x")];
        assert!(AggregateFunctions.apply("sum", "s", &values, rows).is_err());
    }
}
