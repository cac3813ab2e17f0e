//! Predicate evaluation over a single row.

use super::engine;
use super::EvaluationContext;
use crate::crossbar::sql::ast::{
    Evaluator, FieldEvaluator, FieldOperator, Operand, Query, ReturnValue,
};
use crate::crossbar::sql::datasource::DataRow;
use crate::crossbar::sql::error::SqlError;
use crate::crossbar::sql::types::FieldValue;
use regex::Regex;
use std::cmp::Ordering;

pub struct PredicateEvaluator;

impl PredicateEvaluator {
    /// Verify the query's predicate collection against one row. Top-level
    /// evaluators combine with AND semantics and stop at the first false;
    /// evaluators marked satisfied in the context are skipped.
    pub fn verify_condition(
        query: &Query,
        row: &DataRow,
        context: &EvaluationContext,
    ) -> Result<bool, SqlError> {
        for evaluator in query.evaluators() {
            if context.is_satisfied(evaluator) {
                continue;
            }
            if !Self::evaluate(evaluator, row, context)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate one node of the predicate tree.
    pub fn evaluate(
        evaluator: &Evaluator,
        row: &DataRow,
        context: &EvaluationContext,
    ) -> Result<bool, SqlError> {
        match evaluator {
            Evaluator::True => Ok(true),
            Evaluator::Boolean(operand) => {
                Ok(Self::resolve_operand(operand, row, context)?.is_truthy())
            }
            Evaluator::Field(field_evaluator) => {
                Self::evaluate_field(field_evaluator, row, context)
            }
            Evaluator::And(children) => {
                for child in children {
                    if context.is_satisfied(child) {
                        continue;
                    }
                    if !Self::evaluate(child, row, context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Evaluator::Or(children) => {
                for child in children {
                    if Self::evaluate(child, row, context)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    fn evaluate_field(
        evaluator: &FieldEvaluator,
        row: &DataRow,
        context: &EvaluationContext,
    ) -> Result<bool, SqlError> {
        // LIKE against a precompiled pattern skips value resolution of the
        // right side.
        if evaluator.operator == FieldOperator::Like {
            if let Operand::Pattern(pattern) = &evaluator.right {
                let left = Self::resolve_operand(&evaluator.left, row, context)?;
                return Self::like_pattern(&left, pattern);
            }
        }

        let left = Self::resolve_operand(&evaluator.left, row, context)?;
        let right = Self::resolve_operand(&evaluator.right, row, context)?;

        match evaluator.operator {
            FieldOperator::Equals => Ok(left.loose_eq(&right)),
            FieldOperator::Distinct => Ok(!left.loose_eq(&right)),
            FieldOperator::GreaterThan => Self::ordering(&left, &right, |o| o == Ordering::Greater),
            FieldOperator::GreaterThanOrEqual => {
                Self::ordering(&left, &right, |o| o != Ordering::Less)
            }
            FieldOperator::SmallerThan => Self::ordering(&left, &right, |o| o == Ordering::Less),
            FieldOperator::SmallerThanOrEqual => {
                Self::ordering(&left, &right, |o| o != Ordering::Greater)
            }
            FieldOperator::In => Self::contains(&right, &left),
            FieldOperator::NotIn => Ok(!Self::contains(&right, &left)?),
            FieldOperator::Like => Self::like(&left, &right),
        }
    }

    /// NULL never orders against anything; everything else compares or
    /// aborts with a type error.
    fn ordering(
        left: &FieldValue,
        right: &FieldValue,
        accept: fn(Ordering) -> bool,
    ) -> Result<bool, SqlError> {
        if left.is_null() || right.is_null() {
            return Ok(false);
        }
        Ok(accept(left.compare(right)?))
    }

    fn contains(collection: &FieldValue, value: &FieldValue) -> Result<bool, SqlError> {
        match collection {
            FieldValue::Array(values) => {
                Ok(values.iter().any(|candidate| candidate.loose_eq(value)))
            }
            other => Err(SqlError::type_error("ARRAY", other.type_name())),
        }
    }

    /// Case-insensitive substring semantics: `%foo%` contains, `%foo`
    /// ends-with, `foo%` starts-with, no wildcard contains.
    fn like(left: &FieldValue, right: &FieldValue) -> Result<bool, SqlError> {
        let value = match left {
            FieldValue::String(value) => value.to_uppercase(),
            other => {
                return Err(SqlError::type_error("STRING", other.type_name()));
            }
        };
        let pattern = match right {
            FieldValue::String(pattern) => pattern.to_uppercase(),
            other => {
                return Err(SqlError::type_error("STRING", other.type_name()));
            }
        };

        let result = if let Some(stripped) = pattern.strip_prefix('%') {
            if let Some(inner) = stripped.strip_suffix('%') {
                value.contains(inner)
            } else {
                value.ends_with(stripped)
            }
        } else if let Some(stripped) = pattern.strip_suffix('%') {
            value.starts_with(stripped)
        } else {
            value.contains(&pattern)
        };
        Ok(result)
    }

    fn like_pattern(left: &FieldValue, pattern: &Regex) -> Result<bool, SqlError> {
        match left {
            FieldValue::String(value) => Ok(pattern.is_match(value)),
            other => Err(SqlError::type_error("STRING", other.type_name())),
        }
    }

    /// Resolve an operand to its value over the given row.
    pub fn resolve_operand(
        operand: &Operand,
        row: &DataRow,
        context: &EvaluationContext,
    ) -> Result<FieldValue, SqlError> {
        match operand {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Replaceable(index) => {
                context.parameters.get(*index).cloned().ok_or_else(|| {
                    SqlError::evaluation_error(format!(
                        "Missing replaceable value for index {}",
                        index
                    ))
                })
            }
            Operand::Field(field) => context.accessor.get(row, field),
            Operand::Function(function) => {
                let mut args = Vec::with_capacity(function.args().len());
                for arg in function.args() {
                    args.push(Self::resolve_operand(arg, row, context)?);
                }
                let scalar = context.functions.scalar(function.name()).ok_or_else(|| {
                    SqlError::function_error(function.name(), "Unknown function")
                })?;
                scalar.evaluate(function.name(), &args, &context.function_context())
            }
            Operand::Collection(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(Self::resolve_operand(item, row, context)?);
                }
                Ok(FieldValue::Array(values))
            }
            Operand::SubQuery(query) => Self::resolve_subquery(query, context),
            Operand::Pattern(pattern) => Ok(FieldValue::String(pattern.as_str().to_string())),
        }
    }

    /// A subquery resolves to the array of its single projected field, so it
    /// can stand on the right side of IN and comparison operators.
    fn resolve_subquery(
        query: &Query,
        context: &EvaluationContext,
    ) -> Result<FieldValue, SqlError> {
        if query.return_parameters().len() != 1 || query.returns_all() {
            return Err(SqlError::evaluation_error(
                "A subquery operand must project exactly one field",
            ));
        }

        let mut nested = context.nested();
        let rows = engine::evaluate_query(query, &mut nested)?;
        let parameter = &query.return_parameters()[0];
        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            let value = match &parameter.value {
                ReturnValue::Field(field) => context.accessor.get(row, field)?,
                ReturnValue::Function(function) => Self::resolve_operand(
                    &Operand::Function(function.clone()),
                    row,
                    context,
                )?,
            };
            values.push(value);
        }
        Ok(FieldValue::Array(values))
    }

    /// Resolve a return or order expression over a row.
    pub fn resolve_return_value(
        value: &ReturnValue,
        row: &DataRow,
        context: &EvaluationContext,
    ) -> Result<FieldValue, SqlError> {
        match value {
            ReturnValue::Field(field) => context.accessor.get(row, field),
            ReturnValue::Function(function) => {
                Self::resolve_operand(&Operand::Function(function.clone()), row, context)
            }
        }
    }
}
