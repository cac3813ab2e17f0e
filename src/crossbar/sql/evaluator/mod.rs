//! Query evaluation.
//!
//! [`predicate`] resolves operands and evaluates the predicate tree over one
//! row; [`engine`] drives the whole pipeline: fetch, filter, join, group,
//! order, project and aggregate. State that the original system kept on a
//! thread-local session lives in an explicit [`EvaluationContext`] threaded
//! through the call chain.

pub mod engine;
pub mod predicate;

pub use engine::QueryEngine;

use crate::crossbar::config::QueryProperties;
use crate::crossbar::sql::ast::Evaluator;
use crate::crossbar::sql::datasource::{DataSource, RowAccessor};
use crate::crossbar::sql::functions::{FunctionContext, FunctionRegistry};
use crate::crossbar::sql::types::FieldValue;

/// Per-invocation evaluation context.
///
/// Carries the collaborators one query evaluation needs plus the evaluator
/// cache: evaluator nodes marked satisfied are not re-checked by the filter
/// loop. The join planner marks the predicates it pushed into the seed
/// subquery, everything else is verified against each row.
pub struct EvaluationContext<'a> {
    pub data_source: &'a dyn DataSource,
    pub accessor: &'a dyn RowAccessor,
    pub functions: &'a FunctionRegistry,
    pub properties: &'a QueryProperties,
    pub parameters: &'a [FieldValue],
    satisfied: Vec<Evaluator>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        data_source: &'a dyn DataSource,
        accessor: &'a dyn RowAccessor,
        functions: &'a FunctionRegistry,
        properties: &'a QueryProperties,
        parameters: &'a [FieldValue],
    ) -> Self {
        Self {
            data_source,
            accessor,
            functions,
            properties,
            parameters,
            satisfied: Vec::new(),
        }
    }

    /// Fresh context for a nested evaluation (subqueries, join subqueries):
    /// same collaborators and parameters, empty evaluator cache.
    pub fn nested(&self) -> EvaluationContext<'a> {
        EvaluationContext::new(
            self.data_source,
            self.accessor,
            self.functions,
            self.properties,
            self.parameters,
        )
    }

    /// Mark an evaluator as already satisfied for this invocation.
    pub fn mark_satisfied(&mut self, evaluator: Evaluator) {
        if !self.satisfied.contains(&evaluator) {
            self.satisfied.push(evaluator);
        }
    }

    pub fn is_satisfied(&self, evaluator: &Evaluator) -> bool {
        self.satisfied.contains(evaluator)
    }

    pub(crate) fn function_context(&self) -> FunctionContext<'a> {
        FunctionContext {
            data_source: self.data_source,
            accessor: self.accessor,
            date_format: &self.properties.date_format,
        }
    }
}
