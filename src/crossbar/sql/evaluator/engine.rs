//! Query execution pipeline.
//!
//! Single-resource queries fetch through a rewritten pushdown query and
//! filter the rows against the predicate tree. Joined queries build one
//! subquery per resource, seed the walk at the most selective one and merge
//! neighbours through keyed indexes, augmenting each neighbour fetch with an
//! IN predicate over the accumulated keys. Grouping folds rows through the
//! `Groupable` contract, ordering is stable with nulls first, projection
//! clones empty rows, aggregates apply to the final collection.

use super::predicate::PredicateEvaluator;
use super::EvaluationContext;
use crate::crossbar::config::QueryProperties;
use crate::crossbar::sql::ast::{
    Evaluator, FieldEvaluator, Join, JoinType, Operand, OrderParameter, Query, QueryField,
    QueryResource, ReturnParameter, ReturnValue,
};
use crate::crossbar::sql::datasource::{DataRow, DataSource, Enlarged, Groupable, Joinable, RowAccessor};
use crate::crossbar::sql::error::SqlError;
use crate::crossbar::sql::functions::FunctionRegistry;
use crate::crossbar::sql::types::FieldValue;
use log::debug;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Separator between group expression hashes inside one group key.
const GROUP_KEY_SEPARATOR: char = '\u{1f}';

/// The query evaluator over one data source.
pub struct QueryEngine<'a> {
    data_source: &'a dyn DataSource,
    accessor: &'a dyn RowAccessor,
    functions: &'a FunctionRegistry,
    properties: QueryProperties,
}

impl<'a> QueryEngine<'a> {
    pub fn new(
        data_source: &'a dyn DataSource,
        accessor: &'a dyn RowAccessor,
        functions: &'a FunctionRegistry,
    ) -> Self {
        Self {
            data_source,
            accessor,
            functions,
            properties: QueryProperties::default(),
        }
    }

    pub fn with_properties(mut self, properties: QueryProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn evaluate(&self, query: &Query) -> Result<Vec<DataRow>, SqlError> {
        self.evaluate_with_parameters(query, &[])
    }

    /// Evaluate with positional values for the query's `?` placeholders.
    pub fn evaluate_with_parameters(
        &self,
        query: &Query,
        parameters: &[FieldValue],
    ) -> Result<Vec<DataRow>, SqlError> {
        let mut context = EvaluationContext::new(
            self.data_source,
            self.accessor,
            self.functions,
            &self.properties,
            parameters,
        );
        evaluate_query(query, &mut context)
    }

    /// Standalone predicate check of one row against the query conditions.
    pub fn verify_condition(&self, query: &Query, row: &DataRow) -> Result<bool, SqlError> {
        let context = EvaluationContext::new(
            self.data_source,
            self.accessor,
            self.functions,
            &self.properties,
            &[],
        );
        PredicateEvaluator::verify_condition(query, row, &context)
    }
}

/// Evaluate a query inside an existing context.
pub(crate) fn evaluate_query(
    query: &Query,
    context: &mut EvaluationContext,
) -> Result<Vec<DataRow>, SqlError> {
    let aggregates: Vec<&ReturnParameter> = query
        .return_parameters()
        .iter()
        .filter(|parameter| match &parameter.value {
            ReturnValue::Function(function) => context.functions.is_aggregate(function.name()),
            _ => false,
        })
        .collect();

    let data = if query.joins().is_empty() {
        context.data_source.resource_data(&pushdown_query(query))?
    } else {
        join_rows(query, context)?
    };
    debug!(
        "Evaluating query over '{}', {} candidate rows",
        query.resource_name(),
        data.len()
    );

    let grouping = !query.group_parameters().is_empty();
    let start = query.start().unwrap_or(0);
    let mut passing = 0usize;
    let mut selected: Vec<(DataRow, DataRow)> = Vec::new();
    let mut group_positions: HashMap<String, usize> = HashMap::new();

    for row in data {
        if !PredicateEvaluator::verify_condition(query, &row, context)? {
            continue;
        }
        passing += 1;
        if passing <= start {
            continue;
        }
        if let Some(limit) = query.limit() {
            if !grouping && selected.len() >= limit {
                break;
            }
        }

        let output = if !query.returns_all() && aggregates.is_empty() {
            project_row(query, &aggregates, &row, context)?
        } else {
            enrich_row(query, &aggregates, &row, context)?
        };

        if grouping {
            let key = group_key(query, &row, context)?;
            match group_positions.get(&key) {
                Some(&position) => {
                    selected[position].1.group(&output);
                }
                None => {
                    group_positions.insert(key, selected.len());
                    selected.push((row, output));
                }
            }
        } else {
            selected.push((row, output));
        }
    }

    let mut result = order_rows(query, grouping, selected, context)?;

    for parameter in aggregates {
        if let ReturnValue::Function(function) = &parameter.value {
            let label = parameter.label();
            let mut values = Vec::with_capacity(result.len());
            for row in &result {
                let value = match function.args().first() {
                    Some(arg) => PredicateEvaluator::resolve_operand(arg, row, context)?,
                    None => FieldValue::Null,
                };
                values.push(value);
            }
            let aggregate = context
                .functions
                .aggregate(function.name())
                .ok_or_else(|| {
                    SqlError::function_error(function.name(), "Unknown aggregate function")
                })?;
            result = aggregate.apply(function.name(), &label, &values, result)?;
        }
    }

    Ok(result)
}

/// Rewritten query handed to the data source: same predicates, return all
/// fields, LIMIT raised to start+limit when ordering and grouping allow the
/// source to truncate.
fn pushdown_query(query: &Query) -> Query {
    let mut fetch = Query::new(query.resource_name());
    fetch.set_return_all(true);
    if query.order_parameters().is_empty() && query.group_parameters().is_empty() {
        if let Some(limit) = query.limit() {
            fetch.set_limit(Some(limit + query.start().unwrap_or(0)));
        }
    }
    for evaluator in query.evaluators() {
        fetch.add_evaluator(evaluator.clone());
    }
    fetch
}

/// Project one row into an empty clone carrying the declared return items.
fn project_row(
    query: &Query,
    aggregates: &[&ReturnParameter],
    row: &DataRow,
    context: &EvaluationContext,
) -> Result<DataRow, SqlError> {
    let mut output = row.clone_empty();
    for parameter in query.return_parameters() {
        if aggregates
            .iter()
            .any(|aggregate| std::ptr::eq(*aggregate, parameter))
        {
            continue;
        }
        let value = PredicateEvaluator::resolve_return_value(&parameter.value, row, context)?;
        if !value.is_null() {
            output.put(parameter.label(), value);
        }
    }
    Ok(output)
}

/// Keep the full row, adding the declared return items under their labels.
/// Used when the query returns all fields or declares aggregates.
fn enrich_row(
    query: &Query,
    aggregates: &[&ReturnParameter],
    row: &DataRow,
    context: &EvaluationContext,
) -> Result<DataRow, SqlError> {
    let mut output = row.clone();
    for parameter in query.return_parameters() {
        if aggregates
            .iter()
            .any(|aggregate| std::ptr::eq(*aggregate, parameter))
        {
            continue;
        }
        let value = PredicateEvaluator::resolve_return_value(&parameter.value, row, context)?;
        if !value.is_null() {
            output.put(parameter.label(), value);
        }
    }
    Ok(output)
}

/// Hash key of the group expressions for one row.
fn group_key(
    query: &Query,
    row: &DataRow,
    context: &EvaluationContext,
) -> Result<String, SqlError> {
    let mut key = String::new();
    for parameter in query.group_parameters() {
        let value = PredicateEvaluator::resolve_return_value(&parameter.value, row, context)?;
        key.push_str(&value.to_display_string());
        key.push(GROUP_KEY_SEPARATOR);
    }
    Ok(key)
}

/// Stable ordering with nulls first. Order expressions resolve against the
/// source row for plain queries and against the folded row for grouped ones.
fn order_rows(
    query: &Query,
    grouping: bool,
    selected: Vec<(DataRow, DataRow)>,
    context: &EvaluationContext,
) -> Result<Vec<DataRow>, SqlError> {
    if query.order_parameters().is_empty() {
        return Ok(selected.into_iter().map(|(_, output)| output).collect());
    }

    let mut keyed: Vec<(Vec<FieldValue>, DataRow)> = Vec::with_capacity(selected.len());
    for (original, output) in selected {
        let source = if grouping { &output } else { &original };
        let mut keys = Vec::with_capacity(query.order_parameters().len());
        for parameter in query.order_parameters() {
            keys.push(PredicateEvaluator::resolve_return_value(
                &parameter.value,
                source,
                context,
            )?);
        }
        keyed.push((keys, output));
    }

    let mut failure: Option<SqlError> = None;
    keyed.sort_by(|(left, _), (right, _)| {
        compare_order_keys(query.order_parameters(), left, right, &mut failure)
    });
    if let Some(error) = failure {
        return Err(error);
    }

    Ok(keyed.into_iter().map(|(_, output)| output).collect())
}

fn compare_order_keys(
    parameters: &[OrderParameter],
    left: &[FieldValue],
    right: &[FieldValue],
    failure: &mut Option<SqlError>,
) -> Ordering {
    for (position, parameter) in parameters.iter().enumerate() {
        let a = &left[position];
        let b = &right[position];
        let ordering = match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            // Nulls sort first regardless of direction
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => match a.compare(b) {
                Ok(ordering) => {
                    if parameter.desc {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                }
                Err(error) => {
                    if failure.is_none() {
                        *failure = Some(error);
                    }
                    Ordering::Equal
                }
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Multi-resource join evaluation.
fn join_rows(query: &Query, context: &mut EvaluationContext) -> Result<Vec<DataRow>, SqlError> {
    // One subquery per resource, carrying the predicates that reference only
    // that resource.
    let mut queries: Vec<Query> = Vec::with_capacity(query.joins().len() + 1);
    let mut base = Query::new(query.resource_name());
    base.set_return_all(true);
    for evaluator in evaluators_for_resource(query.evaluators(), query.resource()) {
        base.add_evaluator(evaluator);
    }
    queries.push(base);

    for join in query.joins() {
        let mut subquery = Query::new(join.resource_name());
        subquery.set_return_all(true);
        for evaluator in &join.evaluators {
            subquery.add_evaluator(evaluator.clone());
        }
        for evaluator in evaluators_for_resource(query.evaluators(), &join.resource) {
            subquery.add_evaluator(evaluator);
        }
        queries.push(subquery);
    }

    // The seed is the subquery with the most predicates.
    let mut seed = 0;
    for index in 1..queries.len() {
        if queries[index].evaluators().len() > queries[seed].evaluators().len() {
            seed = index;
        }
    }
    debug!(
        "Join over {} resources, seeding at '{}'",
        queries.len(),
        queries[seed].resource_name()
    );

    // The seed fetch fully applies the predicates pushed into it; mark them
    // so the final filter does not re-check them.
    let seed_resource = if seed == 0 {
        query.resource().clone()
    } else {
        query.joins()[seed - 1].resource.clone()
    };
    for evaluator in evaluators_for_resource(query.evaluators(), &seed_resource) {
        if matches!(evaluator, Evaluator::Field(_)) {
            context.mark_satisfied(evaluator);
        }
    }

    let mut accumulated = fetch_rows(&queries[seed], context)?;

    // Walk right from the seed: the accumulated side holds the join's left
    // resource, the neighbour is the joined resource.
    for index in seed + 1..queries.len() {
        let join = &query.joins()[index - 1];
        let (accumulated_field, neighbour_field) = if field_resource(&join.left_field)
            == Some(&join.resource)
        {
            (&join.right_field, &join.left_field)
        } else {
            (&join.left_field, &join.right_field)
        };
        accumulated = merge_join(
            accumulated,
            &mut queries[index],
            join,
            accumulated_field,
            neighbour_field,
            true,
            context,
        )?;
    }

    // Walk left from the seed: the accumulated side now holds the joined
    // resource, the neighbour is the join's left resource.
    for index in (0..seed).rev() {
        let join = &query.joins()[index];
        let (accumulated_field, neighbour_field) = if field_resource(&join.left_field)
            == Some(&join.resource)
        {
            (&join.left_field, &join.right_field)
        } else {
            (&join.right_field, &join.left_field)
        };
        accumulated = merge_join(
            accumulated,
            &mut queries[index],
            join,
            accumulated_field,
            neighbour_field,
            false,
            context,
        )?;
    }

    Ok(accumulated)
}

/// Merge the accumulated rows with one neighbour resource.
fn merge_join(
    accumulated: Vec<DataRow>,
    neighbour_query: &mut Query,
    join: &Join,
    accumulated_field: &QueryField,
    neighbour_field: &QueryField,
    walking_right: bool,
    context: &EvaluationContext,
) -> Result<Vec<DataRow>, SqlError> {
    // Index the accumulated side by its join key.
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    let mut keys: Vec<FieldValue> = Vec::new();
    for (position, row) in accumulated.iter().enumerate() {
        let key = context.accessor.get(row, accumulated_field)?;
        if key.is_null() {
            continue;
        }
        let display = key.to_display_string();
        if !index.contains_key(&display) {
            keys.push(key);
            index.insert(display.clone(), Vec::new());
        }
        if let Some(positions) = index.get_mut(&display) {
            positions.push(position);
        }
    }

    // Narrow the neighbour fetch to the accumulated keys.
    neighbour_query.add_evaluator(Evaluator::in_collection(neighbour_field.clone(), keys));
    let neighbour_rows = fetch_rows(neighbour_query, context)?;

    let mut merged: Vec<DataRow> = Vec::new();
    let mut matched: HashSet<usize> = HashSet::new();
    for neighbour_row in &neighbour_rows {
        let key = context.accessor.get(neighbour_row, neighbour_field)?;
        let positions = if key.is_null() {
            None
        } else {
            index.get(&key.to_display_string())
        };
        match positions {
            Some(positions) => {
                for &position in positions {
                    matched.insert(position);
                    merged.push(accumulated[position].join(neighbour_row));
                }
            }
            None => {
                if neighbour_is_outer(join.join_type, walking_right) {
                    merged.push(neighbour_row.clone());
                }
            }
        }
    }

    if accumulated_is_outer(join.join_type, walking_right) {
        for (position, row) in accumulated.iter().enumerate() {
            if !matched.contains(&position) {
                merged.push(row.clone());
            }
        }
    }

    Ok(merged)
}

/// Walking right the neighbour is the joined (right) resource, walking left
/// it is the join's left side. The join type selects which side is outer.
fn neighbour_is_outer(join_type: JoinType, walking_right: bool) -> bool {
    match join_type {
        JoinType::Left => !walking_right,
        JoinType::Right => walking_right,
        JoinType::Inner | JoinType::Join => false,
    }
}

fn accumulated_is_outer(join_type: JoinType, walking_right: bool) -> bool {
    match join_type {
        JoinType::Left => walking_right,
        JoinType::Right => !walking_right,
        JoinType::Inner | JoinType::Join => false,
    }
}

/// Fetch the rows of a join subquery through a nested evaluation, so its
/// predicates are fully applied regardless of how much the data source
/// honors.
fn fetch_rows(query: &Query, context: &EvaluationContext) -> Result<Vec<DataRow>, SqlError> {
    let mut nested = context.nested();
    evaluate_query(query, &mut nested)
}

/// The predicates referencing only the given resource, recursively. A nested
/// AND is narrowed to its qualifying children; an OR is pushed only when all
/// its branches qualify, a partial OR would drop rows.
fn evaluators_for_resource(evaluators: &[Evaluator], resource: &QueryResource) -> Vec<Evaluator> {
    let mut result = Vec::new();
    for evaluator in evaluators {
        match evaluator {
            Evaluator::Field(field_evaluator) => {
                if references_only(field_evaluator, resource) {
                    result.push(evaluator.clone());
                }
            }
            Evaluator::And(children) => {
                let qualifying = evaluators_for_resource(children, resource);
                if !qualifying.is_empty() {
                    result.push(Evaluator::And(qualifying));
                }
            }
            Evaluator::Or(children) => {
                let qualifying = evaluators_for_resource(children, resource);
                if qualifying.len() == children.len() && !qualifying.is_empty() {
                    result.push(Evaluator::Or(qualifying));
                }
            }
            _ => {}
        }
    }
    result
}

fn references_only(evaluator: &FieldEvaluator, resource: &QueryResource) -> bool {
    let mut resources = BTreeSet::new();
    operand_resources(&evaluator.left, &mut resources);
    operand_resources(&evaluator.right, &mut resources);
    resources.len() == 1 && resources.contains(resource)
}

fn operand_resources(operand: &Operand, resources: &mut BTreeSet<QueryResource>) {
    match operand {
        Operand::Field(field) => {
            if let Some(resource) = field.resource() {
                resources.insert(resource.clone());
            }
        }
        Operand::Function(function) => {
            resources.extend(function.resources());
        }
        Operand::Collection(items) => {
            for item in items {
                operand_resources(item, resources);
            }
        }
        _ => {}
    }
}

fn field_resource(field: &QueryField) -> Option<&QueryResource> {
    field.resource()
}
