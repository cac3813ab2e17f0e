//! Data source abstraction layer.
//!
//! The evaluator fetches rows through a [`DataSource`] and reads fields
//! through a [`RowAccessor`], so it works with generic map rows or with
//! application objects adapted behind the accessor. [`DataRow`] is the
//! default row: a field bag that knows how to merge with another row
//! (joins) and how to fold another row into itself (grouping).

use crate::crossbar::sql::ast::{Query, QueryField};
use crate::crossbar::sql::error::SqlError;
use crate::crossbar::sql::types::FieldValue;
use std::collections::HashMap;

/// Row-level capability: merge two rows into a combined row.
pub trait Joinable {
    fn join(&self, other: &Self) -> Self;
}

/// Row-level capability: fold another row of the same group into this one.
pub trait Groupable {
    fn group(&mut self, other: &Self);
}

/// Row-level capability: a dynamic field bag that can be extended and cloned
/// with or without its current content.
pub trait Enlarged {
    fn get(&self, field_name: &str) -> Option<&FieldValue>;
    fn put(&mut self, field_name: impl Into<String>, value: FieldValue);
    fn clone_empty(&self) -> Self;
}

/// The default row implementation: a named field bag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataRow {
    fields: HashMap<String, FieldValue>,
}

impl DataRow {
    pub fn new() -> Self {
        Self {
            fields: HashMap::new(),
        }
    }

    pub fn with(mut self, field_name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field_name.into(), value.into());
        self
    }

    pub fn fields(&self) -> &HashMap<String, FieldValue> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Enlarged for DataRow {
    fn get(&self, field_name: &str) -> Option<&FieldValue> {
        self.fields.get(field_name)
    }

    fn put(&mut self, field_name: impl Into<String>, value: FieldValue) {
        self.fields.insert(field_name.into(), value);
    }

    fn clone_empty(&self) -> Self {
        DataRow::new()
    }
}

impl Joinable for DataRow {
    /// Merge keeps this row's values on field collisions, so the accumulated
    /// side of a join wins over the newly fetched side.
    fn join(&self, other: &Self) -> Self {
        let mut combined = self.clone();
        for (field_name, value) in &other.fields {
            combined
                .fields
                .entry(field_name.clone())
                .or_insert_with(|| value.clone());
        }
        combined
    }
}

impl Groupable for DataRow {
    /// Fold `other` into this row: equal values collapse, differing values
    /// accumulate into arrays.
    fn group(&mut self, other: &Self) {
        for (field_name, value) in &other.fields {
            match self.fields.get_mut(field_name) {
                None => {
                    self.fields.insert(field_name.clone(), value.clone());
                }
                Some(FieldValue::Array(values)) => {
                    values.push(value.clone());
                }
                Some(current) => {
                    if !current.loose_eq(value) {
                        let folded = FieldValue::Array(vec![current.clone(), value.clone()]);
                        self.fields.insert(field_name.clone(), folded);
                    }
                }
            }
        }
    }
}

/// Reads one field out of a row, resolving qualification and indexes.
pub trait RowAccessor: Send + Sync {
    fn get(&self, row: &DataRow, field: &QueryField) -> Result<FieldValue, SqlError>;
}

/// Accessor for map rows: tries the qualified name first (joined rows keep
/// both sides), then the bare field name, then applies the index expression
/// against array values. Missing fields read as NULL.
#[derive(Debug, Default)]
pub struct MapRowAccessor;

impl RowAccessor for MapRowAccessor {
    fn get(&self, row: &DataRow, field: &QueryField) -> Result<FieldValue, SqlError> {
        let value = row
            .get(&field.complete_field_name())
            .or_else(|| row.get(field.field_name()))
            .cloned()
            .unwrap_or(FieldValue::Null);

        match field.index() {
            None => Ok(value),
            Some(index) => match &value {
                FieldValue::Array(values) => {
                    let position: usize = index.parse().map_err(|_| {
                        SqlError::evaluation_error(format!(
                            "Index '{}' of field '{}' is not a number",
                            index,
                            field.field_name()
                        ))
                    })?;
                    Ok(values.get(position).cloned().unwrap_or(FieldValue::Null))
                }
                FieldValue::Map(values) => {
                    Ok(values.get(index).cloned().unwrap_or(FieldValue::Null))
                }
                FieldValue::Null => Ok(FieldValue::Null),
                other => Err(SqlError::type_error("ARRAY or MAP", other.type_name())),
            },
        }
    }
}

/// A provider of rows for query resources. The evaluator hands the source a
/// rewritten query carrying the predicates it can push down; the source may
/// honor them or return a superset of the matching rows, the evaluator
/// filters again either way except for predicates it marked satisfied.
pub trait DataSource: Send + Sync {
    fn resource_data(&self, query: &Query) -> Result<Vec<DataRow>, SqlError>;
}

/// In-memory data source keyed by resource name. The readable source used by
/// tests and small deployments.
#[derive(Debug, Default)]
pub struct MemoryDataSource {
    resources: HashMap<String, Vec<DataRow>>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
        }
    }

    pub fn register(&mut self, resource: impl Into<String>, rows: Vec<DataRow>) -> &mut Self {
        self.resources.insert(resource.into(), rows);
        self
    }
}

impl DataSource for MemoryDataSource {
    fn resource_data(&self, query: &Query) -> Result<Vec<DataRow>, SqlError> {
        self.resources
            .get(query.resource_name())
            .cloned()
            .ok_or_else(|| {
                SqlError::resource_error(query.resource_name(), "Resource not registered")
            })
    }
}
