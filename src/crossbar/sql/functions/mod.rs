//! Scalar and aggregate function layers.
//!
//! A [`FunctionRegistry`] maps a function name to its implementation. Scalar
//! functions receive their already-resolved argument values plus a context
//! exposing the data source; aggregate functions receive the post-filter row
//! collection and replace it with their result. The registry is the
//! extension point: register additional implementations to extend the query
//! surface, unknown names surface as evaluation errors.

pub mod aggregate;
pub mod scalar;

use crate::crossbar::sql::datasource::{DataRow, DataSource, RowAccessor};
use crate::crossbar::sql::error::SqlError;
use crate::crossbar::sql::types::FieldValue;
use std::collections::HashMap;
use std::sync::Arc;

pub use aggregate::AggregateFunctions;
pub use scalar::{
    CollectionFunctions, DateFunctions, MathFunctions, ObjectFunctions, ParcelFunctions,
    ReferenceFunctions, StringFunctions,
};

/// Name of the function a bare math expression compiles to.
pub const MATH_EVAL_FUNCTION: &str = "mathEval";

/// Execution context handed to scalar functions.
pub struct FunctionContext<'a> {
    pub data_source: &'a dyn DataSource,
    pub accessor: &'a dyn RowAccessor,
    pub date_format: &'a str,
}

/// A scalar function: resolved argument values in, one value out.
pub trait ScalarFunction: Send + Sync {
    fn evaluate(
        &self,
        name: &str,
        args: &[FieldValue],
        context: &FunctionContext,
    ) -> Result<FieldValue, SqlError>;
}

/// An aggregate function: applied to the final row collection, its result
/// replaces the collection.
pub trait AggregateFunction: Send + Sync {
    /// `values[i]` is the function's first argument resolved against
    /// `rows[i]`, or NULL when the function takes no arguments.
    fn apply(
        &self,
        name: &str,
        label: &str,
        values: &[FieldValue],
        rows: Vec<DataRow>,
    ) -> Result<Vec<DataRow>, SqlError>;
}

/// Function name registry, the extension point of the query engine.
pub struct FunctionRegistry {
    scalars: HashMap<String, Arc<dyn ScalarFunction>>,
    aggregates: HashMap<String, Arc<dyn AggregateFunction>>,
}

impl FunctionRegistry {
    /// An empty registry without the default layers.
    pub fn empty() -> Self {
        Self {
            scalars: HashMap::new(),
            aggregates: HashMap::new(),
        }
    }

    /// Registry with the default function layers published.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        let math = Arc::new(MathFunctions);
        for name in MathFunctions::NAMES {
            registry.register_scalar(name, math.clone());
        }
        let string = Arc::new(StringFunctions);
        for name in StringFunctions::NAMES {
            registry.register_scalar(name, string.clone());
        }
        let date = Arc::new(DateFunctions);
        for name in DateFunctions::NAMES {
            registry.register_scalar(name, date.clone());
        }
        let collection = Arc::new(CollectionFunctions);
        for name in CollectionFunctions::NAMES {
            registry.register_scalar(name, collection.clone());
        }
        let object = Arc::new(ObjectFunctions);
        for name in ObjectFunctions::NAMES {
            registry.register_scalar(name, object.clone());
        }
        let parcel = Arc::new(ParcelFunctions);
        for name in ParcelFunctions::NAMES {
            registry.register_scalar(name, parcel.clone());
        }
        let reference = Arc::new(ReferenceFunctions);
        for name in ReferenceFunctions::NAMES {
            registry.register_scalar(name, reference.clone());
        }

        let aggregates = Arc::new(AggregateFunctions);
        for name in AggregateFunctions::NAMES {
            registry.register_aggregate(name, aggregates.clone());
        }

        registry
    }

    pub fn register_scalar(&mut self, name: &str, function: Arc<dyn ScalarFunction>) {
        self.scalars.insert(name.to_lowercase(), function);
    }

    pub fn register_aggregate(&mut self, name: &str, function: Arc<dyn AggregateFunction>) {
        self.aggregates.insert(name.to_lowercase(), function);
    }

    pub fn scalar(&self, name: &str) -> Option<&Arc<dyn ScalarFunction>> {
        self.scalars.get(&name.to_lowercase())
    }

    pub fn aggregate(&self, name: &str) -> Option<&Arc<dyn AggregateFunction>> {
        self.aggregates.get(&name.to_lowercase())
    }

    pub fn is_aggregate(&self, name: &str) -> bool {
        self.aggregates.contains_key(&name.to_lowercase())
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
