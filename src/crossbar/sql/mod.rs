// SQL-like query engine over arbitrary data sources.
// Text compiles to an AST, the AST evaluates against pluggable resources.

pub mod ast;
pub mod datasource;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod parser;
pub mod types;

// Re-export main API
pub use ast::{
    Evaluator, FieldEvaluator, FieldOperator, Join, JoinType, Operand, OrderParameter, Query,
    QueryField, QueryFunction, QueryResource, ReturnParameter, ReturnValue,
};
pub use datasource::{
    DataRow, DataSource, Enlarged, Groupable, Joinable, MapRowAccessor, MemoryDataSource,
    RowAccessor,
};
pub use error::SqlError;
pub use evaluator::{EvaluationContext, QueryEngine};
pub use functions::{AggregateFunction, FunctionRegistry, ScalarFunction};
pub use parser::QueryParser;
pub use types::FieldValue;
