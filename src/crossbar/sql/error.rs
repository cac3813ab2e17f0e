use std::fmt;

/// Errors that can occur during query parsing and evaluation
#[derive(Debug, Clone)]
pub enum SqlError {
    /// Query parsing errors, carrying the offending fragment when known
    ParseError {
        message: String,
        fragment: Option<String>,
    },

    /// Query evaluation errors
    EvaluationError {
        message: String,
        query: Option<String>,
    },

    /// Type mismatch during comparison or arithmetic
    TypeError {
        expected: String,
        actual: String,
        value: Option<String>,
    },

    /// Resource not known to the data source
    ResourceError { resource: String, message: String },

    /// Scalar or aggregate function failures, including unknown names
    FunctionError { function: String, message: String },
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlError::ParseError { message, fragment } => {
                if let Some(fragment) = fragment {
                    write!(f, "Query parse error near '{}': {}", fragment, message)
                } else {
                    write!(f, "Query parse error: {}", message)
                }
            }
            SqlError::EvaluationError { message, query } => {
                if let Some(query) = query {
                    write!(f, "Query evaluation error in '{}': {}", query, message)
                } else {
                    write!(f, "Query evaluation error: {}", message)
                }
            }
            SqlError::TypeError {
                expected,
                actual,
                value,
            } => {
                if let Some(value) = value {
                    write!(
                        f,
                        "Type error: expected {}, got {} for value '{}'",
                        expected, actual, value
                    )
                } else {
                    write!(f, "Type error: expected {}, got {}", expected, actual)
                }
            }
            SqlError::ResourceError { resource, message } => {
                write!(f, "Resource error for '{}': {}", resource, message)
            }
            SqlError::FunctionError { function, message } => {
                write!(f, "Function error for '{}': {}", function, message)
            }
        }
    }
}

impl std::error::Error for SqlError {}

impl SqlError {
    /// Create a parse error with the offending fragment
    pub fn parse_error(message: impl Into<String>, fragment: Option<String>) -> Self {
        SqlError::ParseError {
            message: message.into(),
            fragment,
        }
    }

    /// Create an evaluation error
    pub fn evaluation_error(message: impl Into<String>) -> Self {
        SqlError::EvaluationError {
            message: message.into(),
            query: None,
        }
    }

    /// Create a type error
    pub fn type_error(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        SqlError::TypeError {
            expected: expected.into(),
            actual: actual.into(),
            value: None,
        }
    }

    /// Create a resource error
    pub fn resource_error(resource: impl Into<String>, message: impl Into<String>) -> Self {
        SqlError::ResourceError {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a function error
    pub fn function_error(function: impl Into<String>, message: impl Into<String>) -> Self {
        SqlError::FunctionError {
            function: function.into(),
            message: message.into(),
        }
    }
}
