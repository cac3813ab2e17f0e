//! Process-wide service properties.
//!
//! Every tunable the net service and the query engine read lives here, keyed
//! the same way it is documented: `net.input.buffer.size`,
//! `net.connection.timeout`, `query.date.format` and so on. Properties are
//! built from defaults, can be overridden from the environment
//! (`CROSSBAR_NET_INPUT_BUFFER_SIZE=65536`) and are validated once at
//! construction so the services never see an inconsistent value.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::time::Duration;

/// Environment variable prefix for property overrides.
const ENV_PREFIX: &str = "CROSSBAR_";

/// Errors produced while building or validating service properties.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// A property value could not be parsed from its textual form
    InvalidValue {
        key: String,
        value: String,
        expected: String,
    },

    /// The connection creation timeout is enabled but not positive
    InvalidTimeout { millis: i64 },

    /// A buffer size property is zero or otherwise unusable
    InvalidBufferSize { key: String, size: usize },

    /// A parser pattern failed to compile
    InvalidPattern { key: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue {
                key,
                value,
                expected,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for property '{}', expected {}",
                    value, key, expected
                )
            }
            ConfigError::InvalidTimeout { millis } => {
                write!(f, "Illegal creation timeout value: {}", millis)
            }
            ConfigError::InvalidBufferSize { key, size } => {
                write!(f, "Illegal buffer size {} for property '{}'", size, key)
            }
            ConfigError::InvalidPattern { key, message } => {
                write!(f, "Pattern '{}' does not compile: {}", key, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Properties consumed by the net service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetProperties {
    /// `net.input.buffer.size` - per I/O task read buffer, bytes
    pub input_buffer_size: usize,
    /// `net.output.buffer.size` - outbound chunk size, bytes
    pub output_buffer_size: usize,
    /// `net.disconnect.and.remove` - destroy sessions when their channel closes
    pub disconnect_and_remove: bool,
    /// `net.connection.timeout.available` - arm the handshake timer on accept
    pub connection_timeout_available: bool,
    /// `net.connection.timeout` - handshake timeout, milliseconds
    pub connection_timeout_millis: u64,
}

impl Default for NetProperties {
    fn default() -> Self {
        Self {
            input_buffer_size: 16 * 1024,
            output_buffer_size: 16 * 1024,
            disconnect_and_remove: true,
            connection_timeout_available: false,
            connection_timeout_millis: 10_000,
        }
    }
}

impl NetProperties {
    /// Handshake timeout as a duration, meaningful only when
    /// `connection_timeout_available` is set.
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_millis)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.input_buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize {
                key: "net.input.buffer.size".to_string(),
                size: self.input_buffer_size,
            });
        }
        if self.output_buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize {
                key: "net.output.buffer.size".to_string(),
                size: self.output_buffer_size,
            });
        }
        if self.connection_timeout_available && self.connection_timeout_millis == 0 {
            return Err(ConfigError::InvalidTimeout { millis: 0 });
        }
        Ok(())
    }
}

/// Properties consumed by the query parser and evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryProperties {
    /// `query.default.desc.order` - ORDER BY fields without DESC sort descending
    pub default_desc_order: bool,
    /// `query.date.format` - chrono format for date literals
    pub date_format: String,
    /// `query.decimal.format` - informational, decimal literals parse via rust_decimal
    pub decimal_format: String,
    /// `query.scientific.format` - informational, scientific literals parse via f64
    pub scientific_format: String,
    /// `query.evaluators.cache.name` - label for the per-invocation evaluator cache
    pub evaluators_cache_name: String,
}

impl Default for QueryProperties {
    fn default() -> Self {
        Self {
            default_desc_order: false,
            date_format: "%Y-%m-%d %H:%M:%S".to_string(),
            decimal_format: "0.000".to_string(),
            scientific_format: "0.0E0".to_string(),
            evaluators_cache_name: "__evaluators__".to_string(),
        }
    }
}

/// Compiled regular expressions used by the query parser.
///
/// Every pattern is a property so a deployment can tighten or extend literal
/// recognition without touching the parser.
#[derive(Debug, Clone)]
pub struct QueryPatterns {
    /// `query.pattern.select` - SELECT body / FROM resource / conditional tail
    pub select: Regex,
    /// `query.pattern.conditional` - clause keywords inside the conditional tail
    pub conditional: Regex,
    /// `query.pattern.connector` - AND / OR split inside predicates
    pub connector: Regex,
    /// `query.pattern.operator` - comparison operator inside one predicate
    pub operator: Regex,
    /// `query.pattern.join` - resource / ON split inside a join clause
    pub join_on: Regex,
    /// `query.pattern.uuid`
    pub uuid: Regex,
    /// `query.pattern.integer`
    pub integer: Regex,
    /// `query.pattern.decimal`
    pub decimal: Regex,
    /// `query.pattern.scientific`
    pub scientific: Regex,
    /// `query.pattern.math` - expression containing a math connector
    pub math: Regex,
    /// `query.pattern.math.splitter` - the connectors themselves
    pub math_splitter: Regex,
    /// `query.pattern.as` - AS alias suffix
    pub as_suffix: Regex,
    /// `query.pattern.desc` - DESC / ASC suffix
    pub desc_suffix: Regex,
}

impl QueryPatterns {
    pub fn compile() -> Result<Self, ConfigError> {
        let build = |key: &str, pattern: &str| {
            Regex::new(pattern).map_err(|ex| ConfigError::InvalidPattern {
                key: key.to_string(),
                message: ex.to_string(),
            })
        };

        Ok(Self {
            select: build(
                "query.pattern.select",
                r"(?is)^\s*SELECT\s+(?P<select>.+?)\s+FROM\s+(?P<from>\S+)\s*(?P<conditional>.*?)\s*;?\s*$",
            )?,
            conditional: build(
                "query.pattern.conditional",
                r"(?i)\b(INNER\s+JOIN|LEFT\s+JOIN|RIGHT\s+JOIN|JOIN|WHERE|GROUP\s+BY|ORDER\s+BY|LIMIT|START)\b",
            )?,
            connector: build("query.pattern.connector", r"(?i)\b(AND|OR)\b")?,
            operator: build(
                "query.pattern.operator",
                r"(?i)(>=|<=|!=|<>|=|>|<|\bNOT\s+IN\b|\bIN\b|\bLIKE\b)",
            )?,
            join_on: build(
                "query.pattern.join",
                r"(?i)^\s*(?P<resource>\S+)\s+(?:(?P<alias>[A-Za-z_]\w*)\s+)?ON\s+(?P<on>.+)$",
            )?,
            uuid: build(
                "query.pattern.uuid",
                r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
            )?,
            integer: build("query.pattern.integer", r"^-?\d+$")?,
            decimal: build("query.pattern.decimal", r"^-?\d+\.\d+$")?,
            scientific: build("query.pattern.scientific", r"^-?\d+(\.\d+)?[eE][-+]?\d+$")?,
            math: build("query.pattern.math", r"^[^+\-*/]+([+\-*/][^+\-*/]+)+$")?,
            math_splitter: build("query.pattern.math.splitter", r"[+\-*/]")?,
            as_suffix: build("query.pattern.as", r"(?i)\s+AS\s+")?,
            desc_suffix: build("query.pattern.desc", r"(?i)\s+(DESC|ASC)\s*$")?,
        })
    }
}

/// The full property set shared by both cores.
#[derive(Debug, Clone)]
pub struct ServiceProperties {
    pub net: NetProperties,
    pub query: QueryProperties,
    pub patterns: QueryPatterns,
}

impl ServiceProperties {
    /// Build the default property set.
    pub fn new() -> Result<Self, ConfigError> {
        let properties = Self {
            net: NetProperties::default(),
            query: QueryProperties::default(),
            patterns: QueryPatterns::compile()?,
        };
        properties.net.validate()?;
        Ok(properties)
    }

    /// Build the property set applying environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut net = NetProperties::default();
        let mut query = QueryProperties::default();

        if let Some(value) = env_value("NET_INPUT_BUFFER_SIZE") {
            net.input_buffer_size = parse_value("net.input.buffer.size", &value, "bytes")?;
        }
        if let Some(value) = env_value("NET_OUTPUT_BUFFER_SIZE") {
            net.output_buffer_size = parse_value("net.output.buffer.size", &value, "bytes")?;
        }
        if let Some(value) = env_value("NET_DISCONNECT_AND_REMOVE") {
            net.disconnect_and_remove = parse_value("net.disconnect.and.remove", &value, "bool")?;
        }
        if let Some(value) = env_value("NET_CONNECTION_TIMEOUT_AVAILABLE") {
            net.connection_timeout_available =
                parse_value("net.connection.timeout.available", &value, "bool")?;
        }
        if let Some(value) = env_value("NET_CONNECTION_TIMEOUT") {
            net.connection_timeout_millis =
                parse_value("net.connection.timeout", &value, "milliseconds")?;
        }
        if let Some(value) = env_value("QUERY_DEFAULT_DESC_ORDER") {
            query.default_desc_order = parse_value("query.default.desc.order", &value, "bool")?;
        }
        if let Some(value) = env_value("QUERY_DATE_FORMAT") {
            query.date_format = value;
        }

        let properties = Self {
            net,
            query,
            patterns: QueryPatterns::compile()?,
        };
        properties.net.validate()?;
        Ok(properties)
    }
}

fn env_value(suffix: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, suffix)).ok()
}

fn parse_value<T: std::str::FromStr>(
    key: &str,
    value: &str,
    expected: &str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_properties_validate() {
        let properties = ServiceProperties::new().unwrap();
        assert!(properties.net.input_buffer_size > 0);
        assert!(!properties.query.default_desc_order);
    }

    #[test]
    fn test_timeout_validation() {
        let mut net = NetProperties::default();
        net.connection_timeout_available = true;
        net.connection_timeout_millis = 0;
        assert!(net.validate().is_err());
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let mut net = NetProperties::default();
        net.input_buffer_size = 0;
        match net.validate() {
            Err(ConfigError::InvalidBufferSize { key, .. }) => {
                assert_eq!(key, "net.input.buffer.size")
            }
            other => panic!("Expected buffer size error, got {:?}", other),
        }
    }
}
