//! Crossbar: a multiplexed network service and a SQL-like query engine
//! sharing one set of process-wide services.
//!
//! The net side hosts TCP and UDP server and client endpoints over a single
//! service handle, demultiplexes traffic into logical sessions and delivers
//! ordered read/write/connect/disconnect events to consumers. The query side
//! compiles a textual SELECT statement into an AST and evaluates it against
//! pluggable data sources, including multi-resource joins, grouping,
//! ordering and aggregation.

pub mod crossbar;

// Re-export main API
pub use crossbar::config::{ConfigError, NetProperties, QueryProperties, ServiceProperties};
pub use crossbar::net::{
    ClientConsumer, NetConsumer, NetError, NetPackage, NetService, NetSession, PackageAction,
    PackageStatus, ServerConsumer, SessionId, StreamingSource, TransportProtocol,
};
pub use crossbar::sql::{
    DataRow, DataSource, FieldValue, FunctionRegistry, Query, QueryParser, RowAccessor, SqlError,
};

// Version and feature info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const FEATURES: &[&str] = &[
    "tcp_server",       // multiplexed TCP listeners, single or multi session per channel
    "tcp_client",       // outbound non-blocking connects with pre-attached sessions
    "udp_endpoints",    // datagram servers and clients demultiplexed by peer address
    "streaming_writes", // channel hand-off to a streaming source under a session lock
    "ordered_events",   // per-session per-direction ordered consumer callbacks
    "query_select",     // SELECT with WHERE, GROUP BY, ORDER BY, LIMIT and START
    "query_joins",      // INNER, LEFT, RIGHT joins planned by predicate selectivity
    "query_functions",  // scalar and aggregate function registries
    "query_parameters", // positional '?' replaceable values
];
