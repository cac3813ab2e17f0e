// Multiplexed network service: TCP and UDP server and client endpoints over
// one service handle, demultiplexed into logical sessions.

pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod package;
pub mod pipeline;
pub mod registry;
pub mod service;
pub mod session;

// Re-export main API
pub use consumer::{ClientConsumer, NetConsumer, ServerConsumer, SocketOptions, TransportProtocol};
pub use error::NetError;
pub use package::{NetPackage, PackageAction, PackageStatus, StreamingSource};
pub use pipeline::{OutputQueue, StreamingState};
pub use registry::{ChannelId, SessionRegistry};
pub use service::NetService;
pub use session::{NetSession, SessionId};
