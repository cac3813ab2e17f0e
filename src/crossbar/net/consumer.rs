//! Consumer contracts: the server and client endpoints the service hosts.

use crate::crossbar::net::package::NetPackage;
use crate::crossbar::net::service::NetService;
use crate::crossbar::net::session::NetSession;
use async_trait::async_trait;
use std::sync::Arc;

/// Transport layer protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

/// Socket options applied when a channel is accepted or connected.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketOptions {
    pub nodelay: Option<bool>,
    pub ttl: Option<u32>,
}

/// Base contract of every endpoint. Event callbacks run on service tasks, in
/// per-session per-direction order; they receive the service handle so they
/// can answer through it.
#[async_trait]
pub trait NetConsumer: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn protocol(&self) -> TransportProtocol;

    fn socket_options(&self) -> SocketOptions {
        SocketOptions::default()
    }

    async fn on_connect(&self, _service: &NetService, _package: NetPackage) {}

    async fn on_read(&self, _service: &NetService, _package: NetPackage) {}

    async fn on_write(&self, _service: &NetService, _package: NetPackage) {}

    async fn on_disconnect(&self, _service: &NetService, _package: NetPackage) {}

    /// Called when the service removes a session permanently.
    fn destroy_session(&self, _session: &NetSession) {}
}

/// A listening endpoint.
pub trait ServerConsumer: NetConsumer {
    fn port(&self) -> u16;

    /// On a multi-session port every read may create a new session instead
    /// of reusing the channel's singleton session.
    fn multi_session(&self) -> bool {
        false
    }

    /// Create the session for a first readable payload. Returning `None`
    /// tears the channel down.
    fn create_session(&self, package: &NetPackage) -> Option<NetSession>;
}

/// An outbound endpoint carrying its pre-existing session.
pub trait ClientConsumer: NetConsumer {
    fn host(&self) -> String;

    fn port(&self) -> u16;

    fn session(&self) -> NetSession;
}

/// A registered consumer, server or client variant.
#[derive(Clone)]
pub(crate) enum ConsumerHandle {
    Server(Arc<dyn ServerConsumer>),
    Client(Arc<dyn ClientConsumer>),
}

impl ConsumerHandle {
    pub fn name(&self) -> String {
        match self {
            ConsumerHandle::Server(consumer) => consumer.name().to_string(),
            ConsumerHandle::Client(consumer) => consumer.name().to_string(),
        }
    }

    pub fn socket_options(&self) -> SocketOptions {
        match self {
            ConsumerHandle::Server(consumer) => consumer.socket_options(),
            ConsumerHandle::Client(consumer) => consumer.socket_options(),
        }
    }

    /// Resolve the session for a readable package: the server creates one,
    /// the client always answers with its own.
    pub fn obtain_session(&self, package: &NetPackage) -> Option<NetSession> {
        match self {
            ConsumerHandle::Server(consumer) => consumer.create_session(package),
            ConsumerHandle::Client(consumer) => Some(consumer.session()),
        }
    }

    pub fn destroy_session(&self, session: &NetSession) {
        match self {
            ConsumerHandle::Server(consumer) => consumer.destroy_session(session),
            ConsumerHandle::Client(consumer) => consumer.destroy_session(session),
        }
    }

    pub async fn on_connect(&self, service: &NetService, package: NetPackage) {
        match self {
            ConsumerHandle::Server(consumer) => consumer.on_connect(service, package).await,
            ConsumerHandle::Client(consumer) => consumer.on_connect(service, package).await,
        }
    }

    pub async fn on_read(&self, service: &NetService, package: NetPackage) {
        match self {
            ConsumerHandle::Server(consumer) => consumer.on_read(service, package).await,
            ConsumerHandle::Client(consumer) => consumer.on_read(service, package).await,
        }
    }

    pub async fn on_write(&self, service: &NetService, package: NetPackage) {
        match self {
            ConsumerHandle::Server(consumer) => consumer.on_write(service, package).await,
            ConsumerHandle::Client(consumer) => consumer.on_write(service, package).await,
        }
    }

    pub async fn on_disconnect(&self, service: &NetService, package: NetPackage) {
        match self {
            ConsumerHandle::Server(consumer) => consumer.on_disconnect(service, package).await,
            ConsumerHandle::Client(consumer) => consumer.on_disconnect(service, package).await,
        }
    }
}
