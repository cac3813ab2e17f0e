//! Net packages: the unit every channel event travels in.

use crate::crossbar::net::session::NetSession;
use async_trait::async_trait;
use std::net::SocketAddr;

/// The action a package represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageAction {
    Connect,
    Disconnect,
    Read,
    Write,
    Streaming,
}

/// Delivery status of a package. Mutable after construction, everything else
/// on the package is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageStatus {
    New,
    Ok,
    RejectedSessionLock,
    IoError,
}

/// A unit of traffic on a channel, attached to its session once the session
/// is known.
#[derive(Debug, Clone)]
pub struct NetPackage {
    pub remote_host: String,
    pub remote_address: String,
    pub remote_port: u16,
    pub local_port: u16,
    pub payload: Vec<u8>,
    pub action: PackageAction,
    pub status: PackageStatus,
    pub session: Option<NetSession>,
}

impl NetPackage {
    pub fn new(remote: SocketAddr, local_port: u16, payload: Vec<u8>, action: PackageAction) -> Self {
        Self {
            remote_host: remote.ip().to_string(),
            remote_address: remote.ip().to_string(),
            remote_port: remote.port(),
            local_port,
            payload,
            action,
            status: PackageStatus::New,
            session: None,
        }
    }

    pub fn with_session(mut self, session: NetSession) -> Self {
        self.session = Some(session);
        self
    }

    /// The attached session. Packages handed to consumer callbacks always
    /// carry one.
    pub fn session(&self) -> Option<&NetSession> {
        self.session.as_ref()
    }
}

/// A producer of successive payload chunks for streaming writes.
///
/// Once the write pipeline reaches a streaming package it locks the session,
/// calls [`StreamingSource::init`] and drives the source on a service task.
/// The source owns the outbound channel until it returns `None`; the service
/// then unlocks the session and emits the pending WRITE event.
#[async_trait]
pub trait StreamingSource: Send + 'static {
    /// Called once before the first chunk, with the streaming package.
    async fn init(&mut self, package: &NetPackage);

    /// Produce the next chunk, or `None` when the stream is finished.
    async fn next_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>>;
}
