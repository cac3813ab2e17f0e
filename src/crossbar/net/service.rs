//! The net service: an up-level interface to open TCP and UDP connections
//! as a server or client endpoint.
//!
//! One service handle multiplexes every registered consumer. Accepted and
//! connected sockets become channels; readable payloads are demultiplexed
//! into sessions through the registry; outbound traffic flows through the
//! per-channel write pipeline; consumer callbacks are delivered by the event
//! dispatcher in per-session per-direction order.

use crate::crossbar::config::NetProperties;
use crate::crossbar::net::consumer::{
    ClientConsumer, ConsumerHandle, ServerConsumer, SocketOptions, TransportProtocol,
};
use crate::crossbar::net::dispatcher::EventDispatcher;
use crate::crossbar::net::error::NetError;
use crate::crossbar::net::package::{NetPackage, PackageAction, PackageStatus, StreamingSource};
use crate::crossbar::net::pipeline::{
    run_writer, schedule_close, Channel, ChannelKind, ChannelTransport, QueuedPackage,
    StreamingState,
};
use crate::crossbar::net::registry::{ChannelId, SessionRegistry};
use crate::crossbar::net::session::{NetSession, SessionId};
use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

struct ServiceInner {
    properties: NetProperties,
    registry: Mutex<SessionRegistry>,
    channels: Mutex<HashMap<ChannelId, Arc<Channel>>>,
    dispatcher: EventDispatcher,
    next_channel_id: AtomicU64,
    shutting_down: AtomicBool,
    drivers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the net service. Cheap to clone; every clone drives the same
/// channels, sessions and queues.
#[derive(Clone)]
pub struct NetService {
    inner: Arc<ServiceInner>,
}

impl NetService {
    pub fn new(properties: NetProperties) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                properties,
                registry: Mutex::new(SessionRegistry::new()),
                channels: Mutex::new(HashMap::new()),
                dispatcher: EventDispatcher::new(),
                next_channel_id: AtomicU64::new(1),
                shutting_down: AtomicBool::new(false),
                drivers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn properties(&self) -> &NetProperties {
        &self.inner.properties
    }

    pub(crate) fn output_buffer_size(&self) -> usize {
        self.inner.properties.output_buffer_size
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    fn next_channel_id(&self) -> ChannelId {
        self.inner.next_channel_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a listening endpoint.
    pub async fn register_server(&self, consumer: Arc<dyn ServerConsumer>) -> Result<(), NetError> {
        match consumer.protocol() {
            TransportProtocol::Tcp => self.register_tcp_server(consumer).await,
            TransportProtocol::Udp => self.register_udp_server(consumer).await,
        }
    }

    /// Register an outbound endpoint and connect it.
    pub async fn register_client(&self, consumer: Arc<dyn ClientConsumer>) -> Result<(), NetError> {
        match consumer.protocol() {
            TransportProtocol::Tcp => self.register_tcp_client(consumer).await,
            TransportProtocol::Udp => self.register_udp_client(consumer).await,
        }
    }

    async fn register_tcp_server(&self, consumer: Arc<dyn ServerConsumer>) -> Result<(), NetError> {
        let port = consumer.port();
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|error| NetError::registration(port, error.to_string()))?;
        self.inner
            .registry
            .lock()
            .await
            .register_port(port, consumer.multi_session());

        let service = self.clone();
        let driver = tokio::spawn(async move {
            service.accept_loop(listener, consumer).await;
        });
        self.inner.drivers.lock().await.push(driver);
        info!("TCP server listening on port {}", port);
        Ok(())
    }

    async fn accept_loop(self, listener: TcpListener, consumer: Arc<dyn ServerConsumer>) {
        loop {
            match listener.accept().await {
                Ok((stream, remote)) => {
                    if self.is_shutting_down() {
                        break;
                    }
                    if let Err(error) = self.accept_connection(stream, remote, &consumer).await {
                        warn!("Error accepting a new connection: {}", error);
                    }
                }
                Err(error) => {
                    warn!("Accept failure: {}", error);
                    if self.is_shutting_down() {
                        break;
                    }
                }
            }
        }
    }

    async fn accept_connection(
        &self,
        stream: TcpStream,
        remote: SocketAddr,
        consumer: &Arc<dyn ServerConsumer>,
    ) -> Result<(), NetError> {
        let handle = ConsumerHandle::Server(consumer.clone());
        apply_socket_options(&stream, handle.socket_options());

        let (read_half, write_half) = stream.into_split();
        let channel = Arc::new(Channel::new(
            self.next_channel_id(),
            ChannelKind::TcpServer,
            consumer.port(),
            remote,
            ChannelTransport::Tcp(Mutex::new(write_half)),
            handle,
        ));
        self.install_channel(&channel).await;
        self.spawn_tcp_reader(&channel, read_half).await;
        self.spawn_writer(&channel).await;
        debug!("Accepted channel {} from {}", channel.id, remote);

        // One-shot handshake timer: the channel dies if no session attached
        // before expiry.
        if self.inner.properties.connection_timeout_available {
            let service = self.clone();
            let channel_id = channel.id;
            let timeout = self.inner.properties.connection_timeout();
            tokio::spawn(async move {
                sleep(timeout).await;
                let attached = service.inner.registry.lock().await.has_sessions(channel_id);
                if !attached {
                    debug!("Creation timeout expired for channel {}", channel_id);
                    service.destroy_channel(channel_id, false).await;
                }
            });
        }

        Ok(())
    }

    async fn register_tcp_client(&self, consumer: Arc<dyn ClientConsumer>) -> Result<(), NetError> {
        let port = consumer.port();
        let stream = TcpStream::connect((consumer.host(), port))
            .await
            .map_err(|error| NetError::registration(port, error.to_string()))?;
        let handle = ConsumerHandle::Client(consumer.clone());
        apply_socket_options(&stream, handle.socket_options());

        let local_port = stream.local_addr().map(|addr| addr.port()).unwrap_or(0);
        let remote = stream
            .peer_addr()
            .map_err(|error| NetError::registration(port, error.to_string()))?;
        let (read_half, write_half) = stream.into_split();
        let channel = Arc::new(Channel::new(
            self.next_channel_id(),
            ChannelKind::TcpClient,
            local_port,
            remote,
            ChannelTransport::Tcp(Mutex::new(write_half)),
            handle,
        ));
        self.install_channel(&channel).await;
        self.spawn_tcp_reader(&channel, read_half).await;
        self.spawn_writer(&channel).await;

        // The client session pre-exists; attach it and mark the outbound
        // port single-session.
        let session = consumer.session();
        {
            let mut registry = self.inner.registry.lock().await;
            registry.register_port(local_port, false);
            registry.attach_session(&session, channel.id);
        }
        info!("TCP client connected to {}", remote);

        let package = NetPackage::new(remote, local_port, Vec::new(), PackageAction::Connect)
            .with_session(session);
        self.emit_event(&channel, package).await;
        Ok(())
    }

    async fn register_udp_server(&self, consumer: Arc<dyn ServerConsumer>) -> Result<(), NetError> {
        let port = consumer.port();
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(|error| NetError::registration(port, error.to_string()))?;
        let socket = Arc::new(socket);
        let local = socket
            .local_addr()
            .map_err(|error| NetError::registration(port, error.to_string()))?;

        self.inner
            .registry
            .lock()
            .await
            .register_port(port, consumer.multi_session());

        let channel = Arc::new(Channel::new(
            self.next_channel_id(),
            ChannelKind::UdpServer,
            port,
            local,
            ChannelTransport::Udp(socket.clone()),
            ConsumerHandle::Server(consumer),
        ));
        self.install_channel(&channel).await;
        self.spawn_udp_server_reader(&channel, socket).await;
        self.spawn_writer(&channel).await;
        info!("UDP server listening on port {}", port);
        Ok(())
    }

    async fn register_udp_client(&self, consumer: Arc<dyn ClientConsumer>) -> Result<(), NetError> {
        let port = consumer.port();
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|error| NetError::registration(port, error.to_string()))?;
        socket
            .connect((consumer.host(), port))
            .await
            .map_err(|error| NetError::registration(port, error.to_string()))?;
        let socket = Arc::new(socket);
        let local_port = socket.local_addr().map(|addr| addr.port()).unwrap_or(0);
        let remote = socket
            .peer_addr()
            .map_err(|error| NetError::registration(port, error.to_string()))?;

        let channel = Arc::new(Channel::new(
            self.next_channel_id(),
            ChannelKind::UdpClient,
            local_port,
            remote,
            ChannelTransport::UdpConnected(socket.clone()),
            ConsumerHandle::Client(consumer.clone()),
        ));
        self.install_channel(&channel).await;
        self.spawn_udp_client_reader(&channel, socket).await;
        self.spawn_writer(&channel).await;

        let session = consumer.session();
        {
            let mut registry = self.inner.registry.lock().await;
            registry.register_port(local_port, false);
            registry.attach_session(&session, channel.id);
            registry.set_address(session.id(), remote);
        }
        info!("UDP client bound to {}", remote);

        let package = NetPackage::new(remote, local_port, Vec::new(), PackageAction::Connect)
            .with_session(session);
        self.emit_event(&channel, package).await;
        Ok(())
    }

    async fn install_channel(&self, channel: &Arc<Channel>) {
        self.inner
            .channels
            .lock()
            .await
            .insert(channel.id, channel.clone());
        self.inner
            .registry
            .lock()
            .await
            .register_channel(channel.id, channel.queue.clone());
    }

    async fn spawn_writer(&self, channel: &Arc<Channel>) {
        let task = tokio::spawn(run_writer(self.clone(), channel.clone()));
        channel.track_task(task).await;
    }

    async fn spawn_tcp_reader(&self, channel: &Arc<Channel>, mut read_half: OwnedReadHalf) {
        let service = self.clone();
        let reader_channel = channel.clone();
        let input_size = self.inner.properties.input_buffer_size;
        let task = tokio::spawn(async move {
            let mut buffer = vec![0u8; input_size];
            loop {
                match read_half.read(&mut buffer).await {
                    Ok(0) => {
                        service.destroy_channel(reader_channel.id, true).await;
                        break;
                    }
                    Ok(received) => {
                        let mut data = buffer[..received].to_vec();
                        // Drain whatever else is ready before handing off
                        loop {
                            match read_half.try_read(&mut buffer) {
                                Ok(0) => break,
                                Ok(extra) => data.extend_from_slice(&buffer[..extra]),
                                Err(ref error)
                                    if error.kind() == std::io::ErrorKind::WouldBlock =>
                                {
                                    break;
                                }
                                Err(_) => break,
                            }
                        }
                        service.handle_tcp_read(&reader_channel, data).await;
                    }
                    Err(error) => {
                        debug!("Read failure on channel {}: {}", reader_channel.id, error);
                        service.destroy_channel(reader_channel.id, true).await;
                        break;
                    }
                }
                if reader_channel.is_closed() {
                    break;
                }
            }
        });
        channel.track_task(task).await;
    }

    async fn spawn_udp_server_reader(&self, channel: &Arc<Channel>, socket: Arc<UdpSocket>) {
        let service = self.clone();
        let reader_channel = channel.clone();
        let input_size = self.inner.properties.input_buffer_size;
        let task = tokio::spawn(async move {
            let mut buffer = vec![0u8; input_size];
            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((received, peer)) => {
                        let data = buffer[..received].to_vec();
                        service.handle_udp_read(&reader_channel, peer, data).await;
                    }
                    Err(error) => {
                        warn!("UDP read failure on channel {}: {}", reader_channel.id, error);
                        if reader_channel.is_closed() {
                            break;
                        }
                    }
                }
            }
        });
        channel.track_task(task).await;
    }

    async fn spawn_udp_client_reader(&self, channel: &Arc<Channel>, socket: Arc<UdpSocket>) {
        let service = self.clone();
        let reader_channel = channel.clone();
        let input_size = self.inner.properties.input_buffer_size;
        let task = tokio::spawn(async move {
            let mut buffer = vec![0u8; input_size];
            loop {
                match socket.recv(&mut buffer).await {
                    Ok(received) => {
                        let data = buffer[..received].to_vec();
                        let peer = reader_channel.remote;
                        service.handle_udp_read(&reader_channel, peer, data).await;
                    }
                    Err(error) => {
                        debug!("UDP client read failure: {}", error);
                        service.destroy_channel(reader_channel.id, true).await;
                        break;
                    }
                }
                if reader_channel.is_closed() {
                    break;
                }
            }
        });
        channel.track_task(task).await;
    }

    /// Demultiplex a readable TCP payload into its session, creating or
    /// migrating the session binding as needed, then dispatch READ.
    async fn handle_tcp_read(&self, channel: &Arc<Channel>, data: Vec<u8>) {
        if self.is_shutting_down() {
            return;
        }

        let mut package = NetPackage::new(
            channel.remote,
            channel.local_port,
            data,
            PackageAction::Read,
        );

        // Reuse the channel singleton unless the port is multi-session
        let existing = {
            let registry = self.inner.registry.lock().await;
            if registry.has_sessions(channel.id) && !registry.is_multi_session(channel.local_port)
            {
                registry.first_session(channel.id)
            } else {
                None
            }
        };

        let session = match existing {
            Some(session) => session,
            None => match channel.consumer.obtain_session(&package) {
                Some(session) => session,
                None => {
                    debug!(
                        "No session obtained for channel {}, destroying",
                        channel.id
                    );
                    self.destroy_channel(channel.id, false).await;
                    return;
                }
            },
        };
        package.session = Some(session.clone());

        // First attachment may be a channel migration: the session was bound
        // to another channel before (reconnect), so its queue and bindings
        // move here and the old channel closes.
        let migration = {
            let mut registry = self.inner.registry.lock().await;
            if !registry.has_sessions(channel.id) {
                match registry.channel_of(session.id()) {
                    Some(old_channel) if old_channel != channel.id => {
                        let migrated = registry.update_channel(old_channel, channel.id);
                        registry.attach_session(&session, channel.id);
                        Some((old_channel, migrated.queue))
                    }
                    _ => {
                        registry.attach_session(&session, channel.id);
                        None
                    }
                }
            } else if registry.is_multi_session(channel.local_port) {
                registry.attach_session(&session, channel.id);
                None
            } else {
                None
            }
        };

        if let Some((old_channel_id, old_queue)) = migration {
            debug!(
                "Session {} migrated from channel {} to {}",
                session.id(),
                old_channel_id,
                channel.id
            );
            let old_channel = self.inner.channels.lock().await.remove(&old_channel_id);
            if let Some(old_channel) = old_channel {
                old_channel.close().await;
            }
            if let Some(old_queue) = old_queue {
                old_queue.drain_into(&channel.queue).await;
            }
        }

        if !package.payload.is_empty() {
            self.emit_event(channel, package).await;
        }
    }

    /// Demultiplex one datagram by peer address.
    async fn handle_udp_read(&self, channel: &Arc<Channel>, peer: SocketAddr, data: Vec<u8>) {
        if self.is_shutting_down() {
            return;
        }

        let mut package = NetPackage::new(peer, channel.local_port, data, PackageAction::Read);

        let existing = {
            let registry = self.inner.registry.lock().await;
            if registry.is_multi_session(channel.local_port) {
                None
            } else {
                registry.first_session_by_address(peer)
            }
        };

        let session = match existing {
            Some(session) => session,
            None => match channel.consumer.obtain_session(&package) {
                Some(session) => session,
                None => return,
            },
        };
        package.session = Some(session.clone());

        {
            let mut registry = self.inner.registry.lock().await;
            registry.attach_session(&session, channel.id);
            registry.set_address(session.id(), peer);
        }

        if !package.payload.is_empty() {
            self.emit_event(channel, package).await;
        }
    }

    /// Enqueue a payload for a session. The package is flushed by the
    /// channel's writer in enqueue order.
    pub async fn write(&self, session: &NetSession, data: &[u8]) -> Result<(), NetError> {
        self.enqueue(session, data.to_vec(), PackageAction::Write, None)
            .await
    }

    /// Enqueue a streaming write: once the leading payload flushes, the
    /// source owns the channel until it finishes.
    pub async fn write_streaming(
        &self,
        session: &NetSession,
        data: Vec<u8>,
        source: Box<dyn StreamingSource>,
    ) -> Result<(), NetError> {
        self.enqueue(session, data, PackageAction::Streaming, Some(source))
            .await
    }

    /// Enqueue a farewell payload (when non-empty) followed by a disconnect
    /// package that tears the channel down when flushed.
    pub async fn disconnect(&self, session: &NetSession, farewell: &[u8]) -> Result<(), NetError> {
        if !farewell.is_empty() {
            self.enqueue(session, farewell.to_vec(), PackageAction::Write, None)
                .await?;
        }
        self.enqueue(session, Vec::new(), PackageAction::Disconnect, None)
            .await
    }

    async fn enqueue(
        &self,
        session: &NetSession,
        payload: Vec<u8>,
        action: PackageAction,
        source: Option<Box<dyn StreamingSource>>,
    ) -> Result<(), NetError> {
        let channel = self.channel_of_session(session).await?;
        let package = NetPackage::new(channel.remote, channel.local_port, payload, action)
            .with_session(session.clone());
        channel.queue.push(QueuedPackage { package, source }).await;
        Ok(())
    }

    async fn channel_of_session(&self, session: &NetSession) -> Result<Arc<Channel>, NetError> {
        let channel_id = self
            .inner
            .registry
            .lock()
            .await
            .channel_of(session.id())
            .ok_or_else(|| NetError::protocol(format!("Unknown session {}", session.id())))?;
        self.inner
            .channels
            .lock()
            .await
            .get(&channel_id)
            .cloned()
            .ok_or_else(|| NetError::protocol(format!("Channel {} is gone", channel_id)))
    }

    /// True while the session is bound to a channel.
    pub async fn is_connected(&self, session: &NetSession) -> bool {
        self.inner
            .registry
            .lock()
            .await
            .channel_of(session.id())
            .is_some()
    }

    /// True while the session's channel is open.
    pub async fn check_session(&self, session: &NetSession) -> bool {
        match self.channel_of_session(session).await {
            Ok(channel) => !channel.is_closed(),
            Err(_) => false,
        }
    }

    pub async fn sessions(&self) -> Vec<NetSession> {
        self.inner.registry.lock().await.sessions_list()
    }

    /// Number of sessions sharing the channel the session is bound to.
    pub async fn channel_session_count(&self, session: &NetSession) -> usize {
        let registry = self.inner.registry.lock().await;
        match registry.channel_of(session.id()) {
            Some(channel) => registry.session_count(channel),
            None => 0,
        }
    }

    /// Whether the channel's streaming state machine is mid-stream.
    pub async fn is_streaming(&self, session: &NetSession) -> bool {
        match self.channel_of_session(session).await {
            Ok(channel) => *channel.streaming.lock().await == StreamingState::Streaming,
            Err(_) => false,
        }
    }

    /// Destroy a channel: unregister it, close the socket, abort its tasks
    /// and optionally emit DISCONNECT for every session it carried.
    /// Idempotent.
    pub(crate) async fn destroy_channel(&self, channel_id: ChannelId, emit_disconnect: bool) {
        let channel = self.inner.channels.lock().await.remove(&channel_id);
        let outcome = self
            .inner
            .registry
            .lock()
            .await
            .destroy_channel(channel_id, self.inner.properties.disconnect_and_remove);

        let channel = match channel {
            Some(channel) => channel,
            None => return,
        };
        schedule_close(channel.clone());

        for session in &outcome.removed {
            channel.consumer.destroy_session(session);
        }
        if emit_disconnect {
            for session in outcome.sessions {
                let package = NetPackage::new(
                    channel.remote,
                    channel.local_port,
                    Vec::new(),
                    PackageAction::Disconnect,
                )
                .with_session(session);
                self.emit_event(&channel, package).await;
            }
        }
        debug!("Channel {} destroyed", channel_id);
    }

    /// Complete a flushed disconnect package: tear down the transport
    /// binding and emit the DISCONNECT event.
    pub(crate) async fn finish_disconnect(&self, channel: &Arc<Channel>, mut package: NetPackage) {
        match channel.kind {
            ChannelKind::TcpServer | ChannelKind::TcpClient => {
                self.destroy_channel(channel.id, false).await;
            }
            ChannelKind::UdpClient => {
                if let Some(session) = package.session().cloned() {
                    let removed = self.inner.registry.lock().await.remove_udp_session(
                        session.id(),
                        channel.id,
                        self.inner.properties.disconnect_and_remove,
                    );
                    if self.inner.properties.disconnect_and_remove {
                        if let Some(removed) = removed {
                            channel.consumer.destroy_session(&removed);
                        }
                    }
                }
                self.inner.channels.lock().await.remove(&channel.id);
                schedule_close(channel.clone());
            }
            // The shared datagram socket outlives any one session
            ChannelKind::UdpServer => {}
        }

        package.status = PackageStatus::Ok;
        self.emit_event(channel, package).await;
    }

    /// Called by the streaming task once the source is exhausted: unlock the
    /// session, return the channel to IDLE and emit the pending WRITE.
    pub(crate) async fn streaming_done(&self, channel: &Arc<Channel>, mut package: NetPackage) {
        if let Some(session) = package.session() {
            session.unlock();
        }
        *channel.streaming.lock().await = StreamingState::Idle;
        package.status = PackageStatus::Ok;
        self.emit_event(channel, package).await;
        // Packages queued behind the stream proceed normally
        channel.queue.wake();
    }

    pub(crate) async fn emit_event(&self, channel: &Arc<Channel>, package: NetPackage) {
        self.inner
            .dispatcher
            .dispatch(self.clone(), channel.consumer.clone(), package)
            .await;
    }

    pub(crate) async fn touch_write(&self, channel_id: ChannelId) {
        self.inner.registry.lock().await.touch_write(channel_id);
    }

    pub(crate) async fn address_of(&self, session: SessionId) -> Option<SocketAddr> {
        self.inner.registry.lock().await.address_of(session)
    }

    pub(crate) async fn address_maps_session(
        &self,
        address: SocketAddr,
        session: SessionId,
    ) -> bool {
        self.inner
            .registry
            .lock()
            .await
            .address_maps_session(address, session)
    }

    /// Graceful shutdown: flag, enqueue an empty disconnect per session,
    /// drain the writers, then stop the accept drivers and force-close
    /// whatever remains.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let sessions = self.inner.registry.lock().await.sessions_list();
        let disconnects = sessions
            .iter()
            .map(|session| self.disconnect(session, b""));
        for result in join_all(disconnects).await {
            if let Err(error) = result {
                debug!("Shutdown disconnect skipped: {}", error);
            }
        }

        for _ in 0..50 {
            let drained = {
                let channels = self.inner.channels.lock().await;
                channels
                    .values()
                    .all(|channel| channel.kind == ChannelKind::UdpServer)
            };
            if drained {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        for driver in self.inner.drivers.lock().await.drain(..) {
            driver.abort();
        }

        let remaining: Vec<ChannelId> = self
            .inner
            .channels
            .lock()
            .await
            .keys()
            .copied()
            .collect();
        for channel_id in remaining {
            self.destroy_channel(channel_id, false).await;
        }
        info!("Net service shut down");
    }
}

fn apply_socket_options(stream: &TcpStream, options: SocketOptions) {
    if let Some(nodelay) = options.nodelay {
        if let Err(error) = stream.set_nodelay(nodelay) {
            warn!("Unable to set TCP_NODELAY: {}", error);
        }
    }
    if let Some(ttl) = options.ttl {
        if let Err(error) = stream.set_ttl(ttl) {
            warn!("Unable to set IP_TTL: {}", error);
        }
    }
}
