//! Write pipeline: one FIFO per channel, drained in batches on WRITE
//! wakeups, with chunked socket writes and streaming hand-off.

use crate::crossbar::net::consumer::ConsumerHandle;
use crate::crossbar::net::error::NetError;
use crate::crossbar::net::package::{NetPackage, PackageAction, PackageStatus, StreamingSource};
use crate::crossbar::net::registry::ChannelId;
use crate::crossbar::net::service::NetService;
use log::{debug, warn};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// Maximum number of packages drained per WRITE wakeup.
const FLUSH_BATCH: usize = 50;

/// A queued outbound package, optionally carrying its streaming source.
pub struct QueuedPackage {
    pub package: NetPackage,
    pub source: Option<Box<dyn StreamingSource>>,
}

impl QueuedPackage {
    pub fn plain(package: NetPackage) -> Self {
        Self {
            package,
            source: None,
        }
    }
}

/// The per-channel outbound FIFO plus its WRITE-interest signal.
#[derive(Default)]
pub struct OutputQueue {
    queue: Mutex<VecDeque<QueuedPackage>>,
    pub(crate) notify: Notify,
}

impl OutputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue and arm WRITE interest.
    pub async fn push(&self, item: QueuedPackage) {
        self.queue.lock().await.push_back(item);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> Option<QueuedPackage> {
        self.queue.lock().await.pop_front()
    }

    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    /// Move every pending package into `target`, preserving order. Used on
    /// channel migration.
    pub async fn drain_into(&self, target: &OutputQueue) {
        let mut source = self.queue.lock().await;
        if source.is_empty() {
            return;
        }
        let mut destination = target.queue.lock().await;
        while let Some(item) = source.pop_front() {
            destination.push_back(item);
        }
        target.notify.notify_one();
    }

    pub fn wake(&self) {
        self.notify.notify_one();
    }
}

/// Streaming hand-off state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingState {
    Idle,
    Streaming,
}

/// What kind of socket a channel wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelKind {
    TcpServer,
    TcpClient,
    UdpServer,
    UdpClient,
}

pub(crate) enum ChannelTransport {
    Tcp(Mutex<OwnedWriteHalf>),
    /// Unconnected datagram socket, sends resolve the session address
    Udp(Arc<UdpSocket>),
    /// Connected datagram socket
    UdpConnected(Arc<UdpSocket>),
}

/// Runtime state of one registered channel.
pub(crate) struct Channel {
    pub id: ChannelId,
    pub kind: ChannelKind,
    pub local_port: u16,
    pub remote: SocketAddr,
    pub transport: ChannelTransport,
    pub queue: Arc<OutputQueue>,
    pub streaming: Mutex<StreamingState>,
    pub consumer: ConsumerHandle,
    closed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Channel {
    pub fn new(
        id: ChannelId,
        kind: ChannelKind,
        local_port: u16,
        remote: SocketAddr,
        transport: ChannelTransport,
        consumer: ConsumerHandle,
    ) -> Self {
        Self {
            id,
            kind,
            local_port,
            remote,
            transport,
            queue: Arc::new(OutputQueue::new()),
            streaming: Mutex::new(StreamingState::Idle),
            consumer,
            closed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub async fn track_task(&self, task: JoinHandle<()>) {
        self.tasks.lock().await.push(task);
    }

    /// Abort the reader task and close the socket write side.
    pub async fn close(&self) {
        self.mark_closed();
        self.queue.wake();
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        if let ChannelTransport::Tcp(writer) = &self.transport {
            let _ = writer.lock().await.shutdown().await;
        }
    }
}

/// Close a channel from any task, including one of its own: the closed flag
/// flips immediately, the abort runs on a separate task so a reader or
/// writer can finish its teardown path before being cancelled.
pub(crate) fn schedule_close(channel: Arc<Channel>) {
    channel.mark_closed();
    channel.queue.wake();
    tokio::spawn(async move {
        channel.close().await;
    });
}

pub(crate) enum FlushOutcome {
    Continue,
    Disconnected,
}

/// Writer task of one channel: sleep until WRITE interest is armed, flush a
/// batch, re-arm while packages remain.
pub(crate) async fn run_writer(service: NetService, channel: Arc<Channel>) {
    loop {
        channel.queue.notify.notified().await;
        if channel.is_closed() {
            break;
        }
        match flush_channel(&service, &channel).await {
            Ok(FlushOutcome::Continue) => {
                if !channel.queue.is_empty().await {
                    channel.queue.wake();
                }
            }
            Ok(FlushOutcome::Disconnected) => {
                // A datagram server channel is shared by its sessions and
                // keeps flushing for the others
                if channel.kind == ChannelKind::UdpServer {
                    if !channel.queue.is_empty().await {
                        channel.queue.wake();
                    }
                    continue;
                }
                break;
            }
            Err(error) => {
                warn!("Write failure on channel {}: {}", channel.id, error);
                service.destroy_channel(channel.id, true).await;
                break;
            }
        }
    }
}

/// One WRITE event: drain up to [`FLUSH_BATCH`] packages or until the queue
/// empties or a DISCONNECT terminates the loop.
async fn flush_channel(
    service: &NetService,
    channel: &Arc<Channel>,
) -> Result<FlushOutcome, NetError> {
    service.touch_write(channel.id).await;

    let mut counter = 0;
    while counter < FLUSH_BATCH {
        let mut item = match channel.queue.pop().await {
            Some(item) => item,
            None => break,
        };
        counter += 1;

        match item.package.action {
            PackageAction::Write | PackageAction::Streaming => {
                let session = match item.package.session().cloned() {
                    Some(session) => session,
                    None => {
                        warn!("Outbound package without session on channel {}", channel.id);
                        continue;
                    }
                };

                if session.is_locked() {
                    item.package.status = PackageStatus::RejectedSessionLock;
                    if item.package.action == PackageAction::Write {
                        service.emit_event(channel, item.package).await;
                    }
                    continue;
                }

                match write_payload(service, channel, &item.package).await {
                    Ok(()) => {
                        let streaming_hand_off = item.package.action == PackageAction::Streaming
                            && matches!(channel.transport, ChannelTransport::Tcp(_))
                            && item.source.is_some();
                        if streaming_hand_off {
                            streaming_init(service, channel, item).await;
                        } else {
                            item.package.status = PackageStatus::Ok;
                            service.emit_event(channel, item.package).await;
                        }
                    }
                    Err(error) => {
                        item.package.status = PackageStatus::IoError;
                        if item.package.action == PackageAction::Write {
                            service.emit_event(channel, item.package).await;
                        }
                        return Err(error);
                    }
                }
            }
            PackageAction::Disconnect => {
                service.finish_disconnect(channel, item.package).await;
                return Ok(FlushOutcome::Disconnected);
            }
            other => {
                debug!("Ignoring queued package with action {:?}", other);
            }
        }
    }

    Ok(FlushOutcome::Continue)
}

/// Write one payload through the channel, chunked to the configured output
/// buffer size. TCP writes each slice fully; UDP sends each slice to the
/// session address only while the address still maps to that session.
pub(crate) async fn write_payload(
    service: &NetService,
    channel: &Channel,
    package: &NetPackage,
) -> Result<(), NetError> {
    let chunk_size = service.output_buffer_size().max(1);

    match &channel.transport {
        ChannelTransport::Tcp(writer) => {
            let mut writer = writer.lock().await;
            for chunk in package.payload.chunks(chunk_size) {
                writer.write_all(chunk).await?;
            }
            writer.flush().await?;
        }
        ChannelTransport::Udp(socket) => {
            let session = match package.session() {
                Some(session) => session,
                None => return Ok(()),
            };
            let address = match service.address_of(session.id()).await {
                Some(address) => address,
                None => return Ok(()),
            };
            // Stale write after a peer rebind: return without sending
            if !service.address_maps_session(address, session.id()).await {
                return Ok(());
            }
            for chunk in package.payload.chunks(chunk_size) {
                socket.send_to(chunk, address).await?;
            }
        }
        ChannelTransport::UdpConnected(socket) => {
            for chunk in package.payload.chunks(chunk_size) {
                socket.send(chunk).await?;
            }
        }
    }

    Ok(())
}

/// Write raw bytes on behalf of a streaming source.
async fn write_stream_chunk(channel: &Channel, data: &[u8], chunk_size: usize) -> Result<(), NetError> {
    if let ChannelTransport::Tcp(writer) = &channel.transport {
        let mut writer = writer.lock().await;
        for chunk in data.chunks(chunk_size.max(1)) {
            writer.write_all(chunk).await?;
        }
        writer.flush().await?;
    }
    Ok(())
}

/// Hand the channel to the streaming source: lock the session, flip the
/// channel state and drive the source on a service task. The WRITE event for
/// the streaming package is emitted by `streaming_done`, not here.
async fn streaming_init(service: &NetService, channel: &Arc<Channel>, item: QueuedPackage) {
    let QueuedPackage { package, source } = item;
    let mut source = match source {
        Some(source) => source,
        None => return,
    };
    let session = match package.session().cloned() {
        Some(session) => session,
        None => return,
    };

    session.lock();
    *channel.streaming.lock().await = StreamingState::Streaming;

    let service = service.clone();
    let channel = channel.clone();
    tokio::spawn(async move {
        source.init(&package).await;
        let chunk_size = service.output_buffer_size();
        loop {
            match source.next_chunk().await {
                Ok(Some(chunk)) => {
                    if let Err(error) = write_stream_chunk(&channel, &chunk, chunk_size).await {
                        warn!("Streaming failure on channel {}: {}", channel.id, error);
                        session.unlock();
                        *channel.streaming.lock().await = StreamingState::Idle;
                        service.destroy_channel(channel.id, true).await;
                        return;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    warn!("Streaming source error on channel {}: {}", channel.id, error);
                    session.unlock();
                    *channel.streaming.lock().await = StreamingState::Idle;
                    service.destroy_channel(channel.id, true).await;
                    return;
                }
            }
        }
        service.streaming_done(&channel, package).await;
    });
}
