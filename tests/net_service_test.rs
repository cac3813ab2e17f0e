use async_trait::async_trait;
use crossbar::crossbar::config::NetProperties;
use crossbar::crossbar::net::{
    ClientConsumer, NetConsumer, NetPackage, NetService, NetSession, ServerConsumer,
    StreamingSource, TransportProtocol,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{sleep, timeout};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn free_tcp_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|address| address.port())
        .expect("free tcp port")
}

fn free_udp_port() -> u16 {
    std::net::UdpSocket::bind("127.0.0.1:0")
        .and_then(|socket| socket.local_addr())
        .map(|address| address.port())
        .expect("free udp port")
}

#[derive(Default)]
struct EventLog {
    entries: Mutex<Vec<String>>,
}

impl EventLog {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    fn snapshot(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    fn position(&self, entry: &str) -> Option<usize> {
        self.snapshot().iter().position(|e| e == entry)
    }
}

async fn wait_until<F: Fn() -> bool>(description: &str, predicate: F) {
    for _ in 0..500 {
        if predicate() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", description);
}

struct EchoServer {
    port: u16,
    multi: bool,
    log: Arc<EventLog>,
    created: Mutex<Vec<NetSession>>,
}

impl EchoServer {
    fn new(port: u16, multi: bool, log: Arc<EventLog>) -> Self {
        Self {
            port,
            multi,
            log,
            created: Mutex::new(Vec::new()),
        }
    }

    fn created_sessions(&self) -> Vec<NetSession> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetConsumer for EchoServer {
    fn name(&self) -> &str {
        "echo-server"
    }

    fn protocol(&self) -> TransportProtocol {
        TransportProtocol::Tcp
    }

    async fn on_read(&self, service: &NetService, package: NetPackage) {
        self.log
            .push(format!("READ:{}", String::from_utf8_lossy(&package.payload)));
        if package.payload == b"ping" {
            if let Some(session) = package.session() {
                let _ = service.write(session, b"pong").await;
            }
        }
    }
}

impl ServerConsumer for EchoServer {
    fn port(&self) -> u16 {
        self.port
    }

    fn multi_session(&self) -> bool {
        self.multi
    }

    fn create_session(&self, _package: &NetPackage) -> Option<NetSession> {
        let session = NetSession::new(self.name());
        self.created.lock().unwrap().push(session.clone());
        Some(session)
    }
}

struct PingClient {
    port: u16,
    session: NetSession,
    log: Arc<EventLog>,
}

#[async_trait]
impl NetConsumer for PingClient {
    fn name(&self) -> &str {
        "ping-client"
    }

    fn protocol(&self) -> TransportProtocol {
        TransportProtocol::Tcp
    }

    async fn on_connect(&self, service: &NetService, package: NetPackage) {
        self.log.push("CONNECT");
        if let Some(session) = package.session() {
            let _ = service.write(session, b"ping").await;
        }
    }

    async fn on_write(&self, _service: &NetService, package: NetPackage) {
        self.log.push(format!("WRITE:{:?}", package.status));
    }

    async fn on_read(&self, _service: &NetService, package: NetPackage) {
        self.log
            .push(format!("READ:{}", String::from_utf8_lossy(&package.payload)));
    }

    async fn on_disconnect(&self, _service: &NetService, _package: NetPackage) {
        self.log.push("DISCONNECT");
    }
}

impl ClientConsumer for PingClient {
    fn host(&self) -> String {
        "127.0.0.1".to_string()
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn session(&self) -> NetSession {
        self.session.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// TCP echo over a single-session port: client events arrive in the
    /// order CONNECT, WRITE, READ.
    #[tokio::test]
    async fn test_tcp_echo_single_session() {
        init_logging();
        let service = NetService::new(NetProperties::default());
        let port = free_tcp_port();
        let server_log = EventLog::new();
        let client_log = EventLog::new();

        service
            .register_server(Arc::new(EchoServer::new(port, false, server_log.clone())))
            .await
            .unwrap();
        service
            .register_client(Arc::new(PingClient {
                port,
                session: NetSession::new("ping-client"),
                log: client_log.clone(),
            }))
            .await
            .unwrap();

        let log = client_log.clone();
        wait_until("echo round trip", move || {
            log.position("READ:pong").is_some()
        })
        .await;

        let connect = client_log.position("CONNECT").unwrap();
        let write = client_log.position("WRITE:Ok").unwrap();
        let read = client_log.position("READ:pong").unwrap();
        assert!(connect < write, "events: {:?}", client_log.snapshot());
        assert!(write < read, "events: {:?}", client_log.snapshot());

        assert!(server_log.position("READ:ping").is_some());
        service.shutdown().await;
    }

    /// A multi-session port creates a new session per read instead of
    /// reusing the channel singleton.
    #[tokio::test]
    async fn test_tcp_multi_session_port() {
        init_logging();
        let service = NetService::new(NetProperties::default());
        let port = free_tcp_port();
        let log = EventLog::new();
        let server = Arc::new(EchoServer::new(port, true, log));

        service.register_server(server.clone()).await.unwrap();

        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        for greeting in ["hello-one", "hello-two", "hello-three"] {
            stream.write_all(greeting.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            sleep(Duration::from_millis(50)).await;
        }

        let server_for_wait = server.clone();
        wait_until("three sessions created", move || {
            server_for_wait.created_sessions().len() == 3
        })
        .await;

        let sessions = server.created_sessions();
        assert_eq!(
            service.channel_session_count(&sessions[0]).await,
            3,
            "all three sessions share the channel"
        );
        service.shutdown().await;
    }

    struct UdpServer {
        port: u16,
        created: Mutex<Vec<NetSession>>,
    }

    #[async_trait]
    impl NetConsumer for UdpServer {
        fn name(&self) -> &str {
            "udp-server"
        }

        fn protocol(&self) -> TransportProtocol {
            TransportProtocol::Udp
        }
    }

    impl ServerConsumer for UdpServer {
        fn port(&self) -> u16 {
            self.port
        }

        fn create_session(&self, _package: &NetPackage) -> Option<NetSession> {
            let session = NetSession::new(self.name());
            self.created.lock().unwrap().push(session.clone());
            Some(session)
        }
    }

    /// A datagram from a new peer address creates a new session; writes to
    /// the session of the abandoned address return without failing.
    #[tokio::test]
    async fn test_udp_server_rebind() {
        init_logging();
        let service = NetService::new(NetProperties::default());
        let port = free_udp_port();
        let server = Arc::new(UdpServer {
            port,
            created: Mutex::new(Vec::new()),
        });
        service.register_server(server.clone()).await.unwrap();

        let first = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        first.send_to(b"a", ("127.0.0.1", port)).await.unwrap();
        let server_for_wait = server.clone();
        wait_until("first udp session", move || {
            server_for_wait.created.lock().unwrap().len() == 1
        })
        .await;

        // The client "rebinds": same payload pattern from a new local port
        let second = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        second.send_to(b"a2", ("127.0.0.1", port)).await.unwrap();
        let server_for_wait = server.clone();
        wait_until("second udp session", move || {
            server_for_wait.created.lock().unwrap().len() == 2
        })
        .await;

        let sessions = server.created.lock().unwrap().clone();
        assert_ne!(sessions[0], sessions[1]);

        // A stale write to the first session completes without error
        service.write(&sessions[0], b"x").await.unwrap();
        service.shutdown().await;
    }

    /// A connected channel that never attaches a session dies when the
    /// creation timeout expires.
    #[tokio::test]
    async fn test_handshake_timeout_destroys_channel() {
        init_logging();
        let mut properties = NetProperties::default();
        properties.connection_timeout_available = true;
        properties.connection_timeout_millis = 100;
        let service = NetService::new(properties);

        let port = free_tcp_port();
        service
            .register_server(Arc::new(EchoServer::new(port, false, EventLog::new())))
            .await
            .unwrap();

        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        sleep(Duration::from_millis(400)).await;

        assert!(service.sessions().await.is_empty());

        // The server side closed the socket: the pending read sees EOF
        let mut buffer = [0u8; 8];
        let received = timeout(Duration::from_secs(2), stream.read(&mut buffer))
            .await
            .expect("read completes")
            .unwrap();
        assert_eq!(received, 0);
        service.shutdown().await;
    }

    struct SequenceClient {
        port: u16,
        session: NetSession,
        log: Arc<EventLog>,
    }

    #[async_trait]
    impl NetConsumer for SequenceClient {
        fn name(&self) -> &str {
            "sequence-client"
        }

        fn protocol(&self) -> TransportProtocol {
            TransportProtocol::Tcp
        }

        async fn on_connect(&self, service: &NetService, package: NetPackage) {
            if let Some(session) = package.session() {
                let _ = service.write(session, b"1").await;
                let _ = service.write(session, b"").await;
                let _ = service.write(session, b"23").await;
                let _ = service.write(session, b"456").await;
            }
        }

        async fn on_write(&self, _service: &NetService, package: NetPackage) {
            self.log.push(format!("WRITE:{:?}", package.status));
        }

        async fn on_disconnect(&self, _service: &NetService, _package: NetPackage) {
            self.log.push("DISCONNECT");
        }
    }

    impl ClientConsumer for SequenceClient {
        fn host(&self) -> String {
            "127.0.0.1".to_string()
        }

        fn port(&self) -> u16 {
            self.port
        }

        fn session(&self) -> NetSession {
            self.session.clone()
        }
    }

    struct CollectingServer {
        port: u16,
        received: Arc<Mutex<Vec<u8>>>,
    }

    #[async_trait]
    impl NetConsumer for CollectingServer {
        fn name(&self) -> &str {
            "collecting-server"
        }

        fn protocol(&self) -> TransportProtocol {
            TransportProtocol::Tcp
        }

        async fn on_read(&self, _service: &NetService, package: NetPackage) {
            self.received.lock().unwrap().extend_from_slice(&package.payload);
        }
    }

    impl ServerConsumer for CollectingServer {
        fn port(&self) -> u16 {
            self.port
        }

        fn create_session(&self, _package: &NetPackage) -> Option<NetSession> {
            Some(NetSession::new(self.name()))
        }
    }

    /// Outbound bytes equal the concatenation of the payloads in enqueue
    /// order; an empty payload produces zero bytes but still emits WRITE;
    /// disconnect with a farewell delivers the farewell then DISCONNECT.
    #[tokio::test]
    async fn test_write_order_empty_payload_and_disconnect() {
        init_logging();
        let service = NetService::new(NetProperties::default());
        let port = free_tcp_port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let client_log = EventLog::new();
        let session = NetSession::new("sequence-client");

        service
            .register_server(Arc::new(CollectingServer {
                port,
                received: received.clone(),
            }))
            .await
            .unwrap();
        service
            .register_client(Arc::new(SequenceClient {
                port,
                session: session.clone(),
                log: client_log.clone(),
            }))
            .await
            .unwrap();

        let received_for_wait = received.clone();
        wait_until("payloads collected in order", move || {
            received_for_wait.lock().unwrap().as_slice() == b"123456"
        })
        .await;

        // Four WRITE events, including the empty payload's
        let log_for_wait = client_log.clone();
        wait_until("four write events", move || {
            log_for_wait
                .snapshot()
                .iter()
                .filter(|entry| entry.starts_with("WRITE:"))
                .count()
                == 4
        })
        .await;

        service.disconnect(&session, b"bye").await.unwrap();
        let received_for_wait = received.clone();
        wait_until("farewell delivered", move || {
            received_for_wait.lock().unwrap().as_slice() == b"123456bye"
        })
        .await;
        let log_for_wait = client_log.clone();
        wait_until("disconnect event", move || {
            log_for_wait.position("DISCONNECT").is_some()
        })
        .await;

        assert!(!service.is_connected(&session).await);
        service.shutdown().await;
    }

    struct ChunkSource {
        chunks: Vec<Vec<u8>>,
        delay: Duration,
    }

    #[async_trait]
    impl StreamingSource for ChunkSource {
        async fn init(&mut self, _package: &NetPackage) {}

        async fn next_chunk(&mut self) -> std::io::Result<Option<Vec<u8>>> {
            if self.chunks.is_empty() {
                return Ok(None);
            }
            sleep(self.delay).await;
            Ok(Some(self.chunks.remove(0)))
        }
    }

    struct StreamingClient {
        port: u16,
        session: NetSession,
        log: Arc<EventLog>,
    }

    #[async_trait]
    impl NetConsumer for StreamingClient {
        fn name(&self) -> &str {
            "streaming-client"
        }

        fn protocol(&self) -> TransportProtocol {
            TransportProtocol::Tcp
        }

        async fn on_connect(&self, service: &NetService, package: NetPackage) {
            if let Some(session) = package.session() {
                let source = ChunkSource {
                    chunks: vec![b"AB".to_vec(), b"CD".to_vec()],
                    delay: Duration::from_millis(150),
                };
                let _ = service
                    .write_streaming(session, b"HELLO".to_vec(), Box::new(source))
                    .await;
                // Interleaved through the lock: observed as rejected
                let _ = service.write(session, b"X").await;
            }
        }

        async fn on_write(&self, _service: &NetService, package: NetPackage) {
            self.log.push(format!("WRITE:{:?}", package.status));
        }
    }

    impl ClientConsumer for StreamingClient {
        fn host(&self) -> String {
            "127.0.0.1".to_string()
        }

        fn port(&self) -> u16 {
            self.port
        }

        fn session(&self) -> NetSession {
            self.session.clone()
        }
    }

    /// Streaming locks the session: the source owns the channel until done,
    /// interleaved normal writes observe REJECTED_SESSION_LOCK, and the
    /// WRITE event for the streaming package arrives after completion.
    #[tokio::test]
    async fn test_streaming_hand_off_and_session_lock() {
        init_logging();
        let service = NetService::new(NetProperties::default());
        let port = free_tcp_port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let client_log = EventLog::new();
        let session = NetSession::new("streaming-client");

        service
            .register_server(Arc::new(CollectingServer {
                port,
                received: received.clone(),
            }))
            .await
            .unwrap();
        service
            .register_client(Arc::new(StreamingClient {
                port,
                session: session.clone(),
                log: client_log.clone(),
            }))
            .await
            .unwrap();

        let received_for_wait = received.clone();
        wait_until("stream delivered", move || {
            received_for_wait.lock().unwrap().as_slice() == b"HELLOABCD"
        })
        .await;

        let log_for_wait = client_log.clone();
        wait_until("write events observed", move || {
            let snapshot = log_for_wait.snapshot();
            snapshot.contains(&"WRITE:RejectedSessionLock".to_string())
                && snapshot.contains(&"WRITE:Ok".to_string())
        })
        .await;

        // The rejected write never reached the wire
        assert_eq!(received.lock().unwrap().as_slice(), b"HELLOABCD");
        assert!(!session.is_locked());

        // Writes after the stream proceed normally
        service.write(&session, b"Z").await.unwrap();
        let received_for_wait = received.clone();
        wait_until("post-stream write delivered", move || {
            received_for_wait.lock().unwrap().as_slice() == b"HELLOABCDZ"
        })
        .await;
        service.shutdown().await;
    }

    struct RejectingServer {
        port: u16,
    }

    #[async_trait]
    impl NetConsumer for RejectingServer {
        fn name(&self) -> &str {
            "rejecting-server"
        }

        fn protocol(&self) -> TransportProtocol {
            TransportProtocol::Tcp
        }
    }

    impl ServerConsumer for RejectingServer {
        fn port(&self) -> u16 {
            self.port
        }

        fn create_session(&self, _package: &NetPackage) -> Option<NetSession> {
            None
        }
    }

    /// A consumer returning no session tears the channel down.
    #[tokio::test]
    async fn test_null_session_destroys_channel() {
        init_logging();
        let service = NetService::new(NetProperties::default());
        let port = free_tcp_port();
        service
            .register_server(Arc::new(RejectingServer { port }))
            .await
            .unwrap();

        let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        stream.write_all(b"anyone there?").await.unwrap();

        let mut buffer = [0u8; 8];
        let received = timeout(Duration::from_secs(2), stream.read(&mut buffer))
            .await
            .expect("read completes")
            .unwrap();
        assert_eq!(received, 0, "channel closed after null session");
        assert!(service.sessions().await.is_empty());
        service.shutdown().await;
    }
}
