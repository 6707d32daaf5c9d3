//! Server acceptor: listens, enforces limits, routes outbound containers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ferryline_protocol::{EndpointId, ValueContainer};

use crate::connection::{run_connection, ConnectionContext, Link};
use crate::error::SessionError;
use crate::files;
use crate::handshake;
use crate::types::{
    Callbacks, ConnectionCallback, FileCallback, MessageCallback, Priority, SessionConfig,
    SessionType, WorkerCounts,
};
use crate::HANDSHAKE_TIMEOUT;

/// An accepting session endpoint.
///
/// Every accepted connection becomes an independent session; one session's
/// death never touches the others. Outbound containers are routed to
/// sessions by their advertised peer identity.
pub struct MessagingServer {
    shared: Arc<ServerShared>,
    running: tokio::sync::Mutex<Option<Running>>,
}

struct ServerShared {
    config: RwLock<SessionConfig>,
    accepted_types: RwLock<HashSet<SessionType>>,
    session_limit: AtomicUsize,
    callbacks: Arc<Callbacks>,
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    next_session_id: AtomicU64,
    local_port: AtomicU16,
}

struct SessionEntry {
    peer: EndpointId,
    session_type: SessionType,
    link: Arc<Link>,
}

struct Running {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl MessagingServer {
    pub fn new(source_id: impl Into<String>) -> Self {
        let mut accepted = HashSet::new();
        accepted.insert(SessionType::MessageLine);

        Self {
            shared: Arc::new(ServerShared {
                config: RwLock::new(SessionConfig::new(source_id)),
                accepted_types: RwLock::new(accepted),
                session_limit: AtomicUsize::new(0),
                callbacks: Arc::new(Callbacks::default()),
                sessions: Mutex::new(HashMap::new()),
                next_session_id: AtomicU64::new(1),
                local_port: AtomicU16::new(0),
            }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    pub fn set_connection_key(&self, key: impl Into<String>) {
        self.shared.config.write().unwrap().connection_key = key.into();
    }

    pub fn set_compress_mode(&self, compress: bool) {
        self.shared.config.write().unwrap().compress = compress;
    }

    pub fn set_encrypt_mode(&self, encrypt: bool) {
        self.shared.config.write().unwrap().encrypt = encrypt;
    }

    pub fn set_compress_block_size(&self, block_size: usize) {
        self.shared.config.write().unwrap().compress_block_size = block_size;
    }

    /// Maximum live sessions; 0 means unlimited.
    pub fn set_session_limit_count(&self, limit: usize) {
        self.shared.session_limit.store(limit, Ordering::Relaxed);
    }

    pub fn set_possible_session_types(&self, types: impl IntoIterator<Item = SessionType>) {
        *self.shared.accepted_types.write().unwrap() = types.into_iter().collect();
    }

    /// Root directory for files arriving on file lines.
    pub fn set_save_root(&self, root: impl Into<std::path::PathBuf>) {
        self.shared.config.write().unwrap().save_root = Some(root.into());
    }

    pub fn set_connection_notification(&self, cb: ConnectionCallback) {
        *self.shared.callbacks.connection.write().unwrap() = Some(cb);
    }

    pub fn set_message_notification(&self, cb: MessageCallback) {
        *self.shared.callbacks.message.write().unwrap() = Some(cb);
    }

    pub fn set_file_notification(&self, cb: FileCallback) {
        *self.shared.callbacks.file.write().unwrap() = Some(cb);
    }

    pub fn source_id(&self) -> String {
        self.shared.config.read().unwrap().source_id.clone()
    }

    /// Bound port, available once [`listen`](Self::listen) returned.
    pub fn local_port(&self) -> u16 {
        self.shared.local_port.load(Ordering::Relaxed)
    }

    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().unwrap().len()
    }

    /// Binds the listen socket and spawns the accept loop.
    pub async fn listen(&self, port: u16, counts: WorkerCounts) -> Result<(), SessionError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                debug!("server already listening; listen ignored");
                return Ok(());
            }
        }

        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_port = listener.local_addr()?.port();
        self.shared.local_port.store(local_port, Ordering::Relaxed);
        info!(
            server = %self.source_id(),
            port = local_port,
            "server listening"
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(accept_loop(
            Arc::clone(&self.shared),
            listener,
            counts,
            cancel.clone(),
        ));
        *running = Some(Running { cancel, handle });
        Ok(())
    }

    /// Blocks until Ctrl-C (or an explicit [`stop`](Self::stop)) and then
    /// tears the server down.
    pub async fn wait_stop(&self) {
        let cancel = self
            .running
            .lock()
            .await
            .as_ref()
            .map(|running| running.cancel.clone());

        if let Some(cancel) = cancel {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("termination signal received"),
                _ = cancel.cancelled() => {}
            }
        }
        self.stop().await;
    }

    /// Stops accepting and tears every session down. Idempotent.
    pub async fn stop(&self) {
        let taken = self.running.lock().await.take();
        if let Some(running) = taken {
            running.cancel.cancel();
            let _ = running.handle.await;
        }
    }

    /// Routes a container to the sessions matching its target header.
    ///
    /// An empty target sub id addresses every instance of the target id.
    /// Unroutable containers are dropped with a warning, mirroring the
    /// "session died first" race this always boils down to.
    pub fn send(&self, container: ValueContainer) -> Result<(), SessionError> {
        self.send_with_priority(container, Priority::Normal)
    }

    pub fn send_with_priority(
        &self,
        container: ValueContainer,
        priority: Priority,
    ) -> Result<(), SessionError> {
        let sessions = self.shared.sessions.lock().unwrap();
        let mut delivered = 0usize;

        for entry in sessions.values() {
            if !target_matches(&container, &entry.peer) {
                continue;
            }
            if entry.link.send_container(container.copy(true), priority).is_ok() {
                delivered += 1;
            }
        }

        if delivered == 0 {
            warn!(
                target = container.target_id(),
                message_type = container.message_type(),
                "no session matches target; container dropped"
            );
        }
        Ok(())
    }

    /// Routes a container to sessions of one line type. When no session of
    /// that type matches the target (the target sits behind a bridge hop),
    /// every session of the type receives it.
    pub fn send_to_type(
        &self,
        container: ValueContainer,
        session_type: SessionType,
    ) -> Result<(), SessionError> {
        let sessions = self.shared.sessions.lock().unwrap();
        let of_type: Vec<&SessionEntry> = sessions
            .values()
            .filter(|entry| entry.session_type == session_type)
            .collect();

        let matching: Vec<&&SessionEntry> = of_type
            .iter()
            .filter(|entry| target_matches(&container, &entry.peer))
            .collect();

        let recipients: Vec<&SessionEntry> = if matching.is_empty() {
            of_type.clone()
        } else {
            matching.into_iter().copied().collect()
        };

        if recipients.is_empty() {
            warn!(
                %session_type,
                message_type = container.message_type(),
                "no session of type; container dropped"
            );
            return Ok(());
        }

        for entry in recipients {
            let _ = entry
                .link
                .send_container(container.copy(true), Priority::Normal);
        }
        Ok(())
    }

    /// Streams the files of a manifest to its requester's file-line session.
    pub fn send_files(&self, manifest: ValueContainer) -> Result<(), SessionError> {
        let sessions = self.shared.sessions.lock().unwrap();
        let requester = sessions.values().find(|entry| {
            entry.session_type == SessionType::FileLine
                && entry.peer.id == manifest.source_id()
                && (manifest.source_sub_id().is_empty()
                    || entry.peer.sub_id == manifest.source_sub_id())
        });

        match requester {
            Some(entry) => {
                tokio::spawn(files::stream_files(Arc::clone(&entry.link), manifest));
                Ok(())
            }
            None => {
                warn!(
                    source = manifest.source_id(),
                    "no file-line session for manifest requester"
                );
                Err(SessionError::NotConfirmed)
            }
        }
    }
}

fn target_matches(container: &ValueContainer, peer: &EndpointId) -> bool {
    container.target_id() == peer.id
        && (container.target_sub_id().is_empty() || container.target_sub_id() == peer.sub_id)
}

async fn accept_loop(
    shared: Arc<ServerShared>,
    listener: TcpListener,
    counts: WorkerCounts,
    cancel: CancellationToken,
) {
    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            },
        };

        debug!(%peer_addr, "connection accepted");
        let shared = Arc::clone(&shared);
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(shared, stream, counts, cancel).await {
                debug!(%peer_addr, "session ended: {e}");
            }
        });
    }
}

async fn serve_connection(
    shared: Arc<ServerShared>,
    stream: TcpStream,
    counts: WorkerCounts,
    cancel: CancellationToken,
) -> Result<(), SessionError> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    let config = shared.config.read().unwrap().clone();
    let codec = config.codec();

    let request = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        handshake::read_container(&codec, &mut reader),
    )
    .await
    .map_err(|_| SessionError::Timeout)??;
    let request = handshake::parse_request(&request)?;

    // Validate key, session type and session limit before confirming.
    if request.key_digest != ferryline_wire::key_digest(&config.connection_key) {
        let reply = handshake::reject(&config, &request.peer, "invalid connection key");
        handshake::write_container(&codec, &mut writer, &reply).await?;
        return Err(SessionError::HandshakeRejected(
            "invalid connection key".into(),
        ));
    }

    if !shared
        .accepted_types
        .read()
        .unwrap()
        .contains(&request.session_type)
    {
        let reason = format!("session type {} not accepted", request.session_type);
        let reply = handshake::reject(&config, &request.peer, &reason);
        handshake::write_container(&codec, &mut writer, &reply).await?;
        return Err(SessionError::HandshakeRejected(reason));
    }

    let limit = shared.session_limit.load(Ordering::Relaxed);
    if limit != 0 && shared.sessions.lock().unwrap().len() >= limit {
        let reply = handshake::reject(&config, &request.peer, "session limit reached");
        handshake::write_container(&codec, &mut writer, &reply).await?;
        return Err(SessionError::HandshakeRejected("session limit reached".into()));
    }

    let session_id = shared.next_session_id.fetch_add(1, Ordering::Relaxed);
    let mut peer = request.peer.clone();
    let assigned = if peer.sub_id.is_empty() {
        peer.sub_id = session_id.to_string();
        Some(peer.sub_id.clone())
    } else {
        None
    };

    let reply = handshake::confirm(&config, &peer, assigned.as_deref());
    handshake::write_container(&codec, &mut writer, &reply).await?;

    let link = Arc::new(Link::new(
        EndpointId::new(config.source_id.clone(), config.source_sub_id.clone()),
        peer.clone(),
        request.session_type,
        false,
        config.codec(),
        cancel,
    ));

    shared.sessions.lock().unwrap().insert(
        session_id,
        SessionEntry {
            peer: peer.clone(),
            session_type: request.session_type,
            link: Arc::clone(&link),
        },
    );
    info!(peer = %peer, session_type = %request.session_type, "session confirmed");
    shared
        .callbacks
        .fire_connection(&peer.id, &peer.sub_id, true);

    let context = ConnectionContext {
        link,
        callbacks: Arc::clone(&shared.callbacks),
        save_root: config.save_root.clone(),
    };
    let result = run_connection(context, reader, writer, counts.total()).await;

    shared.sessions.lock().unwrap().remove(&session_id);
    shared
        .callbacks
        .fire_connection(&peer.id, &peer.sub_id, false);
    info!(peer = %peer, "session closed");

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionCondition;
    use crate::MessagingClient;
    use ferryline_protocol::{constants, Value};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const KEY: &str = "test_connection_key";

    async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    fn server(types: &[SessionType]) -> MessagingServer {
        let server = MessagingServer::new("test_server");
        server.set_connection_key(KEY);
        server.set_possible_session_types(types.iter().copied());
        server
    }

    fn client(name: &str, session_type: SessionType) -> MessagingClient {
        let client = MessagingClient::new(name);
        client.set_connection_key(KEY);
        client.set_session_type(session_type);
        client
    }

    #[tokio::test]
    async fn message_roundtrip_client_to_server_and_back() {
        let server = server(&[SessionType::MessageLine]);
        let (server_rx_tx, mut server_rx) = mpsc::unbounded_channel();
        server.set_message_notification(Box::new(move |container| {
            let _ = server_rx_tx.send(container);
        }));
        server.listen(0, WorkerCounts::new(1, 1, 1)).await.unwrap();

        let client = client("probe", SessionType::MessageLine);
        let (client_rx_tx, mut client_rx) = mpsc::unbounded_channel();
        client.set_message_notification(Box::new(move |container| {
            let _ = client_rx_tx.send(container);
        }));
        client
            .start("127.0.0.1", server.local_port(), WorkerCounts::new(1, 1, 1))
            .await
            .unwrap();

        wait_until("client confirmed", || client.is_confirmed()).await;

        // Client -> server: source gets stamped with the assigned sub id.
        let request = ValueContainer::addressed("test_server", "", "echo", Vec::new())
            .with("payload", Value::String("ping".into()));
        client.send(request).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), server_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.message_type(), "echo");
        assert_eq!(received.source_id(), "probe");
        assert!(!received.source_sub_id().is_empty(), "sub id was assigned");

        // Server -> client: route back by the received source header.
        let mut response = received.copy(false);
        response.swap_header();
        response.add("payload", Value::String("pong".into()));
        server.send(response).unwrap();

        let answered = tokio::time::timeout(Duration::from_secs(2), client_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answered.message_type(), "echo");
        assert_eq!(
            answered.get_value("payload").and_then(Value::as_str),
            Some("pong")
        );

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn connection_callbacks_fire_true_then_false() {
        let server = server(&[SessionType::MessageLine]);
        server.listen(0, WorkerCounts::new(1, 0, 0)).await.unwrap();

        let client = client("cb_probe", SessionType::MessageLine);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        client.set_connection_notification(Box::new(move |id, _, condition| {
            let _ = events_tx.send((id.to_string(), condition));
        }));
        client
            .start("127.0.0.1", server.local_port(), WorkerCounts::new(1, 0, 0))
            .await
            .unwrap();

        let (peer, condition) = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(peer, "test_server");
        assert!(condition);

        // Server teardown produces exactly one false per cycle.
        server.stop().await;
        let (_, condition) = tokio::time::timeout(Duration::from_secs(2), events_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!condition);

        client.stop().await;
    }

    #[tokio::test]
    async fn wrong_key_is_rejected() {
        let server = server(&[SessionType::MessageLine]);
        server.listen(0, WorkerCounts::new(1, 0, 0)).await.unwrap();

        let client = MessagingClient::new("intruder");
        client.set_connection_key("some_other_key");
        client
            .start("127.0.0.1", server.local_port(), WorkerCounts::new(1, 0, 0))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!client.is_confirmed());
        assert_eq!(server.session_count(), 0);

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn unsupported_session_type_is_rejected() {
        let server = server(&[SessionType::MessageLine]);
        server.listen(0, WorkerCounts::new(1, 0, 0)).await.unwrap();

        let client = client("file_probe", SessionType::FileLine);
        client
            .start("127.0.0.1", server.local_port(), WorkerCounts::new(1, 0, 0))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!client.is_confirmed());
        assert_eq!(server.session_count(), 0);

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn session_limit_rejects_excess_connections() {
        let server = server(&[SessionType::MessageLine]);
        server.set_session_limit_count(1);
        server.listen(0, WorkerCounts::new(1, 0, 0)).await.unwrap();

        let first = client("first", SessionType::MessageLine);
        first
            .start("127.0.0.1", server.local_port(), WorkerCounts::new(1, 0, 0))
            .await
            .unwrap();
        wait_until("first confirmed", || first.is_confirmed()).await;

        let second = client("second", SessionType::MessageLine);
        second
            .start("127.0.0.1", server.local_port(), WorkerCounts::new(1, 0, 0))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!second.is_confirmed());
        assert_eq!(server.session_count(), 1);

        first.stop().await;
        second.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn request_files_streams_to_the_requesting_client() {
        let source_dir = tempfile::tempdir().unwrap();
        let client_store = tempfile::tempdir().unwrap();
        let source_path = source_dir.path().join("payload.bin");
        std::fs::write(&source_path, b"FILE_LINE_BYTES").unwrap();

        let server = server(&[SessionType::FileLine]);
        server.listen(0, WorkerCounts::new(1, 1, 1)).await.unwrap();

        let client = client("file_puller", SessionType::FileLine);
        client.set_save_root(client_store.path());
        let (files_tx, mut files_rx) = mpsc::unbounded_channel();
        client.set_file_notification(Box::new(move |_, _, indication_id, path| {
            let _ = files_tx.send((indication_id.to_string(), path.to_string()));
        }));
        client
            .start("127.0.0.1", server.local_port(), WorkerCounts::new(1, 1, 1))
            .await
            .unwrap();
        wait_until("client confirmed", || client.is_confirmed()).await;

        // Ask the server session to stream one file back to us.
        let manifest = ValueContainer::addressed(
            "test_server",
            "",
            constants::REQUEST_FILES,
            Vec::new(),
        )
        .with(constants::INDICATION_ID, Value::String("pull_1".into()))
        .with(
            constants::FILE,
            Value::Container(vec![
                ferryline_protocol::NamedValue::new(
                    constants::SOURCE,
                    Value::String(source_path.display().to_string()),
                ),
                ferryline_protocol::NamedValue::new(
                    constants::TARGET,
                    Value::String("incoming/payload.bin".into()),
                ),
            ]),
        );
        client.send(manifest).unwrap();

        let (indication_id, path) = tokio::time::timeout(Duration::from_secs(2), files_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(indication_id, "pull_1");
        assert_eq!(path, "incoming/payload.bin");

        let stored = client_store.path().join("incoming/payload.bin");
        assert_eq!(std::fs::read(stored).unwrap(), b"FILE_LINE_BYTES");

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn missing_source_becomes_failure_notification() {
        let server = server(&[SessionType::FileLine]);
        server.listen(0, WorkerCounts::new(1, 1, 1)).await.unwrap();

        let client = client("file_puller", SessionType::FileLine);
        let (files_tx, mut files_rx) = mpsc::unbounded_channel();
        client.set_file_notification(Box::new(move |_, _, indication_id, path| {
            let _ = files_tx.send((indication_id.to_string(), path.to_string()));
        }));
        client
            .start("127.0.0.1", server.local_port(), WorkerCounts::new(1, 1, 1))
            .await
            .unwrap();
        wait_until("client confirmed", || client.is_confirmed()).await;

        let manifest = ValueContainer::addressed(
            "test_server",
            "",
            constants::REQUEST_FILES,
            Vec::new(),
        )
        .with(constants::INDICATION_ID, Value::String("pull_2".into()))
        .with(
            constants::FILE,
            Value::Container(vec![
                ferryline_protocol::NamedValue::new(
                    constants::SOURCE,
                    Value::String("/definitely/not/here.bin".into()),
                ),
                ferryline_protocol::NamedValue::new(
                    constants::TARGET,
                    Value::String("incoming/never.bin".into()),
                ),
            ]),
        );
        client.send(manifest).unwrap();

        let (indication_id, path) = tokio::time::timeout(Duration::from_secs(2), files_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(indication_id, "pull_2");
        assert!(path.is_empty(), "failure frames carry an empty path");

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn compressed_and_encrypted_roundtrip() {
        let server = server(&[SessionType::MessageLine]);
        server.set_compress_mode(true);
        server.set_encrypt_mode(true);
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        server.set_message_notification(Box::new(move |container| {
            let _ = seen_tx.send(container);
        }));
        server.listen(0, WorkerCounts::new(1, 1, 1)).await.unwrap();

        let client = client("secure", SessionType::MessageLine);
        client.set_compress_mode(true);
        client.set_encrypt_mode(true);
        client
            .start("127.0.0.1", server.local_port(), WorkerCounts::new(1, 1, 1))
            .await
            .unwrap();
        wait_until("client confirmed", || client.is_confirmed()).await;

        let container = ValueContainer::addressed("test_server", "", "secure_echo", Vec::new())
            .with("blob", Value::Bytes(vec![42u8; 4096]));
        client.send(container).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.message_type(), "secure_echo");
        assert_eq!(
            received.get_value("blob").and_then(Value::as_bytes),
            Some(vec![42u8; 4096].as_slice())
        );

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let server = server(&[SessionType::MessageLine]);
        server.listen(0, WorkerCounts::new(1, 0, 0)).await.unwrap();

        let client = client("stopper", SessionType::MessageLine);
        client
            .start("127.0.0.1", server.local_port(), WorkerCounts::new(1, 0, 0))
            .await
            .unwrap();
        wait_until("client confirmed", || client.is_confirmed()).await;

        client.stop().await;
        client.stop().await;
        assert_eq!(client.condition(), ConnectionCondition::Expired);

        server.stop().await;
        server.stop().await;
    }
}
