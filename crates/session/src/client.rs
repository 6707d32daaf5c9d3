//! Client connector with a fixed-backoff reconnect supervisor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ferryline_protocol::{EndpointId, ValueContainer};

use crate::connection::{run_connection, ConnectionContext, Link};
use crate::error::SessionError;
use crate::handshake;
use crate::types::{
    Callbacks, ConnectionCallback, ConnectionCondition, FileCallback, MessageCallback, Priority,
    SessionConfig, SessionType, WorkerCounts,
};
use crate::{CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT, RECONNECT_DELAY};

/// A connecting session endpoint.
///
/// `start` spawns a supervisor task that dials, handshakes and runs the
/// connection; every disconnect fires the connection callback with
/// `condition = false` and is followed by a redial after the fixed backoff,
/// until [`stop`](Self::stop). At most one dial is in flight per client.
pub struct MessagingClient {
    shared: Arc<ClientShared>,
    session_type: RwLock<SessionType>,
    bridge: AtomicBool,
    running: tokio::sync::Mutex<Option<Running>>,
}

struct ClientShared {
    config: RwLock<SessionConfig>,
    callbacks: Arc<Callbacks>,
    condition: RwLock<ConnectionCondition>,
    current: RwLock<Option<Arc<Link>>>,
}

struct Running {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl MessagingClient {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(ClientShared {
                config: RwLock::new(SessionConfig::new(source_id)),
                callbacks: Arc::new(Callbacks::default()),
                condition: RwLock::new(ConnectionCondition::None),
                current: RwLock::new(None),
            }),
            session_type: RwLock::new(SessionType::MessageLine),
            bridge: AtomicBool::new(false),
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

    pub fn set_session_type(&self, session_type: SessionType) {
        *self.session_type.write().unwrap() = session_type;
    }

    /// Marks this client as a routing hop: forwarded containers keep their
    /// original source header.
    pub fn set_bridge_line(&self, bridge: bool) {
        self.bridge.store(bridge, Ordering::Relaxed);
    }

    /// Root directory for files arriving on a file line.
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

    pub fn source_sub_id(&self) -> String {
        self.shared.config.read().unwrap().source_sub_id.clone()
    }

    pub fn condition(&self) -> ConnectionCondition {
        *self.shared.condition.read().unwrap()
    }

    pub fn is_confirmed(&self) -> bool {
        self.condition() == ConnectionCondition::Confirmed
    }

    /// Starts the connector. A second call while running is a no-op, which
    /// is what serializes restarts issued from disconnect callbacks.
    pub async fn start(
        &self,
        host: impl Into<String>,
        port: u16,
        counts: WorkerCounts,
    ) -> Result<(), SessionError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if !current.handle.is_finished() {
                debug!("client already running; start ignored");
                return Ok(());
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor(
            Arc::clone(&self.shared),
            *self.session_type.read().unwrap(),
            self.bridge.load(Ordering::Relaxed),
            host.into(),
            port,
            counts,
            cancel.clone(),
        ));
        *running = Some(Running { cancel, handle });
        Ok(())
    }

    /// Stops the connector and joins its workers. Idempotent.
    pub async fn stop(&self) {
        let taken = self.running.lock().await.take();
        if let Some(running) = taken {
            running.cancel.cancel();
            let _ = running.handle.await;
        }
        *self.shared.condition.write().unwrap() = ConnectionCondition::Expired;
    }

    /// Enqueues a container at normal priority.
    pub fn send(&self, container: ValueContainer) -> Result<(), SessionError> {
        self.send_with_priority(container, Priority::Normal)
    }

    pub fn send_with_priority(
        &self,
        container: ValueContainer,
        priority: Priority,
    ) -> Result<(), SessionError> {
        let current = self.shared.current.read().unwrap();
        match current.as_ref() {
            Some(link) if link.is_open() => link.send_container(container, priority),
            _ => Err(SessionError::NotConfirmed),
        }
    }
}

async fn supervisor(
    shared: Arc<ClientShared>,
    session_type: SessionType,
    bridge: bool,
    host: String,
    port: u16,
    counts: WorkerCounts,
    cancel: CancellationToken,
) {
    loop {
        *shared.condition.write().unwrap() = ConnectionCondition::Connecting;

        match connect_once(&shared, session_type, bridge, &host, port, counts, &cancel).await {
            Ok(()) => debug!("connection cycle ended"),
            Err(e) => warn!("connection cycle failed: {e}"),
        }

        *shared.current.write().unwrap() = None;
        if cancel.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }

    *shared.condition.write().unwrap() = ConnectionCondition::Expired;
}

async fn connect_once(
    shared: &Arc<ClientShared>,
    session_type: SessionType,
    bridge: bool,
    host: &str,
    port: u16,
    counts: WorkerCounts,
    cancel: &CancellationToken,
) -> Result<(), SessionError> {
    let stream = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        connected = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))) => {
            match connected {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(SessionError::Timeout),
            }
        }
    };
    stream.set_nodelay(true)?;

    let (mut reader, mut writer) = stream.into_split();
    let config = shared.config.read().unwrap().clone();
    let codec = config.codec();

    *shared.condition.write().unwrap() = ConnectionCondition::KeyExchanging;
    handshake::write_container(&codec, &mut writer, &handshake::request(&config, session_type))
        .await?;

    let reply = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        handshake::read_container(&codec, &mut reader),
    )
    .await
    .map_err(|_| SessionError::Timeout)??;
    let reply = handshake::parse_confirm(&reply)?;

    if !reply.accepted {
        return Err(SessionError::HandshakeRejected(reply.reason));
    }

    // Adopt a server-assigned instance id when we advertised none.
    let local = {
        let mut config = shared.config.write().unwrap();
        if let Some(sub_id) = reply.assigned_sub_id {
            if config.source_sub_id.is_empty() {
                config.source_sub_id = sub_id;
            }
        }
        EndpointId::new(config.source_id.clone(), config.source_sub_id.clone())
    };

    let peer = reply.peer;
    info!(peer = %peer, %session_type, "session confirmed");

    let link = Arc::new(Link::new(
        local,
        peer.clone(),
        session_type,
        bridge,
        shared.config.read().unwrap().codec(),
        cancel.child_token(),
    ));
    *shared.current.write().unwrap() = Some(Arc::clone(&link));
    *shared.condition.write().unwrap() = ConnectionCondition::Confirmed;
    shared
        .callbacks
        .fire_connection(&peer.id, &peer.sub_id, true);

    let context = ConnectionContext {
        link,
        callbacks: Arc::clone(&shared.callbacks),
        save_root: config.save_root.clone(),
    };
    let result = run_connection(context, reader, writer, counts.total()).await;

    *shared.condition.write().unwrap() = ConnectionCondition::Expired;
    *shared.current.write().unwrap() = None;
    shared
        .callbacks
        .fire_connection(&peer.id, &peer.sub_id, false);

    result
}
