//! Per-connection runtime shared by clients and server sessions.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use ferryline_protocol::{constants, EndpointId, ValueContainer};
use ferryline_wire::{read_frame, FileFrame, FrameCodec, FramePayload};

use crate::error::SessionError;
use crate::files;
use crate::queue::{writer_worker, OutFrame, SendQueues};
use crate::types::{Callbacks, Priority, SessionType};
use crate::{DRAIN_GRACE, KEEP_ALIVE_PERIOD};

/// Shared handle to one live connection.
///
/// Cheap to clone via `Arc`; senders encode under the codec and enqueue,
/// the writer workers do the socket work.
pub(crate) struct Link {
    local: EndpointId,
    peer: RwLock<EndpointId>,
    session_type: SessionType,
    bridge: bool,
    codec: FrameCodec,
    queues: Arc<SendQueues>,
    cancel: CancellationToken,
}

impl Link {
    pub fn new(
        local: EndpointId,
        peer: EndpointId,
        session_type: SessionType,
        bridge: bool,
        codec: FrameCodec,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            local,
            peer: RwLock::new(peer),
            session_type,
            bridge,
            codec,
            queues: Arc::new(SendQueues::new()),
            cancel,
        }
    }

    pub fn peer(&self) -> EndpointId {
        self.peer.read().unwrap().clone()
    }

    pub fn session_type(&self) -> SessionType {
        self.session_type
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_open(&self) -> bool {
        !self.queues.is_closed() && !self.cancel.is_cancelled()
    }

    /// Enqueues a container. Outside bridge mode an empty source header is
    /// stamped with this endpoint's identity; a bridge hop forwards headers
    /// untouched so the router stays in charge of provenance.
    pub fn send_container(
        &self,
        mut container: ValueContainer,
        priority: Priority,
    ) -> Result<(), SessionError> {
        if !self.bridge && container.source_id().is_empty() {
            container.set_source(self.local.id.clone(), self.local.sub_id.clone());
        }

        let text = container.serialize()?;
        let (flags, bytes) = self.codec.encode(&FramePayload::Message(text.into_bytes()))?;
        if !self.queues.push(priority, OutFrame { flags, bytes }) {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    /// Enqueues a file frame (file lines only).
    pub fn send_file(&self, frame: FileFrame, priority: Priority) -> Result<(), SessionError> {
        let (flags, bytes) = self.codec.encode(&FramePayload::File(frame))?;
        if !self.queues.push(priority, OutFrame { flags, bytes }) {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn decode(&self, flags: u16, payload: Vec<u8>) -> Result<FramePayload, SessionError> {
        Ok(self.codec.decode(flags, payload)?)
    }
}

/// Everything a running connection needs besides its socket halves.
pub(crate) struct ConnectionContext {
    pub link: Arc<Link>,
    pub callbacks: Arc<Callbacks>,
    pub save_root: Option<PathBuf>,
}

/// Runs one confirmed connection to completion.
///
/// Spawns the writer workers and the keepalive pump, then drives the read
/// pump inline. Returns when the peer goes away, a protocol error occurs, or
/// the connection token is cancelled; queued sends get the drain grace.
pub(crate) async fn run_connection<R, W>(
    ctx: ConnectionContext,
    reader: R,
    writer: W,
    worker_count: usize,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let cancel = ctx.link.cancel_token();
    let writer = Arc::new(tokio::sync::Mutex::new(writer));

    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count.max(1) {
        workers.push(tokio::spawn(writer_worker(
            Arc::clone(&ctx.link.queues),
            Arc::clone(&writer),
            cancel.clone(),
            DRAIN_GRACE,
        )));
    }
    let keepalive = tokio::spawn(keepalive_pump(Arc::clone(&ctx.link)));

    let result = read_pump(&ctx, reader).await;

    cancel.cancel();
    for worker in workers {
        let _ = worker.await;
    }
    keepalive.abort();
    let _ = keepalive.await;

    result
}

/// Reads frames until the connection ends and dispatches them.
async fn read_pump<R: AsyncRead + Unpin>(
    ctx: &ConnectionContext,
    mut reader: R,
) -> Result<(), SessionError> {
    let cancel = ctx.link.cancel_token();

    loop {
        let (flags, payload) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = read_frame(&mut reader) => read?,
        };

        match ctx.link.decode(flags, payload)? {
            FramePayload::Message(bytes) => {
                let text = String::from_utf8(bytes).map_err(|e| {
                    SessionError::from(ferryline_wire::WireError::Protocol(format!(
                        "message frame is not UTF-8: {e}"
                    )))
                })?;
                dispatch_message(ctx, ValueContainer::parse(&text)?);
            }
            FramePayload::File(frame) => {
                files::handle_file_frame(ctx, frame).await;
            }
        }
    }
}

fn dispatch_message(ctx: &ConnectionContext, container: ValueContainer) {
    match container.message_type() {
        constants::KEEP_ALIVE => {
            let peer = ctx.link.peer();
            let ack = ValueContainer::addressed(
                peer.id,
                peer.sub_id,
                constants::KEEP_ALIVE_ACK,
                Vec::new(),
            );
            if let Err(e) = ctx.link.send_container(ack, Priority::High) {
                trace!("keepalive ack dropped: {e}");
            }
        }
        constants::KEEP_ALIVE_ACK => {
            trace!(peer = %ctx.link.peer(), "keepalive acknowledged");
        }
        constants::REQUEST_FILES if ctx.link.session_type() == SessionType::FileLine => {
            // File reads must not stall the read pump.
            tokio::spawn(files::stream_files(Arc::clone(&ctx.link), container));
        }
        _ => ctx.callbacks.fire_message(container),
    }
}

/// Periodic keepalive on a confirmed connection.
async fn keepalive_pump(link: Arc<Link>) {
    let cancel = link.cancel_token();
    let mut interval = tokio::time::interval(KEEP_ALIVE_PERIOD);
    interval.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let peer = link.peer();
                let ping = ValueContainer::addressed(
                    peer.id,
                    peer.sub_id,
                    constants::KEEP_ALIVE,
                    Vec::new(),
                );
                if link.send_container(ping, Priority::High).is_err() {
                    break;
                }
            }
        }
    }
}
