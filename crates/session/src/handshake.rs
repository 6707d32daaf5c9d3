//! Handshake containers and their direct (pre-pump) exchange.

use tokio::io::{AsyncRead, AsyncWrite};

use ferryline_protocol::{constants, EndpointId, Value, ValueContainer};
use ferryline_wire::{read_frame, write_frame, FrameCodec, FramePayload};

use crate::error::SessionError;
use crate::types::{SessionConfig, SessionType};

/// Extra confirm field carrying a server-assigned instance id.
const ASSIGNED_SUB_ID: &str = "assigned_sub_id";

/// Parsed `request_connection` advertisement.
pub(crate) struct HandshakeRequest {
    pub peer: EndpointId,
    pub session_type: SessionType,
    pub key_digest: String,
}

/// Parsed `confirm_connection` reply.
pub(crate) struct HandshakeReply {
    pub peer: EndpointId,
    pub accepted: bool,
    pub reason: String,
    pub assigned_sub_id: Option<String>,
}

/// Builds the client's advertisement.
pub(crate) fn request(config: &SessionConfig, session_type: SessionType) -> ValueContainer {
    let mut container = ValueContainer::new(constants::REQUEST_CONNECTION);
    container.set_source(config.source_id.clone(), config.source_sub_id.clone());
    container
        .add(
            constants::SESSION_TYPE,
            Value::String(session_type.as_str().to_string()),
        )
        .add(
            constants::CONNECTION_KEY_DIGEST,
            Value::String(ferryline_wire::key_digest(&config.connection_key)),
        );
    container
}

pub(crate) fn parse_request(container: &ValueContainer) -> Result<HandshakeRequest, SessionError> {
    if container.message_type() != constants::REQUEST_CONNECTION {
        return Err(SessionError::HandshakeRejected(format!(
            "expected {}, got {}",
            constants::REQUEST_CONNECTION,
            container.message_type()
        )));
    }

    let session_type = container
        .get_value(constants::SESSION_TYPE)
        .and_then(Value::as_str)
        .ok_or_else(|| SessionError::HandshakeRejected("missing session_type".into()))?;
    let key_digest = container
        .get_value(constants::CONNECTION_KEY_DIGEST)
        .and_then(Value::as_str)
        .ok_or_else(|| SessionError::HandshakeRejected("missing connection_key_digest".into()))?;

    Ok(HandshakeRequest {
        peer: EndpointId::new(container.source_id(), container.source_sub_id()),
        session_type: SessionType::parse(session_type)?,
        key_digest: key_digest.to_string(),
    })
}

/// Builds the server's acceptance.
pub(crate) fn confirm(
    config: &SessionConfig,
    target: &EndpointId,
    assigned_sub_id: Option<&str>,
) -> ValueContainer {
    let mut container = ValueContainer::addressed(
        target.id.clone(),
        target.sub_id.clone(),
        constants::CONFIRM_CONNECTION,
        Vec::new(),
    );
    container.set_source(config.source_id.clone(), config.source_sub_id.clone());
    container.add(constants::ACCEPTED, Value::Bool(true));
    if let Some(sub_id) = assigned_sub_id {
        container.add(ASSIGNED_SUB_ID, Value::String(sub_id.to_string()));
    }
    container
}

/// Builds the server's rejection.
pub(crate) fn reject(config: &SessionConfig, target: &EndpointId, reason: &str) -> ValueContainer {
    let mut container = ValueContainer::addressed(
        target.id.clone(),
        target.sub_id.clone(),
        constants::CONFIRM_CONNECTION,
        Vec::new(),
    );
    container.set_source(config.source_id.clone(), config.source_sub_id.clone());
    container
        .add(constants::ACCEPTED, Value::Bool(false))
        .add(constants::REASON, Value::String(reason.to_string()));
    container
}

pub(crate) fn parse_confirm(container: &ValueContainer) -> Result<HandshakeReply, SessionError> {
    if container.message_type() != constants::CONFIRM_CONNECTION {
        return Err(SessionError::HandshakeRejected(format!(
            "expected {}, got {}",
            constants::CONFIRM_CONNECTION,
            container.message_type()
        )));
    }

    let accepted = container
        .get_value(constants::ACCEPTED)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let reason = container
        .get_value(constants::REASON)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let assigned_sub_id = container
        .get_value(ASSIGNED_SUB_ID)
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(HandshakeReply {
        peer: EndpointId::new(container.source_id(), container.source_sub_id()),
        accepted,
        reason,
        assigned_sub_id,
    })
}

/// Writes one container directly to the stream (pumps are not running yet).
pub(crate) async fn write_container<W: AsyncWrite + Unpin>(
    codec: &FrameCodec,
    writer: &mut W,
    container: &ValueContainer,
) -> Result<(), SessionError> {
    let text = container.serialize()?;
    let (flags, bytes) = codec.encode(&FramePayload::Message(text.into_bytes()))?;
    write_frame(writer, flags, &bytes).await?;
    Ok(())
}

/// Reads one container directly from the stream.
pub(crate) async fn read_container<R: AsyncRead + Unpin>(
    codec: &FrameCodec,
    reader: &mut R,
) -> Result<ValueContainer, SessionError> {
    let (flags, payload) = read_frame(reader).await?;
    match codec.decode(flags, payload)? {
        FramePayload::Message(bytes) => {
            let text = String::from_utf8(bytes).map_err(|e| {
                SessionError::from(ferryline_wire::WireError::Protocol(format!(
                    "handshake frame is not UTF-8: {e}"
                )))
            })?;
            Ok(ValueContainer::parse(&text)?)
        }
        FramePayload::File(_) => Err(SessionError::HandshakeRejected(
            "file frame during handshake".into(),
        )),
    }
}
