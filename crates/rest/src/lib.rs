//! HTTP adaptor for the pipeline.
//!
//! `POST /restapi` turns a JSON transfer request into an internal message
//! container and hands it to the data line; `GET /restapi` serves buffered
//! progress notifications to polling clients, keyed by indication id.

mod buffer;
mod server;

pub use buffer::{ProgressBuffer, ProgressMessage};
pub use server::{routes, MessageDispatch, RestApi};

/// Errors turned into HTTP statuses by the adaptor.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("malformed JSON body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),
}
