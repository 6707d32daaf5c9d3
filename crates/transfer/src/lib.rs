//! Transfer accounting shared by the middle and main tiers.
//!
//! Each batch transfer is identified by a caller-supplied indication id. The
//! [`TransferTracker`] records the declared manifest and the per-file
//! outcomes, and produces a [`ProgressEvent`] exactly when the integer
//! percentage changes or the batch reaches a terminal state.

mod event;
mod tracker;

pub use event::{ProgressEvent, TerminalInfo};
pub use tracker::TransferTracker;

/// Errors surfaced by tracker callers.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("indication id {0:?} is already being transferred")]
    DuplicateIndication(String),
}
