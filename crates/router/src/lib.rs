//! Middle-tier routing between downstream clients and the storage node.
//!
//! The router owns the downstream server plus the two upstream client lines
//! (`data_line` for messages, `file_line` for files) and a transfer tracker.
//! Downstream requests are dispatched by message type; upstream arrivals
//! feed the tracker and flow back to the originating client.

mod router;

pub use router::Router;
