//! Protocol primitives shared by every ferryline tier.
//!
//! The unit of transport for messages is the [`ValueContainer`]: a routing
//! header plus an ordered list of named, typed values. Containers serialize
//! to self-describing JSON so that the exact value kinds survive a
//! round-trip. File bytes travel outside containers, as dedicated wire
//! frames (see the `ferryline-wire` crate).

pub mod constants;
pub mod container;
pub mod value;

pub use container::{ContainerError, Header, ValueContainer};
pub use value::{NamedValue, Value};

use serde::{Deserialize, Serialize};

/// Identity of a session endpoint: program name plus instance discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId {
    pub id: String,
    pub sub_id: String,
}

impl EndpointId {
    pub fn new(id: impl Into<String>, sub_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sub_id: sub_id.into(),
        }
    }
}

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.id, self.sub_id)
    }
}
