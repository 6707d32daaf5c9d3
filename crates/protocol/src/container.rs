//! The value container: routing header plus ordered typed body.

use serde::{Deserialize, Serialize};

use crate::value::{NamedValue, Value};

/// Routing header of a container.
///
/// IDs may be empty (a server fills the source in from the session peer);
/// `message_type` must never be empty on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub source_id: String,
    pub source_sub_id: String,
    pub target_id: String,
    pub target_sub_id: String,
    pub message_type: String,
}

/// Errors from container parsing.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("container has an empty message_type")]
    EmptyMessageType,
}

/// A typed message: header plus an ordered list of named values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueContainer {
    pub header: Header,
    pub values: Vec<NamedValue>,
}

impl ValueContainer {
    /// Creates an unaddressed container with the given message type.
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            header: Header {
                message_type: message_type.into(),
                ..Header::default()
            },
            values: Vec::new(),
        }
    }

    /// Creates a container addressed to a target, with an initial body.
    pub fn addressed(
        target_id: impl Into<String>,
        target_sub_id: impl Into<String>,
        message_type: impl Into<String>,
        values: Vec<NamedValue>,
    ) -> Self {
        Self {
            header: Header {
                target_id: target_id.into(),
                target_sub_id: target_sub_id.into(),
                message_type: message_type.into(),
                ..Header::default()
            },
            values,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.header.source_id
    }

    pub fn source_sub_id(&self) -> &str {
        &self.header.source_sub_id
    }

    pub fn target_id(&self) -> &str {
        &self.header.target_id
    }

    pub fn target_sub_id(&self) -> &str {
        &self.header.target_sub_id
    }

    pub fn message_type(&self) -> &str {
        &self.header.message_type
    }

    pub fn set_source(&mut self, id: impl Into<String>, sub_id: impl Into<String>) {
        self.header.source_id = id.into();
        self.header.source_sub_id = sub_id.into();
    }

    pub fn set_target(&mut self, id: impl Into<String>, sub_id: impl Into<String>) {
        self.header.target_id = id.into();
        self.header.target_sub_id = sub_id.into();
    }

    pub fn set_message_type(&mut self, message_type: impl Into<String>) {
        self.header.message_type = message_type.into();
    }

    /// Appends a named value; chainable.
    pub fn add(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.values.push(NamedValue::new(name, value));
        self
    }

    /// Builder-style `add` for constructing containers in one expression.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.push(NamedValue::new(name, value));
        self
    }

    /// First body value with the given name.
    pub fn get_value(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| &entry.value)
    }

    /// All body values with the given name, in insertion order.
    pub fn value_array(&self, name: &str) -> Vec<&Value> {
        self.values
            .iter()
            .filter(|entry| entry.name == name)
            .map(|entry| &entry.value)
            .collect()
    }

    /// Duplicates the container, optionally dropping the body.
    pub fn copy(&self, include_body: bool) -> Self {
        Self {
            header: self.header.clone(),
            values: if include_body {
                self.values.clone()
            } else {
                Vec::new()
            },
        }
    }

    /// Exchanges the source and target pairs. Applying it twice is identity.
    pub fn swap_header(&mut self) {
        std::mem::swap(&mut self.header.source_id, &mut self.header.target_id);
        std::mem::swap(
            &mut self.header.source_sub_id,
            &mut self.header.target_sub_id,
        );
    }

    /// Serializes to the self-describing JSON wire form.
    pub fn serialize(&self) -> Result<String, ContainerError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses the wire form; rejects containers without a message type.
    pub fn parse(text: &str) -> Result<Self, ContainerError> {
        let container: Self = serde_json::from_str(text)?;
        if container.header.message_type.is_empty() {
            return Err(ContainerError::EmptyMessageType);
        }
        Ok(container)
    }
}
