//! Per-indication progress buffering for polling clients.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ferryline_protocol::{constants, Value, ValueContainer};

/// The JSON object a polling client sees per progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub message_type: String,
    pub indication_id: String,
    pub percentage: u16,
    pub completed: bool,
}

/// Ordered progress notifications per indication id.
#[derive(Default)]
pub struct ProgressBuffer {
    messages: Mutex<HashMap<String, Vec<ProgressMessage>>>,
}

impl ProgressBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes an id known to pollers before any notification arrived.
    pub fn announce(&self, indication_id: &str) {
        self.messages
            .lock()
            .unwrap()
            .entry(indication_id.to_string())
            .or_default();
    }

    /// Captures a `transfer_condition` container; anything else is ignored.
    pub fn record(&self, container: &ValueContainer) {
        if container.message_type() != constants::TRANSFER_CONDITION {
            return;
        }
        let Some(indication_id) = container
            .get_value(constants::INDICATION_ID)
            .and_then(Value::as_str)
        else {
            return;
        };

        let message = ProgressMessage {
            message_type: container.message_type().to_string(),
            indication_id: indication_id.to_string(),
            percentage: container
                .get_value(constants::PERCENTAGE)
                .and_then(Value::as_u16)
                .unwrap_or(0),
            completed: container
                .get_value(constants::COMPLETED)
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };

        debug!(
            indication_id,
            percentage = message.percentage,
            completed = message.completed,
            "progress buffered"
        );
        self.messages
            .lock()
            .unwrap()
            .entry(indication_id.to_string())
            .or_default()
            .push(message);
    }

    /// Returns the buffered messages for an id, draining them when `clear`
    /// is set. `None` means the id was never seen.
    pub fn fetch(&self, indication_id: &str, clear: bool) -> Option<Vec<ProgressMessage>> {
        let mut messages = self.messages.lock().unwrap();
        let entry = messages.get_mut(indication_id)?;
        if clear {
            Some(std::mem::take(entry))
        } else {
            Some(entry.clone())
        }
    }
}
