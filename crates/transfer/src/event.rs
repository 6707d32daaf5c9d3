//! Progress events and their container form.

use ferryline_protocol::{constants, EndpointId, Value, ValueContainer};

/// Extra fields carried by a terminal progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalInfo {
    pub completed_count: u64,
    pub failed_count: u64,
    /// `true` when every expected file succeeded (the 100% edge); `false`
    /// when the batch ended with files unaccounted as successes.
    pub completed: bool,
}

/// A progress notification addressed to the transfer's originator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub target: EndpointId,
    pub indication_id: String,
    pub percentage: u16,
    pub terminal: Option<TerminalInfo>,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// Builds the `transfer_condition` container for this event.
    pub fn into_container(self) -> ValueContainer {
        let mut container = ValueContainer::addressed(
            self.target.id,
            self.target.sub_id,
            constants::TRANSFER_CONDITION,
            Vec::new(),
        );
        container
            .add(constants::INDICATION_ID, Value::String(self.indication_id))
            .add(constants::PERCENTAGE, Value::U16(self.percentage));

        if let Some(terminal) = self.terminal {
            container
                .add(
                    constants::COMPLETED_COUNT,
                    Value::U64(terminal.completed_count),
                )
                .add(constants::FAILED_COUNT, Value::U64(terminal.failed_count))
                .add(constants::COMPLETED, Value::Bool(terminal.completed));
        }

        container
    }
}
