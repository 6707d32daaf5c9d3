//! The tracker state machine.

use std::collections::HashMap;
use std::sync::Mutex;

use ferryline_protocol::EndpointId;
use tracing::debug;

use crate::event::{ProgressEvent, TerminalInfo};

struct Transfer {
    originator: EndpointId,
    expected: Vec<String>,
    succeeded: Vec<String>,
    failed: Vec<String>,
    last_percentage: u16,
}

/// Tracks every live batch transfer on a tier.
///
/// One lock guards the whole map; `record` runs entirely under it so the
/// percentage edge detection is race-free across sessions.
#[derive(Default)]
pub struct TransferTracker {
    transfers: Mutex<HashMap<String, Transfer>>,
}

impl TransferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a manifest. Returns `false` (and changes nothing) when the
    /// indication id is already live or the manifest is empty.
    pub fn register(
        &self,
        indication_id: &str,
        originator: EndpointId,
        targets: Vec<String>,
    ) -> bool {
        if targets.is_empty() {
            return false;
        }

        let mut transfers = self.transfers.lock().unwrap();
        if transfers.contains_key(indication_id) {
            return false;
        }

        debug!(
            indication_id,
            originator = %originator,
            files = targets.len(),
            "transfer registered"
        );
        transfers.insert(
            indication_id.to_string(),
            Transfer {
                originator,
                expected: targets,
                succeeded: Vec::new(),
                failed: Vec::new(),
                last_percentage: 0,
            },
        );
        true
    }

    /// Returns `true` if the indication id is currently live.
    pub fn is_live(&self, indication_id: &str) -> bool {
        self.transfers.lock().unwrap().contains_key(indication_id)
    }

    /// Records a file arrival (or, with an empty path, a failure).
    ///
    /// An event is produced exactly when the integer percentage changes, or
    /// when every expected file is accounted for. Terminal events remove the
    /// entry; later records for the same id return `None`.
    pub fn record(&self, indication_id: &str, file_path: &str) -> Option<ProgressEvent> {
        let mut transfers = self.transfers.lock().unwrap();
        let transfer = transfers.get_mut(indication_id)?;

        if file_path.is_empty() {
            transfer.failed.push(String::new());
        } else {
            transfer.succeeded.push(file_path.to_string());
        }

        let percentage = (transfer.succeeded.len() * 100 / transfer.expected.len()) as u16;
        let accounted = transfer.succeeded.len() + transfer.failed.len();

        if percentage != transfer.last_percentage {
            transfer.last_percentage = percentage;

            if percentage == 100 {
                let transfer = transfers.remove(indication_id)?;
                return Some(terminal_event(indication_id, transfer, percentage, true));
            }

            return Some(ProgressEvent {
                target: transfer.originator.clone(),
                indication_id: indication_id.to_string(),
                percentage,
                terminal: None,
            });
        }

        if accounted == transfer.expected.len() {
            let transfer = transfers.remove(indication_id)?;
            return Some(terminal_event(indication_id, transfer, percentage, false));
        }

        None
    }

    /// Drops a live transfer without emitting an event.
    pub fn cancel(&self, indication_id: &str) -> bool {
        let removed = self.transfers.lock().unwrap().remove(indication_id);
        if removed.is_some() {
            debug!(indication_id, "transfer cancelled");
        }
        removed.is_some()
    }
}

fn terminal_event(
    indication_id: &str,
    transfer: Transfer,
    percentage: u16,
    completed: bool,
) -> ProgressEvent {
    ProgressEvent {
        target: transfer.originator,
        indication_id: indication_id.to_string(),
        percentage,
        terminal: Some(TerminalInfo {
            completed_count: transfer.succeeded.len() as u64,
            failed_count: transfer.failed.len() as u64,
            completed,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn originator() -> EndpointId {
        EndpointId::new("c", "1")
    }

    fn paths(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn full_success_emits_each_percentage_edge_then_terminal() {
        let tracker = TransferTracker::new();
        assert!(tracker.register("A", originator(), paths(&["f1", "f2", "f3", "f4"])));

        let e1 = tracker.record("A", "f1").unwrap();
        assert_eq!((e1.percentage, e1.is_terminal()), (25, false));

        let e2 = tracker.record("A", "f2").unwrap();
        assert_eq!((e2.percentage, e2.is_terminal()), (50, false));

        let e3 = tracker.record("A", "f3").unwrap();
        assert_eq!((e3.percentage, e3.is_terminal()), (75, false));

        let e4 = tracker.record("A", "f4").unwrap();
        assert_eq!(e4.percentage, 100);
        let terminal = e4.terminal.unwrap();
        assert_eq!(terminal.completed_count, 4);
        assert_eq!(terminal.failed_count, 0);
        assert!(terminal.completed);

        // Entry is gone; further records are silent.
        assert!(tracker.record("A", "f5").is_none());
        assert!(!tracker.is_live("A"));
    }

    #[test]
    fn mixed_failure_reaches_completed_terminal() {
        let tracker = TransferTracker::new();
        assert!(tracker.register("B", originator(), paths(&["f1", "f2"])));

        // Failure: percentage stays 0, not every file accounted -> silent.
        assert!(tracker.record("B", "").is_none());

        // 50% edge; all files accounted but percentage changed, so the
        // transfer stays live.
        let e = tracker.record("B", "f1").unwrap();
        assert_eq!((e.percentage, e.is_terminal()), (50, false));
        assert!(tracker.is_live("B"));

        // Success set reaches the expected size: terminal at 100.
        let e = tracker.record("B", "f2").unwrap();
        assert_eq!(e.percentage, 100);
        let terminal = e.terminal.unwrap();
        assert_eq!(terminal.completed_count, 2);
        assert_eq!(terminal.failed_count, 1);
        assert!(terminal.completed);
    }

    #[test]
    fn all_accounted_below_hundred_is_incomplete_terminal() {
        let tracker = TransferTracker::new();
        assert!(tracker.register("C", originator(), paths(&["f1", "f2", "f3"])));

        let e = tracker.record("C", "f1").unwrap();
        assert_eq!(e.percentage, 33);

        assert!(tracker.record("C", "").is_none());

        let e = tracker.record("C", "").unwrap();
        assert_eq!(e.percentage, 33);
        let terminal = e.terminal.unwrap();
        assert_eq!(terminal.completed_count, 1);
        assert_eq!(terminal.failed_count, 2);
        assert!(!terminal.completed);
        assert!(!tracker.is_live("C"));
    }

    #[test]
    fn duplicate_register_is_rejected_without_side_effects() {
        let tracker = TransferTracker::new();
        assert!(tracker.register("D", originator(), paths(&["f1"])));
        assert!(!tracker.register("D", originator(), paths(&["other"])));

        // The original manifest is still in effect: one file to 100%.
        let e = tracker.record("D", "f1").unwrap();
        assert_eq!(e.percentage, 100);
        assert!(e.terminal.unwrap().completed);
    }

    #[test]
    fn empty_manifest_is_rejected() {
        let tracker = TransferTracker::new();
        assert!(!tracker.register("E", originator(), Vec::new()));
        assert!(!tracker.is_live("E"));
    }

    #[test]
    fn record_unknown_id_is_silent() {
        let tracker = TransferTracker::new();
        assert!(tracker.record("nope", "f1").is_none());
    }

    #[test]
    fn percentage_is_monotonic_and_deduplicated() {
        let tracker = TransferTracker::new();
        // 150 files: consecutive records often land on the same integer
        // percentage, which must stay silent.
        let names: Vec<String> = (0..150).map(|i| format!("f{i}")).collect();
        assert!(tracker.register("F", originator(), names.clone()));

        let mut last = 0u16;
        let mut emitted = Vec::new();
        for name in &names {
            if let Some(event) = tracker.record("F", name) {
                assert!(event.percentage > last, "must strictly increase");
                last = event.percentage;
                emitted.push(event.percentage);
            }
        }

        assert_eq!(*emitted.last().unwrap(), 100);
        let mut deduped = emitted.clone();
        deduped.dedup();
        assert_eq!(deduped, emitted, "no duplicate percentage events");
    }

    #[test]
    fn cancel_drops_state_silently() {
        let tracker = TransferTracker::new();
        assert!(tracker.register("G", originator(), paths(&["f1", "f2"])));
        assert!(tracker.cancel("G"));
        assert!(!tracker.cancel("G"));
        assert!(tracker.record("G", "f1").is_none());
    }

    #[test]
    fn events_are_addressed_to_the_originator() {
        let tracker = TransferTracker::new();
        let who = EndpointId::new("restapi_gateway", "42");
        assert!(tracker.register("H", who.clone(), paths(&["f1"])));

        let event = tracker.record("H", "f1").unwrap();
        assert_eq!(event.target, who);
        assert_eq!(event.indication_id, "H");
    }

    #[test]
    fn tracker_is_safe_across_threads() {
        use std::sync::Arc;

        let tracker = Arc::new(TransferTracker::new());
        let names: Vec<String> = (0..100).map(|i| format!("f{i}")).collect();
        assert!(tracker.register("T", originator(), names.clone()));

        let mut handles = Vec::new();
        for chunk in names.chunks(25) {
            let tracker = Arc::clone(&tracker);
            let chunk: Vec<String> = chunk.to_vec();
            handles.push(std::thread::spawn(move || {
                let mut terminals = 0;
                for name in chunk {
                    if let Some(event) = tracker.record("T", &name) {
                        if event.is_terminal() {
                            terminals += 1;
                        }
                    }
                }
                terminals
            }));
        }

        let terminals: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(terminals, 1, "terminal event fires exactly once");
        assert!(!tracker.is_live("T"));
    }
}
