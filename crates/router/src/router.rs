//! Dispatch and bridging logic.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use ferryline_protocol::{constants, EndpointId, Value, ValueContainer};
use ferryline_session::{MessagingClient, MessagingServer, Priority};
use ferryline_transfer::TransferTracker;

const UPSTREAM_DOWN: &str = "main_server has not been connected.";
const EMPTY_FILES: &str = "cannot transfer with empty file information.";
const EMPTY_TARGETS: &str = "cannot transfer with empty target file information.";
const MISSING_INDICATION: &str = "cannot transfer without an indication_id.";

type Handler = fn(&Router, ValueContainer);

/// The middle tier's switching fabric.
pub struct Router {
    downstream: Arc<MessagingServer>,
    data_line: Arc<MessagingClient>,
    file_line: Arc<MessagingClient>,
    tracker: Arc<TransferTracker>,
    /// Built once in `new`, read from every session fiber afterwards.
    handlers: HashMap<&'static str, Handler>,
}

impl Router {
    pub fn new(
        downstream: Arc<MessagingServer>,
        data_line: Arc<MessagingClient>,
        file_line: Arc<MessagingClient>,
        tracker: Arc<TransferTracker>,
    ) -> Arc<Self> {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        handlers.insert(constants::DOWNLOAD_FILES, Router::download_files);
        handlers.insert(constants::UPLOAD_FILES, Router::upload_files);

        Arc::new(Self {
            downstream,
            data_line,
            file_line,
            tracker,
            handlers,
        })
    }

    /// Hooks the router into its three lines. Call once, before traffic.
    pub fn install(self: &Arc<Self>) {
        let router = Arc::clone(self);
        self.downstream
            .set_message_notification(Box::new(move |container| {
                router.handle_downstream(container);
            }));

        let router = Arc::clone(self);
        self.file_line
            .set_message_notification(Box::new(move |container| {
                router.handle_file_line_message(container);
            }));

        let router = Arc::clone(self);
        self.file_line
            .set_file_notification(Box::new(move |_, _, indication_id, target_path| {
                router.handle_file_arrival(indication_id, target_path);
            }));

        let router = Arc::clone(self);
        self.data_line
            .set_message_notification(Box::new(move |container| {
                router.forward_downstream(container);
            }));
    }

    /// Entry point for everything a downstream client sends.
    pub fn handle_downstream(&self, container: ValueContainer) {
        match self.handlers.get(container.message_type()) {
            Some(handler) => handler(self, container),
            None => self.forward_data_line(container),
        }
    }

    fn download_files(&self, container: ValueContainer) {
        if !self.file_line.is_confirmed() {
            self.error_response(&container, UPSTREAM_DOWN);
            return;
        }

        let files = container.value_array(constants::FILE);
        if files.is_empty() {
            self.error_response(&container, EMPTY_FILES);
            return;
        }

        let targets: Vec<String> = files
            .iter()
            .filter_map(|file| file.get(constants::TARGET).and_then(Value::as_str))
            .filter(|target| !target.is_empty())
            .map(str::to_string)
            .collect();
        if targets.is_empty() {
            self.error_response(&container, EMPTY_TARGETS);
            return;
        }

        let Some(indication_id) = container
            .get_value(constants::INDICATION_ID)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
        else {
            self.error_response(&container, MISSING_INDICATION);
            return;
        };

        let originator = EndpointId::new(container.source_id(), container.source_sub_id());
        if !self
            .tracker
            .register(&indication_id, originator.clone(), targets)
        {
            warn!(%indication_id, "duplicate download request dropped");
            return;
        }

        info!(%indication_id, originator = %originator, "download prepared");

        // Initial progress so pollers see the transfer exists.
        let starting = ValueContainer::addressed(
            originator.id,
            originator.sub_id,
            constants::TRANSFER_CONDITION,
            Vec::new(),
        )
        .with(constants::INDICATION_ID, Value::String(indication_id))
        .with(constants::PERCENTAGE, Value::U16(0));
        let _ = self.downstream.send(starting);

        let mut request = container.copy(true);
        request.set_message_type(constants::REQUEST_FILES);
        if let Err(e) = self.file_line.send(request) {
            warn!("forwarding request_files failed: {e}");
        }
    }

    fn upload_files(&self, mut container: ValueContainer) {
        if !self.file_line.is_confirmed() {
            self.error_response(&container, UPSTREAM_DOWN);
            return;
        }

        // Stash the true originator in the body, then hand the header over
        // to the file line so acknowledgements route back through us.
        let source = container.source_id().to_string();
        let source_sub = container.source_sub_id().to_string();
        container
            .add(constants::GATEWAY_SOURCE_ID, Value::String(source))
            .add(
                constants::GATEWAY_SOURCE_SUB_ID,
                Value::String(source_sub),
            );
        container.set_source(self.file_line.source_id(), self.file_line.source_sub_id());

        if let Err(e) = self.file_line.send(container) {
            warn!("forwarding upload_files failed: {e}");
        }
    }

    fn forward_data_line(&self, container: ValueContainer) {
        if !self.data_line.is_confirmed() {
            self.error_response(&container, UPSTREAM_DOWN);
            return;
        }
        debug!(
            message_type = container.message_type(),
            "forwarding on data line"
        );
        if let Err(e) = self.data_line.send(container) {
            warn!("data line forward failed: {e}");
        }
    }

    /// Messages arriving from the upstream file line.
    fn handle_file_line_message(&self, container: ValueContainer) {
        if container.message_type() == constants::UPLOADED_FILE {
            let indication_id = container
                .get_value(constants::INDICATION_ID)
                .and_then(Value::as_str)
                .unwrap_or_default();
            let target_path = container
                .get_value(constants::TARGET_PATH)
                .and_then(Value::as_str)
                .unwrap_or_default();
            if let Some(event) = self.tracker.record(indication_id, target_path) {
                let _ = self.downstream.send(event.into_container());
            }
            return;
        }

        self.forward_downstream(container);
    }

    /// File frames stored by the upstream file line.
    fn handle_file_arrival(&self, indication_id: &str, target_path: &str) {
        if let Some(event) = self.tracker.record(indication_id, target_path) {
            let _ = self.downstream.send(event.into_container());
        }
    }

    /// Upstream messages pass through to whoever they target.
    fn forward_downstream(&self, container: ValueContainer) {
        let _ = self.downstream.send(container);
    }

    /// Synthesizes the standard error reply back to the requester.
    fn error_response(&self, request: &ValueContainer, reason: &str) {
        warn!(
            message_type = request.message_type(),
            source = request.source_id(),
            reason,
            "rejecting downstream request"
        );

        let mut response = request.copy(false);
        response.swap_header();
        response
            .add(constants::ERROR, Value::Bool(true))
            .add(constants::REASON, Value::String(reason.to_string()));
        let _ = self
            .downstream
            .send_with_priority(response, Priority::High);
    }
}
