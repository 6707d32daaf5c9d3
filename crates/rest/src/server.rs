//! The `/restapi` HTTP surface.

use std::sync::Arc;

use warp::http::{Response, StatusCode};
use warp::hyper::body::Bytes;
use warp::Filter;

use ferryline_protocol::{constants, NamedValue, Value, ValueContainer};
use tracing::{debug, warn};

use crate::buffer::ProgressBuffer;
use crate::RestError;

/// Hands internal messages to the data line.
///
/// Returns `false` when the line could not take the message; the request is
/// still answered 200 and the poller simply sees no progress.
pub trait MessageDispatch: Send + Sync + 'static {
    fn dispatch(&self, container: ValueContainer) -> bool;
}

impl<F> MessageDispatch for F
where
    F: Fn(ValueContainer) -> bool + Send + Sync + 'static,
{
    fn dispatch(&self, container: ValueContainer) -> bool {
        self(container)
    }
}

/// State behind the `/restapi` routes.
pub struct RestApi {
    dispatch: Box<dyn MessageDispatch>,
    buffer: Arc<ProgressBuffer>,
}

impl RestApi {
    pub fn new(dispatch: impl MessageDispatch, buffer: Arc<ProgressBuffer>) -> Arc<Self> {
        Arc::new(Self {
            dispatch: Box::new(dispatch),
            buffer,
        })
    }

    pub fn buffer(&self) -> Arc<ProgressBuffer> {
        Arc::clone(&self.buffer)
    }

    fn handle_post(&self, body: &[u8]) -> Response<String> {
        if body.is_empty() {
            return status_only(StatusCode::NO_CONTENT);
        }

        let json: serde_json::Value = match serde_json::from_slice(body) {
            Ok(json) => json,
            Err(e) => {
                debug!("rejecting malformed POST body: {e}");
                return status_only(StatusCode::BAD_REQUEST);
            }
        };

        let Some(message_type) = json.get("message_type").and_then(|v| v.as_str()) else {
            return status_only(StatusCode::BAD_REQUEST);
        };

        match message_type {
            constants::UPLOAD_FILES | constants::DOWNLOAD_FILES => {
                let container = match transfer_request(&json) {
                    Ok(container) => container,
                    Err(e) => {
                        debug!("rejecting transfer request: {e}");
                        return status_only(StatusCode::BAD_REQUEST);
                    }
                };

                // Known ids answer 204 instead of 406 while the first
                // notification is still in flight.
                if let Some(indication_id) = container
                    .get_value(constants::INDICATION_ID)
                    .and_then(Value::as_str)
                {
                    self.buffer.announce(indication_id);
                }

                if !self.dispatch.dispatch(container) {
                    warn!("data line did not take the request");
                }
                status_only(StatusCode::OK)
            }
            other => {
                debug!(message_type = other, "unregistered message type");
                status_only(StatusCode::NOT_IMPLEMENTED)
            }
        }
    }

    fn handle_get(
        &self,
        indication_id: Option<String>,
        previous_message: Option<String>,
    ) -> Response<String> {
        let Some(indication_id) = indication_id else {
            return status_only(StatusCode::NOT_ACCEPTABLE);
        };

        let clear = previous_message.as_deref() == Some("clear");
        match self.buffer.fetch(&indication_id, clear) {
            None => status_only(StatusCode::NOT_ACCEPTABLE),
            Some(messages) if messages.is_empty() => status_only(StatusCode::NO_CONTENT),
            Some(messages) => {
                let body = serde_json::json!({ "messages": messages });
                Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "application/json")
                    .body(body.to_string())
                    .unwrap_or_else(|_| status_only(StatusCode::INTERNAL_SERVER_ERROR))
            }
        }
    }
}

fn status_only(status: StatusCode) -> Response<String> {
    let mut response = Response::new(String::new());
    *response.status_mut() = status;
    response
}

/// Builds the internal message for an `upload_files`/`download_files` POST.
fn transfer_request(json: &serde_json::Value) -> Result<ValueContainer, RestError> {
    let message_type = json
        .get("message_type")
        .and_then(|v| v.as_str())
        .ok_or(RestError::MissingField("message_type"))?;
    let indication_id = json
        .get("indication_id")
        .and_then(|v| v.as_str())
        .ok_or(RestError::MissingField("indication_id"))?;
    let files = json
        .get("files")
        .and_then(|v| v.as_array())
        .ok_or(RestError::MissingField("files"))?;

    let mut container = ValueContainer::addressed("main_server", "", message_type, Vec::new())
        .with(
            constants::INDICATION_ID,
            Value::String(indication_id.to_string()),
        );

    for file in files {
        let source = file
            .get("source")
            .and_then(|v| v.as_str())
            .ok_or(RestError::MissingField("source"))?;
        let target = file
            .get("target")
            .and_then(|v| v.as_str())
            .ok_or(RestError::MissingField("target"))?;

        container.add(
            constants::FILE,
            Value::Container(vec![
                NamedValue::new(constants::SOURCE, Value::String(source.to_string())),
                NamedValue::new(constants::TARGET, Value::String(target.to_string())),
            ]),
        );
    }

    Ok(container)
}

/// The `/restapi` filter: POST submits transfers, GET polls progress.
pub fn routes(
    api: Arc<RestApi>,
) -> impl Filter<Extract = (Response<String>,), Error = warp::Rejection> + Clone {
    let post = {
        let api = Arc::clone(&api);
        warp::path("restapi")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::bytes())
            .map(move |body: Bytes| api.handle_post(&body))
    };

    let get = {
        let api = Arc::clone(&api);
        warp::path("restapi")
            .and(warp::path::end())
            .and(warp::get())
            .and(warp::header::optional::<String>("indication_id"))
            .and(warp::header::optional::<String>("previous_message"))
            .map(move |indication_id, previous_message| {
                api.handle_get(indication_id, previous_message)
            })
    };

    post.or(get).unify()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Captured {
        containers: Arc<Mutex<Vec<ValueContainer>>>,
    }

    fn api_with_capture() -> (Arc<RestApi>, Arc<Mutex<Vec<ValueContainer>>>) {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let capture = Captured {
            containers: Arc::clone(&captured),
        };
        let api = RestApi::new(
            move |container| {
                capture.containers.lock().unwrap().push(container);
                true
            },
            Arc::new(ProgressBuffer::new()),
        );
        (api, captured)
    }

    #[tokio::test]
    async fn post_download_builds_and_dispatches_the_container() {
        let (api, captured) = api_with_capture();
        let filter = routes(Arc::clone(&api));

        let body = serde_json::json!({
            "message_type": "download_files",
            "indication_id": "d1",
            "files": [
                {"source": "/s/a", "target": "/t/a"},
                {"source": "/s/b", "target": "/t/b"},
            ],
        });

        let response = warp::test::request()
            .method("POST")
            .path("/restapi")
            .body(body.to_string())
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let sent = captured.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let container = &sent[0];
        assert_eq!(container.target_id(), "main_server");
        assert_eq!(container.target_sub_id(), "");
        assert_eq!(container.message_type(), "download_files");
        assert_eq!(
            container
                .get_value(constants::INDICATION_ID)
                .and_then(Value::as_str),
            Some("d1")
        );

        let files = container.value_array(constants::FILE);
        assert_eq!(files.len(), 2);
        assert_eq!(
            files[1].get(constants::TARGET).and_then(Value::as_str),
            Some("/t/b")
        );
    }

    #[tokio::test]
    async fn post_unknown_type_is_501() {
        let (api, captured) = api_with_capture();
        let filter = routes(api);

        let response = warp::test::request()
            .method("POST")
            .path("/restapi")
            .body(r#"{"message_type":"reboot_everything"}"#)
            .reply(&filter)
            .await;

        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
        assert!(captured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn post_empty_body_is_204_and_garbage_is_400() {
        let (api, _) = api_with_capture();
        let filter = routes(api);

        let empty = warp::test::request()
            .method("POST")
            .path("/restapi")
            .reply(&filter)
            .await;
        assert_eq!(empty.status(), StatusCode::NO_CONTENT);

        let garbage = warp::test::request()
            .method("POST")
            .path("/restapi")
            .body("{not json")
            .reply(&filter)
            .await;
        assert_eq!(garbage.status(), StatusCode::BAD_REQUEST);

        let incomplete = warp::test::request()
            .method("POST")
            .path("/restapi")
            .body(r#"{"message_type":"download_files","indication_id":"x"}"#)
            .reply(&filter)
            .await;
        assert_eq!(incomplete.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_without_indication_header_is_406() {
        let (api, _) = api_with_capture();
        let filter = routes(api);

        let response = warp::test::request()
            .method("GET")
            .path("/restapi")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn polling_flow_clears_and_then_204s() {
        let (api, _) = api_with_capture();
        let filter = routes(Arc::clone(&api));

        // Submit a download; the id becomes pollable immediately.
        let body = serde_json::json!({
            "message_type": "download_files",
            "indication_id": "d1",
            "files": [{"source": "/s/a", "target": "/t/a"}],
        });
        let posted = warp::test::request()
            .method("POST")
            .path("/restapi")
            .body(body.to_string())
            .reply(&filter)
            .await;
        assert_eq!(posted.status(), StatusCode::OK);

        // The initial 0% arrives on the internal channel.
        let initial = ValueContainer::addressed(
            "data_line",
            "1",
            constants::TRANSFER_CONDITION,
            Vec::new(),
        )
        .with(constants::INDICATION_ID, Value::String("d1".into()))
        .with(constants::PERCENTAGE, Value::U16(0));
        api.buffer().record(&initial);

        let response = warp::test::request()
            .method("GET")
            .path("/restapi")
            .header("indication_id", "d1")
            .header("previous_message", "clear")
            .reply(&filter)
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["percentage"], 0);
        assert_eq!(messages[0]["completed"], false);
        assert_eq!(messages[0]["indication_id"], "d1");

        // Drained: an immediate second poll has nothing.
        let again = warp::test::request()
            .method("GET")
            .path("/restapi")
            .header("indication_id", "d1")
            .reply(&filter)
            .await;
        assert_eq!(again.status(), StatusCode::NO_CONTENT);

        // Never-seen ids are still refused.
        let unknown = warp::test::request()
            .method("GET")
            .path("/restapi")
            .header("indication_id", "ghost")
            .reply(&filter)
            .await;
        assert_eq!(unknown.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn get_without_clear_keeps_the_buffer() {
        let (api, _) = api_with_capture();
        let filter = routes(Arc::clone(&api));

        api.buffer().announce("keep");
        let event = ValueContainer::addressed(
            "data_line",
            "1",
            constants::TRANSFER_CONDITION,
            Vec::new(),
        )
        .with(constants::INDICATION_ID, Value::String("keep".into()))
        .with(constants::PERCENTAGE, Value::U16(40));
        api.buffer().record(&event);

        for _ in 0..2 {
            let response = warp::test::request()
                .method("GET")
                .path("/restapi")
                .header("indication_id", "keep")
                .reply(&filter)
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            let json: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
            assert_eq!(json["messages"].as_array().unwrap().len(), 1);
        }
    }
}
