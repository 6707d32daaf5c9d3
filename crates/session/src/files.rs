//! File-line helpers: storing incoming frames and streaming manifests.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use ferryline_protocol::{constants, Value, ValueContainer};
use ferryline_wire::FileFrame;

use crate::connection::{ConnectionContext, Link};
use crate::error::SessionError;
use crate::types::Priority;

/// Handles one incoming file frame: stores it, notifies the file callback,
/// and acknowledges to the sender with `uploaded_file`.
pub(crate) async fn handle_file_frame(ctx: &ConnectionContext, frame: FileFrame) {
    let peer = ctx.link.peer();

    // An empty target path is a failure report from the sender.
    if frame.target_path.is_empty() {
        debug!(
            peer = %peer,
            indication_id = %frame.indication_id,
            "peer reported a failed file"
        );
        ctx.callbacks
            .fire_file(&peer.id, &peer.sub_id, &frame.indication_id, "");
        return;
    }

    // A failure is reported (locally and to the sender) as an empty path.
    let reported_path = match store_file(ctx.save_root.as_deref(), &frame).await {
        Ok(path) => {
            debug!(
                peer = %peer,
                indication_id = %frame.indication_id,
                path = %path.display(),
                bytes = frame.data.len(),
                "file stored"
            );
            frame.target_path.clone()
        }
        Err(e) => {
            warn!(
                peer = %peer,
                indication_id = %frame.indication_id,
                path = %frame.target_path,
                "failed to store file: {e}"
            );
            String::new()
        }
    };

    ctx.callbacks
        .fire_file(&peer.id, &peer.sub_id, &frame.indication_id, &reported_path);

    let ack = ValueContainer::addressed(
        peer.id,
        peer.sub_id,
        constants::UPLOADED_FILE,
        Vec::new(),
    )
    .with(
        constants::INDICATION_ID,
        Value::String(frame.indication_id),
    )
    .with(constants::TARGET_PATH, Value::String(reported_path));

    if let Err(e) = ctx.link.send_container(ack, Priority::Low) {
        debug!("uploaded_file ack dropped: {e}");
    }
}

/// Streams every file of a `request_files` manifest to the peer.
///
/// Unreadable sources become failure frames so the remote tracker still
/// accounts for them.
pub(crate) async fn stream_files(link: Arc<Link>, manifest: ValueContainer) {
    let indication_id = manifest
        .get_value(constants::INDICATION_ID)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    for file in manifest.value_array(constants::FILE) {
        let source = file.get(constants::SOURCE).and_then(Value::as_str);
        let target = file.get(constants::TARGET).and_then(Value::as_str);

        let frame = match (source, target) {
            (Some(source), Some(target)) if !target.is_empty() => {
                match tokio::fs::read(source).await {
                    Ok(data) => FileFrame {
                        indication_id: indication_id.clone(),
                        target_path: target.to_string(),
                        data,
                    },
                    Err(e) => {
                        warn!(source, "cannot read requested file: {e}");
                        FileFrame::failure(indication_id.clone())
                    }
                }
            }
            _ => {
                warn!("manifest entry without source or target");
                FileFrame::failure(indication_id.clone())
            }
        };

        if let Err(e) = link.send_file(frame, Priority::Low) {
            warn!("file stream aborted: {e}");
            return;
        }
    }
}

/// Resolves and writes one file frame to disk.
async fn store_file(save_root: Option<&Path>, frame: &FileFrame) -> Result<PathBuf, SessionError> {
    let path = resolve_target(save_root, &frame.target_path)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(&path, &frame.data).await?;
    Ok(path)
}

/// Validates a target path and anchors relative ones under the save root.
fn resolve_target(save_root: Option<&Path>, target: &str) -> Result<PathBuf, SessionError> {
    let path = Path::new(target);
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(SessionError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            format!("parent traversal not allowed: {target}"),
        )));
    }

    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    match save_root {
        Some(root) => Ok(root.join(path)),
        None => Ok(path.to_path_buf()),
    }
}
