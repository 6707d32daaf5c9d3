//! Storage node: accepts message and file lines, stores uploaded files,
//! streams requested ones, and reports upload progress back through the
//! gateway that bridged the request.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use ferryline_protocol::{constants, EndpointId, Value, ValueContainer};
use ferryline_session::{MessagingServer, SessionType, WorkerCounts};
use ferryline_transfer::TransferTracker;

#[derive(Parser)]
#[command(name = "main-server", about = "ferryline storage node")]
struct Args {
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    encrypt_mode: bool,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    compress_mode: bool,

    #[arg(long, default_value_t = 1024)]
    compress_block_size: usize,

    #[arg(long, default_value = "main_connection_key")]
    connection_key: String,

    #[arg(long, default_value_t = 9753)]
    main_server_port: u16,

    #[arg(long, default_value_t = 4)]
    high_priority_count: u16,

    #[arg(long, default_value_t = 4)]
    normal_priority_count: u16,

    #[arg(long, default_value_t = 4)]
    low_priority_count: u16,

    /// Maximum concurrent sessions; 0 means unlimited.
    #[arg(long, default_value_t = 0)]
    session_limit_count: usize,

    /// Root for stored files; relative manifest targets land here.
    #[arg(long)]
    target_folder: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    logging_level: String,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    write_console: bool,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    write_console_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    ferryline_logging::init(
        "main_server",
        &args.logging_level,
        args.write_console,
        args.write_console_only,
    )?;

    let tracker = Arc::new(TransferTracker::new());
    let server = Arc::new(MessagingServer::new("main_server"));
    server.set_connection_key(&args.connection_key);
    server.set_encrypt_mode(args.encrypt_mode);
    server.set_compress_mode(args.compress_mode);
    server.set_compress_block_size(args.compress_block_size);
    server.set_session_limit_count(args.session_limit_count);
    server.set_possible_session_types([SessionType::MessageLine, SessionType::FileLine]);
    if let Some(folder) = &args.target_folder {
        server.set_save_root(folder.clone());
    }

    server.set_connection_notification(Box::new(|target_id, target_sub_id, condition| {
        info!(
            "a client on main server: {target_id}[{target_sub_id}] is {}",
            if condition { "connected" } else { "disconnected" }
        );
    }));

    {
        let inner = Arc::clone(&server);
        let tracker = Arc::clone(&tracker);
        server.set_message_notification(Box::new(move |container| {
            match container.message_type() {
                constants::UPLOAD_FILES => upload_files(&inner, &tracker, container),
                "transfer_file" => transfer_file(&inner, container),
                other => info!(message_type = other, "unhandled message"),
            }
        }));
    }

    {
        let server2 = Arc::clone(&server);
        let tracker = Arc::clone(&tracker);
        server.set_file_notification(Box::new(move |_, _, indication_id, target_path| {
            if let Some(event) = tracker.record(indication_id, target_path) {
                let _ = server2.send_to_type(event.into_container(), SessionType::FileLine);
            }
        }));
    }

    server
        .listen(
            args.main_server_port,
            WorkerCounts::new(
                args.high_priority_count,
                args.normal_priority_count,
                args.low_priority_count,
            ),
        )
        .await?;

    server.wait_stop().await;
    Ok(())
}

/// Registers an upload manifest and asks the bridged uploader to stream.
fn upload_files(server: &MessagingServer, tracker: &TransferTracker, container: ValueContainer) {
    let targets: Vec<String> = container
        .value_array(constants::FILE)
        .iter()
        .filter_map(|file| file.get(constants::TARGET).and_then(Value::as_str))
        .filter(|target| !target.is_empty())
        .map(str::to_string)
        .collect();

    let indication_id = container
        .get_value(constants::INDICATION_ID)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let gateway = EndpointId::new(
        container
            .get_value(constants::GATEWAY_SOURCE_ID)
            .and_then(Value::as_str)
            .unwrap_or_default(),
        container
            .get_value(constants::GATEWAY_SOURCE_SUB_ID)
            .and_then(Value::as_str)
            .unwrap_or_default(),
    );

    if indication_id.is_empty() || targets.is_empty() {
        warn!("upload request without indication id or targets dropped");
        return;
    }

    if !tracker.register(&indication_id, gateway.clone(), targets) {
        warn!(%indication_id, "duplicate upload registration dropped");
        return;
    }
    info!(%indication_id, gateway = %gateway, "upload prepared");

    let starting = ValueContainer::addressed(
        gateway.id,
        gateway.sub_id,
        constants::TRANSFER_CONDITION,
        Vec::new(),
    )
    .with(
        constants::INDICATION_ID,
        Value::String(indication_id),
    )
    .with(constants::PERCENTAGE, Value::U16(0));
    let _ = server.send_to_type(starting, SessionType::FileLine);

    let mut request = container.copy(true);
    request.swap_header();
    request.set_message_type(constants::REQUEST_FILES);
    let _ = server.send_to_type(request, SessionType::FileLine);
}

/// Re-streams a manifest to its requester (operator-triggered push).
fn transfer_file(server: &MessagingServer, container: ValueContainer) {
    info!("received message: transfer_file");
    if let Err(e) = server.send_files(container) {
        warn!("transfer_file failed: {e}");
    }
}
