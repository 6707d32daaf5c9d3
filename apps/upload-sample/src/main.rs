//! Sample uploader: declares every file of a folder, then follows the
//! transfer_condition stream until the batch is terminal.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use ferryline_protocol::{constants, NamedValue, Value as ProtoValue, ValueContainer};
use ferryline_session::{MessagingClient, SessionType, WorkerCounts};

#[derive(Parser)]
#[command(name = "upload-sample", about = "ferryline upload sample")]
struct Args {
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    encrypt_mode: bool,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    compress_mode: bool,

    #[arg(long, default_value = "middle_connection_key")]
    connection_key: String,

    #[arg(long, default_value = "127.0.0.1")]
    server_ip: String,

    #[arg(long, default_value_t = 8642)]
    server_port: u16,

    /// Folder whose files are uploaded.
    #[arg(long)]
    source_folder: PathBuf,

    /// Folder the storage node writes into.
    #[arg(long)]
    target_folder: PathBuf,

    #[arg(long, default_value = "upload_test")]
    indication_id: String,

    #[arg(long, default_value_t = 1)]
    high_priority_count: u16,

    #[arg(long, default_value_t = 2)]
    normal_priority_count: u16,

    #[arg(long, default_value_t = 3)]
    low_priority_count: u16,

    #[arg(long, default_value = "info")]
    logging_level: String,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    write_console_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    ferryline_logging::init(
        "upload_sample",
        &args.logging_level,
        false,
        args.write_console_only,
    )?;

    let sources = list_files(&args.source_folder)?;
    if sources.is_empty() {
        anyhow::bail!("there is no file: {}", args.source_folder.display());
    }

    let client = Arc::new(MessagingClient::new("upload_sample"));
    client.set_connection_key(&args.connection_key);
    client.set_encrypt_mode(args.encrypt_mode);
    client.set_compress_mode(args.compress_mode);
    client.set_session_type(SessionType::MessageLine);

    let (messages_tx, mut messages_rx) = mpsc::unbounded_channel();
    client.set_message_notification(Box::new(move |container| {
        let _ = messages_tx.send(container);
    }));

    client
        .start(
            args.server_ip.clone(),
            args.server_port,
            WorkerCounts::new(
                args.high_priority_count,
                args.normal_priority_count,
                args.low_priority_count,
            ),
        )
        .await?;
    wait_confirmed(&client, Duration::from_secs(10)).await?;

    let request = build_request(&args, &sources);
    client.send(request)?;

    while let Some(message) = messages_rx.recv().await {
        if !follow_progress(&message) {
            break;
        }
    }

    client.stop().await;
    Ok(())
}

/// Returns `false` once the transfer is over.
fn follow_progress(message: &ValueContainer) -> bool {
    if message
        .get_value(constants::ERROR)
        .and_then(ProtoValue::as_bool)
        .unwrap_or(false)
    {
        error!(
            "upload rejected: {}",
            message
                .get_value(constants::REASON)
                .and_then(ProtoValue::as_str)
                .unwrap_or("unknown reason")
        );
        return false;
    }

    if message.message_type() != constants::TRANSFER_CONDITION {
        return true;
    }

    let indication_id = message
        .get_value(constants::INDICATION_ID)
        .and_then(ProtoValue::as_str)
        .unwrap_or_default();
    let percentage = message
        .get_value(constants::PERCENTAGE)
        .and_then(ProtoValue::as_u16)
        .unwrap_or(0);

    match message
        .get_value(constants::COMPLETED)
        .and_then(ProtoValue::as_bool)
    {
        Some(completed) => {
            info!(
                "completed upload: [{indication_id}] success-{}, fail-{} ({})",
                message
                    .get_value(constants::COMPLETED_COUNT)
                    .and_then(ProtoValue::to_u64)
                    .unwrap_or(0),
                message
                    .get_value(constants::FAILED_COUNT)
                    .and_then(ProtoValue::to_u64)
                    .unwrap_or(0),
                if completed { "complete" } else { "partial" }
            );
            false
        }
        None if percentage == 0 => {
            info!("started upload: [{indication_id}]");
            true
        }
        None => {
            info!("received percentage: [{indication_id}] {percentage}%");
            true
        }
    }
}

fn build_request(args: &Args, sources: &[PathBuf]) -> ValueContainer {
    let mut request =
        ValueContainer::addressed("main_server", "", constants::UPLOAD_FILES, Vec::new()).with(
            constants::INDICATION_ID,
            ProtoValue::String(args.indication_id.clone()),
        );

    for source in sources {
        let file_name = source.file_name().unwrap_or_default();
        let target = args.target_folder.join(file_name);
        request.add(
            constants::FILE,
            ProtoValue::Container(vec![
                NamedValue::new(
                    constants::SOURCE,
                    ProtoValue::String(source.display().to_string()),
                ),
                NamedValue::new(constants::TARGET, ProtoValue::String(target.display().to_string())),
            ]),
        );
    }

    request
}

fn list_files(folder: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

async fn wait_confirmed(client: &MessagingClient, limit: Duration) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + limit;
    while !client.is_confirmed() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("could not connect to the middle server");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}
