//! Relay tier: a server for downstream clients plus two bridged client
//! lines to the storage node, glued together by the router.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use ferryline_router::Router;
use ferryline_session::{MessagingClient, MessagingServer, SessionType, WorkerCounts};
use ferryline_transfer::TransferTracker;

#[derive(Parser)]
#[command(name = "middle-server", about = "ferryline relay tier")]
struct Args {
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    encrypt_mode: bool,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    compress_mode: bool,

    #[arg(long, default_value_t = 1024)]
    compress_block_size: usize,

    /// Key shared with the storage node.
    #[arg(long, default_value = "main_connection_key")]
    main_connection_key: String,

    /// Key shared with downstream clients.
    #[arg(long, default_value = "middle_connection_key")]
    middle_connection_key: String,

    #[arg(long, default_value = "127.0.0.1")]
    main_server_ip: String,

    #[arg(long, default_value_t = 9753)]
    main_server_port: u16,

    #[arg(long, default_value_t = 8642)]
    middle_server_port: u16,

    #[arg(long, default_value_t = 4)]
    high_priority_count: u16,

    #[arg(long, default_value_t = 4)]
    normal_priority_count: u16,

    #[arg(long, default_value_t = 4)]
    low_priority_count: u16,

    /// Maximum concurrent downstream sessions; 0 means unlimited.
    #[arg(long, default_value_t = 0)]
    session_limit_count: usize,

    /// Root for files arriving on the upstream file line.
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
        "middle_server",
        &args.logging_level,
        args.write_console,
        args.write_console_only,
    )?;

    let counts = WorkerCounts::new(
        args.high_priority_count,
        args.normal_priority_count,
        args.low_priority_count,
    );

    let downstream = Arc::new(MessagingServer::new("middle_server"));
    downstream.set_connection_key(&args.middle_connection_key);
    downstream.set_encrypt_mode(args.encrypt_mode);
    downstream.set_compress_mode(args.compress_mode);
    downstream.set_compress_block_size(args.compress_block_size);
    downstream.set_session_limit_count(args.session_limit_count);
    downstream.set_possible_session_types([SessionType::MessageLine]);
    downstream.set_connection_notification(Box::new(|target_id, target_sub_id, condition| {
        info!(
            "a client on middle server: {target_id}[{target_sub_id}] is {}",
            if condition { "connected" } else { "disconnected" }
        );
    }));

    let data_line = Arc::new(MessagingClient::new("data_line"));
    data_line.set_connection_key(&args.main_connection_key);
    data_line.set_compress_mode(args.compress_mode);
    data_line.set_compress_block_size(args.compress_block_size);
    data_line.set_session_type(SessionType::MessageLine);
    data_line.set_bridge_line(true);

    let file_line = Arc::new(MessagingClient::new("file_line"));
    file_line.set_connection_key(&args.main_connection_key);
    file_line.set_compress_mode(args.compress_mode);
    file_line.set_compress_block_size(args.compress_block_size);
    file_line.set_session_type(SessionType::FileLine);
    file_line.set_bridge_line(true);
    if let Some(folder) = &args.target_folder {
        file_line.set_save_root(folder.clone());
    }

    let router = Router::new(
        Arc::clone(&downstream),
        Arc::clone(&data_line),
        Arc::clone(&file_line),
        Arc::new(TransferTracker::new()),
    );
    router.install();

    downstream.listen(args.middle_server_port, counts).await?;
    data_line
        .start(args.main_server_ip.clone(), args.main_server_port, counts)
        .await?;
    file_line
        .start(args.main_server_ip.clone(), args.main_server_port, counts)
        .await?;

    downstream.wait_stop().await;

    file_line.stop().await;
    data_line.stop().await;
    Ok(())
}
