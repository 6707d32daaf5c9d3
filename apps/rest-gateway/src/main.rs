//! REST gateway: one message line into the relay, one HTTP surface out.

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use ferryline_rest::{ProgressBuffer, RestApi};
use ferryline_session::{MessagingClient, SessionType, WorkerCounts};

#[derive(Parser)]
#[command(name = "rest-gateway", about = "ferryline REST gateway")]
struct Args {
    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    encrypt_mode: bool,

    #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
    compress_mode: bool,

    #[arg(long, default_value_t = 1024)]
    compress_block_size: usize,

    #[arg(long, default_value = "middle_connection_key")]
    connection_key: String,

    /// Relay address to dial.
    #[arg(long, default_value = "127.0.0.1")]
    server_ip: String,

    #[arg(long, default_value_t = 8642)]
    server_port: u16,

    #[arg(long, default_value_t = 7654)]
    rest_port: u16,

    #[arg(long, default_value_t = 4)]
    high_priority_count: u16,

    #[arg(long, default_value_t = 4)]
    normal_priority_count: u16,

    #[arg(long, default_value_t = 4)]
    low_priority_count: u16,

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
        "restapi_gateway",
        &args.logging_level,
        args.write_console,
        args.write_console_only,
    )?;

    let data_line = Arc::new(MessagingClient::new("data_line"));
    data_line.set_connection_key(&args.connection_key);
    data_line.set_encrypt_mode(args.encrypt_mode);
    data_line.set_compress_mode(args.compress_mode);
    data_line.set_compress_block_size(args.compress_block_size);
    data_line.set_session_type(SessionType::MessageLine);
    data_line.set_connection_notification(Box::new(|target_id, target_sub_id, condition| {
        info!(
            "data_line is {} from target: {target_id}[{target_sub_id}]",
            if condition { "connected" } else { "disconnected" }
        );
    }));

    let buffer = Arc::new(ProgressBuffer::new());
    {
        let buffer = Arc::clone(&buffer);
        data_line.set_message_notification(Box::new(move |container| {
            buffer.record(&container);
        }));
    }

    data_line
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

    let api = {
        let data_line = Arc::clone(&data_line);
        RestApi::new(
            move |container| match data_line.send(container) {
                Ok(()) => true,
                Err(e) => {
                    warn!("data line rejected request: {e}");
                    false
                }
            },
            Arc::clone(&buffer),
        )
    };

    let routes = ferryline_rest::routes(api);
    let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(
        ([0, 0, 0, 0], args.rest_port),
        async {
            let _ = tokio::signal::ctrl_c().await;
        },
    );
    info!("rest gateway listening on {addr}");
    server.await;

    data_line.stop().await;
    Ok(())
}
