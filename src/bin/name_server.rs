//! # Directory Service Binary
//!
//! ```bash
//! cargo run --bin name_server -- --address 127.0.0.1:40000
//! ```
//!
//! Runs until Ctrl-C.

use clap::Parser;
use log::info;
use std::sync::Arc;

use peer_lock::common::config::DEFAULT_DIRECTORY;
use peer_lock::common::logging::init_logger;
use peer_lock::discovery::DirectoryService;
use peer_lock::Address;

#[derive(Parser, Debug)]
#[command(author, version, about = "Directory service for peer-lock peers", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = DEFAULT_DIRECTORY)]
    address: Address,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();
    let args = Args::parse();

    let handle = Arc::new(DirectoryService::new())
        .listen(&args.address)
        .await?;

    tokio::signal::ctrl_c().await?;
    info!("🛑 Shutting down directory service");
    handle.stop().await;
    Ok(())
}
