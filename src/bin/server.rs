//! # Fortune Server Binary Entry Point
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin server -- --type fortune_jdoe --file dbs/fortune.db
//! cargo run --bin server -- --config config/server.toml
//! ```
//!
//! The server will:
//! 1. Load configuration (file, then flags)
//! 2. Load the fortune database
//! 3. Register with the directory and join the other servers of its type
//! 4. Serve `read` / `write` until `q` or Ctrl-C, then leave the system

use clap::Parser;
use log::info;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

use peer_lock::common::config::{load_config, ServerConfig};
use peer_lock::common::logging::init_logger;
use peer_lock::server::FortuneServer;
use peer_lock::Address;

/// Command-line arguments for the server binary
#[derive(Parser, Debug)]
#[command(author, version, about = "Replicated fortune server", long_about = None)]
struct Args {
    /// Optional TOML configuration file; flags override its values
    #[arg(short, long)]
    config: Option<String>,

    /// Host to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (random when omitted)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server type shared by all replicas of one database
    #[arg(short = 't', long = "type")]
    kind: Option<String>,

    /// Directory service address (host:port)
    #[arg(short, long)]
    directory: Option<Address>,

    /// Fortune database file
    #[arg(short, long)]
    file: Option<PathBuf>,
}

const HELP: &str = "\
Commands:
  l  list peers
  s  lock status
  h  this help
  q  quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();
    let args = Args::parse();

    let mut config: ServerConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    config
        .peer
        .override_with(args.host, args.port, args.kind, args.directory);
    if let Some(file) = args.file {
        config.database.file = file;
    }
    config.peer.validate()?;

    let server = FortuneServer::start(&config).await?;

    let console = async {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            match line.trim() {
                "l" => {
                    server.node().peers().display_peers().await;
                }
                "s" => {
                    server.node().lock().display_status().await;
                }
                "h" => println!("{HELP}"),
                "q" => return Ok(()),
                _ => {}
            }
        }
        // No terminal attached: keep serving until Ctrl-C.
        std::future::pending::<anyhow::Result<()>>().await
    };

    tokio::select! {
        outcome = console => outcome?,
        signal = tokio::signal::ctrl_c() => signal?,
    }

    info!("👋 Leaving...");
    server.destroy().await?;
    Ok(())
}
