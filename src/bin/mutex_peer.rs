//! # Mutex Peer Binary
//!
//! A peer that only takes part in the distributed lock, driven from the
//! terminal.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin mutex_peer -- --type mutex_jdoe
//! cargo run --bin mutex_peer -- --config config/mutex_peer.toml --port 41001
//! ```
//!
//! ## Commands
//!
//! | Key | Action                      |
//! |-----|-----------------------------|
//! | `l` | list known peers            |
//! | `s` | show lock status            |
//! | `a` | acquire the lock            |
//! | `r` | release the lock            |
//! | `h` | help                        |
//! | `q` | leave the system and quit   |

use clap::Parser;
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use peer_lock::common::config::{load_config, ConsolePeerConfig};
use peer_lock::common::logging::init_logger;
use peer_lock::server::LockNode;
use peer_lock::Address;

#[derive(Parser, Debug)]
#[command(author, version, about = "Distributed mutual exclusion peer", long_about = None)]
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

    /// Peer type shared by all peers of this group
    #[arg(short = 't', long = "type")]
    kind: Option<String>,

    /// Directory service address (host:port)
    #[arg(short, long)]
    directory: Option<Address>,
}

const HELP: &str = "\
Commands:
  l  list peers
  s  lock status
  a  acquire the lock
  r  release the lock
  h  this help
  q  quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();
    let args = Args::parse();

    let mut config: ConsolePeerConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => ConsolePeerConfig::default(),
    };
    config
        .peer
        .override_with(args.host, args.port, args.kind, args.directory);
    config.peer.validate()?;

    let mut node = LockNode::start(&config.peer).await?;
    let operations = node.operations();
    node.serve(operations).await?;

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "l" => {
                node.peers().display_peers().await;
            }
            "s" => {
                node.lock().display_status().await;
            }
            "a" => {
                if let Err(e) = node.lock().acquire().await {
                    error!("❌ Acquire failed: {}", e);
                }
            }
            "r" => {
                if let Err(e) = node.lock().release().await {
                    error!("❌ Release failed: {}", e);
                }
            }
            "h" => println!("{HELP}"),
            "q" => break,
            "" => {}
            other => println!("Unknown command '{other}'. Type 'h' for help."),
        }
    }

    info!("👋 Leaving...");
    node.destroy().await?;
    Ok(())
}
