//! # Chat Peer Binary
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin chat_peer -- --type chat_jdoe
//! ```
//!
//! ## Commands
//!
//! | Input                 | Action                        |
//! |-----------------------|-------------------------------|
//! | `l`                   | list known peers              |
//! | `<PEER_ID> : <TEXT>`  | send `<TEXT>` to `<PEER_ID>`  |
//! | `h`                   | help                          |
//! | `q`                   | leave the system and quit     |

use clap::Parser;
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};

use peer_lock::common::config::{load_config, ConsolePeerConfig};
use peer_lock::common::logging::init_logger;
use peer_lock::server::ChatPeer;
use peer_lock::{Address, PeerId};

#[derive(Parser, Debug)]
#[command(author, version, about = "Peer-to-peer chat", long_about = None)]
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

    /// Peer type shared by all peers of this chat
    #[arg(short = 't', long = "type")]
    kind: Option<String>,

    /// Directory service address (host:port)
    #[arg(short, long)]
    directory: Option<Address>,
}

const HELP: &str = "\
Commands:
  l                  list peers
  <PEER_ID> : <TEXT> send <TEXT> to <PEER_ID>
  h                  this help
  q                  quit";

/// `"<id> : <text>"` as a message to send.
fn parse_message(line: &str) -> Option<(PeerId, &str)> {
    let (to, text) = line.split_once(':')?;
    let to = to.trim().parse().ok()?;
    Some((to, text.trim()))
}

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

    let (chat, mut inbox) = ChatPeer::start(&config.peer).await?;
    tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            println!("Received a message from {}: {}", message.from, message.text);
        }
    });

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "l" => {
                chat.peers().display_peers().await;
            }
            "h" => println!("{HELP}"),
            "q" => break,
            "" => {}
            other => match parse_message(other) {
                Some((to, text)) => {
                    if chat.send_message(to, text).await.is_err() {
                        println!(
                            "Cannot send messages to {to}. Make sure it is in the list of peers."
                        );
                    }
                }
                None => println!("Unknown command '{other}'. Type 'h' for help."),
            },
        }
    }

    info!("👋 Leaving...");
    chat.destroy().await?;
    Ok(())
}
