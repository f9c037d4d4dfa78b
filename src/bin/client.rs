//! # Fortune Client Binary Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # read one fortune from any server of the type
//! cargo run --bin client -- --type fortune_jdoe
//!
//! # write one fortune through server 3
//! cargo run --bin client -- --type fortune_jdoe --id 3 --write "Today is your lucky day."
//!
//! # interactive session
//! cargo run --bin client -- --type fortune_jdoe --interactive
//! ```

use anyhow::Context;
use clap::Parser;
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};

use peer_lock::common::config::{DEFAULT_DIRECTORY, PLACEHOLDER_TYPE};
use peer_lock::common::logging::init_logger;
use peer_lock::rpc::Proxy;
use peer_lock::{Address, PeerId};

/// Command-line arguments for the client binary
#[derive(Parser, Debug)]
#[command(author, version, about = "Fortune client", long_about = None)]
struct Args {
    /// Server type to talk to
    #[arg(short = 't', long = "type")]
    kind: String,

    /// Talk to this server id instead of a random one
    #[arg(short, long)]
    id: Option<PeerId>,

    /// Write this fortune instead of reading one
    #[arg(short, long, conflicts_with = "interactive")]
    write: Option<String>,

    /// Read and write fortunes from a prompt
    #[arg(short = 'I', long)]
    interactive: bool,

    /// Directory service address (host:port)
    #[arg(short, long, default_value = DEFAULT_DIRECTORY)]
    directory: Address,
}

const HELP: &str = "\
Commands:
  r          read a fortune
  w <text>   write a fortune
  h          this help
  q          quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();
    let args = Args::parse();
    if args.kind == PLACEHOLDER_TYPE {
        anyhow::bail!("change the server type to something unique (it is still '{PLACEHOLDER_TYPE}')");
    }

    let server = locate(&Proxy::new(args.directory.clone()), &args.kind, args.id).await?;
    info!("🔗 Using fortune server at {}", server.address());

    if args.interactive {
        return interactive(&server).await;
    }
    match args.write {
        Some(fortune) => {
            server.write(&fortune).await?;
            info!("✅ Fortune written");
        }
        None => println!("{}", server.read().await?),
    }
    Ok(())
}

async fn locate(directory: &Proxy, kind: &str, id: Option<PeerId>) -> anyhow::Result<Proxy> {
    let address = match id {
        Some(id) => directory.require_object(kind, id).await,
        None => directory.require_any(kind).await,
    }
    .with_context(|| format!("no fortune server of type '{kind}' found"))?;
    Ok(Proxy::new(address))
}

async fn interactive(server: &Proxy) -> anyhow::Result<()> {
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let outcome = match command {
            "r" => server.read().await.map(|fortune| println!("{fortune}")),
            "w" if !rest.trim().is_empty() => server.write(rest.trim()).await,
            "w" => {
                println!("Usage: w <text>");
                Ok(())
            }
            "h" => {
                println!("{HELP}");
                Ok(())
            }
            "q" => break,
            "" => Ok(()),
            other => {
                println!("Unknown command '{other}'. Type 'h' for help.");
                Ok(())
            }
        };
        if let Err(e) = outcome {
            println!("Request failed: {e}");
        }
    }
    Ok(())
}
