//! Mesh-Ledger CLI Application
//!
//! Runs a ledger node with an interactive prompt, plus a few offline helpers.

use clap::{Parser, Subcommand};
use mesh_ledger::cli::{self, Command};
use mesh_ledger::crypto::Keyring;
use mesh_ledger::network::{Node, NodeConfig};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "meshledger")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "A gossip-replicated, hash-linked ledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node and read commands from stdin
    Start {
        /// Node id announced to peers (random if omitted)
        #[arg(short, long)]
        id: Option<String>,

        /// Host to listen on and advertise
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on (0 picks a free one)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Address of a node whose network to join
        #[arg(short, long)]
        join: Option<String>,

        /// Directory holding <name>_priv.hex and <name>_pub.hex key files
        #[arg(long, default_value = ".")]
        key_dir: PathBuf,
    },

    /// Print the SHA-256 of a file
    Hash {
        /// File to hash
        file: PathBuf,
    },

    /// Pretty-print a wire-encoded block as JSON
    Decode {
        /// Hex wire encoding of the block
        block: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Hash { file } => cli::cmd_hash(&file),
        Commands::Decode { block } => cli::cmd_decode(&block),
        Commands::Start {
            id,
            host,
            port,
            join,
            key_dir,
        } => {
            let mut config = NodeConfig {
                host,
                port,
                bootstrap_peer: join,
                ..Default::default()
            };
            if let Some(id) = id {
                config.node_id = id;
            }

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_node(config, Keyring::new(key_dir)))
        }
    }
}

async fn run_node(config: NodeConfig, mut keyring: Keyring) -> Result<(), Box<dyn std::error::Error>> {
    let bootstrap = config.bootstrap_peer.clone();
    let node = Node::new(config).await?;
    node.listen().await?;
    node.start().await?;

    // Handle Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        println!("\n📴 Shutting down node...");
        std::process::exit(0);
    });

    if let Some(addr) = bootstrap {
        node.join(&addr).await?;
        node.request_blockchain().await;
    }

    cli::cmd_info(&node).await?;
    println!("\nType 'help' for a list of commands.\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("❌ {}\n", e);
                continue;
            }
        };

        match cli::execute(&node, &mut keyring, command).await {
            Ok(true) => println!(),
            Ok(false) => break,
            Err(e) => println!("❌ {}\n", e),
        }
    }

    println!("📴 Shutting down node...");
    Ok(())
}
