//! CLI commands for the ledger node
//!
//! Implements the interactive command parser and the command handlers used
//! by the `start` REPL and the one-shot subcommands.

use crate::core::Block;
use crate::crypto::{sha256_file, verify_signature, Digest, Keyring};
use crate::network::Node;
use std::path::{Path, PathBuf};

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// One line typed at the node prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Info,
    Peers,
    Conns,
    Blocks,
    Add(Vec<u8>),
    Cast(u64),
    Verify,
    Join(String),
    Sync,
    Hash(PathBuf),
    GenKey(String),
    PrivKey(String),
    PubKey(String),
    Sign(Digest),
    VerifySig(u64, Digest),
    Help,
    Quit,
}

impl Command {
    /// Parse a prompt line; `Ok(None)` for a blank line
    pub fn parse(line: &str) -> CliResult<Option<Command>> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (name, args.as_slice()) {
            ("info", []) => Command::Info,
            ("peers", []) => Command::Peers,
            ("conns", []) => Command::Conns,
            ("blocks", []) => Command::Blocks,
            ("add", [payload]) => Command::Add(parse_payload(payload)),
            ("cast", [index]) => Command::Cast(parse_index(index)?),
            ("verify", []) => Command::Verify,
            ("join", [addr]) => Command::Join(addr.to_string()),
            ("sync", []) => Command::Sync,
            ("hash", [file]) => Command::Hash(PathBuf::from(file)),
            ("genkey", [key]) => Command::GenKey(key.to_string()),
            ("privkey", [key]) => Command::PrivKey(key.to_string()),
            ("pubkey", [key]) => Command::PubKey(key.to_string()),
            ("sign", [hash]) => Command::Sign(parse_hash(hash)?),
            ("verify-sig", [index, hash]) => {
                Command::VerifySig(parse_index(index)?, parse_hash(hash)?)
            }
            ("help", []) => Command::Help,
            ("quit" | "exit", []) => Command::Quit,
            _ => return Err(format!("Invalid command: {} (try 'help')", line.trim()).into()),
        };

        Ok(Some(command))
    }
}

fn parse_index(index: &str) -> CliResult<u64> {
    Ok(index
        .parse()
        .map_err(|_| format!("Invalid block index: {}", index))?)
}

fn parse_hash(hash: &str) -> CliResult<Digest> {
    Ok(hash
        .parse()
        .map_err(|e| format!("Invalid document hash {}: {}", hash, e))?)
}

/// Payload bytes for `add`: hex when the argument is valid hex, raw text otherwise
pub fn parse_payload(arg: &str) -> Vec<u8> {
    hex::decode(arg).unwrap_or_else(|_| arg.as_bytes().to_vec())
}

/// One-line summary of a block
pub fn format_block(block: &Block) -> String {
    let time = chrono::DateTime::<chrono::Utc>::from_timestamp(block.timestamp, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| block.timestamp.to_string());

    format!(
        "#{} | {} | prev {} | {} | {} byte(s)",
        block.index,
        block.hash().short(16),
        block.previous_hash.short(16),
        time,
        block.data.len()
    )
}

/// Run one parsed command. Returns `false` when the REPL should stop.
pub async fn execute(node: &Node, keyring: &mut Keyring, command: Command) -> CliResult<bool> {
    match command {
        Command::Info => cmd_info(node).await?,
        Command::Peers => cmd_peers(node).await?,
        Command::Conns => cmd_conns(node).await?,
        Command::Blocks => cmd_blocks(node).await?,
        Command::Add(payload) => cmd_add(node, payload).await?,
        Command::Cast(index) => cmd_cast(node, index).await?,
        Command::Verify => cmd_verify(node).await?,
        Command::Join(addr) => cmd_join(node, &addr).await?,
        Command::Sync => cmd_sync(node).await?,
        Command::Hash(path) => cmd_hash(&path)?,
        Command::GenKey(name) => cmd_genkey(keyring, &name)?,
        Command::PrivKey(name) => cmd_privkey(keyring, &name)?,
        Command::PubKey(name) => cmd_pubkey(keyring, &name)?,
        Command::Sign(hash) => cmd_sign(node, keyring, &hash).await?,
        Command::VerifySig(index, hash) => cmd_verify_sig(node, keyring, index, &hash).await?,
        Command::Help => cmd_help(),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

/// Display node id, address and chain tip
pub async fn cmd_info(node: &Node) -> CliResult<()> {
    let status = node.status().await;

    println!("🌐 Node {}", status.id);
    println!(
        "   ├─ Address: {}",
        status.address.as_deref().unwrap_or("(not listening)")
    );
    println!("   ├─ Blocks: {}", status.total_blocks);
    println!("   ├─ Next index: {}", status.next_index);
    println!("   ├─ Peers: {}", status.peers);
    println!("   ├─ Connections: {}", status.connections);
    println!("   └─ Last hash: {}", status.last_hash);

    Ok(())
}

/// List resolved peers
pub async fn cmd_peers(node: &Node) -> CliResult<()> {
    let peers = node.peers().await;

    if peers.is_empty() {
        println!("📭 No peers yet. Join a network with: join <host:port>");
        return Ok(());
    }

    println!("👥 Peers ({}):", peers.len());
    for peer in &peers {
        println!(
            "   └─ {} at {} (via {})",
            peer.id, peer.address, peer.connection.remote_addr
        );
    }

    Ok(())
}

/// List open connections, resolved or not
pub async fn cmd_conns(node: &Node) -> CliResult<()> {
    let conns = node.connections().await;

    if conns.is_empty() {
        println!("📭 No open connections");
        return Ok(());
    }

    println!("🔌 Connections ({}):", conns.len());
    for record in &conns {
        let peer = match (&record.peer_id, &record.peer_address) {
            (Some(id), Some(addr)) => format!("{} ({})", id, addr),
            _ => "unresolved".to_string(),
        };
        println!(
            "   └─ #{} {} -> {} | {}",
            record.connection.id, record.connection.local_addr, record.connection.remote_addr, peer
        );
    }

    Ok(())
}

/// List every block
pub async fn cmd_blocks(node: &Node) -> CliResult<()> {
    let blocks = node.blocks().await;

    println!("🧱 Blocks ({}):", blocks.len());
    for block in &blocks {
        println!("   {}", format_block(block));
    }

    Ok(())
}

/// Append a record to the local chain
pub async fn cmd_add(node: &Node, payload: Vec<u8>) -> CliResult<()> {
    let index = node
        .add_record(chrono::Utc::now().timestamp(), payload)
        .await?;
    let block = node.get_record(index).await?;

    println!("✅ Block added");
    println!("   {}", format_block(&block));
    println!("   Broadcast it with: cast {}", index);

    Ok(())
}

/// Broadcast one block to every connection
pub async fn cmd_cast(node: &Node, index: u64) -> CliResult<()> {
    let sent = node.cast(index).await?;
    println!("📡 Block {} sent to {} connection(s)", index, sent);
    Ok(())
}

/// Check the hash links of the local chain
pub async fn cmd_verify(node: &Node) -> CliResult<()> {
    println!("🔍 Verifying chain...");

    if node.verify_consistency().await {
        let stats = node.stats().await;
        println!("✅ Chain is consistent!");
        println!("   {} blocks verified", stats.total_blocks);
    } else {
        println!("❌ Chain verification FAILED!");
        println!("   The hash links do not match the stored blocks.");
    }

    Ok(())
}

/// Join the network of another node
pub async fn cmd_join(node: &Node, addr: &str) -> CliResult<()> {
    let conn = node.join(addr).await?;
    println!("🤝 Joining via {} (connection #{})", addr, conn.id);
    Ok(())
}

/// Ask every connection for its chain
pub async fn cmd_sync(node: &Node) -> CliResult<()> {
    let sent = node.request_blockchain().await;
    println!("🔄 Requested blockchain from {} connection(s)", sent);
    Ok(())
}

/// Print the SHA-256 of a file
pub fn cmd_hash(path: &Path) -> CliResult<()> {
    let digest = sha256_file(path)?;
    println!("{}", digest);
    Ok(())
}

/// Generate a named key pair and write it to the key directory
pub fn cmd_genkey(keyring: &Keyring, name: &str) -> CliResult<()> {
    let pair = keyring.generate(name)?;

    println!("🔑 Key pair {} generated", name);
    println!("   ├─ Private: {}", keyring.private_key_path(name).display());
    println!("   ├─ Public: {}", keyring.public_key_path(name).display());
    println!("   └─ Public key: {}", pair.public_key_hex());

    Ok(())
}

/// Select the private key used for signing
pub fn cmd_privkey(keyring: &mut Keyring, name: &str) -> CliResult<()> {
    keyring.use_private_key(name)?;
    println!("🔐 Signing with private key {}", name);
    Ok(())
}

/// Select the public key used for verification
pub fn cmd_pubkey(keyring: &mut Keyring, name: &str) -> CliResult<()> {
    keyring.use_public_key(name)?;
    println!("🔓 Verifying with public key {}", name);
    Ok(())
}

/// Sign a document hash and append the signature as a new record
pub async fn sign_document(node: &Node, keyring: &Keyring, hash: &Digest) -> CliResult<u64> {
    let (_, pair) = keyring
        .signer()
        .ok_or("No private key selected. Use: privkey <name>")?;
    let index = node
        .add_record(chrono::Utc::now().timestamp(), pair.sign(hash)?)
        .await?;
    Ok(index)
}

pub async fn cmd_sign(node: &Node, keyring: &Keyring, hash: &Digest) -> CliResult<()> {
    let index = sign_document(node, keyring, hash).await?;
    let name = keyring.signer().map(|(name, _)| name).unwrap_or_default();

    println!("✍️  Document {} signed with key {}", hash.short(16), name);
    println!("   Stored in block {}. Broadcast it with: cast {}", index, index);

    Ok(())
}

/// Check the payload of block `index` as a signature over `hash`
pub async fn check_signature(
    node: &Node,
    keyring: &Keyring,
    index: u64,
    hash: &Digest,
) -> CliResult<bool> {
    let (_, public_key) = keyring
        .verifier()
        .ok_or("No public key selected. Use: pubkey <name>")?;
    let block = node.get_record(index).await?;
    Ok(verify_signature(public_key, hash, &block.data)?)
}

pub async fn cmd_verify_sig(
    node: &Node,
    keyring: &Keyring,
    index: u64,
    hash: &Digest,
) -> CliResult<()> {
    if check_signature(node, keyring, index, hash).await? {
        println!("✅ The signature in block {} is VALID", index);
    } else {
        println!("❌ The signature in block {} is INVALID", index);
    }
    Ok(())
}

/// Pretty-print a wire-encoded block as JSON
pub fn cmd_decode(wire: &str) -> CliResult<()> {
    let block = Block::from_wire(wire)?;
    println!("{}", serde_json::to_string_pretty(&block.view())?);
    Ok(())
}

pub fn cmd_help() {
    println!("📖 Commands:");
    println!("   info              node id, address and chain tip");
    println!("   peers             resolved peers");
    println!("   conns             open connections");
    println!("   blocks            every block in the chain");
    println!("   add <hex|text>    append a record (hex payload if valid hex)");
    println!("   cast <index>      broadcast a block to every connection");
    println!("   verify            check the chain's hash links");
    println!("   join <host:port>  join another node's network");
    println!("   sync              request the chain from every connection");
    println!("   hash <file>       SHA-256 of a file");
    println!("   genkey <name>     write <name>_priv.hex and <name>_pub.hex");
    println!("   privkey <name>    select the signing key");
    println!("   pubkey <name>     select the verification key");
    println!("   sign <hash>       sign a document hash and append the signature");
    println!("   verify-sig <index> <hash>");
    println!("                     check block <index> as a signature over <hash>");
    println!("   help              this list");
    println!("   quit              exit");
}
