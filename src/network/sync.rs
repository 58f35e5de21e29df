//! Chain replication with peers
//!
//! Registers the two ledger message types on the peer registry:
//!
//! - `BLOCK-ADD <wireHex>` carries one block. The receiving ledger replaces
//!   its chain on a genesis block, appends a block that links to the tip,
//!   and asks the sender for its whole chain when the block is ahead of us.
//! - `REQUEST-BLOCKCHAIN` asks the receiver to answer with one `BLOCK-ADD`
//!   per block, genesis first.

use crate::core::{Block, Ledger, Receipt};
use crate::network::message::{Message, ProtocolError};
use crate::network::peer::{HandlerContext, HandlerResult, MessageHandler, PeerError, PeerRegistry};
use futures::FutureExt;
use std::sync::Arc;

pub const BLOCK_ADD: &str = "BLOCK-ADD";
pub const REQUEST_BLOCKCHAIN: &str = "REQUEST-BLOCKCHAIN";

/// `BLOCK-ADD` carrying `block` in wire form
pub fn block_add(block: &Block) -> Message {
    Message::extension(BLOCK_ADD, vec![block.to_wire()])
}

pub fn request_blockchain() -> Message {
    Message::extension(REQUEST_BLOCKCHAIN, Vec::new())
}

/// Chain synchronization manager
pub struct ChainSync {
    ledger: Arc<Ledger>,
}

impl ChainSync {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Register the replication handlers on `registry`
    pub async fn install(self: Arc<Self>, registry: &PeerRegistry) -> Result<(), PeerError> {
        let sync = self.clone();
        let block_add: MessageHandler = Arc::new(move |ctx: HandlerContext, args: Vec<String>| {
            let sync = sync.clone();
            async move { sync.handle_block_add(ctx, args).await }.boxed()
        });
        registry.register_handler(BLOCK_ADD, block_add).await?;

        let sync = self;
        let request: MessageHandler = Arc::new(move |ctx: HandlerContext, args: Vec<String>| {
            let sync = sync.clone();
            async move { sync.handle_request_blockchain(ctx, args).await }.boxed()
        });
        registry.register_handler(REQUEST_BLOCKCHAIN, request).await?;

        Ok(())
    }

    /// Apply a replicated block
    pub async fn handle_block_add(&self, ctx: HandlerContext, args: Vec<String>) -> HandlerResult {
        let [wire] = <[String; 1]>::try_from(args).map_err(|args| {
            ProtocolError::InvalidMessage(format!(
                "{} expects 1 argument(s), got {}",
                BLOCK_ADD,
                args.len()
            ))
        })?;
        let block = Block::from_wire(&wire)
            .map_err(|e| ProtocolError::InvalidMessage(format!("{}: {}", BLOCK_ADD, e)))?;
        let from = sender(&ctx);

        match self.ledger.receive(block).await {
            Receipt::Replaced => {
                log::info!("Replaced local chain with genesis from {}", from);
                Ok(Vec::new())
            }
            Receipt::Appended(index) => {
                log::info!("Added block {} from {}", index, from);
                Ok(Vec::new())
            }
            Receipt::Behind {
                local_next,
                remote_index,
            } => {
                log::warn!(
                    "Block {} from {} does not fit (next local index {}). Refreshing blockchain",
                    remote_index,
                    from,
                    local_next
                );
                Ok(vec![request_blockchain()])
            }
            Receipt::Stale(e) => {
                log::warn!("Discarding stale block from {}: {}", from, e);
                Ok(Vec::new())
            }
        }
    }

    /// Answer with the whole local chain
    pub async fn handle_request_blockchain(
        &self,
        ctx: HandlerContext,
        args: Vec<String>,
    ) -> HandlerResult {
        if !args.is_empty() {
            return Err(ProtocolError::InvalidMessage(format!(
                "{} expects 0 argument(s), got {}",
                REQUEST_BLOCKCHAIN,
                args.len()
            )));
        }

        let blocks = self.ledger.snapshot().await;
        log::info!("Sending {} block(s) to {}", blocks.len(), sender(&ctx));
        Ok(blocks.iter().map(block_add).collect())
    }
}

fn sender(ctx: &HandlerContext) -> String {
    ctx.peer_id
        .clone()
        .unwrap_or_else(|| ctx.connection.remote_addr.to_string())
}
