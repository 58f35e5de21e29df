//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Blocks (payload plus hash-link metadata, wire encoding)
//! - Chain (append-only, hash-linked block sequence)
//! - Ledger (lock-guarded chain shared between connection tasks)

pub mod block;
pub mod blockchain;
pub mod ledger;

pub use block::{Block, BlockError, BlockView, WIRE_HEADER_SIZE};
pub use blockchain::{Chain, ChainError, ChainStats};
pub use ledger::{Ledger, Receipt};
