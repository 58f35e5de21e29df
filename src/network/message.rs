//! Network message types for P2P communication
//!
//! Messages are single lines of space-separated tokens. The first token is
//! the case-sensitive message type. `REQUEST`, `ACCEPTED`, `LIST` and `PEER`
//! are reserved for the gossip protocol; every other type is carried as an
//! [`Message::Extension`] and routed through the registry's handler table.

use std::fmt;
use thiserror::Error;

/// Maximum length of a single message line in bytes
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

pub const REQUEST: &str = "REQUEST";
pub const ACCEPTED: &str = "ACCEPTED";
pub const LIST: &str = "LIST";
pub const PEER: &str = "PEER";

/// Message types handled by the gossip engine itself
pub const RESERVED_TYPES: [&str; 4] = [REQUEST, ACCEPTED, LIST, PEER];

/// Wire-level protocol violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("SelfPeer: can't add itself as peer ({0})")]
    SelfPeer(String),
    #[error("DuplicatePeer: {0} is already a peer")]
    DuplicatePeer(String),
    #[error("FailConnect: failed to connect to peer at {addr}: {reason}")]
    FailConnect { addr: String, reason: String },
    #[error("InvalidMessage: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    /// Stable error code, as reported to operators
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::SelfPeer(_) => "SelfPeer",
            ProtocolError::DuplicatePeer(_) => "DuplicatePeer",
            ProtocolError::FailConnect { .. } => "FailConnect",
            ProtocolError::InvalidMessage(_) => "InvalidMessage",
        }
    }

    /// Handshake rejections close the connection; everything else is logged
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProtocolError::SelfPeer(_) | ProtocolError::DuplicatePeer(_)
        )
    }
}

/// Network message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Ask the receiver to add the sender as a peer
    Request { id: String, addr: String },

    /// Handshake reply carrying the accepting node's identity
    Accepted { id: String, addr: String },

    /// Ask for the receiver's peer list
    List,

    /// One entry of a peer list
    Peer { id: String, addr: String },

    /// Any other message type, dispatched through registered handlers
    Extension { kind: String, args: Vec<String> },
}

impl Message {
    pub fn extension(kind: &str, args: Vec<String>) -> Self {
        Message::Extension {
            kind: kind.to_string(),
            args,
        }
    }

    /// Parse one line (without or with its trailing newline)
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::InvalidMessage("empty message".to_string()));
        }

        let mut tokens = line.split(' ');
        let kind = tokens.next().unwrap_or_default();
        let args: Vec<String> = tokens.map(str::to_string).collect();

        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(ProtocolError::InvalidMessage(format!(
                    "{} expects {} argument(s), got {}",
                    kind,
                    expected,
                    args.len()
                )))
            }
        };

        match kind {
            REQUEST => {
                arity(2)?;
                let [id, addr] = take_pair(args);
                Ok(Message::Request { id, addr })
            }
            ACCEPTED => {
                arity(2)?;
                let [id, addr] = take_pair(args);
                Ok(Message::Accepted { id, addr })
            }
            LIST => {
                arity(0)?;
                Ok(Message::List)
            }
            PEER => {
                arity(2)?;
                let [id, addr] = take_pair(args);
                Ok(Message::Peer { id, addr })
            }
            _ => Ok(Message::Extension {
                kind: kind.to_string(),
                args,
            }),
        }
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &str {
        match self {
            Message::Request { .. } => REQUEST,
            Message::Accepted { .. } => ACCEPTED,
            Message::List => LIST,
            Message::Peer { .. } => PEER,
            Message::Extension { kind, .. } => kind,
        }
    }
}

fn take_pair(args: Vec<String>) -> [String; 2] {
    let mut iter = args.into_iter();
    [
        iter.next().unwrap_or_default(),
        iter.next().unwrap_or_default(),
    ]
}

/// Renders the message line without its trailing newline
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request { id, addr } => write!(f, "{} {} {}", REQUEST, id, addr),
            Message::Accepted { id, addr } => write!(f, "{} {} {}", ACCEPTED, id, addr),
            Message::List => f.write_str(LIST),
            Message::Peer { id, addr } => write!(f, "{} {} {}", PEER, id, addr),
            Message::Extension { kind, args } => {
                f.write_str(kind)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
        }
    }
}
