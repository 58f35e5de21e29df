//! TCP server and connection handling
//!
//! Accepts incoming peer connections, dials outgoing ones, and runs the
//! per-connection reader and writer tasks.

use crate::network::gossip::{Gossip, Session};
use crate::network::message::{Message, ProtocolError, MAX_MESSAGE_SIZE};
use crate::network::peer::{ConnectionHandle, ConnectionRecord, PeerError};
use bytes::{BufMut, BytesMut};
use futures::sink::SinkExt;
use futures::stream::{SplitStream, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Newline-delimited message codec.
///
/// Decodes raw lines (parsing is left to the gossip engine so a malformed
/// message does not end the stream) and encodes [`Message`]s.
#[derive(Debug, Default)]
pub struct MessageCodec {
    /// Bytes already scanned for a newline
    next_index: usize,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for MessageCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

        let Some(offset) = newline else {
            if src.len() > MAX_MESSAGE_SIZE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Message exceeds maximum size",
                ));
            }
            self.next_index = src.len();
            return Ok(None);
        };

        let end = self.next_index + offset;
        self.next_index = 0;
        if end > MAX_MESSAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Message exceeds maximum size",
            ));
        }

        let line = src.split_to(end + 1);
        let text = std::str::from_utf8(&line[..end])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        Ok(Some(text.to_string()))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.to_string();
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// TCP server for accepting peer connections
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind to an address (`host:port`, port 0 picks a free one)
    pub async fn bind(addr: &str) -> Result<Self, io::Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Server listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Get the bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept incoming connections
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), io::Error> {
        self.listener.accept().await
    }

    /// Accept connections forever, handing each to its own task.
    ///
    /// Accept errors (e.g. running out of file descriptors) are retried
    /// after an exponentially growing pause.
    pub async fn run(self, gossip: Arc<Gossip>) {
        let mut backoff = AcceptBackoff::default();
        loop {
            match self.accept().await {
                Ok((stream, addr)) => {
                    backoff.reset();
                    log::info!("Incoming connection from {}", addr);
                    if let Err(e) = spawn_connection(stream, gossip.clone(), Vec::new()).await {
                        log::warn!("Connection error with {}: {}", addr, e);
                    }
                }
                Err(e) => {
                    let pause = backoff.next_delay();
                    log::error!("Accept error: {} (retrying in {:?})", e, pause);
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}

/// First pause after a failed accept
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
/// Longest pause between accept attempts
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause schedule for consecutive accept failures
#[derive(Debug)]
pub struct AcceptBackoff {
    current: Duration,
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self {
            current: ACCEPT_BACKOFF_MIN,
        }
    }
}

impl AcceptBackoff {
    /// Delay before the next attempt; doubles up to [`ACCEPT_BACKOFF_MAX`]
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(ACCEPT_BACKOFF_MAX);
        delay
    }

    pub fn reset(&mut self) {
        self.current = ACCEPT_BACKOFF_MIN;
    }
}

/// Connect to a peer
pub async fn connect_to_peer(addr: &str) -> Result<TcpStream, ProtocolError> {
    TcpStream::connect(addr)
        .await
        .map_err(|e| ProtocolError::FailConnect {
            addr: addr.to_string(),
            reason: e.to_string(),
        })
}

/// Register a socket and start its reader and writer tasks.
///
/// `greeting` is queued before anything else can be sent on the
/// connection. Returns a handle for sending further messages.
pub async fn spawn_connection(
    stream: TcpStream,
    gossip: Arc<Gossip>,
    greeting: Vec<Message>,
) -> Result<ConnectionHandle, PeerError> {
    let local_addr = stream.local_addr()?;
    let remote_addr = stream.peer_addr()?;

    let framed = Framed::new(stream, MessageCodec::new());
    let (mut writer, reader) = framed.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let id = gossip.registry().next_connection_id();
    let handle = ConnectionHandle::new(id, local_addr, remote_addr, tx);

    for msg in greeting {
        handle.send(msg)?;
    }

    gossip
        .registry()
        .track_connection(ConnectionRecord::unresolved(handle.clone()))
        .await;
    log::info!("Connected: {}", remote_addr);

    // Drains until the last handle is dropped
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = writer.send(msg).await {
                log::debug!("Write to {} failed: {}", remote_addr, e);
                return;
            }
        }
        if let Err(e) = writer.close().await {
            log::debug!("Closing write half to {} failed: {}", remote_addr, e);
        }
    });

    let session = Session::new(handle.clone());
    tokio::spawn(run_connection(reader, gossip, session, write_handle));

    Ok(handle)
}

/// Read messages until the peer goes away or the handshake is rejected,
/// then wait for the writer to drain what is already queued
async fn run_connection(
    mut reader: SplitStream<Framed<TcpStream, MessageCodec>>,
    gossip: Arc<Gossip>,
    mut session: Session,
    write_handle: JoinHandle<()>,
) {
    loop {
        match reader.next().await {
            Some(Ok(line)) => {
                log::debug!("Message from {}: {}", session.label(), line.trim_end());
                match gossip.handle_line(&mut session, &line).await {
                    Ok(()) => {}
                    Err(e) if e.is_terminal() => {
                        log::warn!("Closing connection to {}: {}", session.label(), e);
                        break;
                    }
                    Err(e) => log::warn!("{} (from {})", e, session.label()),
                }
            }
            Some(Err(e)) => {
                log::warn!("Error reading from {}: {}", session.label(), e);
                break;
            }
            None => break,
        }
    }

    gossip.close(&mut session).await;
    drop(session);
    if let Err(e) = write_handle.await {
        log::debug!("Writer task failed: {}", e);
    }
}
