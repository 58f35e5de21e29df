//! Gossip protocol engine
//!
//! Runs the per-connection state machine:
//!
//! ```text
//! UNRESOLVED --REQUEST/ACCEPTED--> RESOLVED --disconnect--> CLOSED
//!      \_______________ rejected handshake _______________/
//! ```
//!
//! The handshake (`REQUEST` / `ACCEPTED`), peer-list exchange (`LIST` /
//! `PEER`) and mesh growth are handled here. Every other message type is
//! looked up in the registry's handler table.

use crate::network::message::{Message, ProtocolError};
use crate::network::peer::{ConnectionHandle, HandlerContext, Peer, PeerRegistry};
use crate::network::server::{connect_to_peer, spawn_connection};
use futures::future::{BoxFuture, FutureExt};
use std::sync::{Arc, OnceLock};

/// Resolution state of one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Peer identity not known yet
    Unresolved,
    /// Handshake done; the peer is registered under this id
    Resolved { peer_id: String },
    /// Terminal; registry entries removed
    Closed,
}

/// Per-connection state owned by the connection's reader task
#[derive(Debug)]
pub struct Session {
    pub connection: ConnectionHandle,
    pub state: ConnectionState,
}

impl Session {
    pub fn new(connection: ConnectionHandle) -> Self {
        Self {
            connection,
            state: ConnectionState::Unresolved,
        }
    }

    pub fn peer_id(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Resolved { peer_id } => Some(peer_id),
            _ => None,
        }
    }

    /// Peer id once known, remote socket address before that
    pub fn label(&self) -> String {
        match self.peer_id() {
            Some(id) => id.to_string(),
            None => self.connection.remote_addr.to_string(),
        }
    }
}

/// The gossip engine shared by all connection tasks
pub struct Gossip {
    node_id: String,
    node_addr: OnceLock<String>,
    registry: Arc<PeerRegistry>,
}

impl Gossip {
    pub fn new(node_id: impl Into<String>, registry: Arc<PeerRegistry>) -> Self {
        Self {
            node_id: node_id.into(),
            node_addr: OnceLock::new(),
            registry,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Advertised listen address, once the node is listening
    pub fn node_addr(&self) -> Option<&str> {
        self.node_addr.get().map(String::as_str)
    }

    /// Record the advertised listen address; only the first call sticks
    pub fn set_node_addr(&self, addr: impl Into<String>) -> bool {
        self.node_addr.set(addr.into()).is_ok()
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// `REQUEST selfId selfAddr`
    pub fn request_message(&self) -> Message {
        Message::Request {
            id: self.node_id.clone(),
            addr: self.node_addr().unwrap_or_default().to_string(),
        }
    }

    fn accepted_message(&self) -> Message {
        Message::Accepted {
            id: self.node_id.clone(),
            addr: self.node_addr().unwrap_or_default().to_string(),
        }
    }

    /// Parse and handle one raw line
    pub async fn handle_line(
        self: &Arc<Self>,
        session: &mut Session,
        line: &str,
    ) -> Result<(), ProtocolError> {
        let msg = Message::parse(line)?;
        self.handle_message(session, msg).await
    }

    /// Handle one message received on `session`
    pub fn handle_message<'a>(
        self: &'a Arc<Self>,
        session: &'a mut Session,
        msg: Message,
    ) -> BoxFuture<'a, Result<(), ProtocolError>> {
        async move {
            match msg {
                Message::Request { id, addr } => {
                    self.resolve(session, id, addr).await?;
                    reply(session, self.accepted_message());
                    Ok(())
                }

                Message::Accepted { id, addr } => self.resolve(session, id, addr).await,

                Message::List => {
                    let requester = session.peer_id();
                    for peer in self.registry.list_peers().await {
                        if Some(peer.id.as_str()) == requester {
                            continue;
                        }
                        reply(
                            session,
                            Message::Peer {
                                id: peer.id,
                                addr: peer.address,
                            },
                        );
                    }
                    Ok(())
                }

                Message::Peer { id, addr } => self.discover(id, addr).await,

                Message::Extension { kind, args } => {
                    let handler = self.registry.lookup_handler(&kind).await.ok_or_else(|| {
                        ProtocolError::InvalidMessage(format!(
                            "The message type {} is invalid",
                            kind
                        ))
                    })?;

                    let ctx = HandlerContext {
                        connection: session.connection.clone(),
                        peer_id: session.peer_id().map(str::to_string),
                    };
                    for msg in handler(ctx, args).await? {
                        reply(session, msg);
                    }
                    Ok(())
                }
            }
        }
        .boxed()
    }

    /// Complete a handshake: admit the peer and mark the connection resolved
    async fn resolve(
        &self,
        session: &mut Session,
        id: String,
        addr: String,
    ) -> Result<(), ProtocolError> {
        if let Some(current) = session.peer_id() {
            if current != id {
                return Err(ProtocolError::InvalidMessage(format!(
                    "connection already resolved as {}, ignoring handshake from {}",
                    current, id
                )));
            }
        }

        let peer = Peer {
            id: id.clone(),
            address: addr.clone(),
            connection: session.connection.clone(),
        };
        self.registry.admit_peer(&self.node_id, peer).await?;
        self.registry
            .resolve_connection(session.connection.id, &id, &addr)
            .await;
        session.state = ConnectionState::Resolved { peer_id: id };
        Ok(())
    }

    /// React to a `PEER` entry: dial it if it is new to us
    async fn discover(self: &Arc<Self>, id: String, addr: String) -> Result<(), ProtocolError> {
        if id == self.node_id {
            log::debug!("Skipping PEER {}: that is this node", id);
            return Ok(());
        }
        if self.registry.lookup_peer(&id).await.is_some() {
            log::debug!("Skipping PEER {}: already a peer", id);
            return Ok(());
        }

        log::info!("Discovered peer {} at {}, connecting", id, addr);
        self.dial(&addr, vec![self.request_message()]).await?;
        Ok(())
    }

    /// Open an outbound connection, queue `greeting` on it, and run it in
    /// its own task
    pub async fn dial(
        self: &Arc<Self>,
        addr: &str,
        greeting: Vec<Message>,
    ) -> Result<ConnectionHandle, ProtocolError> {
        let stream = connect_to_peer(addr).await?;
        spawn_connection(stream, self.clone(), greeting)
            .await
            .map_err(|e| ProtocolError::FailConnect {
                addr: addr.to_string(),
                reason: e.to_string(),
            })
    }

    /// Join the network of the node at `addr`: handshake, then ask for its peers
    pub async fn join(self: &Arc<Self>, addr: &str) -> Result<ConnectionHandle, ProtocolError> {
        self.dial(addr, vec![self.request_message(), Message::List])
            .await
    }

    /// Drop every registry entry owned by this connection
    pub async fn close(&self, session: &mut Session) {
        self.registry
            .untrack_connection(session.connection.id)
            .await;
        if let ConnectionState::Resolved { peer_id } = &session.state {
            self.registry
                .forget_peer_owned_by(peer_id, session.connection.id)
                .await;
        }
        log::info!("Disconnected: {}", session.label());
        session.state = ConnectionState::Closed;
    }
}

fn reply(session: &Session, msg: Message) {
    if let Err(e) = session.connection.send(msg) {
        log::debug!("Dropping reply to {}: {}", session.label(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::peer::{ConnectionRecord, MessageHandler};
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    fn engine(id: &str) -> Arc<Gossip> {
        let gossip = Gossip::new(id, Arc::new(PeerRegistry::new()));
        gossip.set_node_addr(format!("{}.example:1", id));
        Arc::new(gossip)
    }

    async fn session(gossip: &Gossip) -> (Session, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = gossip.registry().next_connection_id();
        let local: SocketAddr = "127.0.0.1:1000".parse().unwrap();
        let remote: SocketAddr = format!("127.0.0.1:{}", 3000 + id).parse().unwrap();
        let handle = ConnectionHandle::new(id, local, remote, tx);
        gossip
            .registry()
            .track_connection(ConnectionRecord::unresolved(handle.clone()))
            .await;
        (Session::new(handle), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_request_registers_peer_and_replies() {
        let a = engine("A");
        let (mut s, mut rx) = session(&a).await;

        a.handle_line(&mut s, "REQUEST B B.example:1\n").await.unwrap();

        assert_eq!(
            s.state,
            ConnectionState::Resolved {
                peer_id: "B".into()
            }
        );
        assert_eq!(
            drain(&mut rx),
            vec![Message::Accepted {
                id: "A".into(),
                addr: "A.example:1".into()
            }]
        );
        let peer = a.registry().lookup_peer("B").await.unwrap();
        assert_eq!(peer.address, "B.example:1");
        let records = a.registry().list_connections().await;
        assert_eq!(records[0].peer_id.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_accepted_registers_without_reply() {
        let b = engine("B");
        let (mut s, mut rx) = session(&b).await;

        b.handle_line(&mut s, "ACCEPTED A A.example:1").await.unwrap();

        assert!(drain(&mut rx).is_empty());
        assert!(b.registry().lookup_peer("A").await.is_some());
    }

    #[tokio::test]
    async fn test_self_request_is_terminal() {
        let a = engine("A");
        let (mut s, mut rx) = session(&a).await;

        let err = a.handle_line(&mut s, "REQUEST A x:1").await.unwrap_err();
        assert_eq!(err.code(), "SelfPeer");
        assert!(err.is_terminal());
        assert_eq!(s.state, ConnectionState::Unresolved);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(a.registry().peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_request_keeps_existing_peer() {
        let a = engine("A");
        let (mut first, _rx1) = session(&a).await;
        let (mut second, mut rx2) = session(&a).await;

        a.handle_line(&mut first, "REQUEST B b:1").await.unwrap();
        let err = a.handle_line(&mut second, "REQUEST B b:1").await.unwrap_err();
        assert_eq!(err.code(), "DuplicatePeer");
        assert!(drain(&mut rx2).is_empty());

        // Closing the rejected connection must not evict the real peer
        a.close(&mut second).await;
        assert_eq!(second.state, ConnectionState::Closed);
        let peer = a.registry().lookup_peer("B").await.unwrap();
        assert_eq!(peer.connection.id, first.connection.id);
        assert_eq!(a.registry().connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_close_forgets_resolved_peer() {
        let a = engine("A");
        let (mut s, _rx) = session(&a).await;
        a.handle_line(&mut s, "REQUEST B b:1").await.unwrap();

        a.close(&mut s).await;

        assert!(a.registry().lookup_peer("B").await.is_none());
        assert_eq!(a.registry().connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_second_handshake_with_other_id_rejected() {
        let a = engine("A");
        let (mut s, _rx) = session(&a).await;
        a.handle_line(&mut s, "REQUEST B b:1").await.unwrap();

        let err = a.handle_line(&mut s, "REQUEST C c:1").await.unwrap_err();
        assert_eq!(err.code(), "InvalidMessage");
        assert!(a.registry().lookup_peer("C").await.is_none());
        assert_eq!(s.peer_id(), Some("B"));
    }

    #[tokio::test]
    async fn test_list_excludes_requester() {
        let a = engine("A");
        let (mut b, _rxb) = session(&a).await;
        let (mut c, _rxc) = session(&a).await;
        let (mut d, mut rxd) = session(&a).await;
        a.handle_line(&mut b, "REQUEST B b:1").await.unwrap();
        a.handle_line(&mut c, "REQUEST C c:1").await.unwrap();
        a.handle_line(&mut d, "REQUEST D d:1").await.unwrap();
        drain(&mut rxd);

        a.handle_line(&mut d, "LIST").await.unwrap();

        assert_eq!(
            drain(&mut rxd),
            vec![
                Message::Peer {
                    id: "B".into(),
                    addr: "b:1".into()
                },
                Message::Peer {
                    id: "C".into(),
                    addr: "c:1".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_peer_for_self_or_known_is_noop() {
        let a = engine("A");
        let (mut s, mut rx) = session(&a).await;
        a.handle_line(&mut s, "REQUEST B b:1").await.unwrap();
        drain(&mut rx);

        a.handle_line(&mut s, "PEER A unreachable:1").await.unwrap();
        a.handle_line(&mut s, "PEER B unreachable:1").await.unwrap();

        assert!(drain(&mut rx).is_empty());
        assert_eq!(a.registry().connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_peer_dial_failure_is_not_terminal() {
        let a = engine("A");
        let (mut s, _rx) = session(&a).await;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = a
            .handle_line(&mut s, &format!("PEER Z {}", dead))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FailConnect");
        assert!(!err.is_terminal());
    }

    #[tokio::test]
    async fn test_unknown_type_is_invalid_message() {
        let a = engine("A");
        let (mut s, _rx) = session(&a).await;

        let err = a.handle_line(&mut s, "GOSSIP hello").await.unwrap_err();
        assert_eq!(err.code(), "InvalidMessage");
        assert!(!err.is_terminal());
    }

    #[tokio::test]
    async fn test_extension_dispatch_replies_on_connection() {
        let a = engine("A");
        let handler: MessageHandler = Arc::new(|ctx: HandlerContext, args: Vec<String>| {
            async move {
                let from = ctx.peer_id.unwrap_or_else(|| "?".to_string());
                Ok::<_, ProtocolError>(vec![Message::extension("PONG", vec![from, args.join(",")])])
            }
            .boxed()
        });
        a.registry().register_handler("PING", handler).await.unwrap();

        let (mut s, mut rx) = session(&a).await;
        a.handle_line(&mut s, "PING 1 2").await.unwrap();
        a.handle_line(&mut s, "REQUEST B b:1").await.unwrap();
        a.handle_line(&mut s, "PING 3").await.unwrap();

        let replies = drain(&mut rx);
        assert_eq!(
            replies[0],
            Message::extension("PONG", vec!["?".into(), "1,2".into()])
        );
        assert_eq!(
            replies[2],
            Message::extension("PONG", vec!["B".into(), "3".into()])
        );
    }
}
