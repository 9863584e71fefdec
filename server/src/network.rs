//! Relay host: accept loop, per-connection handlers and broadcast fan-out

use crate::client_manager::ClientManager;
use crate::config::{GhostPolicy, HostConfig};
use crate::registry::{PlayerRegistry, SharedRegistry};
use log::{debug, error, info, warn};
use shared::{
    Connection, ConnectionReader, ConnectionWriter, Handshake, Identity, Message, PlayerRecord,
    Position, TransportError,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Why a connection handler stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Shutdown,
    RemoteClosed,
    ReceiveFailed,
    SendFailed,
}

/// State shared between the accept loop and every handler
#[derive(Clone)]
struct Relay {
    registry: SharedRegistry,
    clients: Arc<RwLock<ClientManager>>,
    config: Arc<HostConfig>,
}

impl Relay {
    /// Decodes one frame from `identity` and acts on it
    ///
    /// Malformed payloads and messages claiming another identity are dropped;
    /// the connection stays up either way.
    async fn dispatch(&self, identity: Identity, frame: &[u8]) {
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Discarding message from client {}: {}", identity, e);
                return;
            }
        };

        debug!("Client {} sent message kind {}", identity, message.discriminator());

        if message.identity() != identity {
            warn!(
                "Client {} sent a message as identity {}, discarding",
                identity,
                message.identity()
            );
            return;
        }

        match message {
            Message::Position { x, y, .. } => {
                self.registry
                    .write()
                    .await
                    .upsert(identity, Position::new(x, y));
                self.broadcast_snapshot(Some(identity)).await;
            }
            Message::Chat { ref text, .. } => {
                if text.is_empty() {
                    return;
                }
                info!("Chat from client {}: {}", identity, text);
                self.broadcast(&message, None).await;
            }
        }
    }

    /// Sends one position frame per registry record
    async fn broadcast_snapshot(&self, exclude: Option<Identity>) {
        let snapshot = self.registry.read().await.snapshot();

        let mut frames = Vec::with_capacity(snapshot.len());
        for record in &snapshot {
            match record.to_message().encode() {
                Ok(payload) => frames.push(Bytes::from(payload)),
                Err(e) => error!("Failed to encode record {}: {}", record.identity, e),
            }
        }

        self.fan_out(&frames, exclude).await;
    }

    async fn broadcast(&self, message: &Message, exclude: Option<Identity>) {
        match message.encode() {
            Ok(payload) => self.fan_out(&[Bytes::from(payload)], exclude).await,
            Err(e) => error!("Failed to encode broadcast: {}", e),
        }
    }

    /// Queues `frames` on every target connection
    ///
    /// Best effort: a full or closed queue is logged and skipped, and never
    /// removes the connection.
    async fn fan_out(&self, frames: &[Bytes], exclude: Option<Identity>) {
        if frames.is_empty() {
            return;
        }

        let targets = self.clients.read().await.outbound_targets(exclude);

        for (identity, outbound) in targets {
            for frame in frames {
                if let Err(e) = outbound.try_send(frame.clone()) {
                    match e {
                        mpsc::error::TrySendError::Full(_) => {
                            warn!(
                                "Outbound queue full for client {}, dropping broadcast",
                                identity
                            );
                        }
                        mpsc::error::TrySendError::Closed(_) => {
                            debug!("Client {} is closing, skipping broadcast", identity);
                        }
                    }
                    break;
                }
            }
        }
    }

    async fn disconnect(&self, identity: Identity, reason: CloseReason) {
        let removed = self.clients.write().await.remove(identity);
        debug!("Handler for client {} finished ({:?}, removed: {})", identity, reason, removed);

        if self.config.ghost_policy == GhostPolicy::Remove {
            self.registry.write().await.remove(identity);
        }
    }
}

/// Authoritative relay host
pub struct RelayHost {
    listener: TcpListener,
    relay: Relay,
}

impl RelayHost {
    /// Binds the listening socket. This is the only fatal failure point.
    pub async fn bind(config: HostConfig) -> Result<Self, HostError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|source| HostError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(TransportError::from)?;
        info!("Listening on {}", local_addr);

        Ok(RelayHost {
            listener,
            relay: Relay {
                registry: PlayerRegistry::shared(),
                clients: Arc::new(RwLock::new(ClientManager::new(config.max_connections))),
                config: Arc::new(config),
            },
        })
    }

    /// Address the listener is bound to
    ///
    /// Useful after binding to port 0, where the OS picks the port.
    pub fn local_addr(&self) -> Result<SocketAddr, HostError> {
        Ok(self.listener.local_addr().map_err(TransportError::from)?)
    }

    /// Accept loop
    ///
    /// Runs until `shutdown` is cancelled, then cancels and joins every
    /// connection handler before returning.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), HostError> {
        let mut handlers = JoinSet::new();

        info!("Relay host started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        self.accept_connection(stream, addr, &shutdown, &mut handlers).await;
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },

                Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = finished {
                        error!("Connection handler panicked: {}", e);
                    }
                }
            }
        }

        info!("Relay host shutting down");
        self.relay.clients.read().await.cancel_all();
        while let Some(finished) = handlers.join_next().await {
            if let Err(e) = finished {
                error!("Connection handler panicked: {}", e);
            }
        }

        Ok(())
    }

    /// Handshake, registration and handler spawn for one accepted stream
    async fn accept_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        shutdown: &CancellationToken,
        handlers: &mut JoinSet<()>,
    ) {
        let mut connection = match Connection::new(stream) {
            Ok(connection) => connection,
            Err(e) => {
                error!("Failed to set up connection from {}: {}", addr, e);
                return;
            }
        };

        let next_identity = self.relay.clients.read().await.next_identity();
        let Some(identity) = next_identity else {
            warn!(
                "Rejecting {}: {} connections already active",
                addr, self.relay.config.max_connections
            );
            return;
        };

        let send_timeout = self.relay.config.send_timeout;
        let handshake = tokio::time::timeout(
            send_timeout,
            connection.send_handshake(Handshake { identity }),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout(send_timeout)));

        if let Err(e) = handshake {
            error!("Failed to send identity {} to {}: {}", identity, addr, e);
            return;
        }

        self.relay
            .registry
            .write()
            .await
            .insert_spawn(identity, self.relay.config.spawn_position);

        let (outbound_tx, outbound_rx) = mpsc::channel(self.relay.config.outbound_queue);
        let cancel = shutdown.child_token();

        let registered = self.relay.clients.write().await.register(
            identity,
            addr,
            outbound_tx,
            cancel.clone(),
        );
        if !registered {
            error!("Identity {} was taken before registration", identity);
            return;
        }

        let (reader, writer) = connection.into_split();
        handlers.spawn(handle_connection(
            self.relay.clone(),
            identity,
            reader,
            writer,
            outbound_rx,
            cancel,
        ));
    }

    /// Sets a player's position from the host side and broadcasts to everyone.
    pub async fn update_player_position(&self, identity: Identity, position: Position) {
        self.relay.registry.write().await.upsert(identity, position);
        self.relay.broadcast_snapshot(None).await;
    }

    /// Last known record for `identity`, ghosts included
    pub async fn player_record(&self, identity: Identity) -> Option<PlayerRecord> {
        self.relay.registry.read().await.get(identity)
    }

    /// Copy of every record in the registry, sorted by identity
    ///
    /// Taken under the read lock; the copy does not change afterwards.
    pub async fn snapshot(&self) -> Vec<PlayerRecord> {
        self.relay.registry.read().await.snapshot()
    }

    /// Identities with a live connection, ascending
    pub async fn active_identities(&self) -> Vec<Identity> {
        self.relay.clients.read().await.identities()
    }

    /// Number of connections with a running handler
    pub async fn active_count(&self) -> usize {
        self.relay.clients.read().await.len()
    }
}

/// Drives one connection until it closes or is cancelled
///
/// Reads inbound frames and writes frames queued by broadcasts. Any transport
/// failure in either direction ends the handler and removes the connection.
async fn handle_connection(
    relay: Relay,
    identity: Identity,
    mut reader: ConnectionReader,
    mut writer: ConnectionWriter,
    mut outbound: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    let send_timeout = relay.config.send_timeout;

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break CloseReason::Shutdown,

            frame = reader.receive() => match frame {
                Ok(frame) => relay.dispatch(identity, &frame).await,
                Err(TransportError::Closed) => break CloseReason::RemoteClosed,
                Err(e) if e.is_recoverable() => {
                    warn!("Discarding message from client {}: {}", identity, e);
                }
                Err(e) => {
                    warn!("Receive from client {} failed: {}", identity, e);
                    break CloseReason::ReceiveFailed;
                }
            },

            Some(frame) = outbound.recv() => {
                if let Err(e) = writer.send_timeout(frame, send_timeout).await {
                    warn!("Send to client {} failed: {}", identity, e);
                    break CloseReason::SendFailed;
                }
            }
        }
    };

    if reason == CloseReason::Shutdown {
        if let Err(e) = writer.close().await {
            debug!("Closing connection to client {} failed: {}", identity, e);
        }
    }
    relay.disconnect(identity, reason).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_relay(ghost_policy: GhostPolicy) -> Relay {
        Relay {
            registry: PlayerRegistry::shared(),
            clients: Arc::new(RwLock::new(ClientManager::new(8))),
            config: Arc::new(HostConfig::default().with_ghost_policy(ghost_policy)),
        }
    }

    async fn register(relay: &Relay, queue: usize) -> (Identity, mpsc::Receiver<Bytes>) {
        let mut clients = relay.clients.write().await;
        let identity = clients.next_identity().unwrap();
        let (tx, rx) = mpsc::channel(queue);
        assert!(clients.register(
            identity,
            "127.0.0.1:53000".parse().unwrap(),
            tx,
            CancellationToken::new()
        ));
        drop(clients);

        relay
            .registry
            .write()
            .await
            .insert_spawn(identity, Position::spawn());
        (identity, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            messages.push(Message::decode(&frame).unwrap());
        }
        messages
    }

    fn position_frame(identity: Identity, x: f32, y: f32) -> Vec<u8> {
        Message::Position { identity, x, y }.encode().unwrap()
    }

    #[tokio::test]
    async fn test_position_excludes_sender() {
        let relay = test_relay(GhostPolicy::Retain);
        let (a, mut rx_a) = register(&relay, 16).await;
        let (_b, mut rx_b) = register(&relay, 16).await;

        relay.dispatch(a, &position_frame(a, 5.0, 6.0)).await;

        assert!(drain(&mut rx_a).is_empty());
        let received = drain(&mut rx_b);
        assert_eq!(received.len(), 2);
        assert!(received.contains(&Message::Position {
            identity: a,
            x: 5.0,
            y: 6.0
        }));
    }

    #[tokio::test]
    async fn test_chat_includes_sender() {
        let relay = test_relay(GhostPolicy::Retain);
        let (a, mut rx_a) = register(&relay, 16).await;
        let (_b, mut rx_b) = register(&relay, 16).await;

        let chat = Message::Chat {
            sender: a,
            text: "hello".to_string(),
        };
        relay.dispatch(a, &chat.encode().unwrap()).await;

        assert_eq!(drain(&mut rx_a), vec![chat.clone()]);
        assert_eq!(drain(&mut rx_b), vec![chat]);
    }

    #[tokio::test]
    async fn test_empty_chat_not_broadcast() {
        let relay = test_relay(GhostPolicy::Retain);
        let (a, mut rx_a) = register(&relay, 16).await;

        let chat = Message::Chat {
            sender: a,
            text: String::new(),
        };
        relay.dispatch(a, &chat.encode().unwrap()).await;

        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frame_ignored() {
        let relay = test_relay(GhostPolicy::Retain);
        let (a, mut rx_a) = register(&relay, 16).await;
        let (_b, mut rx_b) = register(&relay, 16).await;

        let frame = position_frame(a, 1.0, 1.0);
        relay.dispatch(a, &frame[..frame.len() - 1]).await;
        relay.dispatch(a, &9u32.to_be_bytes()).await;

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(
            relay.registry.read().await.get(a).unwrap().position,
            Position::spawn()
        );
    }

    #[tokio::test]
    async fn test_impersonation_discarded() {
        let relay = test_relay(GhostPolicy::Retain);
        let (a, _rx_a) = register(&relay, 16).await;
        let (b, mut rx_b) = register(&relay, 16).await;

        relay.dispatch(a, &position_frame(b, 9.0, 9.0)).await;

        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(
            relay.registry.read().await.get(b).unwrap().position,
            Position::spawn()
        );
    }

    #[tokio::test]
    async fn test_full_queue_does_not_abort_broadcast() {
        let relay = test_relay(GhostPolicy::Retain);
        let (a, _rx_a) = register(&relay, 16).await;
        let (b, _rx_b) = register(&relay, 1).await;
        let (_c, mut rx_c) = register(&relay, 16).await;

        relay.dispatch(a, &position_frame(a, 2.0, 3.0)).await;

        assert!(relay.clients.read().await.contains(b));
        assert_eq!(drain(&mut rx_c).len(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_retains_ghost() {
        let relay = test_relay(GhostPolicy::Retain);
        let (a, _rx) = register(&relay, 16).await;

        relay.disconnect(a, CloseReason::ReceiveFailed).await;

        assert!(!relay.clients.read().await.contains(a));
        assert!(relay.registry.read().await.get(a).is_some());
    }

    #[tokio::test]
    async fn test_disconnect_removes_ghost_when_configured() {
        let relay = test_relay(GhostPolicy::Remove);
        let (a, _rx) = register(&relay, 16).await;

        relay.disconnect(a, CloseReason::RemoteClosed).await;

        assert!(!relay.clients.read().await.contains(a));
        assert!(relay.registry.read().await.get(a).is_none());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let first = tokio_test::assert_ok!(
            RelayHost::bind(HostConfig::default().with_bind_addr("127.0.0.1:0")).await
        );
        let taken = first.local_addr().unwrap().to_string();

        let second = RelayHost::bind(HostConfig::default().with_bind_addr(taken)).await;
        assert!(matches!(second, Err(HostError::Bind { .. })));
    }
}
