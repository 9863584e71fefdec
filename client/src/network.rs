//! Relay peer: handshake, periodic sender, receiver and reconnect supervisor

use crate::config::{PeerConfig, ReconnectPolicy};
use crate::world::RemoteWorld;
use log::{debug, error, info, warn};
use shared::{
    clip_chat_text, CodecError, Connection, ConnectionReader, ConnectionWriter, Handshake,
    Identity, Message, Position, TransportError,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid handshake: {0}")]
    Handshake(#[from] CodecError),
    #[error("not connected to a relay host")]
    NotConnected,
    #[error("peer tasks are already running")]
    AlreadyRunning,
    #[error("chat queue is full")]
    ChatQueueFull,
}

/// State shared between the peer handle and its background tasks
struct PeerShared {
    world: RwLock<RemoteWorld>,
    local_position: RwLock<Position>,
    identity: RwLock<Option<Identity>>,
    state: watch::Sender<ConnectionState>,
    chat_tx: RwLock<Option<mpsc::Sender<String>>>,
}

impl PeerShared {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

/// Connects to the host and waits for the handshake frame
async fn establish(config: &PeerConfig) -> Result<(Connection, Identity), PeerError> {
    let limit = config.connect_timeout;

    let mut connection = tokio::time::timeout(limit, Connection::connect(&config.server_addr))
        .await
        .map_err(|_| TransportError::Timeout(limit))??;

    let frame = connection.receive_timeout(limit).await?;
    let handshake = Handshake::decode(&frame)?;

    Ok((connection, handshake.identity))
}

/// Client side of the relay
///
/// `connect` performs the handshake; `run` starts the sender and receiver
/// tasks under a supervisor that also applies the reconnect policy.
pub struct RelayPeer {
    config: PeerConfig,
    shared: Arc<PeerShared>,
    pending: Option<Connection>,
    shutdown: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl RelayPeer {
    /// Creates a disconnected peer
    ///
    /// Nothing touches the network until `connect` is called. The local
    /// position starts at `config.start_position`.
    pub fn new(config: PeerConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(PeerShared {
            world: RwLock::new(RemoteWorld::new()),
            local_position: RwLock::new(config.start_position),
            identity: RwLock::new(None),
            state,
            chat_tx: RwLock::new(None),
        });

        RelayPeer {
            config,
            shared,
            pending: None,
            shutdown: CancellationToken::new(),
            supervisor: None,
        }
    }

    /// Connects and learns this peer's identity
    ///
    /// On failure the peer is left `Disconnected`; nothing is retried here.
    ///
    /// A peer whose previous session has ended can connect again; it takes
    /// the new identity the host hands out and starts with empty caches.
    pub async fn connect(&mut self) -> Result<Identity, PeerError> {
        self.reap_supervisor().await?;

        info!("Connecting to {}...", self.config.server_addr);
        self.shared.set_state(ConnectionState::Connecting);

        match establish(&self.config).await {
            Ok((connection, identity)) => {
                info!("Connected to {}! Assigned identity {}", connection.peer_addr(), identity);
                self.shared.world.write().await.reset();
                *self.shared.identity.write().await = Some(identity);
                self.pending = Some(connection);
                self.shared.set_state(ConnectionState::Connected);
                Ok(identity)
            }
            Err(e) => {
                error!("Error connecting to {}: {}", self.config.server_addr, e);
                self.shared.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Starts the sender and receiver tasks for the connection made by `connect`.
    pub fn run(&mut self) -> Result<(), PeerError> {
        if self
            .supervisor
            .as_ref()
            .is_some_and(|supervisor| !supervisor.is_finished())
        {
            return Err(PeerError::AlreadyRunning);
        }
        self.supervisor = None;
        let connection = self.pending.take().ok_or(PeerError::NotConnected)?;

        self.supervisor = Some(tokio::spawn(supervise(
            self.config.clone(),
            Arc::clone(&self.shared),
            connection,
            self.shutdown.clone(),
        )));
        Ok(())
    }

    /// Queues a chat message for the sender task. Text is clipped to the
    /// chat length limit.
    pub async fn send_chat_message(&self, text: &str) -> Result<(), PeerError> {
        let chat_tx = self.shared.chat_tx.read().await.clone();
        let Some(chat_tx) = chat_tx else {
            return Err(PeerError::NotConnected);
        };

        chat_tx
            .try_send(clip_chat_text(text).to_string())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PeerError::ChatQueueFull,
                mpsc::error::TrySendError::Closed(_) => PeerError::NotConnected,
            })
    }

    /// Position the sender task reports on every tick
    pub async fn set_local_position(&self, position: Position) {
        *self.shared.local_position.write().await = position;
    }

    /// Position the next tick will report
    pub async fn local_position(&self) -> Position {
        *self.shared.local_position.read().await
    }

    /// Copy of the latest position seen for each identity
    ///
    /// Positions stay cached after their owners disconnect, matching the
    /// host's ghost records. The cache is emptied on (re)connect.
    pub async fn get_player_positions(&self) -> HashMap<Identity, Position> {
        self.shared.world.read().await.positions().clone()
    }

    /// Copy of the chat lines received so far, grouped by sender
    ///
    /// Lines accumulate until `clear_received_messages` or
    /// `take_received_messages` is called.
    pub async fn get_player_chat_messages(&self) -> HashMap<Identity, Vec<String>> {
        self.shared.world.read().await.chat_messages().clone()
    }

    /// Drops every cached chat line
    pub async fn clear_received_messages(&self) {
        self.shared.world.write().await.clear_chat();
    }

    /// Takes the chat cache in one step, so nothing arriving between a read
    /// and a clear is lost.
    pub async fn take_received_messages(&self) -> HashMap<Identity, Vec<String>> {
        let mut world = self.shared.world.write().await;
        let messages = world.chat_messages().clone();
        world.clear_chat();
        messages
    }

    /// Identity assigned by the most recent successful handshake
    pub async fn identity(&self) -> Option<Identity> {
        *self.shared.identity.read().await
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch receiver for connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Stops all background tasks and waits for them to finish.
    ///
    /// The peer is left `Disconnected` and may `connect` again afterwards.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(e) = supervisor.await {
                error!("Peer supervisor panicked: {}", e);
            }
        }
        self.pending = None;
        self.shutdown = CancellationToken::new();
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Clears out a supervisor whose sessions have all ended.
    ///
    /// Fails with `AlreadyRunning` while it is still driving a session or
    /// waiting to reconnect. Without a reconnect policy a `Disconnected`
    /// supervisor is only returning, so it is joined instead.
    async fn reap_supervisor(&mut self) -> Result<(), PeerError> {
        let winding_down = self.config.reconnect == ReconnectPolicy::Never
            && self.state() == ConnectionState::Disconnected;

        match self.supervisor.take() {
            Some(supervisor) if !supervisor.is_finished() && !winding_down => {
                self.supervisor = Some(supervisor);
                Err(PeerError::AlreadyRunning)
            }
            Some(supervisor) => {
                if let Err(e) = supervisor.await {
                    error!("Peer supervisor panicked: {}", e);
                }
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for RelayPeer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Runs sessions back to back, reconnecting per the configured policy
async fn supervise(
    config: PeerConfig,
    shared: Arc<PeerShared>,
    connection: Connection,
    shutdown: CancellationToken,
) {
    let mut next = Some(connection);

    while let Some(connection) = next.take() {
        let Some(identity) = *shared.identity.read().await else {
            break;
        };

        run_session(&config, &shared, connection, identity, &shutdown).await;

        if shutdown.is_cancelled() {
            break;
        }
        warn!("Lost connection to {}", config.server_addr);
        shared.set_state(ConnectionState::Disconnected);

        next = reconnect(&config, &shared, &shutdown).await;
    }

    shared.set_state(ConnectionState::Disconnected);
}

/// Retries `establish` with backoff until it succeeds or the policy gives up
async fn reconnect(
    config: &PeerConfig,
    shared: &PeerShared,
    shutdown: &CancellationToken,
) -> Option<Connection> {
    let mut attempt = 0;

    while let Some(delay) = config.reconnect.delay(attempt) {
        debug!("Reconnect attempt {} in {:?}", attempt + 1, delay);
        tokio::select! {
            _ = shutdown.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        shared.set_state(ConnectionState::Connecting);
        match establish(config).await {
            Ok((connection, identity)) => {
                info!("Reconnected with identity {}", identity);
                shared.world.write().await.reset();
                *shared.identity.write().await = Some(identity);
                shared.set_state(ConnectionState::Connected);
                return Some(connection);
            }
            Err(e) => {
                warn!("Reconnect attempt {} failed: {}", attempt + 1, e);
                shared.set_state(ConnectionState::Disconnected);
            }
        }
        attempt += 1;
    }

    None
}

/// One connected period: a sender and a receiver task until either stops
async fn run_session(
    config: &PeerConfig,
    shared: &Arc<PeerShared>,
    connection: Connection,
    identity: Identity,
    shutdown: &CancellationToken,
) {
    let session = shutdown.child_token();
    let (reader, writer) = connection.into_split();
    let (chat_tx, chat_rx) = mpsc::channel(config.chat_queue);
    *shared.chat_tx.write().await = Some(chat_tx);

    let sender = tokio::spawn(send_loop(
        writer,
        chat_rx,
        Arc::clone(shared),
        identity,
        config.send_interval,
        session.clone(),
    ));
    let receiver = tokio::spawn(receive_loop(reader, Arc::clone(shared), session.clone()));

    let (sent, received) = tokio::join!(sender, receiver);
    for result in [sent, received] {
        if let Err(e) = result {
            error!("Peer task panicked: {}", e);
        }
    }

    *shared.chat_tx.write().await = None;
}

/// Sends the local position every tick, whether or not it changed, and
/// forwards queued chat messages.
async fn send_loop(
    mut writer: ConnectionWriter,
    mut chat_rx: mpsc::Receiver<String>,
    shared: Arc<PeerShared>,
    identity: Identity,
    send_interval: std::time::Duration,
    session: CancellationToken,
) {
    let _stop_session = session.clone().drop_guard();

    let mut ticker = interval(send_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let message = tokio::select! {
            _ = session.cancelled() => {
                if let Err(e) = writer.close().await {
                    debug!("Closing connection to server failed: {}", e);
                }
                break;
            }
            _ = ticker.tick() => {
                let position = *shared.local_position.read().await;
                Message::Position { identity, x: position.x, y: position.y }
            }
            Some(text) = chat_rx.recv() => Message::Chat { sender: identity, text },
        };

        if let Err(e) = writer.send_message(&message).await {
            error!("Failed to send to server: {}", e);
            break;
        }
    }
}

/// Applies every inbound message to the shared caches
///
/// Each pass waits for one frame, then drains whatever else is already
/// buffered so a burst is applied under a single lock.
async fn receive_loop(
    mut reader: ConnectionReader,
    shared: Arc<PeerShared>,
    session: CancellationToken,
) {
    let _stop_session = session.clone().drop_guard();

    loop {
        let first = tokio::select! {
            _ = session.cancelled() => break,
            frame = reader.receive() => frame,
        };

        let mut frames = Vec::new();
        let mut failure = None;
        match first {
            Ok(frame) => frames.push(frame),
            Err(e) => failure = Some(e),
        }
        while failure.is_none() {
            match reader.try_receive() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(e) => failure = Some(e),
            }
        }
        if failure.as_ref().is_some_and(TransportError::is_recoverable) {
            if let Some(e) = failure.take() {
                warn!("Discarding message from server: {}", e);
            }
        }

        if !frames.is_empty() {
            let mut world = shared.world.write().await;
            for frame in &frames {
                match Message::decode(frame) {
                    Ok(message) => world.apply(message),
                    Err(e) => warn!("Discarding message from server: {}", e),
                }
            }
        }

        match failure {
            None => {}
            Some(TransportError::Closed) => {
                info!("Server closed the connection");
                break;
            }
            Some(e) => {
                error!("Error receiving from server: {}", e);
                break;
            }
        }
    }
}
