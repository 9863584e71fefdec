//! Active connection set and identity allocation for the relay host
//!
//! This module tracks which peers currently hold a live connection:
//! - Identity allocation (strictly increasing from 1, never reused)
//! - Capacity enforcement for concurrent connections
//! - Per-connection outbound queues used by broadcasts
//! - Per-connection cancellation for deterministic teardown
//!
//! Removing a connection here never touches the player registry; whether a
//! record outlives its connection is decided by the host's ghost policy.

use log::info;
use shared::Identity;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// A live connection as seen by the broadcaster
///
/// The handler task owns the transport itself; this entry only carries what
/// other tasks need to reach it.
#[derive(Debug)]
pub struct ActiveConnection {
    /// Identity assigned during the handshake
    pub identity: Identity,
    /// Remote address, for logs
    pub addr: SocketAddr,
    /// When the handshake completed
    pub connected_at: Instant,
    /// Frames queued here are written by the connection's handler
    pub outbound: mpsc::Sender<Bytes>,
    /// Cancelling this ends the handler task
    pub cancel: CancellationToken,
}

/// Manages the active connection set
pub struct ClientManager {
    /// Live connections indexed by identity
    connections: HashMap<Identity, ActiveConnection>,
    /// Identity the next successful handshake will receive
    next_identity: Identity,
    /// Maximum number of concurrent connections allowed
    max_connections: usize,
}

impl ClientManager {
    /// Creates an empty manager. Identities start at 1.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            next_identity: 1,
            max_connections,
        }
    }

    /// Identity a new connection would be assigned, or None when at capacity
    ///
    /// Does not consume the identity; [`ClientManager::register`] does, once
    /// the handshake has actually been delivered.
    pub fn next_identity(&self) -> Option<Identity> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.next_identity)
    }

    /// Adds a connection under the identity returned by `next_identity`
    ///
    /// Returns false, without registering anything, if `identity` is not the
    /// one currently up for allocation.
    pub fn register(
        &mut self,
        identity: Identity,
        addr: SocketAddr,
        outbound: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> bool {
        if identity != self.next_identity || self.connections.len() >= self.max_connections {
            return false;
        }
        self.next_identity += 1;

        info!("Client {} connected from {}", identity, addr);
        self.connections.insert(
            identity,
            ActiveConnection {
                identity,
                addr,
                connected_at: Instant::now(),
                outbound,
                cancel,
            },
        );
        true
    }

    /// Removes a connection from the active set
    ///
    /// Returns true if it was present. The connection's cancellation token is
    /// triggered so a handler that is still running winds down.
    pub fn remove(&mut self, identity: Identity) -> bool {
        if let Some(connection) = self.connections.remove(&identity) {
            connection.cancel.cancel();
            info!(
                "Client {} disconnected after {:.1}s",
                identity,
                connection.connected_at.elapsed().as_secs_f32()
            );
            true
        } else {
            false
        }
    }

    /// Checks whether `identity` has a live connection
    pub fn contains(&self, identity: Identity) -> bool {
        self.connections.contains_key(&identity)
    }

    /// Identities of all live connections, ascending
    pub fn identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> = self.connections.keys().copied().collect();
        identities.sort_unstable();
        identities
    }

    /// Outbound queues for a broadcast, optionally skipping one identity
    ///
    /// The senders are cloned so the caller can release the lock before
    /// queueing anything.
    pub fn outbound_targets(
        &self,
        exclude: Option<Identity>,
    ) -> Vec<(Identity, mpsc::Sender<Bytes>)> {
        self.connections
            .values()
            .filter(|connection| Some(connection.identity) != exclude)
            .map(|connection| (connection.identity, connection.outbound.clone()))
            .collect()
    }

    /// Signals every handler to stop. Entries are removed by the handlers.
    pub fn cancel_all(&self) {
        for connection in self.connections.values() {
            connection.cancel.cancel();
        }
    }

    /// Configured connection cap
    ///
    /// Once this many connections are active, `next_identity` returns None.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Returns the number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns true if no connections are live
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
