//! # Relay Host Library
//!
//! This library provides the authoritative host for the position/chat relay.
//! It accepts stream connections from peers, hands each one a unique identity,
//! keeps the last known position of every player, and fans position and chat
//! updates out to the other connected peers.
//!
//! ## Core Responsibilities
//!
//! ### Identity Assignment
//! Every accepted connection receives an identity in a one-off handshake
//! frame. Identities start at 1, increase strictly and are never reused, even
//! after the owning connection is gone.
//!
//! ### Player Registry
//! The registry maps identities to positions. All mutation is serialized
//! through a single write lock, and broadcasts read a snapshot copy so fan-out
//! never iterates live state.
//!
//! ### Broadcasting
//! - Position updates are followed by a snapshot of the whole registry, sent
//!   to every active connection except the sender.
//! - Chat messages go to every active connection, sender included, so the
//!   sender sees the host's confirmation rather than a local echo.
//!
//! Broadcasts are best effort. Each connection has a bounded outbound queue;
//! a full queue drops that broadcast for that peer and is logged.
//!
//! ## Architecture Design
//!
//! ### One Task Per Connection
//! The accept loop spawns one handler task per connection into a `JoinSet`.
//! The handler owns the transport, reads inbound frames and writes queued
//! outbound frames. A transport failure in either direction ends the handler
//! and removes the connection from the active set. The player's record stays
//! unless [`config::GhostPolicy::Remove`] is configured.
//!
//! ### Shutdown
//! Every handler runs under a child of the host's cancellation token.
//! Cancelling the token stops the accept loop, signals all handlers and joins
//! them before [`network::RelayHost::run`] returns.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Active connection set, identity allocation and capacity limits.
//!
//! ### Registry Module (`registry`)
//! Player records and snapshots.
//!
//! ### Network Module (`network`)
//! Accept loop, handshake, per-connection handlers and fan-out.
//!
//! ### Config Module (`config`)
//! Host settings and the ghost record policy.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::HostConfig;
//! use server::network::RelayHost;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = RelayHost::bind(HostConfig::default()).await?;
//!
//!     // Runs the accept loop until the token is cancelled
//!     host.run(CancellationToken::new()).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod network;
pub mod registry;
