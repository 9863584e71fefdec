//! # Relay Peer Library
//!
//! This library provides the peer side of the position/chat relay. A peer
//! connects to the host, learns its identity from the handshake, reports its
//! own position on a fixed interval and keeps local caches of what the host
//! broadcasts, ready for a rendering loop to read.
//!
//! ## Architecture Overview
//!
//! ### Connection Lifecycle
//! `Disconnected → Connecting → Connected → Disconnected`. Any transport
//! failure ends the session. By default the peer then stays disconnected; a
//! [`config::ReconnectPolicy::Backoff`] makes the supervisor retry with
//! exponential backoff and jitter, taking a fresh identity on success.
//!
//! ### Background Tasks
//! While connected exactly two tasks run alongside the application:
//! - **Sender**: every tick (100ms by default) sends the local position,
//!   changed or not, and forwards queued chat messages.
//! - **Receiver**: waits for inbound frames and drains everything already
//!   buffered into the caches under one lock.
//!
//! Both tasks share a session cancellation token; when either stops the other
//! follows, and [`network::RelayPeer::shutdown`] cancels and joins them.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The [`network::RelayPeer`] handle, its tasks and the reconnect supervisor.
//!
//! ### World Module (`world`)
//! Remote position cache and per-sender chat cache.
//!
//! ### Chat Module (`chat`)
//! Display-side chat feed with a five second window.
//!
//! ### Config Module (`config`)
//! Peer settings and reconnect policy.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::PeerConfig;
//! use client::network::RelayPeer;
//! use shared::Position;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut peer = RelayPeer::new(PeerConfig::default());
//!     peer.connect().await?;
//!     peer.run()?;
//!
//!     peer.set_local_position(Position::new(120.0, 80.0)).await;
//!     peer.send_chat_message("hello").await?;
//!
//!     let others = peer.get_player_positions().await;
//!     println!("{} players visible", others.len());
//!
//!     peer.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod config;
pub mod network;
pub mod world;
