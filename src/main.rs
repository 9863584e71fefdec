//! Single entry point choosing the relay role from the environment.
//!
//! `DO_SERVER=1` (or `doServer=1`) runs the host on the default port;
//! anything else runs a peer against it. The dedicated `server` and `client`
//! binaries expose the full set of flags.

use client::config::PeerConfig;
use client::network::RelayPeer;
use log::{error, info};
use server::config::HostConfig;
use server::network::RelayHost;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ROLE_VARS: [&str; 2] = ["DO_SERVER", "doServer"];

fn host_role_selected() -> bool {
    host_role_selected_by(|name| std::env::var(name).ok())
}

fn host_role_selected_by(lookup: impl Fn(&str) -> Option<String>) -> bool {
    ROLE_VARS
        .iter()
        .any(|name| lookup(name).is_some_and(|value| value.trim() == "1"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down gracefully...");
            }
            shutdown.cancel();
        });
    }

    if host_role_selected() {
        let host = RelayHost::bind(HostConfig::default()).await?;
        host.run(shutdown).await?;
        return Ok(());
    }

    let mut peer = RelayPeer::new(PeerConfig::default());
    if let Err(e) = peer.connect().await {
        error!("Could not join the relay: {}", e);
        return Err(e.into());
    }
    peer.run()?;

    let mut report = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = report.tick() => {
                if !peer.is_connected() {
                    break;
                }
                let positions = peer.get_player_positions().await;
                info!("{} players known", positions.len());
            }
        }
    }

    peer.shutdown().await;
    Ok(())
}
