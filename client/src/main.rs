use clap::Parser;
use client::chat::ChatFeed;
use client::config::{PeerConfig, ReconnectPolicy};
use client::network::RelayPeer;
use log::{info, warn};
use shared::Position;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay host address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:53000")]
    server: String,

    /// Milliseconds between position updates
    #[arg(short = 'i', long, default_value = "100")]
    send_interval_ms: u64,

    /// Reconnect with backoff after losing the connection
    #[arg(short = 'r', long)]
    reconnect: bool,
}

/// Headless peer: walks in a circle, sends stdin lines as chat and prints
/// chat received from the relay.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = PeerConfig::default()
        .with_server_addr(args.server)
        .with_send_interval(Duration::from_millis(args.send_interval_ms))
        .with_reconnect(if args.reconnect {
            ReconnectPolicy::backoff()
        } else {
            ReconnectPolicy::Never
        });

    let mut peer = RelayPeer::new(config);
    let identity = peer.connect().await?;
    peer.run()?;

    info!("Playing as player {}. Type a line and press enter to chat.", identity);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut frame = interval(Duration::from_millis(16));
    let mut feed = ChatFeed::default();
    let started = Instant::now();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(text)) if !text.trim().is_empty() => {
                    if let Err(e) = peer.send_chat_message(text.trim()).await {
                        warn!("Chat not sent: {}", e);
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            },

            _ = frame.tick() => {
                let t = started.elapsed().as_secs_f32();
                peer.set_local_position(Position::new(
                    400.0 + 150.0 * t.cos(),
                    300.0 + 150.0 * t.sin(),
                ))
                .await;

                let now = Instant::now();
                if feed.ingest(peer.take_received_messages().await, now) > 0 {
                    let local = peer.identity().await;
                    for line in feed.visible(now, local) {
                        println!("{}", line);
                    }
                }
            },

            _ = tokio::signal::ctrl_c() => break,
        }

        if !peer.is_connected() && !args.reconnect {
            warn!("Disconnected from relay");
            break;
        }
    }

    peer.shutdown().await;
    Ok(())
}
