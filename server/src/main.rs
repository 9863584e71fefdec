use clap::Parser;
use log::{error, info};
use server::config::{GhostPolicy, HostConfig};
use server::network::RelayHost;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = shared::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Maximum number of concurrent connections
    #[arg(short, long, default_value = "64")]
    max_connections: usize,

    /// Delete a player's record when its connection closes
    #[arg(long)]
    remove_ghosts: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = HostConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_connections: args.max_connections,
        ghost_policy: if args.remove_ghosts {
            GhostPolicy::Remove
        } else {
            GhostPolicy::Retain
        },
        ..HostConfig::default()
    };

    let host = RelayHost::bind(config).await?;
    let shutdown = CancellationToken::new();

    let ctrl_c = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.cancel();
        })
    };

    host.run(shutdown).await?;
    ctrl_c.abort();

    Ok(())
}
