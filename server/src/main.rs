use clap::Parser;
use log::info;
use server::network::{Server, ServerMessage};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of peers
    #[arg(short, long, default_value = "64")]
    max_peers: usize,

    /// Delete snakes that have not pushed for this many seconds (0 disables)
    #[arg(short, long, default_value = "30")]
    stale_secs: u64,

    /// Seconds of silence before a peer stops receiving changes
    #[arg(long, default_value = "5")]
    peer_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let address = format!("{}:{}", args.host, args.port);
    let stale_after = (args.stale_secs > 0).then(|| Duration::from_secs(args.stale_secs));

    info!("Starting store server on {}", address);
    info!("Max peers: {}", args.max_peers);
    match stale_after {
        Some(age) => info!("Reaping snakes silent for {:?}", age),
        None => info!("Stale snake reaping disabled"),
    }

    let mut server = Server::new(&address, args.max_peers, stale_after)
        .await?
        .with_peer_timeout(Duration::from_secs(args.peer_timeout));

    let control = server.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            let _ = control.send(ServerMessage::Shutdown);
        }
    });

    server.run().await;

    Ok(())
}
