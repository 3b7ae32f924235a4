use clap::Parser;
use client::driver::{GameLoop, LoopExit};
use client::input::Autopilot;
use client::network::UdpStore;
use client::session::Session;
use client::store::{MemoryStore, RemoteStore};
use log::{error, info};
use shared::GameConfig;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Store server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Play against an in-process store instead of a server
    #[arg(long)]
    local: bool,

    /// Display name of the snake
    #[arg(short = 'n', long, default_value = "player")]
    name: String,

    /// Frames per second
    #[arg(short = 'f', long, default_value = "60")]
    fps: u32,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Minimum interval between state pushes in milliseconds
    #[arg(long, default_value = "100")]
    push_ms: u64,

    /// Width and height of the square world
    #[arg(long, default_value = "3000")]
    world: f32,
}

async fn play<S: RemoteStore>(
    store: Arc<S>,
    config: GameConfig,
    args: &Args,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut session, handle) = Session::new(store, config);
    session.start(&args.name).await?;

    let mut score_rx = handle.score;
    let score_watch = tokio::spawn(async move {
        let mut best = 0.0f32;
        while score_rx.changed().await.is_ok() {
            let score = *score_rx.borrow();
            if score >= best + 5.0 {
                best = score;
                info!("Score {:.0}", score);
            }
        }
    });

    let mut autopilot = Autopilot::new(rand::random());
    let exit = GameLoop::new(args.fps)
        .run(&mut session, &mut autopilot, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    match exit {
        LoopExit::GameOver { final_score } => info!("Game over, final score {:.1}", final_score),
        LoopExit::Shutdown => info!("Left the game with score {:.1}", session.score()),
        LoopExit::Stopped => error!("Session stopped unexpectedly"),
    }
    info!(
        "Pushed {} updates, left {} trail particles",
        session.pushes(),
        session.particles_emitted()
    );

    drop(session);
    score_watch.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = GameConfig {
        world_width: args.world,
        world_height: args.world,
        push_interval: Duration::from_millis(args.push_ms),
        ..GameConfig::default()
    };

    info!("Starting client as {}", args.name);
    if args.local {
        info!("Using an in-process store");
        play(Arc::new(MemoryStore::new()), config, &args).await
    } else {
        info!("Connecting to: {}", args.server);
        if args.fake_ping > 0 {
            info!("Simulating {}ms latency", args.fake_ping);
        }
        let store = UdpStore::connect(&args.server, args.fake_ping).await?;
        play(Arc::new(store), config, &args).await
    }
}
