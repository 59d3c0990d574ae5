use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use projector::{
    identity, ControllerSettings, EngineHandle, MpvEngine, MpvSettings, NodeRuntime, NodeSettings,
    PlaybackController, SharedClock, SimulatedEngine,
};
use reelconf::{EngineKind, ReelConfig};
use reelproto::{Bus, MediaLibrary, ZmqBus, ZmqRole, ZmqTiming};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Length of a simulated video.
const SIMULATED_MEDIA_LENGTH: Duration = Duration::from_secs(30);

/// Playback node for synchronized multi-screen playback
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (replaces ./reel.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node (default)
    Run {
        /// Fixed node id, overrides [player].node_id
        #[arg(long)]
        node_id: Option<String>,

        /// Media engine: mpv or simulated
        #[arg(long)]
        engine: Option<EngineKind>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut config, sources) = ReelConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Run {
        node_id: None,
        engine: None,
    }) {
        Command::Config => {
            for file in &sources.files {
                println!("# loaded: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env: {}", var);
            }
            print!("{}", config.to_toml());
            Ok(())
        }
        Command::Run { node_id, engine } => {
            if let Some(node_id) = node_id {
                config.player.node_id = node_id;
            }
            if let Some(engine) = engine {
                config.player.engine = engine;
            }
            run(config).await
        }
    }
}

async fn run(config: ReelConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.telemetry.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let node_id = identity::resolve_node_id(Some(&config.player.node_id), &config.paths.state_dir)
        .context("Failed to determine node id")?;

    let library = wait_for_media(
        &config.paths.media_dir,
        Duration::from_millis(config.player.media_wait_ms),
    )
    .await;
    tracing::info!(
        node.id = %node_id,
        "📼 {} videos in {}",
        library.len(),
        config.paths.media_dir.display()
    );

    let bus: Arc<dyn Bus> = Arc::new(
        ZmqBus::open(
            ZmqRole::Spoke {
                publish: config.hub.publish.clone(),
                subscribe: config.hub.subscribe.clone(),
            },
            ZmqTiming::default(),
        )
        .await
        .context("Failed to open bus")?,
    );

    let (loop_engine, manual_engine) = engines(&config).await?;
    let clock = SharedClock::default();
    let controller = Arc::new(PlaybackController::new(
        node_id,
        bus.clone(),
        library,
        clock.clone(),
        loop_engine,
        manual_engine,
        ControllerSettings::from_timing(&config.timing),
    ));

    let shutdown = CancellationToken::new();
    let runtime = NodeRuntime::new(
        bus,
        controller,
        clock,
        NodeSettings::from_timing(&config.timing),
    );
    let node = tokio::spawn(runtime.run(shutdown.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, shutting down...");
        }
        _ = terminate() => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
    shutdown.cancel();

    match node.await {
        Ok(Err(e)) => tracing::error!("Node stopped with error: {}", e),
        Err(e) => tracing::error!("Node task failed: {}", e),
        Ok(Ok(())) => {}
    }
    Ok(())
}

async fn engines(config: &ReelConfig) -> Result<(EngineHandle, EngineHandle)> {
    match config.player.engine {
        EngineKind::Simulated => Ok((
            Arc::new(SimulatedEngine::new("loop", SIMULATED_MEDIA_LENGTH)),
            Arc::new(SimulatedEngine::new("manual", SIMULATED_MEDIA_LENGTH)),
        )),
        EngineKind::Mpv => {
            let settings = |socket: &str| MpvSettings {
                binary: config.player.mpv_binary.clone(),
                args: config.player.mpv_args.clone(),
                socket_path: config.player.socket_dir.join(socket),
                startup_timeout: config.timing.engine_start_timeout(),
            };
            let looping = MpvEngine::launch("loop", &settings("reel-loop.sock"))
                .await
                .context("Failed to start loop player")?;
            let manual = MpvEngine::launch("manual", &settings("reel-manual.sock"))
                .await
                .context("Failed to start manual player")?;
            Ok((Arc::new(looping), Arc::new(manual)))
        }
    }
}

/// USB media may mount after boot; give it a moment before starting empty.
async fn wait_for_media(root: &Path, patience: Duration) -> MediaLibrary {
    let deadline = Instant::now() + patience;
    loop {
        match MediaLibrary::scan(root) {
            Ok(library) => return library,
            Err(e) if Instant::now() >= deadline => {
                tracing::warn!("Starting without media: {}", e);
                return MediaLibrary::empty(root);
            }
            Err(_) => tokio::time::sleep(Duration::from_secs(1)).await,
        }
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
