use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use marquee::{telemetry, web, Coordinator, CoordinatorSettings};
use reelconf::ReelConfig;
use reelproto::{Bus, MediaLibrary, ZmqBus, ZmqRole, ZmqTiming};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Coordinator for synchronized multi-screen playback
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
    /// Run the coordinator (default)
    Serve {
        /// HTTP port, overrides [bind].http_port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut config, sources) = ReelConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command.unwrap_or(Command::Serve { port: None }) {
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
        Command::Serve { port } => {
            if let Some(port) = port {
                config.bind.http_port = port;
            }
            serve(config).await
        }
    }
}

async fn serve(config: ReelConfig) -> Result<()> {
    telemetry::init(&config.telemetry).context("Failed to initialize telemetry")?;

    let library = MediaLibrary::scan(&config.paths.media_dir).unwrap_or_else(|e| {
        tracing::warn!("Media directory not readable yet: {}", e);
        MediaLibrary::empty(&config.paths.media_dir)
    });
    tracing::info!(
        "📼 {} videos in {}",
        library.len(),
        config.paths.media_dir.display()
    );

    let bus: Arc<dyn Bus> = Arc::new(
        ZmqBus::open(
            ZmqRole::Hub {
                publish: config.bind.bus_publish.clone(),
                subscribe: config.bind.bus_subscribe.clone(),
            },
            ZmqTiming::default(),
        )
        .await
        .context("Failed to open bus")?,
    );

    let coordinator = Arc::new(Coordinator::new(
        bus,
        library,
        CoordinatorSettings::from_timing(&config.timing),
    ));

    let shutdown = CancellationToken::new();

    let runner = tokio::spawn(coordinator.clone().run(shutdown.clone()));

    let app = web::router(web::WebState::new(coordinator.clone()));
    let addr = format!("0.0.0.0:{}", config.bind.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("🌐 Control API on http://{}", addr);

    let server_shutdown = shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_shutdown.cancelled().await;
    });
    tokio::spawn(async move {
        if let Err(e) = server.await {
            tracing::error!("Server shutdown with error: {:?}", e);
        }
    });

    // Handle both SIGINT (Ctrl+C) and SIGTERM (systemd)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, shutting down...");
        }
        _ = terminate() => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
    shutdown.cancel();

    match runner.await {
        Ok(Err(e)) => tracing::error!("Coordinator stopped with error: {}", e),
        Err(e) => tracing::error!("Coordinator task failed: {}", e),
        Ok(Ok(())) => {}
    }

    telemetry::shutdown();
    Ok(())
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
