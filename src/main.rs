use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_publisher::capture::{CaptureBackend, CaptureSourceManager, SyntheticBackend, V4l2Backend};
use live_publisher::config::{AppConfig, CaptureBackendKind, ConfigOverrides, ConfigStore};
use live_publisher::events::EventBus;
use live_publisher::session::{SessionController, SessionDeps, SessionSettings};
use live_publisher::state::AppState;
use live_publisher::web;
use live_publisher::webrtc::{default_encoder_factory, PeerSettings, RtcPeerConnector, WhipClient};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// live-publisher command line arguments
#[derive(Parser, Debug)]
#[command(name = "live-publisher")]
#[command(version, about = "Publish camera, screen or picture-in-picture to a WHIP ingest", long_about = None)]
struct CliArgs {
    /// Configuration file (TOML, created with defaults when missing)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// WHIP ingest base URL (overrides config)
    #[arg(long, value_name = "URL")]
    ingest_url: Option<String>,

    /// Stream key (overrides config)
    #[arg(long, value_name = "KEY")]
    stream_key: Option<String>,

    /// Use the synthetic capture backend regardless of config
    #[arg(long)]
    synthetic: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting live-publisher v{}", env!("CARGO_PKG_VERSION"));

    // CLI overrides apply at runtime only and are never persisted
    let overrides = ConfigOverrides {
        bind_address: args.address,
        http_port: args.http_port,
        ingest_url: args.ingest_url,
        stream_key: args.stream_key,
        capture_backend: args.synthetic.then_some(CaptureBackendKind::Synthetic),
    };
    let config_store = match &args.config {
        Some(path) => {
            tracing::info!("Config file: {}", path.display());
            ConfigStore::open(path).await?
        }
        None => ConfigStore::in_memory(AppConfig::default()),
    }
    .with_overrides(overrides);
    let config = config_store.get();

    if config.ingest.base_url.is_empty() || config.ingest.stream_key.is_empty() {
        tracing::warn!("Ingest URL or stream key not configured; start requests will be rejected");
    }

    let backend: Arc<dyn CaptureBackend> = match config.capture.backend {
        CaptureBackendKind::Synthetic => Arc::new(SyntheticBackend::new()),
        CaptureBackendKind::V4l2 => Arc::new(V4l2Backend::new(&config.capture.camera_device)),
    };
    let capture_backend = backend.name().to_string();
    tracing::info!("Capture backend: {}", capture_backend);

    let (capture, source_events) = CaptureSourceManager::new(backend);
    let encoders = default_encoder_factory();
    let encoder = encoders.name().to_string();
    tracing::info!("Video encoder: {}", encoder);

    let peer_settings = PeerSettings {
        ice_gathering_timeout: Duration::from_millis(config.webrtc.ice_gathering_timeout_ms),
        output: config.capture.resolution.resolution(),
        fps: config.capture.fps,
        bitrate_kbps: config.webrtc.bitrate_kbps,
    };
    let connector = Arc::new(RtcPeerConnector::new(peer_settings, encoders));
    let ingest = Arc::new(WhipClient::new(Duration::from_millis(config.ingest.timeout_ms))?);
    let events = Arc::new(EventBus::new());

    let session = SessionController::spawn(SessionDeps {
        capture: Arc::new(capture),
        source_events,
        connector,
        ingest,
        events: events.clone(),
        settings: SessionSettings::from_config(&config),
    });

    // Settings edited through the API reach the controller via the store
    let config_watcher = session.follow_config(config_store.clone());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let state = AppState::new(
        config_store,
        session.clone(),
        events,
        capture_backend,
        encoder,
        shutdown_tx.clone(),
    );
    let app = web::create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.web.bind_address, config.web.http_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on: http://{}", addr);

    // Setup graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    config_watcher.abort();
    if let Err(e) = session.stop().await {
        tracing::warn!("Failed to stop session: {}", e);
    }
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "live_publisher=error,tower_http=error",
        LogLevel::Warn => "live_publisher=warn,tower_http=warn",
        LogLevel::Info => "live_publisher=info,tower_http=info",
        LogLevel::Verbose => "live_publisher=debug,tower_http=info",
        LogLevel::Debug => "live_publisher=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "live_publisher=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
