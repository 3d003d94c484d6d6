use azure_relay::config::{config_search_paths, ConfigSource};
use azure_relay::forward::build_client;
use azure_relay::{build_router, AppState, AzurePipeline, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "azure-relay",
    about = "Chat-completion relay for Azure OpenAI deployments",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log file path
    #[arg(long, default_value = "azure-relay.log")]
    log_file: PathBuf,

    /// Read only the config file, ignoring AZURE_OPENAI_* variables
    #[arg(long, requires = "config")]
    ignore_env: bool,

    /// Dotenv file to load before reading the environment
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "azure_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        println!("Environment variables AZURE_OPENAI_* override file values.");
        return Ok(());
    }

    match cli.env_file {
        Some(ref path) => {
            dotenvy::from_path(path)?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let config_source = match cli.config {
        Some(ref path) if cli.ignore_env => ConfigSource::FileOnly(path.clone()),
        _ => ConfigSource::Layered(cli.config.clone()),
    };
    let mut config = config_source.load()?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    let logger = SharedLogger::new(&cli.log_file)?;
    let client = build_client(Duration::from_secs(config.azure.timeout_secs))?;
    let pipeline = AzurePipeline::new(config.azure.clone(), client, logger.clone());

    info!("azure-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("  Endpoint:     {}", config.azure.endpoint);
    info!("  API version:  {}", config.azure.api_version);
    info!("  Deployments:  {}", pipeline.deployments().len());
    info!("  Port:         {}", config.port);
    info!("  Log file:     {}", cli.log_file.display());

    pipeline.on_startup();

    let state = Arc::new(AppState {
        pipeline,
        logger,
        config_source,
    });

    spawn_reload_on_hangup(state.clone());

    let app = build_router(state.clone());
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.pipeline.on_shutdown();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(unix)]
fn spawn_reload_on_hangup(state: Arc<AppState>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!("SIGHUP reload disabled: {}", e);
                return;
            }
        };
        while hangup.recv().await.is_some() {
            if let Err(e) = state.reload() {
                warn!("Reload failed, keeping previous configuration: {}", e);
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_state: Arc<AppState>) {}
