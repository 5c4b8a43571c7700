use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tagstream_server::{cli::Cli, config::ServerConfig, create_router, state::ServerState};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tagstream_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }

    info!("Starting tagstream server v{}", VERSION);
    info!("   Port: {}", config.port);
    info!("   Bind address: {}", config.bind_addr);
    info!("   Batch period: {:?}", config.batch_period);
    info!("   Max rate: {} tags/s", config.max_rate);
    info!("   Max taggers: {}", config.max_taggers);

    let state = Arc::new(ServerState::new(config.clone()));
    let app = create_router(state.clone());

    let addr: SocketAddr = config.bind_address().parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
        })
        .await?;

    // Delivery threads are joined here, off the async runtime
    let cleanup = state.clone();
    tokio::task::spawn_blocking(move || cleanup.shutdown()).await?;

    Ok(())
}
