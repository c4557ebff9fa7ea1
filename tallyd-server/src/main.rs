use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tallyd_core::{
    Ingestor, MemoryRegistryStore, PollRegistry, ProofPipeline, RedisRegistryStore,
    RegistryStore, Scheduler,
};
use tallyd_server::clients::{
    HttpProvingEngine, HttpSignatureVerifier, HttpSignerProvider, SubgraphOracle,
};
use tallyd_server::config::Config;
use tallyd_server::routes;
use tallyd_server::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "tallyd-server", version, about = "Poll finalization coordinator")]
struct Cli {
    /// Override SERVER_HOST.
    #[arg(long)]
    host: Option<String>,

    /// Override SERVER_PORT.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,tallyd_server=debug,tallyd_core=debug")
        }))
        .init();

    let mut config = Config::from_env()?;
    if let Some(host) = cli.host {
        config.server_host = host;
    }
    if let Some(port) = cli.port {
        config.server_port = port;
    }

    let settings = config.coordinator_settings();
    settings.validate().context("invalid coordinator settings")?;

    let store: Arc<dyn RegistryStore> = if config.dev_mode {
        info!("DEV_MODE set, using the in-process registry store");
        Arc::new(MemoryRegistryStore::new())
    } else {
        Arc::new(RedisRegistryStore::connect(&config.redis_url).await?)
    };
    let registry = Arc::new(PollRegistry::new(
        store,
        settings.namespace.clone(),
        settings.max_retries,
    ));

    let http = reqwest::Client::new();
    let engine = Arc::new(HttpProvingEngine::new(
        http.clone(),
        config.proving_engine_url.clone(),
    ));
    let signer = Arc::new(HttpSignerProvider::new(
        http.clone(),
        config.signer_service_url.clone(),
    ));
    let verifier = Arc::new(HttpSignatureVerifier::new(
        http.clone(),
        config.signer_service_url.clone(),
    ));
    let oracle = Arc::new(SubgraphOracle::new(
        http,
        config.subgraph_project_id.clone(),
        config.subgraph_version.clone(),
    ));

    let pipeline = Arc::new(ProofPipeline::new(
        Arc::clone(&registry),
        engine,
        signer,
    ));
    let ingestor = Arc::new(Ingestor::new(
        Arc::clone(&registry),
        settings.coordinator_public_key.clone(),
    ));
    let scheduler = Scheduler::new(Arc::clone(&registry), Arc::clone(&pipeline), settings);
    tokio::spawn(Arc::clone(&scheduler).run());

    let state = AppState {
        config: Arc::new(config.clone()),
        registry,
        ingestor,
        pipeline,
        scheduler,
        oracle,
        verifier,
    };
    let app = routes::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("invalid listen address")?;
    info!("tallyd listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
