//! `bulkwa serve`: wire the stores, session manager, campaign worker and
//! HTTP API together and run until a shutdown signal.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, Result},
    bulkwa_campaigns::{ActiveCampaigns, CampaignWorker},
    bulkwa_common::MessageSender,
    bulkwa_config::BulkwaConfig,
    bulkwa_gateway::AppState,
    bulkwa_store::{CampaignStore, HeartbeatStore, MemoryStore, SessionStore, SqliteStore},
    bulkwa_whatsapp::{AuthStore, SessionManager, SessionRegistry, SidecarTransport},
    clap::Args,
    tokio::net::TcpListener,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Data directory for the database and credentials
    #[arg(long, env = "BULKWA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Keep sessions and campaigns in memory only
    #[arg(long)]
    memory: bool,
}

struct Stores {
    sessions: Arc<dyn SessionStore>,
    campaigns: Arc<dyn CampaignStore>,
    heartbeat: Arc<dyn HeartbeatStore>,
}

impl Stores {
    fn shared<S>(store: Arc<S>) -> Self
    where
        S: SessionStore + CampaignStore + HeartbeatStore + 'static,
    {
        Self {
            sessions: Arc::clone(&store) as Arc<dyn SessionStore>,
            campaigns: Arc::clone(&store) as Arc<dyn CampaignStore>,
            heartbeat: store,
        }
    }
}

async fn open_stores(config: &BulkwaConfig, data_dir: &Path, memory: bool) -> Result<Stores> {
    if memory {
        warn!("using in-memory store, nothing survives a restart");
        return Ok(Stores::shared(Arc::new(MemoryStore::new())));
    }
    let url = config.store.database_url(data_dir);
    let store = SqliteStore::connect(&url)
        .await
        .with_context(|| format!("failed to open database {url}"))?;
    Ok(Stores::shared(Arc::new(store)))
}

pub async fn run(mut config: BulkwaConfig, args: ServeArgs) -> Result<()> {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let data_dir = args.data_dir.unwrap_or_else(bulkwa_config::data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;

    let stores = open_stores(&config, &data_dir, args.memory).await?;

    let auth = AuthStore::new(config.auth_root(&data_dir));
    let transport = Arc::new(SidecarTransport::new(config.whatsapp.sidecar_url.clone()));
    let sessions = SessionManager::new(
        transport,
        stores.sessions,
        Arc::new(SessionRegistry::new()),
        auth,
        config.whatsapp.clone(),
    );
    let campaigns = CampaignWorker::new(
        stores.campaigns,
        Arc::new(sessions.clone()) as Arc<dyn MessageSender>,
        ActiveCampaigns::new(),
        config.campaigns.clone(),
    );
    campaigns.start().await?;

    let state = AppState::new(sessions.clone(), campaigns.clone());
    #[cfg(feature = "prometheus")]
    let state = state.with_prometheus(bulkwa_metrics::install_prometheus()?);

    let shutdown = CancellationToken::new();
    let heartbeat = bulkwa_gateway::spawn_heartbeat(
        sessions.clone(),
        stores.heartbeat,
        config.heartbeat.interval(),
        shutdown.clone(),
    );

    let address = config.server.address();
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        sidecar = %config.whatsapp.sidecar_url,
        data_dir = %data_dir.display(),
        "bulkwa starting"
    );

    let signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        signal.cancel();
    });

    let served = bulkwa_gateway::serve(listener, Arc::new(state), shutdown.clone()).await;
    shutdown.cancel();

    campaigns.shutdown().await;
    sessions.shutdown().await;
    if let Err(e) = heartbeat.await {
        warn!(error = %e, "heartbeat task failed");
    }
    info!("bulkwa stopped");
    served
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            },
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
