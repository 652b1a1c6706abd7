use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use studio_backend::make_backend;
use studio_core::DEFAULT_ASSISTANT_MODEL;
use studio_ingest::IngestionPipeline;
use studio_store::{AssistantStore, MemoryAssistantStore, SledAssistantStore};
use tracing::info;

mod assistants;
mod config;
mod routes;

use assistants::AssistantService;
use config::{load_config, StoreCfg, StoreKind};
use routes::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    init_tracing();

    let cfg = load_config()?;

    let backend = make_backend(cfg.backend.to_backend_config()?)?;
    let pipeline = Arc::new(IngestionPipeline::new(
        backend.clone(),
        cfg.ingestion.to_ingestion_config(),
    ));
    let store = open_store(&cfg.store)?;
    let default_model = cfg
        .backend
        .default_model
        .as_deref()
        .unwrap_or(DEFAULT_ASSISTANT_MODEL);
    let assistants = Arc::new(AssistantService::new(
        backend,
        store,
        pipeline.registry().clone(),
        &cfg.share.base_path,
        default_model,
    ));

    let state = AppState {
        pipeline: pipeline.clone(),
        assistants,
        upload_timeout: Duration::from_secs(cfg.upload.request_timeout_secs),
    };
    let app = build_router(state, cfg.upload.body_limit_bytes);

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    tracing::info!(%addr, "studio-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let registry = pipeline.registry().clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
            registry.shutdown();
        })
        .await?;
    Ok(())
}

fn open_store(cfg: &StoreCfg) -> anyhow::Result<Arc<dyn AssistantStore>> {
    let store: Arc<dyn AssistantStore> = match cfg.kind {
        StoreKind::Sled => Arc::new(SledAssistantStore::open(&cfg.path)?),
        StoreKind::Memory => {
            info!("using in-memory assistant store; records are lost on restart");
            Arc::new(MemoryAssistantStore::new())
        }
    };
    Ok(store)
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,tower_http=info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}
