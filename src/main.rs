use anyhow::{Context, Result};
use etl_service::api::{create_router, AppState};
use etl_service::broker::{OrionClient, ReconcileService, Reconciler};
use etl_service::config::{apply_env_overrides, load_config};
use etl_service::orchestrator::Orchestrator;
use etl_service::pipeline::EtlPipeline;
use etl_service::scheduler::StatusRegistry;
use etl_service::sink::SqliteDocumentStore;
use etl_service::source::CrateSource;
use etl_service::stream::{DesiredState, StreamKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "etl_service=info".into()),
        )
        .init();

    info!("ETL service starting...");

    // Load configuration: file, then environment overrides
    let config_path = std::env::var("ETL_CONFIG").unwrap_or_else(|_| "etl.toml".to_string());
    let mut config = load_config(&config_path)?;
    apply_env_overrides(&mut config);

    info!(
        config_path = %config_path,
        source_url = %config.source.url,
        broker_url = %config.broker.url,
        sink_path = %config.sink.path.display(),
        api_addr = %config.api.bind_addr(),
        gateway_enabled = config.gateway.token.is_some(),
        "Configuration loaded"
    );

    // Storage
    let source = Arc::new(
        CrateSource::new(
            config.source.url.clone(),
            Duration::from_secs(config.source.timeout_secs),
        )
        .context("Failed to initialize time-series source")?,
    );
    let sink = Arc::new(
        SqliteDocumentStore::new(&config.sink.path)
            .context("Failed to initialize document store")?,
    );
    info!("Storage clients initialized");

    // Context broker
    let broker = Arc::new(
        OrionClient::new(
            config.broker.url.clone(),
            config.broker.service.clone(),
            config.broker.service_path.clone(),
            Duration::from_secs(config.broker.timeout_secs),
            Duration::from_secs(config.broker.liveness_timeout_secs),
        )
        .context("Failed to initialize context broker client")?,
    );
    let reconcile = Arc::new(ReconcileService::new(
        Reconciler::new(broker, config.broker.liveness_policy()),
        DesiredState::for_streams(&StreamKind::ALL, &config.broker.notify_url),
    ));

    // Pipelines
    let statuses = StatusRegistry::new();
    let pipelines: HashMap<StreamKind, Arc<EtlPipeline>> = StreamKind::ALL
        .into_iter()
        .map(|stream| {
            (
                stream,
                Arc::new(EtlPipeline::new(stream, source.clone(), sink.clone())),
            )
        })
        .collect();

    let mut orchestrator = Orchestrator::new(
        source.clone(),
        sink.clone(),
        Arc::clone(&reconcile),
        statuses.clone(),
        config.readiness.retry_policy(),
        config.readiness.policy,
    );
    for stream in StreamKind::ALL {
        if let Some(pipeline) = pipelines.get(&stream) {
            orchestrator = orchestrator.pipeline(pipeline.clone(), config.interval_for(stream));
        }
    }
    let mut scheduler = orchestrator.start().await?;

    // Start HTTP API server
    let state = Arc::new(AppState {
        sink,
        pipelines,
        statuses,
        reconcile,
        gateway_token: config.gateway.token.clone(),
    });
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(config.api.bind_addr())
        .await
        .context("Failed to bind API address")?;
    info!(addr = %config.api.bind_addr(), "ETL API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "ETL API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    scheduler.shutdown();
    info!("ETL service stopped");

    Ok(())
}
