use std::{process, sync::Arc};

use switchyard::{
    cache::{CacheConfig, CacheOrchestrator, EventIngest},
    config,
    events::{DeliveryPool, ReceiverRegistry},
    infra::{
        error::InfraError,
        http::{self, EdgeState, InternalState},
        telemetry,
    },
    upstream::RestUpstream,
};
use tokio::try_join;
use tracing::{dispatcher, error, info, Dispatch, Level};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| InfraError::configuration(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), InfraError> {
    let base_url = settings
        .upstream
        .base_url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("upstream.url is not configured"))?;
    let api_key = settings
        .upstream
        .api_key
        .as_ref()
        .ok_or_else(|| InfraError::configuration("upstream.api_key is not configured"))?;

    let upstream = Arc::new(
        RestUpstream::new(base_url, api_key, settings.upstream.timeout)
            .map_err(|err| InfraError::configuration(err.to_string()))?,
    );

    let orchestrator = Arc::new(CacheOrchestrator::new(
        CacheConfig::from(&settings.cache),
        upstream,
    ));

    let pool = Arc::new(DeliveryPool::new(settings.events.delivery_workers.get()));
    let receiver = Arc::new(ReceiverRegistry::new(pool));

    // Explicit wiring: the orchestrator is the one logical cache listener.
    let ingest = EventIngest::new(&receiver);
    ingest.register(orchestrator.clone());

    // The HTTP event binding is passive; there is no broker connection whose
    // health could drive the orchestrator, so the stream is treated as live
    // from the start unless configured otherwise.
    if settings.events.assume_connected {
        orchestrator.set_connected(true);
    }

    info!(
        edge_addr = %settings.server.edge_addr,
        internal_addr = %settings.server.internal_addr,
        cache_mode = orchestrator.mode().as_str(),
        "starting switchyard edge node"
    );

    serve_http(&settings, orchestrator, receiver).await
}

async fn serve_http(
    settings: &config::Settings,
    orchestrator: Arc<CacheOrchestrator>,
    receiver: Arc<ReceiverRegistry>,
) -> Result<(), InfraError> {
    let edge_router = http::build_edge_router(EdgeState {
        orchestrator: orchestrator.clone(),
    });
    let internal_router = http::build_internal_router(InternalState {
        orchestrator,
        receiver,
    });

    let edge_listener = tokio::net::TcpListener::bind(settings.server.edge_addr).await?;
    let internal_listener = tokio::net::TcpListener::bind(settings.server.internal_addr).await?;

    let edge_server = axum::serve(edge_listener, edge_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());
    let internal_server = axum::serve(internal_listener, internal_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    try_join!(edge_server, internal_server)
        .map_err(|err| InfraError::server(err.to_string()))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}
