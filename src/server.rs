use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    auth,
    completion::OpenAiCompletionClient,
    config::Config,
    handlers::{self, AppState},
    loki::LokiClient,
    metrics,
    pipeline::Orchestrator,
    router::ModelRouter,
    signals::setup_signal_handlers,
};

/// Request bodies are a short question plus two optional fields
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Start the LogQL gateway server
///
/// This function:
/// 1. Initializes metrics
/// 2. Builds the pipeline against the configured Loki and completion backends
/// 3. Sets up signal handlers for graceful shutdown and schema invalidation
/// 4. Serves requests with graceful shutdown support
pub async fn start_server(config: Config) -> Result<()> {
    let metrics_handle = if config.metrics.enabled {
        info!("Initializing Prometheus metrics...");
        Some(Arc::new(metrics::init_metrics()?))
    } else {
        None
    };

    let orchestrator = Arc::new(build_orchestrator(&config)?);

    // Warm the schema cache; a failure here only delays readiness
    match orchestrator.metadata().get_snapshot().await {
        Ok(snapshot) => info!(
            generation = snapshot.generation(),
            labels = snapshot.labels().len(),
            streams = snapshot.streams().len(),
            "Initial schema snapshot loaded"
        ),
        Err(e) => warn!(error = %e, "Initial schema fetch failed, will retry on first request"),
    }

    let (shutdown_tx, signal_handle) = setup_signal_handlers(orchestrator.metadata().clone());
    let mut shutdown_rx = shutdown_tx.subscribe();

    let app = create_router(&config, AppState { orchestrator }, metrics_handle);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting LogQL gateway on {}", addr);
    info!(
        "Configuration: loki={}, tenant={}, mode={:?}, {} completion backends, auth {}",
        config.loki.base_url,
        config.loki.tenant_id,
        config.translation.mode,
        config.completion.backends.len(),
        if config.auth.enabled { "enabled" } else { "disabled" }
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    signal_handle.await?;
    info!("Server stopped gracefully");

    Ok(())
}

/// Build the pipeline against the configured HTTP backends
pub fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let http_client = reqwest::Client::builder()
        .user_agent(concat!("logql-gateway/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let store = Arc::new(LokiClient::new(
        http_client.clone(),
        config.loki.clone(),
        &config.schema,
    ));
    let completion = Arc::new(OpenAiCompletionClient::new(
        http_client,
        ModelRouter::new(config.completion.clone()),
    ));

    Ok(Orchestrator::new(config, store, completion))
}

/// Create the Axum router with all routes and middleware
pub fn create_router(
    config: &Config,
    app_state: AppState,
    metrics_handle: Option<Arc<PrometheusHandle>>,
) -> Router {
    let auth_config = Arc::new(config.auth.clone());

    // Authenticated routes (pass-through when auth is disabled)
    let auth_routes = Router::new()
        .route("/query", post(handlers::query::handle_query))
        .route(
            "/admin/schema/refresh",
            post(handlers::admin::refresh_schema),
        )
        .layer(middleware::from_fn_with_state(
            auth_config,
            auth::auth_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .merge(auth_routes)
        .with_state(app_state);

    if let Some(handle) = metrics_handle {
        app = app.merge(
            Router::new()
                .route("/metrics", get(handlers::metrics_handler::metrics))
                .with_state(handle),
        );
    }

    app.layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(&config.server.cors_allowed_origins))
        .layer(TraceLayer::new_for_http())
}

/// Permissive CORS unless an explicit origin list is configured
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([
            header::HeaderName::from_static(handlers::query::TRANSLATION_SOURCE_HEADER),
            header::HeaderName::from_static(handlers::query::LOGQL_QUERY_HEADER),
            header::HeaderName::from_static(handlers::query::REQUEST_ID_HEADER),
        ])
}
