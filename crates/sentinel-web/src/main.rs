//! agent-sentinel HTTP server
//!
//! Boots the platform: settings, database pool + migrations, shared
//! services, the three background schedulers (poller, health checker,
//! schema monitor) and the composed API routers. Shutdown sets the
//! schedulers' stop flags and joins them before the pool closes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::middleware;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_sentinel::agents::{health, poller, schema_monitor};
use agent_sentinel::api::{
    auth_layer, create_agent_router, create_health_router, create_metrics_router,
    create_monitor_router, ApiState,
};
use agent_sentinel::{Services, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_sentinel=info,sentinel_web=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting agent-sentinel");

    // Unreadable config or a failed migration aborts startup
    let settings = Settings::from_env()?;
    let listen_addr: SocketAddr = format!("{}:{}", settings.api_host, settings.api_port).parse()?;
    let services = Services::initialize(settings).await?;

    // Background schedulers with cooperative stop flags
    let stop = Arc::new(AtomicBool::new(false));
    let scheduler_handles = vec![
        poller::spawn(services.clone(), stop.clone()),
        health::spawn(services.clone(), stop.clone()),
        schema_monitor::spawn(services.clone(), stop.clone()),
    ];

    let state = ApiState::new(services.clone());

    // Operator endpoints sit behind the bearer-token layer; SDK ingest
    // authenticates itself by API key and /health stays open.
    let operator_routes = create_agent_router()
        .merge(create_metrics_router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_layer::require_operator,
        ));

    let app = create_health_router()
        .merge(create_monitor_router())
        .merge(operator_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    tracing::info!("Listening on {listen_addr}");
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop schedulers and join them before the pool drops
    tracing::info!("Shutting down schedulers");
    stop.store(true, Ordering::Relaxed);
    for handle in scheduler_handles {
        handle.abort();
        let _ = handle.await;
    }

    services.pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
