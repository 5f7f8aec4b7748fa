//! wabridge server
//!
//! Relays WhatsApp sessions driven by an automation sidecar to CRM front ends
//! over WebSocket, and serves the front end's static bundle.

mod auth;
mod clock;
mod config;
mod error;
mod logging;
mod normalize;
mod paths;
mod qr;
mod rate_limit;
mod session;
mod session_actor;
mod session_command;
mod state;
#[cfg(test)]
mod test_support;
mod transition;
mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use wabridge_connector_sidecar::SidecarConnector;

use crate::config::Config;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::SessionRegistry;
use crate::websocket::ws_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let data_dir = paths::resolve_data_dir(config.data_dir.as_deref())?;
    paths::ensure_dirs(&data_dir)?;
    let logging = logging::init_logging(&paths::log_dir(&data_dir))?;

    info!(
        component = "server",
        event = "server.starting",
        run_id = %logging.run_id,
        pid = std::process::id(),
        log_path = %logging.log_path.display(),
        sidecar_url = %config.sidecar_url,
        "Starting wabridge server"
    );

    let connector = SidecarConnector::new(config.sidecar_url.clone(), config.client_id.clone());
    let registry = Arc::new(
        SessionRegistry::new(Arc::new(connector), config.timeouts())
            .with_session_limit(config.max_sessions),
    );

    let app = build_router(&config, registry.clone())?;

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        component = "server",
        event = "server.listening",
        bind_address = %addr,
        auth = config.auth_token.is_some(),
        "Listening on {}",
        addr
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    registry.shutdown().await;
    info!(
        component = "server",
        event = "server.stopped",
        "Server stopped"
    );

    Ok(())
}

fn build_router(config: &Config, registry: Arc<SessionRegistry>) -> anyhow::Result<Router> {
    let index = config.static_dir.join("index.html");
    let static_files = ServeDir::new(&config.static_dir).fallback(ServeFile::new(index));

    let mut app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(health_handler))
        .route("/api/sessions", get(sessions_handler))
        .fallback_service(static_files)
        .with_state(registry);

    if let Some(token) = config.auth_token.clone() {
        app = app.layer(middleware::from_fn_with_state(token, auth::auth_middleware));
    }

    let limiter = Arc::new(RateLimiter::new(config.rate_limit()));
    let origin: HeaderValue = config.client_url.parse()?;

    Ok(app
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                .allow_credentials(true),
        ))
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "timestamp": clock::iso_now(),
    }))
}

async fn sessions_handler(State(registry): State<Arc<SessionRegistry>>) -> impl IntoResponse {
    Json(json!({ "sessions": registry.session_summaries() }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(
                component = "server",
                event = "server.signal_failed",
                error = %e,
                "Failed to listen for Ctrl-C"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(
                    component = "server",
                    event = "server.signal_failed",
                    error = %e,
                    "Failed to listen for SIGTERM"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(
        component = "server",
        event = "server.shutdown_requested",
        "Shutdown requested"
    );
}
