//! mtb-daemon entry point.
//!
//! Thin on purpose: load config, set up tracing, build the shared state,
//! wire middleware, serve until a shutdown signal arrives. Route handlers
//! live in `routes.rs`; shared state in `state.rs`.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use mtb_config::{resolve_secrets, BridgeConfig};
use mtb_daemon::{routes, state};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

/// Comma-separated YAML layer paths, base first.
const CONFIG_PATHS_ENV: &str = "MTB_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let paths = config_paths_from_env();
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let (cfg, loaded) = BridgeConfig::load(&path_refs).context("config load failed")?;
    info!(config_hash = %loaded.config_hash, layers = paths.len(), "config loaded");

    let secrets = resolve_secrets(&cfg)?;
    let shared = Arc::new(state::AppState::from_config(&cfg, Some(&loaded), &secrets)?);

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_broker_relay(&shared);

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    // Bind failure is fatal and reported before any request is served.
    let addr = cfg.listener.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind listener on {addr}"))?;
    info!(
        endpoint = %cfg.listener.endpoint(),
        base_path = %cfg.listener.base_path,
        docs_path = %cfg.listener.docs_path,
        command_wait_timeout_ms = cfg.broker.command_wait_timeout_ms,
        token_configured = secrets.auth_token.is_some(),
        "mtb-daemon listening"
    );

    let on_signal = Arc::clone(&shared);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            let drained = on_signal.begin_shutdown();
            info!(drained, "shutdown requested; draining");
        })
        .await
        .context("server crashed")?;

    info!("mtb-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn config_paths_from_env() -> Vec<String> {
    std::env::var(CONFIG_PATHS_ENV)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
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
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
