//! Gateway entrypoint.
//!
//! Configuration comes from the environment:
//! - `PORT` — listen port (default 8090)
//! - `DATA_DIR` — device database directory (default /data/whatsapp)
//! - `JO_BOT_URL` — remote session backup endpoint (optional)
//! - `WHATSAPP_SESSION_KEY` — base64 of 32 bytes; absent or malformed
//!   disables session persistence

use axum::http::{header, Method};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wabridge_core::SessionManager;
use wabridge_web::models::AppState;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let data_dir = env_or("DATA_DIR", "/data/whatsapp");
    let port = env_or("PORT", "8090");
    let backup_url = std::env::var("JO_BOT_URL").ok().filter(|v| !v.is_empty());
    let session_key = std::env::var("WHATSAPP_SESSION_KEY").ok().filter(|v| !v.is_empty());

    let manager = SessionManager::with_live_client(&data_dir, backup_url.clone(), session_key);
    if manager.backup_enabled() {
        info!("session persistence enabled");
    }
    let state = Arc::new(AppState { manager });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);
    let app = wabridge_web::router(Arc::clone(&state)).layer(cors);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, data_dir = %data_dir, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Teardown: disconnect every session and flush backups.
    state.manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}
