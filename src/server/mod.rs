//! HTTP ingress for inbound webhooks.
//!
//! Exposes liveness probes, the WhatsApp and SMS webhook endpoints and a
//! log-tail endpoint. Handlers validate payloads (400), verify provider
//! signatures (403), and never leak internal traces to clients (500 with an
//! opaque body).

pub mod routes;
pub mod signature;

pub use routes::{app_router, AppState};

use crate::error::AgentError;

/// Bind and serve the webhook application until the process exits.
pub async fn serve(state: AppState, host: &str, port: u16) -> Result<(), AgentError> {
    let bind_addr = format!("{host}:{port}");
    let app = app_router(state);

    log::info!(target: "webhook", "serveur webhook en écoute sur {bind_addr}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AgentError::config(format!("impossible d'écouter sur {bind_addr}: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| AgentError::downstream(format!("serveur webhook arrêté: {e}")))?;
    Ok(())
}
