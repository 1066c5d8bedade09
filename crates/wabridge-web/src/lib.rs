//! HTTP surface for the gateway.
//!
//! A thin axum layer over `wabridge-core`: JSON request/response
//! endpoints for session and message management, plus two SSE streams
//! (QR pairing and inbound events).

pub mod api;
pub mod models;

use axum::routing::{delete, get, post};
use axum::Router;
use models::AppState;
use std::sync::Arc;

/// Build the gateway router. Method mismatches answer 405.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/sessions", post(api::create_session))
        .route("/sessions/qr", get(api::qr_stream))
        .route("/sessions/status", get(api::get_status))
        .route("/sessions/save", post(api::save_session))
        .route("/sessions/delete", delete(api::delete_session))
        .route("/chats", get(api::get_chats))
        .route("/groups/info", get(api::get_group_info))
        .route("/groups/participants", get(api::get_group_participants))
        .route("/messages/send", post(api::send_message))
        .route("/messages/image", post(api::send_image))
        .route("/messages/audio", post(api::send_audio))
        .route("/messages/location", post(api::send_location))
        .route("/messages/react", post(api::send_reaction))
        .route("/messages/typing", post(api::set_typing))
        .route("/media/download", post(api::download_media))
        .route("/events", get(api::events_stream))
        .with_state(state)
}
