//! JSON endpoints and SSE streams.
//!
//! Every handler speaks JSON in and out; errors are `{"error": "..."}`
//! with the status codes clients key off: 400 for bad input or a
//! not-logged-in session, 404 for a missing session, 500 for upstream
//! failures.

use crate::models::*;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::stream;
use serde_json::json;
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};
use wabridge_core::client::{ChatPresence, MediaKind, QrItem};
use wabridge_core::media;
use wabridge_core::message::{
    AudioMessage, ImageMessage, LocationMessage, Message, MessageKey, ReactionMessage,
};
use wabridge_core::payload::GatewayEvent;
use wabridge_core::types::Jid;
use wabridge_core::{Error, UserSession};

/// Hard timeout for the QR pairing stream.
const QR_STREAM_TIMEOUT: Duration = Duration::from_secs(120);

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn require_user_id(user_id: Option<i64>) -> Result<i64, Response> {
    match user_id {
        Some(id) if id > 0 => Ok(id),
        _ => Err(json_error(StatusCode::BAD_REQUEST, "user_id required")),
    }
}

async fn require_session(state: &AppState, user_id: i64) -> Result<Arc<UserSession>, Response> {
    state
        .manager
        .get(user_id)
        .await
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "session not found"))
}

fn require_logged_in(session: &UserSession) -> Result<(), Response> {
    if session.client.is_logged_in() {
        Ok(())
    } else {
        Err(json_error(StatusCode::BAD_REQUEST, "not logged in"))
    }
}

fn parse_jid(raw: &str) -> Result<Jid, Response> {
    Jid::from_str(raw).map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid jid"))
}

fn send_result(resp: wabridge_core::client::SendResponse) -> Response {
    Json(json!({ "id": resp.id, "timestamp": resp.timestamp })).into_response()
}

pub async fn health() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

/// `POST /sessions` — create or resume the caller's session. Unpaired
/// devices get the QR pipeline started and `needs_qr` back; paired ones
/// are connected straight away.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid json");
    };
    let user_id = match require_user_id(Some(req.user_id)) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let session = match state.manager.get_or_create(user_id).await {
        Ok(session) => session,
        Err(e) => return json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    if session.client.device_id().is_none() {
        let qr_rx = session.client.qr_channel().await;
        match session.client.connect().await {
            Ok(()) | Err(Error::AlreadyConnected) => {}
            Err(e) => return json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
        match qr_rx {
            Ok(rx) => spawn_qr_pump(Arc::clone(&session), rx),
            Err(e) => warn!(user_id, error = %e, "could not open pairing stream"),
        }
        return Json(json!({ "status": "needs_qr", "user_id": user_id })).into_response();
    }

    if !session.client.is_connected() {
        match session.client.connect().await {
            Ok(()) | Err(Error::AlreadyConnected) => {}
            Err(e) => return json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    let phone = session.client.device_id().map(|jid| jid.user).unwrap_or_default();
    Json(json!({ "status": "connected", "user_id": user_id, "phone": phone })).into_response()
}

/// Forward pairing events into the session's QR queue and login latch.
/// Exits on the success event; codes beyond the queue bound are dropped.
fn spawn_qr_pump(session: Arc<UserSession>, mut rx: mpsc::Receiver<QrItem>) {
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                QrItem::Code(code) => {
                    info!(user_id = session.user_id, "qr code issued");
                    session.push_qr(code);
                }
                QrItem::Success => {
                    session.complete_login();
                    return;
                }
            }
        }
    });
}

struct QrStream {
    qr: OwnedMutexGuard<mpsc::Receiver<String>>,
    login: OwnedMutexGuard<mpsc::Receiver<()>>,
    deadline: tokio::time::Instant,
    done: bool,
}

/// `GET /sessions/qr` — stream pairing codes as SSE until login, the
/// two-minute deadline, or client disconnect.
pub async fn qr_stream(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Response {
    let user_id = match require_user_id(q.user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let session = match require_session(&state, user_id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };

    let qr = session.qr_receiver().lock_owned().await;
    let login = session.login_receiver().lock_owned().await;
    let qr_state = QrStream {
        qr,
        login,
        deadline: tokio::time::Instant::now() + QR_STREAM_TIMEOUT,
        done: false,
    };

    let stream = stream::unfold(qr_state, |mut st| async move {
        if st.done {
            return None;
        }
        let event = tokio::select! {
            // Drain queued codes before the login latch so a subscriber
            // that attaches late still sees the codes in issue order.
            biased;
            code = st.qr.recv() => match code {
                Some(code) => SseEvent::default().event("qr").data(code),
                None => return None,
            },
            _ = st.login.recv() => {
                st.done = true;
                SseEvent::default().event("success").data("logged_in")
            }
            _ = tokio::time::sleep_until(st.deadline) => {
                st.done = true;
                SseEvent::default().event("timeout").data("qr_expired")
            }
        };
        Some((Ok::<_, Infallible>(event), st))
    });

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(stream),
    )
        .into_response()
}

/// `GET /events` — stream normalized inbound messages as SSE. One
/// subscriber per user: the queue receiver is held for the lifetime of
/// the response.
pub async fn events_stream(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Response {
    let user_id = match require_user_id(q.user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let session = match require_session(&state, user_id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };

    let rx: OwnedMutexGuard<mpsc::Receiver<GatewayEvent>> =
        session.event_receiver().lock_owned().await;

    let stream = stream::unfold(rx, |mut rx| async move {
        let envelope = rx.recv().await?;
        let data = serde_json::to_string(&envelope).ok()?;
        Some((
            Ok::<_, Infallible>(SseEvent::default().event("message").data(data)),
            rx,
        ))
    });

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(stream),
    )
        .into_response()
}

/// `GET /sessions/status` — connection state; an unknown user is simply
/// disconnected, not an error.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Response {
    let user_id = match require_user_id(q.user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Some(session) = state.manager.get(user_id).await else {
        return Json(json!({ "connected": false, "logged_in": false })).into_response();
    };

    let mut resp = json!({
        "connected": session.client.is_connected(),
        "logged_in": session.client.is_logged_in(),
    });
    if let Some(jid) = session.client.device_id() {
        resp["phone"] = json!(jid.user);
    }
    Json(resp).into_response()
}

/// `DELETE /sessions/delete` — disconnect and drop the session.
/// Unknown users disconnect trivially.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Response {
    let user_id = match require_user_id(q.user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    state.manager.remove(user_id).await;
    Json(json!({ "status": "disconnected" })).into_response()
}

/// `POST /sessions/save` — push the session backup now. Failures are
/// logged; the endpoint answers saved either way.
pub async fn save_session(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Response {
    let user_id = match require_user_id(q.user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Err(e) = state.manager.save(user_id).await {
        warn!(user_id, error = %e, "session save failed");
    }
    Json(json!({ "status": "saved" })).into_response()
}

/// `GET /chats` — joined groups plus store contacts.
pub async fn get_chats(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Response {
    let user_id = match require_user_id(q.user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let session = match require_session(&state, user_id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_logged_in(&session) {
        return resp;
    }

    let mut chats = Vec::new();
    if let Ok(groups) = session.client.joined_groups().await {
        for group in groups {
            chats.push(ChatPayload {
                jid: group.jid.to_string(),
                name: group.name,
                is_group: true,
            });
        }
    }
    if let Ok(contacts) = session.client.contacts().await {
        for (jid, contact) in contacts {
            let name = if !contact.push_name.is_empty() {
                contact.push_name
            } else if !contact.full_name.is_empty() {
                contact.full_name
            } else {
                jid.user.clone()
            };
            chats.push(ChatPayload {
                jid: jid.to_string(),
                name,
                is_group: false,
            });
        }
    }
    Json(chats).into_response()
}

async fn group_info_payload(
    state: &AppState,
    user_id: Option<i64>,
    group_jid: Option<String>,
) -> Result<GroupInfoPayload, Response> {
    let user_id = require_user_id(user_id)?;
    let group_jid =
        group_jid.filter(|j| !j.is_empty()).ok_or_else(|| {
            json_error(StatusCode::BAD_REQUEST, "group_jid required")
        })?;
    let session = require_session(state, user_id).await?;
    require_logged_in(&session)?;
    let jid = parse_jid(&group_jid)?;

    let info = session.client.group_info(&jid).await.map_err(|e| {
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to get group info: {}", e),
        )
    })?;

    let participants = info
        .participants
        .iter()
        .map(|p| ParticipantInfo {
            jid: p.jid.to_string(),
            is_admin: p.is_admin,
            is_super_admin: p.is_super_admin,
        })
        .collect();
    Ok(GroupInfoPayload {
        jid: info.jid.to_string(),
        name: info.name,
        topic: info.topic,
        created: info.created,
        creator_jid: info.owner.to_string(),
        participants,
        is_announce: info.is_announce,
        is_locked: info.is_locked,
    })
}

/// `GET /groups/info`
pub async fn get_group_info(
    State(state): State<Arc<AppState>>,
    Query(q): Query<GroupQuery>,
) -> Response {
    match group_info_payload(&state, q.user_id, q.group_jid).await {
        Ok(payload) => Json(payload).into_response(),
        Err(resp) => resp,
    }
}

/// `GET /groups/participants`
pub async fn get_group_participants(
    State(state): State<Arc<AppState>>,
    Query(q): Query<GroupQuery>,
) -> Response {
    match group_info_payload(&state, q.user_id, q.group_jid).await {
        Ok(payload) => Json(payload.participants).into_response(),
        Err(resp) => resp,
    }
}

/// `POST /messages/send` — text, optionally quoting an earlier message.
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid json");
    };
    let user_id = match require_user_id(Some(req.user_id)) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let session = match require_session(&state, user_id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_logged_in(&session) {
        return resp;
    }
    let jid = match parse_jid(&req.chat_jid) {
        Ok(jid) => jid,
        Err(resp) => return resp,
    };

    let message = match &req.reply_to {
        Some(reply_to) if !reply_to.is_empty() => {
            Message::reply(req.text.clone(), reply_to.clone(), jid.to_string())
        }
        _ => Message::text(req.text.clone()),
    };

    match session.client.send_message(&jid, &message).await {
        Ok(resp) => send_result(resp),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `POST /messages/image` — upload then send an image message.
pub async fn send_image(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendImageRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid json");
    };
    let user_id = match require_user_id(Some(req.user_id)) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let session = match require_session(&state, user_id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_logged_in(&session) {
        return resp;
    }
    let jid = match parse_jid(&req.chat_jid) {
        Ok(jid) => jid,
        Err(resp) => return resp,
    };
    let Ok(image_data) = BASE64.decode(&req.image_b64) else {
        return json_error(StatusCode::BAD_REQUEST, "invalid base64 image");
    };

    let uploaded = match session.client.upload(&image_data, MediaKind::Image).await {
        Ok(uploaded) => uploaded,
        Err(e) => {
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to upload image: {}", e),
            )
        }
    };

    let message = Message {
        image: Some(ImageMessage {
            caption: Some(req.caption.clone()),
            url: Some(uploaded.url),
            direct_path: Some(uploaded.direct_path),
            media_key: uploaded.media_key,
            mimetype: Some(req.mime_type.clone()),
            file_enc_sha256: uploaded.file_enc_sha256,
            file_sha256: uploaded.file_sha256,
            file_length: Some(image_data.len() as u64),
        }),
        ..Default::default()
    };

    match session.client.send_message(&jid, &message).await {
        Ok(resp) => send_result(resp),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `POST /messages/audio` — upload then send audio, optionally as a
/// voice note.
pub async fn send_audio(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendAudioRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid json");
    };
    let user_id = match require_user_id(Some(req.user_id)) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let session = match require_session(&state, user_id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_logged_in(&session) {
        return resp;
    }
    let jid = match parse_jid(&req.chat_jid) {
        Ok(jid) => jid,
        Err(resp) => return resp,
    };
    let Ok(audio_data) = BASE64.decode(&req.audio_b64) else {
        return json_error(StatusCode::BAD_REQUEST, "invalid base64 audio");
    };

    let uploaded = match session.client.upload(&audio_data, MediaKind::Audio).await {
        Ok(uploaded) => uploaded,
        Err(e) => {
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to upload audio: {}", e),
            )
        }
    };

    let message = Message {
        audio: Some(AudioMessage {
            url: Some(uploaded.url),
            direct_path: Some(uploaded.direct_path),
            media_key: uploaded.media_key,
            mimetype: Some(req.mime_type.clone()),
            file_enc_sha256: uploaded.file_enc_sha256,
            file_sha256: uploaded.file_sha256,
            file_length: Some(audio_data.len() as u64),
            seconds: (req.seconds > 0).then_some(req.seconds),
            ptt: req.ptt,
        }),
        ..Default::default()
    };

    match session.client.send_message(&jid, &message).await {
        Ok(resp) => send_result(resp),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `POST /messages/location`
pub async fn send_location(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendLocationRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid json");
    };
    let user_id = match require_user_id(Some(req.user_id)) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let session = match require_session(&state, user_id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_logged_in(&session) {
        return resp;
    }
    let jid = match parse_jid(&req.chat_jid) {
        Ok(jid) => jid,
        Err(resp) => return resp,
    };

    let message = Message {
        location: Some(LocationMessage {
            latitude: Some(req.latitude),
            longitude: Some(req.longitude),
            name: Some(req.name.clone()),
            address: Some(req.address.clone()),
        }),
        ..Default::default()
    };

    match session.client.send_message(&jid, &message).await {
        Ok(resp) => send_result(resp),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `POST /messages/react` — emoji reaction on an earlier message.
pub async fn send_reaction(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendReactionRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid json");
    };
    let user_id = match require_user_id(Some(req.user_id)) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let session = match require_session(&state, user_id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_logged_in(&session) {
        return resp;
    }
    let jid = match parse_jid(&req.chat_jid) {
        Ok(jid) => jid,
        Err(resp) => return resp,
    };

    let message = Message {
        reaction: Some(ReactionMessage {
            key: MessageKey {
                remote_jid: req.chat_jid.clone(),
                from_me: true,
                id: req.message_id.clone(),
            },
            text: req.emoji.clone(),
            sender_timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }),
        ..Default::default()
    };

    match session.client.send_message(&jid, &message).await {
        Ok(resp) => send_result(resp),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `POST /messages/typing`
pub async fn set_typing(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SetTypingRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid json");
    };
    let user_id = match require_user_id(Some(req.user_id)) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let session = match require_session(&state, user_id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_logged_in(&session) {
        return resp;
    }
    let jid = match parse_jid(&req.chat_jid) {
        Ok(jid) => jid,
        Err(resp) => return resp,
    };

    let presence = if req.typing {
        ChatPresence::Composing
    } else {
        ChatPresence::Paused
    };
    match session.client.send_chat_presence(&jid, presence).await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `POST /media/download` — serve from the eager cache (entries are
/// one-shot) or walk the on-demand retry ladder.
pub async fn download_media(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DownloadMediaRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return json_error(StatusCode::BAD_REQUEST, "invalid json");
    };
    let user_id = match require_user_id(Some(req.user_id)) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let session = match require_session(&state, user_id).await {
        Ok(session) => session,
        Err(resp) => return resp,
    };
    if let Err(resp) = require_logged_in(&session) {
        return resp;
    }

    if !req.message_id.is_empty() {
        if let Some(cached) = session.take_cached_media(&req.message_id) {
            info!(message_id = %req.message_id, bytes = cached.len(), "media cache hit");
            return Json(json!({
                "data": BASE64.encode(&cached),
                "mime_type": req.mime_type,
                "size": cached.len(),
            }))
            .into_response();
        }
        info!(message_id = %req.message_id, "media cache miss, trying direct download");
    }

    match media::fetch_on_demand(
        session.client.as_ref(),
        &req.direct_path,
        &req.file_enc_sha256,
        &req.file_sha256,
        &req.media_key,
        &req.mime_type,
    )
    .await
    {
        Ok(data) => Json(json!({
            "data": BASE64.encode(&data),
            "mime_type": req.mime_type,
            "size": data.len(),
        }))
        .into_response(),
        Err(e @ Error::MediaUnavailable) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to download: {}", e),
        ),
    }
}
