//! Shared state and wire models for the web API.

use serde::{Deserialize, Serialize};
use wabridge_core::payload::base64_bytes;
use wabridge_core::SessionManager;

/// Application shared state.
pub struct AppState {
    /// Owner of every per-user upstream session.
    pub manager: SessionManager,
}

/// `user_id` query parameter, required by most endpoints.
#[derive(Debug, Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub user_id: Option<i64>,
}

/// Query parameters for the group endpoints.
#[derive(Debug, Deserialize)]
pub struct GroupQuery {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub group_jid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub chat_jid: String,
    #[serde(default)]
    pub text: String,
    /// Optional message id to reply to.
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendImageRequest {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub chat_jid: String,
    /// Base64-encoded image bytes.
    #[serde(default)]
    pub image_b64: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub caption: String,
}

#[derive(Debug, Deserialize)]
pub struct SendAudioRequest {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub chat_jid: String,
    /// Base64-encoded audio bytes.
    #[serde(default)]
    pub audio_b64: String,
    #[serde(default)]
    pub mime_type: String,
    /// Send as a voice note rather than an audio file.
    #[serde(default)]
    pub ptt: bool,
    /// Duration in seconds, shown in the recipient's UI.
    #[serde(default)]
    pub seconds: u32,
}

#[derive(Debug, Deserialize)]
pub struct SendLocationRequest {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub chat_jid: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct SendReactionRequest {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub chat_jid: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
pub struct SetTypingRequest {
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub chat_jid: String,
    #[serde(default)]
    pub typing: bool,
}

/// Media descriptor for `/media/download`. Binary fields travel as
/// base64, matching the payloads emitted on `/events`.
#[derive(Debug, Deserialize)]
pub struct DownloadMediaRequest {
    #[serde(default)]
    pub user_id: i64,
    /// Cache lookup key.
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub direct_path: String,
    #[serde(with = "base64_bytes", default)]
    pub media_key: Vec<u8>,
    #[serde(with = "base64_bytes", default)]
    pub file_enc_sha256: Vec<u8>,
    #[serde(with = "base64_bytes", default)]
    pub file_sha256: Vec<u8>,
    #[serde(default)]
    pub file_length: u64,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub is_ptt: bool,
}

/// One entry in the `/chats` listing.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPayload {
    pub jid: String,
    pub name: String,
    pub is_group: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupInfoPayload {
    pub jid: String,
    pub name: String,
    pub topic: String,
    pub created: i64,
    pub creator_jid: String,
    pub participants: Vec<ParticipantInfo>,
    pub is_announce: bool,
    pub is_locked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantInfo {
    pub jid: String,
    pub is_admin: bool,
    pub is_super_admin: bool,
}
