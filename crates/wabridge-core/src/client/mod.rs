//! Upstream client capability.
//!
//! The gateway never names the concrete protocol machinery outside this
//! module: sessions, the media pipeline, and the HTTP surface all talk
//! to [`WhatsAppClient`]. Production wires [`live::LiveClient`]; tests
//! wire [`mock::MockClient`].

pub mod live;
pub mod mock;

use crate::error::Result;
use crate::events::{Event, MediaRetryData, MediaRetryEvent, MessageInfo};
use crate::message::Message;
use crate::types::{Jid, MessageId};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Handler invoked for every upstream event. Handlers must not block;
/// anything slow is pushed onto a detached task.
pub type EventHandler = Box<dyn Fn(Event) + Send + Sync>;

/// One item on the pairing event stream.
#[derive(Clone, Debug)]
pub enum QrItem {
    /// A fresh pairing code to render as a QR image.
    Code(String),
    /// The phone scanned a code and login completed.
    Success,
}

/// Result of a successful send.
#[derive(Clone, Debug)]
pub struct SendResponse {
    pub id: MessageId,
    /// Unix seconds.
    pub timestamp: i64,
}

/// Result of uploading plaintext media to the CDN.
#[derive(Clone, Debug)]
pub struct UploadResponse {
    pub url: String,
    pub direct_path: String,
    pub media_key: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_sha256: Vec<u8>,
}

/// Reference to downloadable encrypted media, extracted from a message.
#[derive(Clone, Debug, Default)]
pub struct MediaRef {
    pub url: Option<String>,
    pub direct_path: Option<String>,
    pub media_key: Vec<u8>,
    pub file_enc_sha256: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_length: Option<u64>,
    pub kind: MediaKind,
}

impl From<&crate::message::ImageMessage> for MediaRef {
    fn from(m: &crate::message::ImageMessage) -> Self {
        Self {
            url: m.url.clone(),
            direct_path: m.direct_path.clone(),
            media_key: m.media_key.clone(),
            file_enc_sha256: m.file_enc_sha256.clone(),
            file_sha256: m.file_sha256.clone(),
            file_length: m.file_length,
            kind: MediaKind::Image,
        }
    }
}

impl From<&crate::message::AudioMessage> for MediaRef {
    fn from(m: &crate::message::AudioMessage) -> Self {
        Self {
            url: m.url.clone(),
            direct_path: m.direct_path.clone(),
            media_key: m.media_key.clone(),
            file_enc_sha256: m.file_enc_sha256.clone(),
            file_sha256: m.file_sha256.clone(),
            file_length: m.file_length,
            kind: MediaKind::Audio,
        }
    }
}

/// CDN media category. Note that voice notes (PTT) download as plain
/// audio; the CDN path map has no separate PTT entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MediaKind {
    #[default]
    Image,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    /// Category for a mime type, by prefix.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("audio/") {
            Self::Audio
        } else if mime.starts_with("video/") {
            Self::Video
        } else if mime.starts_with("image/") {
            Self::Image
        } else {
            Self::Document
        }
    }

    /// The `mms_type` token the CDN expects for this category.
    pub fn mms_type(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }
}

/// Typing indicator state for a chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatPresence {
    Composing,
    Paused,
}

/// Group metadata as reported by the server.
#[derive(Clone, Debug)]
pub struct GroupInfo {
    pub jid: Jid,
    pub name: String,
    pub topic: String,
    /// Unix seconds.
    pub created: i64,
    pub owner: Jid,
    pub participants: Vec<Participant>,
    pub is_announce: bool,
    pub is_locked: bool,
}

#[derive(Clone, Debug)]
pub struct Participant {
    pub jid: Jid,
    pub is_admin: bool,
    pub is_super_admin: bool,
}

/// Contact record from the device store.
#[derive(Clone, Debug, Default)]
pub struct ContactInfo {
    pub push_name: String,
    pub full_name: String,
}

/// Capability interface over the upstream protocol client.
///
/// The client is self-synchronizing; callers hold no locks across these
/// suspension points.
#[async_trait]
pub trait WhatsAppClient: Send + Sync {
    fn is_connected(&self) -> bool;
    fn is_logged_in(&self) -> bool;

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self);

    /// Pairing event stream. Only meaningful while the device store has
    /// no identity; once paired the stream stays silent.
    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrItem>>;

    async fn send_message(&self, to: &Jid, message: &Message) -> Result<SendResponse>;
    async fn send_chat_presence(&self, chat: &Jid, presence: ChatPresence) -> Result<()>;

    async fn upload(&self, plaintext: &[u8], kind: MediaKind) -> Result<UploadResponse>;
    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>>;

    /// Download via an explicit CDN path, refreshing auth out-of-band.
    /// `file_length` of -1 means unknown.
    #[allow(clippy::too_many_arguments)]
    async fn download_media_with_path(
        &self,
        direct_path: &str,
        file_enc_sha256: &[u8],
        file_sha256: &[u8],
        media_key: &[u8],
        file_length: i64,
        kind: MediaKind,
        mms_type: &str,
    ) -> Result<Vec<u8>>;

    /// Ask the original sender's device to re-upload the media of the
    /// referenced message.
    async fn send_media_retry_receipt(&self, info: &MessageInfo, media_key: &[u8]) -> Result<()>;

    /// Open a sealed media retry notification with the per-message key.
    fn decrypt_media_retry(&self, evt: &MediaRetryEvent, media_key: &[u8]) -> Result<MediaRetryData>;

    async fn joined_groups(&self) -> Result<Vec<GroupInfo>>;
    async fn group_info(&self, jid: &Jid) -> Result<GroupInfo>;

    /// Our own JID, if the device is paired.
    fn device_id(&self) -> Option<Jid>;

    /// All contacts known to the device store.
    async fn contacts(&self) -> Result<Vec<(Jid, ContactInfo)>>;

    fn add_event_handler(&self, handler: EventHandler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_from_mime_prefix() {
        assert_eq!(MediaKind::from_mime("audio/ogg; codecs=opus"), MediaKind::Audio);
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("image/jpeg"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::Document);
        assert_eq!(MediaKind::from_mime(""), MediaKind::Document);
    }

    #[test]
    fn mms_type_tokens() {
        assert_eq!(MediaKind::Audio.mms_type(), "audio");
        assert_eq!(MediaKind::Document.mms_type(), "document");
    }

    #[test]
    fn media_ref_from_audio() {
        let audio = crate::message::AudioMessage {
            direct_path: Some("/v/abc".into()),
            media_key: vec![7; 32],
            file_enc_sha256: vec![8; 32],
            ptt: true,
            ..Default::default()
        };
        let r = MediaRef::from(&audio);
        assert_eq!(r.kind, MediaKind::Audio);
        assert_eq!(r.direct_path.as_deref(), Some("/v/abc"));
        assert_eq!(r.media_key, vec![7; 32]);
    }
}
