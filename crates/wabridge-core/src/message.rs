//! Upstream message content types.
//!
//! Mirrors the decrypted message payloads of the upstream protocol: a
//! message carries at most a handful of optional content sections, and
//! the gateway only ever inspects the ones it understands.

/// A decrypted upstream message. Exactly the content sections the
/// gateway handles; anything else arrives as an empty `Message` and is
/// dropped by the fan-out.
#[derive(Clone, Debug, Default)]
pub struct Message {
    pub conversation: Option<String>,
    pub extended_text: Option<ExtendedTextMessage>,
    pub image: Option<ImageMessage>,
    pub audio: Option<AudioMessage>,
    pub location: Option<LocationMessage>,
    pub live_location: Option<LiveLocationMessage>,
    pub contact: Option<ContactMessage>,
    pub contacts_array: Option<ContactsArrayMessage>,
    pub reaction: Option<ReactionMessage>,
}

impl Message {
    /// Plain text message.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            conversation: Some(body.into()),
            ..Default::default()
        }
    }

    /// Text message quoting an earlier message in the chat.
    pub fn reply(body: impl Into<String>, quoted_id: impl Into<String>, participant: impl Into<String>) -> Self {
        Self {
            extended_text: Some(ExtendedTextMessage {
                text: Some(body.into()),
                context: Some(ContextInfo {
                    stanza_id: Some(quoted_id.into()),
                    participant: Some(participant.into()),
                }),
            }),
            ..Default::default()
        }
    }
}

/// Rich text content, used for replies and link previews.
#[derive(Clone, Debug, Default)]
pub struct ExtendedTextMessage {
    pub text: Option<String>,
    pub context: Option<ContextInfo>,
}

/// Quote/reply context attached to a message.
#[derive(Clone, Debug, Default)]
pub struct ContextInfo {
    pub stanza_id: Option<String>,
    pub participant: Option<String>,
}

/// Encrypted-media descriptor for an image.
#[derive(Clone, Debug, Default)]
pub struct ImageMessage {
    pub url: Option<String>,
    pub direct_path: Option<String>,
    pub media_key: Vec<u8>,
    pub mimetype: Option<String>,
    pub caption: Option<String>,
    pub file_enc_sha256: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_length: Option<u64>,
}

/// Encrypted-media descriptor for audio. `ptt` marks voice notes.
#[derive(Clone, Debug, Default)]
pub struct AudioMessage {
    pub url: Option<String>,
    pub direct_path: Option<String>,
    pub media_key: Vec<u8>,
    pub mimetype: Option<String>,
    pub file_enc_sha256: Vec<u8>,
    pub file_sha256: Vec<u8>,
    pub file_length: Option<u64>,
    pub seconds: Option<u32>,
    pub ptt: bool,
}

impl AudioMessage {
    /// Whether the descriptor carries everything a CDN download needs.
    /// Desktop-originated messages arrive before the sender finishes
    /// uploading, in which case these fields are still blank.
    pub fn is_resolved(&self) -> bool {
        let has_path = self.direct_path.as_deref().is_some_and(|p| !p.is_empty())
            || self.url.as_deref().is_some_and(|u| !u.is_empty());
        has_path && !self.media_key.is_empty() && !self.file_enc_sha256.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct LocationMessage {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub name: Option<String>,
    pub address: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LiveLocationMessage {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub caption: Option<String>,
}

/// A single shared contact (vCard).
#[derive(Clone, Debug, Default)]
pub struct ContactMessage {
    pub display_name: Option<String>,
    pub vcard: Option<String>,
}

/// Multiple shared contacts in one message.
#[derive(Clone, Debug, Default)]
pub struct ContactsArrayMessage {
    pub contacts: Vec<ContactMessage>,
}

/// Emoji reaction referencing an earlier message.
#[derive(Clone, Debug)]
pub struct ReactionMessage {
    pub key: MessageKey,
    pub text: String,
    pub sender_timestamp_ms: i64,
}

/// Key identifying the message a reaction or receipt refers to.
#[derive(Clone, Debug)]
pub struct MessageKey {
    pub remote_jid: String,
    pub from_me: bool,
    pub id: String,
}
