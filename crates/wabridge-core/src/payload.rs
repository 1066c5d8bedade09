//! Normalized message payloads for the event stream.
//!
//! Inbound upstream messages are flattened into one wire shape that
//! subscribers consume over SSE. Field presence mirrors the original
//! gateway wire format: empty media fields are omitted, binary fields
//! travel as base64.

use crate::events::MessageEvent;
use serde::{Deserialize, Serialize};

/// Base64 (de)serialization for binary payload fields.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Envelope written to the `/events` stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: MessagePayload,
}

impl GatewayEvent {
    pub fn message(payload: MessagePayload) -> Self {
        Self {
            event_type: "message".to_string(),
            payload,
        }
    }
}

/// One normalized inbound message.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: String,
    pub chat_jid: String,
    pub sender_jid: String,
    pub sender_name: String,
    #[serde(default)]
    pub text: String,
    pub timestamp: i64,
    pub is_from_me: bool,
    /// "image", "audio", "ptt", "location", "live_location", "contact";
    /// absent for plain text.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub media_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contact_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contact_vcard: Option<String>,
    #[serde(with = "base64_bytes", skip_serializing_if = "Vec::is_empty", default)]
    pub media_key: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub direct_path: Option<String>,
    #[serde(with = "base64_bytes", skip_serializing_if = "Vec::is_empty", default)]
    pub file_enc_sha256: Vec<u8>,
    #[serde(with = "base64_bytes", skip_serializing_if = "Vec::is_empty", default)]
    pub file_sha256: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file_length: Option<u64>,
    #[serde(skip_serializing_if = "is_false", default)]
    pub is_ptt: bool,
}

impl MessagePayload {
    fn from_info(info: &crate::events::MessageInfo) -> Self {
        Self {
            id: info.id.clone(),
            chat_jid: info.chat.to_string(),
            sender_jid: info.sender.to_string(),
            sender_name: info.push_name.clone(),
            timestamp: info.timestamp,
            is_from_me: info.is_from_me,
            ..Default::default()
        }
    }
}

/// Translate an inbound message event into zero or more payloads.
///
/// A payload is produced only when the message carries content the
/// gateway understands. A contacts-array message splits into one
/// payload per contact, each under the parent message id; the enclosing
/// message itself is not emitted.
pub fn extract(event: &MessageEvent) -> Vec<MessagePayload> {
    let msg = &event.message;
    let mut out = Vec::new();
    let mut payload = MessagePayload::from_info(&event.info);
    let mut has_content = false;

    if let Some(text) = &msg.conversation {
        payload.text = text.clone();
        has_content = true;
    } else if let Some(text) = msg.extended_text.as_ref().and_then(|e| e.text.as_ref()) {
        payload.text = text.clone();
        has_content = true;
    }

    if let Some(img) = &msg.image {
        payload.media_type = Some("image".to_string());
        payload.caption = img.caption.clone();
        payload.mime_type = img.mimetype.clone();
        payload.media_url = img.url.clone();
        payload.direct_path = img.direct_path.clone();
        payload.media_key = img.media_key.clone();
        payload.file_enc_sha256 = img.file_enc_sha256.clone();
        payload.file_sha256 = img.file_sha256.clone();
        payload.file_length = img.file_length;
        has_content = true;
    }

    if let Some(audio) = &msg.audio {
        payload.is_ptt = audio.ptt;
        payload.media_type = Some(if audio.ptt { "ptt" } else { "audio" }.to_string());
        payload.mime_type = audio.mimetype.clone();
        payload.media_url = audio.url.clone();
        payload.direct_path = audio.direct_path.clone();
        payload.media_key = audio.media_key.clone();
        payload.file_enc_sha256 = audio.file_enc_sha256.clone();
        payload.file_sha256 = audio.file_sha256.clone();
        payload.file_length = audio.file_length;
        has_content = true;
    }

    if let Some(loc) = &msg.location {
        payload.media_type = Some("location".to_string());
        payload.latitude = loc.latitude;
        payload.longitude = loc.longitude;
        if let Some(name) = &loc.name {
            payload.text = name.clone();
        }
        if let Some(address) = &loc.address {
            if payload.text.is_empty() {
                payload.text = address.clone();
            } else {
                payload.text = format!("{} - {}", payload.text, address);
            }
        }
        has_content = true;
    }

    if let Some(live) = &msg.live_location {
        payload.media_type = Some("live_location".to_string());
        payload.latitude = live.latitude;
        payload.longitude = live.longitude;
        payload.caption = live.caption.clone();
        has_content = true;
    }

    if let Some(contact) = &msg.contact {
        payload.media_type = Some("contact".to_string());
        payload.contact_name = contact.display_name.clone();
        payload.contact_vcard = contact.vcard.clone();
        has_content = true;
    }

    if let Some(contacts) = &msg.contacts_array {
        for contact in &contacts.contacts {
            let mut entry = MessagePayload::from_info(&event.info);
            entry.media_type = Some("contact".to_string());
            entry.contact_name = contact.display_name.clone();
            entry.contact_vcard = contact.vcard.clone();
            out.push(entry);
        }
        // The enclosing message is represented by its parts only.
    }

    if has_content {
        out.push(payload);
    }
    out
}
