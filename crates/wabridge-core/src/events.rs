//! Event types emitted by the upstream client.

use crate::message::Message;
use crate::types::{Jid, MessageId};

/// Events delivered to registered session handlers.
#[derive(Clone, Debug)]
pub enum Event {
    /// Connected and authenticated.
    Connected,

    /// Incoming decrypted message.
    Message(MessageEvent),

    /// Response to a previously sent media retry receipt. Carries the
    /// sealed notification; decryption needs the per-message media key.
    MediaRetry(MediaRetryEvent),

    /// Disconnected (transient).
    Disconnected { reason: String },
}

/// Delivery metadata common to every inbound message.
#[derive(Clone, Debug)]
pub struct MessageInfo {
    pub id: MessageId,
    pub chat: Jid,
    pub sender: Jid,
    pub push_name: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub is_from_me: bool,
}

#[derive(Clone, Debug)]
pub struct MessageEvent {
    pub info: MessageInfo,
    pub message: Message,
}

/// Sealed media retry notification from the original sender's device.
#[derive(Clone, Debug)]
pub struct MediaRetryEvent {
    pub message_id: MessageId,
    pub chat: Jid,
    pub from_me: bool,
    pub ciphertext: Vec<u8>,
}

/// Decrypted content of a [`MediaRetryEvent`].
#[derive(Clone, Debug)]
pub struct MediaRetryData {
    pub result: MediaRetryResult,
    pub direct_path: Option<String>,
}

/// Outcome reported by the re-uploading device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaRetryResult {
    Success,
    NotFound,
    GeneralError,
}
