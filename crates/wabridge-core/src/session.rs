//! Per-user upstream session.
//!
//! A session owns one upstream client and the bounded plumbing between
//! the client's event handler and the HTTP surface: the pairing queue,
//! the login latch, the normalized event queue, the media cache, and
//! the media retry correlation table.
//!
//! All queues drop the newest item on overflow. The upstream dispatcher
//! must never block on a slow HTTP consumer, or every session sharing
//! the socket stalls; the gateway makes no durability promise, so a
//! dropped event is acceptable.

use crate::client::WhatsAppClient;
use crate::events::Event;
use crate::media;
use crate::message::AudioMessage;
use crate::payload::{self, GatewayEvent, MessagePayload};
use crate::types::{MessageId, UserId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::warn;

/// Pending pairing codes kept per session.
pub const QR_QUEUE_CAPACITY: usize = 10;

/// Normalized payloads buffered between the handler and the SSE writer.
pub const EVENT_QUEUE_CAPACITY: usize = 100;

/// State needed to finish a media download once the sender's device
/// answers a retry receipt. One attempt per entry; the entry is removed
/// on response or on a failed receipt send.
#[derive(Clone, Debug)]
pub struct PendingMediaRetry {
    pub message_id: MessageId,
    pub media_key: Vec<u8>,
    pub is_ptt: bool,
    pub audio: AudioMessage,
}

type SharedReceiver<T> = Arc<AsyncMutex<mpsc::Receiver<T>>>;

/// One user's live upstream session.
pub struct UserSession {
    pub user_id: UserId,
    pub client: Arc<dyn WhatsAppClient>,
    pub db_path: PathBuf,
    last_used: RwLock<Instant>,

    qr_tx: mpsc::Sender<String>,
    qr_rx: SharedReceiver<String>,
    login_tx: mpsc::Sender<()>,
    login_rx: SharedReceiver<()>,
    event_tx: mpsc::Sender<GatewayEvent>,
    event_rx: SharedReceiver<GatewayEvent>,

    media_cache: RwLock<HashMap<MessageId, Vec<u8>>>,
    pending_retries: RwLock<HashMap<MessageId, PendingMediaRetry>>,
}

impl UserSession {
    pub fn new(user_id: UserId, client: Arc<dyn WhatsAppClient>, db_path: PathBuf) -> Self {
        let (qr_tx, qr_rx) = mpsc::channel(QR_QUEUE_CAPACITY);
        let (login_tx, login_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        Self {
            user_id,
            client,
            db_path,
            last_used: RwLock::new(Instant::now()),
            qr_tx,
            qr_rx: Arc::new(AsyncMutex::new(qr_rx)),
            login_tx,
            login_rx: Arc::new(AsyncMutex::new(login_rx)),
            event_tx,
            event_rx: Arc::new(AsyncMutex::new(event_rx)),
            media_cache: RwLock::new(HashMap::new()),
            pending_retries: RwLock::new(HashMap::new()),
        }
    }

    /// Mark the session as recently accessed.
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_used.write() {
            *last = Instant::now();
        }
    }

    pub fn last_used(&self) -> Instant {
        self.last_used.read().map(|v| *v).unwrap_or_else(|e| *e.into_inner())
    }

    /// Queue a pairing code for the QR stream. Non-blocking; codes past
    /// the queue capacity are dropped.
    pub fn push_qr(&self, code: String) {
        let _ = self.qr_tx.try_send(code);
    }

    /// Trip the login latch. Idempotent.
    pub fn complete_login(&self) {
        let _ = self.login_tx.try_send(());
    }

    /// Queue a normalized payload for the event stream.
    pub fn enqueue(&self, payload: MessagePayload) {
        match self.event_tx.try_send(GatewayEvent::message(payload)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(user_id = self.user_id, "event queue full, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// The single consumer handle for the QR stream.
    pub fn qr_receiver(&self) -> SharedReceiver<String> {
        Arc::clone(&self.qr_rx)
    }

    pub fn login_receiver(&self) -> SharedReceiver<()> {
        Arc::clone(&self.login_rx)
    }

    pub fn event_receiver(&self) -> SharedReceiver<GatewayEvent> {
        Arc::clone(&self.event_rx)
    }

    /// Upstream event handler. Registered once, before the session is
    /// exposed. Anything that may block runs on a detached task so the
    /// upstream dispatcher never stalls.
    pub fn handle_event(self: &Arc<Self>, evt: Event) {
        match evt {
            Event::Message(ev) => {
                if let Some(image) = &ev.message.image {
                    media::spawn_image_fetch(self, &ev.info, image);
                }
                if let Some(audio) = &ev.message.audio {
                    media::spawn_audio_fetch(self, &ev.info, audio);
                }
                for payload in payload::extract(&ev) {
                    self.enqueue(payload);
                }
            }
            Event::MediaRetry(ev) => {
                let session = Arc::clone(self);
                tokio::spawn(async move {
                    media::handle_media_retry(session, ev).await;
                });
            }
            _ => {}
        }
    }

    pub fn cache_media(&self, message_id: &str, data: Vec<u8>) {
        if let Ok(mut cache) = self.media_cache.write() {
            cache.insert(message_id.to_string(), data);
        }
    }

    /// Remove and return cached bytes. Entries are served exactly once.
    pub fn take_cached_media(&self, message_id: &str) -> Option<Vec<u8>> {
        self.media_cache
            .write()
            .ok()
            .and_then(|mut cache| cache.remove(message_id))
    }

    pub fn has_cached_media(&self, message_id: &str) -> bool {
        self.media_cache
            .read()
            .map(|cache| cache.contains_key(message_id))
            .unwrap_or(false)
    }

    pub fn insert_pending_retry(&self, pending: PendingMediaRetry) {
        if let Ok(mut retries) = self.pending_retries.write() {
            retries.insert(pending.message_id.clone(), pending);
        }
    }

    pub fn pending_retry(&self, message_id: &str) -> Option<PendingMediaRetry> {
        self.pending_retries
            .read()
            .ok()
            .and_then(|retries| retries.get(message_id).cloned())
    }

    pub fn remove_pending_retry(&self, message_id: &str) {
        if let Ok(mut retries) = self.pending_retries.write() {
            retries.remove(message_id);
        }
    }

    pub fn has_pending_retry(&self, message_id: &str) -> bool {
        self.pending_retries
            .read()
            .map(|retries| retries.contains_key(message_id))
            .unwrap_or(false)
    }
}
