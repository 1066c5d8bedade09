//! In-memory fake of the upstream client.
//!
//! Records every capability call and exposes configurable return values
//! so the session manager, media pipeline, and HTTP surface are
//! testable without the upstream network. Inbound traffic is simulated
//! with [`MockClient::emit`].

use super::{
    ChatPresence, ContactInfo, EventHandler, GroupInfo, MediaKind, MediaRef, QrItem, SendResponse,
    UploadResponse, WhatsAppClient,
};
use crate::error::{Error, Result};
use crate::events::{Event, MediaRetryData, MediaRetryEvent, MessageInfo};
use crate::message::Message;
use crate::types::Jid;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, RwLock};
use tokio::sync::mpsc;

struct MockState {
    connected: bool,
    logged_in: bool,
    device_id: Option<Jid>,
    contacts: Vec<(Jid, ContactInfo)>,

    connect_already_connected: bool,
    connect_error: Option<String>,
    send_response: Option<SendResponse>,
    send_error: Option<String>,
    presence_error: Option<String>,
    upload_response: Option<UploadResponse>,
    upload_error: Option<String>,
    /// Scripted download outcomes, consumed front to back; when empty,
    /// `download_default` answers every further call.
    download_queue: VecDeque<std::result::Result<Vec<u8>, String>>,
    download_default: std::result::Result<Vec<u8>, String>,
    path_download_queue: VecDeque<std::result::Result<Vec<u8>, String>>,
    path_download_default: std::result::Result<Vec<u8>, String>,
    receipt_error: Option<String>,
    media_retry_data: Option<MediaRetryData>,
    qr_script: Vec<QrItem>,
    joined_groups: Vec<GroupInfo>,
    joined_groups_error: Option<String>,
    group_info: Option<GroupInfo>,
    group_info_error: Option<String>,

    calls: Vec<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            connected: false,
            logged_in: false,
            device_id: None,
            contacts: Vec::new(),
            connect_already_connected: false,
            connect_error: None,
            send_response: None,
            send_error: None,
            presence_error: None,
            upload_response: None,
            upload_error: None,
            download_queue: VecDeque::new(),
            download_default: Ok(Vec::new()),
            path_download_queue: VecDeque::new(),
            path_download_default: Ok(Vec::new()),
            receipt_error: None,
            media_retry_data: None,
            qr_script: Vec::new(),
            joined_groups: Vec::new(),
            joined_groups_error: None,
            group_info: None,
            group_info_error: None,
            calls: Vec::new(),
        }
    }
}

/// Configurable fake upstream client.
pub struct MockClient {
    state: Mutex<MockState>,
    handlers: RwLock<Vec<EventHandler>>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClient {
    /// Disconnected, unpaired client.
    pub fn new() -> Self {
        let state = MockState {
            download_default: Ok(b"mock-image-data".to_vec()),
            path_download_default: Ok(b"mock-path-data".to_vec()),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Connected but not logged in.
    pub fn connected() -> Self {
        let mock = Self::new();
        mock.lock().connected = true;
        mock
    }

    /// Connected, logged in, with a paired device identity.
    pub fn logged_in() -> Self {
        let mock = Self::new();
        {
            let mut state = mock.lock();
            state.connected = true;
            state.logged_in = true;
            state.device_id = Some(Jid::user_jid("1234567890"));
        }
        mock
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, method: &str) {
        self.lock().calls.push(method.to_string());
    }

    /// Simulate an inbound upstream event.
    pub fn emit(&self, evt: Event) {
        if let Ok(handlers) = self.handlers.read() {
            for handler in handlers.iter() {
                handler(evt.clone());
            }
        }
    }

    /// All recorded call names, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// How many times `method` was invoked.
    pub fn call_count(&self, method: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.as_str() == method).count()
    }

    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.lock().logged_in = logged_in;
    }

    pub fn set_device_id(&self, jid: Option<Jid>) {
        self.lock().device_id = jid;
    }

    pub fn set_contacts(&self, contacts: Vec<(Jid, ContactInfo)>) {
        self.lock().contacts = contacts;
    }

    /// Make the next connect report "already connected".
    pub fn set_connect_already_connected(&self) {
        self.lock().connect_already_connected = true;
    }

    pub fn set_connect_error(&self, msg: impl Into<String>) {
        self.lock().connect_error = Some(msg.into());
    }

    pub fn set_send_response(&self, resp: SendResponse) {
        self.lock().send_response = Some(resp);
    }

    pub fn set_send_error(&self, msg: impl Into<String>) {
        self.lock().send_error = Some(msg.into());
    }

    pub fn set_presence_error(&self, msg: impl Into<String>) {
        self.lock().presence_error = Some(msg.into());
    }

    pub fn set_upload_response(&self, resp: UploadResponse) {
        self.lock().upload_response = Some(resp);
    }

    pub fn set_upload_error(&self, msg: impl Into<String>) {
        self.lock().upload_error = Some(msg.into());
    }

    /// Default outcome for `download` once the scripted queue is drained.
    pub fn set_download_default(&self, result: std::result::Result<Vec<u8>, String>) {
        self.lock().download_default = result;
    }

    /// Script the outcome of the next `download` call.
    pub fn queue_download(&self, result: std::result::Result<Vec<u8>, String>) {
        self.lock().download_queue.push_back(result);
    }

    pub fn set_path_download_default(&self, result: std::result::Result<Vec<u8>, String>) {
        self.lock().path_download_default = result;
    }

    pub fn queue_path_download(&self, result: std::result::Result<Vec<u8>, String>) {
        self.lock().path_download_queue.push_back(result);
    }

    pub fn set_receipt_error(&self, msg: impl Into<String>) {
        self.lock().receipt_error = Some(msg.into());
    }

    pub fn set_media_retry_data(&self, data: MediaRetryData) {
        self.lock().media_retry_data = Some(data);
    }

    /// Items delivered on the next `qr_channel` receiver.
    pub fn set_qr_script(&self, items: Vec<QrItem>) {
        self.lock().qr_script = items;
    }

    pub fn set_joined_groups(&self, groups: Vec<GroupInfo>) {
        self.lock().joined_groups = groups;
    }

    pub fn set_joined_groups_error(&self, msg: impl Into<String>) {
        self.lock().joined_groups_error = Some(msg.into());
    }

    pub fn set_group_info(&self, info: GroupInfo) {
        self.lock().group_info = Some(info);
    }

    pub fn set_group_info_error(&self, msg: impl Into<String>) {
        self.lock().group_info_error = Some(msg.into());
    }
}

fn take_scripted(
    queue: &mut VecDeque<std::result::Result<Vec<u8>, String>>,
    default: &std::result::Result<Vec<u8>, String>,
) -> Result<Vec<u8>> {
    let outcome = queue.pop_front().unwrap_or_else(|| default.clone());
    outcome.map_err(Error::Upstream)
}

#[async_trait]
impl WhatsAppClient for MockClient {
    fn is_connected(&self) -> bool {
        self.record("is_connected");
        self.lock().connected
    }

    fn is_logged_in(&self) -> bool {
        self.record("is_logged_in");
        self.lock().logged_in
    }

    async fn connect(&self) -> Result<()> {
        self.record("connect");
        let mut state = self.lock();
        if state.connect_already_connected {
            return Err(Error::AlreadyConnected);
        }
        if let Some(msg) = &state.connect_error {
            return Err(Error::Upstream(msg.clone()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) {
        self.record("disconnect");
        self.lock().connected = false;
    }

    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrItem>> {
        self.record("qr_channel");
        let script = std::mem::take(&mut self.lock().qr_script);
        let (tx, rx) = mpsc::channel(script.len().max(10));
        for item in script {
            let _ = tx.try_send(item);
        }
        // Keep the sender alive so an unscripted channel stays open the
        // way a real pairing stream would.
        tokio::spawn(async move {
            tx.closed().await;
        });
        Ok(rx)
    }

    async fn send_message(&self, _to: &Jid, _message: &Message) -> Result<SendResponse> {
        self.record("send_message");
        let state = self.lock();
        if let Some(msg) = &state.send_error {
            return Err(Error::Upstream(msg.clone()));
        }
        Ok(state.send_response.clone().unwrap_or_else(|| SendResponse {
            id: "mock-msg-id".to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }))
    }

    async fn send_chat_presence(&self, _chat: &Jid, _presence: ChatPresence) -> Result<()> {
        self.record("send_chat_presence");
        match &self.lock().presence_error {
            Some(msg) => Err(Error::Upstream(msg.clone())),
            None => Ok(()),
        }
    }

    async fn upload(&self, _plaintext: &[u8], _kind: MediaKind) -> Result<UploadResponse> {
        self.record("upload");
        let state = self.lock();
        if let Some(msg) = &state.upload_error {
            return Err(Error::Upstream(msg.clone()));
        }
        Ok(state.upload_response.clone().unwrap_or_else(|| UploadResponse {
            url: "https://mock.whatsapp.net/media/123".to_string(),
            direct_path: "/v/mock/123".to_string(),
            media_key: b"mock-media-key".to_vec(),
            file_enc_sha256: b"mock-enc-sha".to_vec(),
            file_sha256: b"mock-sha".to_vec(),
        }))
    }

    async fn download(&self, _media: &MediaRef) -> Result<Vec<u8>> {
        self.record("download");
        let mut state = self.lock();
        let default = state.download_default.clone();
        take_scripted(&mut state.download_queue, &default)
    }

    async fn download_media_with_path(
        &self,
        _direct_path: &str,
        _file_enc_sha256: &[u8],
        _file_sha256: &[u8],
        _media_key: &[u8],
        _file_length: i64,
        _kind: MediaKind,
        _mms_type: &str,
    ) -> Result<Vec<u8>> {
        self.record("download_media_with_path");
        let mut state = self.lock();
        let default = state.path_download_default.clone();
        take_scripted(&mut state.path_download_queue, &default)
    }

    async fn send_media_retry_receipt(&self, _info: &MessageInfo, _media_key: &[u8]) -> Result<()> {
        self.record("send_media_retry_receipt");
        match &self.lock().receipt_error {
            Some(msg) => Err(Error::Upstream(msg.clone())),
            None => Ok(()),
        }
    }

    fn decrypt_media_retry(&self, _evt: &MediaRetryEvent, _media_key: &[u8]) -> Result<MediaRetryData> {
        self.record("decrypt_media_retry");
        self.lock()
            .media_retry_data
            .clone()
            .ok_or_else(|| Error::Crypto("no retry data configured".into()))
    }

    async fn joined_groups(&self) -> Result<Vec<GroupInfo>> {
        self.record("joined_groups");
        let state = self.lock();
        match &state.joined_groups_error {
            Some(msg) => Err(Error::Upstream(msg.clone())),
            None => Ok(state.joined_groups.clone()),
        }
    }

    async fn group_info(&self, jid: &Jid) -> Result<GroupInfo> {
        self.record("group_info");
        let state = self.lock();
        if let Some(msg) = &state.group_info_error {
            return Err(Error::Upstream(msg.clone()));
        }
        state
            .group_info
            .clone()
            .ok_or_else(|| Error::Upstream(format!("unknown group: {}", jid)))
    }

    fn device_id(&self) -> Option<Jid> {
        self.record("device_id");
        self.lock().device_id.clone()
    }

    async fn contacts(&self) -> Result<Vec<(Jid, ContactInfo)>> {
        self.record("contacts");
        Ok(self.lock().contacts.clone())
    }

    fn add_event_handler(&self, handler: EventHandler) {
        self.record("add_event_handler");
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.push(handler);
        }
    }
}
