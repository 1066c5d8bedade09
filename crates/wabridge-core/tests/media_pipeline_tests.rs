//! End-to-end media pipeline tests through the session manager: events
//! enter via the registered handler exactly as upstream would deliver
//! them, and the detached download tasks run against the mock client
//! under paused time.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wabridge_core::client::mock::MockClient;
use wabridge_core::client::WhatsAppClient;
use wabridge_core::events::{
    Event, MediaRetryData, MediaRetryEvent, MediaRetryResult, MessageEvent, MessageInfo,
};
use wabridge_core::manager::ClientFactory;
use wabridge_core::message::{AudioMessage, ImageMessage, Message};
use wabridge_core::types::Jid;
use wabridge_core::SessionManager;

static DIR_COUNTER: AtomicU64 = AtomicU64::new(1);

fn test_data_dir() -> PathBuf {
    std::env::temp_dir().join(format!(
        "wabridge-media-test-{}-{}",
        std::process::id(),
        DIR_COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

fn manager_with(mock: Arc<MockClient>) -> (SessionManager, PathBuf) {
    let dir = test_data_dir();
    let factory: ClientFactory =
        Arc::new(move |_store| Ok(Arc::clone(&mock) as Arc<dyn WhatsAppClient>));
    (SessionManager::new(&dir, None, None, factory), dir)
}

fn info(id: &str) -> MessageInfo {
    MessageInfo {
        id: id.into(),
        chat: Jid::new("c", "s.whatsapp.net"),
        sender: Jid::new("s", "s.whatsapp.net"),
        push_name: String::new(),
        timestamp: 1700000000,
        is_from_me: false,
    }
}

fn ptt_audio() -> AudioMessage {
    AudioMessage {
        direct_path: Some("/v/audio/abc".into()),
        media_key: vec![7; 32],
        file_enc_sha256: vec![8; 32],
        file_sha256: vec![9; 32],
        mimetype: Some("audio/ogg; codecs=opus".into()),
        ptt: true,
        ..Default::default()
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(120), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("condition should hold within timeout");
}

#[tokio::test(start_paused = true)]
async fn image_receive_populates_cache() {
    let mock = Arc::new(MockClient::logged_in());
    mock.set_download_default(Ok(vec![1u8; 256]));
    let (manager, dir) = manager_with(Arc::clone(&mock));
    let session = manager.get_or_create(1).await.unwrap();

    mock.emit(Event::Message(MessageEvent {
        info: info("img-1"),
        message: Message {
            image: Some(ImageMessage {
                url: Some("https://cdn/x".into()),
                media_key: vec![1; 32],
                mimetype: Some("image/jpeg".into()),
                ..Default::default()
            }),
            ..Default::default()
        },
    }));

    wait_for(|| session.has_cached_media("img-1")).await;
    assert_eq!(session.take_cached_media("img-1").unwrap().len(), 256);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test(start_paused = true)]
async fn ptt_media_retry_correlation() {
    let mock = Arc::new(MockClient::logged_in());
    // Every eager attempt yields the empty stub.
    mock.set_download_default(Ok(Vec::new()));
    mock.set_media_retry_data(MediaRetryData {
        result: MediaRetryResult::Success,
        direct_path: Some("/v/audio/fresh".into()),
    });
    mock.set_path_download_default(Ok(vec![2u8; 1024]));
    let (manager, dir) = manager_with(Arc::clone(&mock));
    let session = manager.get_or_create(1).await.unwrap();

    mock.emit(Event::Message(MessageEvent {
        info: info("m3"),
        message: Message {
            audio: Some(ptt_audio()),
            ..Default::default()
        },
    }));

    // The ladder exhausts and parks a pending retry.
    wait_for(|| session.has_pending_retry("m3")).await;
    assert_eq!(mock.call_count("download"), 5);
    // Early receipt after the first empty attempt, plus the final one.
    assert_eq!(mock.call_count("send_media_retry_receipt"), 2);

    // The sender's device answers with a fresh direct path.
    mock.emit(Event::MediaRetry(MediaRetryEvent {
        message_id: "m3".into(),
        chat: Jid::new("c", "s.whatsapp.net"),
        from_me: false,
        ciphertext: vec![0; 32],
    }));

    wait_for(|| session.has_cached_media("m3")).await;
    assert!(!session.has_pending_retry("m3"));
    assert_eq!(session.take_cached_media("m3").unwrap().len(), 1024);
    assert_eq!(mock.call_count("download_media_with_path"), 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test(start_paused = true)]
async fn audio_fanout_payload_precedes_cached_bytes() {
    let mock = Arc::new(MockClient::logged_in());
    // The download only succeeds on the second attempt, two seconds in.
    mock.queue_download(Ok(Vec::new()));
    mock.queue_download(Ok(vec![3u8; 64]));
    let (manager, dir) = manager_with(Arc::clone(&mock));
    let session = manager.get_or_create(1).await.unwrap();

    mock.emit(Event::Message(MessageEvent {
        info: info("m4"),
        message: Message {
            audio: Some(ptt_audio()),
            ..Default::default()
        },
    }));

    // The normalized payload is visible immediately, before the media
    // task has resolved the bytes.
    let rx = session.event_receiver();
    let envelope = {
        let mut rx = rx.lock().await;
        rx.try_recv().expect("payload enqueued synchronously")
    };
    assert_eq!(envelope.payload.media_type.as_deref(), Some("ptt"));
    assert_eq!(envelope.payload.id, "m4");

    wait_for(|| session.has_cached_media("m4")).await;

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test(start_paused = true)]
async fn non_ptt_audio_never_requests_reupload() {
    let mock = Arc::new(MockClient::logged_in());
    mock.set_download_default(Ok(Vec::new()));
    let (manager, dir) = manager_with(Arc::clone(&mock));
    let session = manager.get_or_create(1).await.unwrap();

    let mut audio = ptt_audio();
    audio.ptt = false;
    mock.emit(Event::Message(MessageEvent {
        info: info("m5"),
        message: Message {
            audio: Some(audio),
            ..Default::default()
        },
    }));

    wait_for(|| mock.call_count("download") == 5).await;
    // Let the task finish its bookkeeping before asserting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(mock.call_count("send_media_retry_receipt"), 0);
    assert!(!session.has_pending_retry("m5"));

    let _ = std::fs::remove_dir_all(&dir);
}
