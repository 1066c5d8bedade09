//! Media acquisition pipeline.
//!
//! The CDN is asynchronous relative to message arrival: desktop-origin
//! messages often land before the sender finished uploading, and a
//! download in that window yields a 26-byte empty stub. The pipeline
//! downloads eagerly on receive, walks a retry ladder over the upload
//! window, and for voice notes falls back to asking the sender's device
//! for a re-upload, correlating the response by message id.

use crate::client::{MediaKind, MediaRef, WhatsAppClient};
use crate::error::{Error, Result};
use crate::events::{MediaRetryEvent, MediaRetryResult, MessageInfo};
use crate::message::{AudioMessage, ImageMessage};
use crate::session::{PendingMediaRetry, UserSession};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Inter-attempt delays for the eager audio fetch, ~12s cumulative.
/// Chosen empirically against observed upload latencies.
pub const AUDIO_FETCH_DELAYS: [Duration; 5] = [
    Duration::ZERO,
    Duration::from_secs(2),
    Duration::from_secs(3),
    Duration::from_secs(4),
    Duration::from_secs(3),
];

/// Backoffs between on-demand download attempts (five attempts total).
pub const ON_DEMAND_BACKOFFS: [Duration; 4] = [
    Duration::from_millis(500),
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Eagerly download a received image into the session media cache.
pub fn spawn_image_fetch(session: &Arc<UserSession>, info: &MessageInfo, image: &ImageMessage) {
    let session = Arc::clone(session);
    let message_id = info.id.clone();
    let media = MediaRef::from(image);
    tokio::spawn(async move {
        match session.client.download(&media).await {
            Ok(data) => {
                debug!(message_id = %message_id, bytes = data.len(), "cached image");
                session.cache_media(&message_id, data);
            }
            Err(e) => warn!(message_id = %message_id, error = %e, "image download failed"),
        }
    });
}

/// Eagerly download received audio, retrying over the upload window and
/// falling back to a media retry receipt for voice notes.
pub fn spawn_audio_fetch(session: &Arc<UserSession>, info: &MessageInfo, audio: &AudioMessage) {
    let session = Arc::clone(session);
    let info = info.clone();
    let audio = audio.clone();
    tokio::spawn(async move {
        fetch_audio(&session, &info, &audio).await;
    });
}

async fn fetch_audio(session: &Arc<UserSession>, info: &MessageInfo, audio: &AudioMessage) {
    let message_id = &info.id;
    let is_ptt = audio.ptt;
    let media = MediaRef::from(audio);
    debug!(
        message_id = %message_id,
        ptt = is_ptt,
        resolved = audio.is_resolved(),
        file_length = audio.file_length.unwrap_or(0),
        "audio fetch"
    );

    let mut fetched: Option<Vec<u8>> = None;
    for (attempt, delay) in AUDIO_FETCH_DELAYS.iter().enumerate() {
        if !delay.is_zero() {
            debug!(message_id = %message_id, attempt, "audio retry after {:?}", delay);
            tokio::time::sleep(*delay).await;
        }

        if !audio.is_resolved() {
            debug!(message_id = %message_id, attempt = attempt + 1, "media not resolved, skipping attempt");
            continue;
        }

        match session.client.download(&media).await {
            Err(e) => {
                warn!(message_id = %message_id, attempt = attempt + 1, error = %e, "audio download error");
                continue;
            }
            Ok(data) if !data.is_empty() => {
                fetched = Some(data);
                break;
            }
            Ok(_) => {
                debug!(message_id = %message_id, attempt = attempt + 1, "empty stub from cdn");
                // A first-attempt stub usually means the upload is still
                // in flight; nudge the sender to finish it.
                if attempt == 0 && is_ptt {
                    if let Err(e) = session
                        .client
                        .send_media_retry_receipt(info, &audio.media_key)
                        .await
                    {
                        warn!(message_id = %message_id, error = %e, "early media retry receipt failed");
                    }
                }
            }
        }
    }

    if let Some(data) = fetched {
        debug!(message_id = %message_id, bytes = data.len(), ptt = is_ptt, "cached audio");
        session.cache_media(message_id, data);
        return;
    }

    if !is_ptt {
        warn!(message_id = %message_id, "audio download failed after all retries");
        return;
    }

    // Last resort for voice notes: ask the sender's device to re-upload
    // and remember enough to finish the download when it answers.
    session.insert_pending_retry(PendingMediaRetry {
        message_id: message_id.clone(),
        media_key: audio.media_key.clone(),
        is_ptt,
        audio: audio.clone(),
    });
    if let Err(e) = session
        .client
        .send_media_retry_receipt(info, &audio.media_key)
        .await
    {
        warn!(message_id = %message_id, error = %e, "media retry receipt failed");
        session.remove_pending_retry(message_id);
    } else {
        debug!(message_id = %message_id, "media retry receipt sent, awaiting response");
    }
}

/// Complete a pending download when the sender's device answers a retry
/// receipt. One attempt per entry; the entry is removed regardless of
/// the outcome.
pub async fn handle_media_retry(session: Arc<UserSession>, evt: MediaRetryEvent) {
    let Some(pending) = session.pending_retry(&evt.message_id) else {
        debug!(message_id = %evt.message_id, "no pending retry, ignoring");
        return;
    };
    complete_pending_retry(&session, &evt, &pending).await;
    session.remove_pending_retry(&evt.message_id);
}

async fn complete_pending_retry(
    session: &UserSession,
    evt: &MediaRetryEvent,
    pending: &PendingMediaRetry,
) {
    let message_id = &evt.message_id;
    let data = match session.client.decrypt_media_retry(evt, &pending.media_key) {
        Ok(data) => data,
        Err(e) => {
            warn!(message_id = %message_id, error = %e, "media retry decryption failed");
            return;
        }
    };
    if data.result != MediaRetryResult::Success {
        warn!(message_id = %message_id, result = ?data.result, "media retry rejected by sender");
        return;
    }
    let Some(direct_path) = data.direct_path.filter(|p| !p.is_empty()) else {
        warn!(message_id = %message_id, "media retry succeeded without a direct path");
        return;
    };

    debug!(message_id = %message_id, direct_path = %direct_path, "media retry yielded fresh path");
    match session
        .client
        .download_media_with_path(
            &direct_path,
            &pending.audio.file_enc_sha256,
            &pending.audio.file_sha256,
            &pending.media_key,
            -1,
            MediaKind::Audio,
            "audio",
        )
        .await
    {
        Err(e) => warn!(message_id = %message_id, error = %e, "media retry download failed"),
        Ok(data) if data.is_empty() => {
            warn!(message_id = %message_id, "media retry download returned 0 bytes");
        }
        Ok(data) => {
            debug!(message_id = %message_id, bytes = data.len(), ptt = pending.is_ptt, "cached audio via media retry");
            session.cache_media(message_id, data);
        }
    }
}

/// On-demand download for `/media/download` cache misses. Walks the
/// backoff ladder and succeeds on the first non-empty result; a stale
/// CDN auth token shows up as a 0-byte body and is retried like an
/// error.
pub async fn fetch_on_demand(
    client: &dyn WhatsAppClient,
    direct_path: &str,
    file_enc_sha256: &[u8],
    file_sha256: &[u8],
    media_key: &[u8],
    mime_type: &str,
) -> Result<Vec<u8>> {
    let kind = MediaKind::from_mime(mime_type);
    let mut last: Result<Vec<u8>> = Err(Error::MediaUnavailable);
    for attempt in 0..=ON_DEMAND_BACKOFFS.len() {
        if attempt > 0 {
            let backoff = ON_DEMAND_BACKOFFS[attempt - 1];
            debug!(attempt, "media download retry after {:?}", backoff);
            tokio::time::sleep(backoff).await;
        }
        last = client
            .download_media_with_path(
                direct_path,
                file_enc_sha256,
                file_sha256,
                media_key,
                -1,
                kind,
                kind.mms_type(),
            )
            .await;
        match &last {
            Err(e) => debug!(attempt = attempt + 1, error = %e, "media download error"),
            Ok(data) if data.is_empty() => {
                debug!(attempt = attempt + 1, "media download returned 0 bytes");
            }
            Ok(_) => break,
        }
    }
    match last {
        Ok(data) if !data.is_empty() => Ok(data),
        Ok(_) => Err(Error::MediaUnavailable),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::events::MediaRetryData;
    use crate::types::Jid;
    use std::path::PathBuf;

    fn session_with(mock: Arc<MockClient>) -> Arc<UserSession> {
        Arc::new(UserSession::new(
            1,
            mock,
            PathBuf::from("/tmp/user_1.db"),
        ))
    }

    fn info(id: &str) -> MessageInfo {
        MessageInfo {
            id: id.into(),
            chat: Jid::user_jid("chat"),
            sender: Jid::user_jid("sender"),
            push_name: String::new(),
            timestamp: 1700000000,
            is_from_me: false,
        }
    }

    fn resolved_audio(ptt: bool) -> AudioMessage {
        AudioMessage {
            direct_path: Some("/v/audio/abc".into()),
            media_key: vec![7; 32],
            file_enc_sha256: vec![8; 32],
            file_sha256: vec![9; 32],
            mimetype: Some("audio/ogg; codecs=opus".into()),
            ptt,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn audio_first_attempt_success_caches() {
        let mock = Arc::new(MockClient::logged_in());
        mock.set_download_default(Ok(vec![5u8; 512]));
        let session = session_with(Arc::clone(&mock));

        fetch_audio(&session, &info("m2"), &resolved_audio(true)).await;

        assert_eq!(session.take_cached_media("m2").unwrap().len(), 512);
        assert_eq!(mock.call_count("download"), 1);
        assert_eq!(mock.call_count("send_media_retry_receipt"), 0);
        assert!(!session.has_pending_retry("m2"));
    }

    #[tokio::test(start_paused = true)]
    async fn audio_empty_stub_sends_early_receipt_then_recovers() {
        let mock = Arc::new(MockClient::logged_in());
        mock.queue_download(Ok(Vec::new()));
        mock.queue_download(Ok(vec![1u8; 64]));
        let session = session_with(Arc::clone(&mock));

        fetch_audio(&session, &info("m3"), &resolved_audio(true)).await;

        assert!(session.has_cached_media("m3"));
        assert_eq!(mock.call_count("download"), 2);
        // Early receipt after the first 0-byte attempt.
        assert_eq!(mock.call_count("send_media_retry_receipt"), 1);
        assert!(!session.has_pending_retry("m3"));
    }

    #[tokio::test(start_paused = true)]
    async fn audio_exhaustion_inserts_pending_retry_for_ptt() {
        let mock = Arc::new(MockClient::logged_in());
        mock.set_download_default(Ok(Vec::new()));
        let session = session_with(Arc::clone(&mock));

        fetch_audio(&session, &info("m4"), &resolved_audio(true)).await;

        assert_eq!(mock.call_count("download"), AUDIO_FETCH_DELAYS.len());
        // Early receipt plus the last-resort receipt.
        assert_eq!(mock.call_count("send_media_retry_receipt"), 2);
        assert!(session.has_pending_retry("m4"));
        assert!(!session.has_cached_media("m4"));
    }

    #[tokio::test(start_paused = true)]
    async fn audio_exhaustion_without_ptt_leaves_no_retry() {
        let mock = Arc::new(MockClient::logged_in());
        mock.set_download_default(Ok(Vec::new()));
        let session = session_with(Arc::clone(&mock));

        fetch_audio(&session, &info("m5"), &resolved_audio(false)).await;

        assert_eq!(mock.call_count("send_media_retry_receipt"), 0);
        assert!(!session.has_pending_retry("m5"));
    }

    #[tokio::test(start_paused = true)]
    async fn audio_failed_receipt_removes_pending_entry() {
        let mock = Arc::new(MockClient::logged_in());
        mock.set_download_default(Ok(Vec::new()));
        mock.set_receipt_error("socket closed");
        let session = session_with(Arc::clone(&mock));

        fetch_audio(&session, &info("m6"), &resolved_audio(true)).await;

        assert!(!session.has_pending_retry("m6"));
    }

    #[tokio::test(start_paused = true)]
    async fn unresolved_audio_never_downloads() {
        let mock = Arc::new(MockClient::logged_in());
        let session = session_with(Arc::clone(&mock));
        let audio = AudioMessage {
            ptt: true,
            ..Default::default()
        };

        fetch_audio(&session, &info("m7"), &audio).await;

        assert_eq!(mock.call_count("download"), 0);
        // Still falls through to the retry receipt for voice notes.
        assert!(session.has_pending_retry("m7"));
    }

    #[tokio::test]
    async fn media_retry_response_completes_download() {
        let mock = Arc::new(MockClient::logged_in());
        mock.set_media_retry_data(MediaRetryData {
            result: MediaRetryResult::Success,
            direct_path: Some("/v/fresh".into()),
        });
        mock.set_path_download_default(Ok(vec![2u8; 1024]));
        let session = session_with(Arc::clone(&mock));
        session.insert_pending_retry(PendingMediaRetry {
            message_id: "m8".into(),
            media_key: vec![7; 32],
            is_ptt: true,
            audio: resolved_audio(true),
        });

        handle_media_retry(
            Arc::clone(&session),
            MediaRetryEvent {
                message_id: "m8".into(),
                chat: Jid::user_jid("chat"),
                from_me: false,
                ciphertext: vec![0; 32],
            },
        )
        .await;

        assert_eq!(session.take_cached_media("m8").unwrap().len(), 1024);
        assert!(!session.has_pending_retry("m8"));
        assert_eq!(mock.call_count("download_media_with_path"), 1);
    }

    #[tokio::test]
    async fn media_retry_without_pending_entry_is_ignored() {
        let mock = Arc::new(MockClient::logged_in());
        let session = session_with(Arc::clone(&mock));

        handle_media_retry(
            Arc::clone(&session),
            MediaRetryEvent {
                message_id: "unknown".into(),
                chat: Jid::user_jid("chat"),
                from_me: false,
                ciphertext: vec![0; 32],
            },
        )
        .await;

        assert_eq!(mock.call_count("decrypt_media_retry"), 0);
        assert_eq!(mock.call_count("download_media_with_path"), 0);
    }

    #[tokio::test]
    async fn media_retry_failure_still_clears_entry() {
        let mock = Arc::new(MockClient::logged_in());
        mock.set_media_retry_data(MediaRetryData {
            result: MediaRetryResult::NotFound,
            direct_path: None,
        });
        let session = session_with(Arc::clone(&mock));
        session.insert_pending_retry(PendingMediaRetry {
            message_id: "m9".into(),
            media_key: vec![7; 32],
            is_ptt: true,
            audio: resolved_audio(true),
        });

        handle_media_retry(
            Arc::clone(&session),
            MediaRetryEvent {
                message_id: "m9".into(),
                chat: Jid::user_jid("chat"),
                from_me: false,
                ciphertext: vec![0; 32],
            },
        )
        .await;

        assert!(!session.has_pending_retry("m9"));
        assert_eq!(mock.call_count("download_media_with_path"), 0);
        assert!(!session.has_cached_media("m9"));
    }

    #[tokio::test(start_paused = true)]
    async fn on_demand_walks_exactly_five_attempts() {
        let mock = MockClient::logged_in();
        mock.set_path_download_default(Ok(Vec::new()));

        let err = fetch_on_demand(&mock, "/v/x", &[1], &[2], &[3], "audio/ogg")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MediaUnavailable));
        assert_eq!(mock.call_count("download_media_with_path"), 1 + ON_DEMAND_BACKOFFS.len());
    }

    #[tokio::test(start_paused = true)]
    async fn on_demand_stops_on_first_content() {
        let mock = MockClient::logged_in();
        mock.queue_path_download(Ok(Vec::new()));
        mock.queue_path_download(Err("cdn 503".into()));
        mock.queue_path_download(Ok(vec![1, 2, 3]));

        let data = fetch_on_demand(&mock, "/v/x", &[1], &[2], &[3], "image/jpeg")
            .await
            .unwrap();

        assert_eq!(data, vec![1, 2, 3]);
        assert_eq!(mock.call_count("download_media_with_path"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn on_demand_surfaces_last_error() {
        let mock = MockClient::logged_in();
        mock.set_path_download_default(Err("cdn unreachable".into()));

        let err = fetch_on_demand(&mock, "/v/x", &[1], &[2], &[3], "application/pdf")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Upstream(_)));
    }
}
