//! Session lifecycle.
//!
//! One session per user id, created lazily, backed by one device
//! database each. Creation and removal run under the map's write lock
//! so concurrent callers always observe a single session per tenant.

use crate::client::live::LiveClient;
use crate::client::WhatsAppClient;
use crate::error::{Error, Result};
use crate::session::UserSession;
use crate::store::DeviceStore;
use crate::types::UserId;
use crate::vault::{BackupStore, SessionCipher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Builds the upstream client for a freshly opened device store.
/// Production wires [`LiveClient`]; tests substitute the mock.
pub type ClientFactory =
    Arc<dyn Fn(Arc<DeviceStore>) -> Result<Arc<dyn WhatsAppClient>> + Send + Sync>;

/// Owner of all live sessions.
pub struct SessionManager {
    sessions: RwLock<HashMap<UserId, Arc<UserSession>>>,
    data_dir: PathBuf,
    backup: Option<BackupStore>,
    cipher: Option<SessionCipher>,
    factory: ClientFactory,
}

impl SessionManager {
    /// Create a manager. `backup_url` and `session_key_b64` together
    /// enable encrypted session persistence; an invalid key only logs a
    /// warning and turns the feature off.
    pub fn new(
        data_dir: impl Into<PathBuf>,
        backup_url: Option<String>,
        session_key_b64: Option<String>,
        factory: ClientFactory,
    ) -> Self {
        let data_dir = data_dir.into();
        if let Err(e) = std::fs::create_dir_all(&data_dir) {
            warn!(error = %e, "could not create data dir");
        }
        let cipher = session_key_b64.and_then(|key| {
            let cipher = SessionCipher::from_base64(&key);
            if cipher.is_none() {
                warn!("invalid encryption key, session persistence disabled");
            }
            cipher
        });
        let backup = backup_url
            .filter(|url| !url.is_empty())
            .map(BackupStore::new);
        Self {
            sessions: RwLock::new(HashMap::new()),
            data_dir,
            backup,
            cipher,
            factory,
        }
    }

    /// Manager wired to the concrete upstream client.
    pub fn with_live_client(
        data_dir: impl Into<PathBuf>,
        backup_url: Option<String>,
        session_key_b64: Option<String>,
    ) -> Self {
        Self::new(
            data_dir,
            backup_url,
            session_key_b64,
            Arc::new(|store| Ok(Arc::new(LiveClient::new(store)?) as Arc<dyn WhatsAppClient>)),
        )
    }

    /// Whether encrypted remote persistence is active.
    pub fn backup_enabled(&self) -> bool {
        self.backup.is_some() && self.cipher.is_some()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn db_path(&self, user_id: UserId) -> PathBuf {
        self.data_dir.join(format!("user_{}.db", user_id))
    }

    /// Return the existing session for a user or create one: restore
    /// the device db from backup (best effort), open the store, ensure
    /// a device record, build the client, and register the session's
    /// event handler before the session becomes visible.
    pub async fn get_or_create(&self, user_id: UserId) -> Result<Arc<UserSession>> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(&user_id) {
            session.touch();
            return Ok(Arc::clone(session));
        }

        self.restore_backup(user_id).await;

        let db_path = self.db_path(user_id);
        let store = Arc::new(DeviceStore::open(&db_path)?);
        store.fetch_or_create_device()?;
        let client = (self.factory)(Arc::clone(&store))?;

        let session = Arc::new(UserSession::new(user_id, client, db_path));
        let weak = Arc::downgrade(&session);
        session.client.add_event_handler(Box::new(move |evt| {
            if let Some(session) = weak.upgrade() {
                session.handle_event(evt);
            }
        }));

        sessions.insert(user_id, Arc::clone(&session));
        Ok(session)
    }

    /// Look up a session, refreshing its last-used stamp.
    pub async fn get(&self, user_id: UserId) -> Option<Arc<UserSession>> {
        let sessions = self.sessions.read().await;
        sessions.get(&user_id).map(|session| {
            session.touch();
            Arc::clone(session)
        })
    }

    /// Disconnect, persist, and drop a session. A save failure never
    /// blocks removal.
    pub async fn remove(&self, user_id: UserId) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.remove(&user_id) {
            session.client.disconnect().await;
            if let Err(e) = self.push_backup(user_id).await {
                warn!(user_id, error = %e, "failed to save session on remove");
            }
        }
    }

    /// Persist a live session to the remote backup.
    pub async fn save(&self, user_id: UserId) -> Result<()> {
        let sessions = self.sessions.read().await;
        if sessions.contains_key(&user_id) {
            self.push_backup(user_id).await?;
        }
        Ok(())
    }

    /// Disconnect every session and flush backups. Called on teardown.
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.write().await;
        for (user_id, session) in sessions.drain() {
            session.client.disconnect().await;
            if let Err(e) = self.push_backup(user_id).await {
                warn!(user_id, error = %e, "failed to save session on shutdown");
            }
        }
        info!("all sessions disconnected");
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Encrypt a device database for the remote store. Fails with
    /// [`Error::NoSessionKey`] when no valid key is configured.
    fn encrypt_backup(&self, db_bytes: &[u8]) -> Result<String> {
        match &self.cipher {
            Some(cipher) => cipher.encrypt(db_bytes),
            None => Err(Error::NoSessionKey),
        }
    }

    /// Decrypt a fetched backup payload. Fails with
    /// [`Error::NoSessionKey`] when no valid key is configured.
    fn decrypt_backup(&self, encoded: &str) -> Result<Zeroizing<Vec<u8>>> {
        match &self.cipher {
            Some(cipher) => cipher.decrypt(encoded),
            None => Err(Error::NoSessionKey),
        }
    }

    /// Best-effort restore of the device db from the remote backup.
    /// Failures are logged and never block session creation.
    async fn restore_backup(&self, user_id: UserId) {
        let Some(backup) = self.backup.as_ref() else {
            return;
        };
        let encoded = match backup.fetch(user_id).await {
            Ok(Some(data)) => data,
            Ok(None) => return,
            Err(e) => {
                warn!(user_id, error = %e, "failed to fetch session backup");
                return;
            }
        };
        let db_bytes = match self.decrypt_backup(&encoded) {
            Ok(bytes) => bytes,
            Err(Error::NoSessionKey) => return,
            Err(e) => {
                warn!(user_id, error = %e, "failed to decrypt session backup");
                return;
            }
        };
        if let Err(e) = write_restored_db(&self.db_path(user_id), &db_bytes) {
            warn!(user_id, error = %e, "failed to write restored session db");
            return;
        }
        info!(user_id, "restored session from backup");
    }

    async fn push_backup(&self, user_id: UserId) -> Result<()> {
        let Some(backup) = self.backup.as_ref() else {
            return Ok(());
        };
        let db_bytes = tokio::fs::read(self.db_path(user_id)).await?;
        let encoded = match self.encrypt_backup(&db_bytes) {
            Ok(encoded) => encoded,
            // Persistence is off without a valid key.
            Err(Error::NoSessionKey) => return Ok(()),
            Err(e) => return Err(e),
        };
        backup.store(user_id, &encoded).await?;
        info!(user_id, "saved session to backup");
        Ok(())
    }
}

fn write_restored_db(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
