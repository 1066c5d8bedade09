//! Per-user device identity store.
//!
//! Each tenant owns one SQLite file at `data_dir/user_<id>.db` holding
//! the paired device record and the contact list synced from the phone.
//! The file is what session backup ships to the remote store, so it is
//! created with owner-only permissions.

use crate::client::ContactInfo;
use crate::error::{Error, Result};
use crate::types::Jid;
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS device (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    jid TEXT,
    registration_id INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS contacts (
    jid TEXT PRIMARY KEY,
    push_name TEXT NOT NULL DEFAULT '',
    full_name TEXT NOT NULL DEFAULT ''
);
"#;

/// The paired device record. `jid` is None until pairing completes.
#[derive(Clone, Debug, Default)]
pub struct Device {
    pub jid: Option<Jid>,
    pub registration_id: u32,
    pub created_at: i64,
}

impl Device {
    pub fn is_paired(&self) -> bool {
        self.jid.is_some()
    }
}

/// Handle to one user's device database.
pub struct DeviceStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl DeviceStore {
    /// Open (or create) the device database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Store(format!("failed to create directory: {}", e)))?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::Store(format!("failed to open device db: {}", e)))?;
        restrict_permissions(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Store(format!("failed to open device db: {}", e)))?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.lock()?
            .execute_batch(CREATE_SCHEMA)
            .map_err(|e| Error::Store(format!("failed to create schema: {}", e)))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store("device db lock poisoned".into()))
    }

    /// Path of the backing file, absent for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The device record, if one exists.
    pub fn device(&self) -> Result<Option<Device>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT jid, registration_id, created_at FROM device WHERE id = 1")?;
        let row = stmt.query_row([], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, i64>(2)?,
            ))
        });
        match row {
            Ok((jid, registration_id, created_at)) => {
                let jid = match jid {
                    Some(s) => Some(Jid::from_str(&s)?),
                    None => None,
                };
                Ok(Some(Device {
                    jid,
                    registration_id,
                    created_at,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The existing device record, or a fresh unpaired one.
    pub fn fetch_or_create_device(&self) -> Result<Device> {
        if let Some(device) = self.device()? {
            return Ok(device);
        }
        let device = Device {
            jid: None,
            registration_id: rand::random::<u32>() & 0x3fff,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.save_device(&device)?;
        Ok(device)
    }

    /// Persist the device record (after pairing or key changes).
    pub fn save_device(&self, device: &Device) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO device (id, jid, registration_id, created_at) VALUES (1, ?, ?, ?)",
            params![
                device.jid.as_ref().map(|j| j.to_string()),
                device.registration_id,
                device.created_at
            ],
        )?;
        Ok(())
    }

    /// Delete the device record (unpair).
    pub fn delete_device(&self) -> Result<()> {
        self.lock()?.execute("DELETE FROM device WHERE id = 1", [])?;
        Ok(())
    }

    pub fn upsert_contact(&self, jid: &Jid, info: &ContactInfo) -> Result<()> {
        self.lock()?.execute(
            "INSERT OR REPLACE INTO contacts (jid, push_name, full_name) VALUES (?, ?, ?)",
            params![jid.to_string(), info.push_name, info.full_name],
        )?;
        Ok(())
    }

    pub fn all_contacts(&self) -> Result<Vec<(Jid, ContactInfo)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT jid, push_name, full_name FROM contacts ORDER BY jid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (jid, push_name, full_name) = row?;
            out.push((
                Jid::from_str(&jid)?,
                ContactInfo {
                    push_name,
                    full_name,
                },
            ));
        }
        Ok(out)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)
        .map_err(|e| Error::Store(format!("failed to set db permissions: {}", e)))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
