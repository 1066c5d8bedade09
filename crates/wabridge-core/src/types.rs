//! Protocol-native identifier types.

use crate::error::Error;
use std::fmt;
use std::str::FromStr;

/// Known JID servers.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";

/// Tenant key. Opaque positive integer supplied by API callers.
pub type UserId = i64;

/// Upstream message identifier.
pub type MessageId = String;

/// JID (user/group/server identifier), e.g. `123456789@s.whatsapp.net`
/// or `123-456@g.us`. A device suffix (`user:device@server`) is accepted
/// and preserved.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Jid {
    pub user: String,
    pub device: u16,
    pub server: String,
}

impl Jid {
    /// New regular JID (user@server).
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: 0,
            server: server.into(),
        }
    }

    /// JID for a user on the default server.
    pub fn user_jid(user: impl Into<String>) -> Self {
        Self::new(user, DEFAULT_USER_SERVER)
    }

    /// Whether this JID addresses a group chat.
    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '@');
        let user_part = parts.next().unwrap_or_default();
        let server = match parts.next() {
            Some(server) if !server.is_empty() => server.to_string(),
            _ => return Err(Error::InvalidJid(s.to_string())),
        };
        let mut jid = Self {
            user: user_part.to_string(),
            device: 0,
            server,
        };
        if let Some((user, device)) = user_part.split_once(':') {
            jid.user = user.to_string();
            jid.device = device
                .parse()
                .map_err(|_| Error::InvalidJid(s.to_string()))?;
        }
        if jid.user.is_empty() {
            return Err(Error::InvalidJid(s.to_string()));
        }
        Ok(jid)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

impl serde::Serialize for Jid {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Jid {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Jid::from_str(&s).map_err(serde::de::Error::custom)
    }
}
