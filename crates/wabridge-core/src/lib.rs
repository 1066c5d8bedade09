//! # wabridge core
//!
//! Multi-tenant gateway core for the WhatsApp multidevice network.
//! Clients that cannot speak the upstream protocol get per-user
//! sessions, QR device pairing, normalized inbound events, and working
//! media downloads through a small capability surface.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              HTTP surface               │
//! ├─────────────────────────────────────────┤
//! │   manager   │   session   │    media    │
//! ├─────────────────────────────────────────┤
//! │       payload        │      vault       │
//! ├─────────────────────────────────────────┤
//! │    client (capability)    │    store    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The upstream protocol library is reachable only through the
//! [`client::WhatsAppClient`] capability; everything above it is
//! exercised in tests against the in-memory fake.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod error;
pub mod events;
pub mod manager;
pub mod media;
pub mod message;
pub mod payload;
pub mod session;
pub mod store;
pub mod types;
pub mod vault;

pub use error::{Error, Result};
pub use manager::SessionManager;
pub use session::UserSession;
pub use types::{Jid, MessageId, UserId};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
