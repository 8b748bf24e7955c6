//! termnotify - terminal notifications over a Unix socket.
//!
//! A short-lived `tn` command builds a [`NotificationPayload`] and hands it
//! to a long-lived session process, which owns the notification sink.
//!
//! # Architecture
//!
//! - **Client** - validates payloads and performs one blocking round trip per
//!   request ([`socket::client`])
//! - **Server** - accepts connections one at a time and dispatches decoded
//!   requests ([`socket::server`])
//! - **Session** - authorization, group replacement, attachments, delivery
//!   ([`session`])
//! - **Engine** - the same `post`/`list`/`remove` surface in-process or over
//!   the socket ([`engine`])
//!
//! # Modules
//!
//! - [`payload`] - notification content
//! - [`validation`] - payload preflight
//! - [`socket`] - framing, messages, client and server
//! - [`session`] - session manager, sink and attachment resolution
//! - [`config`] - configuration loading

pub mod config;
pub mod engine;
pub mod payload;
pub mod session;
pub mod socket;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Engine, EngineError};
pub use payload::{InterruptionLevel, NotificationPayload};
pub use session::SessionManager;
pub use socket::messages::{Response, Status};
