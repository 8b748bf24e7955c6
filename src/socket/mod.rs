//! Unix domain socket IPC between the `tn` CLI and the session process.
//!
//! Every connection carries exactly one request and one response. The
//! session process serves connections strictly one at a time.
//!
//! # Architecture
//!
//! ```text
//! tn CLI (client)                         Session process (server)
//! ┌────────────────────┐                 ┌──────────────────┐
//! │ client::round_trip │  one frame each │ SessionServer    │
//! │  UnixStream        │◄───────────────►│  UnixListener    │
//! └────────────────────┘   way, then     │  accept → serve  │
//!                           close        └────────┬─────────┘
//!                                                 │ Request
//!                                                 ▼
//!                                          SessionManager → sink
//! ```
//!
//! # Wire Protocol
//!
//! Length-prefixed frames: `[u32 BE length][JSON payload]`
//!
//! See [`framing`] for the codec and [`messages`] for the JSON shapes.

pub mod client;
pub mod framing;
pub mod messages;
pub mod server;

use std::path::PathBuf;

/// Socket path limit. `sun_path` is 104 bytes on macOS and 108 on Linux;
/// the smaller one is used everywhere.
pub const MAX_SOCKET_PATH: usize = 104;

/// Errors raised by the framing layer, the RPC client and the server loop.
#[derive(Debug)]
pub enum IpcError {
    /// Could not connect to the socket.
    Connect {
        /// Socket path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Socket path does not fit in `sun_path`.
    PathTooLong {
        /// Socket path.
        path: PathBuf,
        /// Path length in bytes.
        len: usize,
        /// Largest accepted length.
        max: usize,
    },
    /// Could not bind the listening socket.
    Bind {
        /// Socket path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Writing a frame failed.
    Write(std::io::Error),
    /// Reading a frame failed.
    Read(std::io::Error),
    /// Peer closed before delivering the declared number of bytes.
    ShortRead {
        /// Bytes the frame promised.
        expected: usize,
        /// Bytes received before EOF.
        received: usize,
    },
    /// Frame header declares more than [`framing::MAX_FRAME_SIZE`].
    FrameTooLarge {
        /// Declared length.
        length: usize,
        /// Limit.
        max: usize,
    },
    /// Value could not be serialized.
    Encode(serde_json::Error),
    /// Payload did not match the expected shape.
    Decode(serde_json::Error),
    /// Payload matched no known request shape.
    Protocol(String),
}

impl IpcError {
    /// Whether this error happened while establishing the connection.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::PathTooLong { .. })
    }
}

impl std::fmt::Display for IpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect { path, source } => {
                write!(f, "connect({}) failed: {source}", path.display())
            }
            Self::PathTooLong { path, len, max } => write!(
                f,
                "connect({}) failed: socket path too long ({len} bytes, max {})",
                path.display(),
                max - 1
            ),
            Self::Bind { path, source } => {
                write!(f, "bind({}) failed: {source}", path.display())
            }
            Self::Write(e) => write!(f, "write failed: {e}"),
            Self::Read(e) => write!(f, "read failed: {e}"),
            Self::ShortRead { expected, received } => {
                write!(f, "short read: expected {expected} bytes, got {received}")
            }
            Self::FrameTooLarge { length, max } => {
                write!(f, "frame too large: {length} bytes (max {max})")
            }
            Self::Encode(e) => write!(f, "encode failed: {e}"),
            Self::Decode(e) => write!(f, "decode failed: {e}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}

impl std::error::Error for IpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect { source, .. } | Self::Bind { source, .. } => Some(source),
            Self::Write(e) | Self::Read(e) => Some(e),
            Self::Encode(e) | Self::Decode(e) => Some(e),
            Self::PathTooLong { .. }
            | Self::ShortRead { .. }
            | Self::FrameTooLarge { .. }
            | Self::Protocol(_) => None,
        }
    }
}

/// Reject socket paths that cannot fit in `sun_path`.
pub(crate) fn check_socket_path(path: &std::path::Path) -> Result<(), IpcError> {
    let len = path.as_os_str().len();
    if len >= MAX_SOCKET_PATH {
        return Err(IpcError::PathTooLong {
            path: path.to_path_buf(),
            len,
            max: MAX_SOCKET_PATH,
        });
    }
    Ok(())
}
