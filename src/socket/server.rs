//! Unix domain socket server for the session process.
//!
//! Binds the session socket and serves connections strictly one at a time:
//! accept, read one request frame, dispatch to the [`SessionManager`],
//! write one response frame, close. A connection that never delivers a
//! whole frame, or whose frame matches no request shape, is closed without
//! a response.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use super::framing::{self, FrameAccumulator};
use super::messages::Request;
use super::{check_socket_path, IpcError};
use crate::session::SessionManager;

/// Read buffer size for incoming requests.
const READ_CHUNK: usize = 8 * 1024;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Session socket server.
#[derive(Debug)]
pub struct SessionServer {
    /// Path to the socket file.
    socket_path: PathBuf,
    /// Handle to the accept loop task.
    accept_handle: JoinHandle<()>,
}

impl SessionServer {
    /// Bind `socket_path` and start serving `session`.
    ///
    /// Removes a stale socket file, creates the parent directory, restricts
    /// the socket to its owner (0600) and spawns the accept loop. Must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`IpcError::PathTooLong`] if the path cannot fit in `sun_path`, or
    /// [`IpcError::Bind`] if the socket cannot be set up.
    pub fn start(socket_path: PathBuf, session: SessionManager) -> Result<Self, IpcError> {
        check_socket_path(&socket_path)?;

        let bind_err = |source| IpcError::Bind {
            path: socket_path.clone(),
            source,
        };

        if socket_path.exists() {
            log::debug!("[Server] removing stale socket {}", socket_path.display());
            std::fs::remove_file(&socket_path).map_err(bind_err)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(bind_err)?;
        }

        let listener = std::os::unix::net::UnixListener::bind(&socket_path).map_err(bind_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))
                .map_err(bind_err)?;
        }

        listener.set_nonblocking(true).map_err(bind_err)?;
        let listener = UnixListener::from_std(listener).map_err(bind_err)?;

        log::info!("[Server] listening on {}", socket_path.display());

        let accept_handle = tokio::spawn(accept_loop(listener, session));

        Ok(Self {
            socket_path,
            accept_handle,
        })
    }

    /// Stop accepting connections. The socket file is left in place.
    pub fn shutdown(self) {
        log::info!("[Server] shutting down {}", self.socket_path.display());
        self.accept_handle.abort();
    }

    /// Path to the socket file.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Accept connections forever, serving each to completion before the next.
async fn accept_loop(listener: UnixListener, session: SessionManager) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                if let Err(e) = serve_connection(stream, &session).await {
                    log::warn!("[Server] connection dropped: {e}");
                }
            }
            Err(e) => {
                log::error!("[Server] accept error: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

/// Serve a single request on `stream`.
async fn serve_connection(
    mut stream: UnixStream,
    session: &SessionManager,
) -> Result<(), IpcError> {
    let Some(payload) = read_request(&mut stream).await? else {
        return Ok(());
    };

    let request = Request::from_frame(&payload)?;
    log::info!(
        "[Server] {} request {}",
        request.kind(),
        request.correlation_id()
    );

    let response = session.handle(request).await;
    let frame = framing::encode(&response)?;
    stream.write_all(&frame).await.map_err(IpcError::Write)?;
    stream.shutdown().await.map_err(IpcError::Write)?;
    Ok(())
}

/// Read until one complete frame has arrived.
///
/// Returns `None` if the peer closes first. Bytes past the first frame are
/// ignored.
async fn read_request(stream: &mut UnixStream) -> Result<Option<Vec<u8>>, IpcError> {
    let mut accumulator = FrameAccumulator::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let n = stream.read(&mut buf).await.map_err(IpcError::Read)?;
        if n == 0 {
            if accumulator.has_partial() {
                log::debug!("[Server] peer closed mid-frame");
            }
            return Ok(None);
        }
        if let Some(payload) = accumulator.feed(&buf[..n])?.into_iter().next() {
            return Ok(Some(payload));
        }
    }
}
