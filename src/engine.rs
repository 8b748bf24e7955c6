//! Caller-facing façade over the session.
//!
//! An [`Engine`] either owns a [`SessionManager`] in this process or talks
//! to a session process over its socket. Both expose the same async
//! `post`, `list` and `remove`, each answering with a [`Response`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::payload::NotificationPayload;
use crate::session::{response_for, SessionManager};
use crate::socket::client;
use crate::socket::messages::{ListRequest, RemoveRequest, Response, SendRequest};
use crate::socket::IpcError;
use crate::validation::{self, ValidationError, MAX_ATTACHMENT_SIZE_BYTES};

/// Failures that prevent a request from producing a [`Response`].
#[derive(Debug)]
pub enum EngineError {
    /// Payload rejected before anything was sent.
    Validation(ValidationError),
    /// Socket transport failed.
    Transport(IpcError),
    /// The blocking client task panicked or was cancelled.
    Join(tokio::task::JoinError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "{e}"),
            Self::Transport(e) => write!(f, "{e}"),
            Self::Join(e) => write!(f, "client task failed: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Join(e) => Some(e),
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<IpcError> for EngineError {
    fn from(e: IpcError) -> Self {
        Self::Transport(e)
    }
}

#[derive(Debug, Clone)]
enum Backend {
    InProcess(Arc<Mutex<SessionManager>>),
    Remote(PathBuf),
}

/// Entry point for posting, listing and removing notifications.
#[derive(Debug, Clone)]
pub struct Engine {
    backend: Backend,
    max_attachment_bytes: u64,
}

impl Engine {
    /// Engine driving `session` directly. Calls are serialized.
    pub fn in_process(session: SessionManager) -> Self {
        Self {
            backend: Backend::InProcess(Arc::new(Mutex::new(session))),
            max_attachment_bytes: MAX_ATTACHMENT_SIZE_BYTES,
        }
    }

    /// Engine talking to the session process listening on `socket_path`.
    pub fn remote(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Remote(socket_path.into()),
            max_attachment_bytes: MAX_ATTACHMENT_SIZE_BYTES,
        }
    }

    /// Attachment limit used for client-side validation.
    pub fn max_attachment_bytes(mut self, max: u64) -> Self {
        self.max_attachment_bytes = max;
        self
    }

    /// Post a notification.
    ///
    /// The payload is validated here first; a rejected payload never reaches
    /// the transport or the sink.
    pub async fn post(&self, payload: NotificationPayload) -> Result<Response, EngineError> {
        validation::validate_with_limit(&payload, self.max_attachment_bytes)?;
        let request = SendRequest::new(payload);

        match &self.backend {
            Backend::InProcess(session) => {
                let session = session.lock().await;
                let outcome = session.post(&request.payload).await.map(|()| None);
                Ok(response_for(request.correlation_id, outcome))
            }
            Backend::Remote(path) => remote_call(path.clone(), request).await,
        }
    }

    /// List delivered notifications in `group` (or `ALL`).
    pub async fn list(&self, group: &str) -> Result<Response, EngineError> {
        let request = ListRequest::new(group);
        match &self.backend {
            Backend::InProcess(session) => {
                let session = session.lock().await;
                let outcome = session.list(&request.group).await.map(Some);
                Ok(response_for(request.correlation_id, outcome))
            }
            Backend::Remote(path) => remote_call(path.clone(), request).await,
        }
    }

    /// Remove delivered notifications in `group` (or `ALL`).
    pub async fn remove(&self, group: &str) -> Result<Response, EngineError> {
        let request = RemoveRequest::new(group);
        match &self.backend {
            Backend::InProcess(session) => {
                let session = session.lock().await;
                let outcome = session.remove(&request.group).await.map(|()| None);
                Ok(response_for(request.correlation_id, outcome))
            }
            Backend::Remote(path) => remote_call(path.clone(), request).await,
        }
    }
}

/// Run the blocking client on the blocking pool.
async fn remote_call<Req>(path: PathBuf, request: Req) -> Result<Response, EngineError>
where
    Req: serde::Serialize + Send + 'static,
{
    let response = tokio::task::spawn_blocking(move || client::round_trip(&path, &request))
        .await
        .map_err(EngineError::Join)??;
    Ok(response)
}
