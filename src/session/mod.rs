//! Notification session: turns requests into side effects on a sink.
//!
//! # Post
//!
//! ```text
//! validate → authorize → drop same-group items → resolve attachment → submit
//! ```
//!
//! At most one delivered notification per group stays live: posting into a
//! group first removes everything already delivered under that tag.
//!
//! # Exclusivity
//!
//! Group replacement and group removal are read-then-act sequences against
//! the sink. The server serves one connection at a time, which keeps them
//! from interleaving. Anything that calls into a `SessionManager` from
//! several tasks must serialize those calls (e.g. behind a
//! `tokio::sync::Mutex`).

pub mod attachment;
pub mod sink;

use std::time::Duration;

use uuid::Uuid;

use crate::payload::{NotificationPayload, DEFAULT_SOUND};
use crate::socket::messages::{Request, Response, Status, ALL_GROUPS};
use crate::validation::{self, ValidationError, MAX_ATTACHMENT_SIZE_BYTES};
use attachment::{AttachmentFetcher, HttpFetcher};
use sink::{
    AuthorizationStatus, DeliveredItem, NotificationContent, NotificationRequest,
    NotificationSink, NotificationSound, SinkError,
};

/// Short scheduling delay applied to every submitted notification.
pub const DEFAULT_DELIVERY_DELAY: Duration = Duration::from_millis(100);

/// Header row of the `List` table.
pub const LIST_HEADER: &str = "group\ttitle\tsubtitle\tmessage\tdeliveredAt";

/// Failures of session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Payload failed preflight.
    Validation(ValidationError),
    /// User denied (or previously denied) notifications.
    NotAuthorized,
    /// Attachment could not be resolved.
    InvalidAttachment(String),
    /// The sink reported a failure.
    Runtime(String),
}

impl SessionError {
    /// Status code reported for this error.
    pub fn status(&self) -> Status {
        match self {
            Self::Validation(_) => Status::ValidationError,
            Self::NotAuthorized => Status::NotAuthorized,
            Self::InvalidAttachment(_) => Status::InvalidAttachment,
            Self::Runtime(_) => Status::RuntimeError,
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "{e}"),
            Self::NotAuthorized => write!(f, "notifications not authorized"),
            Self::InvalidAttachment(reason) => write!(f, "invalid attachment: {reason}"),
            Self::Runtime(description) => write!(f, "{description}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValidationError> for SessionError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<SinkError> for SessionError {
    fn from(e: SinkError) -> Self {
        Self::Runtime(e.0)
    }
}

/// Mediates between requests and the notification sink.
pub struct SessionManager {
    sink: Box<dyn NotificationSink>,
    fetcher: Box<dyn AttachmentFetcher>,
    max_attachment_bytes: u64,
    delivery_delay: Duration,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("max_attachment_bytes", &self.max_attachment_bytes)
            .field("delivery_delay", &self.delivery_delay)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Session over `sink`, downloading remote attachments with `reqwest`.
    pub fn new(sink: impl NotificationSink + 'static) -> Self {
        Self::with_fetcher(sink, HttpFetcher::default())
    }

    /// Session with a custom attachment fetcher.
    pub fn with_fetcher(
        sink: impl NotificationSink + 'static,
        fetcher: impl AttachmentFetcher + 'static,
    ) -> Self {
        Self {
            sink: Box::new(sink),
            fetcher: Box::new(fetcher),
            max_attachment_bytes: MAX_ATTACHMENT_SIZE_BYTES,
            delivery_delay: DEFAULT_DELIVERY_DELAY,
        }
    }

    /// Override the local attachment size limit.
    pub fn max_attachment_bytes(mut self, max: u64) -> Self {
        self.max_attachment_bytes = max;
        self
    }

    /// Override the scheduling delay passed to the sink.
    pub fn delivery_delay(mut self, delay: Duration) -> Self {
        self.delivery_delay = delay;
        self
    }

    /// Run one decoded request and build its response.
    pub async fn handle(&self, request: Request) -> Response {
        let id = request.correlation_id();
        let outcome = match request {
            Request::Send(req) => self.post(&req.payload).await.map(|()| None),
            Request::List(req) => self.list(&req.group).await.map(Some),
            Request::Remove(req) => self.remove(&req.group).await.map(|()| None),
        };
        response_for(id, outcome)
    }

    /// Post a notification, replacing any delivered in the same group.
    pub async fn post(&self, payload: &NotificationPayload) -> Result<(), SessionError> {
        validation::validate_with_limit(payload, self.max_attachment_bytes)?;
        self.ensure_authorized().await?;

        if let Some(group) = payload.group() {
            let ids = self.ids_in_group(group).await;
            if !ids.is_empty() {
                log::debug!(
                    "[Session] replacing {} notification(s) in group {group}",
                    ids.len()
                );
                if let Err(e) = self.sink.remove_delivered(&ids).await {
                    log::warn!("[Session] could not clear group {group} before posting: {e}");
                }
            }
        }

        let attachment = match payload.content_image.as_deref().filter(|s| !s.is_empty()) {
            Some(reference) => Some(
                attachment::resolve(reference, self.fetcher.as_ref())
                    .await
                    .map_err(SessionError::InvalidAttachment)?,
            ),
            None => None,
        };

        let downloaded = attachment
            .as_ref()
            .filter(|a| a.downloaded)
            .map(|a| a.path.clone());
        let request = NotificationRequest {
            id: Uuid::new_v4().to_string(),
            content: content_for(payload, attachment.map(|a| a.path)),
            delay: self.delivery_delay,
            owns_attachment: downloaded.is_some(),
        };
        log::info!(
            "[Session] posting {} (group={:?}, level={})",
            request.id,
            payload.group(),
            payload.interruption_level
        );
        if let Err(e) = self.sink.submit(request).await {
            if let Some(path) = &downloaded {
                attachment::discard_download(path);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Delivered notifications in `group` (or all of them) as a
    /// tab-separated table with a header row.
    pub async fn list(&self, group: &str) -> Result<String, SessionError> {
        let delivered = self.sink.delivered().await;
        let rows: Vec<String> = delivered
            .iter()
            .filter(|item| group == ALL_GROUPS || item.group_tag == group)
            .map(table_row)
            .collect();
        log::debug!("[Session] list {group}: {} row(s)", rows.len());

        let mut table = String::from(LIST_HEADER);
        for row in rows {
            table.push('\n');
            table.push_str(&row);
        }
        Ok(table)
    }

    /// Clear delivered notifications in `group`, or all of them.
    ///
    /// A group with nothing delivered is a successful no-op.
    pub async fn remove(&self, group: &str) -> Result<(), SessionError> {
        if group == ALL_GROUPS {
            log::info!("[Session] removing all delivered notifications");
            self.sink.remove_all_delivered().await?;
            return Ok(());
        }

        let ids = self.ids_in_group(group).await;
        log::info!("[Session] removing {} notification(s) in group {group}", ids.len());
        if !ids.is_empty() {
            self.sink.remove_delivered(&ids).await?;
        }
        Ok(())
    }

    async fn ensure_authorized(&self) -> Result<(), SessionError> {
        let status = self.sink.authorization_status().await;
        if status.allows_posting() {
            return Ok(());
        }
        if status == AuthorizationStatus::NotDetermined {
            log::info!("[Session] requesting notification authorization");
            if self.sink.request_authorization().await? {
                return Ok(());
            }
        }
        Err(SessionError::NotAuthorized)
    }

    async fn ids_in_group(&self, group: &str) -> Vec<String> {
        self.sink
            .delivered()
            .await
            .into_iter()
            .filter(|item| item.group_tag == group)
            .map(|item| item.id)
            .collect()
    }
}

/// Convert an operation outcome into the response envelope.
pub fn response_for(id: Uuid, outcome: Result<Option<String>, SessionError>) -> Response {
    match outcome {
        Ok(Some(body)) => Response::ok_with(id, body),
        Ok(None) => Response::ok(id),
        Err(e) => {
            log::warn!("[Session] request {id} failed: {e}");
            Response::error(id, e.status(), e.to_string())
        }
    }
}

fn content_for(
    payload: &NotificationPayload,
    attachment: Option<std::path::PathBuf>,
) -> NotificationContent {
    let sound = payload.sound.as_deref().map(|name| {
        if name == DEFAULT_SOUND {
            NotificationSound::Default
        } else {
            NotificationSound::Named(name.to_string())
        }
    });

    NotificationContent {
        title: payload.title.clone(),
        subtitle: payload.subtitle.clone(),
        body: payload.message.clone(),
        sound,
        interruption_level: payload.interruption_level,
        thread_id: payload.group_id.clone(),
        attachment,
        open_url: payload.open_url.clone(),
        execute: payload.execute.clone(),
        activate_bundle_id: payload.activate_bundle_id.clone(),
    }
}

fn table_row(item: &DeliveredItem) -> String {
    [
        cell(&item.group_tag),
        cell(&item.title),
        cell(&item.subtitle),
        cell(&item.body),
        item.delivered_at.to_rfc3339(),
    ]
    .join("\t")
}

/// Keep a value inside its column.
fn cell(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
