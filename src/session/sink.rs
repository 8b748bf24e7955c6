//! Notification sink: the subsystem that presents and stores notifications.
//!
//! The session manager only talks to the [`NotificationSink`] trait. The
//! [`InMemorySink`] here keeps delivered notifications in process memory,
//! which is what `tn serve` and the tests use.
//!
//! A request with `owns_attachment` hands its attachment file to the sink.
//! The sink deletes that file once the notification is removed.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::payload::InterruptionLevel;
use crate::session::attachment::discard_download;

/// Number of recent submissions kept by [`InMemorySink::submitted`].
pub const SUBMITTED_LOG_LIMIT: usize = 64;

/// Authorization state reported by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    /// User allowed notifications.
    Authorized,
    /// Quiet delivery allowed without asking.
    Provisional,
    /// Temporary authorization for an app clip style session.
    Ephemeral,
    /// User refused notifications.
    Denied,
    /// User has not been asked yet.
    NotDetermined,
}

impl AuthorizationStatus {
    /// Whether posting may proceed without asking.
    pub fn allows_posting(self) -> bool {
        matches!(self, Self::Authorized | Self::Provisional | Self::Ephemeral)
    }
}

/// Sound attached to delivered content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationSound {
    /// Platform default sound.
    Default,
    /// A named system sound.
    Named(String),
}

/// Content handed to the sink for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    /// Title line.
    pub title: String,
    /// Optional subtitle.
    pub subtitle: Option<String>,
    /// Body text.
    pub body: String,
    /// Sound to play, if any.
    pub sound: Option<NotificationSound>,
    /// Interruption level.
    pub interruption_level: InterruptionLevel,
    /// Group tag (thread identifier).
    pub thread_id: Option<String>,
    /// Resolved local attachment file.
    pub attachment: Option<PathBuf>,
    /// URL opened on click.
    pub open_url: Option<String>,
    /// Command run on click.
    pub execute: Option<String>,
    /// Bundle activated on click.
    pub activate_bundle_id: Option<String>,
}

/// A notification scheduled for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    /// Unique identifier of the notification.
    pub id: String,
    /// What to show.
    pub content: NotificationContent,
    /// Delay before the sink presents it.
    pub delay: Duration,
    /// The attachment is a private download the sink must delete once the
    /// notification is removed.
    pub owns_attachment: bool,
}

/// A notification currently shown by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredItem {
    /// Identifier used for removal.
    pub id: String,
    /// Group tag, empty when the notification had none.
    pub group_tag: String,
    /// Title line.
    pub title: String,
    /// Subtitle, empty when absent.
    pub subtitle: String,
    /// Body text.
    pub body: String,
    /// When it was delivered.
    pub delivered_at: DateTime<Utc>,
}

/// Failure reported by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkError(pub String);

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SinkError {}

/// Platform notification capability consumed by the session manager.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Current authorization state.
    async fn authorization_status(&self) -> AuthorizationStatus;

    /// Ask the user for permission. May block until they answer.
    async fn request_authorization(&self) -> Result<bool, SinkError>;

    /// Every delivered notification, in the sink's enumeration order.
    async fn delivered(&self) -> Vec<DeliveredItem>;

    /// Remove the delivered notifications with these identifiers.
    async fn remove_delivered(&self, ids: &[String]) -> Result<(), SinkError>;

    /// Remove every delivered notification.
    async fn remove_all_delivered(&self) -> Result<(), SinkError>;

    /// Schedule a notification for delivery.
    async fn submit(&self, request: NotificationRequest) -> Result<(), SinkError>;
}

#[derive(Debug)]
struct SinkState {
    status: AuthorizationStatus,
    prompt_answer: bool,
    prompts: usize,
    delivered: Vec<DeliveredItem>,
    owned_files: HashMap<String, PathBuf>,
    submitted: VecDeque<NotificationRequest>,
    fail_submit: Option<String>,
    fail_remove: Option<String>,
}

/// Sink that keeps delivered notifications in memory.
///
/// Clones share the same store, so a test can keep a handle while the
/// session manager owns another.
#[derive(Debug, Clone)]
pub struct InMemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySink {
    /// Authorized sink with nothing delivered.
    pub fn new() -> Self {
        Self::with_authorization(AuthorizationStatus::Authorized, true)
    }

    /// Sink in the given authorization state. `prompt_answer` is what the
    /// user "chooses" when asked.
    pub fn with_authorization(status: AuthorizationStatus, prompt_answer: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(SinkState {
                status,
                prompt_answer,
                prompts: 0,
                delivered: Vec::new(),
                owned_files: HashMap::new(),
                submitted: VecDeque::new(),
                fail_submit: None,
                fail_remove: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make every following `submit` fail with `description`.
    pub fn fail_submissions(&self, description: impl Into<String>) {
        self.lock().fail_submit = Some(description.into());
    }

    /// Make every following removal fail with `description`.
    pub fn fail_removals(&self, description: impl Into<String>) {
        self.lock().fail_remove = Some(description.into());
    }

    /// Number of interactive authorization prompts shown so far.
    pub fn prompt_count(&self) -> usize {
        self.lock().prompts
    }

    /// The most recent submitted requests, oldest first, including replaced
    /// ones. At most [`SUBMITTED_LOG_LIMIT`] are kept.
    pub fn submitted(&self) -> Vec<NotificationRequest> {
        self.lock().submitted.iter().cloned().collect()
    }

    /// Snapshot of the delivered set.
    pub fn delivered_snapshot(&self) -> Vec<DeliveredItem> {
        self.lock().delivered.clone()
    }
}

#[async_trait]
impl NotificationSink for InMemorySink {
    async fn authorization_status(&self) -> AuthorizationStatus {
        self.lock().status
    }

    async fn request_authorization(&self) -> Result<bool, SinkError> {
        let mut state = self.lock();
        state.prompts += 1;
        state.status = if state.prompt_answer {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::Denied
        };
        Ok(state.prompt_answer)
    }

    async fn delivered(&self) -> Vec<DeliveredItem> {
        self.lock().delivered.clone()
    }

    async fn remove_delivered(&self, ids: &[String]) -> Result<(), SinkError> {
        let mut state = self.lock();
        if let Some(reason) = &state.fail_remove {
            return Err(SinkError(reason.clone()));
        }
        state.delivered.retain(|item| !ids.contains(&item.id));
        for id in ids {
            if let Some(path) = state.owned_files.remove(id) {
                discard_download(&path);
            }
        }
        Ok(())
    }

    async fn remove_all_delivered(&self) -> Result<(), SinkError> {
        let mut state = self.lock();
        if let Some(reason) = &state.fail_remove {
            return Err(SinkError(reason.clone()));
        }
        state.delivered.clear();
        for (_, path) in state.owned_files.drain() {
            discard_download(&path);
        }
        Ok(())
    }

    async fn submit(&self, request: NotificationRequest) -> Result<(), SinkError> {
        let mut state = self.lock();
        if let Some(reason) = &state.fail_submit {
            return Err(SinkError(reason.clone()));
        }

        let content = &request.content;
        log::info!(
            "[Sink] delivering {} in {:?}: group={:?} title={:?} body={:?}",
            request.id,
            request.delay,
            content.thread_id,
            content.title,
            content.body
        );

        let item = DeliveredItem {
            id: request.id.clone(),
            group_tag: content.thread_id.clone().unwrap_or_default(),
            title: content.title.clone(),
            subtitle: content.subtitle.clone().unwrap_or_default(),
            body: content.body.clone(),
            delivered_at: Utc::now(),
        };
        state.delivered.push(item);
        if request.owns_attachment {
            if let Some(path) = &content.attachment {
                state.owned_files.insert(request.id.clone(), path.clone());
            }
        }
        if state.submitted.len() == SUBMITTED_LOG_LIMIT {
            state.submitted.pop_front();
        }
        state.submitted.push_back(request);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str, group: Option<&str>) -> NotificationRequest {
        NotificationRequest {
            id: id.to_string(),
            content: NotificationContent {
                title: "T".into(),
                subtitle: None,
                body: "B".into(),
                sound: None,
                interruption_level: InterruptionLevel::Active,
                thread_id: group.map(str::to_string),
                attachment: None,
                open_url: None,
                execute: None,
                activate_bundle_id: None,
            },
            delay: Duration::from_millis(100),
            owns_attachment: false,
        }
    }

    fn with_attachment(
        mut req: NotificationRequest,
        path: &std::path::Path,
        owned: bool,
    ) -> NotificationRequest {
        req.content.attachment = Some(path.to_path_buf());
        req.owns_attachment = owned;
        req
    }

    #[tokio::test]
    async fn test_submit_then_remove_by_id() {
        let sink = InMemorySink::new();
        sink.submit(request("a", Some("g"))).await.unwrap();
        sink.submit(request("b", None)).await.unwrap();

        let delivered = sink.delivered().await;
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].group_tag, "g");
        assert_eq!(delivered[1].group_tag, "");

        sink.remove_delivered(&["a".to_string()]).await.unwrap();
        let ids: Vec<String> = sink.delivered().await.into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_prompt_updates_status() {
        let sink = InMemorySink::with_authorization(AuthorizationStatus::NotDetermined, false);
        assert!(!sink.request_authorization().await.unwrap());
        assert_eq!(sink.authorization_status().await, AuthorizationStatus::Denied);
        assert_eq!(sink.prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let sink = InMemorySink::new();
        sink.fail_submissions("disk full");
        assert_eq!(
            sink.submit(request("a", None)).await,
            Err(SinkError("disk full".into()))
        );
        sink.fail_removals("busy");
        assert!(sink.remove_all_delivered().await.is_err());
    }

    #[tokio::test]
    async fn test_submitted_log_is_bounded() {
        let sink = InMemorySink::new();
        for i in 0..SUBMITTED_LOG_LIMIT + 10 {
            sink.submit(request(&format!("n{i}"), Some("g"))).await.unwrap();
            let ids: Vec<String> =
                sink.delivered().await.into_iter().map(|item| item.id).collect();
            sink.remove_delivered(&ids).await.unwrap();
        }
        let submitted = sink.submitted();
        assert_eq!(submitted.len(), SUBMITTED_LOG_LIMIT);
        assert_eq!(submitted[0].id, "n10");
        assert!(sink.delivered_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_owned_attachment_deleted_on_remove() {
        let tmp = tempfile::TempDir::new().unwrap();
        let owned = tmp.path().join("download.png");
        let borrowed = tmp.path().join("user.png");
        std::fs::write(&owned, b"a").unwrap();
        std::fs::write(&borrowed, b"b").unwrap();

        let sink = InMemorySink::new();
        sink.submit(with_attachment(request("a", Some("g")), &owned, true))
            .await
            .unwrap();
        sink.submit(with_attachment(request("b", Some("h")), &borrowed, false))
            .await
            .unwrap();

        sink.remove_delivered(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert!(!owned.exists());
        assert!(borrowed.exists(), "caller files are never deleted");
    }

    #[tokio::test]
    async fn test_owned_attachment_deleted_on_remove_all() {
        let tmp = tempfile::TempDir::new().unwrap();
        let owned = tmp.path().join("download.png");
        std::fs::write(&owned, b"a").unwrap();

        let sink = InMemorySink::new();
        sink.submit(with_attachment(request("a", None), &owned, true))
            .await
            .unwrap();
        assert!(owned.exists());

        sink.remove_all_delivered().await.unwrap();
        assert!(!owned.exists());
    }

    #[test]
    fn test_allows_posting() {
        assert!(AuthorizationStatus::Authorized.allows_posting());
        assert!(AuthorizationStatus::Provisional.allows_posting());
        assert!(AuthorizationStatus::Ephemeral.allows_posting());
        assert!(!AuthorizationStatus::Denied.allows_posting());
        assert!(!AuthorizationStatus::NotDetermined.allows_posting());
    }
}
