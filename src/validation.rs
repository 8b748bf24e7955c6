//! Payload preflight.
//!
//! Rules run in a fixed order (message, open URL, attachment, wait seconds)
//! and stop at the first violation. Nothing here touches the session or the
//! sink; a rejected payload never gets that far.

use std::path::Path;

use reqwest::Url;

use crate::payload::NotificationPayload;

/// Default attachment size limit (10 MiB).
pub const MAX_ATTACHMENT_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Schemes accepted for `openURL`.
const OPEN_URL_SCHEMES: [&str; 3] = ["http", "https", "file"];

/// A payload rejected before delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Message is empty after trimming whitespace.
    EmptyMessage,
    /// `openURL` lacks a scheme or uses one outside http/https/file.
    InvalidOpenUrl(String),
    /// Local attachment is missing or is a directory.
    AttachmentNotFound(String),
    /// Local attachment exceeds the size limit.
    AttachmentTooLarge {
        /// Path as checked.
        path: String,
        /// Actual size in bytes.
        size: u64,
        /// Limit in bytes.
        max: u64,
    },
    /// `waitSeconds` is zero or negative.
    InvalidWaitSeconds(i64),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "message is required (use --message or pipe stdin)"),
            Self::InvalidOpenUrl(url) => write!(f, "invalid --open URL: {url}"),
            Self::AttachmentNotFound(path) => write!(f, "content image not found: {path}"),
            Self::AttachmentTooLarge { path, size, max } => {
                write!(f, "content image too large ({size} > {max} bytes): {path}")
            }
            Self::InvalidWaitSeconds(value) => {
                write!(f, "invalid --wait value (must be > 0): {value}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate with the default attachment limit.
pub fn validate(payload: &NotificationPayload) -> Result<(), ValidationError> {
    validate_with_limit(payload, MAX_ATTACHMENT_SIZE_BYTES)
}

/// Validate a payload, allowing local attachments up to `max_attachment_bytes`.
pub fn validate_with_limit(
    payload: &NotificationPayload,
    max_attachment_bytes: u64,
) -> Result<(), ValidationError> {
    if payload.message.trim().is_empty() {
        return Err(ValidationError::EmptyMessage);
    }

    if let Some(open_url) = &payload.open_url {
        validate_open_url(open_url)?;
    }

    if let Some(image) = payload.content_image.as_deref().filter(|s| !s.is_empty()) {
        validate_attachment_ref(image, max_attachment_bytes)?;
    }

    if let Some(wait) = payload.wait_seconds {
        if wait <= 0 {
            return Err(ValidationError::InvalidWaitSeconds(wait));
        }
    }

    Ok(())
}

fn validate_open_url(open_url: &str) -> Result<(), ValidationError> {
    let Some((scheme, _)) = open_url.split_once("://") else {
        return Err(ValidationError::InvalidOpenUrl(open_url.to_string()));
    };
    let scheme = scheme.to_ascii_lowercase();
    if OPEN_URL_SCHEMES.contains(&scheme.as_str()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidOpenUrl(open_url.to_string()))
    }
}

/// Whether an attachment reference points at a remote http(s) resource.
pub fn is_remote_ref(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

fn validate_attachment_ref(reference: &str, max: u64) -> Result<(), ValidationError> {
    if is_remote_ref(reference) {
        // Size is enforced by the fetcher at download time.
        return Ok(());
    }

    if reference.starts_with("file://") {
        let path = Url::parse(reference)
            .ok()
            .and_then(|url| url.to_file_path().ok())
            .ok_or_else(|| ValidationError::AttachmentNotFound(reference.to_string()))?;
        return validate_local_attachment(&path, max);
    }

    validate_local_attachment(Path::new(reference), max)
}

/// Check that a local attachment exists, is a file, and fits the limit.
pub fn validate_local_attachment(path: &Path, max: u64) -> Result<(), ValidationError> {
    let display = path.display().to_string();
    let meta = match std::fs::metadata(path) {
        Ok(meta) if !meta.is_dir() => meta,
        _ => return Err(ValidationError::AttachmentNotFound(display)),
    };

    let size = meta.len();
    if size > max {
        return Err(ValidationError::AttachmentTooLarge {
            path: display,
            size,
            max,
        });
    }
    Ok(())
}
