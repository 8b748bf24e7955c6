//! Attachment resolution.
//!
//! A `contentImage` reference is one of:
//! - `http://` / `https://` URL: downloaded to a private temporary file
//! - `file://` URL: converted to a local path
//! - anything else: used as a local path

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tokio::io::AsyncWriteExt;

use crate::validation::{is_remote_ref, MAX_ATTACHMENT_SIZE_BYTES};

/// Default timeout for a remote attachment download.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while downloading a remote attachment.
#[derive(Debug)]
pub enum FetchError {
    /// Request could not be sent or the body could not be read.
    Http(reqwest::Error),
    /// Server answered with a non-success status.
    Status(u16),
    /// Body exceeds the attachment size limit.
    TooLarge {
        /// Bytes seen so far (or the advertised length).
        size: u64,
        /// Limit in bytes.
        max: u64,
    },
    /// Writing the temporary file failed.
    Io(std::io::Error),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(e) => write!(f, "download failed: {e}"),
            Self::Status(code) => write!(f, "download failed: HTTP {code}"),
            Self::TooLarge { size, max } => {
                write!(f, "download too large ({size} > {max} bytes)")
            }
            Self::Io(e) => write!(f, "could not store download: {e}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Status(_) | Self::TooLarge { .. } => None,
        }
    }
}

/// Downloads remote attachments to local files.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    /// Fetch `url` and return the path of a local copy.
    async fn fetch(&self, url: &Url) -> Result<PathBuf, FetchError>;
}

/// [`AttachmentFetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
    max_bytes: u64,
    dir: PathBuf,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_TIMEOUT, MAX_ATTACHMENT_SIZE_BYTES)
    }
}

impl HttpFetcher {
    /// Fetcher writing into the system temp directory.
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        Self {
            timeout,
            max_bytes,
            dir: std::env::temp_dir(),
        }
    }

    /// Write downloads into `dir` instead of the temp directory.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    fn client(&self) -> Result<Client, FetchError> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(FetchError::Http)
    }

    fn too_large(&self, size: u64) -> FetchError {
        FetchError::TooLarge {
            size,
            max: self.max_bytes,
        }
    }
}

#[async_trait]
impl AttachmentFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<PathBuf, FetchError> {
        let mut response = self
            .client()?
            .get(url.clone())
            .send()
            .await
            .map_err(FetchError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(self.too_large(length));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(FetchError::Http)? {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_bytes {
                return Err(self.too_large(body.len() as u64));
            }
        }

        let path = self.dir.join(format!(
            "tn-attachment-{}.{}",
            uuid::Uuid::new_v4(),
            extension_for(url)
        ));
        write_private(&path, &body).await.map_err(FetchError::Io)?;
        log::debug!(
            "[Attachment] fetched {} ({} bytes) to {}",
            url,
            body.len(),
            path.display()
        );
        Ok(path)
    }
}

/// Create `path` readable only by the owner and write `data` to it.
async fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    file.write_all(data).await?;
    file.flush().await
}

/// File extension for a download, taken from the URL path when sensible.
fn extension_for(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| "img".to_string())
}

/// A local attachment file ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttachment {
    /// Local file to attach.
    pub path: PathBuf,
    /// The file is a private download that nobody else references.
    pub downloaded: bool,
}

/// Turn an attachment reference into a local file.
///
/// The error string is the reason reported to the caller.
pub async fn resolve(
    reference: &str,
    fetcher: &dyn AttachmentFetcher,
) -> Result<ResolvedAttachment, String> {
    if is_remote_ref(reference) {
        let url = Url::parse(reference).map_err(|e| format!("invalid URL {reference}: {e}"))?;
        let path = fetcher
            .fetch(&url)
            .await
            .map_err(|e| format!("{reference}: {e}"))?;
        return Ok(ResolvedAttachment {
            path,
            downloaded: true,
        });
    }

    let path = if reference.starts_with("file://") {
        Url::parse(reference)
            .ok()
            .and_then(|url| url.to_file_path().ok())
            .ok_or_else(|| format!("invalid file URL: {reference}"))?
    } else {
        PathBuf::from(reference)
    };

    if !path.is_file() {
        return Err(format!("content image not found: {}", path.display()));
    }
    Ok(ResolvedAttachment {
        path,
        downloaded: false,
    })
}

/// Delete a downloaded attachment, logging failures.
pub fn discard_download(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("[Attachment] could not delete {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Fetcher that must never be reached.
    struct NoFetch;

    #[async_trait]
    impl AttachmentFetcher for NoFetch {
        async fn fetch(&self, url: &Url) -> Result<PathBuf, FetchError> {
            panic!("unexpected fetch of {url}");
        }
    }

    #[tokio::test]
    async fn test_local_path_used_directly() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("icon.png");
        std::fs::write(&file, b"png").unwrap();

        let resolved = resolve(&file.display().to_string(), &NoFetch).await.unwrap();
        assert_eq!(resolved.path, file);
        assert!(!resolved.downloaded);

        let url = format!("file://{}", file.display());
        assert_eq!(resolve(&url, &NoFetch).await.unwrap().path, file);
    }

    #[tokio::test]
    async fn test_missing_local_path_is_reported() {
        let err = resolve("/no/such/icon.png", &NoFetch).await.unwrap_err();
        assert!(err.contains("not found"), "{err}");
    }

    #[tokio::test]
    async fn test_remote_download_to_private_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/images/logo.PNG"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fake png".to_vec()))
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let fetcher = HttpFetcher::default().with_dir(tmp.path());
        let reference = format!("{}/images/logo.PNG", server.uri());

        let resolved = resolve(&reference, &fetcher).await.unwrap();
        assert!(resolved.downloaded);
        let local = resolved.path;
        assert!(local.starts_with(tmp.path()));
        assert_eq!(local.extension().and_then(|e| e.to_str()), Some("png"));
        assert_eq!(std::fs::read(&local).unwrap(), b"fake png");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&local).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
    }

    #[tokio::test]
    async fn test_remote_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let fetcher = HttpFetcher::default().with_dir(tmp.path());
        let err = resolve(&format!("{}/missing", server.uri()), &fetcher)
            .await
            .unwrap_err();
        assert!(err.contains("HTTP 404"), "{err}");
    }

    #[tokio::test]
    async fn test_remote_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
            .mount(&server)
            .await;

        let tmp = tempfile::TempDir::new().unwrap();
        let fetcher = HttpFetcher::new(DEFAULT_FETCH_TIMEOUT, 1024).with_dir(tmp.path());
        let err = resolve(&format!("{}/big", server.uri()), &fetcher)
            .await
            .unwrap_err();
        assert!(err.contains("too large"), "{err}");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_remote_url() {
        let err = resolve("http://exa mple.com/x.png", &NoFetch).await.unwrap_err();
        assert!(err.starts_with("invalid URL"), "{err}");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_http_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fetcher = HttpFetcher::new(Duration::from_secs(2), 1024).with_dir(tmp.path());
        let url = Url::parse("http://127.0.0.1:1/x.png").unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Http(_)), "{err}");
    }

    #[test]
    fn test_discard_download() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("tn-attachment-x.png");
        std::fs::write(&file, b"png").unwrap();
        discard_download(&file);
        assert!(!file.exists());
        // Already gone is fine.
        discard_download(&file);
    }

    #[test]
    fn test_extension_for() {
        let ext = |s: &str| extension_for(&Url::parse(s).unwrap());
        assert_eq!(ext("https://x.test/a/b.jpeg"), "jpeg");
        assert_eq!(ext("https://x.test/a/b"), "img");
        assert_eq!(ext("https://x.test/"), "img");
        assert_eq!(ext("https://x.test/a.tar.gz"), "gz");
        assert_eq!(ext("https://x.test/a.we!rd"), "img");
    }
}
