//! Network fetching: turn a locator into bytes or text.
//!
//! ## Why blocking?
//!
//! A stage is "fetch, then immediately parse or decode", and both halves are
//! synchronous work. Keeping the fetch blocking lets each stage run as one
//! closure on tokio's blocking pool (see [`crate::task`]) and keeps
//! the [`Fetcher`] trait trivially implementable by test doubles.
//!
//! [`HttpFetcher`] must therefore never be called from inside an async task
//! directly; the reqwest blocking client refuses to run there.

use crate::config::PipelineConfig;
use crate::error::{FetchError, FetchErrorKind};
use std::fs::File;
use std::io::Read;
use std::time::Duration;
use tracing::debug;

/// A non-empty locator. Anything beyond non-emptiness, whitespace included,
/// is checked at fetch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest(String);

impl FetchRequest {
    pub fn new(locator: impl Into<String>) -> Result<Self, FetchError> {
        let locator = locator.into();
        if locator.is_empty() {
            return Err(FetchError::new(
                locator,
                FetchErrorKind::InvalidLocator("empty locator".into()),
            ));
        }
        Ok(Self(locator))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Blocking fetch of a locator.
///
/// Implementations perform no side effects beyond the transfer itself and
/// never retry.
pub trait Fetcher: Send + Sync {
    /// Fetch the raw bytes behind `request`.
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError>;

    /// Fetch and decode as UTF-8, replacing invalid sequences.
    fn fetch_text(&self, request: &FetchRequest) -> Result<String, FetchError> {
        self.fetch(request)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Fetches `http`, `https` and `file` URLs.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout_secs: u64,
    max_body_bytes: u64,
    user_agent: String,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64, max_body_bytes: u64, user_agent: impl Into<String>) -> Self {
        Self {
            timeout_secs,
            max_body_bytes,
            user_agent: user_agent.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.fetch_timeout_secs,
            config.max_body_bytes,
            config.user_agent.clone(),
        )
    }

    fn fetch_http(&self, url: reqwest::Url, locator: &str) -> Result<Vec<u8>, FetchError> {
        let fail = |kind| FetchError::new(locator, kind);

        // Built per call: a blocking client owns a runtime and must be dropped
        // on the same blocking thread that used it.
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .user_agent(self.user_agent.as_str())
            .build()
            .map_err(|e| fail(FetchErrorKind::Connect(e.to_string())))?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| fail(self.classify(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fail(FetchErrorKind::Status(status.as_u16())));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_body_bytes {
                return Err(fail(FetchErrorKind::TooLarge {
                    limit: self.max_body_bytes,
                }));
            }
        }

        let body = self.read_capped(response).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                fail(FetchErrorKind::Timeout {
                    secs: self.timeout_secs,
                })
            } else {
                fail(FetchErrorKind::Connect(e.to_string()))
            }
        })?;

        self.check_size(body.len() as u64, locator)?;
        debug!("Fetched {} bytes from {}", body.len(), locator);
        Ok(body)
    }

    fn fetch_file(&self, url: &reqwest::Url, locator: &str) -> Result<Vec<u8>, FetchError> {
        let path = url.to_file_path().map_err(|_| {
            FetchError::new(
                locator,
                FetchErrorKind::InvalidLocator("not a local file path".into()),
            )
        })?;

        let io_err = |e: std::io::Error| FetchError::new(locator, FetchErrorKind::Io(e.to_string()));
        let file = File::open(&path).map_err(io_err)?;
        // Metadata length is 0 for procfs entries, devices and FIFOs.
        let len = file.metadata().map_err(io_err)?.len();
        self.check_size(len, locator)?;

        let body = self.read_capped(file).map_err(io_err)?;
        self.check_size(body.len() as u64, locator)?;
        debug!("Read {} bytes from {}", body.len(), path.display());
        Ok(body)
    }

    /// Read at most one byte past the cap, so an oversized body is detectable
    /// without buffering all of it.
    fn read_capped(&self, source: impl Read) -> std::io::Result<Vec<u8>> {
        let mut body = Vec::new();
        source
            .take(self.max_body_bytes.saturating_add(1))
            .read_to_end(&mut body)?;
        Ok(body)
    }

    fn check_size(&self, len: u64, locator: &str) -> Result<(), FetchError> {
        if len > self.max_body_bytes {
            return Err(FetchError::new(
                locator,
                FetchErrorKind::TooLarge {
                    limit: self.max_body_bytes,
                },
            ));
        }
        Ok(())
    }

    fn classify(&self, e: &reqwest::Error) -> FetchErrorKind {
        if e.is_timeout() {
            FetchErrorKind::Timeout {
                secs: self.timeout_secs,
            }
        } else if e.is_builder() {
            FetchErrorKind::InvalidLocator(e.to_string())
        } else {
            FetchErrorKind::Connect(e.to_string())
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<u8>, FetchError> {
        let locator = request.as_str();
        let url = reqwest::Url::parse(locator).map_err(|e| {
            FetchError::new(locator, FetchErrorKind::InvalidLocator(e.to_string()))
        })?;

        match url.scheme() {
            "http" | "https" => self.fetch_http(url, locator),
            "file" => self.fetch_file(&url, locator),
            other => Err(FetchError::new(
                locator,
                FetchErrorKind::UnsupportedScheme(other.to_string()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetch_blocking(
        fetcher: HttpFetcher,
        locator: String,
    ) -> tokio::task::JoinHandle<Result<Vec<u8>, FetchError>> {
        tokio::task::spawn_blocking(move || {
            let req = FetchRequest::new(locator)?;
            fetcher.fetch(&req)
        })
    }

    #[test]
    fn empty_locator_is_rejected() {
        let err = FetchRequest::new("").unwrap_err();
        assert!(matches!(err.kind, FetchErrorKind::InvalidLocator(_)));
        assert!(FetchRequest::new("42").is_ok());
    }

    #[test]
    fn whitespace_locator_fails_at_fetch_time() {
        let req = FetchRequest::new("   ").unwrap();
        let err = HttpFetcher::default().fetch(&req).unwrap_err();
        assert_eq!(err.locator, "   ");
        assert!(matches!(err.kind, FetchErrorKind::InvalidLocator(_)));
    }

    #[test]
    fn non_url_locator_fails_at_fetch_time() {
        let req = FetchRequest::new("42").unwrap();
        let err = HttpFetcher::default().fetch(&req).unwrap_err();
        assert_eq!(err.locator, "42");
        assert!(matches!(err.kind, FetchErrorKind::InvalidLocator(_)));
    }

    #[test]
    fn unsupported_scheme() {
        let req = FetchRequest::new("ftp://example.test/a.png").unwrap();
        let err = HttpFetcher::default().fetch(&req).unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::UnsupportedScheme("ftp".into()));
    }

    #[test]
    fn file_url_is_read_from_disk() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"<p>hello</p>").unwrap();
        let url = reqwest::Url::from_file_path(tmp.path()).unwrap();

        let req = FetchRequest::new(url.to_string()).unwrap();
        let text = HttpFetcher::default().fetch_text(&req).unwrap();
        assert_eq!(text, "<p>hello</p>");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = reqwest::Url::from_file_path(dir.path().join("nope.png")).unwrap();
        let req = FetchRequest::new(url.to_string()).unwrap();
        let err = HttpFetcher::default().fetch(&req).unwrap_err();
        assert!(matches!(err.kind, FetchErrorKind::Io(_)));
    }

    #[test]
    fn oversized_file_is_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0u8; 4096]).unwrap();
        let url = reqwest::Url::from_file_path(tmp.path()).unwrap();

        let fetcher = HttpFetcher::new(5, 1024, "test");
        let err = fetcher
            .fetch(&FetchRequest::new(url.to_string()).unwrap())
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::TooLarge { limit: 1024 });
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn file_reporting_zero_length_is_still_capped() {
        // procfs reports a length of 0 whatever the content.
        let url = reqwest::Url::from_file_path("/proc/self/maps").unwrap();
        assert_eq!(std::fs::metadata("/proc/self/maps").unwrap().len(), 0);

        let fetcher = HttpFetcher::new(5, 16, "test");
        let err = fetcher
            .fetch(&FetchRequest::new(url.to_string()).unwrap())
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::TooLarge { limit: 16 });
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn endless_device_is_capped() {
        let fetcher = HttpFetcher::new(5, 1024, "test");
        let err = fetcher
            .fetch(&FetchRequest::new("file:///dev/zero").unwrap())
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::TooLarge { limit: 1024 });
    }

    #[test]
    fn unbounded_cap_reads_whole_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello").unwrap();
        let url = reqwest::Url::from_file_path(tmp.path()).unwrap();

        let fetcher = HttpFetcher::new(5, u64::MAX, "test");
        let body = fetcher
            .fetch(&FetchRequest::new(url.to_string()).unwrap())
            .unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn lossy_text_decoding() {
        struct Fixed;
        impl Fetcher for Fixed {
            fn fetch(&self, _: &FetchRequest) -> Result<Vec<u8>, FetchError> {
                Ok(vec![b'o', b'k', 0xFF])
            }
        }
        let text = Fixed.fetch_text(&FetchRequest::new("x").unwrap()).unwrap();
        assert!(text.starts_with("ok"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_success_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<a id=\"x\">42</a>"))
            .mount(&server)
            .await;

        let body = fetch_blocking(HttpFetcher::default(), format!("{}/page", server.uri()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, b"<a id=\"x\">42</a>");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let locator = format!("{}/missing.png", server.uri());
        let err = fetch_blocking(HttpFetcher::default(), locator.clone())
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.locator, locator);
        assert_eq!(err.kind, FetchErrorKind::Status(404));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_body_over_cap_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 8192]))
            .mount(&server)
            .await;

        let err = fetch_blocking(HttpFetcher::new(5, 1024, "test"), server.uri())
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::TooLarge { limit: 1024 });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_unbounded_cap_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let config = PipelineConfig::builder()
            .max_body_bytes(u64::MAX)
            .build()
            .unwrap();
        let body = fetch_blocking(HttpFetcher::from_config(&config), server.uri())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn http_timeout_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let err = fetch_blocking(HttpFetcher::new(1, 1024 * 1024, "test"), server.uri())
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Timeout { secs: 1 });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn connection_refused_is_connect_error() {
        // Port 9 on localhost is almost never listening.
        let err = fetch_blocking(HttpFetcher::new(2, 1024, "test"), "http://127.0.0.1:9/".into())
            .await
            .unwrap()
            .unwrap_err();
        assert!(
            matches!(err.kind, FetchErrorKind::Connect(_) | FetchErrorKind::Timeout { .. }),
            "got: {:?}",
            err.kind
        );
    }
}
