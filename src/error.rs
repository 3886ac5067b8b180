//! Error types for the edgequake-imgload library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`LoaderError`] — **Fatal**: the pipeline cannot be built at all
//!   (invalid configuration, a CSS selector that does not parse, no tokio
//!   runtime). Returned as `Err(LoaderError)` from constructors.
//!
//! * [`PipelineError`] — **Per-run**: one run failed (network down, image
//!   bytes are garbage) but the pipeline itself is fine and returns to idle,
//!   ready for the next trigger. Delivered to the presentation surface and
//!   reported through [`crate::run::RunOutcome`].

use thiserror::Error;

/// All fatal errors returned by the edgequake-imgload library.
#[derive(Debug, Error)]
pub enum LoaderError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A CSS selector passed to [`crate::pipeline::extract::SelectorExtractor`]
    /// could not be parsed.
    #[error("Invalid CSS selector '{selector}': {detail}")]
    InvalidSelector { selector: String, detail: String },

    /// A regex passed to [`crate::pipeline::extract::PatternExtractor`]
    /// could not be compiled.
    #[error("Invalid extraction pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    // ── Runtime errors ────────────────────────────────────────────────────
    /// No tokio runtime was available to run background work on.
    #[error("No tokio runtime available: {0}\nConstruct the pipeline inside a runtime or pass a Handle explicitly.")]
    NoRuntime(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write the decoded image to disk.
    #[error("Failed to write image file '{path}': {detail}")]
    OutputWriteFailed { path: String, detail: String },
}

/// What went wrong while fetching one locator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchErrorKind {
    /// Locator is empty or not a parseable URL.
    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    /// URL parsed but its scheme is not http, https or file.
    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    /// Connection could not be established or broke mid-transfer.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Transport exceeded the configured timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Server answered with a non-success status code.
    #[error("HTTP {0}")]
    Status(u16),

    /// Body exceeded the configured size cap.
    #[error("response larger than {limit} bytes")]
    TooLarge { limit: u64 },

    /// Local file could not be read.
    #[error("I/O error: {0}")]
    Io(String),
}

/// A failed fetch, carrying the locator it was for and the cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Failed to fetch '{locator}': {kind}")]
pub struct FetchError {
    pub locator: String,
    pub kind: FetchErrorKind,
}

impl FetchError {
    pub fn new(locator: impl Into<String>, kind: FetchErrorKind) -> Self {
        Self {
            locator: locator.into(),
            kind,
        }
    }
}

/// Image bytes could not be turned into a bitmap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Zero bytes were fetched.
    #[error("image data is empty")]
    Empty,

    /// The bytes do not start with any known image signature.
    #[error("unrecognised image format")]
    UnknownFormat,

    /// The format was recognised but the data is corrupt or truncated.
    #[error("malformed {format} data: {detail}")]
    Malformed { format: String, detail: String },

    /// The image is larger than the decoder is allowed to allocate.
    #[error("image exceeds decoder limits: {0}")]
    LimitExceeded(String),
}

/// A non-fatal error that terminates a single run.
///
/// Cloneable so the same error can be delivered to the presentation surface
/// and returned from the run's join handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Document or image fetch failed.
    #[error("{0}")]
    Fetch(#[from] FetchError),

    /// Image bytes did not decode.
    #[error("Failed to decode image: {0}")]
    Decode(#[from] DecodeError),

    /// Extraction found nothing and the pipeline is configured to treat
    /// absence as an error.
    #[error("No value found in document '{locator}'")]
    ValueNotFound { locator: String },

    /// A newer trigger superseded this run.
    #[error("Run superseded by a newer trigger")]
    Cancelled,

    /// A background stage panicked.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// `true` for the silent, non-user-visible outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}
