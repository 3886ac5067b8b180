//! Configuration types for the document → image pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built
//! via its [`PipelineConfigBuilder`]. The config is cloned into every run, so
//! a run in flight keeps the settings it started with even if the screen
//! builds a new pipeline with different ones.

use crate::error::LoaderError;
use crate::observer::ObserverRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder substituted by [`LocatorTemplate`] and the progress message.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Configuration for a [`crate::TaskPipeline`].
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_imgload::{MissingValuePolicy, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .fetch_timeout_secs(10)
///     .missing_value(MissingValuePolicy::Fail)
///     .document_template("https://example.com/lookup?q={input}")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Per-request transport timeout in seconds. Range: 1–600. Default: 30.
    ///
    /// This is the only timeout in the system; the pipeline itself never
    /// times out a stage.
    pub fetch_timeout_secs: u64,

    /// Maximum accepted response body, in bytes. Default: 20 MiB.
    pub max_body_bytes: u64,

    /// `User-Agent` header sent with HTTP requests.
    pub user_agent: String,

    /// Largest accepted image width or height, in pixels. Default: 8192.
    pub max_image_dimension: u32,

    /// What to do when extraction finds nothing. Default: [`MissingValuePolicy::UseEmpty`].
    pub missing_value: MissingValuePolicy,

    /// Builds the document locator from the trigger input.
    ///
    /// `None` (default) means the trigger input *is* the document locator.
    pub document_template: Option<LocatorTemplate>,

    /// Status text delivered as soon as a run starts, e.g. `"{input} downloading…"`.
    ///
    /// `{input}` is replaced with the raw trigger input. `None` (default)
    /// delivers nothing until the extracted value is ready.
    pub progress_message: Option<String>,

    /// Also deliver `show_image(None)` after the error status of a failed run.
    ///
    /// Lets a surface clear a previously shown image. Default: `false`.
    pub clear_image_on_failure: bool,

    /// Optional background-context observer for stage transitions.
    pub observer: Option<ObserverRef>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 30,
            max_body_bytes: 20 * 1024 * 1024,
            user_agent: concat!("edgequake-imgload/", env!("CARGO_PKG_VERSION")).to_string(),
            max_image_dimension: 8192,
            missing_value: MissingValuePolicy::default(),
            document_template: None,
            progress_message: None,
            clear_image_on_failure: false,
            observer: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("user_agent", &self.user_agent)
            .field("max_image_dimension", &self.max_image_dimension)
            .field("missing_value", &self.missing_value)
            .field("document_template", &self.document_template)
            .field("progress_message", &self.progress_message)
            .field("clear_image_on_failure", &self.clear_image_on_failure)
            .field("observer", &self.observer.as_ref().map(|_| "<observer>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder with default values.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: PipelineConfig::default(),
        }
    }

    /// Resolve the trigger input into the document locator.
    pub fn document_locator(&self, input: &str) -> String {
        match &self.document_template {
            Some(t) => t.render(input),
            None => input.to_string(),
        }
    }

    /// Render the optional progress status for a trigger input.
    pub fn progress_status(&self, input: &str) -> Option<String> {
        self.progress_message
            .as_ref()
            .map(|m| m.replace(INPUT_PLACEHOLDER, input))
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs.clamp(1, 600);
        self
    }

    pub fn max_body_bytes(mut self, bytes: u64) -> Self {
        self.config.max_body_bytes = bytes.max(1024);
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn max_image_dimension(mut self, px: u32) -> Self {
        self.config.max_image_dimension = px.max(1);
        self
    }

    pub fn missing_value(mut self, policy: MissingValuePolicy) -> Self {
        self.config.missing_value = policy;
        self
    }

    pub fn document_template(mut self, template: impl Into<String>) -> Self {
        self.config.document_template = Some(LocatorTemplate(template.into()));
        self
    }

    pub fn progress_message(mut self, message: impl Into<String>) -> Self {
        self.config.progress_message = Some(message.into());
        self
    }

    pub fn clear_image_on_failure(mut self, v: bool) -> Self {
        self.config.clear_image_on_failure = v;
        self
    }

    pub fn observer(mut self, observer: ObserverRef) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, LoaderError> {
        let c = &self.config;
        if c.user_agent.trim().is_empty() {
            return Err(LoaderError::InvalidConfig(
                "User-Agent must not be empty".into(),
            ));
        }
        if let Some(ref t) = c.document_template {
            if !t.0.contains(INPUT_PLACEHOLDER) {
                return Err(LoaderError::InvalidConfig(format!(
                    "Document template '{}' has no {} placeholder",
                    t.0, INPUT_PLACEHOLDER
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the pipeline treats a document in which the extraction rule matched nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingValuePolicy {
    /// Treat absence as an empty value: deliver `""` as status and use it as
    /// the image locator, which then fails at fetch time. (default)
    #[default]
    UseEmpty,
    /// End the run with [`crate::PipelineError::ValueNotFound`].
    Fail,
}

/// A document locator with an `{input}` placeholder.
///
/// The trigger input is percent-encoded before substitution so user text
/// can never break out of the query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocatorTemplate(pub String);

impl LocatorTemplate {
    /// Substitute the encoded input into the template.
    pub fn render(&self, input: &str) -> String {
        self.0
            .replace(INPUT_PLACEHOLDER, &urlencoding::encode(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = PipelineConfig::default();
        assert_eq!(c.fetch_timeout_secs, 30);
        assert_eq!(c.missing_value, MissingValuePolicy::UseEmpty);
        assert!(c.document_template.is_none());
        assert!(c.progress_message.is_none());
        assert!(!c.clear_image_on_failure);
        assert!(c.user_agent.starts_with("edgequake-imgload/"));
    }

    #[test]
    fn builder_clamps_values() {
        let c = PipelineConfig::builder()
            .fetch_timeout_secs(0)
            .max_body_bytes(10)
            .max_image_dimension(0)
            .build()
            .unwrap();
        assert_eq!(c.fetch_timeout_secs, 1);
        assert_eq!(c.max_body_bytes, 1024);
        assert_eq!(c.max_image_dimension, 1);
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let err = PipelineConfig::builder()
            .document_template("https://example.com/fixed")
            .build()
            .unwrap_err();
        assert!(matches!(err, LoaderError::InvalidConfig(_)));
    }

    #[test]
    fn empty_user_agent_is_rejected() {
        assert!(PipelineConfig::builder().user_agent("  ").build().is_err());
    }

    #[test]
    fn document_locator_passthrough_without_template() {
        let c = PipelineConfig::default();
        assert_eq!(c.document_locator("http://example.test/page"), "http://example.test/page");
    }

    #[test]
    fn document_locator_encodes_input() {
        let c = PipelineConfig::builder()
            .document_template("https://example.com/q?magic={input}")
            .build()
            .unwrap();
        assert_eq!(
            c.document_locator("a b&c"),
            "https://example.com/q?magic=a%20b%26c"
        );
    }

    #[test]
    fn progress_status_uses_raw_input() {
        let c = PipelineConfig::builder()
            .progress_message("{input} downloading…")
            .build()
            .unwrap();
        assert_eq!(c.progress_status("a b").as_deref(), Some("a b downloading…"));
        assert_eq!(PipelineConfig::default().progress_status("x"), None);
    }

    #[test]
    fn missing_value_policy_serde() {
        let json = serde_json::to_string(&MissingValuePolicy::Fail).unwrap();
        assert_eq!(json, "\"fail\"");
        let back: MissingValuePolicy = serde_json::from_str("\"use_empty\"").unwrap();
        assert_eq!(back, MissingValuePolicy::UseEmpty);
    }
}
