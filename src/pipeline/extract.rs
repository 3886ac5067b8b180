//! Document extraction: pull one string out of a fetched HTML document.
//!
//! The rule is pluggable. Anything implementing [`Extractor`] works, including
//! a plain function or closure of type `Fn(&str) -> Extraction`. Two rules
//! ship with the crate:
//!
//! * [`SelectorExtractor`] — CSS selector; text or attribute of the first match.
//! * [`PatternExtractor`]  — regex; first capture group of the first match.
//!
//! Extraction never fails. Malformed or empty documents simply yield
//! [`Extraction::NotFound`]; what that means for the run is decided by
//! [`crate::config::MissingValuePolicy`].

use crate::error::LoaderError;
use regex::Regex;
use scraper::{Html, Selector};

/// Result of applying an extraction rule to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The rule matched. The value may be empty (e.g. `<a id="x"></a>`).
    Found(String),
    /// The rule matched nothing.
    NotFound,
}

impl Extraction {
    pub fn value(&self) -> Option<&str> {
        match self {
            Extraction::Found(v) => Some(v),
            Extraction::NotFound => None,
        }
    }
}

/// A deterministic, side-effect-free rule mapping a document to a value.
pub trait Extractor: Send + Sync {
    fn extract(&self, document: &str) -> Extraction;
}

impl<F> Extractor for F
where
    F: Fn(&str) -> Extraction + Send + Sync,
{
    fn extract(&self, document: &str) -> Extraction {
        self(document)
    }
}

/// Text (or an attribute) of the first element matching a CSS selector.
///
/// # Example
/// ```rust
/// use edgequake_imgload::{Extraction, Extractor, SelectorExtractor};
///
/// let rule = SelectorExtractor::new("#x").unwrap();
/// assert_eq!(rule.extract(r#"<a id="x">42</a>"#), Extraction::Found("42".into()));
///
/// let rule = SelectorExtractor::new("img.hero").unwrap().attribute("src");
/// assert_eq!(
///     rule.extract(r#"<img class="hero" src="/a.png">"#),
///     Extraction::Found("/a.png".into()),
/// );
/// ```
#[derive(Debug, Clone)]
pub struct SelectorExtractor {
    source: String,
    selector: Selector,
    attribute: Option<String>,
}

impl SelectorExtractor {
    pub fn new(selector: &str) -> Result<Self, LoaderError> {
        let parsed = Selector::parse(selector).map_err(|e| LoaderError::InvalidSelector {
            selector: selector.to_string(),
            detail: format!("{:?}", e),
        })?;
        Ok(Self {
            source: selector.to_string(),
            selector: parsed,
            attribute: None,
        })
    }

    /// Read this attribute of the first match instead of its text.
    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.attribute = Some(name.into());
        self
    }

    pub fn selector(&self) -> &str {
        &self.source
    }
}

impl Extractor for SelectorExtractor {
    fn extract(&self, document: &str) -> Extraction {
        let html = Html::parse_document(document);
        let Some(element) = html.select(&self.selector).next() else {
            return Extraction::NotFound;
        };

        match &self.attribute {
            Some(name) => match element.value().attr(name) {
                Some(v) => Extraction::Found(v.trim().to_string()),
                None => Extraction::NotFound,
            },
            None => Extraction::Found(element.text().collect::<String>().trim().to_string()),
        }
    }
}

/// First capture group (or the whole match) of a regex.
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    pattern: Regex,
}

impl PatternExtractor {
    pub fn new(pattern: &str) -> Result<Self, LoaderError> {
        let compiled = Regex::new(pattern).map_err(|source| LoaderError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { pattern: compiled })
    }
}

impl Extractor for PatternExtractor {
    fn extract(&self, document: &str) -> Extraction {
        match self.pattern.captures(document) {
            Some(caps) => {
                let m = caps.get(1).or_else(|| caps.get(0));
                Extraction::Found(m.map(|m| m.as_str().trim().to_string()).unwrap_or_default())
            }
            None => Extraction::NotFound,
        }
    }
}
