//! Pipeline stages for the document → image loader.
//!
//! Each submodule implements exactly one leaf stage behind a trait, so the
//! orchestrator in [`crate::task`] can be driven with real network and codec
//! implementations or with in-memory doubles.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ extract ──▶ (deliver value) ──▶ fetch ──▶ decode
//! (HTML)    (value)                          (bytes)   (RGBA)
//! ```
//!
//! 1. [`fetch`]   — blocking `http`/`https`/`file` fetch; the only stage with I/O
//! 2. [`extract`] — pure rule mapping a document to a value (CSS selector, regex, closure)
//! 3. [`decode`]  — pure, all-or-nothing image decoding with size limits

pub mod decode;
pub mod extract;
pub mod fetch;
