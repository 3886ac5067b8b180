//! # edgequake-imgload
//!
//! Fetch an HTML document, extract one value from it, use that value as the
//! locator of an image, then fetch and decode the image. All of it runs off the
//! presentation thread, with results delivered back to it in order.
//!
//! ## Pipeline Overview
//!
//! ```text
//! trigger(input)
//!  │
//!  ├─ 1. Fetch    document locator → HTML     (blocking pool)
//!  ├─ 2. Extract  HTML → value                (CSS selector / regex / closure)
//!  ├─ 3. Deliver  value → show_status         (presentation thread)
//!  ├─ 4. Fetch    value as locator → bytes    (blocking pool)
//!  ├─ 5. Decode   bytes → RGBA bitmap         (blocking pool)
//!  └─ 6. Deliver  image → show_image          (presentation thread)
//! ```
//!
//! A new trigger cancels the run in progress and starts over; nothing from
//! the superseded run reaches the screen.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_imgload::{
//!     CallbackSurface, PipelineConfig, SelectorExtractor, TaskPipeline,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rule = SelectorExtractor::new("img#hero")?.attribute("src");
//!     let (pipeline, mut presenter) = TaskPipeline::new(rule, PipelineConfig::default())?;
//!
//!     let mut surface = CallbackSurface::new(
//!         |text: &str| println!("status: {text}"),
//!         |image| println!("image: {:?}", image.map(|i| (i.width(), i.height()))),
//!     );
//!
//!     pipeline.trigger("https://example.com/");
//!     while let Some(d) = presenter.next(&mut surface).await {
//!         if d.finished_run() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `imgload` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-imgload = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod observer;
pub mod pipeline;
pub mod present;
pub mod run;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{LocatorTemplate, MissingValuePolicy, PipelineConfig, PipelineConfigBuilder};
pub use error::{DecodeError, FetchError, FetchErrorKind, LoaderError, PipelineError};
pub use observer::{NoopObserver, ObserverRef, PipelineObserver};
pub use pipeline::decode::{DecodedImage, ImageDecoder, RasterDecoder};
pub use pipeline::extract::{Extraction, Extractor, PatternExtractor, SelectorExtractor};
pub use pipeline::fetch::{FetchRequest, Fetcher, HttpFetcher};
pub use present::{CallbackSurface, DeliveryKind, Dispatched, PresentationSurface, Presenter};
pub use run::{PipelineState, RunHandle, RunId, RunOutcome};
pub use task::{TaskPipeline, TaskPipelineBuilder};
