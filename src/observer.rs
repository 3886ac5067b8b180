//! Observer trait for per-run pipeline events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::PipelineConfigBuilder::observer`] to receive events as a
//! run moves through its stages.
//!
//! Observers are **not** presentation callbacks. They are invoked from the
//! background context, may run on any thread, and see cancelled runs that the
//! presentation surface never hears about. Use them for logging, progress
//! spinners and tests; use [`crate::present::PresentationSurface`] for UI.
//!
//! # Example
//!
//! ```rust
//! use edgequake_imgload::{PipelineConfig, PipelineObserver, RunId};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CancelCounter(AtomicUsize);
//!
//! impl PipelineObserver for CancelCounter {
//!     fn on_run_cancelled(&self, _run: RunId) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .observer(Arc::new(CancelCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::PipelineError;
use crate::run::{PipelineState, RunId};
use std::sync::Arc;

/// Called by the pipeline as each run progresses.
///
/// Implementations must be `Send + Sync`; events arrive from tokio worker and
/// blocking-pool threads. All methods default to no-ops.
pub trait PipelineObserver: Send + Sync {
    /// A trigger created a new run.
    fn on_run_start(&self, run: RunId, document_locator: &str) {
        let _ = (run, document_locator);
    }

    /// The run entered `state`. Only reported while the run is current.
    fn on_state_change(&self, run: RunId, state: PipelineState) {
        let _ = (run, state);
    }

    /// The decoded image was handed to the presentation thread.
    fn on_run_complete(&self, run: RunId, width: u32, height: u32) {
        let _ = (run, width, height);
    }

    /// The run ended with a user-visible error.
    fn on_run_failed(&self, run: RunId, error: &PipelineError) {
        let _ = (run, error);
    }

    /// The run was superseded or cancelled; nothing more will be delivered for it.
    fn on_run_cancelled(&self, run: RunId) {
        let _ = run;
    }
}

/// A no-op implementation for callers that don't need events.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ObserverRef = Arc<dyn PipelineObserver>;
