//! The task pipeline: trigger → document → value → image → presentation.
//!
//! ## Stages
//!
//! ```text
//! trigger(input)
//!   │
//!   ├─ FetchingDocument        fetch + extract      (spawn_blocking)
//!   ├─ DeliveringIntermediate  value → show_status  (channel)
//!   ├─ FetchingImage           fetch, then decode   (spawn_blocking ×2)
//!   ├─ DeliveringFinal         image → show_image   (channel)
//!   └─ Idle
//! ```
//!
//! Any failure moves the run to `Errored`, delivers one error indication and
//! returns to `Idle`. No image is delivered for a failed run.
//!
//! ## Cancel-and-restart
//!
//! A new trigger supersedes the current run. The old run's token is
//! cancelled, so its orchestration task stops waiting on whatever blocking
//! stage it was in and reports [`RunOutcome::Cancelled`]. A blocking fetch
//! already on the wire still completes, but its result is dropped. Every
//! delivery is gated on the run still being current, both when it is
//! enqueued and again when the [`Presenter`] applies it.

use crate::config::{MissingValuePolicy, PipelineConfig};
use crate::error::{LoaderError, PipelineError};
use crate::observer::PipelineObserver;
use crate::pipeline::decode::{ImageDecoder, RasterDecoder};
use crate::pipeline::extract::{Extraction, Extractor};
use crate::pipeline::fetch::{FetchRequest, Fetcher, HttpFetcher};
use crate::present::{Delivery, DeliverySender, Payload, Presenter};
use crate::run::{PipelineState, RunHandle, RunId, RunOutcome, RunSlot};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Coordinates document and image stages for one screen.
///
/// Construct one per screen lifetime; it owns no global state. Dropping it
/// cancels the active run.
pub struct TaskPipeline {
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    decoder: Arc<dyn ImageDecoder>,
    config: PipelineConfig,
    slot: Arc<RunSlot>,
    tx: DeliverySender,
    runtime: Handle,
}

impl TaskPipeline {
    /// Build a pipeline with the HTTP fetcher and raster decoder derived from
    /// `config`, running background work on the current tokio runtime.
    ///
    /// Returns the pipeline (trigger side) and its [`Presenter`] (delivery
    /// side). Both belong on the presentation thread.
    pub fn new(
        extractor: impl Extractor + 'static,
        config: PipelineConfig,
    ) -> Result<(Self, Presenter), LoaderError> {
        Self::builder(extractor).config(config).build()
    }

    pub fn builder(extractor: impl Extractor + 'static) -> TaskPipelineBuilder {
        TaskPipelineBuilder {
            extractor: Arc::new(extractor),
            fetcher: None,
            decoder: None,
            config: PipelineConfig::default(),
            runtime: None,
        }
    }

    /// Start a new run for `input`, superseding any run in progress.
    pub fn trigger(&self, input: &str) -> RunHandle {
        let document_locator = self.config.document_locator(input);
        let (id, cancel, superseded) = self.slot.begin();
        match superseded {
            Some(prev) => info!("{} superseded by {}", prev, id),
            None => debug!("{} starting from idle", id),
        }

        let ctx = RunContext {
            id,
            cancel,
            slot: Arc::clone(&self.slot),
            tx: self.tx.clone(),
            fetcher: Arc::clone(&self.fetcher),
            extractor: Arc::clone(&self.extractor),
            decoder: Arc::clone(&self.decoder),
            config: self.config.clone(),
            document_locator,
        };

        if let Some(text) = self.config.progress_status(input) {
            ctx.send(Payload::Status(text), false);
        }

        RunHandle::new(id, self.runtime.spawn(ctx.run()))
    }

    /// Cancel the active run without starting another.
    ///
    /// Returns the id of the run that was still active, if any.
    pub fn cancel(&self) -> Option<RunId> {
        let cancelled = self.slot.cancel();
        if let Some(id) = cancelled {
            info!("{} cancelled", id);
        }
        cancelled
    }

    pub fn state(&self) -> PipelineState {
        self.slot.state()
    }

    /// The most recent run, unless it was cancelled.
    pub fn current_run(&self) -> Option<RunId> {
        self.slot.current()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

impl Drop for TaskPipeline {
    fn drop(&mut self) {
        self.slot.cancel();
    }
}

/// Builder for [`TaskPipeline`] with injectable stages and runtime.
pub struct TaskPipelineBuilder {
    extractor: Arc<dyn Extractor>,
    fetcher: Option<Arc<dyn Fetcher>>,
    decoder: Option<Arc<dyn ImageDecoder>>,
    config: PipelineConfig,
    runtime: Option<Handle>,
}

impl TaskPipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default [`HttpFetcher`].
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Replace the default [`RasterDecoder`].
    pub fn decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Run background work on this runtime instead of the current one.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<(TaskPipeline, Presenter), LoaderError> {
        let runtime = match self.runtime {
            Some(h) => h,
            None => Handle::try_current().map_err(|e| LoaderError::NoRuntime(e.to_string()))?,
        };
        let config = self.config;
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(HttpFetcher::from_config(&config)) as Arc<dyn Fetcher>);
        let decoder = self
            .decoder
            .unwrap_or_else(|| Arc::new(RasterDecoder::from_config(&config)) as Arc<dyn ImageDecoder>);

        let slot = Arc::new(RunSlot::new());
        let (tx, rx) = mpsc::unbounded_channel();

        let pipeline = TaskPipeline {
            fetcher,
            extractor: self.extractor,
            decoder,
            config,
            slot: Arc::clone(&slot),
            tx,
            runtime,
        };
        Ok((pipeline, Presenter::new(rx, slot)))
    }
}

// ── Per-run orchestration ────────────────────────────────────────────────

/// Everything one background run needs, detached from the pipeline.
struct RunContext {
    id: RunId,
    cancel: CancellationToken,
    slot: Arc<RunSlot>,
    tx: DeliverySender,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    decoder: Arc<dyn ImageDecoder>,
    config: PipelineConfig,
    document_locator: String,
}

impl RunContext {
    async fn run(self) -> RunOutcome {
        info!("{} started: {}", self.id, self.document_locator);
        self.observe(|o| o.on_run_start(self.id, &self.document_locator));
        self.observe(|o| o.on_state_change(self.id, PipelineState::FetchingDocument));

        match self.execute().await {
            Ok((width, height)) => {
                info!("{} complete: {}x{} px", self.id, width, height);
                self.observe(|o| o.on_run_complete(self.id, width, height));
                RunOutcome::Completed { width, height }
            }
            Err(PipelineError::Cancelled) => self.cancelled(),
            Err(e) => self.fail(e),
        }
    }

    async fn execute(&self) -> Result<(u32, u32), PipelineError> {
        // ── Stage 1: fetch document + extract ────────────────────────────
        let locator = self.document_locator.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let extractor = Arc::clone(&self.extractor);
        let extraction = self
            .offload(move || {
                let request = FetchRequest::new(locator)?;
                let document = fetcher.fetch_text(&request)?;
                debug!("Document is {} bytes", document.len());
                Ok(extractor.extract(&document))
            })
            .await?;

        let value = match extraction {
            Extraction::Found(v) => v,
            Extraction::NotFound => match self.config.missing_value {
                MissingValuePolicy::UseEmpty => {
                    warn!("{}: extraction matched nothing; using empty value", self.id);
                    String::new()
                }
                MissingValuePolicy::Fail => {
                    return Err(PipelineError::ValueNotFound {
                        locator: self.document_locator.clone(),
                    })
                }
            },
        };
        debug!("{} extracted value {:?}", self.id, value);

        // ── Stage 2: hand the value to the presentation thread ───────────
        self.enter(PipelineState::DeliveringIntermediate)?;
        self.deliver(
            Payload::Status(value.clone()),
            false,
            PipelineState::FetchingImage,
        )?;

        // ── Stage 3: fetch image bytes, then decode ──────────────────────
        let fetcher = Arc::clone(&self.fetcher);
        let bytes = self
            .offload(move || {
                let request = FetchRequest::new(value)?;
                Ok(fetcher.fetch(&request)?)
            })
            .await?;
        debug!("{} fetched {} image bytes", self.id, bytes.len());

        self.ensure_current()?;
        let decoder = Arc::clone(&self.decoder);
        let image = self
            .offload(move || Ok(decoder.decode(&bytes)?))
            .await?;
        let dims = (image.width(), image.height());

        // ── Stage 4: hand the image to the presentation thread ───────────
        self.enter(PipelineState::DeliveringFinal)?;
        self.deliver(Payload::Image(image), true, PipelineState::Idle)?;
        Ok(dims)
    }

    /// Run a blocking stage on the blocking pool, abandoning it on cancellation.
    async fn offload<T, F>(&self, stage: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_current()?;
        let task = tokio::task::spawn_blocking(stage);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
            joined = task => joined
                .map_err(|e| PipelineError::Internal(format!("{} stage panicked: {}", self.id, e)))?,
        };
        self.ensure_current()?;
        result
    }

    fn ensure_current(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() || !self.slot.is_current(self.id) {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    fn enter(&self, state: PipelineState) -> Result<(), PipelineError> {
        if !self.slot.advance(self.id, state) {
            return Err(PipelineError::Cancelled);
        }
        debug!("{} → {}", self.id, state);
        self.observe(|o| o.on_state_change(self.id, state));
        Ok(())
    }

    /// Enqueue `payload` if still current, then move to `next`.
    fn deliver(
        &self,
        payload: Payload,
        terminal: bool,
        next: PipelineState,
    ) -> Result<(), PipelineError> {
        let tx = &self.tx;
        let id = self.id;
        let sent = self.slot.deliver_then(id, next, move || {
            tx.send(Delivery {
                run: id,
                payload,
                terminal,
            })
            .is_ok()
        });
        if !sent {
            return Err(PipelineError::Cancelled);
        }
        debug!("{} → {}", self.id, next);
        self.observe(|o| o.on_state_change(self.id, next));
        Ok(())
    }

    /// Fire-and-forget delivery used for the progress status.
    fn send(&self, payload: Payload, terminal: bool) {
        let tx = &self.tx;
        let id = self.id;
        let state = self.slot.state();
        self.slot.deliver_then(id, state, move || {
            tx.send(Delivery {
                run: id,
                payload,
                terminal,
            })
            .is_ok()
        });
    }

    fn fail(&self, error: PipelineError) -> RunOutcome {
        warn!("{} failed: {}", self.id, error);
        if self.enter(PipelineState::Errored).is_err() {
            return self.cancelled();
        }

        let clear = self.config.clear_image_on_failure;
        let after_error = if clear {
            PipelineState::Errored
        } else {
            PipelineState::Idle
        };
        if self
            .deliver(Payload::Error(error.clone()), !clear, after_error)
            .is_err()
        {
            return self.cancelled();
        }
        if clear && self.deliver(Payload::ClearImage, true, PipelineState::Idle).is_err() {
            return self.cancelled();
        }

        self.observe(|o| o.on_run_failed(self.id, &error));
        RunOutcome::Failed(error)
    }

    fn cancelled(&self) -> RunOutcome {
        info!("{} cancelled; results discarded", self.id);
        self.observe(|o| o.on_run_cancelled(self.id));
        RunOutcome::Cancelled
    }

    fn observe(&self, f: impl FnOnce(&dyn PipelineObserver)) {
        if let Some(ref o) = self.config.observer {
            f(o.as_ref());
        }
    }
}
