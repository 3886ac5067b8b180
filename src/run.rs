//! Run identity, pipeline state, and the shared "current run" slot.
//!
//! Every trigger creates a new [`RunId`]. The [`RunSlot`] remembers which run
//! is current and is the only mutable state shared between the presentation
//! thread and background work. All reads and writes go through one `Mutex`,
//! so "is this run still current?" and "enqueue this delivery" happen
//! atomically with respect to a new trigger.

use crate::error::PipelineError;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Identity of one pipeline run. Strictly increasing per pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RunId(u64);

impl RunId {
    /// The id handed to the first trigger of a fresh pipeline.
    pub const FIRST: RunId = RunId(1);

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run#{}", self.0)
    }
}

/// Where the current run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PipelineState {
    #[default]
    Idle,
    FetchingDocument,
    DeliveringIntermediate,
    FetchingImage,
    DeliveringFinal,
    Errored,
}

impl PipelineState {
    /// `true` while a run still has work or deliveries outstanding.
    pub fn is_active(self) -> bool {
        !matches!(self, PipelineState::Idle)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::FetchingDocument => "fetching document",
            PipelineState::DeliveringIntermediate => "delivering value",
            PipelineState::FetchingImage => "fetching image",
            PipelineState::DeliveringFinal => "delivering image",
            PipelineState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// How a run ended, as seen by whoever awaits its [`RunHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The image was delivered.
    Completed { width: u32, height: u32 },
    /// An error indication was delivered.
    Failed(PipelineError),
    /// The run was superseded; nothing (more) was delivered.
    Cancelled,
}

impl RunOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled)
    }
}

/// Handle to a background run returned by [`crate::TaskPipeline::trigger`].
///
/// Dropping the handle does not cancel the run.
#[derive(Debug)]
pub struct RunHandle {
    id: RunId,
    join: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub(crate) fn new(id: RunId, join: JoinHandle<RunOutcome>) -> Self {
        Self { id, join }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    /// `true` once the background task has returned.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the background task and report how the run ended.
    pub async fn outcome(self) -> RunOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => RunOutcome::Cancelled,
            Err(e) => RunOutcome::Failed(PipelineError::Internal(format!(
                "{} task panicked: {}",
                self.id, e
            ))),
        }
    }
}

struct SlotInner {
    next: u64,
    current: Option<RunId>,
    cancel: CancellationToken,
    state: PipelineState,
}

/// The single shared record of which run is current.
pub(crate) struct RunSlot {
    inner: Mutex<SlotInner>,
}

impl RunSlot {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                next: RunId::FIRST.0,
                current: None,
                cancel: CancellationToken::new(),
                state: PipelineState::Idle,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a new run, cancelling whatever was current.
    ///
    /// Returns the new id, its token, and the id of the run it superseded
    /// (if that run was still active).
    pub(crate) fn begin(&self) -> (RunId, CancellationToken, Option<RunId>) {
        let mut g = self.lock();
        g.cancel.cancel();
        let superseded = g.current.filter(|_| g.state.is_active());

        let id = RunId(g.next);
        g.next += 1;
        g.current = Some(id);
        g.cancel = CancellationToken::new();
        g.state = PipelineState::FetchingDocument;
        (id, g.cancel.clone(), superseded)
    }

    /// Invalidate the current run without starting another.
    pub(crate) fn cancel(&self) -> Option<RunId> {
        let mut g = self.lock();
        g.cancel.cancel();
        let was_active = g.current.filter(|_| g.state.is_active());
        g.current = None;
        g.state = PipelineState::Idle;
        was_active
    }

    pub(crate) fn is_current(&self, id: RunId) -> bool {
        self.lock().current == Some(id)
    }

    pub(crate) fn current(&self) -> Option<RunId> {
        self.lock().current
    }

    pub(crate) fn state(&self) -> PipelineState {
        self.lock().state
    }

    /// Move `id` to `state` if it is still current.
    pub(crate) fn advance(&self, id: RunId, state: PipelineState) -> bool {
        let mut g = self.lock();
        if g.current != Some(id) {
            return false;
        }
        g.state = state;
        true
    }

    /// Run `send` under the lock if `id` is still current, then move to `next`.
    ///
    /// Holding the lock across the check and the enqueue means a trigger on
    /// another thread either happens before (and this delivery is dropped) or
    /// after (and the presenter's own check drops it).
    pub(crate) fn deliver_then<F>(&self, id: RunId, next: PipelineState, send: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut g = self.lock();
        if g.current != Some(id) {
            return false;
        }
        if !send() {
            return false;
        }
        g.state = next;
        true
    }
}
