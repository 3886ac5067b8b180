//! Delivery of results to the single-threaded presentation surface.
//!
//! Background work never touches the surface. It enqueues [`Delivery`]
//! messages on a channel; the screen drains them with a [`Presenter`] on its
//! own thread, which is where every [`PresentationSurface`] method runs. The
//! surface therefore needs neither `Send` nor `Sync`, so a GUI widget can
//! implement it directly.
//!
//! Pick the drain method that matches the host's event loop:
//!
//! | Host loop | Method |
//! |-----------|--------|
//! | Poll per frame / timer tick | [`Presenter::pump`] |
//! | Async loop on a `LocalSet` or `block_on` | [`Presenter::next`] |
//! | Plain OS thread | [`Presenter::blocking_next`] |

use crate::error::PipelineError;
use crate::pipeline::decode::DecodedImage;
use crate::run::{RunId, RunSlot};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// The external collaborator that displays status text and images.
pub trait PresentationSurface {
    /// Intermediate value, progress text, or (by default) an error message.
    fn show_status(&mut self, text: &str);

    /// Final image of a run, or `None` to clear the image area.
    fn show_image(&mut self, image: Option<DecodedImage>);

    /// A run failed. Defaults to showing the error text as status.
    fn show_error(&mut self, error: &PipelineError) {
        self.show_status(&error.to_string());
    }
}

/// Adapts two closures into a [`PresentationSurface`].
///
/// # Example
/// ```rust
/// use edgequake_imgload::{CallbackSurface, PresentationSurface};
///
/// let mut lines = Vec::new();
/// let mut surface = CallbackSurface::new(|t: &str| lines.push(t.to_string()), |_img| {});
/// surface.show_status("42");
/// drop(surface);
/// assert_eq!(lines, vec!["42"]);
/// ```
pub struct CallbackSurface<S, I> {
    status: S,
    image: I,
}

impl<S, I> CallbackSurface<S, I>
where
    S: FnMut(&str),
    I: FnMut(Option<DecodedImage>),
{
    pub fn new(status: S, image: I) -> Self {
        Self { status, image }
    }
}

impl<S, I> PresentationSurface for CallbackSurface<S, I>
where
    S: FnMut(&str),
    I: FnMut(Option<DecodedImage>),
{
    fn show_status(&mut self, text: &str) {
        (self.status)(text)
    }

    fn show_image(&mut self, image: Option<DecodedImage>) {
        (self.image)(image)
    }
}

/// Which surface method a delivery targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    Status,
    Error,
    Image,
    ClearImage,
}

#[derive(Debug)]
pub(crate) enum Payload {
    Status(String),
    Error(PipelineError),
    Image(DecodedImage),
    ClearImage,
}

impl Payload {
    fn kind(&self) -> DeliveryKind {
        match self {
            Payload::Status(_) => DeliveryKind::Status,
            Payload::Error(_) => DeliveryKind::Error,
            Payload::Image(_) => DeliveryKind::Image,
            Payload::ClearImage => DeliveryKind::ClearImage,
        }
    }
}

/// One message from a background run to the presentation thread.
#[derive(Debug)]
pub(crate) struct Delivery {
    pub(crate) run: RunId,
    pub(crate) payload: Payload,
    /// Last delivery of the run.
    pub(crate) terminal: bool,
}

pub(crate) type DeliverySender = mpsc::UnboundedSender<Delivery>;

/// What [`Presenter`] did with one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub run: RunId,
    pub kind: DeliveryKind,
    /// `false` when the run had been superseded and the delivery was dropped.
    pub delivered: bool,
    /// `true` for the last delivery a run makes.
    pub terminal: bool,
}

impl Dispatched {
    /// `true` when this delivery reached the surface and ended its run.
    pub fn finished_run(&self) -> bool {
        self.delivered && self.terminal
    }
}

/// Presentation-side end of a [`crate::TaskPipeline`].
///
/// Owned by the presentation thread. Re-checks every delivery against the
/// current run before touching the surface, so nothing from a superseded run
/// is shown even if it was already queued when the new trigger happened.
pub struct Presenter {
    rx: mpsc::UnboundedReceiver<Delivery>,
    slot: Arc<RunSlot>,
}

impl Presenter {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Delivery>, slot: Arc<RunSlot>) -> Self {
        Self { rx, slot }
    }

    /// Deliver everything already queued, without waiting.
    pub fn pump<S>(&mut self, surface: &mut S) -> Vec<Dispatched>
    where
        S: PresentationSurface + ?Sized,
    {
        let mut out = Vec::new();
        while let Ok(delivery) = self.rx.try_recv() {
            out.push(self.dispatch(delivery, surface));
        }
        out
    }

    /// Wait for the next delivery and apply it.
    ///
    /// Returns `None` once the pipeline and all its runs are gone.
    pub async fn next<S>(&mut self, surface: &mut S) -> Option<Dispatched>
    where
        S: PresentationSurface + ?Sized,
    {
        let delivery = self.rx.recv().await?;
        Some(self.dispatch(delivery, surface))
    }

    /// Blocking variant of [`Presenter::next`] for plain threads.
    ///
    /// Panics if called from within an async context.
    pub fn blocking_next<S>(&mut self, surface: &mut S) -> Option<Dispatched>
    where
        S: PresentationSurface + ?Sized,
    {
        let delivery = self.rx.blocking_recv()?;
        Some(self.dispatch(delivery, surface))
    }

    fn dispatch<S>(&self, delivery: Delivery, surface: &mut S) -> Dispatched
    where
        S: PresentationSurface + ?Sized,
    {
        let Delivery {
            run,
            payload,
            terminal,
        } = delivery;
        let kind = payload.kind();

        if !self.slot.is_current(run) {
            debug!("Suppressed {:?} delivery from superseded {}", kind, run);
            return Dispatched {
                run,
                kind,
                delivered: false,
                terminal,
            };
        }

        match payload {
            Payload::Status(text) => surface.show_status(&text),
            Payload::Error(err) => surface.show_error(&err),
            Payload::Image(img) => surface.show_image(Some(img)),
            Payload::ClearImage => surface.show_image(None),
        }

        Dispatched {
            run,
            kind,
            delivered: true,
            terminal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::PipelineState;
    use image::RgbaImage;

    #[derive(Default)]
    struct Recording {
        statuses: Vec<String>,
        images: Vec<Option<(u32, u32)>>,
    }

    impl PresentationSurface for Recording {
        fn show_status(&mut self, text: &str) {
            self.statuses.push(text.to_string());
        }

        fn show_image(&mut self, image: Option<DecodedImage>) {
            self.images.push(image.map(|i| (i.width(), i.height())));
        }
    }

    fn setup() -> (DeliverySender, Presenter, Arc<RunSlot>) {
        let slot = Arc::new(RunSlot::new());
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Presenter::new(rx, Arc::clone(&slot)), slot)
    }

    fn status(run: RunId, text: &str) -> Delivery {
        Delivery {
            run,
            payload: Payload::Status(text.into()),
            terminal: false,
        }
    }

    #[test]
    fn delivers_for_current_run() {
        let (tx, mut presenter, slot) = setup();
        let (run, _, _) = slot.begin();
        tx.send(status(run, "42")).unwrap();
        tx.send(Delivery {
            run,
            payload: Payload::Image(DecodedImage::new(RgbaImage::new(2, 3), None)),
            terminal: true,
        })
        .unwrap();

        let mut surface = Recording::default();
        let dispatched = presenter.pump(&mut surface);

        assert_eq!(surface.statuses, vec!["42"]);
        assert_eq!(surface.images, vec![Some((2, 3))]);
        assert_eq!(dispatched.len(), 2);
        assert!(dispatched[1].finished_run());
    }

    #[test]
    fn suppresses_queued_delivery_from_superseded_run() {
        let (tx, mut presenter, slot) = setup();
        let (old, _, _) = slot.begin();
        tx.send(status(old, "stale")).unwrap();
        let (new, _, _) = slot.begin();
        tx.send(status(new, "fresh")).unwrap();

        let mut surface = Recording::default();
        let dispatched = presenter.pump(&mut surface);

        assert_eq!(surface.statuses, vec!["fresh"]);
        assert!(!dispatched[0].delivered);
        assert_eq!(dispatched[0].run, old);
        assert!(dispatched[1].delivered);
    }

    #[test]
    fn error_goes_through_status_by_default() {
        let (tx, mut presenter, slot) = setup();
        let (run, _, _) = slot.begin();
        slot.advance(run, PipelineState::Errored);
        tx.send(Delivery {
            run,
            payload: Payload::Error(PipelineError::Internal("boom".into())),
            terminal: false,
        })
        .unwrap();
        tx.send(Delivery {
            run,
            payload: Payload::ClearImage,
            terminal: true,
        })
        .unwrap();

        let mut surface = Recording::default();
        presenter.pump(&mut surface);
        assert_eq!(surface.statuses, vec!["Internal error: boom"]);
        assert_eq!(surface.images, vec![None]);
    }

    #[test]
    fn pump_on_empty_queue_is_noop() {
        let (_tx, mut presenter, _slot) = setup();
        let mut surface = Recording::default();
        assert!(presenter.pump(&mut surface).is_empty());
    }

    #[tokio::test]
    async fn next_returns_none_when_senders_are_gone() {
        let (tx, mut presenter, _slot) = setup();
        drop(tx);
        let mut surface = Recording::default();
        assert!(presenter.next(&mut surface).await.is_none());
    }

    #[test]
    fn callback_surface_forwards() {
        let mut texts = Vec::new();
        let mut images = 0;
        {
            let mut s = CallbackSurface::new(|t: &str| texts.push(t.to_owned()), |_| images += 1);
            s.show_status("a");
            s.show_error(&PipelineError::Cancelled);
            s.show_image(None);
        }
        assert_eq!(texts, vec!["a", "Run superseded by a newer trigger"]);
        assert_eq!(images, 1);
    }
}
