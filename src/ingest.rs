use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::warn;

use crate::comment::{PendingComment, Rgba};
use crate::error::OverlayError;
use crate::glyph::GlyphCache;
use crate::queue::CommentSender;

/// Entry point for the ingest collaborator. Cheap to clone across producer
/// threads.
///
/// With a glyph cache attached the text is rasterized on the calling thread
/// before it is queued, keeping that work off the render thread. Without one
/// the render thread rasterizes on admission.
#[derive(Clone)]
pub struct Ingest {
    sender: CommentSender,
    glyphs: Option<GlyphCache>,
}

impl Ingest {
    pub fn new(sender: CommentSender) -> Self {
        Self {
            sender,
            glyphs: None,
        }
    }

    pub fn with_glyphs(mut self, glyphs: GlyphCache) -> Self {
        self.glyphs = Some(glyphs);
        self
    }

    pub fn submit(
        &self,
        text: &str,
        color: Rgba,
        velocity_hint: Option<f32>,
    ) -> Result<(), OverlayError> {
        let pending = PendingComment::new(text, color)?.with_velocity(velocity_hint);
        let pending = match &self.glyphs {
            Some(glyphs) => prerender(glyphs, pending)?,
            None => pending,
        };
        self.sender.enqueue(pending)
    }
}

fn prerender(glyphs: &GlyphCache, pending: PendingComment) -> Result<PendingComment, OverlayError> {
    match glyphs.render(pending.text(), pending.color()) {
        Ok(glyph) => Ok(pending.with_glyph(glyph)),
        Err(error) => {
            warn!(%error, text = %pending.text(), "dropping comment");
            Err(error)
        }
    }
}

struct RawComment {
    text: String,
    color: Rgba,
    velocity_hint: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub rendered: u64,
    pub dropped: u64,
}

/// Single background thread that rasterizes comments for producers that
/// must not block, such as network callbacks. One thread keeps the global
/// submission order and bounds thread count under bursts.
pub struct GlyphWorker {
    sender: Option<mpsc::Sender<RawComment>>,
    worker: Option<JoinHandle<WorkerSummary>>,
}

impl GlyphWorker {
    pub fn spawn(glyphs: GlyphCache, queue: CommentSender) -> Result<Self, OverlayError> {
        let (sender, receiver) = mpsc::channel::<RawComment>();
        let worker = thread::Builder::new()
            .name("danmaku-glyph-worker".to_owned())
            .spawn(move || run_worker(glyphs, queue, receiver))
            .map_err(|error| OverlayError::WorkerUnavailable(error.to_string()))?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn submit(
        &self,
        text: &str,
        color: Rgba,
        velocity_hint: Option<f32>,
    ) -> Result<(), OverlayError> {
        if text.trim().is_empty() {
            return Err(OverlayError::EmptyComment);
        }
        let sender = self.sender.as_ref().ok_or(OverlayError::QueueClosed)?;
        sender
            .send(RawComment {
                text: text.to_owned(),
                color,
                velocity_hint,
            })
            .map_err(|_| OverlayError::QueueClosed)
    }

    /// Renders everything already submitted, then stops the thread.
    pub fn finish(mut self) -> Result<WorkerSummary, OverlayError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<WorkerSummary, OverlayError> {
        drop(self.sender.take());
        match self.worker.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| OverlayError::WorkerUnavailable("glyph worker panicked".to_owned())),
            None => Ok(WorkerSummary::default()),
        }
    }
}

impl Drop for GlyphWorker {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn run_worker(
    glyphs: GlyphCache,
    queue: CommentSender,
    receiver: mpsc::Receiver<RawComment>,
) -> WorkerSummary {
    let mut summary = WorkerSummary::default();
    for raw in receiver {
        let pending = match PendingComment::new(raw.text, raw.color) {
            Ok(pending) => pending.with_velocity(raw.velocity_hint),
            Err(_) => {
                summary.dropped += 1;
                continue;
            }
        };
        let pending = match prerender(&glyphs, pending) {
            Ok(pending) => pending,
            Err(_) => {
                summary.dropped += 1;
                continue;
            }
        };
        if queue.enqueue(pending).is_err() {
            // The render side is gone; nothing left to feed.
            break;
        }
        summary.rendered += 1;
    }
    summary
}
