use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::compositor::{composite, Compositor, Frame, SoftwareCompositor};
use crate::config::OverlayConfig;
use crate::error::OverlayError;
use crate::glyph::GlyphCache;
use crate::ingest::Ingest;
use crate::queue::{CommentQueue, CommentSender};
use crate::state::{OverlayState, OverlayStats, Placement};

const DEFAULT_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

impl LoopState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameDecision {
    Render { elapsed_ms: f32 },
    /// Less than one interval has passed; show the previous frame again.
    Reuse,
}

/// Decides whether a wake-up composites a new frame or re-presents the last one.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    last: Option<Instant>,
}

impl FramePacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn advance(&mut self, now: Instant) -> FrameDecision {
        let Some(last) = self.last else {
            self.last = Some(now);
            return FrameDecision::Render { elapsed_ms: 0.0 };
        };
        let elapsed = now.saturating_duration_since(last);
        if elapsed < self.interval {
            return FrameDecision::Reuse;
        }
        self.last = Some(now);
        FrameDecision::Render {
            elapsed_ms: elapsed.as_secs_f32() * 1000.0,
        }
    }

    /// When the next composite is due.
    pub fn next_due(&self, now: Instant) -> Instant {
        self.last.map_or(now, |last| last + self.interval)
    }
}

/// What the host receives each tick.
pub enum Presented<'a> {
    Frame(&'a Frame),
    DrawList(&'a [Placement<'a>]),
}

/// Host side of presentation. Called on the render loop thread; the data is
/// only valid for the duration of the call.
pub trait Presenter: Send {
    fn present(&mut self, presented: Presented<'_>);
}

/// Presenter that keeps a copy of the most recent raster frame for a host
/// compositor to pick up on its own vsync.
#[derive(Clone, Default)]
pub struct SharedFrame {
    slot: Arc<Mutex<Option<Frame>>>,
}

impl SharedFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Frame> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

impl Presenter for SharedFrame {
    fn present(&mut self, presented: Presented<'_>) {
        if let Presented::Frame(frame) = presented {
            if let Ok(mut slot) = self.slot.lock() {
                *slot = Some(frame.clone());
            }
        }
    }
}

pub enum Output {
    Raster(Box<dyn Compositor>),
    DrawList,
}

impl Output {
    pub fn software() -> Result<Self, OverlayError> {
        Ok(Self::Raster(Box::new(SoftwareCompositor::new(1, 1)?)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames_rendered: u64,
    pub frames_reused: u64,
    pub stats: OverlayStats,
}

enum Control {
    Resize { width: u32, height: u32 },
    Stop,
}

/// Fixed-cadence driver scoped to a presentation surface.
///
/// `Idle` until the surface reports its size, `Running` on a dedicated
/// thread, `Stopped` after teardown has joined that thread and dropped every
/// glyph.
pub struct RenderLoop {
    config: OverlayConfig,
    glyphs: GlyphCache,
    state: LoopState,
    queue: Option<CommentQueue>,
    sender: CommentSender,
    sinks: Option<(Output, Box<dyn Presenter>)>,
    control: Option<mpsc::Sender<Control>>,
    worker: Option<JoinHandle<LoopSummary>>,
}

impl RenderLoop {
    pub fn new(
        config: OverlayConfig,
        glyphs: GlyphCache,
        output: Output,
        presenter: Box<dyn Presenter>,
    ) -> Result<Self, OverlayError> {
        config
            .validate()
            .map_err(|error| OverlayError::InvalidConfig(format!("{error:#}")))?;
        let queue = CommentQueue::new();
        let sender = queue.sender();
        Ok(Self {
            config,
            glyphs,
            state: LoopState::Idle,
            queue: Some(queue),
            sender,
            sinks: Some((output, presenter)),
            control: None,
            worker: None,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Producer handle that rasterizes on the submitting thread.
    pub fn ingest(&self) -> Ingest {
        Ingest::new(self.sender.clone()).with_glyphs(self.glyphs.clone())
    }

    pub fn sender(&self) -> CommentSender {
        self.sender.clone()
    }

    pub fn on_surface_ready(&mut self, width: u32, height: u32) -> Result<(), OverlayError> {
        if self.state != LoopState::Idle {
            return Err(self.invalid("start"));
        }
        if width == 0 || height == 0 {
            return Err(OverlayError::InvalidSurface { width, height });
        }
        self.glyphs.line_metrics()?;

        let (queue, (output, presenter)) = match (self.queue.take(), self.sinks.take()) {
            (Some(queue), Some(sinks)) => (queue, sinks),
            _ => return Err(self.invalid("start")),
        };
        let overlay = OverlayState::new(
            self.config.clone(),
            self.glyphs.clone(),
            queue,
            width,
            height,
        )?;

        let interval = Duration::try_from_secs_f32(self.config.frame_interval_ms / 1000.0)
            .unwrap_or(DEFAULT_INTERVAL);
        let (control, receiver) = mpsc::channel::<Control>();
        let worker = thread::Builder::new()
            .name("danmaku-render-loop".to_owned())
            .spawn(move || {
                let mut driver = LoopDriver {
                    overlay,
                    output,
                    presenter,
                    size: (width, height),
                    summary: LoopSummary::default(),
                };
                driver.run(receiver, interval)
            })
            .map_err(|error| OverlayError::WorkerUnavailable(error.to_string()))?;

        self.control = Some(control);
        self.worker = Some(worker);
        self.state = LoopState::Running;
        info!(
            width,
            height,
            interval_ms = self.config.frame_interval_ms,
            backend = self.glyphs.backend_name(),
            "render loop started"
        );
        Ok(())
    }

    pub fn on_surface_resized(&mut self, width: u32, height: u32) -> Result<(), OverlayError> {
        match self.state {
            LoopState::Idle => self.on_surface_ready(width, height),
            LoopState::Running => {
                if width == 0 || height == 0 {
                    return Err(OverlayError::InvalidSurface { width, height });
                }
                let control = self.control.as_ref().ok_or_else(|| self.invalid("resize"))?;
                control
                    .send(Control::Resize { width, height })
                    .map_err(|_| self.invalid("resize"))
            }
            LoopState::Stopped => Err(self.invalid("resize")),
        }
    }

    /// Stops scheduling, waits for the in-flight tick and releases all
    /// comment resources. Returns the loop summary if the loop had started.
    pub fn on_surface_destroyed(&mut self) -> Result<Option<LoopSummary>, OverlayError> {
        let previous = self.state;
        self.state = LoopState::Stopped;
        self.queue = None;
        self.sinks = None;

        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Stop);
        }
        let Some(worker) = self.worker.take() else {
            return Ok(None);
        };
        let summary = worker
            .join()
            .map_err(|_| OverlayError::WorkerUnavailable("render loop panicked".to_owned()))?;
        if previous == LoopState::Running {
            info!(
                frames_rendered = summary.frames_rendered,
                frames_reused = summary.frames_reused,
                admitted = summary.stats.admitted,
                "render loop stopped"
            );
        }
        Ok(Some(summary))
    }

    fn invalid(&self, operation: &'static str) -> OverlayError {
        OverlayError::InvalidState {
            operation,
            state: self.state.as_str(),
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        if self.state == LoopState::Running {
            let _ = self.on_surface_destroyed();
        }
    }
}

struct LoopDriver {
    overlay: OverlayState,
    output: Output,
    presenter: Box<dyn Presenter>,
    size: (u32, u32),
    summary: LoopSummary,
}

impl LoopDriver {
    fn run(&mut self, control: mpsc::Receiver<Control>, interval: Duration) -> LoopSummary {
        let mut pacer = FramePacer::new(interval);
        let mut dirty = true;

        loop {
            let timeout = pacer
                .next_due(Instant::now())
                .saturating_duration_since(Instant::now());
            match control.recv_timeout(timeout) {
                Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(Control::Resize { width, height }) => match self.overlay.resize(width, height) {
                    Ok(()) => {
                        self.size = (width, height);
                        dirty = true;
                    }
                    Err(error) => warn!(%error, "ignoring resize"),
                },
                Err(RecvTimeoutError::Timeout) => {}
            }

            match pacer.advance(Instant::now()) {
                FrameDecision::Render { elapsed_ms } => {
                    self.overlay.tick(elapsed_ms);
                    self.present(true);
                    self.summary.frames_rendered += 1;
                    dirty = false;
                }
                FrameDecision::Reuse => {
                    self.present(dirty);
                    self.summary.frames_reused += 1;
                    dirty = false;
                }
            }
        }

        self.summary.stats = self.overlay.stats();
        self.summary
    }

    fn present(&mut self, recomposite: bool) {
        let (width, height) = self.size;
        match &mut self.output {
            Output::Raster(compositor) => {
                if recomposite {
                    if let Err(error) =
                        composite(compositor.as_mut(), width, height, self.overlay.placements())
                    {
                        warn!(%error, "composite failed, skipping frame");
                        return;
                    }
                }
                self.presenter.present(Presented::Frame(compositor.frame()));
            }
            Output::DrawList => {
                let placements = self.overlay.placements().collect::<Vec<_>>();
                self.presenter.present(Presented::DrawList(&placements));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{FrameDecision, FramePacer, LoopState};

    #[test]
    fn pacer_renders_first_frame_immediately() {
        let mut pacer = FramePacer::new(Duration::from_millis(16));
        let start = Instant::now();
        assert_eq!(
            pacer.advance(start),
            FrameDecision::Render { elapsed_ms: 0.0 }
        );
        assert_eq!(pacer.next_due(start), start + Duration::from_millis(16));
    }

    #[test]
    fn pacer_reuses_frame_when_called_early() {
        let mut pacer = FramePacer::new(Duration::from_millis(16));
        let start = Instant::now();
        pacer.advance(start);
        assert_eq!(
            pacer.advance(start + Duration::from_millis(5)),
            FrameDecision::Reuse
        );
        match pacer.advance(start + Duration::from_millis(20)) {
            FrameDecision::Render { elapsed_ms } => assert!((elapsed_ms - 20.0).abs() < 0.01),
            FrameDecision::Reuse => panic!("expected a fresh frame"),
        }
        // Elapsed is measured from the last composite, not the last call.
        assert_eq!(
            pacer.advance(start + Duration::from_millis(30)),
            FrameDecision::Reuse
        );
    }

    #[test]
    fn state_names_are_stable() {
        assert_eq!(LoopState::Idle.as_str(), "idle");
        assert_eq!(LoopState::Running.as_str(), "running");
        assert_eq!(LoopState::Stopped.as_str(), "stopped");
    }
}
