use std::fmt;

/// Per-comment and lifecycle failures raised by the overlay engine.
///
/// None of these are fatal to the host: a failing comment is dropped and the
/// render loop keeps running.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayError {
    EmptyComment,
    InvalidVelocity { velocity: f32 },
    RenderUnavailable { reason: String },
    GlyphAllocation { width: u32, height: u32 },
    QueueClosed,
    InvalidSurface { width: u32, height: u32 },
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    InvalidConfig(String),
    WorkerUnavailable(String),
}

impl OverlayError {
    pub fn render_unavailable(reason: impl Into<String>) -> Self {
        Self::RenderUnavailable {
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyComment => "EMPTY_COMMENT",
            Self::InvalidVelocity { .. } => "INVALID_VELOCITY",
            Self::RenderUnavailable { .. } => "RENDER_UNAVAILABLE",
            Self::GlyphAllocation { .. } => "GLYPH_ALLOCATION",
            Self::QueueClosed => "QUEUE_CLOSED",
            Self::InvalidSurface { .. } => "INVALID_SURFACE",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::WorkerUnavailable(_) => "WORKER_UNAVAILABLE",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::EmptyComment => "comment text is empty".to_owned(),
            Self::InvalidVelocity { velocity } => {
                format!("comment velocity must be finite and > 0, got {velocity}")
            }
            Self::RenderUnavailable { reason } => format!("glyph rendering unavailable: {reason}"),
            Self::GlyphAllocation { width, height } => {
                format!("failed to allocate {width}x{height} glyph buffer")
            }
            Self::QueueClosed => "comment queue consumer has shut down".to_owned(),
            Self::InvalidSurface { width, height } => {
                format!("surface must have a positive size, got {width}x{height}")
            }
            Self::InvalidState { operation, state } => {
                format!("cannot {operation} while render loop is {state}")
            }
            Self::InvalidConfig(reason) => format!("invalid overlay config: {reason}"),
            Self::WorkerUnavailable(reason) => format!("worker thread unavailable: {reason}"),
        }
    }
}

impl fmt::Display for OverlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for OverlayError {}
