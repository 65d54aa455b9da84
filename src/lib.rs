//! Danmaku comment overlay: lane allocation, scrolling animation and frame
//! compositing for comments flying across live video.

pub mod comment;
pub mod compositor;
pub mod config;
pub mod encoding;
pub mod error;
pub mod glyph;
pub mod ingest;
pub mod lanes;
pub mod preview;
pub mod queue;
pub mod render_loop;
pub mod script;
pub mod state;

pub use comment::{Comment, CommentId, PendingComment, Rgba};
pub use compositor::{Compositor, Frame, SoftwareCompositor};
pub use config::OverlayConfig;
pub use error::OverlayError;
pub use glyph::{GlyphBuffer, GlyphCache, TextRasterizer};
pub use ingest::{GlyphWorker, Ingest};
pub use lanes::LanePolicy;
pub use queue::{CommentQueue, CommentSender};
pub use render_loop::{LoopState, Output, Presented, Presenter, RenderLoop};
pub use state::{OverlayState, Placement};
