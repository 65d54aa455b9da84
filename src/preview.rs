use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::compositor::{composite, Compositor, SoftwareCompositor};
use crate::config::OverlayConfig;
use crate::encoding::FfmpegPipe;
use crate::glyph::{FontdueRasterizer, GlyphCache, MonospaceRasterizer, TextRasterizer};
use crate::ingest::Ingest;
use crate::queue::CommentQueue;
use crate::script::ScriptComment;
use crate::state::OverlayState;

const MIN_SIZE: u32 = 16;
const MAX_SIZE: u32 = 7680;
/// Tail kept after the last comment's nominal crossing.
const TAIL_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct PreviewOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// `None` runs until the last comment has had time to cross.
    pub duration_ms: Option<u64>,
    pub frames_dir: Option<PathBuf>,
    /// Save every Nth frame to `frames_dir`.
    pub every: u32,
    pub video: Option<PathBuf>,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
            duration_ms: None,
            frames_dir: None,
            every: 1,
            video: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewSummary {
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub comments_submitted: usize,
    pub comments_dropped: u64,
    pub peak_live: usize,
    pub evicted: u64,
    pub saturated: u64,
    pub frames_written: u64,
    /// sha256 of the last frame's straight RGBA bytes.
    pub frame_hash: String,
}

/// Builds the glyph cache for a preview run: the given font through fontdue,
/// or the font-less monospace rasterizer.
pub fn build_glyphs(config: &OverlayConfig, font: Option<&Path>) -> Result<GlyphCache> {
    let rasterizer: Arc<dyn TextRasterizer> = match font {
        Some(path) => Arc::new(FontdueRasterizer::load(path, config.font_size)?),
        None => Arc::new(MonospaceRasterizer::new(config.font_size)),
    };
    Ok(GlyphCache::new(rasterizer, config.outline))
}

/// Replays `script` through the overlay on a simulated clock, one tick per
/// output frame.
pub fn run_preview(
    config: &OverlayConfig,
    glyphs: GlyphCache,
    script: &[ScriptComment],
    options: &PreviewOptions,
) -> Result<PreviewSummary> {
    config.validate()?;
    if options.fps == 0 {
        bail!("fps must be > 0");
    }
    if options.every == 0 {
        bail!("--every must be >= 1");
    }

    let mut overlay = OverlayState::new(
        config.clone(),
        glyphs.clone(),
        CommentQueue::new(),
        options.width,
        options.height,
    )?;
    let ingest = Ingest::new(overlay.sender()).with_glyphs(glyphs);
    let mut compositor = SoftwareCompositor::new(options.width, options.height)?;

    if let Some(dir) = &options.frames_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create frames dir {}", dir.display()))?;
    }
    let ffmpeg = match &options.video {
        Some(path) => Some(
            FfmpegPipe::spawn(options.width, options.height, options.fps, path)
                .with_context(|| format!("failed to initialize ffmpeg pipe for {}", path.display()))?,
        ),
        None => None,
    };

    let duration_ms = options
        .duration_ms
        .unwrap_or_else(|| default_duration_ms(config, script));
    let fps = u64::from(options.fps);
    let frame_count = (duration_ms.saturating_mul(fps).div_ceil(1000)).max(1);
    let frame_ms = 1000.0 / options.fps as f32;

    let mut pending = script.iter().peekable();
    let mut submit_failures = 0_u64;
    let mut frames_written = 0_u64;
    let mut last_hash = String::new();

    for frame_index in 0..frame_count {
        let now_ms = frame_index.saturating_mul(1000) / fps;
        while let Some(comment) = pending.next_if(|comment| comment.at_ms <= now_ms) {
            if ingest
                .submit(&comment.text, comment.color, comment.velocity)
                .is_err()
            {
                submit_failures += 1;
            }
        }

        let elapsed_ms = if frame_index == 0 { 0.0 } else { frame_ms };
        overlay.tick(elapsed_ms);
        composite(
            &mut compositor,
            options.width,
            options.height,
            overlay.placements(),
        )?;

        let frame = compositor.frame();
        if let Some(dir) = &options.frames_dir {
            if frame_index % u64::from(options.every) == 0 {
                let path = dir.join(format!("frame_{:05}.png", frame_index));
                let image = frame
                    .to_image()
                    .ok_or_else(|| anyhow!("frame buffer size mismatch"))?;
                image
                    .save(&path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                frames_written += 1;
            }
        }

        let rgba = frame.to_straight_rgba();
        if frame_index + 1 == frame_count {
            last_hash = sha256_hex(&rgba);
        }
        if let Some(ffmpeg) = &ffmpeg {
            ffmpeg.write_frame(rgba)?;
        }

        if frame_index % fps == 0 {
            debug!(
                frame = frame_index + 1,
                total = frame_count,
                live = overlay.len(),
                "rendered frame"
            );
        }
    }

    if let Some(ffmpeg) = ffmpeg {
        ffmpeg.finish()?;
    }

    let stats = overlay.stats();
    let summary = PreviewSummary {
        frame_count,
        width: options.width,
        height: options.height,
        fps: options.fps,
        comments_submitted: script.len(),
        comments_dropped: submit_failures + stats.dropped,
        peak_live: stats.peak_live,
        evicted: stats.evicted,
        saturated: stats.saturated,
        frames_written,
        frame_hash: last_hash,
    };
    info!(
        frames = summary.frame_count,
        submitted = summary.comments_submitted,
        dropped = summary.comments_dropped,
        "preview finished"
    );
    Ok(summary)
}

fn default_duration_ms(config: &OverlayConfig, script: &[ScriptComment]) -> u64 {
    let last_at = script.last().map_or(0, |comment| comment.at_ms);
    let crossing_ms = (config.crossing_seconds * 1000.0).ceil() as u64;
    last_at + crossing_ms + TAIL_MS
}

pub fn parse_size(raw: &str) -> Result<(u32, u32)> {
    let value = raw.trim();
    let (width_raw, height_raw) = value
        .split_once('x')
        .or_else(|| value.split_once('X'))
        .ok_or_else(|| anyhow!("invalid --size '{}': expected WIDTHxHEIGHT", raw))?;
    let width = width_raw
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid --size '{}': width must be an integer", raw))?;
    let height = height_raw
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid --size '{}': height must be an integer", raw))?;
    if width < MIN_SIZE || height < MIN_SIZE || width > MAX_SIZE || height > MAX_SIZE {
        bail!(
            "invalid --size '{}': supported range is {}x{} to {}x{}",
            raw,
            MIN_SIZE,
            MIN_SIZE,
            MAX_SIZE,
            MAX_SIZE
        );
    }
    Ok((width, height))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
