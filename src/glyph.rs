use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use fontdue::layout::{CoordinateSystem, Layout, LayoutSettings, TextStyle};
use fontdue::{Font, FontSettings};
use tiny_skia::{Pixmap, PremultipliedColorU8};

use crate::comment::Rgba;
use crate::error::OverlayError;

/// Widest or tallest glyph buffer a single comment may allocate.
pub const MAX_GLYPH_EXTENT: u32 = 16_384;

/// Transparent margin kept around outlined text so the outline is not clipped.
const OUTLINE_PAD: u32 = 1;

const OUTLINE_OFFSETS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Rasterized comment text. Move-only: exactly one comment owns it and the
/// pixels are freed when that comment is dropped.
pub struct GlyphBuffer {
    pixmap: Pixmap,
}

impl GlyphBuffer {
    pub fn new(width: u32, height: u32) -> Result<Self, OverlayError> {
        let pixmap =
            Pixmap::new(width, height).ok_or(OverlayError::GlyphAllocation { width, height })?;
        Ok(Self { pixmap })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    /// Premultiplied RGBA of one pixel, or `None` outside the buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let color = self.pixmap.pixel(x, y)?;
        Some([color.red(), color.green(), color.blue(), color.alpha()])
    }

    /// Blends a `mask_width * mask_height` coverage mask with its top-left
    /// corner at `(ox, oy)`, clipping whatever falls outside the buffer.
    fn paint_mask(
        &mut self,
        mask: &[u8],
        mask_width: usize,
        mask_height: usize,
        color: Rgba,
        ox: i64,
        oy: i64,
    ) {
        let width = self.pixmap.width() as i64;
        let height = self.pixmap.height() as i64;
        let pixels = self.pixmap.pixels_mut();

        for row in 0..mask_height {
            let ty = row as i64 + oy;
            if ty < 0 || ty >= height {
                continue;
            }
            for col in 0..mask_width {
                let tx = col as i64 + ox;
                if tx < 0 || tx >= width {
                    continue;
                }
                let coverage = mask[row * mask_width + col];
                if coverage == 0 {
                    continue;
                }
                let alpha = ((u16::from(coverage) * u16::from(color.a)) / 255) as u8;
                let idx = (ty * width + tx) as usize;
                pixels[idx] = blend_over(pixels[idx], color, alpha);
            }
        }
    }
}

impl fmt::Debug for GlyphBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlyphBuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

fn blend_over(dst: PremultipliedColorU8, color: Rgba, alpha: u8) -> PremultipliedColorU8 {
    let alpha16 = u16::from(alpha);
    let inv_alpha = 255 - alpha16;
    let premul = |channel: u8| (u16::from(channel) * alpha16 + 127) / 255;
    let over = |src: u16, dst: u8| (src + (u16::from(dst) * inv_alpha + 127) / 255).min(255) as u8;

    let a = over(alpha16, dst.alpha());
    let r = over(premul(color.r), dst.red()).min(a);
    let g = over(premul(color.g), dst.green()).min(a);
    let b = over(premul(color.b), dst.blue()).min(a);
    PremultipliedColorU8::from_rgba(r, g, b, a).unwrap_or(dst)
}

/// Vertical font metrics in pixels; both values are positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineMetrics {
    pub ascent: f32,
    pub descent: f32,
}

impl LineMetrics {
    pub fn height(&self) -> f32 {
        self.ascent + self.descent
    }
}

/// Text measurement and coverage backend behind [`GlyphCache`].
pub trait TextRasterizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` when the font cannot provide metrics at the configured size.
    fn line_metrics(&self) -> Option<LineMetrics>;

    /// Horizontal advance of the whole string.
    fn measure(&self, text: &str) -> f32;

    /// Row-major 8-bit coverage mask of `width * height` with the line top at row 0.
    fn coverage(&self, text: &str, width: u32, height: u32) -> Vec<u8>;
}

pub struct FontdueRasterizer {
    font: Font,
    font_size: f32,
}

impl FontdueRasterizer {
    pub fn from_bytes(bytes: Vec<u8>, font_size: f32) -> Result<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|error| anyhow!("failed to parse font: {error}"))?;
        Ok(Self { font, font_size })
    }

    pub fn load(path: &Path, font_size: f32) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read font file '{}'", path.display()))?;
        Self::from_bytes(bytes, font_size)
            .with_context(|| format!("failed to load font '{}'", path.display()))
    }

    fn layout(&self, text: &str) -> Layout {
        let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
        layout.reset(&LayoutSettings {
            x: 0.0,
            y: 0.0,
            max_width: None,
            max_height: None,
            horizontal_align: fontdue::layout::HorizontalAlign::Left,
            vertical_align: fontdue::layout::VerticalAlign::Top,
            line_height: 1.0,
            wrap_style: fontdue::layout::WrapStyle::Letter,
            wrap_hard_breaks: false,
        });
        layout.append(&[&self.font], &TextStyle::new(text, self.font_size, 0));
        layout
    }
}

impl TextRasterizer for FontdueRasterizer {
    fn name(&self) -> &'static str {
        "fontdue"
    }

    fn line_metrics(&self) -> Option<LineMetrics> {
        let metrics = self.font.horizontal_line_metrics(self.font_size)?;
        Some(LineMetrics {
            ascent: metrics.ascent,
            descent: -metrics.descent,
        })
    }

    fn measure(&self, text: &str) -> f32 {
        let advance: f32 = text
            .chars()
            .map(|ch| self.font.metrics(ch, self.font_size).advance_width)
            .sum();
        let extent = self
            .layout(text)
            .glyphs()
            .iter()
            .map(|glyph| glyph.x + glyph.width as f32)
            .fold(0.0_f32, f32::max);
        advance.max(extent)
    }

    fn coverage(&self, text: &str, width: u32, height: u32) -> Vec<u8> {
        let (width, height) = (width as usize, height as usize);
        let mut mask = vec![0_u8; width * height];

        for glyph in self.layout(text).glyphs() {
            if glyph.width == 0 || glyph.height == 0 {
                continue;
            }
            let (_, bitmap) = self.font.rasterize_config(glyph.key);
            let origin_x = glyph.x.round() as i64;
            let origin_y = glyph.y.round() as i64;

            for row in 0..glyph.height {
                let py = origin_y + row as i64;
                if py < 0 || py >= height as i64 {
                    continue;
                }
                for col in 0..glyph.width {
                    let px = origin_x + col as i64;
                    if px < 0 || px >= width as i64 {
                        continue;
                    }
                    let idx = py as usize * width + px as usize;
                    mask[idx] = mask[idx].max(bitmap[row * glyph.width + col]);
                }
            }
        }
        mask
    }
}

/// Font-less rasterizer that draws every visible character as a solid cell.
/// Used for headless previews and wherever exact widths must be predictable.
pub struct MonospaceRasterizer {
    font_size: f32,
    cell_width: f32,
}

impl MonospaceRasterizer {
    pub fn new(font_size: f32) -> Self {
        Self::with_cell_width(font_size, font_size * 0.6)
    }

    pub fn with_cell_width(font_size: f32, cell_width: f32) -> Self {
        Self {
            font_size,
            cell_width,
        }
    }
}

impl TextRasterizer for MonospaceRasterizer {
    fn name(&self) -> &'static str {
        "monospace"
    }

    fn line_metrics(&self) -> Option<LineMetrics> {
        if !self.font_size.is_finite() || self.font_size <= 0.0 {
            return None;
        }
        Some(LineMetrics {
            ascent: self.font_size * 0.8,
            descent: self.font_size * 0.2,
        })
    }

    fn measure(&self, text: &str) -> f32 {
        text.chars().count() as f32 * self.cell_width
    }

    fn coverage(&self, text: &str, width: u32, height: u32) -> Vec<u8> {
        let mut mask = vec![0_u8; width as usize * height as usize];
        let top = (height as f32 * 0.15).round() as u32;
        let bottom = height.saturating_sub((height as f32 * 0.1).round() as u32);

        for (index, ch) in text.chars().enumerate() {
            if ch.is_whitespace() {
                continue;
            }
            let left = ((index as f32 * self.cell_width).round() as u32).saturating_add(1);
            let right = (((index + 1) as f32 * self.cell_width).round() as u32)
                .saturating_sub(1)
                .min(width);
            for y in top..bottom {
                for x in left..right {
                    mask[y as usize * width as usize + x as usize] = 255;
                }
            }
        }
        mask
    }
}

/// Renders each comment's text into its own [`GlyphBuffer`], exactly once.
///
/// Cheap to clone; clones share the rasterizer so producers can render
/// off the render thread.
#[derive(Clone)]
pub struct GlyphCache {
    rasterizer: Arc<dyn TextRasterizer>,
    outline: bool,
}

impl GlyphCache {
    pub fn new(rasterizer: Arc<dyn TextRasterizer>, outline: bool) -> Self {
        Self {
            rasterizer,
            outline,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.rasterizer.name()
    }

    pub fn line_metrics(&self) -> Result<LineMetrics, OverlayError> {
        let metrics = self
            .rasterizer
            .line_metrics()
            .ok_or_else(|| OverlayError::render_unavailable("font metrics are unavailable"))?;
        if !metrics.height().is_finite() || metrics.height() <= 0.0 {
            return Err(OverlayError::render_unavailable(format!(
                "font height must be positive, got {}",
                metrics.height()
            )));
        }
        Ok(metrics)
    }

    /// The buffer is the text advance by the font height, grown by one pixel
    /// on every side when the outline is on. Anything wider or taller than
    /// [`MAX_GLYPH_EXTENT`] fails with `GlyphAllocation` before allocating.
    pub fn render(&self, text: &str, color: Rgba) -> Result<GlyphBuffer, OverlayError> {
        let metrics = self.line_metrics()?;
        let text = single_line(text);
        let advance = self.rasterizer.measure(&text);
        if !advance.is_finite() {
            return Err(OverlayError::render_unavailable(format!(
                "text measured a non-finite width for '{}'",
                text
            )));
        }

        let text_width = (advance.ceil().max(0.0) as u32).max(1);
        let text_height = (metrics.height().ceil() as u32).max(1);
        let pad = if self.outline { OUTLINE_PAD } else { 0 };
        let width = text_width.saturating_add(2 * pad);
        let height = text_height.saturating_add(2 * pad);
        if width > MAX_GLYPH_EXTENT || height > MAX_GLYPH_EXTENT {
            return Err(OverlayError::GlyphAllocation { width, height });
        }

        let mut glyph = GlyphBuffer::new(width, height)?;
        let (mask_width, mask_height) = (text_width as usize, text_height as usize);
        let mask = self.rasterizer.coverage(&text, text_width, text_height);
        if mask.len() != mask_width * mask_height {
            return Err(OverlayError::render_unavailable(format!(
                "{} backend returned {} coverage bytes for a {}x{} mask",
                self.rasterizer.name(),
                mask.len(),
                text_width,
                text_height
            )));
        }

        let pad = i64::from(pad);
        if self.outline {
            let shadow = Rgba {
                a: color.a,
                ..Rgba::BLACK
            };
            for (dx, dy) in OUTLINE_OFFSETS {
                glyph.paint_mask(
                    &mask,
                    mask_width,
                    mask_height,
                    shadow,
                    pad + dx,
                    pad + dy,
                );
            }
        }
        glyph.paint_mask(&mask, mask_width, mask_height, color, pad, pad);
        Ok(glyph)
    }
}

fn single_line(text: &str) -> String {
    text.chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        FontdueRasterizer, GlyphCache, LineMetrics, MonospaceRasterizer, TextRasterizer,
        MAX_GLYPH_EXTENT,
    };
    use crate::comment::Rgba;
    use crate::error::OverlayError;

    fn cache(font_size: f32, cell_width: f32, outline: bool) -> GlyphCache {
        GlyphCache::new(
            Arc::new(MonospaceRasterizer::with_cell_width(font_size, cell_width)),
            outline,
        )
    }

    #[test]
    fn buffer_dimensions_follow_advance_and_font_height() {
        let glyphs = cache(40.0, 10.0, false);
        let glyph = glyphs.render("AAAAAAAAAA", Rgba::WHITE).unwrap();
        assert_eq!((glyph.width(), glyph.height()), (100, 40));

        let again = glyphs.render("AAAAAAAAAA", Rgba::opaque(255, 0, 0)).unwrap();
        assert_eq!((again.width(), again.height()), (100, 40));
    }

    #[test]
    fn tiny_fonts_are_floored_to_one_pixel() {
        let glyphs = cache(0.5, 0.1, false);
        let glyph = glyphs.render("x", Rgba::WHITE).unwrap();
        assert_eq!((glyph.width(), glyph.height()), (1, 1));
    }

    #[test]
    fn missing_metrics_report_render_unavailable() {
        let glyphs = cache(0.0, 10.0, false);
        let error = glyphs.render("hello", Rgba::WHITE).unwrap_err();
        assert_eq!(error.code(), "RENDER_UNAVAILABLE");
        assert!(matches!(error, OverlayError::RenderUnavailable { .. }));
    }

    #[test]
    fn text_pixels_take_comment_color() {
        let glyphs = cache(40.0, 10.0, false);
        let glyph = glyphs.render("A", Rgba::opaque(255, 0, 0)).unwrap();
        assert_eq!(glyph.pixel(5, 20), Some([255, 0, 0, 255]));
        assert_eq!(glyph.pixel(0, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn outline_darkens_pixels_next_to_text() {
        let glyphs = cache(40.0, 10.0, true);
        let glyph = glyphs.render("A", Rgba::WHITE).unwrap();
        assert_eq!((glyph.width(), glyph.height()), (12, 42));
        // Text is shifted by the 1px margin; the cell box starts at column 2.
        assert_eq!(glyph.pixel(0, 21), Some([0, 0, 0, 0]));
        assert_eq!(glyph.pixel(1, 21), Some([0, 0, 0, 255]));
        assert_eq!(glyph.pixel(6, 21), Some([255, 255, 255, 255]));
    }

    /// Covers every pixel of the mask, so any outline lands on the margin.
    struct SolidRasterizer;

    impl TextRasterizer for SolidRasterizer {
        fn name(&self) -> &'static str {
            "solid"
        }

        fn line_metrics(&self) -> Option<LineMetrics> {
            Some(LineMetrics {
                ascent: 8.0,
                descent: 2.0,
            })
        }

        fn measure(&self, text: &str) -> f32 {
            text.chars().count() as f32 * 5.0
        }

        fn coverage(&self, _text: &str, width: u32, height: u32) -> Vec<u8> {
            vec![255; width as usize * height as usize]
        }
    }

    #[test]
    fn outline_is_not_clipped_at_buffer_edges() {
        let glyphs = GlyphCache::new(Arc::new(SolidRasterizer), true);
        let glyph = glyphs.render("ab", Rgba::opaque(0, 0, 255)).unwrap();
        assert_eq!((glyph.width(), glyph.height()), (12, 12));
        for (x, y) in [(0, 0), (11, 0), (0, 11), (11, 11), (5, 0), (0, 5)] {
            assert_eq!(glyph.pixel(x, y), Some([0, 0, 0, 255]), "at {x},{y}");
        }
        assert_eq!(glyph.pixel(1, 1), Some([0, 0, 255, 255]));
        assert_eq!(glyph.pixel(10, 10), Some([0, 0, 255, 255]));
    }

    #[test]
    fn oversized_text_fails_without_allocating() {
        let glyphs = cache(40.0, 24.0, false);
        let error = glyphs
            .render(&"A".repeat(4_500_000), Rgba::WHITE)
            .unwrap_err();
        assert_eq!(
            error,
            OverlayError::GlyphAllocation {
                width: 108_000_000,
                height: 40
            }
        );

        let outlined = GlyphCache::new(Arc::new(MonospaceRasterizer::new(40.0)), true);
        let widest = "A".repeat((MAX_GLYPH_EXTENT as usize - 2) / 24);
        assert!(outlined.render(&widest, Rgba::WHITE).is_ok());
    }

    #[test]
    fn whitespace_counts_toward_width_but_draws_nothing() {
        let glyphs = cache(40.0, 10.0, false);
        let glyph = glyphs.render("A B", Rgba::WHITE).unwrap();
        assert_eq!(glyph.width(), 30);
        assert_eq!(glyph.pixel(15, 20), Some([0, 0, 0, 0]));
        assert_eq!(glyph.pixel(25, 20), Some([255, 255, 255, 255]));
    }

    #[test]
    fn fontdue_rejects_invalid_font_bytes() {
        assert!(FontdueRasterizer::from_bytes(vec![0_u8; 32], 40.0).is_err());
    }
}
