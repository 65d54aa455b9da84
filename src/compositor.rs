use image::RgbaImage;
use tiny_skia::{Color, Pixmap, PixmapPaint, Transform};

use crate::error::OverlayError;
use crate::state::Placement;

/// Composited overlay frame: premultiplied RGBA, transparent where no
/// comment is drawn.
#[derive(Clone)]
pub struct Frame {
    pixmap: Pixmap,
}

impl Frame {
    pub fn new(width: u32, height: u32) -> Result<Self, OverlayError> {
        let pixmap =
            Pixmap::new(width, height).ok_or(OverlayError::InvalidSurface { width, height })?;
        Ok(Self { pixmap })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Raw premultiplied RGBA bytes, row-major.
    pub fn data(&self) -> &[u8] {
        self.pixmap.data()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let color = self.pixmap.pixel(x, y)?;
        Some([color.red(), color.green(), color.blue(), color.alpha()])
    }

    pub fn clear(&mut self) {
        self.pixmap.fill(Color::TRANSPARENT);
    }

    /// Straight-alpha RGBA bytes, the layout encoders and image files expect.
    pub fn to_straight_rgba(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixmap.data().len());
        for pixel in self.pixmap.pixels() {
            let color = pixel.demultiply();
            out.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
        }
        out
    }

    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width(), self.height(), self.to_straight_rgba())
    }
}

/// Backend that turns placements into a frame buffer. The software raster
/// backend is the default; GPU backends implement the same contract.
pub trait Compositor: Send {
    fn name(&self) -> &'static str;

    /// Prepares a cleared frame of the given size.
    fn begin(&mut self, width: u32, height: u32) -> Result<(), OverlayError>;

    fn draw(&mut self, placement: &Placement<'_>);

    fn frame(&self) -> &Frame;
}

pub struct SoftwareCompositor {
    frame: Frame,
}

impl SoftwareCompositor {
    pub fn new(width: u32, height: u32) -> Result<Self, OverlayError> {
        Ok(Self {
            frame: Frame::new(width, height)?,
        })
    }
}

impl Compositor for SoftwareCompositor {
    fn name(&self) -> &'static str {
        "software"
    }

    fn begin(&mut self, width: u32, height: u32) -> Result<(), OverlayError> {
        if self.frame.width() != width || self.frame.height() != height {
            self.frame = Frame::new(width, height)?;
        } else {
            self.frame.clear();
        }
        Ok(())
    }

    fn draw(&mut self, placement: &Placement<'_>) {
        // Fully off-surface glyphs are skipped; tiny-skia clips the rest.
        let right = placement.x + placement.glyph.width() as f32;
        let bottom = placement.y + placement.glyph.height() as f32;
        if right <= 0.0
            || bottom <= 0.0
            || placement.x >= self.frame.width() as f32
            || placement.y >= self.frame.height() as f32
        {
            return;
        }
        self.frame.pixmap.draw_pixmap(
            placement.x.round() as i32,
            placement.y.round() as i32,
            placement.glyph.pixmap().as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }

    fn frame(&self) -> &Frame {
        &self.frame
    }
}

/// Clears the compositor and draws every placement in order.
pub fn composite<'a, I>(
    compositor: &mut dyn Compositor,
    width: u32,
    height: u32,
    placements: I,
) -> Result<(), OverlayError>
where
    I: IntoIterator<Item = Placement<'a>>,
{
    compositor.begin(width, height)?;
    for placement in placements {
        compositor.draw(&placement);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{composite, Compositor, SoftwareCompositor};
    use crate::comment::{CommentId, Rgba};
    use crate::glyph::{GlyphCache, MonospaceRasterizer};
    use crate::state::Placement;

    #[test]
    fn draws_glyph_at_position_and_clears_between_frames() {
        let glyphs = GlyphCache::new(
            Arc::new(MonospaceRasterizer::with_cell_width(40.0, 10.0)),
            false,
        );
        let glyph = glyphs.render("A", Rgba::opaque(0, 255, 0)).unwrap();
        let mut compositor = SoftwareCompositor::new(200, 100).unwrap();

        let placement = Placement {
            id: CommentId(0),
            glyph: &glyph,
            x: 50.0,
            y: 10.0,
        };
        composite(&mut compositor, 200, 100, [placement]).unwrap();
        assert_eq!(compositor.frame().pixel(55, 30), Some([0, 255, 0, 255]));
        assert_eq!(compositor.frame().pixel(5, 30), Some([0, 0, 0, 0]));

        composite(&mut compositor, 200, 100, std::iter::empty()).unwrap();
        assert_eq!(compositor.frame().pixel(55, 30), Some([0, 0, 0, 0]));
    }

    #[test]
    fn partially_visible_glyphs_are_clipped_not_skipped() {
        let glyphs = GlyphCache::new(
            Arc::new(MonospaceRasterizer::with_cell_width(40.0, 10.0)),
            false,
        );
        let glyph = glyphs.render("AAAA", Rgba::WHITE).unwrap();
        let mut compositor = SoftwareCompositor::new(100, 60).unwrap();
        let placement = Placement {
            id: CommentId(0),
            glyph: &glyph,
            x: -25.0,
            y: 0.0,
        };
        composite(&mut compositor, 100, 60, [placement]).unwrap();
        // Fourth cell spans x = 6..14 after the shift.
        assert_eq!(compositor.frame().pixel(8, 20), Some([255, 255, 255, 255]));
    }

    #[test]
    fn resize_reallocates_frame() {
        let mut compositor = SoftwareCompositor::new(100, 60).unwrap();
        compositor.begin(320, 180).unwrap();
        assert_eq!(
            (compositor.frame().width(), compositor.frame().height()),
            (320, 180)
        );
        let image = compositor.frame().to_image().unwrap();
        assert_eq!(image.dimensions(), (320, 180));
    }
}
