use anyhow::{anyhow, bail, Result};

use crate::error::OverlayError;
use crate::glyph::GlyphBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Self = Self::opaque(255, 255, 255);
    pub const BLACK: Self = Self::opaque(0, 0, 0);

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Parses `#RRGGBB`, `#RRGGBBAA` or one of the classic danmaku color commands.
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim();
        if let Some(hex) = value.strip_prefix('#') {
            return parse_hex(hex).ok_or_else(|| anyhow!("invalid hex color '{}'", raw));
        }
        match value.to_ascii_lowercase().as_str() {
            "white" => Ok(Self::WHITE),
            "red" => Ok(Self::opaque(0xFF, 0x00, 0x00)),
            "pink" => Ok(Self::opaque(0xFF, 0x80, 0x80)),
            "orange" => Ok(Self::opaque(0xFF, 0xC0, 0x00)),
            "yellow" => Ok(Self::opaque(0xFF, 0xFF, 0x00)),
            "green" => Ok(Self::opaque(0x00, 0xFF, 0x00)),
            "cyan" => Ok(Self::opaque(0x00, 0xFF, 0xFF)),
            "blue" => Ok(Self::opaque(0x00, 0x00, 0xFF)),
            "purple" => Ok(Self::opaque(0xC0, 0x00, 0xFF)),
            "black" => Ok(Self::BLACK),
            _ => bail!("unknown color '{}'", raw),
        }
    }

    /// Picks the first color command in a space-separated command string
    /// (`"184 red big"`), ignoring everything that is not a color.
    pub fn from_commands(commands: &str) -> Option<Self> {
        commands
            .split_whitespace()
            .find_map(|command| Self::parse(command).ok())
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::WHITE
    }
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    let channel = |index: usize| u8::from_str_radix(hex.get(index..index + 2)?, 16).ok();
    match hex.len() {
        6 => Some(Rgba::opaque(channel(0)?, channel(2)?, channel(4)?)),
        8 => Some(Rgba {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a: channel(6)?,
        }),
        _ => None,
    }
}

/// Arrival sequence number assigned when the render thread admits a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommentId(pub u64);

/// A comment on its way from the ingest path to the render thread.
///
/// Immutable once enqueued. The glyph is present when the producer rendered it.
#[derive(Debug)]
pub struct PendingComment {
    text: String,
    color: Rgba,
    velocity_hint: Option<f32>,
    glyph: Option<GlyphBuffer>,
}

impl PendingComment {
    pub fn new(text: impl Into<String>, color: Rgba) -> Result<Self, OverlayError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(OverlayError::EmptyComment);
        }
        Ok(Self {
            text,
            color,
            velocity_hint: None,
            glyph: None,
        })
    }

    pub fn with_velocity(mut self, velocity_hint: Option<f32>) -> Self {
        self.velocity_hint = velocity_hint.filter(|velocity| velocity.is_finite() && *velocity > 0.0);
        self
    }

    pub fn with_glyph(mut self, glyph: GlyphBuffer) -> Self {
        self.glyph = Some(glyph);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn color(&self) -> Rgba {
        self.color
    }

    /// Always finite and positive when present.
    pub fn velocity_hint(&self) -> Option<f32> {
        self.velocity_hint
    }

    pub fn glyph(&self) -> Option<&GlyphBuffer> {
        self.glyph.as_ref()
    }

    pub(crate) fn into_parts(self) -> (String, Rgba, Option<f32>, Option<GlyphBuffer>) {
        (self.text, self.color, self.velocity_hint, self.glyph)
    }

    /// Skips every check, for exercising the render thread's own validation.
    #[cfg(test)]
    pub(crate) fn unchecked(text: &str, velocity_hint: Option<f32>) -> Self {
        Self {
            text: text.to_owned(),
            color: Rgba::WHITE,
            velocity_hint,
            glyph: None,
        }
    }
}

/// A live, lane-assigned comment. Owned by the render thread.
#[derive(Debug)]
pub struct Comment {
    id: CommentId,
    text: String,
    color: Rgba,
    glyph: GlyphBuffer,
    glyph_width: f32,
    glyph_height: f32,
    x: f32,
    y: f32,
    velocity: f32,
    lane: usize,
}

impl Comment {
    pub(crate) fn spawn(
        id: CommentId,
        text: String,
        color: Rgba,
        glyph: GlyphBuffer,
        x: f32,
        y: f32,
        velocity: f32,
        lane: usize,
    ) -> Self {
        let glyph_width = glyph.width() as f32;
        let glyph_height = glyph.height() as f32;
        Self {
            id,
            text,
            color,
            glyph,
            glyph_width,
            glyph_height,
            x,
            y,
            velocity,
            lane,
        }
    }

    pub fn id(&self) -> CommentId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn color(&self) -> Rgba {
        self.color
    }

    pub fn glyph(&self) -> &GlyphBuffer {
        &self.glyph
    }

    pub fn glyph_width(&self) -> f32 {
        self.glyph_width
    }

    pub fn glyph_height(&self) -> f32 {
        self.glyph_height
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn lane(&self) -> usize {
        self.lane
    }

    /// Right edge of the glyph in surface coordinates.
    pub fn trailing_edge(&self) -> f32 {
        self.x + self.glyph_width
    }

    pub(crate) fn advance(&mut self, ticks: f32) {
        self.x -= self.velocity * ticks;
    }

    pub(crate) fn is_offscreen(&self) -> bool {
        self.x < -self.glyph_width
    }
}

#[cfg(test)]
mod tests {
    use super::{PendingComment, Rgba};
    use crate::error::OverlayError;

    #[test]
    fn parses_hex_and_named_colors() {
        assert_eq!(Rgba::parse("#4FE1B8").unwrap(), Rgba::opaque(0x4F, 0xE1, 0xB8));
        assert_eq!(Rgba::parse("#00000080").unwrap().a, 0x80);
        assert_eq!(Rgba::parse("Yellow").unwrap(), Rgba::opaque(255, 255, 0));
        assert!(Rgba::parse("#12345").is_err());
        assert!(Rgba::parse("chartreuse").is_err());
    }

    #[test]
    fn color_commands_pick_first_color() {
        assert_eq!(
            Rgba::from_commands("184 big red"),
            Some(Rgba::opaque(255, 0, 0))
        );
        assert_eq!(Rgba::from_commands("184 ue small"), None);
    }

    #[test]
    fn blank_text_is_rejected_before_queueing() {
        let error = PendingComment::new("   ", Rgba::WHITE).unwrap_err();
        assert_eq!(error, OverlayError::EmptyComment);
    }

    #[test]
    fn non_positive_velocity_hint_is_ignored() {
        let pending = PendingComment::new("ok", Rgba::WHITE)
            .unwrap()
            .with_velocity(Some(-3.0));
        assert_eq!(pending.velocity_hint(), None);
    }
}
