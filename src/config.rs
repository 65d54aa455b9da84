use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::lanes::LanePolicy;

pub const DEFAULT_MAX_COMMENTS: usize = 300;

/// Construction-time settings for the overlay. Nothing here is hot-reloaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OverlayConfig {
    pub font_size: f32,
    /// Vertical gap between lanes, added to the font height.
    pub lane_spacing: f32,
    pub top_padding: f32,
    /// Minimum horizontal gap kept behind the previous comment in a lane.
    pub comment_spacing: f32,
    /// Seconds for a comment to travel from the right edge to fully off the left edge.
    pub crossing_seconds: f32,
    pub frame_interval_ms: f32,
    pub max_comments: usize,
    pub lane_policy: LanePolicy,
    /// Fixed pixels-per-tick velocity. `None` derives velocity from `crossing_seconds`.
    pub default_velocity: Option<f32>,
    pub outline: bool,
    pub seed: u64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            font_size: 40.0,
            lane_spacing: 20.0,
            top_padding: 10.0,
            comment_spacing: 20.0,
            crossing_seconds: 4.0,
            frame_interval_ms: 16.0,
            max_comments: DEFAULT_MAX_COMMENTS,
            lane_policy: LanePolicy::Projected,
            default_velocity: None,
            outline: true,
            seed: 0,
        }
    }
}

impl OverlayConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.font_size.is_finite() || self.font_size <= 0.0 {
            bail!("font_size must be > 0, got {}", self.font_size);
        }
        for (name, value) in [
            ("lane_spacing", self.lane_spacing),
            ("top_padding", self.top_padding),
            ("comment_spacing", self.comment_spacing),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{name} must be >= 0, got {value}");
            }
        }
        if !self.crossing_seconds.is_finite() || self.crossing_seconds <= 0.0 {
            bail!("crossing_seconds must be > 0, got {}", self.crossing_seconds);
        }
        if !self.frame_interval_ms.is_finite() || self.frame_interval_ms <= 0.0 {
            bail!(
                "frame_interval_ms must be > 0, got {}",
                self.frame_interval_ms
            );
        }
        if self.max_comments == 0 {
            bail!("max_comments must be >= 1");
        }
        if let Some(velocity) = self.default_velocity {
            if !velocity.is_finite() || velocity <= 0.0 {
                bail!("default_velocity must be > 0, got {velocity}");
            }
        }
        Ok(())
    }

    pub fn target_fps(&self) -> f32 {
        1000.0 / self.frame_interval_ms
    }

    /// Nominal crossing duration expressed in render ticks.
    pub fn crossing_ticks(&self) -> f32 {
        self.crossing_seconds * self.target_fps()
    }
}

pub fn load_config(path: &Path) -> Result<OverlayConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read overlay config {}", path.display()))?;
    let config = parse_config(&contents)
        .with_context(|| format!("invalid overlay config {}", path.display()))?;
    Ok(config)
}

pub fn parse_config(contents: &str) -> Result<OverlayConfig> {
    // serde_yaml rejects an empty document, but an empty file means "all defaults".
    if contents.trim().is_empty() {
        return Ok(OverlayConfig::default());
    }
    let config: OverlayConfig = serde_yaml::from_str(contents).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        anyhow!("failed to parse yaml at {}: {}", location, error)
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::{parse_config, OverlayConfig};
    use crate::lanes::LanePolicy;

    #[test]
    fn empty_document_yields_defaults() {
        let config = parse_config("  \n").expect("empty config should parse");
        assert_eq!(config.max_comments, 300);
        assert_eq!(config.lane_policy, LanePolicy::Projected);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = parse_config(
            r#"
font_size: 32
lane_policy: greedy
default_velocity: 8.0
"#,
        )
        .expect("config should parse");
        assert_eq!(config.font_size, 32.0);
        assert_eq!(config.lane_policy, LanePolicy::Greedy);
        assert_eq!(config.default_velocity, Some(8.0));
        assert_eq!(config.lane_spacing, 20.0);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = parse_config("font_sise: 32\n").expect_err("typo should be rejected");
        assert!(error.to_string().contains("failed to parse yaml"));
    }

    #[test]
    fn validation_rejects_zero_cap_and_interval() {
        let mut config = OverlayConfig::default();
        config.max_comments = 0;
        assert!(config.validate().is_err());

        let mut config = OverlayConfig::default();
        config.frame_interval_ms = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn crossing_ticks_follow_frame_interval() {
        let mut config = OverlayConfig::default();
        config.crossing_seconds = 4.0;
        config.frame_interval_ms = 16.0;
        assert!((config.crossing_ticks() - 250.0).abs() < 1e-3);
    }
}
