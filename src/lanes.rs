use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::comment::{Comment, CommentId};
use crate::config::OverlayConfig;
use crate::glyph::LineMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanePolicy {
    /// First lane whose newest comment has left a trailing gap at the right edge.
    Greedy,
    /// First lane where no existing comment is predicted to be caught within the
    /// crossing horizon, given both comments' velocities.
    Projected,
}

impl Default for LanePolicy {
    fn default() -> Self {
        Self::Projected
    }
}

/// Lane layout for one surface size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneGeometry {
    pub surface_width: f32,
    pub surface_height: f32,
    pub lane_height: f32,
    pub lane_count: usize,
    pub top_padding: f32,
}

impl LaneGeometry {
    pub fn compute(metrics: LineMetrics, config: &OverlayConfig, width: u32, height: u32) -> Self {
        let lane_height = metrics.height() + config.lane_spacing;
        let lane_count = ((height as f32 / lane_height).floor() as usize).max(1);
        Self {
            surface_width: width as f32,
            surface_height: height as f32,
            lane_height,
            lane_count,
            top_padding: config.top_padding,
        }
    }

    pub fn lane_y(&self, lane: usize) -> f32 {
        self.top_padding + lane as f32 * self.lane_height
    }
}

/// Comments sharing one row, oldest first. The back is the newest and
/// rightmost comment.
#[derive(Debug, Default)]
pub struct Lane {
    comments: VecDeque<Comment>,
}

impl Lane {
    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.comments.len()
    }

    pub fn newest(&self) -> Option<&Comment> {
        self.comments.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Comment> {
        self.comments.iter()
    }

    pub(crate) fn push(&mut self, comment: Comment) {
        self.comments.push_back(comment);
    }

    pub(crate) fn remove(&mut self, id: CommentId) -> Option<Comment> {
        let index = self.comments.iter().position(|comment| comment.id() == id)?;
        self.comments.remove(index)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Comment> {
        self.comments.iter_mut()
    }

    pub(crate) fn retain<F>(&mut self, keep: F)
    where
        F: FnMut(&Comment) -> bool,
    {
        self.comments.retain(keep);
    }
}

/// Size and speed of a comment about to spawn at the right edge.
#[derive(Debug, Clone, Copy)]
pub struct Incoming {
    pub width: f32,
    pub velocity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub lane: usize,
    /// No lane was free; the lane was picked at random and may overlap.
    pub saturated: bool,
}

pub struct LaneAllocator {
    policy: LanePolicy,
    spacing: f32,
    horizon_ticks: f32,
    rng: StdRng,
}

impl LaneAllocator {
    pub fn new(policy: LanePolicy, spacing: f32, horizon_ticks: f32, seed: u64) -> Self {
        Self {
            policy,
            spacing,
            horizon_ticks,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_config(config: &OverlayConfig) -> Self {
        Self::new(
            config.lane_policy,
            config.comment_spacing,
            config.crossing_ticks(),
            config.seed,
        )
    }

    pub fn policy(&self) -> LanePolicy {
        self.policy
    }

    /// Picks the lowest-index free lane in `lanes`, falling back to a uniformly
    /// random lane when every lane is occupied.
    pub fn assign(&mut self, incoming: Incoming, lanes: &[Lane], surface_width: f32) -> Assignment {
        if let Some(lane) = lanes
            .iter()
            .position(|lane| self.is_candidate(lane, incoming, surface_width))
        {
            return Assignment {
                lane,
                saturated: false,
            };
        }

        let lane = if lanes.len() > 1 {
            self.rng.gen_range(0..lanes.len())
        } else {
            0
        };
        Assignment {
            lane,
            saturated: true,
        }
    }

    pub fn is_candidate(&self, lane: &Lane, incoming: Incoming, surface_width: f32) -> bool {
        match self.policy {
            LanePolicy::Greedy => match lane.newest() {
                Some(tail) => tail.trailing_edge() + self.spacing < surface_width,
                None => true,
            },
            LanePolicy::Projected => lane
                .iter()
                .all(|existing| self.stays_behind(existing, incoming, surface_width)),
        }
    }

    /// True when a comment spawned at `surface_width` never reaches `existing`'s
    /// trailing edge (plus spacing) while `existing` is still on screen, within
    /// the horizon. The gap is linear in time, so checking both ends suffices.
    fn stays_behind(&self, existing: &Comment, incoming: Incoming, surface_width: f32) -> bool {
        let gap_at = |ticks: f32| {
            let leading = surface_width - incoming.velocity * ticks;
            let trailing = existing.trailing_edge() + self.spacing - existing.velocity() * ticks;
            leading - trailing
        };

        let until_gone = if existing.velocity() > 0.0 {
            (existing.trailing_edge() / existing.velocity()).max(0.0)
        } else {
            self.horizon_ticks
        };
        let end = self.horizon_ticks.min(until_gone);

        gap_at(0.0) >= 0.0 && gap_at(end) >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::{Incoming, Lane, LaneAllocator, LaneGeometry, LanePolicy};
    use crate::comment::{Comment, CommentId, Rgba};
    use crate::config::OverlayConfig;
    use crate::glyph::{GlyphBuffer, LineMetrics};

    fn comment(id: u64, x: f32, width: u32, velocity: f32) -> Comment {
        let glyph = GlyphBuffer::new(width, 40).unwrap();
        Comment::spawn(
            CommentId(id),
            format!("c{id}"),
            Rgba::WHITE,
            glyph,
            x,
            0.0,
            velocity,
            0,
        )
    }

    fn lane_with(comments: Vec<Comment>) -> Lane {
        let mut lane = Lane::default();
        for comment in comments {
            lane.push(comment);
        }
        lane
    }

    #[test]
    fn geometry_counts_whole_lanes_and_never_zero() {
        let metrics = LineMetrics {
            ascent: 32.0,
            descent: 8.0,
        };
        let config = OverlayConfig::default();
        let geometry = LaneGeometry::compute(metrics, &config, 1000, 180);
        assert_eq!(geometry.lane_height, 60.0);
        assert_eq!(geometry.lane_count, 3);
        assert_eq!(geometry.lane_y(2), 130.0);

        let tiny = LaneGeometry::compute(metrics, &config, 1000, 10);
        assert_eq!(tiny.lane_count, 1);
    }

    #[test]
    fn greedy_requires_trailing_gap_at_right_edge() {
        let allocator = LaneAllocator::new(LanePolicy::Greedy, 20.0, 250.0, 0);
        let incoming = Incoming {
            width: 50.0,
            velocity: 5.0,
        };
        let just_spawned = lane_with(vec![comment(1, 1000.0, 100, 5.0)]);
        assert!(!allocator.is_candidate(&just_spawned, incoming, 1000.0));

        let clear = lane_with(vec![comment(1, 870.0, 100, 5.0)]);
        assert!(allocator.is_candidate(&clear, incoming, 1000.0));
        assert!(allocator.is_candidate(&Lane::default(), incoming, 1000.0));
    }

    #[test]
    fn projected_rejects_faster_comment_that_would_catch_up() {
        let allocator = LaneAllocator::new(LanePolicy::Projected, 20.0, 250.0, 0);
        // Slow comment that has already made room at the right edge.
        let lane = lane_with(vec![comment(1, 700.0, 100, 2.0)]);

        let same_speed = Incoming {
            width: 100.0,
            velocity: 2.0,
        };
        assert!(allocator.is_candidate(&lane, same_speed, 1000.0));

        let fast = Incoming {
            width: 100.0,
            velocity: 8.0,
        };
        assert!(!allocator.is_candidate(&lane, fast, 1000.0));

        let greedy = LaneAllocator::new(LanePolicy::Greedy, 20.0, 250.0, 0);
        assert!(greedy.is_candidate(&lane, fast, 1000.0));
    }

    #[test]
    fn projected_ignores_catch_up_after_existing_comment_leaves() {
        let allocator = LaneAllocator::new(LanePolicy::Projected, 0.0, 1000.0, 0);
        // Exits after 10 ticks; the faster newcomer cannot reach it before then.
        let lane = lane_with(vec![comment(1, -50.0, 100, 5.0)]);
        let fast = Incoming {
            width: 100.0,
            velocity: 20.0,
        };
        assert!(allocator.is_candidate(&lane, fast, 1000.0));
    }

    #[test]
    fn lowest_free_lane_wins() {
        let mut allocator = LaneAllocator::new(LanePolicy::Projected, 20.0, 250.0, 0);
        let lanes = vec![
            lane_with(vec![comment(1, 1000.0, 100, 5.0)]),
            Lane::default(),
            Lane::default(),
        ];
        let assignment = allocator.assign(
            Incoming {
                width: 50.0,
                velocity: 5.0,
            },
            &lanes,
            1000.0,
        );
        assert_eq!(assignment.lane, 1);
        assert!(!assignment.saturated);
    }

    #[test]
    fn saturated_fallback_stays_in_range_and_is_seeded() {
        let lanes = (0..4)
            .map(|lane| lane_with(vec![comment(lane, 1000.0, 100, 5.0)]))
            .collect::<Vec<_>>();
        let incoming = Incoming {
            width: 50.0,
            velocity: 5.0,
        };

        let mut first = LaneAllocator::new(LanePolicy::Projected, 20.0, 250.0, 7);
        let mut second = LaneAllocator::new(LanePolicy::Projected, 20.0, 250.0, 7);
        for _ in 0..32 {
            let a = first.assign(incoming, &lanes, 1000.0);
            let b = second.assign(incoming, &lanes, 1000.0);
            assert!(a.saturated);
            assert!(a.lane < 4);
            assert_eq!(a, b);
        }
    }
}
