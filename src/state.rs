use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use crate::comment::{Comment, CommentId, PendingComment};
use crate::config::OverlayConfig;
use crate::error::OverlayError;
use crate::glyph::{GlyphBuffer, GlyphCache, LineMetrics};
use crate::lanes::{Incoming, Lane, LaneAllocator, LaneGeometry};
use crate::queue::{CommentQueue, CommentSender};

/// Counters accumulated over the lifetime of one overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct OverlayStats {
    pub admitted: u64,
    pub dropped: u64,
    pub evicted: u64,
    pub expired: u64,
    pub saturated: u64,
    pub peak_live: usize,
}

/// What one call to [`OverlayState::tick`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub admitted: usize,
    pub dropped: usize,
    pub evicted: usize,
    pub expired: usize,
}

/// One glyph to draw, in lane then arrival order.
#[derive(Debug, Clone, Copy)]
pub struct Placement<'a> {
    pub id: CommentId,
    pub glyph: &'a GlyphBuffer,
    pub x: f32,
    pub y: f32,
}

/// Every live comment, owned by the render thread.
///
/// Comments live in their lane; `arrival` is the flat arrival-ordered index
/// used for cap eviction.
pub struct OverlayState {
    config: OverlayConfig,
    glyphs: GlyphCache,
    metrics: LineMetrics,
    queue: CommentQueue,
    allocator: LaneAllocator,
    geometry: LaneGeometry,
    lanes: Vec<Lane>,
    arrival: VecDeque<(CommentId, usize)>,
    next_id: u64,
    stats: OverlayStats,
}

impl OverlayState {
    pub fn new(
        config: OverlayConfig,
        glyphs: GlyphCache,
        queue: CommentQueue,
        width: u32,
        height: u32,
    ) -> Result<Self, OverlayError> {
        config
            .validate()
            .map_err(|error| OverlayError::InvalidConfig(format!("{error:#}")))?;
        if width == 0 || height == 0 {
            return Err(OverlayError::InvalidSurface { width, height });
        }
        let metrics = glyphs.line_metrics()?;
        let geometry = LaneGeometry::compute(metrics, &config, width, height);
        let allocator = LaneAllocator::from_config(&config);
        let lanes = (0..geometry.lane_count).map(|_| Lane::default()).collect();

        Ok(Self {
            config,
            glyphs,
            metrics,
            queue,
            allocator,
            geometry,
            lanes,
            arrival: VecDeque::new(),
            next_id: 0,
            stats: OverlayStats::default(),
        })
    }

    pub fn sender(&self) -> CommentSender {
        self.queue.sender()
    }

    pub fn geometry(&self) -> LaneGeometry {
        self.geometry
    }

    pub fn stats(&self) -> OverlayStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.arrival.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrival.is_empty()
    }

    /// Lane table, including stray lanes left over from a larger surface.
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Live comments in arrival order.
    pub fn comments(&self) -> impl Iterator<Item = &Comment> + '_ {
        self.arrival
            .iter()
            .filter_map(move |(id, lane)| self.lanes[*lane].iter().find(|c| c.id() == *id))
    }

    pub fn placements(&self) -> impl Iterator<Item = Placement<'_>> + '_ {
        self.lanes.iter().flat_map(|lane| {
            lane.iter().map(|comment| Placement {
                id: comment.id(),
                glyph: comment.glyph(),
                x: comment.x(),
                y: comment.y(),
            })
        })
    }

    /// Recomputes lane geometry. Existing comments keep their lane and `y`;
    /// lanes past the new count stay as stray lanes until they drain and are
    /// never offered to the allocator.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), OverlayError> {
        if width == 0 || height == 0 {
            return Err(OverlayError::InvalidSurface { width, height });
        }
        self.geometry = LaneGeometry::compute(self.metrics, &self.config, width, height);
        if self.lanes.len() < self.geometry.lane_count {
            self.lanes
                .resize_with(self.geometry.lane_count, Lane::default);
        }
        self.truncate_stray_lanes();
        debug!(
            width,
            height,
            lane_count = self.geometry.lane_count,
            stray_lanes = self.lanes.len() - self.geometry.lane_count,
            "overlay resized"
        );
        Ok(())
    }

    /// Admits queued comments, enforces the cap, advances every comment by
    /// `elapsed_ms` relative to the nominal frame interval and drops comments
    /// that have fully left the screen.
    pub fn tick(&mut self, elapsed_ms: f32) -> TickReport {
        let mut report = TickReport::default();

        for pending in self.queue.drain_all() {
            match self.admit(pending) {
                Ok(evicted) => {
                    report.admitted += 1;
                    report.evicted += evicted;
                }
                Err(error) => {
                    warn!(%error, "dropping comment");
                    self.stats.dropped += 1;
                    report.dropped += 1;
                }
            }
        }

        let ticks = if elapsed_ms.is_finite() {
            elapsed_ms.max(0.0) / self.config.frame_interval_ms
        } else {
            0.0
        };
        if ticks > 0.0 {
            for lane in &mut self.lanes {
                for comment in lane.iter_mut() {
                    comment.advance(ticks);
                }
            }
        }

        report.expired = self.expire_offscreen();
        report
    }

    fn admit(&mut self, pending: PendingComment) -> Result<usize, OverlayError> {
        let (text, color, velocity_hint, glyph) = pending.into_parts();
        if text.trim().is_empty() {
            return Err(OverlayError::EmptyComment);
        }
        if let Some(velocity) = velocity_hint {
            if !velocity.is_finite() || velocity <= 0.0 {
                return Err(OverlayError::InvalidVelocity { velocity });
            }
        }
        let glyph = match glyph {
            Some(glyph) => glyph,
            None => self.glyphs.render(&text, color)?,
        };

        let width = glyph.width() as f32;
        let velocity = velocity_hint
            .or(self.config.default_velocity)
            .unwrap_or_else(|| self.crossing_velocity(width));
        // x must only ever decrease.
        if !velocity.is_finite() || velocity <= 0.0 {
            return Err(OverlayError::InvalidVelocity { velocity });
        }

        let lane_count = self.geometry.lane_count;
        let assignment = self.allocator.assign(
            Incoming { width, velocity },
            &self.lanes[..lane_count],
            self.geometry.surface_width,
        );
        if assignment.saturated {
            self.stats.saturated += 1;
            debug!(lane = assignment.lane, "all lanes busy, overlapping at random");
        }

        let id = CommentId(self.next_id);
        self.next_id += 1;
        let comment = Comment::spawn(
            id,
            text,
            color,
            glyph,
            self.geometry.surface_width,
            self.geometry.lane_y(assignment.lane),
            velocity,
            assignment.lane,
        );
        self.lanes[assignment.lane].push(comment);
        self.arrival.push_back((id, assignment.lane));
        self.stats.admitted += 1;
        self.stats.peak_live = self.stats.peak_live.max(self.arrival.len());

        let mut evicted = 0;
        while self.arrival.len() > self.config.max_comments {
            if let Some((oldest, lane)) = self.arrival.pop_front() {
                self.lanes[lane].remove(oldest);
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.stats.evicted += evicted as u64;
            debug!(evicted, cap = self.config.max_comments, "evicted oldest comments");
        }
        Ok(evicted)
    }

    fn crossing_velocity(&self, glyph_width: f32) -> f32 {
        (self.geometry.surface_width + glyph_width) / self.config.crossing_ticks()
    }

    fn expire_offscreen(&mut self) -> usize {
        let mut gone = HashSet::new();
        for lane in &mut self.lanes {
            lane.retain(|comment| {
                if comment.is_offscreen() {
                    gone.insert(comment.id());
                    false
                } else {
                    true
                }
            });
        }
        if gone.is_empty() {
            return 0;
        }

        self.arrival.retain(|(id, _)| !gone.contains(id));
        self.truncate_stray_lanes();
        self.stats.expired += gone.len() as u64;
        gone.len()
    }

    fn truncate_stray_lanes(&mut self) {
        while self.lanes.len() > self.geometry.lane_count
            && self.lanes.last().map(Lane::is_empty).unwrap_or(false)
        {
            self.lanes.pop();
        }
    }
}
