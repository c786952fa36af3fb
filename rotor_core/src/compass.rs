//! Direction estimation from up/down cycle imbalance.
//!
//! Two readings per tile: the *window* direction is the raw imbalance of
//! that tile alone; the *global* score is an EMA over tiles with
//! hysteresis on the committed direction. Mixed cycles carry no direction
//! evidence and stay out of the denominator.

use rotor_common::types::{CycleKind, Direction};
use serde::{Deserialize, Serialize};

use crate::tiles::Tile;

/// Compass view after a tile update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompassSnapshot {
    /// Committed direction (hysteretic).
    pub direction: Direction,
    /// Signed EMA of per-tile imbalance, CW positive, in [-1, +1].
    pub global_score: f64,
    /// Magnitude of the global score.
    pub conf: f64,
    /// Direction of the most recent tile alone.
    pub window_direction: Direction,
    /// Imbalance magnitude of the most recent tile.
    pub window_conf: f64,
}

/// EMA compass with direction hysteresis.
#[derive(Debug, Clone)]
pub struct InertialCompass {
    alpha: f64,
    threshold_high: f64,
    threshold_low: f64,
    score: f64,
    direction: Direction,
    window_direction: Direction,
    window_conf: f64,
}

impl InertialCompass {
    pub fn new(alpha: f64, threshold_high: f64, threshold_low: f64) -> Self {
        Self {
            alpha,
            threshold_high,
            threshold_low,
            score: 0.0,
            direction: Direction::Undecided,
            window_direction: Direction::Undecided,
            window_conf: 0.0,
        }
    }

    /// Update from one tile and return the new view.
    pub fn feed_tile(&mut self, tile: &Tile) -> CompassSnapshot {
        let mut ups = 0u32;
        let mut downs = 0u32;
        for bucket in &tile.samples {
            for sample in bucket {
                match sample.kind {
                    CycleKind::Up => ups += 1,
                    CycleKind::Down => downs += 1,
                    CycleKind::Mixed => {}
                }
            }
        }

        let total = ups + downs;
        if total > 0 {
            let delta = (ups as f64 - downs as f64) / total as f64;
            self.score = (1.0 - self.alpha) * self.score + self.alpha * delta;
            self.window_conf = delta.abs();
            self.window_direction = if delta > 0.0 {
                Direction::Cw
            } else if delta < 0.0 {
                Direction::Ccw
            } else {
                Direction::Undecided
            };
        } else {
            self.window_direction = Direction::Undecided;
            self.window_conf = 0.0;
        }

        // Sticky direction: commit at the high threshold, release below
        // the low one, retain inside the band.
        if self.score >= self.threshold_high {
            self.direction = Direction::Cw;
        } else if self.score <= -self.threshold_high {
            self.direction = Direction::Ccw;
        } else if self.score.abs() < self.threshold_low {
            self.direction = Direction::Undecided;
        }

        self.snapshot()
    }

    /// Current view without side effects.
    pub fn snapshot(&self) -> CompassSnapshot {
        CompassSnapshot {
            direction: self.direction,
            global_score: self.score,
            conf: self.score.abs(),
            window_direction: self.window_direction,
            window_conf: self.window_conf,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::CycleSample;

    fn tile(ups: usize, downs: usize, mixed: usize) -> Tile {
        let mut samples_a = Vec::new();
        for _ in 0..ups {
            samples_a.push(CycleSample {
                t_center_us: 0,
                kind: CycleKind::Up,
                dt_us: 1000,
            });
        }
        for _ in 0..downs {
            samples_a.push(CycleSample {
                t_center_us: 0,
                kind: CycleKind::Down,
                dt_us: 1000,
            });
        }
        for _ in 0..mixed {
            samples_a.push(CycleSample {
                t_center_us: 0,
                kind: CycleKind::Mixed,
                dt_us: 1000,
            });
        }
        let n = samples_a.len() as u32;
        Tile {
            tile_index: 0,
            t_start_us: 0,
            t_end_us: 4000,
            t_center_us: 2000,
            n_a: n,
            n_b: 0,
            cycles_physical: 0.5 * n as f64,
            samples: [samples_a, Vec::new()],
        }
    }

    fn compass() -> InertialCompass {
        InertialCompass::new(0.3, 0.3, 0.12)
    }

    #[test]
    fn all_up_tiles_commit_cw() {
        let mut c = compass();
        let mut snap = c.feed_tile(&tile(4, 0, 0));
        assert_eq!(snap.window_direction, Direction::Cw);
        // One tile: score = 0.3, exactly at threshold_high.
        assert_eq!(snap.direction, Direction::Cw);
        snap = c.feed_tile(&tile(4, 0, 0));
        assert!(snap.global_score > 0.3);
        assert_eq!(snap.direction, Direction::Cw);
        assert!((snap.conf - snap.global_score.abs()).abs() < 1e-12);
    }

    #[test]
    fn all_down_tiles_commit_ccw() {
        let mut c = compass();
        for _ in 0..3 {
            c.feed_tile(&tile(0, 4, 0));
        }
        let snap = c.snapshot();
        assert_eq!(snap.direction, Direction::Ccw);
        assert!(snap.global_score < 0.0);
    }

    #[test]
    fn direction_retained_in_hysteresis_band() {
        let mut c = compass();
        for _ in 0..4 {
            c.feed_tile(&tile(4, 0, 0));
        }
        assert_eq!(c.snapshot().direction, Direction::Cw);
        // Balanced tiles decay the score; inside [low, high) the committed
        // direction must hold.
        loop {
            let snap = c.feed_tile(&tile(2, 2, 0));
            if snap.global_score < 0.3 {
                assert!(snap.global_score >= 0.12 || snap.direction == Direction::Undecided);
                if snap.global_score >= 0.12 {
                    assert_eq!(snap.direction, Direction::Cw);
                }
                break;
            }
        }
    }

    #[test]
    fn score_decay_releases_to_undecided() {
        let mut c = compass();
        for _ in 0..4 {
            c.feed_tile(&tile(4, 0, 0));
        }
        for _ in 0..30 {
            c.feed_tile(&tile(2, 2, 0));
        }
        let snap = c.snapshot();
        assert!(snap.global_score.abs() < 0.12);
        assert_eq!(snap.direction, Direction::Undecided);
    }

    #[test]
    fn empty_tile_leaves_score_untouched() {
        let mut c = compass();
        c.feed_tile(&tile(4, 0, 0));
        let before = c.snapshot().global_score;
        let snap = c.feed_tile(&tile(0, 0, 0));
        assert!((snap.global_score - before).abs() < 1e-12);
        assert_eq!(snap.window_direction, Direction::Undecided);
        assert_eq!(snap.window_conf, 0.0);
    }

    #[test]
    fn mixed_cycles_excluded_from_denominator() {
        let mut c = compass();
        let snap = c.feed_tile(&tile(2, 0, 6));
        // delta = (2-0)/2 = 1.0 despite the mixed majority.
        assert!((snap.window_conf - 1.0).abs() < 1e-12);
    }

    #[test]
    fn opposing_stream_flips_after_crossing_thresholds() {
        let mut c = compass();
        for _ in 0..6 {
            c.feed_tile(&tile(4, 0, 0));
        }
        assert_eq!(c.snapshot().direction, Direction::Cw);
        for _ in 0..20 {
            c.feed_tile(&tile(0, 4, 0));
        }
        assert_eq!(c.snapshot().direction, Direction::Ccw);
    }
}
