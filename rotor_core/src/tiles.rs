//! Time-bucketed cycle aggregation.
//!
//! Tile duration is not configured directly: the first
//! `boot_cycles_for_median` cycles only contribute dt samples, then
//! `tile_duration = tile_span_cycles × median(dt)`. Boot cycles are
//! skipped (counted, not bucketed); the first post-boot cycle center
//! anchors the tile axis.
//!
//! Emission is dense by default: when a cycle lands several indices
//! ahead, the intermediate empty tiles are emitted too, so downstream
//! RPM math sees a uniform time base. The sparse alternative (jump the
//! index) is a profile toggle. Either way emitted indices are strictly
//! increasing.

use rotor_common::consts::SENSOR_COUNT;
use rotor_common::types::{CycleKind, Sensor};
use serde::{Deserialize, Serialize};

use crate::cycles::Cycle;

// ─── Tile record ────────────────────────────────────────────────────

/// One cycle as stored inside a tile bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSample {
    pub t_center_us: u64,
    pub kind: CycleKind,
    pub dt_us: u64,
}

/// One emitted time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    /// Monotone bucket index on the post-boot time axis.
    pub tile_index: u64,
    pub t_start_us: u64,
    pub t_end_us: u64,
    pub t_center_us: u64,
    /// Cycles per sensor in this window.
    pub n_a: u32,
    pub n_b: u32,
    /// `0.5 · (n_a + n_b)` — both sensors see every physical cycle.
    pub cycles_physical: f64,
    /// Raw cycle samples per sensor.
    pub samples: [Vec<CycleSample>; SENSOR_COUNT],
}

impl Tile {
    /// True when any cycle landed in this window.
    #[inline]
    pub fn has_data(&self) -> bool {
        self.n_a + self.n_b > 0
    }

    /// True when both sensors contributed.
    #[inline]
    pub fn is_pure_stereo(&self) -> bool {
        self.n_a > 0 && self.n_b > 0
    }
}

// ─── TilesState ─────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct OpenTile {
    index: u64,
    counts: [u32; SENSOR_COUNT],
    samples: [Vec<CycleSample>; SENSOR_COUNT],
}

/// Streaming tile aggregator.
#[derive(Debug)]
pub struct TilesState {
    tile_span_cycles: f64,
    boot_cycles_for_median: usize,
    dense_emission: bool,
    /// Grows until the boot median is computed, then freezes.
    boot_dt_samples: Vec<u64>,
    boot_cycles_skipped: u64,
    tile_duration_us: Option<u64>,
    t0_us: Option<u64>,
    open: Option<OpenTile>,
    tiles_emitted: u64,
}

impl TilesState {
    pub fn new(tile_span_cycles: f64, boot_cycles_for_median: usize, dense_emission: bool) -> Self {
        Self {
            tile_span_cycles,
            boot_cycles_for_median,
            dense_emission,
            boot_dt_samples: Vec::new(),
            boot_cycles_skipped: 0,
            tile_duration_us: None,
            t0_us: None,
            open: None,
            tiles_emitted: 0,
        }
    }

    /// Learned tile duration, `None` while booting.
    #[inline]
    pub fn tile_duration_us(&self) -> Option<u64> {
        self.tile_duration_us
    }

    /// Cycles consumed by boot learning.
    #[inline]
    pub fn boot_cycles_skipped(&self) -> u64 {
        self.boot_cycles_skipped
    }

    #[inline]
    pub fn tiles_emitted(&self) -> u64 {
        self.tiles_emitted
    }

    /// Feed one cycle; returns the tiles flushed by it (possibly several
    /// empty ones under dense emission, none while booting).
    pub fn feed_cycle(&mut self, cycle: &Cycle) -> Vec<Tile> {
        let Some(duration) = self.tile_duration_us else {
            self.boot_cycles_skipped += 1;
            self.boot_dt_samples.push(cycle.dt_us);
            if self.boot_dt_samples.len() >= self.boot_cycles_for_median {
                let duration = (self.tile_span_cycles * median(&self.boot_dt_samples)).round();
                self.tile_duration_us = Some((duration as u64).max(1));
                tracing::debug!(
                    tile_duration_us = self.tile_duration_us,
                    samples = self.boot_dt_samples.len(),
                    "tile duration learned from boot median"
                );
            }
            return Vec::new();
        };

        let t0 = *self.t0_us.get_or_insert(cycle.t_center_us);
        let index = cycle.t_center_us.saturating_sub(t0) / duration;

        let mut emitted = Vec::new();
        if self.open.as_ref().map_or(true, |open| open.index != index) {
            if let Some(closed) = self.open.take() {
                let closed_index = closed.index;
                emitted.push(self.seal(closed));
                if self.dense_emission {
                    for idx in (closed_index + 1)..index {
                        emitted.push(self.seal(OpenTile {
                            index: idx,
                            ..OpenTile::default()
                        }));
                    }
                }
            }
            self.open = Some(OpenTile {
                index,
                ..OpenTile::default()
            });
        }

        let Some(open) = self.open.as_mut() else {
            return emitted;
        };
        let slot = cycle.sensor.index();
        open.counts[slot] += 1;
        open.samples[slot].push(CycleSample {
            t_center_us: cycle.t_center_us,
            kind: cycle.kind,
            dt_us: cycle.dt_us,
        });
        emitted
    }

    /// Flush the trailing open tile at end of stream.
    pub fn flush(&mut self) -> Option<Tile> {
        let open = self.open.take()?;
        Some(self.seal(open))
    }

    fn seal(&mut self, open: OpenTile) -> Tile {
        // seal is only reachable once duration and t0 are established.
        let duration = self.tile_duration_us.unwrap_or(1);
        let t0 = self.t0_us.unwrap_or(0);
        let t_start = t0 + open.index * duration;
        self.tiles_emitted += 1;
        Tile {
            tile_index: open.index,
            t_start_us: t_start,
            t_end_us: t_start + duration,
            t_center_us: t_start + duration / 2,
            n_a: open.counts[Sensor::A.index()],
            n_b: open.counts[Sensor::B.index()],
            cycles_physical: 0.5 * (open.counts[0] + open.counts[1]) as f64,
            samples: open.samples,
        }
    }
}

fn median(samples: &[u64]) -> f64 {
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2] as f64
    } else {
        (sorted[n / 2 - 1] as f64 + sorted[n / 2] as f64) / 2.0
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(sensor: Sensor, t_center_us: u64, dt_us: u64) -> Cycle {
        Cycle {
            sensor,
            kind: CycleKind::Up,
            t_start_us: t_center_us.saturating_sub(dt_us / 2),
            t_end_us: t_center_us + dt_us / 2,
            t_center_us,
            dt_us,
        }
    }

    /// 4 boot cycles of dt=2000 → duration = 2 × 2000 = 4000 µs.
    fn booted() -> TilesState {
        let mut ts = TilesState::new(2.0, 4, true);
        for i in 0..4u64 {
            assert!(ts.feed_cycle(&cycle(Sensor::A, i * 2000, 2000)).is_empty());
        }
        assert_eq!(ts.tile_duration_us(), Some(4000));
        ts
    }

    #[test]
    fn no_tiles_during_boot() {
        let mut ts = TilesState::new(2.0, 4, true);
        for i in 0..3u64 {
            assert!(ts.feed_cycle(&cycle(Sensor::A, i * 2000, 2000)).is_empty());
            assert!(ts.tile_duration_us().is_none());
        }
        assert_eq!(ts.boot_cycles_skipped(), 3);
    }

    #[test]
    fn first_post_boot_cycle_anchors_axis() {
        let mut ts = booted();
        // First post-boot cycle at t=10_000 → tile 0 spans [10_000, 14_000).
        assert!(ts.feed_cycle(&cycle(Sensor::A, 10_000, 2000)).is_empty());
        let tile = ts.flush().unwrap();
        assert_eq!(tile.tile_index, 0);
        assert_eq!(tile.t_start_us, 10_000);
        assert_eq!(tile.t_end_us, 14_000);
        assert_eq!(tile.n_a, 1);
    }

    #[test]
    fn tile_flushes_on_index_change() {
        let mut ts = booted();
        assert!(ts.feed_cycle(&cycle(Sensor::A, 10_000, 2000)).is_empty());
        assert!(ts.feed_cycle(&cycle(Sensor::B, 12_000, 2000)).is_empty());
        let tiles = ts.feed_cycle(&cycle(Sensor::A, 14_500, 2000));
        assert_eq!(tiles.len(), 1);
        let t = &tiles[0];
        assert_eq!(t.tile_index, 0);
        assert_eq!(t.n_a, 1);
        assert_eq!(t.n_b, 1);
        assert!((t.cycles_physical - 1.0).abs() < 1e-12);
        assert!(t.is_pure_stereo());
    }

    #[test]
    fn dense_emission_fills_index_gaps() {
        let mut ts = booted();
        ts.feed_cycle(&cycle(Sensor::A, 10_000, 2000));
        // Jump to tile 3: tiles 0, 1, 2 must come out, 1 and 2 empty.
        let tiles = ts.feed_cycle(&cycle(Sensor::A, 10_000 + 3 * 4000 + 100, 2000));
        let indices: Vec<u64> = tiles.iter().map(|t| t.tile_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(tiles[0].has_data());
        assert!(!tiles[1].has_data());
        assert!(!tiles[2].has_data());
    }

    #[test]
    fn sparse_emission_jumps_indices() {
        let mut ts = TilesState::new(2.0, 4, false);
        for i in 0..4u64 {
            ts.feed_cycle(&cycle(Sensor::A, i * 2000, 2000));
        }
        ts.feed_cycle(&cycle(Sensor::A, 10_000, 2000));
        let tiles = ts.feed_cycle(&cycle(Sensor::A, 10_000 + 3 * 4000 + 100, 2000));
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].tile_index, 0);
        let trailing = ts.flush().unwrap();
        assert_eq!(trailing.tile_index, 3);
    }

    #[test]
    fn emitted_indices_strictly_increase() {
        let mut ts = booted();
        let mut last: Option<u64> = None;
        let centers = [10_000u64, 11_000, 15_000, 16_000, 30_000, 50_000, 50_500];
        let mut all = Vec::new();
        for c in centers {
            all.extend(ts.feed_cycle(&cycle(Sensor::A, c, 2000)));
        }
        all.extend(ts.flush());
        for t in &all {
            if let Some(prev) = last {
                assert!(t.tile_index > prev, "indices must strictly increase");
            }
            last = Some(t.tile_index);
        }
    }

    #[test]
    fn flush_emits_trailing_tile_once() {
        let mut ts = booted();
        ts.feed_cycle(&cycle(Sensor::B, 10_000, 2000));
        assert!(ts.flush().is_some());
        assert!(ts.flush().is_none());
    }

    #[test]
    fn median_even_sample_count() {
        assert!((median(&[1000, 2000, 3000, 4000]) - 2500.0).abs() < 1e-12);
        assert!((median(&[1000, 2000, 3000]) - 2000.0).abs() < 1e-12);
    }

    #[test]
    fn boot_median_ignores_outlier_tail() {
        // Median learning is robust to one wild dt.
        let mut ts = TilesState::new(2.0, 5, true);
        for (i, dt) in [2000u64, 2000, 1_000_000, 2000, 2000].iter().enumerate() {
            ts.feed_cycle(&cycle(Sensor::A, i as u64 * 2000, *dt));
        }
        assert_eq!(ts.tile_duration_us(), Some(4000));
    }
}
