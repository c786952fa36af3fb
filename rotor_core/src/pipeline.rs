//! Pipeline façade: the one owner of the whole state chain.
//!
//! `feed_event` runs canonicalize → cycles → tiles → compass → movement
//! for one event payload; `tick` refreshes the tactile/awareness layers
//! and evaluates the gate with the coherence derived from the movement
//! body. `snapshot` is a side-effect-free value copy.
//!
//! Ownership: every sub-component lives here and is mutated only through
//! this façade. No internal locking — callers invoke serially, and all
//! timestamps come in as arguments.

use rotor_common::config::{ConfigError, CoreConfig};
use rotor_common::types::{ActionIntent, EventKind, L1Reason, PacketType, Pool, RejectReason, RotorState, Sensor};
use serde::{Deserialize, Serialize};

use crate::activity::{L1Snapshot, PhysicalActivity};
use crate::codec::event::canonicalize;
use crate::codec::frame::DecodedFrame;
use crate::compass::{CompassSnapshot, InertialCompass};
use crate::cycles::{Cycle, CyclesState, TruthProbe};
use crate::gate::{ActionGate, GateInput, GateOutput};
use crate::movement::{MovementBody, MovementSnapshot};
use crate::origin::{OriginContext, OriginSnapshot, OriginTracker};
use crate::tiles::{Tile, TilesState};

// ─── Results ────────────────────────────────────────────────────────

/// Outcome of feeding one event payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    /// Reject reason when the payload did not canonicalize.
    pub reject: Option<RejectReason>,
    /// Cycle emitted by this event, if any.
    pub cycle: Option<Cycle>,
    /// Tiles flushed by this event, in increasing index order.
    pub tiles_emitted: Vec<Tile>,
    /// Compass view after the last flushed tile (None when no tile flushed).
    pub compass_snapshot: Option<CompassSnapshot>,
    /// Movement view after this event.
    pub movement_state: MovementSnapshot,
}

/// Per-tick input from the host.
#[derive(Debug, Clone)]
pub struct TickInput {
    /// Host wall time [s] for the tactile/awareness layers.
    pub now_s: f64,
    /// Host tick timestamp [ms] for the gate.
    pub now_ms: u64,
    /// Device time [µs] to advance movement idle handling, if known.
    pub device_time_us: Option<u64>,
    /// Age of the newest sensor data [ms].
    pub data_age_ms: u64,
    pub arm_signal: bool,
    pub force_fallback: bool,
    pub action_intent: ActionIntent,
    pub intent_source: String,
}

impl Default for TickInput {
    fn default() -> Self {
        Self {
            now_s: 0.0,
            now_ms: 0,
            device_time_us: None,
            data_age_ms: 0,
            arm_signal: false,
            force_fallback: false,
            action_intent: ActionIntent::None,
            intent_source: String::new(),
        }
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickResult {
    pub l1: L1Snapshot,
    pub origin: OriginSnapshot,
    pub gate: GateOutput,
    pub coherence: f64,
}

/// Side-effect-free value view over the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub profile_name: String,
    pub compass: CompassSnapshot,
    pub movement: MovementSnapshot,
    pub l1: L1Snapshot,
    pub origin: OriginSnapshot,
    pub events_total: u64,
    pub cycles_total: u64,
    pub tiles_emitted: u64,
}

// ─── Pipeline ───────────────────────────────────────────────────────

/// Composed state chain plus gate.
#[derive(Debug)]
pub struct Pipeline {
    cfg: CoreConfig,
    cycles: CyclesState,
    tiles: TilesState,
    compass: InertialCompass,
    movement: MovementBody,
    activity: PhysicalActivity,
    origin: OriginTracker,
    gate: ActionGate,
    events_since_tick: u32,
    /// Pool observations since the last tick; stamped with the tick's
    /// wall time so the origin windows live on one timeline.
    pending_pools: Vec<(Sensor, Option<Pool>)>,
}

impl Pipeline {
    pub fn new(cfg: CoreConfig) -> Self {
        let p = &cfg.pipeline;
        Self {
            cycles: CyclesState::new(p.dt_min_us, p.dt_max_us),
            tiles: TilesState::new(
                p.tile_span_cycles,
                p.boot_cycles_for_median,
                p.dense_tile_emission,
            ),
            compass: InertialCompass::new(
                p.compass_alpha,
                p.compass_threshold_high,
                p.compass_threshold_low,
            ),
            movement: MovementBody::new(p),
            activity: PhysicalActivity::new(cfg.activity.clone(), p.cycles_per_rot),
            origin: OriginTracker::new(cfg.activity.clone()),
            gate: ActionGate::new(cfg.gate.clone()),
            cfg,
            events_since_tick: 0,
            pending_pools: Vec::new(),
        }
    }

    /// Build from a named profile.
    pub fn with_profile(name: &str) -> Result<Self, ConfigError> {
        let cfg = CoreConfig::from_name(name)?;
        cfg.validate()?;
        Ok(Self::new(cfg))
    }

    /// Route one decoded frame. Event frames feed the pipeline; every
    /// other packet type is the caller's to forward, returned untouched.
    pub fn feed_frame(&mut self, frame: &DecodedFrame) -> Option<PipelineResult> {
        match frame.packet_type {
            PacketType::Event16 | PacketType::Event24 => Some(self.feed_event(&frame.payload)),
            _ => None,
        }
    }

    /// Process one event payload through the full chain.
    pub fn feed_event(&mut self, payload: &[u8]) -> PipelineResult {
        self.events_since_tick += 1;

        let ev = match canonicalize(payload) {
            Ok(ev) => ev,
            Err(reason) => {
                self.cycles.record_decode_reject(reason);
                return PipelineResult {
                    reject: Some(reason),
                    cycle: None,
                    tiles_emitted: Vec::new(),
                    compass_snapshot: None,
                    movement_state: self.movement.snapshot(),
                };
            }
        };

        self.pending_pools.push((ev.sensor, Some(ev.to_pool)));

        // EVENT16 carries no absolute clock: it counts as tactile and pool
        // activity but cannot enter the time-based detectors.
        if ev.kind == EventKind::Event16 {
            return PipelineResult {
                reject: None,
                cycle: None,
                tiles_emitted: Vec::new(),
                compass_snapshot: None,
                movement_state: self.movement.snapshot(),
            };
        }

        let cycle = self.cycles.feed_canonical(&ev);
        let mut tiles_emitted = Vec::new();
        let mut compass_snapshot = None;

        if let Some(cycle) = &cycle {
            for tile in self.tiles.feed_cycle(cycle) {
                let snap = self.compass.feed_tile(&tile);
                self.movement.feed_tile(&tile, &snap);
                compass_snapshot = Some(snap);
                tiles_emitted.push(tile);
            }
        }

        PipelineResult {
            reject: None,
            cycle,
            tiles_emitted,
            compass_snapshot,
            movement_state: self.movement.snapshot(),
        }
    }

    /// Flush the trailing open tile at end of stream.
    pub fn flush(&mut self) -> Option<(Tile, CompassSnapshot, MovementSnapshot)> {
        let tile = self.tiles.flush()?;
        let compass = self.compass.feed_tile(&tile);
        let movement = self.movement.feed_tile(&tile, &compass);
        Some((tile, compass, movement))
    }

    /// Advance the tactile, awareness and gate layers by one tick.
    pub fn tick(&mut self, input: &TickInput) -> TickResult {
        if let Some(t_us) = input.device_time_us {
            self.movement.update_idle(t_us);
        }
        let mv = self.movement.snapshot();

        let l1 = self.activity.update(
            input.now_s,
            mv.total_cycles_physical,
            self.events_since_tick,
            mv.direction_global_conf,
            mv.direction_lock_state,
            mv.direction_global_effective,
        );
        self.events_since_tick = 0;

        if l1.reason == L1Reason::HardResetGap {
            self.origin.reset_all();
        }

        for (sensor, pool) in self.pending_pools.drain(..) {
            self.origin.record_pool(sensor, pool, input.now_s);
        }

        let origin = self.origin.update(OriginContext {
            now_s: input.now_s,
            dtheta_deg: l1.delta_theta_deg_signed,
            theta_hat_rot: l1.theta_hat_rot,
            activity_score: l1.activity_score,
            age_event_s: l1.age_event_s,
            age_cycle_s: l1.age_cycle_s,
            lock_state: mv.direction_lock_state,
        });

        let coherence = self.movement.coherence();
        let gate = self.gate.evaluate(&GateInput {
            now_ms: input.now_ms,
            coherence_score: coherence,
            lock_state: mv.direction_lock_state,
            data_age_ms: input.data_age_ms,
            rotor_active: mv.rotor_state == RotorState::Movement,
            force_fallback: input.force_fallback,
            arm_signal: input.arm_signal,
            action_intent: input.action_intent,
            intent_source: input.intent_source.clone(),
        });

        TickResult {
            l1,
            origin,
            gate,
            coherence,
        }
    }

    /// Consistent value view; calling it twice without an intervening
    /// `feed_event`/`tick` yields identical results.
    pub fn snapshot(&self) -> PipelineSnapshot {
        let probe = self.cycles.probe();
        PipelineSnapshot {
            profile_name: self.cfg.pipeline.name.clone(),
            compass: self.compass.snapshot(),
            movement: self.movement.snapshot(),
            l1: self.activity.snapshot(),
            origin: self.origin.snapshot(),
            events_total: probe.events_total,
            cycles_total: probe.cycles_total,
            tiles_emitted: self.tiles.tiles_emitted(),
        }
    }

    /// TruthProbe debug projection for observability sinks. Pipeline
    /// correctness does not depend on anyone reading this.
    #[inline]
    pub fn cycle_probe(&self) -> &TruthProbe {
        self.cycles.probe()
    }

    #[inline]
    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
