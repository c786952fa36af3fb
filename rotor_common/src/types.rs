//! Closed enum sets shared across the pipeline.
//!
//! All wire-adjacent enums use `#[repr(u8)]` with a `from_u8` constructor so
//! decoding stays branch-table cheap and invalid raw values surface as
//! `None` instead of panics. Label strings are the exact tokens used in
//! telemetry counters and structured log lines.

use serde::{Deserialize, Serialize};

// ─── Wire-level sets ────────────────────────────────────────────────

/// Magnetic pool class reported by a hall channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pool {
    /// Neutral zone between magnets.
    Neu = 0,
    /// North pole.
    N = 1,
    /// South pole.
    S = 2,
}

impl Pool {
    /// Convert from raw `u8`. The wire value 3 is reserved and maps to `None`.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Neu),
            1 => Some(Self::N),
            2 => Some(Self::S),
            _ => None,
        }
    }

    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Neu => "NEU",
            Self::N => "N",
            Self::S => "S",
        }
    }
}

/// Hall channel identifier. Two channels sample the rotating assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Sensor {
    A = 0,
    B = 1,
}

impl Sensor {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::A),
            1 => Some(Self::B),
            _ => None,
        }
    }

    /// Array index for per-sensor state (`[state; 2]`).
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

/// Packet type carried in the upper nibble of the TYPE/VER byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    Event16 = 0x0,
    Event24 = 0x1,
    Summary16 = 0x2,
    Summary24 = 0x3,
    FilterStats = 0x4,
    LinkStats = 0x5,
    ImpulseTest = 0x6,
}

impl PacketType {
    /// Convert from the upper nibble. Unknown nibbles map to `None`.
    #[inline]
    pub const fn from_nibble(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Event16),
            0x1 => Some(Self::Event24),
            0x2 => Some(Self::Summary16),
            0x3 => Some(Self::Summary24),
            0x4 => Some(Self::FilterStats),
            0x5 => Some(Self::LinkStats),
            0x6 => Some(Self::ImpulseTest),
            _ => None,
        }
    }

    /// True for the two packet types the pipeline itself consumes.
    /// Everything else is routed to external sinks unchanged.
    #[inline]
    pub const fn is_event(self) -> bool {
        matches!(self, Self::Event16 | Self::Event24)
    }
}

/// Discriminates the two event payload layouts after decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Event16,
    Event24,
}

impl EventKind {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Event16 => "event16",
            Self::Event24 => "event24",
        }
    }
}

// ─── Kinematic sets ─────────────────────────────────────────────────

/// Classification of a completed three-pool cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleKind {
    /// `[N, NEU, S]` ordering.
    Up,
    /// `[S, NEU, N]` ordering.
    Down,
    /// Any other ordering of the full pool set.
    Mixed,
}

impl CycleKind {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Up => "cycle_up",
            Self::Down => "cycle_down",
            Self::Mixed => "cycle_mixed",
        }
    }
}

/// Rotation direction estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Cw,
    Ccw,
    Undecided,
}

impl Direction {
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Cw => Self::Ccw,
            Self::Ccw => Self::Cw,
            Self::Undecided => Self::Undecided,
        }
    }

    /// True for a committed CW/CCW value.
    #[inline]
    pub const fn is_decided(self) -> bool {
        !matches!(self, Self::Undecided)
    }

    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Cw => "CW",
            Self::Ccw => "CCW",
            Self::Undecided => "UNDECIDED",
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::Undecided
    }
}

/// Hierarchical directional confidence level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LockState {
    Unlocked = 0,
    SoftLock = 1,
    Locked = 2,
}

impl LockState {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unlocked),
            1 => Some(Self::SoftLock),
            2 => Some(Self::Locked),
            _ => None,
        }
    }

    /// True for SOFT_LOCK or LOCKED.
    #[inline]
    pub const fn is_engaged(self) -> bool {
        matches!(self, Self::SoftLock | Self::Locked)
    }

    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unlocked => "UNLOCKED",
            Self::SoftLock => "SOFT_LOCK",
            Self::Locked => "LOCKED",
        }
    }
}

impl Default for LockState {
    fn default() -> Self {
        Self::Unlocked
    }
}

/// Whether the mechanism is judged to be turning at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RotorState {
    Still,
    Movement,
}

impl RotorState {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Still => "STILL",
            Self::Movement => "MOVEMENT",
        }
    }
}

impl Default for RotorState {
    fn default() -> Self {
        Self::Still
    }
}

/// Alignment of the per-tile window direction against the locked direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowState {
    Flow,
    Resist,
    Chaotic,
    Neutral,
}

impl FlowState {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Flow => "FLOW",
            Self::Resist => "RESIST",
            Self::Chaotic => "CHAOTIC",
            Self::Neutral => "NEUTRAL",
        }
    }
}

impl Default for FlowState {
    fn default() -> Self {
        Self::Neutral
    }
}

// ─── Reject taxonomy ────────────────────────────────────────────────

/// Typed rejection reason for canonicalization and cycle detection.
///
/// One closed set covers both layers so the TruthProbe histogram counts
/// every discard path with a single key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectReason {
    /// Payload length matches no known event layout.
    NoEventKind,
    /// Sensor field absent from the ingested record.
    NoSensor,
    /// Sensor value outside {0, 1}.
    SensorInvalid,
    /// Pool field absent from the ingested record.
    NoToPool,
    /// Pool field present but not an integer.
    ToPoolInvalidType,
    /// Pool value outside {0, 1, 2}.
    ToPoolOutOfRange,
    /// Consecutive identical pool on one sensor.
    SamePoolRepeat,
    /// Three-slot window does not cover the full pool set.
    SeqNotMatch,
    /// Window span below the configured minimum.
    DtTooSmall,
    /// Window span above the configured maximum.
    DtTooLarge,
    /// Window has fewer than three entries.
    WindowNotReady,
}

impl RejectReason {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::NoEventKind => "NO_EVENT_KIND",
            Self::NoSensor => "NO_SENSOR",
            Self::SensorInvalid => "SENSOR_INVALID",
            Self::NoToPool => "NO_TO_POOL",
            Self::ToPoolInvalidType => "TO_POOL_INVALID_TYPE",
            Self::ToPoolOutOfRange => "TO_POOL_OUT_OF_RANGE",
            Self::SamePoolRepeat => "SAME_POOL_REPEAT",
            Self::SeqNotMatch => "SEQ_NOT_MATCH",
            Self::DtTooSmall => "DT_TOO_SMALL",
            Self::DtTooLarge => "DT_TOO_LARGE",
            Self::WindowNotReady => "WINDOW_NOT_READY",
        }
    }

    /// Every variant, in histogram display order.
    pub const ALL: [Self; 11] = [
        Self::NoEventKind,
        Self::NoSensor,
        Self::SensorInvalid,
        Self::NoToPool,
        Self::ToPoolInvalidType,
        Self::ToPoolOutOfRange,
        Self::SamePoolRepeat,
        Self::SeqNotMatch,
        Self::DtTooSmall,
        Self::DtTooLarge,
        Self::WindowNotReady,
    ];
}

// ─── Tactile layer (L1) ─────────────────────────────────────────────

/// Five-state tactile/kinematic classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum L1State {
    Still,
    Feeling,
    Scrape,
    Displacement,
    Moving,
}

impl L1State {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Still => "STILL",
            Self::Feeling => "FEELING",
            Self::Scrape => "SCRAPE",
            Self::Displacement => "DISPLACEMENT",
            Self::Moving => "MOVING",
        }
    }
}

impl Default for L1State {
    fn default() -> Self {
        Self::Still
    }
}

/// Reason code attached to every L1 classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum L1Reason {
    Init,
    StillGapTimeout,
    StillLowActivity,
    FeelingActivityNoDisp,
    ScrapeHighActivity,
    DispAboveD0,
    MovingStableDir,
    MovingLocked,
    HardResetGap,
}

impl L1Reason {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::StillGapTimeout => "STILL_GAP_TIMEOUT",
            Self::StillLowActivity => "STILL_LOW_ACTIVITY",
            Self::FeelingActivityNoDisp => "FEELING_ACTIVITY_NO_DISP",
            Self::ScrapeHighActivity => "SCRAPE_HIGH_ACTIVITY",
            Self::DispAboveD0 => "DISP_ABOVE_D0",
            Self::MovingStableDir => "MOVING_STABLE_DIR",
            Self::MovingLocked => "MOVING_LOCKED",
            Self::HardResetGap => "HARD_RESET_GAP",
        }
    }
}

impl Default for L1Reason {
    fn default() -> Self {
        Self::Init
    }
}

// ─── Awareness layer ────────────────────────────────────────────────

/// Awareness ladder from rest to confirmed rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AwState {
    Still,
    Noise,
    PreMovement,
    PreRotation,
    Movement,
}

impl AwState {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Still => "STILL",
            Self::Noise => "NOISE",
            Self::PreMovement => "PRE_MOVEMENT",
            Self::PreRotation => "PRE_ROTATION",
            Self::Movement => "MOVEMENT",
        }
    }
}

impl Default for AwState {
    fn default() -> Self {
        Self::Still
    }
}

/// Reason code attached to every awareness transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AwReason {
    Init,
    StopGapTimeout,
    NoDispActive,
    HoldDecay,
    StillLowActivity,
    NoiseAccBelowThreshold,
    MdiTrigger,
    MdiTremor,
    MdiHoldTimeout,
    MdiTriggerA,
    MdiTriggerADropped,
    MdiTriggerB,
    MdiLatch,
    MdiLatchDropped,
    CandidatePool,
    CandidateDropped,
    CommitAngle,
    CommitRebound,
    PreRotOriginSet,
    MovementDispConfirmed,
    MovementSpeedConfirmed,
    MovementLockAccelerated,
}

impl AwReason {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::StopGapTimeout => "STOP_GAP_TIMEOUT",
            Self::NoDispActive => "NO_DISP_ACTIVE",
            Self::HoldDecay => "HOLD_DECAY",
            Self::StillLowActivity => "STILL_LOW_ACTIVITY",
            Self::NoiseAccBelowThreshold => "NOISE_ACC_BELOW_THRESHOLD",
            Self::MdiTrigger => "MDI_TRIGGER",
            Self::MdiTremor => "MDI_TREMOR",
            Self::MdiHoldTimeout => "MDI_HOLD_TIMEOUT",
            Self::MdiTriggerA => "MDI_TRIGGER_A",
            Self::MdiTriggerADropped => "MDI_TRIGGER_A_DROPPED",
            Self::MdiTriggerB => "MDI_TRIGGER_B",
            Self::MdiLatch => "MDI_LATCH",
            Self::MdiLatchDropped => "MDI_LATCH_DROPPED",
            Self::CandidatePool => "CANDIDATE_POOL",
            Self::CandidateDropped => "CANDIDATE_DROPPED",
            Self::CommitAngle => "COMMIT_ANGLE",
            Self::CommitRebound => "COMMIT_REBOUND",
            Self::PreRotOriginSet => "PRE_ROT_ORIGIN_SET",
            Self::MovementDispConfirmed => "MOVEMENT_DISP_CONFIRMED",
            Self::MovementSpeedConfirmed => "MOVEMENT_SPEED_CONFIRMED",
            Self::MovementLockAccelerated => "MOVEMENT_LOCK_ACCELERATED",
        }
    }
}

impl Default for AwReason {
    fn default() -> Self {
        Self::Init
    }
}

/// Micro-displacement detection sensitivity profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MdiMode {
    /// Aggressive: first pool change triggers, strict confirm window.
    A,
    /// Adaptive step size scaled by window event count.
    B,
    /// Latch + confirm (default).
    C,
}

impl MdiMode {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

impl Default for MdiMode {
    fn default() -> Self {
        Self::C
    }
}

// ─── Execution gate ─────────────────────────────────────────────────

/// Execution gate state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateState {
    /// No active processing, waiting for input.
    Idle,
    /// Monitoring inputs, not yet armed.
    Observe,
    /// Conditions approaching threshold, ready to activate.
    Armed,
    /// Actively allowing actions.
    Active,
    /// Safe mode, blocking actions. Always reachable.
    Fallback,
}

impl GateState {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Observe => "OBSERVE",
            Self::Armed => "ARMED",
            Self::Active => "ACTIVE",
            Self::Fallback => "FALLBACK",
        }
    }
}

impl Default for GateState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Per-tick gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateDecision {
    AllowActive,
    HoldObserve,
    ForceFallback,
}

impl GateDecision {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AllowActive => "ALLOW_ACTIVE",
            Self::HoldObserve => "HOLD_OBSERVE",
            Self::ForceFallback => "FORCE_FALLBACK",
        }
    }
}

/// Externally supplied per-tick permission signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionIntent {
    /// Default; cannot by itself enable ACTIVE.
    None,
    /// Admissible only from ARMED.
    Activate,
    /// Admissible from ARMED or ACTIVE.
    Hold,
    /// Always forces FALLBACK.
    Release,
}

impl ActionIntent {
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "INTENT_NONE",
            Self::Activate => "INTENT_ACTIVATE",
            Self::Hold => "INTENT_HOLD",
            Self::Release => "INTENT_RELEASE",
        }
    }
}

impl Default for ActionIntent {
    fn default() -> Self {
        Self::None
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_from_u8_rejects_reserved() {
        assert_eq!(Pool::from_u8(0), Some(Pool::Neu));
        assert_eq!(Pool::from_u8(1), Some(Pool::N));
        assert_eq!(Pool::from_u8(2), Some(Pool::S));
        assert_eq!(Pool::from_u8(3), None);
    }

    #[test]
    fn packet_type_nibble_round_trip() {
        for t in [
            PacketType::Event16,
            PacketType::Event24,
            PacketType::Summary16,
            PacketType::Summary24,
            PacketType::FilterStats,
            PacketType::LinkStats,
            PacketType::ImpulseTest,
        ] {
            assert_eq!(PacketType::from_nibble(t as u8), Some(t));
        }
        assert_eq!(PacketType::from_nibble(0x7), None);
        assert_eq!(PacketType::from_nibble(0xF), None);
    }

    #[test]
    fn only_event_packets_feed_the_pipeline() {
        assert!(PacketType::Event16.is_event());
        assert!(PacketType::Event24.is_event());
        assert!(!PacketType::FilterStats.is_event());
        assert!(!PacketType::ImpulseTest.is_event());
    }

    #[test]
    fn direction_opposite() {
        assert_eq!(Direction::Cw.opposite(), Direction::Ccw);
        assert_eq!(Direction::Ccw.opposite(), Direction::Cw);
        assert_eq!(Direction::Undecided.opposite(), Direction::Undecided);
    }

    #[test]
    fn lock_state_ordering_matches_hierarchy() {
        assert!(LockState::Unlocked < LockState::SoftLock);
        assert!(LockState::SoftLock < LockState::Locked);
        assert!(!LockState::Unlocked.is_engaged());
        assert!(LockState::SoftLock.is_engaged());
        assert!(LockState::Locked.is_engaged());
    }

    #[test]
    fn reject_reason_labels_unique() {
        let mut seen = std::collections::HashSet::new();
        for r in RejectReason::ALL {
            assert!(seen.insert(r.label()), "duplicate label {}", r.label());
        }
    }

    #[test]
    fn intent_labels() {
        assert_eq!(ActionIntent::None.label(), "INTENT_NONE");
        assert_eq!(ActionIntent::Activate.label(), "INTENT_ACTIVATE");
        assert_eq!(ActionIntent::Hold.label(), "INTENT_HOLD");
        assert_eq!(ActionIntent::Release.label(), "INTENT_RELEASE");
    }
}
