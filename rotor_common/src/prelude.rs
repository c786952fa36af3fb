//! Prelude module for common re-exports.
//!
//! Consumers can `use rotor_common::prelude::*;` and get the most
//! important types without listing individual paths.

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ActivityConfig, ConfigError, CoreConfig, GateConfig, PipelineProfile};

// ─── Wire constants ─────────────────────────────────────────────────
pub use crate::consts::{EVENT16_PAYLOAD_LEN, EVENT24_PAYLOAD_LEN, FRAME_OVERHEAD, SYNC};

// ─── Enum sets ──────────────────────────────────────────────────────
pub use crate::types::{
    ActionIntent, AwReason, AwState, CycleKind, Direction, EventKind, FlowState, GateDecision,
    GateState, L1Reason, L1State, LockState, MdiMode, PacketType, Pool, RejectReason, RotorState,
    Sensor,
};
