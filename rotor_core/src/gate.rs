//! Execution gate: deterministic allow/deny per tick.
//!
//! IDLE → OBSERVE → ARMED → ACTIVE with FALLBACK always reachable.
//! Evaluation order is strict: log the intent, log the basis, apply
//! fallback dominance, then the per-state transition table, then log the
//! entry and the decision. Output depends only on the input and the prior
//! state — the tick's `now_ms` is an input, never a clock read.
//!
//! Intent semantics: ACTIVATE is admissible only from ARMED, HOLD from
//! ARMED or ACTIVE, RELEASE always forces FALLBACK, NONE never enables
//! ACTIVE on its own.

use rotor_common::config::GateConfig;
use rotor_common::types::{ActionIntent, GateDecision, GateState, LockState};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Coherence below this always forces FALLBACK, independent of config.
pub const COHERENCE_FLOOR: f64 = 0.1;

// ─── Input / output ─────────────────────────────────────────────────

/// Per-tick gate input. Everything the decision depends on is here.
#[derive(Debug, Clone, PartialEq)]
pub struct GateInput {
    pub now_ms: u64,
    /// Pipeline coherence in [0, 1].
    pub coherence_score: f64,
    pub lock_state: LockState,
    /// Age of the newest sensor data [ms].
    pub data_age_ms: u64,
    pub rotor_active: bool,
    pub force_fallback: bool,
    pub arm_signal: bool,
    pub action_intent: ActionIntent,
    pub intent_source: String,
}

impl Default for GateInput {
    fn default() -> Self {
        Self {
            now_ms: 0,
            coherence_score: 0.0,
            lock_state: LockState::Unlocked,
            data_age_ms: 0,
            rotor_active: false,
            force_fallback: false,
            arm_signal: false,
            action_intent: ActionIntent::None,
            intent_source: String::new(),
        }
    }
}

/// One structured log entry, rendered as `EVENT key=value ...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateLogEntry {
    pub event: &'static str,
    pub fields: Vec<(&'static str, String)>,
}

impl GateLogEntry {
    /// Render to a single `key=value` token line.
    pub fn render(&self) -> String {
        let mut line = String::from(self.event);
        for (key, value) in &self.fields {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(value);
        }
        line
    }
}

/// Per-tick gate output.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutput {
    pub state: GateState,
    pub decision: GateDecision,
    pub reason: &'static str,
    pub timestamp_ms: u64,
    pub allowed: bool,
    pub intent_received: ActionIntent,
    pub intent_accepted: bool,
    pub log_entries: Vec<GateLogEntry>,
}

// ─── ActionGate ─────────────────────────────────────────────────────

/// Deterministic execution gate.
#[derive(Debug)]
pub struct ActionGate {
    cfg: GateConfig,
    state: GateState,
}

impl ActionGate {
    pub const VERSION: &'static str = "0.2";

    pub fn new(cfg: GateConfig) -> Self {
        Self {
            cfg,
            state: GateState::Idle,
        }
    }

    #[inline]
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Evaluate one tick.
    pub fn evaluate(&mut self, input: &GateInput) -> GateOutput {
        let mut log = Vec::new();

        log.push(GateLogEntry {
            event: "ACTION_INTENT",
            fields: vec![
                ("t_ms", input.now_ms.to_string()),
                ("intent", input.action_intent.label().to_string()),
                ("source", input.intent_source.clone()),
            ],
        });
        log.push(GateLogEntry {
            event: "GATE_BASIS",
            fields: vec![
                ("t_ms", input.now_ms.to_string()),
                ("coherence", format!("{:.3}", input.coherence_score)),
                ("lock", input.lock_state.label().to_string()),
                ("data_age_ms", input.data_age_ms.to_string()),
                ("rotor_active", input.rotor_active.to_string()),
            ],
        });

        // Fallback dominance: always reachable, checked before anything else.
        let fallback_reason = if input.action_intent == ActionIntent::Release {
            Some("intent_release")
        } else if input.force_fallback {
            Some("forced_fallback")
        } else if input.data_age_ms > self.cfg.stale_data_threshold_ms {
            Some("data_stale")
        } else if input.coherence_score < COHERENCE_FLOOR {
            Some("coherence_floor")
        } else {
            None
        };

        if let Some(reason) = fallback_reason {
            log.push(GateLogEntry {
                event: "GATE_FALLBACK",
                fields: vec![
                    ("t_ms", input.now_ms.to_string()),
                    ("reason", reason.to_string()),
                ],
            });
            self.transition(GateState::Fallback, reason, input.now_ms, &mut log);
            return self.finish(
                input,
                GateDecision::ForceFallback,
                reason,
                false,
                log,
            );
        }

        let mut intent_accepted = false;
        let (next, reason) = match self.state {
            GateState::Idle => (GateState::Observe, "input_received"),

            GateState::Observe => {
                if self.arm_conditions(input) {
                    (GateState::Armed, "arm_conditions_met")
                } else {
                    (GateState::Observe, "awaiting_arm_conditions")
                }
            }

            GateState::Armed => {
                if !self.arm_conditions(input) {
                    (GateState::Observe, "lock_lost")
                } else if input.coherence_score >= self.cfg.activation_coherence_min
                    && input.lock_state == LockState::Locked
                    && input.action_intent == ActionIntent::Activate
                {
                    intent_accepted = true;
                    (GateState::Active, "intent_activate_accepted")
                } else {
                    if input.action_intent == ActionIntent::Hold {
                        intent_accepted = true;
                    }
                    let reason = if input.action_intent == ActionIntent::Activate {
                        "activation_conditions_not_met"
                    } else {
                        "awaiting_intent"
                    };
                    (GateState::Armed, reason)
                }
            }

            GateState::Active => {
                if input.coherence_score < self.cfg.coherence_threshold {
                    (GateState::Observe, "coherence_drop")
                } else if input.lock_state == LockState::Unlocked {
                    (GateState::Observe, "lock_lost")
                } else if input.action_intent == ActionIntent::Hold {
                    intent_accepted = true;
                    (GateState::Active, "intent_hold")
                } else if self.cfg.require_intent_for_active {
                    // ACTIVATE is only admissible from ARMED; anything that
                    // is not HOLD revokes the active grant here.
                    (GateState::Observe, "intent_revoked")
                } else {
                    (GateState::Active, "conditions_hold")
                }
            }

            GateState::Fallback => {
                if input.coherence_score >= self.cfg.coherence_threshold {
                    (GateState::Idle, "recovered")
                } else {
                    (GateState::Fallback, "fallback_hold")
                }
            }
        };

        self.transition(next, reason, input.now_ms, &mut log);

        let decision = match self.state {
            GateState::Active => GateDecision::AllowActive,
            GateState::Fallback => GateDecision::ForceFallback,
            _ => GateDecision::HoldObserve,
        };
        self.finish(input, decision, reason, intent_accepted, log)
    }

    /// OBSERVE → ARMED conditions: coherent enough, some lock, and either
    /// an explicit arm signal or a full lock with solid coherence.
    fn arm_conditions(&self, input: &GateInput) -> bool {
        input.coherence_score >= self.cfg.arm_coherence_min
            && input.lock_state != LockState::Unlocked
            && (input.arm_signal
                || (input.lock_state == LockState::Locked && input.coherence_score >= 0.5))
    }

    fn transition(
        &mut self,
        next: GateState,
        reason: &'static str,
        now_ms: u64,
        log: &mut Vec<GateLogEntry>,
    ) {
        if next != self.state {
            debug!(from = self.state.label(), to = next.label(), reason, "gate transition");
            log.push(GateLogEntry {
                event: "GATE_ENTER",
                fields: vec![
                    ("t_ms", now_ms.to_string()),
                    ("from", self.state.label().to_string()),
                    ("to", next.label().to_string()),
                    ("reason", reason.to_string()),
                ],
            });
            self.state = next;
        }
    }

    fn finish(
        &self,
        input: &GateInput,
        decision: GateDecision,
        reason: &'static str,
        intent_accepted: bool,
        mut log: Vec<GateLogEntry>,
    ) -> GateOutput {
        let allowed = decision == GateDecision::AllowActive;
        log.push(GateLogEntry {
            event: "GATE_DECISION",
            fields: vec![
                ("t_ms", input.now_ms.to_string()),
                ("state", self.state.label().to_string()),
                ("decision", decision.label().to_string()),
                ("reason", reason.to_string()),
                ("allowed", allowed.to_string()),
                ("intent", input.action_intent.label().to_string()),
                ("intent_accepted", intent_accepted.to_string()),
            ],
        });
        GateOutput {
            state: self.state,
            decision,
            reason,
            timestamp_ms: input.now_ms,
            allowed,
            intent_received: input.action_intent,
            intent_accepted,
            log_entries: log,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
