//! Approval gate
//!
//! Policy table (effective mode × risk class):
//!
//! | mode     | low risk | high risk (write/exec/git-mutate) |
//! |----------|----------|-----------------------------------|
//! | auto     | execute  | execute                           |
//! | ask      | execute  | prompt once per run (plan stage)  |
//! | paranoid | prompt   | prompt every occurrence           |
//!
//! A confidence score below the floor forces the effective mode to at least
//! `ask` for the rest of the run ("spike mode"). The override can raise
//! required confirmation, never lower it, and is externally observable.

use crate::types::{ApprovalDecision, ApprovalMode, RiskClass};

/// Default confidence floor below which spike mode triggers.
pub const DEFAULT_CONFIDENCE_FLOOR: u8 = 40;

/// Per-run approval policy state.
#[derive(Debug, Clone)]
pub struct ApprovalGate {
    configured: ApprovalMode,
    floor: u8,
    spiked: bool,
    plan_approved: bool,
}

impl ApprovalGate {
    /// Gate for one run with the default confidence floor.
    #[must_use]
    pub fn new(mode: ApprovalMode) -> Self {
        Self::with_floor(mode, DEFAULT_CONFIDENCE_FLOOR)
    }

    /// Gate with an explicit confidence floor (0 disables spiking).
    #[must_use]
    pub fn with_floor(mode: ApprovalMode, floor: u8) -> Self {
        Self {
            configured: mode,
            floor,
            spiked: false,
            plan_approved: false,
        }
    }

    /// Feed the plan confidence score; below the floor, tighten to `ask`
    /// for the remainder of the run.
    pub fn apply_confidence(&mut self, score: u8) {
        if score < self.floor && !self.spiked {
            self.spiked = true;
            tracing::warn!(
                score,
                floor = self.floor,
                configured = %self.configured,
                effective = %self.effective_mode(),
                "low plan confidence; approval mode tightened for this run"
            );
        }
    }

    /// The mode actually enforced (configured, possibly raised by spiking).
    #[must_use]
    pub fn effective_mode(&self) -> ApprovalMode {
        if self.spiked {
            self.configured.max(ApprovalMode::Ask)
        } else {
            self.configured
        }
    }

    /// Whether the low-confidence override fired.
    #[must_use]
    pub fn is_spiked(&self) -> bool {
        self.spiked
    }

    /// Record that the run's one plan-stage confirmation was granted.
    pub fn record_plan_approval(&mut self) {
        self.plan_approved = true;
    }

    /// Decide what to do with an action of the given risk class.
    #[must_use]
    pub fn decide(&self, risk: RiskClass) -> ApprovalDecision {
        match (self.effective_mode(), risk) {
            (ApprovalMode::Auto, _) => ApprovalDecision::Execute,
            (ApprovalMode::Ask, RiskClass::Low) => ApprovalDecision::Execute,
            (ApprovalMode::Ask, RiskClass::High) => {
                if self.plan_approved {
                    ApprovalDecision::Execute
                } else {
                    ApprovalDecision::Prompt
                }
            }
            (ApprovalMode::Paranoid, _) => ApprovalDecision::Prompt,
        }
    }
}
