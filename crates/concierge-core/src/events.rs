use serde::{Deserialize, Serialize};

use crate::capability::CapabilityError;
use crate::conversation::TerminationReason;
use crate::ids::{CallId, RunId};

/// Lifecycle events emitted by the orchestration loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    #[serde(rename = "step_start")]
    StepStart { run_id: RunId, step: u32 },

    #[serde(rename = "intent_analyzed")]
    IntentAnalyzed {
        run_id: RunId,
        categories: Vec<String>,
        confidence: f64,
    },

    #[serde(rename = "capability_start")]
    CapabilityStart {
        run_id: RunId,
        call_id: CallId,
        name: String,
    },

    #[serde(rename = "capability_end")]
    CapabilityEnd {
        run_id: RunId,
        call_id: CallId,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<CapabilityError>,
        duration_ms: u64,
    },

    #[serde(rename = "budget_exhausted")]
    BudgetExhausted { run_id: RunId, step: u32 },

    #[serde(rename = "run_complete")]
    RunComplete {
        run_id: RunId,
        reason: TerminationReason,
        steps: u32,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::StepStart { run_id, .. }
            | Self::IntentAnalyzed { run_id, .. }
            | Self::CapabilityStart { run_id, .. }
            | Self::CapabilityEnd { run_id, .. }
            | Self::BudgetExhausted { run_id, .. }
            | Self::RunComplete { run_id, .. } => run_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StepStart { .. } => "step_start",
            Self::IntentAnalyzed { .. } => "intent_analyzed",
            Self::CapabilityStart { .. } => "capability_start",
            Self::CapabilityEnd { .. } => "capability_end",
            Self::BudgetExhausted { .. } => "budget_exhausted",
            Self::RunComplete { .. } => "run_complete",
        }
    }
}
