//! Pipeline state machine
//!
//! States advance strictly forward: `Pending`, one running state per stage,
//! then a terminal state. There are no retries and no re-entrant transitions.

use crate::error::StateMachineError;
use crate::types::StageKind;
use serde::{Deserialize, Serialize};

/// Lifecycle state of one analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Created, not yet started
    Pending,
    /// Stage 1 running
    Gathering,
    /// Stage 2 running
    Analyzing,
    /// Stage 3 running
    AssessingRisk,
    /// Stage 4 running
    Deciding,
    /// Aggregate compiled
    Completed,
    /// Orchestration-level failure
    Failed,
    /// Stopped by cancellation
    Cancelled,
}

impl PipelineState {
    /// Advisory progress percentage for pollers
    #[inline]
    #[must_use]
    pub fn progress_percent(self) -> u8 {
        match self {
            PipelineState::Pending | PipelineState::Failed | PipelineState::Cancelled => 0,
            PipelineState::Gathering => 25,
            PipelineState::Analyzing => 50,
            PipelineState::AssessingRisk => 75,
            PipelineState::Deciding => 90,
            PipelineState::Completed => 100,
        }
    }

    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Completed | PipelineState::Failed | PipelineState::Cancelled
        )
    }

    /// Stage running in this state, if any
    #[must_use]
    pub fn running_stage(self) -> Option<StageKind> {
        match self {
            PipelineState::Gathering => Some(StageKind::Gather),
            PipelineState::Analyzing => Some(StageKind::Analyze),
            PipelineState::AssessingRisk => Some(StageKind::AssessRisk),
            PipelineState::Deciding => Some(StageKind::Decide),
            _ => None,
        }
    }
}

/// Validates a state transition.
pub fn validate_transition(from: PipelineState, to: PipelineState) -> Result<(), StateMachineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: PipelineState) -> Vec<PipelineState> {
    use PipelineState::*;
    match from {
        Pending => vec![Gathering, Failed, Cancelled],
        Gathering => vec![Analyzing, Failed, Cancelled],
        Analyzing => vec![AssessingRisk, Failed, Cancelled],
        AssessingRisk => vec![Deciding, Failed, Cancelled],
        Deciding => vec![Completed, Failed, Cancelled],
        Completed | Failed | Cancelled => vec![],
    }
}

fn allowed(from: PipelineState, to: PipelineState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
