//! Saga and step state machines.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The status of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Started ──► InProgress ──┬──► Completed
///    │            ▲        └──► Failed ──► Compensating ──► Compensated
///    │            └── retry ──────┘
///    └──────────────────────────────────────► Failed
///
/// any non-terminal state ──► Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Saga has been created but execution has not begun.
    #[default]
    Started,

    /// Steps are being executed.
    InProgress,

    /// Every step completed or was skipped (terminal state).
    Completed,

    /// A step failed; compensation may still be required.
    Failed,

    /// Completed steps are being undone.
    Compensating,

    /// Every compensable step has been undone (terminal state).
    Compensated,

    /// Stopped by an operator (terminal state).
    Aborted,
}

impl SagaStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [SagaStatus; 7] = [
        SagaStatus::Started,
        SagaStatus::InProgress,
        SagaStatus::Completed,
        SagaStatus::Failed,
        SagaStatus::Compensating,
        SagaStatus::Compensated,
        SagaStatus::Aborted,
    ];

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Compensated | SagaStatus::Aborted
        )
    }

    /// Returns true if a saga in this status may move to `target`.
    pub fn can_transition_to(&self, target: SagaStatus) -> bool {
        use SagaStatus::*;

        match self {
            Started => matches!(target, InProgress | Failed | Aborted),
            InProgress => matches!(target, Completed | Failed | Aborted),
            Failed => matches!(target, Compensating | InProgress | Aborted),
            Compensating => matches!(target, Compensated | Aborted),
            Completed | Compensated | Aborted => false,
        }
    }

    /// Returns the status name as stored and exposed externally.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Started => "STARTED",
            SagaStatus::InProgress => "IN_PROGRESS",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Failed => "FAILED",
            SagaStatus::Compensating => "COMPENSATING",
            SagaStatus::Compensated => "COMPENSATED",
            SagaStatus::Aborted => "ABORTED",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SagaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SagaStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown saga status: {s}"))
    }
}

/// The status of a single saga step.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Executing ──┬──► Completed ──► Compensating ──► Compensated
///    ▲      │                │         ▲              │
///    │      └──► Skipped     │         └──────────────┘ (attempt failed)
///    └──── retry ◄── Failed ◄┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Waiting to be executed.
    #[default]
    Pending,

    /// The remote call is in flight.
    Executing,

    /// The remote call succeeded.
    Completed,

    /// The remote call failed.
    Failed,

    /// The compensation action is in flight.
    Compensating,

    /// The step's effect has been undone.
    Compensated,

    /// The step was intentionally not executed.
    Skipped,
}

impl StepStatus {
    /// Returns true if the step has reached a final outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Compensated | StepStatus::Skipped
        )
    }

    /// Returns true if the step counts as done for saga completion.
    pub fn is_forward_success(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }

    /// Returns true if a step in this status may move to `target`.
    pub fn can_transition_to(&self, target: StepStatus) -> bool {
        use StepStatus::*;

        match self {
            Pending => matches!(target, Executing | Skipped),
            Executing => matches!(target, Completed | Failed),
            Completed => matches!(target, Compensating),
            Failed => matches!(target, Pending),
            Compensating => matches!(target, Compensated | Completed),
            Compensated | Skipped => false,
        }
    }

    /// Returns the status name as stored and exposed externally.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Executing => "EXECUTING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Compensating => "COMPENSATING",
            StepStatus::Compensated => "COMPENSATED",
            StepStatus::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
