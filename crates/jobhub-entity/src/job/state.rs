//! Job state and priority enumerations, and the legal transition matrix.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be leased by a worker.
    Pending,
    /// Held under a lease, not yet executing.
    Leased,
    /// Currently being executed by the lease holder.
    Running,
    /// Successfully completed.
    Completed,
    /// Terminally failed by operator action.
    Failed,
    /// Failed an attempt; waiting out the backoff delay.
    Retrying,
    /// Exhausted its retry budget or failed permanently. Retained for
    /// inspection, never auto-retried.
    DeadLettered,
    /// Cancelled before execution, or cooperatively during it.
    Cancelled,
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::DeadLettered | Self::Cancelled
        )
    }

    /// Whether a job in this state currently holds a lease.
    pub fn is_leased(&self) -> bool {
        matches!(self, Self::Leased | Self::Running)
    }

    /// Return the state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Leased => "leased",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::DeadLettered => "dead_lettered",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Check whether a state transition is legal.
///
/// Transitions are monotonic along the job state machine; terminal
/// states have no successors. Stores reject illegal transitions before
/// attempting the compare-and-swap.
pub fn valid_transition(from: JobState, to: JobState) -> bool {
    use JobState::*;
    matches!(
        (from, to),
        (Pending, Leased)
            | (Pending, Cancelled)
            | (Leased, Running)
            | (Leased, Pending)
            | (Leased, DeadLettered)
            | (Leased, Cancelled)
            | (Running, Completed)
            | (Running, Retrying)
            | (Running, DeadLettered)
            | (Running, Failed)
            | (Running, Pending)
            | (Running, Cancelled)
            | (Retrying, Pending)
            | (Retrying, Failed)
            | (Retrying, Cancelled)
    )
}

/// Priority level for a background job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "job_priority", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    /// Low priority (leased last).
    Low,
    /// Normal priority (default).
    #[default]
    Normal,
    /// High priority.
    High,
    /// Critical priority (leased first).
    Critical,
}

impl JobPriority {
    /// Return the numeric priority (higher = more urgent).
    pub fn numeric_priority(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    /// Return the priority as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_successors() {
        let all = [
            JobState::Pending,
            JobState::Leased,
            JobState::Running,
            JobState::Completed,
            JobState::Failed,
            JobState::Retrying,
            JobState::DeadLettered,
            JobState::Cancelled,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in &all {
                assert!(
                    !valid_transition(*from, *to),
                    "{from} -> {to} should be illegal"
                );
            }
        }
    }

    #[test]
    fn lease_lifecycle_transitions() {
        assert!(valid_transition(JobState::Pending, JobState::Leased));
        assert!(valid_transition(JobState::Leased, JobState::Running));
        assert!(valid_transition(JobState::Running, JobState::Completed));
        assert!(valid_transition(JobState::Running, JobState::Retrying));
        assert!(valid_transition(JobState::Retrying, JobState::Pending));
        // Reclaim paths.
        assert!(valid_transition(JobState::Leased, JobState::Pending));
        assert!(valid_transition(JobState::Running, JobState::Pending));
    }

    #[test]
    fn no_transition_skips_the_lease() {
        assert!(!valid_transition(JobState::Pending, JobState::Running));
        assert!(!valid_transition(JobState::Pending, JobState::Completed));
        assert!(!valid_transition(JobState::Retrying, JobState::Running));
    }

    #[test]
    fn priority_ordering_is_numeric() {
        assert!(JobPriority::Critical.numeric_priority() > JobPriority::High.numeric_priority());
        assert!(JobPriority::High.numeric_priority() > JobPriority::Normal.numeric_priority());
        assert!(JobPriority::Normal.numeric_priority() > JobPriority::Low.numeric_priority());
    }
}
