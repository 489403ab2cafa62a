use crate::error::Error;
use crate::error::Result;
use serde::Deserialize;
use serde::Serialize;

/// study lifecycle. pending -> running -> {completed, failed,
/// cancelled}; running pauses and resumes; cancellation is always
/// reachable; repeating the current status is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudyStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl StudyStatus {
    pub fn permits(&self, next: StudyStatus) -> bool {
        use StudyStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (_, Cancelled) => true,
            (Pending, Running) => true,
            (Running, Paused) => true,
            (Running, Completed) => true,
            (Running, Failed) => true,
            (Paused, Running) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::InvalidConfig(format!(
                "unknown study status {:?}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for StudyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// trial lifecycle: running settles into exactly one terminal state
/// and never moves again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    #[default]
    Running,
    Completed,
    Pruned,
    Failed,
}

impl TrialStatus {
    pub fn permits(&self, next: TrialStatus) -> bool {
        match (self, next) {
            (a, b) if *a == b => true,
            (Self::Running, _) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// may a final score sit on a trial in this state?
    pub fn scoreable(&self) -> bool {
        matches!(self, Self::Completed | Self::Pruned)
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "pruned" => Ok(Self::Pruned),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidConfig(format!(
                "unknown trial status {:?}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Pruned => "pruned",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn study_transitions_follow_the_table() {
        use StudyStatus::*;
        assert!(Pending.permits(Running));
        assert!(Running.permits(Completed));
        assert!(Running.permits(Failed));
        assert!(Running.permits(Paused));
        assert!(Paused.permits(Running));
        assert!(!Pending.permits(Completed));
        assert!(!Completed.permits(Running));
        assert!(!Failed.permits(Completed));
    }

    #[test]
    fn cancellation_is_always_reachable() {
        use StudyStatus::*;
        for status in [Pending, Running, Paused, Completed, Failed, Cancelled] {
            assert!(status.permits(Cancelled));
        }
    }

    #[test]
    fn same_status_is_idempotent() {
        use StudyStatus::*;
        for status in [Pending, Running, Paused, Completed, Failed, Cancelled] {
            assert!(status.permits(status));
        }
    }

    #[test]
    fn trial_status_is_monotone() {
        use TrialStatus::*;
        assert!(Running.permits(Completed));
        assert!(Running.permits(Pruned));
        assert!(Running.permits(Failed));
        assert!(!Completed.permits(Running));
        assert!(!Completed.permits(Pruned));
        assert!(!Pruned.permits(Failed));
        assert!(!Failed.permits(Completed));
    }

    #[test]
    fn only_completed_and_pruned_carry_scores() {
        use TrialStatus::*;
        assert!(Completed.scoreable());
        assert!(Pruned.scoreable());
        assert!(!Running.scoreable());
        assert!(!Failed.scoreable());
    }
}
