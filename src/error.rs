use crate::study::StudyStatus;
use crate::study::TrialStatus;

pub type Result<T> = std::result::Result<T, Error>;

/// closed error taxonomy. everything fallible in the crate
/// speaks this language; user objectives speak `anyhow` and are
/// folded into `ObjectiveFailed` at the trial boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("invalid search space: {0}")]
    InvalidSearchSpace(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("objective failed: {0}")]
    ObjectiveFailed(String),
    #[error("pruned at step {0}")]
    Pruned(usize),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("cancelled")]
    Cancelled,
    #[error("timeout")]
    Timeout,
}

impl Error {
    pub fn study_transition(id: &str, from: StudyStatus, to: StudyStatus) -> Self {
        Self::InvalidTransition(format!("study {} cannot move {} -> {}", id, from, to))
    }
    pub fn trial_transition(id: &str, from: TrialStatus, to: TrialStatus) -> Self {
        Self::InvalidTransition(format!("trial {} cannot move {} -> {}", id, from, to))
    }

    /// trial-local errors terminate one trial; everything else
    /// escalates to the study loop.
    pub fn is_trial_local(&self) -> bool {
        matches!(
            self,
            Self::Pruned(_) | Self::ObjectiveFailed(_) | Self::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_local_errors_stay_local() {
        assert!(Error::Pruned(3).is_trial_local());
        assert!(Error::ObjectiveFailed("nan".into()).is_trial_local());
        assert!(!Error::StoreUnavailable("io".into()).is_trial_local());
        assert!(!Error::Timeout.is_trial_local());
    }
}
