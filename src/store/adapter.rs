use crate::error::Result;
use crate::study::Filter;
use crate::study::Patch;
use crate::study::Study;
use crate::study::StudyStatus;
use crate::study::Trial;
use crate::study::TrialStatus;
use crate::Score;
use chrono::Utc;

/// the one store behaviour. both backends implement exactly this
/// contract; everything above (samplers, pruners, executor, export)
/// sees only `dyn Store`.
///
/// writes are acknowledged: a successful return means the record is
/// durable (durable backend) or visible to every subsequent read
/// (in-memory backend).
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// idempotent upsert keyed by study id. preserves `created_at`
    /// on re-put, bumps `updated_at`.
    async fn put_study(&self, study: &Study) -> Result<()>;
    async fn get_study(&self, id: &str) -> Result<Option<Study>>;
    /// enforces the study transition table.
    async fn set_study_status(&self, id: &str, status: StudyStatus) -> Result<()>;
    async fn list_studies(&self) -> Result<Vec<Study>>;
    /// cascades to this study's trials and observations, nothing
    /// else; idempotent.
    async fn delete_study(&self, id: &str) -> Result<()>;

    /// stamps the study-scoped trial number and returns the trial id.
    async fn add_trial(&self, study_id: &str, trial: Trial) -> Result<String>;
    /// scoped lookup: never resolves a trial through another study.
    async fn fetch_trial(&self, study_id: &str, trial_id: &str) -> Result<Option<Trial>>;
    /// ordered by `started_at` ascending, trial number as tiebreak.
    async fn list_trials(&self, study_id: &str, filter: Filter) -> Result<Vec<Trial>>;
    async fn update_trial(&self, study_id: &str, trial_id: &str, patch: Patch) -> Result<()>;

    async fn record_observation(
        &self,
        study_id: &str,
        trial_id: &str,
        bracket: usize,
        rung: usize,
        value: Score,
    ) -> Result<()>;
    async fn observations_at_rung(
        &self,
        study_id: &str,
        bracket: usize,
        rung: usize,
    ) -> Result<Vec<(String, Score)>>;

    async fn health_check(&self) -> Result<()>;

    // state-machine wrappers

    async fn finish_trial(&self, study_id: &str, trial_id: &str, value: Score) -> Result<()> {
        let patch = Patch {
            status: Some(TrialStatus::Completed),
            value: Some(value),
            completed_at: Some(Utc::now()),
            ..Patch::default()
        };
        self.update_trial(study_id, trial_id, patch).await
    }

    async fn fail_trial(&self, study_id: &str, trial_id: &str, error: &str) -> Result<()> {
        let patch = Patch {
            status: Some(TrialStatus::Failed),
            error: Some(error.to_string()),
            completed_at: Some(Utc::now()),
            ..Patch::default()
        };
        self.update_trial(study_id, trial_id, patch).await
    }

    async fn prune_trial(
        &self,
        study_id: &str,
        trial_id: &str,
        value: Option<Score>,
    ) -> Result<()> {
        let patch = Patch {
            status: Some(TrialStatus::Pruned),
            value,
            completed_at: Some(Utc::now()),
            ..Patch::default()
        };
        self.update_trial(study_id, trial_id, patch).await
    }
}
