use crate::error::Error;
use crate::error::Result;
use crate::math;
use crate::store::Store;
use crate::study::Filter;
use crate::study::TrialStatus;
use crate::Score;
use serde::Serialize;

/// summary statistics over a study's completed values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub n_trials: usize,
    pub n_completed: usize,
    pub n_pruned: usize,
    pub best_value: Option<Score>,
    pub mean_value: Option<Score>,
    pub std_value: Option<Score>,
    pub min_value: Option<Score>,
    pub max_value: Option<Score>,
}

pub async fn study_stats(store: &dyn Store, study_id: &str) -> Result<Stats> {
    let study = store
        .get_study(study_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("study {}", study_id)))?;
    let trials = store.list_trials(study_id, Filter::all()).await?;
    let values = trials
        .iter()
        .filter(|t| t.status == TrialStatus::Completed)
        .filter_map(|t| t.finite())
        .collect::<Vec<_>>();
    let best = values
        .iter()
        .copied()
        .reduce(|a, b| if study.goal.better(b, a) { b } else { a });
    Ok(Stats {
        n_trials: trials.len(),
        n_completed: trials
            .iter()
            .filter(|t| t.status == TrialStatus::Completed)
            .count(),
        n_pruned: trials
            .iter()
            .filter(|t| t.status == TrialStatus::Pruned)
            .count(),
        best_value: best,
        mean_value: (!values.is_empty()).then(|| math::mean(&values)),
        std_value: (!values.is_empty()).then(|| math::std(&values)),
        min_value: values.iter().copied().reduce(f64::min),
        max_value: values.iter().copied().reduce(f64::max),
    })
}
