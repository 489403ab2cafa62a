use super::study_stats;
use crate::error::Error;
use crate::error::Result;
use crate::store::Store;
use crate::study::Filter;

/// the study record, every trial, and the summary statistics as one
/// UTF-8 JSON document.
pub async fn to_json(store: &dyn Store, study_id: &str) -> Result<String> {
    let study = store
        .get_study(study_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("study {}", study_id)))?;
    let trials = store.list_trials(study_id, Filter::all()).await?;
    let stats = study_stats(store, study_id).await?;
    let document = serde_json::json!({
        "study": study,
        "trials": trials,
        "stats": stats,
    });
    serde_json::to_string_pretty(&document)
        .map_err(|e| Error::StoreUnavailable(format!("serialize study {}: {}", study_id, e)))
}
