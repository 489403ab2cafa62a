mod options;

pub use options::*;

use crate::error::Result;
use crate::runner::Objective;
use crate::runner::Reporter;
use crate::runner::Runner;
use crate::space::Params;
use crate::space::Space;
use crate::space::SpaceFn;
use crate::store::Memory;
use crate::store::Store;
use crate::study::StudyStatus;
use crate::telemetry::Logging;
use crate::telemetry::Telemetry;
use crate::Score;
use serde::Serialize;
use std::sync::Arc;

/// what an optimization run hands back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub study_id: String,
    pub best_trial_id: Option<String>,
    pub best_value: Option<Score>,
    pub best_params: Option<Params>,
    pub n_trials: usize,
    pub status: StudyStatus,
}

/// the library facade: evaluate `objective` over `space` under
/// `options` and return the best configuration found. never panics
/// on objective failures; returns a structured error only for
/// configuration, store or sampler-contract problems.
pub async fn optimize<F>(objective: F, space: Space, options: Options) -> Result<Outcome>
where
    F: Fn(&Params, &Reporter) -> anyhow::Result<Score> + Send + Sync + 'static,
{
    optimize_with(objective, space.constant(), options).await
}

/// same entry point with a full search-space descriptor, for
/// conditional spaces that vary by trial index.
pub async fn optimize_with<F>(objective: F, space: SpaceFn, options: Options) -> Result<Outcome>
where
    F: Fn(&Params, &Reporter) -> anyhow::Result<Score> + Send + Sync + 'static,
{
    if options.logging {
        crate::init();
    }
    let objective: Objective = Arc::new(objective);
    let store: Arc<dyn Store> = match &options.storage {
        Storage::Memory => Arc::new(Memory::new()),
        Storage::Injected(store) => store.clone(),
        #[cfg(feature = "durable")]
        Storage::Durable => {
            let durable = crate::store::Durable::connect().await;
            Arc::new(durable)
        }
        #[cfg(not(feature = "durable"))]
        Storage::Durable => {
            return Err(crate::Error::InvalidConfig(
                "durable storage requires the \"durable\" feature".into(),
            ))
        }
    };
    let telemetry: Arc<dyn Telemetry> = options
        .telemetry
        .clone()
        .unwrap_or_else(|| Arc::new(Logging));
    Runner::new(store, telemetry, objective, space, options)
        .run()
        .await
}
