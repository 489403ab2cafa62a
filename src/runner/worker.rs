use super::retried;
use super::Report;
use super::Reporter;
use super::Verdict;
use crate::error::Error;
use crate::pruner::Pruner;
use crate::space::Params;
use crate::store::Store;
use crate::study::Goal;
use crate::telemetry;
use crate::telemetry::Event;
use crate::telemetry::Telemetry;
use crate::Score;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::watch;

/// the objective callable: parameter map in, final score out.
/// intermediate values stream through the reporter.
pub type Objective = Arc<dyn Fn(&Params, &Reporter) -> anyhow::Result<Score> + Send + Sync>;

/// shared per-study context for trial execution.
pub(crate) struct Worker {
    pub store: Arc<dyn Store>,
    pub pruner: Option<Arc<dyn Pruner>>,
    pub telemetry: Arc<dyn Telemetry>,
    pub study_id: String,
    pub goal: Goal,
}

/// what one finished trial reports back to the coordinator.
pub(crate) struct Done {
    pub index: usize,
    /// the terminal write (or a retried mid-flight write) hit a
    /// store outage
    pub store_lost: bool,
}

enum End {
    Completed(Score),
    Pruned(Option<Score>),
    Failed(String),
}

impl Worker {
    /// run one trial to its terminal state: launch the objective on
    /// a blocking thread, translate every report into an
    /// acknowledged observation plus a pruner consultation, then
    /// write the terminal status. this function is the only writer
    /// of the trial's final state.
    pub async fn drive(
        self: Arc<Self>,
        index: usize,
        trial_id: String,
        bracket: usize,
        params: Params,
        objective: Objective,
        cancel: watch::Receiver<bool>,
    ) -> Done {
        let started = Instant::now();
        let (tx, mut rx) = mpsc::channel::<Report>(crate::REPORT_CHANNEL_DEPTH);
        let reporter = Reporter::new(tx, cancel);
        let handle = {
            let objective = objective.clone();
            tokio::task::spawn_blocking(move || objective(&params, &reporter))
        };
        let mut best: Option<Score> = None;
        let mut pruned_at: Option<usize> = None;
        let mut store_lost = false;
        while let Some(Report { step, value, reply }) = rx.recv().await {
            if value.is_finite() {
                best = Some(match best {
                    Some(seen) if self.goal.better(seen, value) => seen,
                    _ => value,
                });
            }
            let verdict = match self.consult(&trial_id, bracket, step, value).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    store_lost = true;
                    self.telemetry.emit(
                        Event::new(telemetry::STORE_ERROR)
                            .study(&self.study_id)
                            .trial(&trial_id)
                            .tag("error", &e.to_string()),
                    );
                    Verdict::Continue
                }
            };
            if verdict == Verdict::Prune {
                pruned_at = Some(step);
            }
            let _ = reply.send(verdict);
        }
        let end = match handle.await {
            Err(join) => End::Failed(format!("objective panicked: {}", join)),
            Ok(_) if pruned_at.is_some() => End::Pruned(best),
            Ok(Ok(score)) if score.is_finite() => End::Completed(score),
            Ok(Ok(score)) => End::Failed(format!("objective returned non-finite score {}", score)),
            Ok(Err(e)) => match e.downcast_ref::<Error>() {
                Some(Error::Pruned(_)) => End::Pruned(best),
                Some(Error::Cancelled) => End::Failed("cancelled".to_string()),
                _ => End::Failed(e.to_string()),
            },
        };
        store_lost |= self.settle(&trial_id, &end, started).await;
        Done { index, store_lost }
    }

    /// acknowledged observation write, then the pruning question.
    async fn consult(
        &self,
        trial_id: &str,
        bracket: usize,
        step: usize,
        value: Score,
    ) -> crate::Result<Verdict> {
        let rung = self.pruner.as_ref().map_or(step, |p| p.rung_of(step));
        retried(|| {
            self.store
                .record_observation(&self.study_id, trial_id, bracket, rung, value)
        })
        .await?;
        let Some(ref pruner) = self.pruner else {
            return Ok(Verdict::Continue);
        };
        let prune = pruner
            .should_prune(
                self.store.as_ref(),
                &self.study_id,
                trial_id,
                self.goal,
                bracket,
                step,
                value,
            )
            .await?;
        self.telemetry.emit(
            Event::new(telemetry::PRUNER_DECISION)
                .study(&self.study_id)
                .trial(trial_id)
                .measure("step", step as f64)
                .measure("value", value)
                .measure("prune", if prune { 1. } else { 0. }),
        );
        Ok(if prune { Verdict::Prune } else { Verdict::Continue })
    }

    /// terminal write with one retry; a stubborn store downgrades the
    /// trial to failed, best effort.
    async fn settle(&self, trial_id: &str, end: &End, started: Instant) -> bool {
        let elapsed = started.elapsed().as_secs_f64() * 1e3;
        let written = match end {
            End::Completed(score) => {
                retried(|| self.store.finish_trial(&self.study_id, trial_id, *score)).await
            }
            End::Pruned(best) => {
                retried(|| self.store.prune_trial(&self.study_id, trial_id, *best)).await
            }
            End::Failed(message) => {
                retried(|| self.store.fail_trial(&self.study_id, trial_id, message)).await
            }
        };
        let lost = written.is_err();
        if let Err(ref e) = written {
            self.telemetry.emit(
                Event::new(telemetry::STORE_ERROR)
                    .study(&self.study_id)
                    .trial(trial_id)
                    .tag("error", &e.to_string()),
            );
            let _ = self
                .store
                .fail_trial(&self.study_id, trial_id, "store unavailable")
                .await;
        }
        let event = match end {
            End::Completed(score) => Event::new(telemetry::TRIAL_COMPLETE)
                .measure("value", *score)
                .measure("elapsed_ms", elapsed),
            End::Pruned(best) => {
                let event = Event::new(telemetry::TRIAL_PRUNE).measure("elapsed_ms", elapsed);
                match best {
                    Some(best) => event.measure("value", *best),
                    None => event,
                }
            }
            End::Failed(message) => Event::new(telemetry::TRIAL_FAIL)
                .measure("elapsed_ms", elapsed)
                .tag("error", message),
        };
        self.telemetry
            .emit(event.study(&self.study_id).trial(trial_id));
        lost
    }
}
