use super::retried;
use super::Objective;
use super::Worker;
use crate::error::Error;
use crate::error::Result;
use crate::optimize::Options;
use crate::optimize::Outcome;
use crate::pruner;
use crate::pruner::Pruner;
use crate::rng;
use crate::rng::Stream;
use crate::sampler;
use crate::sampler::Sampler;
use crate::space::SpaceFn;
use crate::store::Store;
use crate::study::Filter;
use crate::study::Study;
use crate::study::StudyStatus;
use crate::study::Trial;
use crate::study::TrialStatus;
use crate::telemetry;
use crate::telemetry::Event;
use crate::telemetry::Telemetry;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::watch;

/// cooperative cancellation handle for a running study.
#[derive(Clone)]
pub struct Canceller(Arc<watch::Sender<bool>>);

impl Canceller {
    pub fn cancel(&self) {
        // send_replace so the flag sticks even with no worker
        // subscribed at this instant
        self.0.send_replace(true);
    }
}

/// the study runner: owns the trial loop, is the only caller of
/// `sampler.next` and the only allocator of trial indices. objective
/// evaluations fan out onto blocking workers up to the configured
/// parallelism; everything the workers learn flows back through the
/// store.
pub struct Runner {
    store: Arc<dyn Store>,
    telemetry: Arc<dyn Telemetry>,
    objective: Objective,
    space: SpaceFn,
    options: Options,
    cancel: Arc<watch::Sender<bool>>,
}

impl Runner {
    pub fn new(
        store: Arc<dyn Store>,
        telemetry: Arc<dyn Telemetry>,
        objective: Objective,
        space: SpaceFn,
        options: Options,
    ) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            store,
            telemetry,
            objective,
            space,
            options,
            cancel: Arc::new(cancel),
        }
    }

    pub fn canceller(&self) -> Canceller {
        Canceller(self.cancel.clone())
    }

    pub async fn run(mut self) -> Result<Outcome> {
        self.options.validate()?;
        (self.space)(0).validate()?;
        let goal = self.options.direction;
        let master = self.options.seed.unwrap_or_else(rng::bootstrap);
        let mut sampler: Box<dyn Sampler> = match self.options.custom_sampler.take() {
            Some(custom) => custom,
            None => sampler::build(
                &self.options.sampler,
                &self.options.sampler_opts,
                goal,
                self.options.seed,
            )?,
        };
        let pruner: Option<Arc<dyn Pruner>> = match self.options.custom_pruner.take() {
            Some(custom) => Some(Arc::from(custom)),
            None => pruner::build(&self.options.pruner, &self.options.pruner_opts)?.map(Arc::from),
        };
        let study_id = self
            .options
            .study_name
            .clone()
            .unwrap_or_else(|| format!("study-{}", uuid::Uuid::new_v4()));

        let mut study = Study::new(&study_id, goal, (self.space)(0), master);
        study.max_trials = self.options.n_trials;
        study.parallelism = self.options.parallelism;
        study.sampler = self.options.sampler.clone();
        study.sampler_opts = self.options.sampler_opts.clone();
        study.pruner = (self.options.pruner != "none").then(|| self.options.pruner.clone());
        study.pruner_opts = self.options.pruner_opts.clone();
        study.metadata = self.options.metadata.clone();
        retried(|| self.store.put_study(&study)).await?;
        retried(|| self.store.set_study_status(&study_id, StudyStatus::Running)).await?;
        let started = Instant::now();
        self.telemetry.emit(
            Event::new(telemetry::STUDY_START)
                .study(&study_id)
                .measure("max_trials", self.options.n_trials as f64)
                .measure("parallelism", self.options.parallelism as f64),
        );

        let worker = Arc::new(Worker {
            store: self.store.clone(),
            pruner: pruner.clone(),
            telemetry: self.telemetry.clone(),
            study_id: study_id.clone(),
            goal,
        });
        let deadline = self
            .options
            .timeout_ms
            .map(|ms| tokio::time::Instant::now() + Duration::from_millis(ms));
        let mut inflight = FuturesUnordered::new();
        let mut pending: Vec<(usize, Trial)> = vec![];
        let mut next_index = 0usize;
        let mut outages = 0usize;
        let mut timed_out = false;
        let mut cancelled = false;
        let mut fatal: Option<Error> = None;

        while next_index < self.options.n_trials || !inflight.is_empty() {
            if !cancelled && *self.cancel.subscribe().borrow() {
                cancelled = true;
            }
            // fill worker slots; the coordinator alone advances the
            // trial index and consults the sampler
            while fatal.is_none()
                && !timed_out
                && !cancelled
                && next_index < self.options.n_trials
                && inflight.len() < self.options.parallelism
            {
                let index = next_index;
                next_index += 1;
                let history = match retried(|| {
                    self.store.list_trials(&study_id, Filter::finished())
                })
                .await
                {
                    Ok(history) => history,
                    Err(e) => {
                        fatal = Some(e);
                        break;
                    }
                };
                let history = self.imputed(history, &pending);
                if let Err(e) = (self.space)(index).validate() {
                    fatal = Some(e);
                    break;
                }
                let ref mut stream = Stream::for_trial(master, index);
                let params = match sampler.next(&self.space, index, &history, stream) {
                    Ok(params) => params,
                    Err(e) => {
                        // sampler errors are contract violations
                        fatal = Some(e);
                        break;
                    }
                };
                self.telemetry.emit(
                    Event::new(telemetry::SAMPLER_SUGGEST)
                        .study(&study_id)
                        .measure("index", index as f64),
                );
                let mut trial = Trial::new(params.clone(), rng::derive(master, index));
                trial.bracket = pruner.as_ref().map_or(0, |p| p.bracket_of(index));
                let bracket = trial.bracket;
                let trial_id = match retried(|| self.store.add_trial(&study_id, trial.clone()))
                    .await
                {
                    Ok(id) => id,
                    Err(e) => {
                        outages += 1;
                        if outages >= crate::STORE_OUTAGE_LIMIT {
                            fatal = Some(e);
                        }
                        continue;
                    }
                };
                self.telemetry.emit(
                    Event::new(telemetry::TRIAL_START)
                        .study(&study_id)
                        .trial(&trial_id)
                        .measure("index", index as f64)
                        .measure("bracket", bracket as f64),
                );
                pending.push((index, trial));
                inflight.push(worker.clone().drive(
                    index,
                    trial_id,
                    bracket,
                    params,
                    self.objective.clone(),
                    self.cancel.subscribe(),
                ));
            }
            if fatal.is_some() || cancelled {
                // wave off every outstanding worker
                self.cancel.send_replace(true);
            }
            if inflight.is_empty() {
                break;
            }
            // wait for the next finished trial, against the study
            // deadline while it still matters
            let done = match deadline {
                Some(deadline) if !timed_out && !cancelled && fatal.is_none() => {
                    match tokio::time::timeout_at(deadline, inflight.next()).await {
                        Ok(done) => done,
                        Err(_) => {
                            timed_out = true;
                            self.cancel.send_replace(true);
                            continue;
                        }
                    }
                }
                _ => inflight.next().await,
            };
            if let Some(done) = done {
                pending.retain(|(index, _)| *index != done.index);
                match done.store_lost {
                    true => {
                        outages += 1;
                        if outages >= crate::STORE_OUTAGE_LIMIT {
                            fatal = Some(Error::StoreUnavailable(
                                "persistent store outage across trials".into(),
                            ));
                        }
                    }
                    false => outages = 0,
                }
            }
        }

        let elapsed = started.elapsed().as_secs_f64() * 1e3;
        if let Some(e) = fatal {
            let _ = self
                .store
                .set_study_status(&study_id, StudyStatus::Failed)
                .await;
            self.telemetry.emit(
                Event::new(telemetry::STUDY_STOP)
                    .study(&study_id)
                    .measure("elapsed_ms", elapsed)
                    .tag("status", StudyStatus::Failed.as_str())
                    .tag("error", &e.to_string()),
            );
            return Err(e);
        }
        let status = if cancelled {
            StudyStatus::Cancelled
        } else {
            // timeouts still complete with the best so far
            StudyStatus::Completed
        };
        if let Err(e) = retried(|| self.store.set_study_status(&study_id, status)).await {
            self.telemetry.emit(
                Event::new(telemetry::STORE_ERROR)
                    .study(&study_id)
                    .tag("error", &e.to_string()),
            );
        }
        self.telemetry.emit(
            Event::new(telemetry::STUDY_STOP)
                .study(&study_id)
                .measure("elapsed_ms", elapsed)
                .tag("status", status.as_str()),
        );
        self.outcome(&study_id, goal, status).await
    }

    /// constant-liar imputation: while proposals are in flight, feed
    /// the sampler copies that pretend they finished at the history
    /// mean, so parallel workers spread instead of clustering.
    fn imputed(&self, mut history: Vec<Trial>, pending: &[(usize, Trial)]) -> Vec<Trial> {
        if !self.options.constant_liar || pending.is_empty() {
            return history;
        }
        let finite = history.iter().filter_map(|t| t.finite()).collect::<Vec<_>>();
        if finite.is_empty() {
            return history;
        }
        let liar = crate::math::mean(&finite);
        for (_, trial) in pending {
            let mut fake = trial.clone();
            fake.status = TrialStatus::Completed;
            fake.value = Some(liar);
            history.push(fake);
        }
        history
    }

    async fn outcome(
        &self,
        study_id: &str,
        goal: crate::study::Goal,
        status: StudyStatus,
    ) -> Result<Outcome> {
        let trials = retried(|| self.store.list_trials(study_id, Filter::all()))
            .await
            .unwrap_or_default();
        let best = trials
            .iter()
            .filter(|t| t.status == TrialStatus::Completed)
            .filter(|t| t.finite().is_some())
            .reduce(|a, b| {
                if goal.better(b.finite().unwrap_or(f64::NAN), a.finite().unwrap_or(f64::NAN)) {
                    b
                } else {
                    a
                }
            });
        Ok(Outcome {
            study_id: study_id.to_string(),
            best_trial_id: best.map(|t| t.id.clone()),
            best_value: best.and_then(|t| t.finite()),
            best_params: best.map(|t| t.params.clone()),
            n_trials: trials.len(),
            status,
        })
    }
}
