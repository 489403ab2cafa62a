use super::Store;
use crate::error::Error;
use crate::error::Result;
use crate::study::Filter;
use crate::study::Observation;
use crate::study::Patch;
use crate::study::Study;
use crate::study::StudyStatus;
use crate::study::Trial;
use crate::Score;
use chrono::Utc;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::RwLock;

/// in-memory backend. every mutation funnels through the single
/// writer lock; reads take snapshots under the reader lock, so a
/// successful write is visible to every subsequent read.
#[derive(Default)]
pub struct Memory {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    studies: HashMap<String, Shelf>,
}

/// one study's rows. observations are keyed (bracket, rung) and
/// deduplicated per trial, which is the uniqueness constraint of the
/// durable schema expressed in map form.
struct Shelf {
    study: Study,
    counter: usize,
    trials: BTreeMap<String, Trial>,
    observations: BTreeMap<(usize, usize), Vec<Observation>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for Memory {
    async fn put_study(&self, study: &Study) -> Result<()> {
        let mut inner = self.inner.write().expect("store lock");
        if let Some(shelf) = inner.studies.get_mut(&study.id) {
            let created_at = shelf.study.created_at;
            shelf.study = study.clone();
            shelf.study.created_at = created_at;
            shelf.study.updated_at = Utc::now();
            return Ok(());
        }
        inner.studies.insert(
            study.id.clone(),
            Shelf {
                study: study.clone(),
                counter: 0,
                trials: BTreeMap::new(),
                observations: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn get_study(&self, id: &str) -> Result<Option<Study>> {
        let inner = self.inner.read().expect("store lock");
        Ok(inner.studies.get(id).map(|shelf| shelf.study.clone()))
    }

    async fn set_study_status(&self, id: &str, status: StudyStatus) -> Result<()> {
        let mut inner = self.inner.write().expect("store lock");
        let shelf = inner
            .studies
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("study {}", id)))?;
        if !shelf.study.status.permits(status) {
            return Err(Error::study_transition(id, shelf.study.status, status));
        }
        shelf.study.status = status;
        shelf.study.updated_at = Utc::now();
        Ok(())
    }

    async fn list_studies(&self) -> Result<Vec<Study>> {
        let inner = self.inner.read().expect("store lock");
        Ok(inner
            .studies
            .values()
            .map(|shelf| shelf.study.clone())
            .collect())
    }

    async fn delete_study(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("store lock");
        inner.studies.remove(id);
        Ok(())
    }

    async fn add_trial(&self, study_id: &str, mut trial: Trial) -> Result<String> {
        let mut inner = self.inner.write().expect("store lock");
        let shelf = inner
            .studies
            .get_mut(study_id)
            .ok_or_else(|| Error::NotFound(format!("study {}", study_id)))?;
        trial.number = shelf.counter;
        shelf.counter += 1;
        let id = trial.id.clone();
        shelf.trials.insert(id.clone(), trial);
        Ok(id)
    }

    async fn fetch_trial(&self, study_id: &str, trial_id: &str) -> Result<Option<Trial>> {
        let inner = self.inner.read().expect("store lock");
        Ok(inner
            .studies
            .get(study_id)
            .and_then(|shelf| shelf.trials.get(trial_id))
            .cloned())
    }

    async fn list_trials(&self, study_id: &str, filter: Filter) -> Result<Vec<Trial>> {
        let inner = self.inner.read().expect("store lock");
        let shelf = inner
            .studies
            .get(study_id)
            .ok_or_else(|| Error::NotFound(format!("study {}", study_id)))?;
        let mut trials = shelf
            .trials
            .values()
            .filter(|trial| filter.matches(trial))
            .cloned()
            .collect::<Vec<_>>();
        trials.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then(a.number.cmp(&b.number))
        });
        Ok(trials)
    }

    async fn update_trial(&self, study_id: &str, trial_id: &str, patch: Patch) -> Result<()> {
        let mut inner = self.inner.write().expect("store lock");
        let shelf = inner
            .studies
            .get_mut(study_id)
            .ok_or_else(|| Error::NotFound(format!("study {}", study_id)))?;
        let trial = shelf
            .trials
            .get_mut(trial_id)
            .ok_or_else(|| Error::NotFound(format!("trial {}", trial_id)))?;
        patch.apply(trial)
    }

    async fn record_observation(
        &self,
        study_id: &str,
        trial_id: &str,
        bracket: usize,
        rung: usize,
        value: Score,
    ) -> Result<()> {
        let mut inner = self.inner.write().expect("store lock");
        let shelf = inner
            .studies
            .get_mut(study_id)
            .ok_or_else(|| Error::NotFound(format!("study {}", study_id)))?;
        if !shelf.trials.contains_key(trial_id) {
            return Err(Error::NotFound(format!("trial {}", trial_id)));
        }
        let rows = shelf.observations.entry((bracket, rung)).or_default();
        match rows.iter_mut().find(|row| row.trial_id == trial_id) {
            Some(row) => row.value = value,
            None => rows.push(Observation::new(trial_id, bracket, rung, value)),
        }
        Ok(())
    }

    async fn observations_at_rung(
        &self,
        study_id: &str,
        bracket: usize,
        rung: usize,
    ) -> Result<Vec<(String, Score)>> {
        let inner = self.inner.read().expect("store lock");
        let shelf = inner
            .studies
            .get(study_id)
            .ok_or_else(|| Error::NotFound(format!("study {}", study_id)))?;
        Ok(shelf
            .observations
            .get(&(bracket, rung))
            .map(|rows| {
                rows.iter()
                    .map(|row| (row.trial_id.clone(), row.value))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Params;
    use crate::study::Goal;
    use crate::study::TrialStatus;
    use crate::Space;

    fn study(id: &str) -> Study {
        Study::new(id, Goal::Minimize, Space::new().uniform("x", 0., 1.), 42)
    }

    fn trial() -> Trial {
        Trial::new(Params::new(), 7)
    }

    #[tokio::test]
    async fn put_study_preserves_created_at() {
        let store = Memory::new();
        let mut record = study("a");
        store.put_study(&record).await.unwrap();
        let created = store.get_study("a").await.unwrap().unwrap().created_at;
        record.max_trials = 99;
        store.put_study(&record).await.unwrap();
        let after = store.get_study("a").await.unwrap().unwrap();
        assert_eq!(after.created_at, created);
        assert_eq!(after.max_trials, 99);
        assert!(after.updated_at >= created);
    }

    #[tokio::test]
    async fn trials_are_scoped_to_their_study() {
        let store = Memory::new();
        store.put_study(&study("a")).await.unwrap();
        store.put_study(&study("b")).await.unwrap();
        let id = store.add_trial("a", trial()).await.unwrap();
        assert!(store.fetch_trial("a", &id).await.unwrap().is_some());
        assert!(store.fetch_trial("b", &id).await.unwrap().is_none());
        assert_eq!(store.list_trials("a", Filter::all()).await.unwrap().len(), 1);
        assert_eq!(store.list_trials("b", Filter::all()).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn delete_study_leaves_other_studies_alone() {
        let store = Memory::new();
        store.put_study(&study("a")).await.unwrap();
        store.put_study(&study("b")).await.unwrap();
        let ta = store.add_trial("a", trial()).await.unwrap();
        let tb = store.add_trial("b", trial()).await.unwrap();
        store.record_observation("b", &tb, 0, 1, 0.5).await.unwrap();
        store.delete_study("a").await.unwrap();
        assert!(store.get_study("a").await.unwrap().is_none());
        assert!(store.fetch_trial("a", &ta).await.unwrap().is_none());
        // study b is untouched
        assert!(store.fetch_trial("b", &tb).await.unwrap().is_some());
        assert_eq!(store.list_trials("b", Filter::all()).await.unwrap().len(), 1);
        assert_eq!(
            store.observations_at_rung("b", 0, 1).await.unwrap(),
            vec![(tb, 0.5)]
        );
        // idempotent
        store.delete_study("a").await.unwrap();
    }

    #[tokio::test]
    async fn trial_numbers_count_up() {
        let store = Memory::new();
        store.put_study(&study("a")).await.unwrap();
        for want in 0..4 {
            let id = store.add_trial("a", trial()).await.unwrap();
            let got = store.fetch_trial("a", &id).await.unwrap().unwrap();
            assert_eq!(got.number, want);
        }
    }

    #[tokio::test]
    async fn add_trial_requires_the_study() {
        let store = Memory::new();
        assert!(matches!(
            store.add_trial("ghost", trial()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn status_wrappers_enforce_the_state_machine() {
        let store = Memory::new();
        store.put_study(&study("a")).await.unwrap();
        let id = store.add_trial("a", trial()).await.unwrap();
        store.finish_trial("a", &id, 0.25).await.unwrap();
        let done = store.fetch_trial("a", &id).await.unwrap().unwrap();
        assert_eq!(done.status, TrialStatus::Completed);
        assert_eq!(done.value, Some(0.25));
        assert!(done.completed_at.is_some());
        // terminal means terminal
        assert!(store.fail_trial("a", &id, "late").await.is_err());
        assert!(store.prune_trial("a", &id, None).await.is_err());
    }

    #[tokio::test]
    async fn study_status_rejects_illegal_jumps() {
        let store = Memory::new();
        store.put_study(&study("a")).await.unwrap();
        assert!(matches!(
            store.set_study_status("a", StudyStatus::Completed).await,
            Err(Error::InvalidTransition(_))
        ));
        store.set_study_status("a", StudyStatus::Running).await.unwrap();
        store.set_study_status("a", StudyStatus::Completed).await.unwrap();
        assert!(matches!(
            store.set_study_status("ghost", StudyStatus::Running).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn acknowledged_observations_read_back() {
        let store = Memory::new();
        store.put_study(&study("a")).await.unwrap();
        let id = store.add_trial("a", trial()).await.unwrap();
        store.record_observation("a", &id, 1, 2, 0.75).await.unwrap();
        let rows = store.observations_at_rung("a", 1, 2).await.unwrap();
        assert_eq!(rows, vec![(id.clone(), 0.75)]);
        // same key overwrites rather than duplicating
        store.record_observation("a", &id, 1, 2, 0.5).await.unwrap();
        let rows = store.observations_at_rung("a", 1, 2).await.unwrap();
        assert_eq!(rows, vec![(id, 0.5)]);
    }

    #[tokio::test]
    async fn observations_require_the_trial() {
        let store = Memory::new();
        store.put_study(&study("a")).await.unwrap();
        assert!(matches!(
            store.record_observation("a", "ghost", 0, 0, 1.).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listing_orders_by_start_time() {
        let store = Memory::new();
        store.put_study(&study("a")).await.unwrap();
        let mut ids = vec![];
        for _ in 0..5 {
            ids.push(store.add_trial("a", trial()).await.unwrap());
        }
        let listed = store.list_trials("a", Filter::all()).await.unwrap();
        let numbers = listed.iter().map(|t| t.number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn filters_narrow_the_listing() {
        let store = Memory::new();
        store.put_study(&study("a")).await.unwrap();
        let mut with_bracket = trial();
        with_bracket.bracket = 2;
        let t0 = store.add_trial("a", with_bracket).await.unwrap();
        let t1 = store.add_trial("a", trial()).await.unwrap();
        store.finish_trial("a", &t1, 1.).await.unwrap();
        let finished = store.list_trials("a", Filter::finished()).await.unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].id, t1);
        let bracketed = store.list_trials("a", Filter::bracket(2)).await.unwrap();
        assert_eq!(bracketed.len(), 1);
        assert_eq!(bracketed[0].id, t0);
    }
}
