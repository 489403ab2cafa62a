use super::Store;
use crate::error::Error;
use crate::error::Result;
use crate::study::Filter;
use crate::study::Goal;
use crate::study::Patch;
use crate::study::Study;
use crate::study::StudyStatus;
use crate::study::Trial;
use crate::study::TrialStatus;
use crate::Score;
use chrono::DateTime;
use chrono::Utc;
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tokio_postgres::Client;
use tokio_postgres::Row;

pub const STUDIES: &str = "studies";
pub const TRIALS: &str = "trials";
pub const OBSERVATIONS: &str = "observations";

/// durable backend over PostgreSQL. cascades hang off the study row,
/// so delete-study is one statement and provably study-scoped. every
/// upsert names its columns; nothing ever writes "all columns".
pub struct Durable(Arc<Client>);

impl From<Arc<Client>> for Durable {
    fn from(client: Arc<Client>) -> Self {
        Self(client)
    }
}

impl Durable {
    pub async fn connect() -> Self {
        let postgres = Self(crate::db().await);
        postgres.ensure_schema().await.expect("schema creation");
        postgres
    }

    /// lazy schema creation, safe to call on every boot.
    pub async fn ensure_schema(&self) -> Result<()> {
        #[rustfmt::skip]
        const SQL: &str = const_format::concatcp!(
            "CREATE TABLE IF NOT EXISTS ", STUDIES, " (",
                "id           TEXT PRIMARY KEY, ",
                "goal         TEXT NOT NULL, ",
                "space        TEXT NOT NULL, ",
                "max_trials   BIGINT NOT NULL, ",
                "parallelism  BIGINT NOT NULL, ",
                "seed         BIGINT NOT NULL, ",
                "sampler      TEXT NOT NULL, ",
                "sampler_opts TEXT NOT NULL, ",
                "pruner       TEXT, ",
                "pruner_opts  TEXT NOT NULL, ",
                "status       TEXT NOT NULL, ",
                "metadata     TEXT NOT NULL, ",
                "counter      BIGINT NOT NULL DEFAULT 0, ",
                "created_at   BIGINT NOT NULL, ",
                "updated_at   BIGINT NOT NULL",
            "); ",
            "CREATE TABLE IF NOT EXISTS ", TRIALS, " (",
                "study_id     TEXT NOT NULL REFERENCES ", STUDIES, "(id) ON DELETE CASCADE, ",
                "id           TEXT NOT NULL, ",
                "number       BIGINT NOT NULL, ",
                "params       TEXT NOT NULL, ",
                "status       TEXT NOT NULL, ",
                "bracket      BIGINT NOT NULL, ",
                "value        DOUBLE PRECISION, ",
                "error        TEXT, ",
                "metrics      TEXT NOT NULL, ",
                "seed         BIGINT NOT NULL, ",
                "metadata     TEXT NOT NULL, ",
                "started_at   BIGINT NOT NULL, ",
                "completed_at BIGINT, ",
                "updated_at   BIGINT NOT NULL, ",
                "PRIMARY KEY (study_id, id), ",
                "UNIQUE (study_id, number)",
            "); ",
            "CREATE TABLE IF NOT EXISTS ", OBSERVATIONS, " (",
                "study_id     TEXT NOT NULL REFERENCES ", STUDIES, "(id) ON DELETE CASCADE, ",
                "trial_id     TEXT NOT NULL, ",
                "bracket      BIGINT NOT NULL, ",
                "rung         BIGINT NOT NULL, ",
                "value        DOUBLE PRECISION NOT NULL, ",
                "created_at   BIGINT NOT NULL, ",
                "UNIQUE (study_id, trial_id, bracket, rung), ",
                "FOREIGN KEY (study_id, trial_id) ",
                    "REFERENCES ", TRIALS, "(study_id, id) ON DELETE CASCADE",
            ");"
        );
        self.0.batch_execute(SQL).await.map_err(offline)
    }
}

#[async_trait::async_trait]
impl Store for Durable {
    async fn put_study(&self, study: &Study) -> Result<()> {
        #[rustfmt::skip]
        const SQL: &str = const_format::concatcp!(
            "INSERT INTO ", STUDIES, " ",
                "(id, goal, space, max_trials, parallelism, seed, sampler, sampler_opts, ",
                 "pruner, pruner_opts, status, metadata, created_at, updated_at) ",
            "VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) ",
            "ON CONFLICT (id) DO UPDATE SET ",
                "goal         = EXCLUDED.goal, ",
                "space        = EXCLUDED.space, ",
                "max_trials   = EXCLUDED.max_trials, ",
                "parallelism  = EXCLUDED.parallelism, ",
                "seed         = EXCLUDED.seed, ",
                "sampler      = EXCLUDED.sampler, ",
                "sampler_opts = EXCLUDED.sampler_opts, ",
                "pruner       = EXCLUDED.pruner, ",
                "pruner_opts  = EXCLUDED.pruner_opts, ",
                "status       = EXCLUDED.status, ",
                "metadata     = EXCLUDED.metadata, ",
                "updated_at   = EXCLUDED.updated_at"
        );
        self.0
            .execute(
                SQL,
                &[
                    &study.id,
                    &study.goal.to_string(),
                    &json(&study.space)?,
                    &(study.max_trials as i64),
                    &(study.parallelism as i64),
                    &(study.seed as i64),
                    &study.sampler,
                    &study.sampler_opts.to_string(),
                    &study.pruner,
                    &study.pruner_opts.to_string(),
                    &study.status.as_str(),
                    &study.metadata.to_string(),
                    &study.created_at.timestamp_micros(),
                    &Utc::now().timestamp_micros(),
                ],
            )
            .await
            .map_err(offline)?;
        Ok(())
    }

    async fn get_study(&self, id: &str) -> Result<Option<Study>> {
        #[rustfmt::skip]
        const SQL: &str = const_format::concatcp!(
            "SELECT id, goal, space, max_trials, parallelism, seed, sampler, sampler_opts, ",
                   "pruner, pruner_opts, status, metadata, created_at, updated_at ",
            "FROM ", STUDIES, " WHERE id = $1"
        );
        let rows = self.0.query(SQL, &[&id]).await.map_err(offline)?;
        rows.first().map(study_from_row).transpose()
    }

    async fn set_study_status(&self, id: &str, status: StudyStatus) -> Result<()> {
        #[rustfmt::skip]
        const UPDATE: &str = const_format::concatcp!(
            "UPDATE ", STUDIES, " ",
            "SET status = $2, updated_at = $3 ",
            "WHERE id = $1 AND status = ANY($4)"
        );
        // the transition table, expressed as the set of legal sources;
        // the row lock taken by UPDATE makes the check-and-set atomic.
        let sources = [
            StudyStatus::Pending,
            StudyStatus::Running,
            StudyStatus::Paused,
            StudyStatus::Completed,
            StudyStatus::Failed,
            StudyStatus::Cancelled,
        ]
        .iter()
        .filter(|from| from.permits(status))
        .map(|from| from.as_str().to_string())
        .collect::<Vec<_>>();
        let count = self
            .0
            .execute(
                UPDATE,
                &[
                    &id,
                    &status.as_str(),
                    &Utc::now().timestamp_micros(),
                    &sources,
                ],
            )
            .await
            .map_err(offline)?;
        if count == 1 {
            return Ok(());
        }
        match self.get_study(id).await? {
            None => Err(Error::NotFound(format!("study {}", id))),
            Some(study) => Err(Error::study_transition(id, study.status, status)),
        }
    }

    async fn list_studies(&self) -> Result<Vec<Study>> {
        #[rustfmt::skip]
        const SQL: &str = const_format::concatcp!(
            "SELECT id, goal, space, max_trials, parallelism, seed, sampler, sampler_opts, ",
                   "pruner, pruner_opts, status, metadata, created_at, updated_at ",
            "FROM ", STUDIES
        );
        let rows = self.0.query(SQL, &[]).await.map_err(offline)?;
        rows.iter().map(study_from_row).collect()
    }

    async fn delete_study(&self, id: &str) -> Result<()> {
        const SQL: &str = const_format::concatcp!("DELETE FROM ", STUDIES, " WHERE id = $1");
        self.0.execute(SQL, &[&id]).await.map_err(offline)?;
        Ok(())
    }

    async fn add_trial(&self, study_id: &str, mut trial: Trial) -> Result<String> {
        #[rustfmt::skip]
        const BUMP: &str = const_format::concatcp!(
            "UPDATE ", STUDIES, " ",
            "SET counter = counter + 1 ",
            "WHERE id = $1 ",
            "RETURNING counter - 1"
        );
        #[rustfmt::skip]
        const INSERT: &str = const_format::concatcp!(
            "INSERT INTO ", TRIALS, " ",
                "(study_id, id, number, params, status, bracket, value, error, ",
                 "metrics, seed, metadata, started_at, completed_at, updated_at) ",
            "VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        );
        let rows = self.0.query(BUMP, &[&study_id]).await.map_err(offline)?;
        let number = rows
            .first()
            .ok_or_else(|| Error::NotFound(format!("study {}", study_id)))?
            .get::<_, i64>(0);
        trial.number = number as usize;
        self.0
            .execute(
                INSERT,
                &[
                    &study_id,
                    &trial.id,
                    &number,
                    &json(&trial.params)?,
                    &trial.status.as_str(),
                    &(trial.bracket as i64),
                    &trial.value,
                    &trial.error,
                    &json(&trial.metrics)?,
                    &(trial.seed as i64),
                    &trial.metadata.to_string(),
                    &trial.started_at.timestamp_micros(),
                    &trial.completed_at.map(|t| t.timestamp_micros()),
                    &trial.updated_at.timestamp_micros(),
                ],
            )
            .await
            .map_err(offline)?;
        Ok(trial.id)
    }

    async fn fetch_trial(&self, study_id: &str, trial_id: &str) -> Result<Option<Trial>> {
        #[rustfmt::skip]
        const SQL: &str = const_format::concatcp!(
            "SELECT id, number, params, status, bracket, value, error, metrics, ",
                   "seed, metadata, started_at, completed_at, updated_at ",
            "FROM ", TRIALS, " WHERE study_id = $1 AND id = $2"
        );
        let rows = self
            .0
            .query(SQL, &[&study_id, &trial_id])
            .await
            .map_err(offline)?;
        rows.first().map(trial_from_row).transpose()
    }

    async fn list_trials(&self, study_id: &str, filter: Filter) -> Result<Vec<Trial>> {
        #[rustfmt::skip]
        const SQL: &str = const_format::concatcp!(
            "SELECT id, number, params, status, bracket, value, error, metrics, ",
                   "seed, metadata, started_at, completed_at, updated_at ",
            "FROM ", TRIALS, " ",
            "WHERE study_id = $1 ",
            "ORDER BY started_at ASC, number ASC"
        );
        if self.get_study(study_id).await?.is_none() {
            return Err(Error::NotFound(format!("study {}", study_id)));
        }
        let rows = self.0.query(SQL, &[&study_id]).await.map_err(offline)?;
        Ok(rows
            .iter()
            .map(trial_from_row)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|trial| filter.matches(trial))
            .collect())
    }

    async fn update_trial(&self, study_id: &str, trial_id: &str, patch: Patch) -> Result<()> {
        #[rustfmt::skip]
        const SQL: &str = const_format::concatcp!(
            "UPDATE ", TRIALS, " SET ",
                "status       = $3, ",
                "bracket      = $4, ",
                "value        = $5, ",
                "error        = $6, ",
                "metrics      = $7, ",
                "metadata     = $8, ",
                "completed_at = $9, ",
                "updated_at   = $10 ",
            "WHERE study_id = $1 AND id = $2"
        );
        let mut trial = self
            .fetch_trial(study_id, trial_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("trial {}", trial_id)))?;
        patch.apply(&mut trial)?;
        self.0
            .execute(
                SQL,
                &[
                    &study_id,
                    &trial_id,
                    &trial.status.as_str(),
                    &(trial.bracket as i64),
                    &trial.value,
                    &trial.error,
                    &json(&trial.metrics)?,
                    &trial.metadata.to_string(),
                    &trial.completed_at.map(|t| t.timestamp_micros()),
                    &trial.updated_at.timestamp_micros(),
                ],
            )
            .await
            .map_err(offline)?;
        Ok(())
    }

    async fn record_observation(
        &self,
        study_id: &str,
        trial_id: &str,
        bracket: usize,
        rung: usize,
        value: Score,
    ) -> Result<()> {
        #[rustfmt::skip]
        const SQL: &str = const_format::concatcp!(
            "INSERT INTO ", OBSERVATIONS, " ",
                "(study_id, trial_id, bracket, rung, value, created_at) ",
            "VALUES ($1, $2, $3, $4, $5, $6) ",
            "ON CONFLICT (study_id, trial_id, bracket, rung) ",
            "DO UPDATE SET value = EXCLUDED.value"
        );
        self.0
            .execute(
                SQL,
                &[
                    &study_id,
                    &trial_id,
                    &(bracket as i64),
                    &(rung as i64),
                    &value,
                    &Utc::now().timestamp_micros(),
                ],
            )
            .await
            .map_err(|e| match e.code() {
                Some(&SqlState::FOREIGN_KEY_VIOLATION) => {
                    Error::NotFound(format!("trial {}", trial_id))
                }
                _ => offline(e),
            })?;
        Ok(())
    }

    async fn observations_at_rung(
        &self,
        study_id: &str,
        bracket: usize,
        rung: usize,
    ) -> Result<Vec<(String, Score)>> {
        #[rustfmt::skip]
        const SQL: &str = const_format::concatcp!(
            "SELECT trial_id, value ",
            "FROM ", OBSERVATIONS, " ",
            "WHERE study_id = $1 AND bracket = $2 AND rung = $3 ",
            "ORDER BY created_at ASC"
        );
        let rows = self
            .0
            .query(SQL, &[&study_id, &(bracket as i64), &(rung as i64)])
            .await
            .map_err(offline)?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, f64>(1)))
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        self.0.query_one("SELECT 1", &[]).await.map_err(offline)?;
        Ok(())
    }
}

fn offline(e: tokio_postgres::Error) -> Error {
    Error::StoreUnavailable(e.to_string())
}

fn json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::StoreUnavailable(e.to_string()))
}

fn unjson<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| Error::StoreUnavailable(e.to_string()))
}

fn timestamp(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| Error::StoreUnavailable(format!("bad timestamp {}", micros)))
}

fn study_from_row(row: &Row) -> Result<Study> {
    Ok(Study {
        id: row.get(0),
        goal: Goal::parse(row.get(1))?,
        space: unjson(row.get(2))?,
        max_trials: row.get::<_, i64>(3) as usize,
        parallelism: row.get::<_, i64>(4) as usize,
        seed: row.get::<_, i64>(5) as u64,
        sampler: row.get(6),
        sampler_opts: unjson(row.get(7))?,
        pruner: row.get(8),
        pruner_opts: unjson(row.get(9))?,
        status: StudyStatus::parse(row.get(10))?,
        metadata: unjson(row.get(11))?,
        created_at: timestamp(row.get(12))?,
        updated_at: timestamp(row.get(13))?,
    })
}

fn trial_from_row(row: &Row) -> Result<Trial> {
    Ok(Trial {
        id: row.get(0),
        number: row.get::<_, i64>(1) as usize,
        params: unjson(row.get(2))?,
        status: TrialStatus::parse(row.get(3))?,
        bracket: row.get::<_, i64>(4) as usize,
        value: row.get(5),
        error: row.get(6),
        metrics: unjson(row.get(7))?,
        seed: row.get::<_, i64>(8) as u64,
        metadata: unjson(row.get(9))?,
        started_at: timestamp(row.get(10))?,
        completed_at: row
            .get::<_, Option<i64>>(11)
            .map(timestamp)
            .transpose()?,
        updated_at: timestamp(row.get(12))?,
    })
}
