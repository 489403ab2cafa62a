use crate::error::Error;
use crate::error::Result;
use crate::pruner;
use crate::pruner::Pruner;
use crate::sampler;
use crate::sampler::Sampler;
use crate::store::Store;
use crate::study::Goal;
use crate::telemetry::Telemetry;
use crate::Seed;
use std::sync::Arc;

/// where trial state lives for the run.
#[derive(Default, Clone)]
pub enum Storage {
    #[default]
    Memory,
    /// PostgreSQL via the `DB_URL` environment variable
    Durable,
    /// any store the host already owns
    Injected(Arc<dyn Store>),
}

/// everything `optimize` accepts. builder methods over a plain
/// struct; unknown sampler/pruner/direction/storage names are
/// rejected up front against the closed whitelists.
pub struct Options {
    pub n_trials: usize,
    pub direction: Goal,
    pub sampler: String,
    pub sampler_opts: serde_json::Value,
    pub pruner: String,
    pub pruner_opts: serde_json::Value,
    pub parallelism: usize,
    pub timeout_ms: Option<u64>,
    pub seed: Option<Seed>,
    pub study_name: Option<String>,
    pub constant_liar: bool,
    pub metadata: serde_json::Value,
    pub storage: Storage,
    /// install the crate's simplelog stack before the run starts
    pub logging: bool,
    pub(crate) telemetry: Option<Arc<dyn Telemetry>>,
    pub(crate) custom_sampler: Option<Box<dyn Sampler>>,
    pub(crate) custom_pruner: Option<Box<dyn Pruner>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            n_trials: 100,
            direction: Goal::Minimize,
            sampler: "random".to_string(),
            sampler_opts: serde_json::Value::Null,
            pruner: "none".to_string(),
            pruner_opts: serde_json::Value::Null,
            parallelism: 1,
            timeout_ms: None,
            seed: None,
            study_name: None,
            constant_liar: false,
            metadata: serde_json::Value::Null,
            storage: Storage::Memory,
            logging: false,
            telemetry: None,
            custom_sampler: None,
            custom_pruner: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trials(mut self, n: usize) -> Self {
        self.n_trials = n;
        self
    }
    pub fn direction(mut self, goal: Goal) -> Self {
        self.direction = goal;
        self
    }
    pub fn minimize(self) -> Self {
        self.direction(Goal::Minimize)
    }
    pub fn maximize(self) -> Self {
        self.direction(Goal::Maximize)
    }
    pub fn sampler(mut self, name: &str) -> Self {
        self.sampler = name.to_string();
        self
    }
    pub fn sampler_opts(mut self, opts: serde_json::Value) -> Self {
        self.sampler_opts = opts;
        self
    }
    pub fn pruner(mut self, name: &str) -> Self {
        self.pruner = name.to_string();
        self
    }
    pub fn pruner_opts(mut self, opts: serde_json::Value) -> Self {
        self.pruner_opts = opts;
        self
    }
    pub fn parallelism(mut self, n: usize) -> Self {
        self.parallelism = n;
        self
    }
    /// one worker per logical core.
    pub fn auto_parallelism(self) -> Self {
        let cores = num_cpus::get().max(1);
        self.parallelism(cores)
    }
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
    pub fn seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn study_name(mut self, name: &str) -> Self {
        self.study_name = Some(name.to_string());
        self
    }
    pub fn constant_liar(mut self, on: bool) -> Self {
        self.constant_liar = on;
        self
    }
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = storage;
        self
    }
    pub fn logging(mut self, on: bool) -> Self {
        self.logging = on;
        self
    }
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.storage = Storage::Injected(store);
        self
    }
    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }
    /// bring your own sampler module.
    pub fn custom_sampler(mut self, sampler: Box<dyn Sampler>) -> Self {
        self.custom_sampler = Some(sampler);
        self
    }
    /// bring your own pruner module.
    pub fn custom_pruner(mut self, pruner: Box<dyn Pruner>) -> Self {
        self.custom_pruner = Some(pruner);
        self
    }

    /// string-keyed configuration for callers coming from config
    /// files; every value passes the closed whitelist of its field.
    pub fn direction_name(self, name: &str) -> Result<Self> {
        Ok(self.direction(Goal::parse(name)?))
    }
    pub fn storage_name(self, name: &str) -> Result<Self> {
        match name {
            "memory" => Ok(self.storage(Storage::Memory)),
            "durable" => Ok(self.storage(Storage::Durable)),
            other => Err(Error::InvalidConfig(format!(
                "unknown storage {:?}; use \"memory\" or \"durable\"",
                other
            ))),
        }
    }

    /// full validation before any trial starts. checks here never
    /// leave a half-created study behind.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism < 1 {
            return Err(Error::InvalidConfig(format!(
                "parallelism must be at least 1, got {}; drop the option to run sequentially",
                self.parallelism
            )));
        }
        if self.timeout_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "timeout_ms must be positive; drop the option for no limit".into(),
            ));
        }
        if self.custom_sampler.is_none() {
            // surfaces unknown names and malformed sampler options
            sampler::build(&self.sampler, &self.sampler_opts, self.direction, self.seed)?;
        }
        if self.custom_pruner.is_none() {
            pruner::build(&self.pruner, &self.pruner_opts)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sequential_memory_random() {
        let options = Options::new();
        assert_eq!(options.n_trials, 100);
        assert_eq!(options.parallelism, 1);
        assert_eq!(options.sampler, "random");
        assert_eq!(options.pruner, "none");
        assert!(options.validate().is_ok());
    }

    #[test]
    fn bad_combinations_are_rejected_up_front() {
        assert!(Options::new().parallelism(0).validate().is_err());
        assert!(Options::new().sampler("annealing").validate().is_err());
        assert!(Options::new().pruner("threshold").validate().is_err());
        let err = Options::new().timeout_ms(0).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(Options::new()
            .sampler("tpe")
            .sampler_opts(serde_json::json!({"gamma": 7.0}))
            .validate()
            .is_err());
    }

    #[test]
    fn string_coercion_is_whitelisted() {
        assert!(Options::new().direction_name("maximize").is_ok());
        assert!(Options::new().direction_name("upwards").is_err());
        assert!(Options::new().storage_name("memory").is_ok());
        assert!(Options::new().storage_name("durable").is_ok());
        assert!(Options::new().storage_name("sqlite").is_err());
    }
}
