use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

// the closed event vocabulary
pub const STUDY_START: &str = "study.start";
pub const STUDY_STOP: &str = "study.stop";
pub const TRIAL_START: &str = "trial.start";
pub const TRIAL_COMPLETE: &str = "trial.complete";
pub const TRIAL_PRUNE: &str = "trial.prune";
pub const TRIAL_FAIL: &str = "trial.fail";
pub const SAMPLER_SUGGEST: &str = "sampler.suggest";
pub const PRUNER_DECISION: &str = "pruner.decision";
pub const STORE_ERROR: &str = "store.error";

/// one structured telemetry event: a name from the closed set, a
/// few numeric measurements, and string metadata (study id, trial id).
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event: &'static str,
    pub measurements: BTreeMap<&'static str, f64>,
    pub metadata: BTreeMap<&'static str, String>,
}

impl Event {
    pub fn new(event: &'static str) -> Self {
        Self {
            event,
            measurements: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }
    pub fn study(self, id: &str) -> Self {
        self.tag("study_id", id)
    }
    pub fn trial(self, id: &str) -> Self {
        self.tag("trial_id", id)
    }
    pub fn measure(mut self, key: &'static str, value: f64) -> Self {
        self.measurements.insert(key, value);
        self
    }
    pub fn tag(mut self, key: &'static str, value: &str) -> Self {
        self.metadata.insert(key, value.to_string());
        self
    }
}

/// event sink. the executor emits through this seam so hosts can
/// forward transitions wherever they like; events for a single trial
/// arrive in order.
pub trait Telemetry: Send + Sync {
    fn emit(&self, event: Event);
}

/// default sink: JSON lines on the log facade.
pub struct Logging;

impl Telemetry for Logging {
    fn emit(&self, event: Event) {
        match serde_json::to_string(&event) {
            Ok(line) => log::info!(target: "telemetry", "{}", line),
            Err(e) => log::warn!(target: "telemetry", "unserializable event: {}", e),
        }
    }
}

/// capturing sink for tests and embedders that want to inspect the
/// stream after the fact.
#[derive(Default)]
pub struct Capture(Mutex<Vec<Event>>);

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().expect("telemetry lock").clone()
    }
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.event).collect()
    }
}

impl Telemetry for Capture {
    fn emit(&self, event: Event) {
        self.0.lock().expect("telemetry lock").push(event);
    }
}
