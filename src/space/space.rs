use super::spec::Spec;
use super::value::Value;
use crate::error::Error;
use crate::error::Result;
use crate::rng::Stream;
use crate::Unit;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// a full parameter configuration, ordered by name.
pub type Params = BTreeMap<String, Value>;

/// the executor-facing search-space descriptor: trial index in,
/// spec map out. a plain `Space` is the constant case; conditional
/// spaces close over whatever earlier state they need.
pub type SpaceFn = Arc<dyn Fn(usize) -> Space + Send + Sync>;

/// declarative search space: parameter name -> distribution.
/// BTreeMap keeps iteration deterministic, which every sampler
/// and the unit-cube encoding rely on.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Space(BTreeMap<String, Spec>);

impl Space {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uniform(mut self, name: &str, lo: f64, hi: f64) -> Self {
        self.0.insert(name.to_string(), Spec::Uniform { lo, hi });
        self
    }
    pub fn log_uniform(mut self, name: &str, lo: f64, hi: f64) -> Self {
        self.0.insert(name.to_string(), Spec::LogUniform { lo, hi });
        self
    }
    pub fn int(mut self, name: &str, lo: i64, hi: i64) -> Self {
        self.0.insert(name.to_string(), Spec::Int { lo, hi });
        self
    }
    pub fn choice<V: Into<Value>>(mut self, name: &str, choices: Vec<V>) -> Self {
        let choices = choices.into_iter().map(Into::into).collect();
        self.0.insert(name.to_string(), Spec::Choice { choices });
        self
    }
    pub fn discrete(mut self, name: &str, lo: f64, hi: f64, step: f64) -> Self {
        self.0.insert(name.to_string(), Spec::Discrete { lo, hi, step });
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::InvalidSearchSpace(
                "search space is empty; declare at least one parameter".into(),
            ));
        }
        for (name, spec) in self.iter() {
            spec.validate(name)?;
        }
        Ok(())
    }

    pub fn sample(&self, stream: &mut Stream) -> Params {
        self.iter()
            .map(|(name, spec)| (name.clone(), spec.sample(stream)))
            .collect()
    }

    /// project a parameter map onto the unit cube, dimensions in
    /// name order. fails if any declared parameter is missing.
    pub fn encode(&self, params: &Params) -> Result<Vec<Unit>> {
        self.iter()
            .map(|(name, spec)| {
                params
                    .get(name)
                    .ok_or_else(|| Error::InvalidSearchSpace(format!("missing parameter {}", name)))
                    .and_then(|value| spec.encode(value))
            })
            .collect()
    }

    /// inverse of encode: unit-cube point to parameter map.
    pub fn decode(&self, units: &[Unit]) -> Params {
        self.iter()
            .zip(units.iter())
            .map(|((name, spec), &u)| (name.clone(), spec.decode(u)))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&Spec> {
        self.0.get(name)
    }
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Spec)> {
        self.0.iter()
    }
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }
    pub fn dims(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// wrap a constant space as a descriptor function.
    pub fn constant(self) -> SpaceFn {
        Arc::new(move |_| self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic() -> Space {
        Space::new().uniform("x", -5., 5.).uniform("y", -5., 5.)
    }

    #[test]
    fn empty_space_is_invalid() {
        assert!(matches!(
            Space::new().validate(),
            Err(Error::InvalidSearchSpace(_))
        ));
        assert!(quadratic().validate().is_ok());
    }

    #[test]
    fn samples_respect_bounds() {
        let space = Space::new()
            .uniform("x", -1., 1.)
            .log_uniform("lr", 1e-5, 1e-1)
            .int("layers", 1, 8)
            .choice("opt", vec!["sgd", "adam"]);
        let ref mut stream = Stream::from_seed(7);
        for _ in 0..256 {
            let params = space.sample(stream);
            let x = params["x"].as_f64().unwrap();
            let lr = params["lr"].as_f64().unwrap();
            let layers = params["layers"].as_i64().unwrap();
            assert!((-1. ..=1.).contains(&x));
            assert!((1e-5..=1e-1).contains(&lr));
            assert!((1..=8).contains(&layers));
            assert!(["sgd", "adam"].contains(&params["opt"].as_text().unwrap()));
        }
    }

    #[test]
    fn encode_decode_is_ordered_by_name() {
        let space = quadratic();
        let ref mut stream = Stream::from_seed(7);
        let params = space.sample(stream);
        let units = space.encode(&params).unwrap();
        assert_eq!(units.len(), 2);
        let back = space.decode(&units);
        let x = back["x"].as_f64().unwrap();
        let y = back["y"].as_f64().unwrap();
        assert!((x - params["x"].as_f64().unwrap()).abs() < 1e-9);
        assert!((y - params["y"].as_f64().unwrap()).abs() < 1e-9);
    }

    #[test]
    fn encode_reports_missing_parameters() {
        let space = quadratic();
        let params = Params::from([("x".to_string(), Value::Real(0.))]);
        assert!(matches!(
            space.encode(&params),
            Err(Error::InvalidSearchSpace(_))
        ));
    }

    #[test]
    fn space_survives_json() {
        let space = Space::new()
            .uniform("x", 0., 1.)
            .choice("opt", vec!["sgd", "adam"]);
        let json = serde_json::to_string(&space).unwrap();
        assert_eq!(serde_json::from_str::<Space>(&json).unwrap(), space);
    }
}
