use super::value::Value;
use crate::error::Error;
use crate::error::Result;
use crate::rng::Stream;
use crate::Unit;
use serde::Deserialize;
use serde::Serialize;

/// decode clamps into this window before mapping so open-interval
/// distributions never see their singular endpoints.
const DECODE_CLAMP_LO: f64 = 0.001;
const DECODE_CLAMP_HI: f64 = 0.999;

/// one parameter's distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Spec {
    Uniform { lo: f64, hi: f64 },
    LogUniform { lo: f64, hi: f64 },
    Int { lo: i64, hi: i64 },
    Choice { choices: Vec<Value> },
    Discrete { lo: f64, hi: f64, step: f64 },
}

impl Spec {
    pub fn validate(&self, name: &str) -> Result<()> {
        match self {
            Self::Uniform { lo, hi } => {
                if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                    return Err(Error::InvalidSearchSpace(format!(
                        "{}: uniform needs lo < hi, got [{}, {}]",
                        name, lo, hi
                    )));
                }
            }
            Self::LogUniform { lo, hi } => {
                if !(lo.is_finite() && hi.is_finite() && 0. < *lo && lo < hi) {
                    return Err(Error::InvalidSearchSpace(format!(
                        "{}: log_uniform needs 0 < lo < hi, got ({}, {}]",
                        name, lo, hi
                    )));
                }
            }
            Self::Int { lo, hi } => {
                if lo > hi {
                    return Err(Error::InvalidSearchSpace(format!(
                        "{}: int range needs lo <= hi, got [{}, {}]",
                        name, lo, hi
                    )));
                }
            }
            Self::Choice { choices } => {
                if choices.is_empty() {
                    return Err(Error::InvalidSearchSpace(format!(
                        "{}: choice list is empty; give it at least one option",
                        name
                    )));
                }
            }
            Self::Discrete { lo, hi, step } => {
                if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                    return Err(Error::InvalidSearchSpace(format!(
                        "{}: discrete needs lo < hi, got [{}, {}]",
                        name, lo, hi
                    )));
                }
                if !(step.is_finite() && *step > 0.) {
                    return Err(Error::InvalidSearchSpace(format!(
                        "{}: discrete step must be positive, got {}",
                        name, step
                    )));
                }
            }
        }
        Ok(())
    }

    /// draw a value respecting the distribution.
    pub fn sample(&self, stream: &mut Stream) -> Value {
        match self {
            Self::Uniform { lo, hi } => Value::Real(stream.uniform(*lo, *hi)),
            Self::LogUniform { lo, hi } => Value::Real(stream.log_uniform(*lo, *hi)),
            Self::Int { lo, hi } => Value::Int(stream.range(*lo, *hi)),
            Self::Choice { choices } => choices[stream.index(choices.len())].clone(),
            Self::Discrete { lo, hi, step } => {
                let rungs = ((hi - lo) / step).floor() as usize;
                Value::Real(lo + stream.index(rungs + 1) as f64 * step)
            }
        }
    }

    /// uniform mapping into [0, 1] via the inverse CDF of the spec.
    pub fn encode(&self, value: &Value) -> Result<Unit> {
        let u = match self {
            Self::Uniform { lo, hi } => {
                let x = self.numeric(value)?;
                (x - lo) / (hi - lo)
            }
            Self::LogUniform { lo, hi } => {
                let x = self.numeric(value)?.max(crate::LOG_FLOOR);
                (x.ln() - lo.ln()) / (hi.ln() - lo.ln())
            }
            Self::Int { lo, hi } => {
                let x = value.as_i64().ok_or_else(|| self.mismatch(value))?;
                (x - lo) as f64 / (hi - lo + 1) as f64
            }
            Self::Choice { choices } => {
                let i = choices
                    .iter()
                    .position(|c| c == value)
                    .ok_or_else(|| self.mismatch(value))?;
                match choices.len() {
                    1 => 0.5,
                    n => i as f64 / (n - 1) as f64,
                }
            }
            Self::Discrete { lo, hi, .. } => {
                let x = self.numeric(value)?;
                (x - lo) / (hi - lo)
            }
        };
        Ok(u.clamp(0., 1.))
    }

    /// inverse of encode, with the clamp window, integer rounding,
    /// and categorical index floor.
    pub fn decode(&self, u: Unit) -> Value {
        let u = u.clamp(DECODE_CLAMP_LO, DECODE_CLAMP_HI);
        match self {
            Self::Uniform { lo, hi } => Value::Real(lo + u * (hi - lo)),
            Self::LogUniform { lo, hi } => {
                Value::Real((lo.ln() + u * (hi.ln() - lo.ln())).exp())
            }
            Self::Int { lo, hi } => {
                let x = lo + (u * (hi - lo + 1) as f64).floor() as i64;
                Value::Int(x.min(*hi))
            }
            Self::Choice { choices } => {
                let n = choices.len();
                let i = ((u * n as f64).floor() as usize).min(n - 1);
                choices[i].clone()
            }
            Self::Discrete { lo, hi, step } => {
                let x = lo + u * (hi - lo);
                let snapped = lo + ((x - lo) / step).round() * step;
                Value::Real(snapped.clamp(*lo, *hi))
            }
        }
    }

    /// clamp a raw numeric proposal back into the spec's support.
    /// samplers that operate on relaxed continuous values land here.
    pub fn constrain(&self, x: f64) -> Value {
        match self {
            Self::Uniform { lo, hi } => Value::Real(x.clamp(*lo, *hi)),
            Self::LogUniform { lo, hi } => Value::Real(x.clamp(*lo, *hi)),
            Self::Int { lo, hi } => Value::Int((x.round() as i64).clamp(*lo, *hi)),
            Self::Choice { choices } => {
                let n = choices.len();
                let i = (x.round() as isize).clamp(0, n as isize - 1) as usize;
                choices[i].clone()
            }
            Self::Discrete { lo, hi, step } => {
                let snapped = lo + ((x - lo) / step).round() * step;
                Value::Real(snapped.clamp(*lo, *hi))
            }
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Choice { .. })
    }

    fn numeric(&self, value: &Value) -> Result<f64> {
        value.as_f64().ok_or_else(|| self.mismatch(value))
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::InvalidSearchSpace(format!("value {} does not fit spec {:?}", value, self))
    }
}
