use crate::error::Error;
use crate::error::Result;
use crate::Score;
use serde::Deserialize;
use serde::Serialize;

/// which way the objective points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    #[default]
    Minimize,
    Maximize,
}

impl Goal {
    /// is `a` strictly better than `b`?
    pub fn better(&self, a: Score, b: Score) -> bool {
        match self {
            Self::Minimize => a < b,
            Self::Maximize => a > b,
        }
    }

    /// strictly worse, the pruning question.
    pub fn worse(&self, a: Score, b: Score) -> bool {
        match self {
            Self::Minimize => a > b,
            Self::Maximize => a < b,
        }
    }

    /// fold a score into minimization form for direction-agnostic math.
    pub fn losswise(&self, score: Score) -> Score {
        match self {
            Self::Minimize => score,
            Self::Maximize => -score,
        }
    }

    /// closed whitelist; user strings never touch anything else.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "minimize" | "min" => Ok(Self::Minimize),
            "maximize" | "max" => Ok(Self::Maximize),
            other => Err(Error::InvalidConfig(format!(
                "unknown direction {:?}; use \"minimize\" or \"maximize\"",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minimize => write!(f, "minimize"),
            Self::Maximize => write!(f, "maximize"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_orders_scores() {
        assert!(Goal::Minimize.better(1., 2.));
        assert!(Goal::Maximize.better(2., 1.));
        assert!(!Goal::Minimize.better(2., 2.));
        assert!(Goal::Minimize.worse(3., 2.));
        assert!(Goal::Maximize.worse(2., 3.));
    }

    #[test]
    fn parse_is_a_closed_whitelist() {
        assert_eq!(Goal::parse("minimize").unwrap(), Goal::Minimize);
        assert_eq!(Goal::parse("max").unwrap(), Goal::Maximize);
        assert!(matches!(
            Goal::parse("upwards"),
            Err(Error::InvalidConfig(_))
        ));
    }
}
