mod copula;
mod kde;
mod linalg;
mod stats;

pub use copula::*;
pub use kde::*;
pub use linalg::*;
pub use stats::*;
