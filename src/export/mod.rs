mod csv;
mod json;
mod stats;

pub use csv::*;
pub use json::*;
pub use stats::*;
