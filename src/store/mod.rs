mod adapter;
mod memory;
#[cfg(feature = "durable")]
mod postgres;

pub use adapter::*;
pub use memory::*;
#[cfg(feature = "durable")]
pub use postgres::*;
