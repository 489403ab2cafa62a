mod reporter;
mod runner;
mod worker;

pub use reporter::Reporter;
pub use reporter::Verdict;
pub use runner::Canceller;
pub use runner::Runner;
pub use worker::Objective;
pub(crate) use reporter::Report;
pub(crate) use worker::Worker;

use crate::error::Error;
use crate::error::Result;

/// one retry for store operations, and only for availability
/// failures; contract violations surface immediately.
pub(crate) async fn retried<T, F, Fut>(op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match op().await {
        Err(Error::StoreUnavailable(_)) => op().await,
        other => other,
    }
}
