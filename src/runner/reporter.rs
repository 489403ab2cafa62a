use crate::error::Error;
use crate::error::Result;
use crate::Score;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;

/// the executor's answer to one intermediate report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Prune,
}

/// one intermediate report in flight from the objective to the
/// executor, carrying its reply slot.
pub(crate) struct Report {
    pub step: usize,
    pub value: Score,
    pub reply: oneshot::Sender<Verdict>,
}

/// handed to the objective so it can stream intermediate values.
/// each report blocks until the executor has durably recorded the
/// observation and consulted the pruner; a `Pruned` error is the
/// signal to stop work and return.
///
/// objectives run on blocking workers, so the bridge into the async
/// executor uses the blocking channel endpoints.
pub struct Reporter {
    tx: mpsc::Sender<Report>,
    cancelled: watch::Receiver<bool>,
}

impl Reporter {
    pub(crate) fn new(tx: mpsc::Sender<Report>, cancelled: watch::Receiver<bool>) -> Self {
        Self { tx, cancelled }
    }

    /// report an intermediate value at a step. `Err(Pruned)` means
    /// stop and return; `Err(Cancelled)` means the study is shutting
    /// down. both propagate cleanly through `?` in an anyhow
    /// objective.
    pub fn report(&self, step: usize, value: Score) -> Result<()> {
        if *self.cancelled.borrow() {
            return Err(Error::Cancelled);
        }
        let (reply, verdict) = oneshot::channel();
        self.tx
            .blocking_send(Report { step, value, reply })
            .map_err(|_| Error::Cancelled)?;
        match verdict.blocking_recv() {
            Ok(Verdict::Continue) => Ok(()),
            Ok(Verdict::Prune) => Err(Error::Pruned(step)),
            Err(_) => Err(Error::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn continue_verdicts_flow_through() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let reporter = Reporter::new(tx, cancel_rx);
        let answer = tokio::spawn(async move {
            let report = rx.recv().await.unwrap();
            assert_eq!(report.step, 3);
            assert_eq!(report.value, 0.5);
            report.reply.send(Verdict::Continue).unwrap();
        });
        let outcome = tokio::task::spawn_blocking(move || reporter.report(3, 0.5))
            .await
            .unwrap();
        assert!(outcome.is_ok());
        answer.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn prune_verdicts_become_pruned_errors() {
        let (tx, mut rx) = mpsc::channel(4);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let reporter = Reporter::new(tx, cancel_rx);
        tokio::spawn(async move {
            let report = rx.recv().await.unwrap();
            report.reply.send(Verdict::Prune).unwrap();
        });
        let outcome = tokio::task::spawn_blocking(move || reporter.report(7, 1.))
            .await
            .unwrap();
        assert_eq!(outcome, Err(Error::Pruned(7)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_short_circuits() {
        let (tx, _rx) = mpsc::channel(4);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();
        let reporter = Reporter::new(tx, cancel_rx);
        let outcome = tokio::task::spawn_blocking(move || reporter.report(0, 0.))
            .await
            .unwrap();
        assert_eq!(outcome, Err(Error::Cancelled));
    }
}
