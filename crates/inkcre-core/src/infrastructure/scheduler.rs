//! In-process follow-up queue
//!
//! [`QueueScheduler`] is the [`FollowUpScheduler`] handed to the domain; it
//! only enqueues. A [`FollowUpWorker`] drains the queue and runs each
//! follow-up against the service, outside the transaction that created
//! the block.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::GraphService;
use crate::domain::graph::{FollowUp, FollowUpScheduler, FollowUpTask};
use crate::error::{Error, Result};

/// Enqueues follow-ups on an unbounded channel
#[derive(Debug, Clone)]
pub struct QueueScheduler {
    tx: mpsc::UnboundedSender<FollowUp>,
}

impl QueueScheduler {
    /// A scheduler and the receiving end for its worker
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FollowUp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FollowUpScheduler for QueueScheduler {
    fn schedule(&self, follow_up: FollowUp) -> Result<()> {
        self.tx
            .send(follow_up)
            .map_err(|_| Error::Other("follow-up queue is closed".to_string()))?;
        debug!(block_id = %follow_up.block_id, task = ?follow_up.task, "Follow-up queued");
        Ok(())
    }
}

/// Counts of processed follow-ups
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub organized: usize,
    /// Blocks whose kind has no resolver
    pub skipped: usize,
    pub failed: usize,
}

enum Handled {
    Organized,
    Skipped,
    Failed,
    Cancelled,
}

/// Runs queued follow-ups one at a time
pub struct FollowUpWorker {
    rx: mpsc::UnboundedReceiver<FollowUp>,
    service: Arc<GraphService>,
    delay: Duration,
}

impl FollowUpWorker {
    pub fn new(rx: mpsc::UnboundedReceiver<FollowUp>, service: Arc<GraphService>) -> Self {
        Self {
            rx,
            service,
            delay: Duration::ZERO,
        }
    }

    /// Wait this long before running each follow-up
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Process follow-ups until cancelled or the queue closes
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerReport {
        let mut report = WorkerReport::default();
        info!("Follow-up worker started");

        loop {
            let follow_up = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(follow_up) => follow_up,
                    None => break,
                },
            };

            if !self.record(&mut report, follow_up, &cancel).await {
                break;
            }
        }

        info!(?report, "Follow-up worker stopped");
        report
    }

    /// Process what is queued, including follow-ups queued meanwhile, then return
    pub async fn run_until_idle(&mut self, cancel: &CancellationToken) -> WorkerReport {
        let mut report = WorkerReport::default();

        while let Ok(follow_up) = self.rx.try_recv() {
            if !self.record(&mut report, follow_up, cancel).await {
                break;
            }
        }

        debug!(?report, "Follow-up queue drained");
        report
    }

    /// Returns false once cancelled
    async fn record(
        &self,
        report: &mut WorkerReport,
        follow_up: FollowUp,
        cancel: &CancellationToken,
    ) -> bool {
        match self.handle(follow_up, cancel).await {
            Handled::Organized => report.organized += 1,
            Handled::Skipped => report.skipped += 1,
            Handled::Failed => report.failed += 1,
            Handled::Cancelled => return false,
        }
        true
    }

    async fn handle(&self, follow_up: FollowUp, cancel: &CancellationToken) -> Handled {
        if !self.delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Handled::Cancelled,
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        match follow_up.task {
            FollowUpTask::Organize => {
                match self.service.organize(follow_up.block_id, cancel).await {
                    Ok(outcome) => {
                        debug!(
                            block_id = %follow_up.block_id,
                            blocks = outcome.blocks.len(),
                            relations = outcome.relations.len(),
                            "Follow-up organize done"
                        );
                        Handled::Organized
                    }
                    Err(Error::Cancelled) => Handled::Cancelled,
                    Err(Error::UnsupportedKind(kind)) => {
                        debug!(block_id = %follow_up.block_id, %kind, "No resolver, follow-up skipped");
                        Handled::Skipped
                    }
                    Err(e) => {
                        warn!(
                            block_id = %follow_up.block_id,
                            code = e.code(),
                            error = %e,
                            "Follow-up organize failed"
                        );
                        Handled::Failed
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::graph::BlockId;

    #[test]
    fn test_schedule_enqueues_in_order() {
        let (scheduler, mut rx) = QueueScheduler::channel();
        scheduler.schedule(FollowUp::organize(BlockId(1))).unwrap();
        scheduler.schedule(FollowUp::organize(BlockId(2))).unwrap();

        assert_eq!(rx.try_recv().unwrap().block_id, BlockId(1));
        assert_eq!(rx.try_recv().unwrap().block_id, BlockId(2));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_schedule_on_closed_queue_fails() {
        let (scheduler, rx) = QueueScheduler::channel();
        drop(rx);
        assert!(matches!(
            scheduler.schedule(FollowUp::organize(BlockId(1))),
            Err(Error::Other(_))
        ));
    }
}
