// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-process retry queue between the chain syncer and the vote projector.
//!
//! Every decoded event goes through the queue exactly once per delivery
//! attempt. A failed apply is re-sent to the tail after a doubling delay
//! (100ms, 200ms, 400ms, 800ms), and after five failed attempts the event is
//! written to the dead-letter sink instead. Each event reaches a terminal
//! state eventually, and the checkpoint tracker is told about every one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointTracker;
use crate::error::SyncResult;
use crate::events::VoteEvent;
use crate::metrics::VoteSyncMetrics;
use crate::projector::ApplyOutcome;

pub const MAX_ATTEMPTS: u32 = 5;
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Applies one event. Implemented by the vote projector; tests substitute
/// failure-injecting handlers.
#[async_trait]
pub trait VoteHandler: Send + Sync + 'static {
    async fn apply(&self, event: &VoteEvent) -> SyncResult<ApplyOutcome>;

    async fn record_dead_letter(
        &self,
        component: &str,
        details: serde_json::Value,
    ) -> SyncResult<()>;
}

#[derive(Debug, Clone)]
pub struct RetryTask {
    pub event: VoteEvent,
    pub attempts: u32,
    next_delay: Duration,
}

impl RetryTask {
    fn new(event: VoteEvent) -> Self {
        Self {
            event,
            attempts: 0,
            next_delay: INITIAL_RETRY_DELAY,
        }
    }
}

#[derive(Clone)]
pub struct RetryQueue {
    tx: mpsc::UnboundedSender<RetryTask>,
    metrics: Arc<VoteSyncMetrics>,
}

impl RetryQueue {
    pub fn channel(metrics: Arc<VoteSyncMetrics>) -> (Self, mpsc::UnboundedReceiver<RetryTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, metrics }, rx)
    }

    /// First delivery of a fresh event. The caller must have tracked the
    /// event with the checkpoint tracker already.
    pub fn enqueue(&self, event: VoteEvent) {
        self.metrics.retry_queue_depth.inc();
        // Receiver outlives all producers, send cannot fail in practice
        if self.tx.send(RetryTask::new(event)).is_err() {
            tracing::error!("[vote-sync] Retry queue receiver dropped, event lost");
        }
    }

    fn resend_later(&self, mut task: RetryTask) {
        let delay = task.next_delay;
        task.next_delay = (task.next_delay * 2).min(MAX_RETRY_DELAY);
        let tx = self.tx.clone();
        self.metrics.events_retried_total.inc();
        self.metrics.retry_queue_depth.inc();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(task).is_err() {
                tracing::error!("[vote-sync] Retry queue receiver dropped, retry lost");
            }
        });
    }
}

/// Single consumer draining the queue. Never exits on a handler error, only
/// on cancellation or when all senders are gone.
pub fn spawn_retry_consumer<H: VoteHandler>(
    mut rx: mpsc::UnboundedReceiver<RetryTask>,
    queue: RetryQueue,
    handler: Arc<H>,
    tracker: CheckpointTracker,
    metrics: Arc<VoteSyncMetrics>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let task = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("[vote-sync] Retry queue consumer shutting down");
                    return;
                }
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => return,
                },
            };
            metrics.retry_queue_depth.dec();
            handle_task(task, &queue, &handler, &tracker, &metrics).await;
        }
    })
}

async fn handle_task<H: VoteHandler>(
    mut task: RetryTask,
    queue: &RetryQueue,
    handler: &Arc<H>,
    tracker: &CheckpointTracker,
    metrics: &Arc<VoteSyncMetrics>,
) {
    let block_number = task.event.block_number;
    match handler.apply(&task.event).await {
        Ok(outcome) => {
            metrics.events_processed_total.inc();
            match outcome {
                ApplyOutcome::Applied => metrics.events_applied_total.inc(),
                ApplyOutcome::AlreadyProcessed | ApplyOutcome::AlreadyCredited => {
                    metrics.events_duplicate_total.inc()
                }
                // The projector already counted the skip
                ApplyOutcome::UnknownElection | ApplyOutcome::UnknownCandidate => {}
            }
            tracker.drained(block_number);
        }
        Err(e) => {
            metrics.events_failed_total.inc();
            task.attempts += 1;
            if task.attempts < MAX_ATTEMPTS {
                tracing::warn!(
                    "[vote-sync] Apply failed for event at block {} (attempt {}/{}), will retry: {:?}",
                    block_number,
                    task.attempts,
                    MAX_ATTEMPTS,
                    e
                );
                queue.resend_later(task);
            } else {
                tracing::error!(
                    "[vote-sync] Apply failed for event at block {} after {} attempts, dead-lettering: {:?}",
                    block_number,
                    task.attempts,
                    e
                );
                metrics.events_dead_lettered_total.inc();
                let details = serde_json::json!({
                    "tx_hash": task.event.tx_hash.map(|h| format!("{:?}", h)),
                    "log_index": task.event.log_index,
                    "block_number": block_number,
                    "election_onchain_id": task.event.election_onchain_id,
                    "candidate_onchain_id": task.event.candidate_onchain_id,
                    "attempts": task.attempts,
                    "error": format!("{:?}", e),
                });
                if let Err(e) = handler.record_dead_letter("retry_queue", details).await {
                    tracing::error!("[vote-sync] Failed to record dead letter: {:?}", e);
                }
                tracker.drained(block_number);
            }
        }
    }
}
