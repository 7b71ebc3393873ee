// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Checkpoint accounting for the sync pipeline.
//!
//! The persisted checkpoint must only ever name a block whose events have all
//! reached a terminal state (applied, deduplicated, skipped, or
//! dead-lettered). The syncer reports fetched ranges and enqueued events
//! here, the retry-queue consumer reports completions, and the tracker folds
//! that into a watermark: the highest block with nothing still in flight at
//! or below it. A persister task writes watermark increases to storage.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::metrics::VoteSyncMetrics;
use crate::storage::VoteStore;

#[derive(Default)]
struct TrackerState {
    /// Highest block covered by a completed log fetch.
    head: Option<u64>,
    /// In-flight event count per block.
    outstanding: BTreeMap<u64, usize>,
}

impl TrackerState {
    fn watermark(&self) -> Option<u64> {
        let head = self.head?;
        match self.outstanding.keys().next() {
            // Everything below the lowest in-flight block is drained
            Some(&lowest) => lowest.checked_sub(1).map(|below| below.min(head)),
            None => Some(head),
        }
    }
}

#[derive(Clone)]
pub struct CheckpointTracker {
    inner: Arc<Mutex<TrackerState>>,
    watermark_tx: Arc<watch::Sender<Option<u64>>>,
}

impl CheckpointTracker {
    pub fn new() -> Self {
        let (watermark_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(Mutex::new(TrackerState::default())),
            watermark_tx: Arc::new(watermark_tx),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<u64>> {
        self.watermark_tx.subscribe()
    }

    /// Register an event as in flight. Must be called before the event is
    /// handed to the retry queue.
    pub fn track(&self, block_number: u64) {
        let mut inner = self.inner.lock().unwrap();
        *inner.outstanding.entry(block_number).or_insert(0) += 1;
        self.publish(&inner);
    }

    /// Advance the fetch head after a log range [.., end_block] was fetched
    /// and all of its events tracked.
    pub fn head(&self, end_block: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.head = Some(inner.head.map_or(end_block, |h| h.max(end_block)));
        self.publish(&inner);
    }

    /// Mark one in-flight event of `block_number` as terminally complete.
    pub fn drained(&self, block_number: u64) {
        let mut inner = self.inner.lock().unwrap();
        match inner.outstanding.get_mut(&block_number) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                inner.outstanding.remove(&block_number);
            }
            None => {
                tracing::error!(
                    "[vote-sync] Drained untracked block {}, checkpoint accounting is off",
                    block_number
                );
            }
        }
        self.publish(&inner);
    }

    pub fn watermark(&self) -> Option<u64> {
        self.inner.lock().unwrap().watermark()
    }

    fn publish(&self, inner: &TrackerState) {
        self.watermark_tx.send_replace(inner.watermark());
    }
}

impl Default for CheckpointTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Persist watermark increases. Never writes a value at or below what was
/// already saved, so a restart resumes from the last fully drained block.
pub fn spawn_checkpoint_persister<S: VoteStore + 'static>(
    store: Arc<S>,
    task_name: String,
    initial: Option<u64>,
    mut watermark_rx: watch::Receiver<Option<u64>>,
    metrics: Arc<VoteSyncMetrics>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_saved = initial;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("[vote-sync] Checkpoint persister for '{}' shutting down", task_name);
                    return;
                }
                changed = watermark_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            let watermark = *watermark_rx.borrow_and_update();
            let Some(watermark) = watermark else {
                continue;
            };
            if last_saved.is_some_and(|saved| watermark <= saved) {
                continue;
            }
            match store.save_checkpoint(&task_name, watermark).await {
                Ok(()) => {
                    last_saved = Some(watermark);
                    metrics.last_synced_block.set(watermark as i64);
                }
                Err(e) => {
                    // Leave last_saved unchanged, the next increase retries
                    tracing::error!(
                        "[vote-sync] Failed to save checkpoint {} for '{}': {:?}",
                        watermark,
                        task_name,
                        e
                    );
                }
            }
        }
    })
}
