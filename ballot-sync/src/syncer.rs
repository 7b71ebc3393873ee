// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain sync tasks: follow the ballot contract's VoteCast logs and feed
//! decoded events into the retry queue.
//!
//! Two tasks: one polls the latest block number into a watch channel, one
//! fetches log ranges up to that height in bounded chunks. Catch-up after a
//! restart and live following are the same loop; when the fetch range reaches
//! the chain head the loop goes back to waiting on the watch channel.

use std::sync::Arc;
use std::time::Instant;

use ethers::providers::JsonRpcClient;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointTracker;
use crate::config::VoteSyncConfig;
use crate::error::SyncResult;
use crate::eth_client::EthClient;
use crate::events::VoteEvent;
use crate::metrics::VoteSyncMetrics;
use crate::retry_queue::RetryQueue;
use crate::retry_with_max_elapsed_time;
use crate::storage::VoteStore;

/// Checkpoint row key, one per tracked contract.
pub fn sync_task_name(contract: &ethers::types::Address) -> String {
    format!("vote_sync_{:?}", contract)
}

pub struct VoteSyncer<P, S> {
    config: VoteSyncConfig,
    client: Arc<EthClient<P>>,
    store: Arc<S>,
    queue: RetryQueue,
    tracker: CheckpointTracker,
    metrics: Arc<VoteSyncMetrics>,
}

impl<P, S> VoteSyncer<P, S>
where
    P: JsonRpcClient + 'static,
    S: VoteStore + 'static,
{
    pub fn new(
        config: VoteSyncConfig,
        client: Arc<EthClient<P>>,
        store: Arc<S>,
        queue: RetryQueue,
        tracker: CheckpointTracker,
        metrics: Arc<VoteSyncMetrics>,
    ) -> Self {
        Self {
            config,
            client,
            store,
            queue,
            tracker,
            metrics,
        }
    }

    /// Spawn the latest-block and log-fetch tasks. Resumes from the persisted
    /// checkpoint when one exists.
    pub async fn run(self, cancel: CancellationToken) -> SyncResult<Vec<JoinHandle<()>>> {
        let task_name = sync_task_name(&self.client.contract_address());
        let checkpoint = self.store.checkpoint(&task_name).await?;
        let start_block = compute_start_block(checkpoint, self.config.start_block);
        info!(
            "[vote-sync] Starting sync from block {} (checkpoint: {:?}, configured start: {})",
            start_block, checkpoint, self.config.start_block
        );

        let initial_latest = self.client.get_latest_block().await?;
        let (latest_tx, latest_rx) = watch::channel(initial_latest);

        let mut handles = Vec::new();

        let client_clone = self.client.clone();
        let config_clone = self.config.clone();
        let metrics_clone = self.metrics.clone();
        let cancel_clone = cancel.clone();
        handles.push(tokio::spawn(async move {
            run_latest_block_task(
                client_clone,
                config_clone,
                latest_tx,
                metrics_clone,
                cancel_clone,
            )
            .await;
        }));

        handles.push(tokio::spawn(async move {
            run_log_sync_task(
                self.client,
                self.config,
                self.store,
                start_block,
                latest_rx,
                self.queue,
                self.tracker,
                self.metrics,
                cancel,
            )
            .await;
        }));

        Ok(handles)
    }
}

/// The first block to fetch: one past the checkpoint, never below the
/// configured deployment block.
fn compute_start_block(checkpoint: Option<u64>, configured_start: u64) -> u64 {
    match checkpoint {
        Some(drained) => drained.saturating_add(1).max(configured_start),
        None => configured_start,
    }
}

async fn run_latest_block_task<P>(
    client: Arc<EthClient<P>>,
    config: VoteSyncConfig,
    sender: watch::Sender<u64>,
    metrics: Arc<VoteSyncMetrics>,
    cancel: CancellationToken,
) where
    P: JsonRpcClient + 'static,
{
    info!("[vote-sync] Starting latest block refresh task");

    let mut last_block = 0u64;
    let mut interval = time::interval(config.latest_block_interval());
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("[vote-sync] Latest block task cancelled");
                break;
            }
            _ = interval.tick() => {
                match retry_with_max_elapsed_time!(
                    client.get_latest_block(),
                    config.max_retry_duration()
                ) {
                    Ok(Ok(new_block)) => {
                        if new_block > last_block {
                            debug!("[vote-sync] New latest block: {}", new_block);
                            let _ = sender.send(new_block);
                            metrics.latest_chain_block.set(new_block as i64);
                            last_block = new_block;
                        }
                    }
                    _ => {
                        warn!("[vote-sync] Failed to get latest block after retry");
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_log_sync_task<P, S>(
    client: Arc<EthClient<P>>,
    config: VoteSyncConfig,
    store: Arc<S>,
    mut start_block: u64,
    mut latest_rx: watch::Receiver<u64>,
    queue: RetryQueue,
    tracker: CheckpointTracker,
    metrics: Arc<VoteSyncMetrics>,
    cancel: CancellationToken,
) where
    P: JsonRpcClient + 'static,
    S: VoteStore + 'static,
{
    let contract_str = format!("{:?}", client.contract_address());
    info!(
        "[vote-sync] Starting log sync for {} from block {}",
        contract_str, start_block
    );

    // First pass runs immediately so restart catch-up does not wait for a
    // new block
    let mut more_blocks = true;

    loop {
        // When catching up (more_blocks=true), don't wait for new block notifications
        if !more_blocks {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[vote-sync] Log sync task cancelled for {}", contract_str);
                    break;
                }
                result = latest_rx.changed() => {
                    if result.is_err() {
                        error!("[vote-sync] Latest block channel closed");
                        break;
                    }
                }
            }
        } else if cancel.is_cancelled() {
            info!("[vote-sync] Log sync task cancelled for {}", contract_str);
            break;
        }

        let latest_block = *latest_rx.borrow();

        if latest_block < start_block {
            debug!(
                "[vote-sync] Latest block {} < start block {}, waiting",
                latest_block, start_block
            );
            more_blocks = false;
            continue;
        }

        let end_block = std::cmp::min(start_block + config.max_block_range - 1, latest_block);
        more_blocks = end_block < latest_block;

        let start_time = Instant::now();
        let logs_result = retry_with_max_elapsed_time!(
            client.get_vote_logs_in_range(start_block, end_block),
            config.max_retry_duration()
        );

        match logs_result {
            Ok(Ok(logs)) => {
                debug!(
                    "[vote-sync] Fetched {} logs from {} in {:?} (blocks {}-{})",
                    logs.len(),
                    contract_str,
                    start_time.elapsed(),
                    start_block,
                    end_block
                );
                metrics.events_fetched_total.inc_by(logs.len() as u64);

                for log in &logs {
                    match VoteEvent::try_from_log(log) {
                        Ok(event) => {
                            // Track before enqueue so the watermark cannot
                            // pass an in-flight event
                            tracker.track(event.block_number);
                            queue.enqueue(event);
                        }
                        Err(e) => {
                            // Decoding is deterministic, retrying is pointless
                            warn!(
                                "[vote-sync] Undecodable log at block {:?}, dead-lettering: {:?}",
                                log.block_number, e
                            );
                            metrics.events_decode_errors_total.inc();
                            metrics.events_dead_lettered_total.inc();
                            let details = serde_json::json!({
                                "tx_hash": log.transaction_hash.map(|h| format!("{:?}", h)),
                                "log_index": log.log_index.map(|i| i.as_u64()),
                                "block_number": log.block_number.map(|b| b.as_u64()),
                                "error": format!("{:?}", e),
                            });
                            if let Err(e) = store.record_dead_letter("chain_syncer", details).await
                            {
                                error!("[vote-sync] Failed to record dead letter: {:?}", e);
                            }
                        }
                    }
                }

                tracker.head(end_block);
                start_block = end_block + 1;
            }
            _ => {
                error!(
                    "[vote-sync] Failed to fetch logs for {} after retry (blocks {}-{})",
                    contract_str, start_block, end_block
                );
            }
        }
    }
}
