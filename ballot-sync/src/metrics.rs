// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, IntCounter, IntGauge,
    Registry, TextEncoder,
};
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
pub struct VoteSyncMetrics {
    /// Chain head as last observed by the block poller.
    pub latest_chain_block: IntGauge,
    /// Last checkpointed block, every event at or below it is terminal.
    pub last_synced_block: IntGauge,
    pub events_fetched_total: IntCounter,
    /// Events that reached a terminal success (applied, duplicate, or skip).
    pub events_processed_total: IntCounter,
    /// Failed apply attempts, counted per attempt.
    pub events_failed_total: IntCounter,
    pub events_applied_total: IntCounter,
    /// Deliveries suppressed by the ledger or the voter list.
    pub events_duplicate_total: IntCounter,
    /// Events for elections or candidates this deployment does not know.
    pub events_skipped_total: IntCounter,
    pub events_retried_total: IntCounter,
    pub events_dead_lettered_total: IntCounter,
    /// Logs that failed VoteCast decoding.
    pub events_decode_errors_total: IntCounter,
    pub retry_queue_depth: IntGauge,
}

impl VoteSyncMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            latest_chain_block: register_int_gauge_with_registry!(
                "vote_sync_latest_chain_block",
                "Latest block number reported by the RPC provider",
                registry,
            )
            .unwrap(),
            last_synced_block: register_int_gauge_with_registry!(
                "vote_sync_last_synced_block",
                "Highest block whose events have all reached a terminal state",
                registry,
            )
            .unwrap(),
            events_fetched_total: register_int_counter_with_registry!(
                "vote_sync_events_fetched_total",
                "VoteCast logs fetched from the chain",
                registry,
            )
            .unwrap(),
            events_processed_total: register_int_counter_with_registry!(
                "vote_sync_events_processed_total",
                "Events that completed without error",
                registry,
            )
            .unwrap(),
            events_failed_total: register_int_counter_with_registry!(
                "vote_sync_events_failed_total",
                "Apply attempts that returned an error",
                registry,
            )
            .unwrap(),
            events_applied_total: register_int_counter_with_registry!(
                "vote_sync_events_applied_total",
                "Events that incremented a candidate tally",
                registry,
            )
            .unwrap(),
            events_duplicate_total: register_int_counter_with_registry!(
                "vote_sync_events_duplicate_total",
                "Events suppressed as duplicates",
                registry,
            )
            .unwrap(),
            events_skipped_total: register_int_counter_with_registry!(
                "vote_sync_events_skipped_total",
                "Events skipped for unknown elections or candidates",
                registry,
            )
            .unwrap(),
            events_retried_total: register_int_counter_with_registry!(
                "vote_sync_events_retried_total",
                "Apply attempts re-queued after a failure",
                registry,
            )
            .unwrap(),
            events_dead_lettered_total: register_int_counter_with_registry!(
                "vote_sync_events_dead_lettered_total",
                "Events written to the dead-letter sink",
                registry,
            )
            .unwrap(),
            events_decode_errors_total: register_int_counter_with_registry!(
                "vote_sync_events_decode_errors_total",
                "Logs that could not be decoded as VoteCast events",
                registry,
            )
            .unwrap(),
            retry_queue_depth: register_int_gauge_with_registry!(
                "vote_sync_retry_queue_depth",
                "Events currently queued for apply or retry",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}

async fn metrics_handler(State(registry): State<Registry>) -> (StatusCode, String) {
    match TextEncoder::new().encode_to_string(&registry.gather()) {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {:?}", e),
        ),
    }
}

/// Serve the prometheus text endpoint on `/metrics`.
pub async fn start_metrics_server(
    addr: SocketAddr,
    registry: Registry,
) -> anyhow::Result<JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(|| async { "OK" }))
        .with_state(registry);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("[vote-sync] Metrics server listening on {}", addr);
    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("[vote-sync] Metrics server exited: {:?}", e);
        }
    }))
}
