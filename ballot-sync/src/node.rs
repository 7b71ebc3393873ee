// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Assembles the sync pipeline: database, checkpoint persister, retry queue,
//! projector, and chain syncer.

use std::sync::Arc;

use anyhow::anyhow;
use ballot_sync_pg_db::{Db, DbArgs};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::checkpoint::{spawn_checkpoint_persister, CheckpointTracker};
use crate::config::VoteSyncConfig;
use crate::eth_client::EthClient;
use crate::metrics::VoteSyncMetrics;
use crate::projector::VoteProjector;
use crate::retry_queue::{spawn_retry_consumer, RetryQueue};
use crate::storage::pg::PgVoteStore;
use crate::storage::VoteStore;
use crate::syncer::{sync_task_name, VoteSyncer};

/// Start the sync pipeline. Returns `Ok(None)` when chain sync is disabled,
/// the contract address does not parse, or the RPC provider is unreachable;
/// the process stays up in every such case so the metrics endpoint keeps
/// serving. Database failures are hard errors.
pub async fn run_sync_node(
    config: VoteSyncConfig,
    database_url: Url,
    db_args: DbArgs,
    registry: &prometheus::Registry,
    cancel: CancellationToken,
) -> anyhow::Result<Option<Vec<JoinHandle<()>>>> {
    if !config.chain_sync_enabled {
        tracing::warn!("[vote-sync] Chain sync disabled by config");
        return Ok(None);
    }

    let contract_address = match config.contract_address() {
        Ok(address) => address,
        Err(e) => {
            tracing::warn!(
                "[vote-sync] Invalid ballot contract address, running without chain sync: {:?}",
                e
            );
            return Ok(None);
        }
    };
    let client = match tokio::time::timeout(
        config.startup_timeout(),
        EthClient::new(
            &config.eth_rpc_url,
            contract_address,
            config.expected_chain_id,
        ),
    )
    .await
    {
        Ok(Ok(client)) => Arc::new(client),
        Ok(Err(e)) => {
            tracing::warn!(
                "[vote-sync] RPC provider unavailable, running without chain sync: {:?}",
                e
            );
            return Ok(None);
        }
        Err(_) => {
            tracing::warn!(
                "[vote-sync] RPC provider validation timed out after {:?}, running without chain sync",
                config.startup_timeout()
            );
            return Ok(None);
        }
    };

    let metrics = Arc::new(VoteSyncMetrics::new(registry));

    let db = Db::for_write(database_url, db_args).await?;
    db.run_migrations(&ballot_sync_schema::MIGRATIONS).await?;
    let store = Arc::new(PgVoteStore::new(db));

    let task_name = sync_task_name(&contract_address);
    let initial_checkpoint = store
        .checkpoint(&task_name)
        .await
        .map_err(|e| anyhow!("Failed to read checkpoint: {:?}", e))?;

    let tracker = CheckpointTracker::new();
    let mut handles = vec![spawn_checkpoint_persister(
        store.clone(),
        task_name,
        initial_checkpoint,
        tracker.subscribe(),
        metrics.clone(),
        cancel.clone(),
    )];

    let (queue, queue_rx) = RetryQueue::channel(metrics.clone());
    let projector = Arc::new(VoteProjector::new(store.clone(), metrics.clone()));
    handles.push(spawn_retry_consumer(
        queue_rx,
        queue.clone(),
        projector,
        tracker.clone(),
        metrics.clone(),
        cancel.clone(),
    ));

    // The syncer reads its checkpoint and the chain head before spawning, so
    // startup also bounds that first round trip
    let startup_timeout = config.startup_timeout();
    let syncer = VoteSyncer::new(config, client, store, queue, tracker, metrics);
    match tokio::time::timeout(startup_timeout, syncer.run(cancel.clone())).await {
        Ok(spawned) => handles
            .extend(spawned.map_err(|e| anyhow!("Failed to start chain syncer: {:?}", e))?),
        Err(_) => {
            tracing::warn!(
                "[vote-sync] Chain syncer startup timed out after {:?}, running without chain sync",
                startup_timeout
            );
            cancel.cancel();
            return Ok(None);
        }
    }

    Ok(Some(handles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_tracing;

    #[tokio::test]
    async fn test_disabled_sync_returns_none() {
        init_tracing();
        let config = VoteSyncConfig {
            chain_sync_enabled: false,
            ..VoteSyncConfig::default()
        };
        let result = run_sync_node(
            config,
            Url::parse("postgres://localhost/ballots").unwrap(),
            DbArgs::default(),
            &prometheus::Registry::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_invalid_contract_address_disables_sync() {
        init_tracing();
        let config = VoteSyncConfig {
            ballot_contract_address: "bogus".to_string(),
            ..VoteSyncConfig::default()
        };
        // A bad address keeps the host process alive without chain sync
        let result = run_sync_node(
            config,
            Url::parse("postgres://localhost/ballots").unwrap(),
            DbArgs::default(),
            &prometheus::Registry::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }
}
