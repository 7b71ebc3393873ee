// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Vote projection: folds one decoded VoteCast event into the tally.
//!
//! Apply order per event:
//! 1. Idempotency ledger pre-check by (tx_hash, log_index), when present.
//! 2. Resolve election and candidate by on-chain id. Misses are successful
//!    no-ops, not failures.
//! 3. Atomic conditional credit keyed by voter key.
//! 4. Insert the ledger record only when the credit landed, swallowing
//!    duplicate keys.
//!
//! Every step is idempotent, so redelivery at any point is harmless.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::events::VoteEvent;
use crate::metrics::VoteSyncMetrics;
use crate::retry_queue::VoteHandler;
use crate::storage::{CreditOutcome, VoteStore};

/// Terminal result of applying one event. All variants count as success for
/// the retry queue; only errors are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Tally incremented by one.
    Applied,
    /// Ledger already contained the (tx_hash, log_index) key.
    AlreadyProcessed,
    /// Voter key already present in the election's voter list.
    AlreadyCredited,
    /// No election with this on-chain id.
    UnknownElection,
    /// No candidate with this on-chain id in the resolved election.
    UnknownCandidate,
}

pub struct VoteProjector<S> {
    store: Arc<S>,
    metrics: Arc<VoteSyncMetrics>,
}

impl<S: VoteStore> VoteProjector<S> {
    pub fn new(store: Arc<S>, metrics: Arc<VoteSyncMetrics>) -> Self {
        Self { store, metrics }
    }

    pub async fn apply(&self, event: &VoteEvent) -> SyncResult<ApplyOutcome> {
        if let Some((tx_hash, log_index)) = event.ledger_key() {
            if self.store.is_processed(&tx_hash, log_index).await? {
                tracing::debug!(
                    "[vote-sync] Skipping already processed event {:?}/{}",
                    tx_hash,
                    log_index
                );
                return Ok(ApplyOutcome::AlreadyProcessed);
            }
        }

        let Some(election_id) = self.store.election_id(event.election_onchain_id).await? else {
            tracing::warn!(
                "[vote-sync] No election with on-chain id {}, skipping event at block {}",
                event.election_onchain_id,
                event.block_number
            );
            self.metrics.events_skipped_total.inc();
            return Ok(ApplyOutcome::UnknownElection);
        };

        let Some(candidate_id) = self
            .store
            .candidate_id(election_id, event.candidate_onchain_id)
            .await?
        else {
            tracing::warn!(
                "[vote-sync] No candidate with on-chain id {} in election {}, skipping event at block {}",
                event.candidate_onchain_id,
                event.election_onchain_id,
                event.block_number
            );
            self.metrics.events_skipped_total.inc();
            return Ok(ApplyOutcome::UnknownCandidate);
        };

        let voter_key = event.voter_key();
        let outcome = self
            .store
            .credit_vote(election_id, candidate_id, &voter_key)
            .await?;

        // The ledger records credits that landed; a no-op credit leaves
        // redelivery suppression to the voter-list claim. Record after the
        // credit: a crash in between redelivers the event, and the claim
        // absorbs the replay.
        if outcome == CreditOutcome::Applied && event.ledger_key().is_some() {
            let inserted = self
                .store
                .record_processed(event, election_id, candidate_id)
                .await?;
            if !inserted {
                tracing::debug!(
                    "[vote-sync] Ledger record for {:?} already written by a concurrent apply",
                    event.ledger_key()
                );
            }
        }

        Ok(match outcome {
            CreditOutcome::Applied => ApplyOutcome::Applied,
            CreditOutcome::AlreadyCredited => ApplyOutcome::AlreadyCredited,
        })
    }
}

#[async_trait]
impl<S: VoteStore + 'static> VoteHandler for VoteProjector<S> {
    async fn apply(&self, event: &VoteEvent) -> SyncResult<ApplyOutcome> {
        VoteProjector::apply(self, event).await
    }

    async fn record_dead_letter(
        &self,
        component: &str,
        details: serde_json::Value,
    ) -> SyncResult<()> {
        self.store.record_dead_letter(component, details).await
    }
}
