// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Storage seam between the projection pipeline and PostgreSQL.
//!
//! Everything the pipeline persists goes through [`VoteStore`]: the
//! checkpoint, the idempotency ledger, the atomic vote credit, and the
//! dead-letter sink. The production implementation is [`pg::PgVoteStore`];
//! unit tests run against an in-memory store.

use async_trait::async_trait;
use ethers::types::TxHash;

use crate::error::SyncResult;
use crate::events::VoteEvent;

#[cfg(test)]
pub mod memory;
pub mod pg;

/// Result of the conditional vote credit.
///
/// `AlreadyCredited` is a successful no-op: the voter key was present in the
/// election's voter list, so no tally changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Applied,
    AlreadyCredited,
}

#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Last fully drained block for `task_name`, or None before the first sync.
    async fn checkpoint(&self, task_name: &str) -> SyncResult<Option<u64>>;

    /// Upsert the checkpoint. Callers only pass non-decreasing values.
    async fn save_checkpoint(&self, task_name: &str, block_number: u64) -> SyncResult<()>;

    /// Idempotency ledger membership check.
    async fn is_processed(&self, tx_hash: &TxHash, log_index: u64) -> SyncResult<bool>;

    /// Insert the ledger record. Returns false when another writer got there
    /// first (duplicate key, swallowed).
    async fn record_processed(
        &self,
        event: &VoteEvent,
        election_id: i64,
        candidate_id: i64,
    ) -> SyncResult<bool>;

    /// Resolve an on-chain election id to the local row id.
    async fn election_id(&self, onchain_id: u64) -> SyncResult<Option<i64>>;

    /// Resolve an on-chain candidate id within an election to the local row id.
    async fn candidate_id(&self, election_id: i64, onchain_id: u64) -> SyncResult<Option<i64>>;

    /// Atomically claim `voter_key` for the election and, only if the claim
    /// succeeds, increment the candidate's tally. Single statement on the
    /// database side; no two writers can both credit the same voter.
    async fn credit_vote(
        &self,
        election_id: i64,
        candidate_id: i64,
        voter_key: &str,
    ) -> SyncResult<CreditOutcome>;

    /// Append a dead-letter record.
    async fn record_dead_letter(
        &self,
        component: &str,
        details: serde_json::Value,
    ) -> SyncResult<()>;
}
