// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory [`VoteStore`] for unit tests. One mutex around all state, so the
//! credit path has the same all-or-nothing behavior as the SQL statement.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::types::TxHash;

use crate::error::SyncResult;
use crate::events::VoteEvent;
use crate::storage::{CreditOutcome, VoteStore};

#[derive(Default)]
struct Inner {
    // onchain id -> row id
    elections: HashMap<u64, i64>,
    // (election row id, onchain id) -> row id
    candidates: HashMap<(i64, u64), i64>,
    // candidate row id -> tally
    votes: HashMap<i64, i64>,
    voters: HashSet<(i64, String)>,
    processed: HashSet<(String, u64)>,
    checkpoints: HashMap<String, u64>,
    dead_letters: Vec<(String, serde_json::Value)>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryVoteStore {
    inner: Mutex<Inner>,
}

impl MemoryVoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_election(&self, onchain_id: u64) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.elections.insert(onchain_id, id);
        id
    }

    pub fn add_candidate(&self, election_id: i64, onchain_id: u64) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.candidates.insert((election_id, onchain_id), id);
        inner.votes.insert(id, 0);
        id
    }

    pub fn votes(&self, candidate_id: i64) -> i64 {
        *self
            .inner
            .lock()
            .unwrap()
            .votes
            .get(&candidate_id)
            .unwrap_or(&0)
    }

    pub fn processed_count(&self) -> usize {
        self.inner.lock().unwrap().processed.len()
    }

    pub fn dead_letters(&self) -> Vec<(String, serde_json::Value)> {
        self.inner.lock().unwrap().dead_letters.clone()
    }

    pub fn seed_processed(&self, tx_hash: &TxHash, log_index: u64) {
        self.inner
            .lock()
            .unwrap()
            .processed
            .insert((format!("{:?}", tx_hash), log_index));
    }
}

#[async_trait]
impl VoteStore for MemoryVoteStore {
    async fn checkpoint(&self, task_name: &str) -> SyncResult<Option<u64>> {
        Ok(self.inner.lock().unwrap().checkpoints.get(task_name).copied())
    }

    async fn save_checkpoint(&self, task_name: &str, block_number: u64) -> SyncResult<()> {
        self.inner
            .lock()
            .unwrap()
            .checkpoints
            .insert(task_name.to_string(), block_number);
        Ok(())
    }

    async fn is_processed(&self, tx_hash: &TxHash, log_index: u64) -> SyncResult<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .processed
            .contains(&(format!("{:?}", tx_hash), log_index)))
    }

    async fn record_processed(
        &self,
        event: &VoteEvent,
        _election_id: i64,
        _candidate_id: i64,
    ) -> SyncResult<bool> {
        let Some((tx_hash, log_index)) = event.ledger_key() else {
            return Ok(false);
        };
        Ok(self
            .inner
            .lock()
            .unwrap()
            .processed
            .insert((format!("{:?}", tx_hash), log_index)))
    }

    async fn election_id(&self, onchain_id: u64) -> SyncResult<Option<i64>> {
        Ok(self.inner.lock().unwrap().elections.get(&onchain_id).copied())
    }

    async fn candidate_id(&self, election_id: i64, onchain_id: u64) -> SyncResult<Option<i64>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .candidates
            .get(&(election_id, onchain_id))
            .copied())
    }

    async fn credit_vote(
        &self,
        election_id: i64,
        candidate_id: i64,
        voter_key: &str,
    ) -> SyncResult<CreditOutcome> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.voters.insert((election_id, voter_key.to_string())) {
            return Ok(CreditOutcome::AlreadyCredited);
        }
        *inner.votes.entry(candidate_id).or_insert(0) += 1;
        Ok(CreditOutcome::Applied)
    }

    async fn record_dead_letter(
        &self,
        component: &str,
        details: serde_json::Value,
    ) -> SyncResult<()> {
        self.inner
            .lock()
            .unwrap()
            .dead_letters
            .push((component.to_string(), details));
        Ok(())
    }
}
