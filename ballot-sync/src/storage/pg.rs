// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use ballot_sync_pg_db::Db;
use ballot_sync_schema::models::{NewDeadLetter, NewProcessedEvent};
use ballot_sync_schema::schema::{
    candidates, checkpoints, dead_letters, elections, processed_events,
};
use diesel::sql_types::{BigInt, Text};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl};
use diesel_async::RunQueryDsl;
use ethers::types::TxHash;

use crate::error::{SyncError, SyncResult};
use crate::events::VoteEvent;
use crate::storage::{CreditOutcome, VoteStore};

/// One round trip: claim the voter key, and only if the claim inserted a row,
/// bump the candidate tally. `ON CONFLICT DO NOTHING` on the claim makes the
/// whole statement a no-op for a voter that already voted in this election.
/// Every writer that credits votes (this engine and the direct API vote path)
/// must go through this statement.
const CREDIT_VOTE_SQL: &str = "\
WITH claim AS (
    INSERT INTO election_voters (election_id, voter_key)
    VALUES ($1, $2)
    ON CONFLICT DO NOTHING
    RETURNING election_id
)
UPDATE candidates
SET votes = votes + 1
WHERE id = $3
  AND EXISTS (SELECT 1 FROM claim)";

#[derive(Clone)]
pub struct PgVoteStore {
    db: Db,
}

impl PgVoteStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn storage_err(e: impl std::fmt::Debug) -> SyncError {
    SyncError::StorageError(format!("{:?}", e))
}

#[async_trait]
impl VoteStore for PgVoteStore {
    async fn checkpoint(&self, task_name: &str) -> SyncResult<Option<u64>> {
        use checkpoints::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        // Only select block_number to avoid type mismatch issues with timestamp
        let result: Option<i64> = dsl::checkpoints
            .filter(dsl::task_name.eq(task_name))
            .select(dsl::block_number)
            .first(&mut *conn)
            .await
            .optional()
            .map_err(storage_err)?;

        Ok(result.map(|b| b as u64))
    }

    async fn save_checkpoint(&self, task_name: &str, block_number: u64) -> SyncResult<()> {
        use checkpoints::dsl;
        use diesel::dsl::now;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        diesel::insert_into(dsl::checkpoints)
            .values((
                dsl::task_name.eq(task_name),
                dsl::block_number.eq(block_number as i64),
                dsl::timestamp.eq(now),
            ))
            .on_conflict(dsl::task_name)
            .do_update()
            .set((
                dsl::block_number.eq(block_number as i64),
                dsl::timestamp.eq(now),
            ))
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;

        tracing::debug!(
            "[vote-sync] Updated checkpoint for '{}' to {}",
            task_name,
            block_number
        );
        Ok(())
    }

    async fn is_processed(&self, tx_hash: &TxHash, log_index: u64) -> SyncResult<bool> {
        use processed_events::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let found: Option<String> = dsl::processed_events
            .filter(dsl::tx_hash.eq(format!("{:?}", tx_hash)))
            .filter(dsl::log_index.eq(log_index as i64))
            .select(dsl::tx_hash)
            .first(&mut *conn)
            .await
            .optional()
            .map_err(storage_err)?;

        Ok(found.is_some())
    }

    async fn record_processed(
        &self,
        event: &VoteEvent,
        election_id: i64,
        candidate_id: i64,
    ) -> SyncResult<bool> {
        let Some((tx_hash, log_index)) = event.ledger_key() else {
            return Ok(false);
        };

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let record = NewProcessedEvent {
            tx_hash: format!("{:?}", tx_hash),
            log_index: log_index as i64,
            block_number: event.block_number as i64,
            election_id,
            candidate_id,
        };

        let inserted = diesel::insert_into(processed_events::table)
            .values(&record)
            .on_conflict_do_nothing()
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;

        Ok(inserted > 0)
    }

    async fn election_id(&self, onchain_id: u64) -> SyncResult<Option<i64>> {
        use elections::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        dsl::elections
            .filter(dsl::onchain_id.eq(onchain_id as i64))
            .select(dsl::id)
            .first(&mut *conn)
            .await
            .optional()
            .map_err(storage_err)
    }

    async fn candidate_id(&self, election_id: i64, onchain_id: u64) -> SyncResult<Option<i64>> {
        use candidates::dsl;

        let mut conn = self.db.connect().await.map_err(storage_err)?;

        dsl::candidates
            .filter(dsl::election_id.eq(election_id))
            .filter(dsl::onchain_id.eq(onchain_id as i64))
            .select(dsl::id)
            .first(&mut *conn)
            .await
            .optional()
            .map_err(storage_err)
    }

    async fn credit_vote(
        &self,
        election_id: i64,
        candidate_id: i64,
        voter_key: &str,
    ) -> SyncResult<CreditOutcome> {
        let mut conn = self.db.connect().await.map_err(storage_err)?;

        let updated = diesel::sql_query(CREDIT_VOTE_SQL)
            .bind::<BigInt, _>(election_id)
            .bind::<Text, _>(voter_key)
            .bind::<BigInt, _>(candidate_id)
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;

        Ok(if updated > 0 {
            CreditOutcome::Applied
        } else {
            CreditOutcome::AlreadyCredited
        })
    }

    async fn record_dead_letter(
        &self,
        component: &str,
        details: serde_json::Value,
    ) -> SyncResult<()> {
        let mut conn = self.db.connect().await.map_err(storage_err)?;

        diesel::insert_into(dead_letters::table)
            .values(&NewDeadLetter::error(component, details))
            .execute(&mut *conn)
            .await
            .map_err(storage_err)?;

        Ok(())
    }
}
