// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

use diesel::prelude::*;

use crate::schema::{dead_letters, processed_events};

/// Idempotency ledger row. Insert-only, keyed by (tx_hash, log_index).
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = processed_events)]
pub struct NewProcessedEvent {
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
    pub election_id: i64,
    pub candidate_id: i64,
}

/// Append-only dead-letter record. Never read by the sync pipeline.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = dead_letters)]
pub struct NewDeadLetter {
    pub component: String,
    pub level: String,
    pub details: serde_json::Value,
}

impl NewDeadLetter {
    pub fn error(component: &str, details: serde_json::Value) -> Self {
        Self {
            component: component.to_string(),
            level: "error".to_string(),
            details,
        }
    }
}
