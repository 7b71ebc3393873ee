// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared test helpers: tracing setup, a mock JSON-RPC transport, and
//! constructors for VoteCast logs and events.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use ethers::abi::Token;
use ethers::contract::EthEvent;
use ethers::providers::{JsonRpcClient, MockError};
use ethers::types::{Address as EthAddress, Log, TxHash, U256, U64};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::events::{VoteCastFilter, VoteEvent};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Mock JSON-RPC transport keyed by method name.
///
/// Responses queue per method; the last queued response is sticky so polling
/// loops keep observing it. `eth_getLogs` is the exception: every queued
/// response contributes to one log set, and each request is answered with
/// the logs inside its block range, the way a real node would. A method with
/// no responses errors, which the client surfaces as a transient provider
/// error.
#[derive(Clone, Debug, Default)]
pub struct MockJsonRpc {
    responses: Arc<Mutex<HashMap<String, VecDeque<serde_json::Value>>>>,
}

impl MockJsonRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response<T: Serialize>(&self, method: &str, response: T) {
        let value = serde_json::to_value(response).expect("response must serialize");
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(value);
    }
}

#[async_trait]
impl JsonRpcClient for MockJsonRpc {
    type Error = MockError;

    async fn request<T, R>(&self, method: &str, params: T) -> Result<R, Self::Error>
    where
        T: Debug + Serialize + Send + Sync,
        R: DeserializeOwned + Send,
    {
        if method == "eth_getLogs" {
            let request = serde_json::to_value(&params)?;
            let from = hex_block(&request[0]["fromBlock"]).unwrap_or(0);
            let to = hex_block(&request[0]["toBlock"]).unwrap_or(u64::MAX);
            let logs: Vec<serde_json::Value> = self
                .responses
                .lock()
                .unwrap()
                .get(method)
                .ok_or(MockError::EmptyResponses)?
                .iter()
                .flat_map(|response| response.as_array().cloned().unwrap_or_default())
                .filter(|log| {
                    matches!(hex_block(&log["blockNumber"]), Some(b) if b >= from && b <= to)
                })
                .collect();
            return Ok(serde_json::from_value(serde_json::Value::Array(logs))?);
        }

        let value = {
            let mut responses = self.responses.lock().unwrap();
            let queue = responses.get_mut(method).ok_or(MockError::EmptyResponses)?;
            if queue.len() > 1 {
                queue.pop_front().ok_or(MockError::EmptyResponses)?
            } else {
                queue.front().cloned().ok_or(MockError::EmptyResponses)?
            }
        };
        Ok(serde_json::from_value(value)?)
    }
}

fn hex_block(value: &serde_json::Value) -> Option<u64> {
    u64::from_str_radix(value.as_str()?.strip_prefix("0x")?, 16).ok()
}

/// A raw VoteCast log as the RPC provider would return it.
pub fn vote_log(
    contract: EthAddress,
    election_onchain_id: u64,
    candidate_onchain_id: u64,
    voter: EthAddress,
    block_number: u64,
    tx_hash: Option<TxHash>,
    log_index: Option<u64>,
) -> Log {
    let data = ethers::abi::encode(&[
        Token::Uint(U256::from(election_onchain_id)),
        Token::Uint(U256::from(candidate_onchain_id)),
        Token::Address(voter),
    ]);
    Log {
        address: contract,
        topics: vec![VoteCastFilter::signature()],
        data: data.into(),
        block_number: Some(U64::from(block_number)),
        transaction_hash: tx_hash,
        log_index: log_index.map(U256::from),
        ..Default::default()
    }
}

/// A decoded event with a fresh transaction hash.
pub fn vote_event(
    election_onchain_id: u64,
    candidate_onchain_id: u64,
    voter: EthAddress,
    block_number: u64,
    log_index: u64,
) -> VoteEvent {
    VoteEvent {
        election_onchain_id,
        candidate_onchain_id,
        voter: Some(voter),
        block_number,
        tx_hash: Some(TxHash::random()),
        log_index: Some(log_index),
    }
}
