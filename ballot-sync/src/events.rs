// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

//! VoteCast event decoding.
//!
//! The event schema is fixed at build time: `VoteCast(uint256 electionId,
//! uint256 candidateId, address voter)`. Logs that do not decode are skipped
//! by the syncer, they never abort a range.

use ethers::abi::RawLog;
use ethers::contract::EthEvent;
use ethers::types::{Address as EthAddress, Log, TxHash, U256};

use crate::error::{SyncError, SyncResult};

#[derive(Clone, Debug, Default, Eq, PartialEq, EthEvent)]
#[ethevent(name = "VoteCast", abi = "VoteCast(uint256,uint256,address)")]
pub struct VoteCastFilter {
    pub election_id: U256,
    pub candidate_id: U256,
    pub voter: EthAddress,
}

/// A decoded VoteCast event with the chain coordinates the pipeline needs.
///
/// `tx_hash` and `log_index` are nullable in the provider's `Log` type.
/// Degraded providers can omit them, in which case the event bypasses the
/// idempotency ledger and relies on the voter-key conditional credit alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteEvent {
    pub election_onchain_id: u64,
    pub candidate_onchain_id: u64,
    pub voter: Option<EthAddress>,
    pub block_number: u64,
    pub tx_hash: Option<TxHash>,
    pub log_index: Option<u64>,
}

impl VoteEvent {
    pub fn try_from_log(log: &Log) -> SyncResult<Self> {
        let block_number = log
            .block_number
            .ok_or_else(|| {
                SyncError::ProviderError("Provider returns log without block_number".into())
            })?
            .as_u64();

        let raw = VoteCastFilter::decode_log(&RawLog::from(log.clone()))
            .map_err(|e| SyncError::DecodeError(format!("{:?}", e)))?;

        let election_onchain_id = uint_to_id(raw.election_id, "electionId")?;
        let candidate_onchain_id = uint_to_id(raw.candidate_id, "candidateId")?;

        // The zero address means the contract did not record a voter.
        let voter = (!raw.voter.is_zero()).then_some(raw.voter);

        Ok(Self {
            election_onchain_id,
            candidate_onchain_id,
            voter,
            block_number,
            tx_hash: log.transaction_hash,
            log_index: log.log_index.map(|i| i.as_u64()),
        })
    }

    /// Idempotency ledger key, present only when the provider populated both parts.
    pub fn ledger_key(&self) -> Option<(TxHash, u64)> {
        Some((self.tx_hash?, self.log_index?))
    }

    /// Stable identity used by the at-most-one-vote-per-voter rule.
    ///
    /// Fallback chain: voter address, then tx hash, then block number.
    pub fn voter_key(&self) -> String {
        if let Some(voter) = self.voter {
            return format!("{:?}", voter);
        }
        if let Some(tx_hash) = self.tx_hash {
            return format!("{:?}", tx_hash);
        }
        format!("block-{}", self.block_number)
    }
}

fn uint_to_id(value: U256, field: &str) -> SyncResult<u64> {
    if value > U256::from(i64::MAX) {
        return Err(SyncError::DecodeError(format!(
            "{} {} does not fit a 64-bit id",
            field, value
        )));
    }
    Ok(value.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::vote_log;
    use ethers::types::{Bytes, H256, U64};

    #[test]
    fn test_decode_valid_log() {
        let contract = EthAddress::repeat_byte(1);
        let voter = EthAddress::repeat_byte(2);
        let tx_hash = TxHash::random();
        let log = vote_log(contract, 7, 3, voter, 100, Some(tx_hash), Some(5));

        let event = VoteEvent::try_from_log(&log).unwrap();
        assert_eq!(event.election_onchain_id, 7);
        assert_eq!(event.candidate_onchain_id, 3);
        assert_eq!(event.voter, Some(voter));
        assert_eq!(event.block_number, 100);
        assert_eq!(event.ledger_key(), Some((tx_hash, 5)));
        assert_eq!(event.voter_key(), format!("{:?}", voter));
    }

    #[test]
    fn test_decode_malformed_data_fails() {
        let mut log = vote_log(
            EthAddress::repeat_byte(1),
            7,
            3,
            EthAddress::repeat_byte(2),
            100,
            Some(TxHash::random()),
            Some(0),
        );
        // Truncate the ABI payload
        log.data = Bytes::from(log.data[..31].to_vec());

        let err = VoteEvent::try_from_log(&log).unwrap_err();
        assert_eq!(err.error_type(), "decode_error");
    }

    #[test]
    fn test_decode_wrong_topic_fails() {
        let mut log = vote_log(
            EthAddress::repeat_byte(1),
            7,
            3,
            EthAddress::repeat_byte(2),
            100,
            Some(TxHash::random()),
            Some(0),
        );
        log.topics = vec![H256::random()];

        let err = VoteEvent::try_from_log(&log).unwrap_err();
        assert_eq!(err.error_type(), "decode_error");
    }

    #[test]
    fn test_decode_missing_block_number_fails() {
        let mut log = vote_log(
            EthAddress::repeat_byte(1),
            7,
            3,
            EthAddress::repeat_byte(2),
            100,
            Some(TxHash::random()),
            Some(0),
        );
        log.block_number = None;

        let err = VoteEvent::try_from_log(&log).unwrap_err();
        assert_eq!(err.error_type(), "provider_error");
    }

    #[test]
    fn test_zero_address_voter_falls_back_to_tx_hash() {
        let tx_hash = TxHash::random();
        let log = vote_log(
            EthAddress::repeat_byte(1),
            7,
            3,
            EthAddress::zero(),
            100,
            Some(tx_hash),
            Some(0),
        );

        let event = VoteEvent::try_from_log(&log).unwrap();
        assert_eq!(event.voter, None);
        assert_eq!(event.voter_key(), format!("{:?}", tx_hash));
    }

    #[test]
    fn test_missing_tx_hash_falls_back_to_block_number() {
        let mut log = vote_log(
            EthAddress::repeat_byte(1),
            7,
            3,
            EthAddress::zero(),
            42,
            None,
            None,
        );
        log.block_number = Some(U64::from(42));

        let event = VoteEvent::try_from_log(&log).unwrap();
        assert_eq!(event.ledger_key(), None);
        assert_eq!(event.voter_key(), "block-42");
    }

    #[test]
    fn test_oversized_election_id_fails() {
        let contract = EthAddress::repeat_byte(1);
        let mut log = vote_log(
            contract,
            7,
            3,
            EthAddress::repeat_byte(2),
            100,
            Some(TxHash::random()),
            Some(0),
        );
        // Overwrite the first word with U256::MAX
        let mut data = log.data.to_vec();
        data[..32].copy_from_slice(&[0xff; 32]);
        log.data = Bytes::from(data);

        let err = VoteEvent::try_from_log(&log).unwrap_err();
        assert_eq!(err.error_type(), "decode_error");
    }
}
