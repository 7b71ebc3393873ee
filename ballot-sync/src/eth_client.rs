// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::contract::EthEvent;
use ethers::providers::{Http, JsonRpcClient, Middleware, Provider};
use ethers::types::Address as EthAddress;
use ethers::types::{Filter, Log};
use tap::TapFallible;

use crate::error::{SyncError, SyncResult};
use crate::events::VoteCastFilter;

#[cfg(test)]
use crate::test_utils::MockJsonRpc;

/// Thin wrapper over an ethers JSON-RPC provider, scoped to a single
/// ballot contract. Generic over the transport so tests can inject a mock.
pub struct EthClient<P> {
    provider: Provider<P>,
    contract_address: EthAddress,
    /// Expected chain ID for validation
    expected_chain_id: Option<u64>,
}

impl EthClient<Http> {
    pub async fn new(
        provider_url: &str,
        contract_address: EthAddress,
        expected_chain_id: Option<u64>,
    ) -> anyhow::Result<Self> {
        let provider = Provider::<Http>::try_from(provider_url)?;
        let self_ = Self {
            provider,
            contract_address,
            expected_chain_id,
        };
        self_
            .describe()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to validate RPC endpoint: {:?}", e))?;
        Ok(self_)
    }
}

#[cfg(test)]
impl EthClient<MockJsonRpc> {
    pub fn new_mocked(provider: MockJsonRpc, contract_address: EthAddress) -> Self {
        Self {
            provider: Provider::new(provider),
            contract_address,
            expected_chain_id: None,
        }
    }
}

impl<P> EthClient<P>
where
    P: JsonRpcClient + 'static,
{
    pub async fn get_chain_id(&self) -> SyncResult<u64> {
        let chain_id = self
            .provider
            .get_chainid()
            .await
            .map_err(|e| SyncError::TransientProviderError(format!("{:?}", e)))?;
        Ok(chain_id.as_u64())
    }

    pub async fn get_latest_block(&self) -> SyncResult<u64> {
        let block_number = self
            .provider
            .get_block_number()
            .await
            .map_err(|e| SyncError::TransientProviderError(format!("{:?}", e)))?;
        Ok(block_number.as_u64())
    }

    // Validate chain identifier and log connection info
    async fn describe(&self) -> SyncResult<()> {
        let chain_id = self.get_chain_id().await?;
        let latest_block = self.get_latest_block().await?;

        // Validate chain ID if expected value is set
        if let Some(expected) = self.expected_chain_id {
            if chain_id != expected {
                return Err(SyncError::ChainIdMismatch {
                    expected,
                    actual: chain_id,
                });
            }
            tracing::info!(
                "[vote-sync] Connected to chain {} (verified), contract {:?}, current block: {}",
                chain_id,
                self.contract_address,
                latest_block
            );
        } else {
            tracing::warn!(
                "[vote-sync] Connected to chain {} (NOT VERIFIED - no expected chain ID set), contract {:?}, current block: {}",
                chain_id,
                self.contract_address,
                latest_block
            );
        }
        Ok(())
    }

    // Note: query may fail if range is too big. Callsite is responsible
    // for chunking the query.
    pub async fn get_vote_logs_in_range(
        &self,
        start_block: u64,
        end_block: u64,
    ) -> SyncResult<Vec<Log>> {
        let filter = Filter::new()
            .from_block(start_block)
            .to_block(end_block)
            .address(self.contract_address)
            .topic0(VoteCastFilter::signature());
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| SyncError::TransientProviderError(format!("{:?}", e)))
            .tap_err(|e| {
                tracing::error!(
                    "get_vote_logs_in_range failed. Filter: {:?}. Error {:?}",
                    filter,
                    e
                )
            })?;

        // Safeguard check that all events are emitted from the requested contract address
        if logs.iter().any(|log| log.address != self.contract_address) {
            return Err(SyncError::ProviderError(format!(
                "Provider returns logs from different contract address (expected: {:?}): {:?}",
                self.contract_address, logs
            )));
        }
        Ok(logs)
    }

    pub fn contract_address(&self) -> EthAddress {
        self.contract_address
    }
}
