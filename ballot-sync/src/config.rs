// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::time::Duration;

use ethers::types::Address as EthAddress;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::serde_as;

/// File-backed config. YAML for .yaml/.yml paths, JSON otherwise.
pub trait Config: Serialize + DeserializeOwned {
    fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = if path.extension().and_then(|s| s.to_str()) == Some("yaml")
            || path.extension().and_then(|s| s.to_str()) == Some("yml")
        {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct VoteSyncConfig {
    // Rpc url for the Eth fullnode the syncer follows.
    pub eth_rpc_url: String,
    // Address of the deployed ballot contract.
    pub ballot_contract_address: String,
    // The expected chain id, validated at startup when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_chain_id: Option<u64>,
    // Block the ballot contract was deployed at; sync never starts below it.
    #[serde(default)]
    pub start_block: u64,
    // Upper bound on blocks per eth_getLogs query.
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_latest_block_interval_ms")]
    pub latest_block_interval_ms: u64,
    // Give up on an RPC call after retrying for this long.
    #[serde(default = "default_max_retry_duration_secs")]
    pub max_retry_duration_secs: u64,
    // Give up on validating the RPC endpoint at startup after this long.
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    // The port for the metrics server.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    // Disable to run the host process without chain sync.
    #[serde(default = "default_chain_sync_enabled")]
    pub chain_sync_enabled: bool,
}

fn default_max_block_range() -> u64 {
    1000
}

fn default_latest_block_interval_ms() -> u64 {
    2000
}

fn default_max_retry_duration_secs() -> u64 {
    600
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_metrics_port() -> u16 {
    9184
}

fn default_chain_sync_enabled() -> bool {
    true
}

impl Config for VoteSyncConfig {}

impl VoteSyncConfig {
    pub fn contract_address(&self) -> anyhow::Result<EthAddress> {
        self.ballot_contract_address
            .parse::<EthAddress>()
            .map_err(|e| {
                anyhow::anyhow!(
                    "Invalid ballot contract address {}: {}",
                    self.ballot_contract_address,
                    e
                )
            })
    }

    pub fn latest_block_interval(&self) -> Duration {
        Duration::from_millis(self.latest_block_interval_ms)
    }

    pub fn max_retry_duration(&self) -> Duration {
        Duration::from_secs(self.max_retry_duration_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

impl Default for VoteSyncConfig {
    fn default() -> Self {
        Self {
            eth_rpc_url: "http://localhost:8545".to_string(),
            ballot_contract_address: format!("{:?}", EthAddress::zero()),
            expected_chain_id: None,
            start_block: 0,
            max_block_range: default_max_block_range(),
            latest_block_interval_ms: default_latest_block_interval_ms(),
            max_retry_duration_secs: default_max_retry_duration_secs(),
            startup_timeout_secs: default_startup_timeout_secs(),
            metrics_port: default_metrics_port(),
            chain_sync_enabled: default_chain_sync_enabled(),
        }
    }
}
