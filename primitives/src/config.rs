use std::{collections::HashMap, net::SocketAddr};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Address, Asset, Chain, ChainId};

pub use toml::de::Error as TomlError;

/// Development defaults, usable in tests without any file on disk.
pub static DEVELOPMENT_CONFIG: Lazy<Config> = Lazy::new(|| {
    Config::try_toml(include_str!("../../docs/config/development.toml"))
        .expect("Failed to parse development.toml config file")
});

/// Broker process configuration, deserialized from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Socket the websocket endpoint binds to.
    pub listen_addr: SocketAddr,
    /// Postgres connection string; overridable through `DATABASE_URL`.
    pub database_url: String,
    /// Hex-encoded broker secp256k1 key; overridable through
    /// `CLEARNODE_PRIVATE_KEY` so production keys stay off disk.
    pub private_key: String,
    /// Lifetime of an outstanding auth challenge.
    pub challenge_ttl_secs: u64,
    /// Websocket keep-alive ping interval.
    pub ping_interval_secs: u64,
    /// Custody event log poll interval per chain.
    pub poll_interval_ms: u64,
    /// Cap for the reconciler's exponential retry backoff.
    pub max_backoff_secs: u64,
    /// Keyed by a human-readable chain name for config readability.
    #[serde(rename = "chain")]
    pub chains: HashMap<String, ChainInfo>,
}

/// Configured chain with its whitelisted tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    #[serde(flatten)]
    pub chain: Chain,
    #[serde(rename = "token")]
    pub tokens: HashMap<String, TokenInfo>,
}

/// A token whitelisted on a specific chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Toml parsing: {0}")]
    Toml(#[from] TomlError),
    #[error("File reading: {0}")]
    InvalidFile(#[from] std::io::Error),
}

impl Config {
    /// Deserialize a TOML string into a [`Config`]; use this instead of
    /// reaching for the `toml` crate directly.
    pub fn try_toml(toml: &str) -> Result<Self, TomlError> {
        toml::from_str(toml)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;

        Ok(Self::try_toml(&content)?)
    }

    pub fn find_chain(&self, chain_id: ChainId) -> Option<&ChainInfo> {
        self.chains
            .values()
            .find(|chain_info| chain_info.chain.chain_id == chain_id)
    }

    /// Every configured `(token, chain)` entry as an [`Asset`] row, the set
    /// seeded into the asset registry at startup.
    pub fn assets(&self) -> Vec<Asset> {
        self.chains
            .values()
            .flat_map(|chain_info| {
                chain_info.tokens.values().map(|token| Asset {
                    symbol: token.symbol.clone(),
                    token: token.address,
                    chain_id: chain_info.chain.chain_id,
                    decimals: token.decimals,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn development_config_parses() {
        let config = &*DEVELOPMENT_CONFIG;

        assert!(!config.chains.is_empty(), "dev config should have a chain");
        assert!(config.challenge_ttl_secs > 0);

        let assets = config.assets();
        assert!(!assets.is_empty(), "dev config should whitelist a token");

        let chain = config
            .find_chain(assets[0].chain_id)
            .expect("asset chain must be configured");
        assert!(chain.tokens.values().any(|t| t.address == assets[0].token));
    }

    #[test]
    fn chain_lookup_misses_unknown_ids() {
        assert!(DEVELOPMENT_CONFIG.find_chain(ChainId::new(999_999)).is_none());
    }
}
