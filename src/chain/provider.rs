//! Chain provider with multi-RPC support and automatic failover

use super::ledger::LedgerRpc;
use crate::config::ChainConfig;
use crate::error::{VesError, VesResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::utils::to_checksum;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a provider over every parseable RPC URL
    pub fn new(config: ChainConfig) -> VesResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(VesError::ChainConnection {
                chain_id: config.chain_id.clone(),
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    fn connection_error(&self, message: impl Into<String>) -> VesError {
        VesError::ChainConnection {
            chain_id: self.config.chain_id.clone(),
            message: message.into(),
        }
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> VesResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed"))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    pub fn chain_id(&self) -> &str {
        &self.config.chain_id
    }
}

#[async_trait]
impl LedgerRpc for ChainProvider {
    async fn get_storage_at(&self, address: Address, slot: H256) -> VesResult<H256> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_storage_at(address, slot, None).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        "Failed to read storage from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed to read storage"))
    }

    /// Sent once on the active provider; a resend could double-spend
    async fn send_transaction(&self, tx: TransactionRequest) -> VesResult<H256> {
        let pending = self
            .http()
            .send_transaction(tx, None)
            .await
            .map_err(|e| VesError::Ledger(e.to_string()))?;
        Ok(pending.tx_hash())
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> VesResult<Option<TransactionReceipt>> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| self.connection_error(e.to_string()))
    }

    async fn unlock_account(
        &self,
        account: Address,
        passphrase: String,
        duration_secs: u64,
    ) -> VesResult<()> {
        let unlocked: bool = self
            .http()
            .request("personal_unlockAccount", (account, passphrase, duration_secs))
            .await
            .map_err(|e| self.connection_error(e.to_string()))?;

        if unlocked {
            Ok(())
        } else {
            Err(VesError::UnlockFailed {
                account: to_checksum(&account, None),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(urls: Vec<&str>) -> ChainConfig {
        ChainConfig {
            chain_type: "Ethereum".to_string(),
            chain_id: "chain1".to_string(),
            rpc_urls: urls.into_iter().map(str::to_string).collect(),
            relay_address: "0x9191919191919191919191919191919191919191".to_string(),
            users: HashMap::new(),
            passphrases: HashMap::new(),
            enabled: true,
        }
    }

    #[test]
    fn test_requires_a_valid_url() {
        assert!(matches!(
            ChainProvider::new(config(vec!["not a url"])),
            Err(VesError::ChainConnection { .. })
        ));
    }

    #[test]
    fn test_failover_cycles() {
        let provider =
            ChainProvider::new(config(vec!["http://127.0.0.1:8545", "http://127.0.0.1:8546"]))
                .unwrap();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 1);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        assert_eq!(provider.chain_id(), "chain1");
    }
}
