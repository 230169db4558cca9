//! Chain module - ledger access for executing compiled intents
//!
//! This module provides:
//! - The `LedgerRpc` seam the core calls through
//! - Multi-RPC provider management with automatic failover
//! - Execution of transaction intents with receipt polling

mod executor;
mod ledger;
mod provider;

pub use executor::{execution_order, ExecutionOutcome, ExecutorOptions, TransactionExecutor};
pub use ledger::{wait_for_receipt, LedgerRpc};
pub use provider::ChainProvider;

use crate::config::Settings;
use crate::error::{VesError, VesResult};
use crate::intent::{ChainDns, ChainDomain};

use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Providers for every enabled chain, keyed by domain
pub struct ChainManager {
    providers: DashMap<ChainDomain, Arc<ChainProvider>>,
}

impl ChainManager {
    pub fn new(settings: &Settings) -> VesResult<Self> {
        let providers = DashMap::new();

        for (name, chain_config) in settings.enabled_chains() {
            let domain = ChainDomain::new(
                chain_config.chain_type.clone(),
                chain_config.chain_id.clone(),
            );
            info!("Initializing chain {} ({})", name, domain);
            let provider = ChainProvider::new(chain_config.clone())?;
            providers.insert(domain, Arc::new(provider));
        }

        Ok(Self { providers })
    }

    pub fn get_provider(&self, chain: &ChainDomain) -> VesResult<Arc<ChainProvider>> {
        self.providers
            .get(chain)
            .map(|p| p.clone())
            .ok_or_else(|| VesError::ChainConnection {
                chain_id: chain.chain_id.clone(),
                message: format!("{} is not configured", chain),
            })
    }

    /// Executor over every managed chain, carrying configured passphrases
    pub fn executor(&self, settings: &Settings, dns: Arc<dyn ChainDns>) -> TransactionExecutor {
        let options = ExecutorOptions {
            poll_interval: Duration::from_millis(settings.ledger.poll_interval_ms),
            receipt_timeout: Duration::from_secs(settings.ledger.receipt_timeout_secs),
            unlock_duration_secs: settings.ledger.unlock_duration_secs,
        };
        let mut executor = TransactionExecutor::new(dns, options);
        for entry in self.providers.iter() {
            executor = executor.with_ledger(entry.key().clone(), entry.value().clone());
        }
        for (_, chain) in settings.enabled_chains() {
            for (account, passphrase) in &chain.passphrases {
                match account.parse::<Address>() {
                    Ok(address) => executor = executor.with_passphrase(address, passphrase.clone()),
                    Err(e) => warn!(
                        "Skipping passphrase for {:?} on chain {}: {}",
                        account, chain.chain_id, e
                    ),
                }
            }
        }
        executor
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(ChainDomain, bool)> {
        let providers: Vec<_> = self
            .providers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut results = Vec::with_capacity(providers.len());
        for (domain, provider) in providers {
            let healthy = provider.health_check().await;
            crate::metrics::record_chain_health(provider.chain_id(), healthy);
            results.push((domain, healthy));
        }
        results
    }

    pub fn connected_chains(&self) -> Vec<ChainDomain> {
        self.providers.iter().map(|e| e.key().clone()).collect()
    }
}
