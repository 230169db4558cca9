//! Name resolution for accounts and relays on each chain

use super::op_intent::ChainDomain;
use crate::config::Settings;
use crate::error::{VesError, VesResult};

use ethers::types::Address;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

/// Resolves user names and relay accounts per chain
pub trait ChainDns: Send + Sync {
    /// On-chain address of `user_name` on `chain`
    fn check_user(&self, chain: &ChainDomain, user_name: &str) -> VesResult<Address>;

    /// Relay account collecting transfers on `chain`
    fn check_relay(&self, chain: &ChainDomain) -> VesResult<Address>;
}

#[derive(Debug, Clone, Default)]
struct ChainEntry {
    relay: Option<Address>,
    users: HashMap<String, Address>,
}

/// Table-driven DNS, populated from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticChainDns {
    chains: HashMap<ChainDomain, ChainEntry>,
}

impl StaticChainDns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from every enabled `[chains.*]` entry
    pub fn from_settings(settings: &Settings) -> VesResult<Self> {
        let mut dns = Self::new();
        for (name, chain) in settings.enabled_chains() {
            let domain = ChainDomain::new(chain.chain_type.clone(), chain.chain_id.clone());
            let relay = parse_address(&chain.relay_address, name)?;
            let mut users = HashMap::with_capacity(chain.users.len());
            for (user, addr) in &chain.users {
                users.insert(user.clone(), parse_address(addr, name)?);
            }
            debug!(
                "Chain DNS entry {} with {} users",
                domain,
                users.len()
            );
            dns.chains.insert(
                domain,
                ChainEntry {
                    relay: Some(relay),
                    users,
                },
            );
        }
        Ok(dns)
    }

    pub fn with_relay(mut self, chain: ChainDomain, relay: Address) -> Self {
        self.chains.entry(chain).or_default().relay = Some(relay);
        self
    }

    pub fn with_user(mut self, chain: ChainDomain, user_name: &str, address: Address) -> Self {
        self.chains
            .entry(chain)
            .or_default()
            .users
            .insert(user_name.to_string(), address);
        self
    }
}

impl ChainDns for StaticChainDns {
    fn check_user(&self, chain: &ChainDomain, user_name: &str) -> VesResult<Address> {
        self.chains
            .get(chain)
            .and_then(|entry| entry.users.get(user_name))
            .copied()
            .ok_or_else(|| {
                VesError::Generation(format!("user {} not registered on {}", user_name, chain))
            })
    }

    fn check_relay(&self, chain: &ChainDomain) -> VesResult<Address> {
        self.chains
            .get(chain)
            .and_then(|entry| entry.relay)
            .ok_or_else(|| VesError::Generation(format!("no relay registered on {}", chain)))
    }
}

fn parse_address(text: &str, chain_name: &str) -> VesResult<Address> {
    Address::from_str(text)
        .map_err(|e| VesError::Config(format!("chain {}: invalid address {}: {}", chain_name, text, e)))
}
