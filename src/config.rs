//! Configuration management for the VES service
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Env var naming the configuration file
pub const CONFIG_ENV: &str = "UIP_VES_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub ves: VesConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VesConfig {
    /// Upper bound of the session id space
    pub session_id_max: u32,
    pub max_allocation_attempts: u32,
}

impl Default for VesConfig {
    fn default() -> Self {
        Self {
            session_id_max: u32::MAX,
            max_allocation_attempts: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub poll_interval_ms: u64,
    pub receipt_timeout_secs: u64,
    pub unlock_duration_secs: u64,
    /// Gas for contracts deployed ahead of an invoke
    pub deploy_gas: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            receipt_timeout_secs: 120,
            unlock_duration_secs: 20,
            deploy_gas: crate::intent::DEFAULT_DEPLOY_GAS.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Ledger family, e.g. `Ethereum`
    pub chain_type: String,
    /// Id used in `<chain_type>://<chain_id>` domains
    pub chain_id: String,
    pub rpc_urls: Vec<String>,
    pub relay_address: String,
    /// user name -> address
    #[serde(default)]
    pub users: HashMap<String, String>,
    /// Passphrases for `personal_unlockAccount`, keyed by address
    #[serde(default)]
    pub passphrases: HashMap<String, String>,
    pub enabled: bool,
}

impl Settings {
    /// Load settings from the file named by `UIP_VES_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;
        Self::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str)?;

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        for (name, chain) in self.enabled_chains() {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.relay_address.is_empty() {
                anyhow::bail!("Chain {} has no relay address configured", name);
            }
            if let Some(account) = chain
                .passphrases
                .keys()
                .find(|account| account.parse::<ethers::types::Address>().is_err())
            {
                anyhow::bail!(
                    "Chain {} has a passphrase keyed by {:?}, which is not an address",
                    name,
                    account
                );
            }
            if chain.users.is_empty() {
                tracing::warn!("Chain {} has no users - payments touching it will fail", name);
            }
        }

        if self.ves.session_id_max == 0 {
            anyhow::bail!("ves.session_id_max must be at least 1");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Find an enabled chain by its domain parts
    pub fn get_chain(&self, chain_type: &str, chain_id: &str) -> Option<&ChainConfig> {
        self.chains
            .values()
            .find(|c| c.enabled && c.chain_type == chain_type && c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;
    let result = re.replace_all(input, |cap: &regex::Captures| {
        env::var(&cap[1]).unwrap_or_default()
    });
    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[ledger]
poll_interval_ms = 50

[chains.local]
chain_type = "Ethereum"
chain_id = "chain1"
rpc_urls = ["http://${UIP_VES_TEST_HOST}:8545"]
relay_address = "0x9191919191919191919191919191919191919191"
enabled = true

[chains.local.users]
a1 = "0x1111111111111111111111111111111111111111"
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input).unwrap();
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_from_file() {
        env::set_var("UIP_VES_TEST_HOST", "node0");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        let chain = settings.get_chain("Ethereum", "chain1").unwrap();
        assert_eq!(chain.rpc_urls, vec!["http://node0:8545".to_string()]);
        assert_eq!(chain.users.len(), 1);
        assert_eq!(settings.ledger.poll_interval_ms, 50);
        assert_eq!(settings.ledger.deploy_gas, "0x30d40");
        assert_eq!(settings.ves.session_id_max, u32::MAX);
    }

    #[test]
    fn test_requires_enabled_chain() {
        let disabled = SAMPLE.replace("enabled = true", "enabled = false");
        assert!(Settings::parse(&disabled).is_err());
    }

    #[test]
    fn test_requires_relay() {
        let no_relay = SAMPLE.replace(
            "relay_address = \"0x9191919191919191919191919191919191919191\"",
            "relay_address = \"\"",
        );
        assert!(Settings::parse(&no_relay).is_err());
    }

    #[test]
    fn test_passphrase_keys_must_be_addresses() {
        let with_passphrase = format!(
            "{}\n[chains.local.passphrases]\n\"0x1111111111111111111111111111111111111111\" = \"pw\"\n",
            SAMPLE
        );
        let settings = Settings::parse(&with_passphrase).unwrap();
        assert_eq!(settings.chains["local"].passphrases.len(), 1);

        let bad_key = with_passphrase.replace(
            "\"0x1111111111111111111111111111111111111111\" = \"pw\"",
            "a1 = \"pw\"",
        );
        let err = Settings::parse(&bad_key).unwrap_err();
        assert!(err.to_string().contains("not an address"));
    }
}
