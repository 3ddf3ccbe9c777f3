//! Faucet configuration

use crate::error::{FaucetError, FaucetResult};
use crate::notify::NotifierConfig;
use crate::worker::WorkerSettings;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use trickle_common::logging::LoggingConfig;
use trickle_common::{parse_duration, CoinSet};

/// Cosmos SDK coin type, used when a chain entry does not set one
pub const DEFAULT_COIN_TYPE: u32 = 118;
pub const DEFAULT_FUNDING_INTERVAL: Duration = Duration::from_secs(12 * 3600);
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(1);
/// Maximum number of recipients in a single multi-send
pub const DEFAULT_MAX_BATCH_SIZE: usize = 160;
pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(30);

/// One entry of the `CHAINS` array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Bech32 account prefix, also the routing key
    pub prefix: String,

    /// Signer / broadcast RPC endpoint
    pub rpc: String,

    /// REST endpoint used for balance lookups
    #[serde(default)]
    pub lcd: Option<String>,

    #[serde(default = "default_coin_type")]
    pub coin_type: u32,

    /// Denom reported by the status command
    #[serde(default)]
    pub balance_denom: Option<String>,
}

fn default_coin_type() -> u32 {
    DEFAULT_COIN_TYPE
}

/// One value of the `FUNDING` map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainFunding {
    pub coins: String,
    #[serde(default)]
    pub fees: String,
}

impl ChainFunding {
    pub fn parse_coins(&self) -> FaucetResult<CoinSet> {
        CoinSet::parse(&self.coins).map_err(|e| {
            FaucetError::Configuration(format!("invalid funding coins {:?}: {}", self.coins, e))
        })
    }

    pub fn parse_fees(&self) -> FaucetResult<CoinSet> {
        CoinSet::parse(&self.fees).map_err(|e| {
            FaucetError::Configuration(format!("invalid funding fees {:?}: {}", self.fees, e))
        })
    }
}

/// Faucet service configuration, built once at startup
#[derive(Clone)]
pub struct FaucetConfig {
    /// Faucet key seed
    pub mnemonic: String,

    /// Shared secret expected on chat ingress requests
    pub bot_token: String,

    /// Chat user id of the faucet bot; its own messages are ignored
    pub bot_user_id: Option<String>,

    pub chains: Vec<ChainConfig>,

    pub funding: HashMap<String, ChainFunding>,

    /// Cooldown between two fundings of the same user on the same chain
    pub funding_interval: Duration,

    /// Only report errors (and direct messages)
    pub silent: bool,

    /// Also DM the requester the dispensed amount
    pub send_dm: bool,

    /// Explorer base URL used for transaction links
    pub finder_url: String,

    /// Outbound chat webhook; notifications are only logged when unset
    pub chat_webhook_url: Option<String>,

    /// Chat ingress listen address
    pub server_addr: String,

    /// Receipt database path; in-memory store when unset
    pub db_path: Option<String>,

    pub batch_interval: Duration,

    pub max_batch_size: usize,

    pub prune_interval: Duration,

    pub logging: LoggingConfig,
}

impl fmt::Debug for FaucetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaucetConfig")
            .field("mnemonic", &"<redacted>")
            .field("bot_token", &"<redacted>")
            .field("bot_user_id", &self.bot_user_id)
            .field("chains", &self.chains)
            .field("funding", &self.funding)
            .field("funding_interval", &self.funding_interval)
            .field("silent", &self.silent)
            .field("send_dm", &self.send_dm)
            .field("finder_url", &self.finder_url)
            .field("chat_webhook_url", &self.chat_webhook_url.as_ref().map(|_| "<set>"))
            .field("server_addr", &self.server_addr)
            .field("db_path", &self.db_path)
            .field("batch_interval", &self.batch_interval)
            .field("max_batch_size", &self.max_batch_size)
            .field("prune_interval", &self.prune_interval)
            .field("logging", &self.logging)
            .finish()
    }
}

impl FaucetConfig {
    /// Load from environment variables with defaults
    pub fn from_env() -> FaucetResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> FaucetResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str, hint: &str| {
            var(key).ok_or_else(|| FaucetError::Configuration(format!("{} {}", key, hint)))
        };
        let flag = |key: &str| {
            var(key)
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false)
        };

        let mnemonic = required("MNEMONIC", "is invalid")?;
        let bot_token = required("BOT_TOKEN", "is invalid")?;
        let raw_chains = required("CHAINS", "cannot be blank (json array)")?;
        let raw_funding = required("FUNDING", "cannot be blank (json object)")?;

        let chains: Vec<ChainConfig> = serde_json::from_str(&raw_chains)
            .map_err(|e| FaucetError::Configuration(format!("CHAINS: {}", e)))?;
        let funding: HashMap<String, ChainFunding> = serde_json::from_str(&raw_funding)
            .map_err(|e| FaucetError::Configuration(format!("FUNDING: {}", e)))?;

        let duration_var = |key: &str, default: Duration| -> FaucetResult<Duration> {
            match var(key) {
                Some(raw) => parse_duration(&raw)
                    .map_err(|e| FaucetError::Configuration(format!("{}: {}", key, e))),
                None => Ok(default),
            }
        };

        let funding_interval = duration_var("FUNDING_INTERVAL", DEFAULT_FUNDING_INTERVAL)?;

        let max_batch_size = match var("MAX_BATCH_SIZE") {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| {
                FaucetError::Configuration(format!("MAX_BATCH_SIZE: {}", e))
            })?,
            None => DEFAULT_MAX_BATCH_SIZE,
        };

        let config = Self {
            mnemonic,
            bot_token,
            bot_user_id: var("BOT_USER_ID"),
            chains,
            funding,
            funding_interval,
            silent: flag("SILENT"),
            send_dm: flag("SEND_DM"),
            finder_url: var("FINDER_URL")
                .unwrap_or_else(|| "https://www.mintscan.io/tx".to_string()),
            chat_webhook_url: var("CHAT_WEBHOOK_URL"),
            server_addr: var("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            db_path: var("DB_PATH"),
            batch_interval: duration_var("BATCH_INTERVAL", DEFAULT_BATCH_INTERVAL)?,
            max_batch_size,
            prune_interval: duration_var("PRUNE_INTERVAL", DEFAULT_PRUNE_INTERVAL)?,
            logging: LoggingConfig::from_lookup(&var),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> FaucetResult<()> {
        if self.chains.is_empty() {
            return Err(FaucetError::Configuration("CHAINS must list at least one chain".into()));
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if chain.prefix.is_empty() {
                return Err(FaucetError::Configuration("chain prefix cannot be empty".into()));
            }
            if !seen.insert(chain.prefix.as_str()) {
                return Err(FaucetError::Configuration(format!(
                    "chain prefix {} is configured twice",
                    chain.prefix
                )));
            }
            let funding = self.funding.get(&chain.prefix).ok_or_else(|| {
                FaucetError::Configuration(format!("FUNDING has no entry for {}", chain.prefix))
            })?;
            funding.parse_coins()?;
            funding.parse_fees()?;
        }

        if self.max_batch_size == 0 {
            return Err(FaucetError::Configuration("MAX_BATCH_SIZE must be positive".into()));
        }
        if self.batch_interval.is_zero() {
            return Err(FaucetError::Configuration("BATCH_INTERVAL must be positive".into()));
        }
        if self.prune_interval.is_zero() {
            return Err(FaucetError::Configuration("PRUNE_INTERVAL must be positive".into()));
        }

        Ok(())
    }

    pub fn chain(&self, prefix: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.prefix == prefix)
    }

    pub fn funding_for(&self, prefix: &str) -> Option<&ChainFunding> {
        self.funding.get(prefix)
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.chains.iter().map(|c| c.prefix.clone()).collect()
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            batch_interval: self.batch_interval,
            max_batch_size: self.max_batch_size,
        }
    }

    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            webhook_url: self.chat_webhook_url.clone(),
            silent: self.silent,
            send_dm: self.send_dm,
            finder_url: self.finder_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trickle_common::logging::LogFormat;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const CHAINS: &str = r#"[{"prefix":"umee","rpc":"http://localhost:26657","lcd":"http://localhost:1317"}]"#;
    const FUNDING: &str = r#"{"umee":{"coins":"1000uumee","fees":"10uumee"}}"#;

    #[test]
    fn test_minimal_config() {
        let config = FaucetConfig::from_lookup(env(&[
            ("MNEMONIC", "abandon abandon"),
            ("BOT_TOKEN", "secret"),
            ("CHAINS", CHAINS),
            ("FUNDING", FUNDING),
        ]))
        .unwrap();

        assert_eq!(config.funding_interval, Duration::from_secs(12 * 3600));
        assert_eq!(config.max_batch_size, 160);
        assert_eq!(config.batch_interval, Duration::from_secs(1));
        assert_eq!(config.chains[0].coin_type, 118);
        assert_eq!(config.prefixes(), vec!["umee".to_string()]);
        assert!(!config.silent);
        assert!(config.db_path.is_none());
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn test_overrides() {
        let config = FaucetConfig::from_lookup(env(&[
            ("MNEMONIC", "abandon abandon"),
            ("BOT_TOKEN", "secret"),
            ("CHAINS", CHAINS),
            ("FUNDING", FUNDING),
            ("FUNDING_INTERVAL", "1h30m"),
            ("MAX_BATCH_SIZE", "50"),
            ("BATCH_INTERVAL", "4s"),
            ("SILENT", "1"),
            ("SEND_DM", "true"),
            ("ENABLE_JSON_LOGGING", "true"),
        ]))
        .unwrap();

        assert_eq!(config.funding_interval, Duration::from_secs(5400));
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.batch_interval, Duration::from_secs(4));
        assert!(config.silent);
        assert!(config.send_dm);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_required() {
        let err = FaucetConfig::from_lookup(env(&[("BOT_TOKEN", "secret")])).unwrap_err();
        assert!(err.to_string().contains("MNEMONIC"));
    }

    #[test]
    fn test_missing_funding_entry() {
        let err = FaucetConfig::from_lookup(env(&[
            ("MNEMONIC", "abandon"),
            ("BOT_TOKEN", "secret"),
            ("CHAINS", CHAINS),
            ("FUNDING", r#"{"osmo":{"coins":"1uosmo"}}"#),
        ]))
        .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("umee"));
    }

    #[test]
    fn test_bad_funding_amount() {
        let err = FaucetConfig::from_lookup(env(&[
            ("MNEMONIC", "abandon"),
            ("BOT_TOKEN", "secret"),
            ("CHAINS", CHAINS),
            ("FUNDING", r#"{"umee":{"coins":"lots of umee"}}"#),
        ]))
        .unwrap_err();
        assert!(matches!(err, FaucetError::Configuration(_)));
    }

    #[test]
    fn test_bad_interval() {
        let err = FaucetConfig::from_lookup(env(&[
            ("MNEMONIC", "abandon"),
            ("BOT_TOKEN", "secret"),
            ("CHAINS", CHAINS),
            ("FUNDING", FUNDING),
            ("FUNDING_INTERVAL", "twelve hours"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("FUNDING_INTERVAL"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = FaucetConfig::from_lookup(env(&[
            ("MNEMONIC", "abandon abandon"),
            ("BOT_TOKEN", "supersecret"),
            ("CHAINS", CHAINS),
            ("FUNDING", FUNDING),
        ]))
        .unwrap();
        let printed = format!("{:?}", config);
        assert!(!printed.contains("supersecret"));
        assert!(!printed.contains("abandon"));
    }
}
