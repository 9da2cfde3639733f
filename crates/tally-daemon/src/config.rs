//! Configuration file management.
//!
//! `config.toml` lives in the data directory (`$TALLY_DATA_DIR` or the
//! platform default). A missing file or section means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_tokens::{IssuersInfo, RefillConfig, WalletInfo};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub issuer: IssuerConfig,
    #[serde(default)]
    pub refill: RefillSettings,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
    /// Ledger file name, relative to the data directory.
    #[serde(default = "default_database_file")]
    pub database_file: String,
    /// Prefix list file name, relative to the data directory.
    #[serde(default = "default_prefix_file")]
    pub prefix_file: String,
}

/// Confirmation token issuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerConfig {
    #[serde(default = "default_issuer_url")]
    pub base_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base64 public keys the issuer signs confirmation tokens with.
    #[serde(default)]
    pub public_keys: Vec<String>,
}

/// Token pool bounds and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefillSettings {
    #[serde(default = "default_minimum")]
    pub minimum: usize,
    #[serde(default = "default_maximum")]
    pub maximum: usize,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// How often `run` checks the pool.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

/// Wallet identity used to request tokens.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(default)]
    pub payment_id: String,
    /// Base64 recovery seed.
    #[serde(default)]
    pub recovery_seed: String,
}

impl std::fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletConfig")
            .field("payment_id", &self.payment_id)
            .finish_non_exhaustive()
    }
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions

fn default_database_file() -> String {
    "ledger.sqlite".to_string()
}

fn default_prefix_file() -> String {
    "prefixes.bin".to_string()
}

fn default_issuer_url() -> String {
    "https://anonymous.ads.tally.example".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_minimum() -> usize {
    tally_tokens::MINIMUM_UNBLINDED_TOKENS
}

fn default_maximum() -> usize {
    tally_tokens::MAXIMUM_UNBLINDED_TOKENS
}

fn default_retry_delay_secs() -> u64 {
    tally_tokens::RETRY_DELAY.as_secs()
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            database_file: default_database_file(),
            prefix_file: default_prefix_file(),
        }
    }
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            base_url: default_issuer_url(),
            timeout_secs: default_timeout_secs(),
            public_keys: Vec::new(),
        }
    }
}

impl Default for RefillSettings {
    fn default() -> Self {
        Self {
            minimum: default_minimum(),
            maximum: default_maximum(),
            retry_delay_secs: default_retry_delay_secs(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.refill.minimum > self.refill.maximum {
            anyhow::bail!(
                "refill.minimum ({}) exceeds refill.maximum ({})",
                self.refill.minimum,
                self.refill.maximum
            );
        }
        if self.issuer.timeout_secs == 0 {
            anyhow::bail!("issuer.timeout_secs must be positive");
        }
        Ok(())
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.database_file)
    }

    pub fn prefix_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.prefix_file)
    }

    pub fn issuer_timeout(&self) -> Duration {
        Duration::from_secs(self.issuer.timeout_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.refill.check_interval_secs.max(1))
    }

    pub fn refill_config(&self) -> RefillConfig {
        RefillConfig {
            minimum: self.refill.minimum,
            maximum: self.refill.maximum,
            retry_delay: Duration::from_secs(self.refill.retry_delay_secs),
        }
    }

    pub fn issuers(&self) -> IssuersInfo {
        IssuersInfo::new(self.issuer.public_keys.iter().cloned())
    }

    /// The configured wallet, or `None` when no payment id is set.
    pub fn wallet(&self) -> anyhow::Result<Option<WalletInfo>> {
        if self.wallet.payment_id.is_empty() {
            return Ok(None);
        }
        let wallet = WalletInfo::from_base64(&self.wallet.payment_id, &self.wallet.recovery_seed)?;
        Ok(Some(wallet))
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("TALLY_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Tally")
        }
        #[cfg(target_os = "windows")]
        {
            dirs_fallback("Tally")
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            dirs_fallback(".tally")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/tally"))
}
