//! Configuration management for the ledger node
//!
//! Supports configuration via command line arguments, environment variables,
//! and configuration files (YAML/JSON). Values given explicitly on the command
//! line or through the environment win over the file; everything else is
//! taken from the file when one is supplied.

use crate::client::BackoffConfig;
use crate::policy::{ChainParams, DifficultyPolicy, RewardPolicy};
use crate::worker::PoolConfig;
use crate::{Address, Amount, Difficulty, Error, Result};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level: tracing::Level = (*self).into();
        write!(f, "{}", level.as_str().to_ascii_lowercase())
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

/// Complete configuration for the node
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "powledger",
    version = env!("CARGO_PKG_VERSION"),
    about = "Single-node proof-of-work ledger",
    long_about = "A single-node proof-of-work ledger with signed transfers, a parallel CPU mining pool and a JSON HTTP API"
)]
pub struct Config {
    /// Print program info and exit
    #[arg(long)]
    #[serde(default)]
    pub info: bool,

    /// Generate a new wallet key pair and exit
    #[arg(long)]
    #[serde(default)]
    pub generate_key: bool,

    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(default)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Wallet file written by --generate-key and used as the default miner
    #[arg(long, value_name = "FILE")]
    pub wallet_file: Option<PathBuf>,

    /// Directory holding the chain file and snapshots
    #[arg(short = 'd', long, env = "POWLEDGER_DATA_DIR", default_value = "data")]
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// HTTP API listen address
    #[arg(long, env = "POWLEDGER_LISTEN", default_value = "127.0.0.1:3000")]
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Mine against a remote node at this URL instead of the local ledger
    #[arg(short = 'n', long, env = "POWLEDGER_NODE")]
    pub node: Option<String>,

    /// Address that receives block rewards
    #[arg(short = 'm', long, env = "POWLEDGER_MINER_ADDRESS")]
    pub miner_address: Option<String>,

    /// Start mining at startup
    #[arg(long)]
    #[serde(default)]
    pub mine: bool,

    /// Number of mining threads (0 = one per CPU)
    #[arg(short = 'c', long, default_value = "0")]
    #[serde(default)]
    pub workers: usize,

    /// Log level
    #[arg(short = 'l', long, env = "POWLEDGER_LOG_LEVEL", default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, default_value = "plain")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Difficulty of the first mined blocks (leading zero hex digits)
    #[arg(long, default_value = "2")]
    #[serde(default = "default_initial_difficulty")]
    pub initial_difficulty: u8,

    /// Lower difficulty bound
    #[arg(long, default_value = "1")]
    #[serde(default = "default_min_difficulty")]
    pub min_difficulty: u8,

    /// Upper difficulty bound
    #[arg(long, default_value = "6")]
    #[serde(default = "default_max_difficulty")]
    pub max_difficulty: u8,

    /// Target time between blocks (e.g. "2m", "30s")
    #[arg(long, default_value = "2m")]
    #[serde(default = "default_target_block_time")]
    pub target_block_time: String,

    /// Reward of the first halving era, in coins
    #[arg(long, default_value = "100")]
    #[serde(default = "default_base_reward")]
    pub base_reward: String,

    /// Reward floor, in coins
    #[arg(long, default_value = "6.25")]
    #[serde(default = "default_min_reward")]
    pub min_reward: String,

    /// Blocks per halving era
    #[arg(long, default_value = "210000")]
    #[serde(default = "default_halving_interval")]
    pub halving_interval: u64,

    /// Supply cap, in coins
    #[arg(long, default_value = "500000000")]
    #[serde(default = "default_total_supply")]
    pub total_supply: String,

    /// Share of the supply minted at genesis
    #[arg(long, default_value = "0.05")]
    #[serde(default = "default_premine_ratio")]
    pub premine_ratio: f64,

    /// Recipient of the genesis premine (none when unset)
    #[arg(long)]
    pub premine_address: Option<String>,

    /// Write a full snapshot every N blocks (0 disables)
    #[arg(long, default_value = "100")]
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: u64,

    /// Number of snapshots to keep
    #[arg(long, default_value = "3")]
    #[serde(default = "default_snapshot_retain")]
    pub snapshot_retain: usize,

    /// Worker progress report cadence
    #[arg(long, default_value = "1s")]
    #[serde(default = "default_progress_interval")]
    pub progress_interval: String,

    /// How often the miner checks for a new chain head
    #[arg(long, default_value = "2s")]
    #[serde(default = "default_job_refresh")]
    pub job_refresh: String,

    /// Default HTTP timeout in milliseconds
    #[arg(long, default_value = "30000")]
    #[serde(default = "default_http_timeout")]
    pub http_timeout: u64,

    /// Maximum retry attempts for HTTP requests
    #[arg(long, default_value = "10")]
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Base retry delay in milliseconds
    #[arg(long, default_value = "100")]
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,

    /// Maximum retry delay in milliseconds
    #[arg(long, default_value = "5000")]
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay: u64,
}

impl Config {
    /// Parse the command line, merge the config file if given, validate
    pub async fn load() -> Result<Self> {
        let matches = Self::command().get_matches();
        Self::from_matches(&matches).await
    }

    async fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut config =
            Self::from_arg_matches(matches).map_err(|e| Error::config(e.to_string()))?;

        if let Some(config_file) = config.config_file.clone() {
            let file_config = Self::load_from_file(&config_file).await?;
            config = config.merge_with_file(file_config, &explicit_args(matches));
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            // Default to YAML
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Merge CLI config with file config (explicit CLI values take precedence)
    fn merge_with_file(mut self, file: Self, explicit: &HashSet<String>) -> Self {
        macro_rules! from_file {
            ($($field:ident),* $(,)?) => {
                $(
                    if !explicit.contains(stringify!($field)) {
                        self.$field = file.$field;
                    }
                )*
            };
        }

        from_file!(
            wallet_file,
            data_dir,
            listen,
            node,
            miner_address,
            mine,
            workers,
            log_level,
            log_format,
            log_file,
            initial_difficulty,
            min_difficulty,
            max_difficulty,
            target_block_time,
            base_reward,
            min_reward,
            halving_interval,
            total_supply,
            premine_ratio,
            premine_address,
            snapshot_interval,
            snapshot_retain,
            progress_interval,
            job_refresh,
            http_timeout,
            max_retries,
            retry_delay,
            max_retry_delay,
        );
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        self.chain_params()?.validate()?;
        self.miner_address()?;

        if let Some(node) = &self.node {
            Url::parse(node).map_err(|e| Error::config(format!("Invalid node URL: {}", e)))?;
        }

        for (name, value) in [
            ("progress-interval", &self.progress_interval),
            ("job-refresh", &self.job_refresh),
        ] {
            if parse_duration(name, value)?.is_zero() {
                return Err(Error::config(format!("{} must be greater than zero", name)));
            }
        }

        if self.retry_delay > self.max_retry_delay {
            return Err(Error::config("retry-delay must not exceed max-retry-delay"));
        }

        Ok(())
    }

    /// HTTP API socket address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| Error::config(format!("Invalid listen address {}: {}", self.listen, e)))
    }

    /// Configured reward recipient, if any
    pub fn miner_address(&self) -> Result<Option<Address>> {
        self.miner_address
            .as_deref()
            .map(|a| Address::new(a).map_err(|e| Error::config(format!("Invalid miner address: {}", e))))
            .transpose()
    }

    /// Reward, difficulty and premine parameters
    pub fn chain_params(&self) -> Result<ChainParams> {
        let difficulty = |name: &str, value: u8| {
            Difficulty::new(value).map_err(|e| Error::config(format!("Invalid {}: {}", name, e)))
        };
        let coins = |name: &str, value: &str| {
            value
                .parse::<Amount>()
                .map_err(|e| Error::config(format!("Invalid {}: {}", name, e)))
        };

        Ok(ChainParams {
            reward: RewardPolicy {
                base_reward: coins("base-reward", &self.base_reward)?,
                min_reward: coins("min-reward", &self.min_reward)?,
                halving_interval: self.halving_interval,
                total_supply: coins("total-supply", &self.total_supply)?,
            },
            difficulty: DifficultyPolicy {
                initial: difficulty("initial-difficulty", self.initial_difficulty)?,
                min: difficulty("min-difficulty", self.min_difficulty)?,
                max: difficulty("max-difficulty", self.max_difficulty)?,
                target_block_time: parse_duration("target-block-time", &self.target_block_time)?,
            },
            premine_ratio: self.premine_ratio,
            premine_address: self
                .premine_address
                .as_deref()
                .map(|a| Address::new(a).map_err(|e| Error::config(format!("Invalid premine address: {}", e))))
                .transpose()?,
        })
    }

    /// Mining pool settings
    pub fn pool_config(&self) -> Result<PoolConfig> {
        Ok(PoolConfig {
            workers: self.worker_count(),
            progress_interval: parse_duration("progress-interval", &self.progress_interval)?,
            job_refresh_interval: parse_duration("job-refresh", &self.job_refresh)?,
            backoff: self.backoff_config(),
        })
    }

    /// Retry policy for HTTP calls and failed submissions
    pub fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.retry_delay_duration(),
            max_delay: self.max_retry_delay_duration(),
            multiplier: 2.0,
            max_retries: self.max_retries,
        }
    }

    /// Mining threads, resolving 0 to the CPU count
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }

    /// Get HTTP timeout duration
    pub fn http_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.http_timeout)
    }

    /// Get retry delay duration
    pub fn retry_delay_duration(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }

    /// Get max retry delay duration
    pub fn max_retry_delay_duration(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay)
    }
}

/// Argument ids set on the command line or through the environment
fn explicit_args(matches: &ArgMatches) -> HashSet<String> {
    matches
        .ids()
        .filter(|id| {
            matches!(
                matches.value_source(id.as_str()),
                Some(ValueSource::CommandLine | ValueSource::EnvVariable)
            )
        })
        .map(|id| id.as_str().to_string())
        .collect()
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| Error::config(format!("Invalid {} {:?}: {}", name, value, e)))
}

// Default value functions for serde
fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_listen() -> String { "127.0.0.1:3000".to_string() }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Plain }
fn default_initial_difficulty() -> u8 { 2 }
fn default_min_difficulty() -> u8 { 1 }
fn default_max_difficulty() -> u8 { 6 }
fn default_target_block_time() -> String { "2m".to_string() }
fn default_base_reward() -> String { "100".to_string() }
fn default_min_reward() -> String { "6.25".to_string() }
fn default_halving_interval() -> u64 { 210_000 }
fn default_total_supply() -> String { "500000000".to_string() }
fn default_premine_ratio() -> f64 { 0.05 }
fn default_snapshot_interval() -> u64 { 100 }
fn default_snapshot_retain() -> usize { 3 }
fn default_progress_interval() -> String { "1s".to_string() }
fn default_job_refresh() -> String { "2s".to_string() }
fn default_http_timeout() -> u64 { 30000 }
fn default_max_retries() -> usize { 10 }
fn default_retry_delay() -> u64 { 100 }
fn default_max_retry_delay() -> u64 { 5000 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_defaults() {
        let config = Config::try_parse_from(["powledger"]).unwrap();

        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.log_format, LogFormat::Plain);
        assert!(!config.mine);
        assert!(config.validate().is_ok());

        let params = config.chain_params().unwrap();
        assert_eq!(params, ChainParams::default());
        assert_eq!(config.worker_count(), num_cpus::get());
        assert_eq!(config.listen_addr().unwrap().port(), 3000);
    }

    #[tokio::test]
    async fn test_config_from_yaml() {
        let yaml_content = r#"
data_dir: "/var/lib/powledger"
miner_address: "ABABABABABABABABABABABABABABABABABABABABABABABABABABABABABABABAB"
workers: 4
target_block_time: "30s"
base_reward: "50"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/powledger"));
        assert_eq!(config.workers, 4);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(
            config.miner_address().unwrap().unwrap().as_str(),
            "ab".repeat(32)
        );

        let params = config.chain_params().unwrap();
        assert_eq!(params.reward.base_reward, Amount::from_coins(50));
        assert_eq!(params.difficulty.target_block_time, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_cli_wins_over_file() {
        let mut temp_file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(temp_file, r#"{{"workers": 4, "halving_interval": 10}}"#).unwrap();
        let path = temp_file.path().to_string_lossy().to_string();

        let matches = Config::command()
            .try_get_matches_from(["powledger", "--config-file", &path, "--workers", "2"])
            .unwrap();
        let config = Config::from_matches(&matches).await.unwrap();

        assert_eq!(config.workers, 2);
        assert_eq!(config.halving_interval, 10);
    }

    #[test]
    fn test_inconsistent_economics_rejected() {
        let config = Config::try_parse_from(["powledger", "--min-reward", "200"]).unwrap();
        assert!(config.validate().is_err());

        let config =
            Config::try_parse_from(["powledger", "--min-difficulty", "5", "--max-difficulty", "3"]).unwrap();
        assert!(config.validate().is_err());

        let config = Config::try_parse_from(["powledger", "--premine-ratio", "1.5"]).unwrap();
        assert!(config.validate().is_err());

        let config = Config::try_parse_from(["powledger", "--target-block-time", "soon"]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }
}
