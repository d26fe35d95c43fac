use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub platctx: PlatctxConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Process-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct PlatctxConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for PlatctxConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Discovery budgets and worker pool sizing
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_resources_per_kind")]
    pub max_resources_per_kind: usize,
    #[serde(default = "default_per_level_timeout_ms")]
    pub per_level_timeout_ms: u64,
    /// Overall deadline for one resolve call.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// Maximum store calls in flight within one BFS level.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_store_call_timeout_ms")]
    pub store_call_timeout_ms: u64,
    /// Page size passed to reverse-lookup `list` calls.
    #[serde(default = "default_list_page_limit")]
    pub list_page_limit: usize,
    /// Approximate memory held by discovered resources per run, in MiB. 0 means unlimited.
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_resources_per_kind: default_max_resources_per_kind(),
            per_level_timeout_ms: default_per_level_timeout_ms(),
            deadline_ms: default_deadline_ms(),
            worker_pool_size: default_worker_pool_size(),
            store_call_timeout_ms: default_store_call_timeout_ms(),
            list_page_limit: default_list_page_limit(),
            memory_limit_mb: default_memory_limit_mb(),
        }
    }
}

impl DiscoveryConfig {
    pub fn per_level_timeout(&self) -> Duration {
        Duration::from_millis(self.per_level_timeout_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn store_call_timeout(&self) -> Duration {
        Duration::from_millis(self.store_call_timeout_ms)
    }

    pub fn memory_limit_bytes(&self) -> usize {
        self.memory_limit_mb.saturating_mul(1024 * 1024)
    }
}

/// Store-call and result cache settings
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// TTL for memoized store calls.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// TTL for whole discovery results.
    #[serde(default = "default_ttl_secs")]
    pub result_ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// 0 disables the background sweeper.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl_secs(),
            result_ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }
}

/// Per-kind circuit breaker thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Consecutive failures that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time an open breaker waits before allowing a trial call.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    3
}

fn default_max_resources_per_kind() -> usize {
    50
}

fn default_per_level_timeout_ms() -> u64 {
    10_000
}

fn default_deadline_ms() -> u64 {
    30_000
}

fn default_worker_pool_size() -> usize {
    5
}

fn default_store_call_timeout_ms() -> u64 {
    5_000
}

fn default_list_page_limit() -> usize {
    100
}

fn default_memory_limit_mb() -> usize {
    200
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_max_entries() -> usize {
    1000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in PLATCTX_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("PLATCTX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&config_str)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.discovery.max_depth == 0 {
            anyhow::bail!("discovery.max_depth must be greater than 0");
        }

        if self.discovery.max_resources_per_kind == 0 {
            anyhow::bail!("discovery.max_resources_per_kind must be greater than 0");
        }

        if self.discovery.list_page_limit == 0 {
            anyhow::bail!("discovery.list_page_limit must be greater than 0");
        }

        if self.discovery.worker_pool_size == 0 {
            anyhow::bail!("discovery.worker_pool_size must be greater than 0");
        }

        if self.discovery.per_level_timeout_ms > self.discovery.deadline_ms {
            anyhow::bail!(
                "discovery.per_level_timeout_ms ({}) must not exceed discovery.deadline_ms ({})",
                self.discovery.per_level_timeout_ms,
                self.discovery.deadline_ms
            );
        }

        if self.circuit_breaker.failure_threshold == 0 {
            anyhow::bail!("circuit_breaker.failure_threshold must be greater than 0");
        }

        Ok(())
    }
}
