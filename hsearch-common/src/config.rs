//! # Client and Pool Configuration
//!
//! Purpose: Describe how connections are obtained (pool sizing, waits,
//! credentials, idle eviction) and what a caller provides to build an index
//! client.
//!
//! ## Acquire Timeout
//! `PoolConfig::acquire_timeout` is `Some(d)` for a bounded wait or `None`
//! for the explicit "no timeout" setting, which waits until a handle is
//! released or the provider shuts down. `Some(Duration::ZERO)` is rejected
//! by `validate` so a zero never silently means "block forever".

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoint::Target;
use crate::error::{ClientError, ClientResult};

/// Default pool capacity.
pub const DEFAULT_POOL_SIZE: usize = 100;
/// Default acquire and socket timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 500;
/// Idle time after which the evictor closes a handle.
pub const DEFAULT_MIN_IDLE_TIME: Duration = Duration::from_secs(60);
/// Period of the background eviction run.
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(30);

/// How many idle handles one eviction run examines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionRunSize {
    /// Every idle handle.
    All,
    /// At most this many.
    Count(usize),
    /// `ceil(idle / n)` handles.
    Fraction(usize),
}

impl EvictionRunSize {
    /// Number of handles to examine given the current idle count.
    pub fn per_run(self, idle: usize) -> usize {
        match self {
            EvictionRunSize::All => idle,
            EvictionRunSize::Count(n) => n.min(idle),
            EvictionRunSize::Fraction(n) => idle.div_ceil(n.max(1)),
        }
    }
}

/// Idle-handle eviction settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// A handle idle at least this long is evicted.
    pub min_idle_time: Duration,
    /// Period of the background run; `None` disables the eviction thread.
    pub interval: Option<Duration>,
    pub tests_per_run: EvictionRunSize,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy {
            min_idle_time: DEFAULT_MIN_IDLE_TIME,
            interval: Some(DEFAULT_EVICTION_INTERVAL),
            tests_per_run: EvictionRunSize::All,
        }
    }
}

/// Liveness probes (`PING`) the pool may issue. All off by default, in which
/// case the pool never pings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbePolicy {
    pub test_on_create: bool,
    pub test_on_borrow: bool,
    pub test_on_return: bool,
    pub test_while_idle: bool,
}

impl ProbePolicy {
    pub fn any_enabled(&self) -> bool {
        self.test_on_create || self.test_on_borrow || self.test_on_return || self.test_while_idle
    }
}

/// Pool configuration shared by the pooled providers.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum handles alive at once (idle + checked out).
    pub max_size: usize,
    /// Wait bound for `acquire`; `None` waits without limit.
    pub acquire_timeout: Option<Duration>,
    /// Password sent with `AUTH` on every new connection.
    pub credentials: Option<String>,
    pub eviction: EvictionPolicy,
    pub probes: ProbePolicy,
    /// Serve waiting acquirers in arrival order.
    pub fairness: bool,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read/write timeout.
    pub io_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Pool of `max_size` handles with the stock eviction and fairness
    /// settings.
    pub fn for_size(max_size: usize) -> Self {
        let timeout = Duration::from_millis(DEFAULT_TIMEOUT_MS);
        PoolConfig {
            max_size,
            acquire_timeout: Some(timeout),
            credentials: None,
            eviction: EvictionPolicy::default(),
            probes: ProbePolicy::default(),
            fairness: true,
            connect_timeout: Some(timeout),
            io_timeout: Some(timeout),
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, password: Option<String>) -> Self {
        self.credentials = password;
        self
    }

    pub fn with_fairness(mut self, fairness: bool) -> Self {
        self.fairness = fairness;
        self
    }

    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn with_probes(mut self, probes: ProbePolicy) -> Self {
        self.probes = probes;
        self
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.max_size == 0 {
            return Err(ClientError::InvalidConfig("pool size must be at least 1".into()));
        }
        if self.acquire_timeout == Some(Duration::ZERO) {
            return Err(ClientError::InvalidConfig(
                "acquire timeout of zero is not allowed; use None for no timeout".into(),
            ));
        }
        if let EvictionRunSize::Count(0) | EvictionRunSize::Fraction(0) = self.eviction.tests_per_run
        {
            return Err(ClientError::InvalidConfig(
                "eviction run size must be non-zero".into(),
            ));
        }
        if self.eviction.interval == Some(Duration::ZERO) {
            return Err(ClientError::InvalidConfig(
                "eviction interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig::for_size(DEFAULT_POOL_SIZE)
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

/// What a caller provides to construct an index client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Index every command is qualified with.
    pub index_name: String,
    /// Fixed node or sentinel-managed master.
    #[serde(default)]
    pub target: Target,
    /// Acquire wait and socket timeout, in milliseconds. Zero waits forever.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default)]
    pub password: Option<String>,
}

impl ClientConfig {
    pub fn new(index_name: impl Into<String>, target: Target) -> Self {
        ClientConfig {
            index_name: index_name.into(),
            target,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            pool_size: DEFAULT_POOL_SIZE,
            password: None,
        }
    }

    /// Parses and validates a JSON configuration document.
    pub fn from_json(text: &str) -> ClientResult<Self> {
        let config: ClientConfig = serde_json::from_str(text)
            .map_err(|err| ClientError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.index_name.is_empty() {
            return Err(ClientError::InvalidConfig("index name must not be empty".into()));
        }
        if let Target::Sentinel {
            master_name,
            sentinels,
        } = &self.target
        {
            if master_name.is_empty() {
                return Err(ClientError::InvalidConfig("master name must not be empty".into()));
            }
            if sentinels.is_empty() {
                return Err(ClientError::InvalidConfig(
                    "at least one sentinel address is required".into(),
                ));
            }
        }
        self.pool_config().validate()
    }

    /// Pool settings derived from this configuration.
    pub fn pool_config(&self) -> PoolConfig {
        let timeout = (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms));
        let mut pool = PoolConfig::for_size(self.pool_size).with_credentials(self.password.clone());
        pool.acquire_timeout = timeout;
        pool.connect_timeout = timeout;
        pool.io_timeout = timeout;
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;

    #[test]
    fn default_pool_matches_stock_settings() {
        let config = PoolConfig::default();
        assert_eq!(config.max_size, 100);
        assert_eq!(config.acquire_timeout, Some(Duration::from_millis(500)));
        assert!(config.fairness);
        assert!(!config.probes.any_enabled());
        assert_eq!(config.eviction.min_idle_time, Duration::from_secs(60));
        assert_eq!(config.eviction.interval, Some(Duration::from_secs(30)));
        assert_eq!(config.eviction.tests_per_run, EvictionRunSize::All);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_zero_size_and_zero_timeout() {
        assert!(PoolConfig::for_size(0).validate().is_err());
        let zero_wait = PoolConfig::for_size(2).with_acquire_timeout(Some(Duration::ZERO));
        assert!(zero_wait.validate().is_err());
        let unbounded = PoolConfig::for_size(2).with_acquire_timeout(None);
        assert!(unbounded.validate().is_ok());
    }

    #[test]
    fn eviction_run_size_scales_with_idle_count() {
        assert_eq!(EvictionRunSize::All.per_run(7), 7);
        assert_eq!(EvictionRunSize::Count(3).per_run(7), 3);
        assert_eq!(EvictionRunSize::Count(3).per_run(2), 2);
        assert_eq!(EvictionRunSize::Fraction(2).per_run(7), 4);
    }

    #[test]
    fn client_config_from_json_applies_defaults() {
        let config = ClientConfig::from_json(
            r#"{"index_name":"products","target":{"direct":"10.1.1.1:6379"}}"#,
        )
        .unwrap();
        assert_eq!(config.index_name, "products");
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.pool_size, 100);
        assert_eq!(config.target, Target::Direct(Endpoint::new("10.1.1.1", 6379)));
        assert_eq!(config.password, None);
    }

    #[test]
    fn client_config_rejects_invalid_values() {
        assert!(ClientConfig::from_json(r#"{"index_name":""}"#).is_err());
        assert!(ClientConfig::from_json(r#"{"index_name":"i","pool_size":0}"#).is_err());
        assert!(ClientConfig::from_json(
            r#"{"index_name":"i","target":{"sentinel":{"master_name":"m","sentinels":[]}}}"#
        )
        .is_err());
    }

    #[test]
    fn pool_config_carries_password_and_timeouts() {
        let mut config = ClientConfig::new("idx", Target::default());
        config.timeout_ms = 250;
        config.pool_size = 4;
        config.password = Some("secret".into());
        let pool = config.pool_config();
        assert_eq!(pool.max_size, 4);
        assert_eq!(pool.acquire_timeout, Some(Duration::from_millis(250)));
        assert_eq!(pool.io_timeout, Some(Duration::from_millis(250)));
        assert_eq!(pool.credentials.as_deref(), Some("secret"));
    }

    #[test]
    fn zero_timeout_means_wait_forever() {
        let config = ClientConfig::from_json(r#"{"index_name":"i","timeout_ms":0}"#).unwrap();
        let pool = config.pool_config();
        assert_eq!(pool.acquire_timeout, None);
        assert_eq!(pool.connect_timeout, None);
        assert!(pool.validate().is_ok());
    }
}
