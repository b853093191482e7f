use crate::component::ComponentInfo;
use crate::error::{Error, Result};
use crate::hash::DEFAULT_CHECK_INTERVAL;
use std::{fmt, str::FromStr, time::Duration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolAddress {
    pub host: String,
    pub port: u16,
    /// Set by a `stratum+ssl://` or `stratum+tls://` scheme.
    pub tls: bool,
}

impl FromStr for PoolAddress {
    type Err = Error;

    fn from_str(url: &str) -> Result<Self> {
        let (rest, tls) = if let Some(rest) = url
            .strip_prefix("stratum+ssl://")
            .or_else(|| url.strip_prefix("stratum+tls://"))
        {
            (rest, true)
        } else {
            let rest = url
                .strip_prefix("stratum+tcp://")
                .or_else(|| url.strip_prefix("tcp://"))
                .unwrap_or(url);
            (rest, false)
        };
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("pool address {url:?} has no port")))?;
        if host.is_empty() {
            return Err(Error::Config(format!("pool address {url:?} has no host")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::Config(format!("bad port in {url:?}: {e}")))?;
        Ok(PoolAddress {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

impl fmt::Display for PoolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything the mining client needs, passed in at construction.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub pool: PoolAddress,
    pub tls: bool,
    /// Wallet or account sent as `login`.
    pub login: String,
    pub pass: String,
    pub rigid: String,
    pub agent: String,
    /// Pause before logging in again after a pool error or malformed message.
    pub login_backoff: Duration,
    pub reconnect_backoff: Duration,
    pub max_reconnect_backoff: Duration,
    /// Upper bound on how long a blocking receive can delay shutdown.
    pub read_timeout: Duration,
    pub keepalive_interval: Duration,
    /// Hashes between cancellation checks.
    pub check_interval: u64,
    pub light: bool,
    /// RandomX key used until a job carries `seed_hash`.
    pub fallback_seed: Vec<u8>,
    pub cpu_core: Option<usize>,
    pub component: ComponentInfo,
}

impl MinerConfig {
    pub fn new(pool: PoolAddress, login: impl Into<String>) -> Self {
        let tls = pool.tls;
        MinerConfig {
            pool,
            tls,
            login: login.into(),
            pass: "x".into(),
            rigid: "test".into(),
            agent: "2.0".into(),
            login_backoff: Duration::from_secs(5),
            reconnect_backoff: Duration::from_secs(1),
            max_reconnect_backoff: Duration::from_secs(60),
            read_timeout: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(60),
            check_interval: DEFAULT_CHECK_INTERVAL,
            light: false,
            fallback_seed: vec![0; 32],
            cpu_core: None,
            component: ComponentInfo::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.login.trim().is_empty() {
            return Err(Error::Config("login must not be empty".into()));
        }
        if self.pool.port == 0 {
            return Err(Error::Config("pool port must not be zero".into()));
        }
        if self.check_interval == 0 {
            return Err(Error::Config("check interval must be positive".into()));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::Config("read timeout must be positive".into()));
        }
        Ok(())
    }
}
