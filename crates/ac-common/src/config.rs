use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// ACME directory to register against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Directory {
    #[default]
    Production,
    Staging,
}

/// Daemon configuration, loaded from an optional JSON file with `AC_*`
/// environment variable overrides on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory the plaintext cert/key artifacts are exported to
    pub data_dir: PathBuf,
    /// Directory holding the persisted account and certificate state
    pub cache_dir: PathBuf,
    /// Domains to request; the first entry is the primary domain
    pub domains: Vec<String>,
    /// Recursive resolvers used for the TXT propagation probe
    pub dns: Vec<String>,
    /// ACME account email
    pub email: String,
    /// DNS-01 challenge provider name
    pub provider: String,
    /// Production or staging ACME directory
    pub directory: Directory,
    /// Renew when the certificate expires within this many hours
    pub renew_before_hours: u64,
    /// Budget for DNS propagation checks
    pub dns_timeout_secs: u64,
    /// Interval between lifecycle passes
    pub check_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            cache_dir: PathBuf::from("./.cache"),
            domains: Vec::new(),
            dns: vec!["8.8.8.8".to_string()],
            email: String::new(),
            provider: String::new(),
            directory: Directory::Production,
            renew_before_hours: 720,
            dns_timeout_secs: 60,
            check_interval_secs: 3600,
        }
    }
}

impl Config {
    /// Load configuration: JSON file (if present) plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p)?;
                serde_json::from_str(&content)?
            }
            Some(p) => {
                info!("No config file at {}, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Apply `AC_*` environment variable overrides.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("AC_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AC_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AC_DOMAINS") {
            self.domains = split_list(&v);
        }
        if let Ok(v) = std::env::var("AC_DNS") {
            self.dns = split_list(&v);
        }
        if let Ok(v) = std::env::var("AC_EMAIL") {
            self.email = v;
        }
        if let Ok(v) = std::env::var("AC_PROVIDER") {
            self.provider = v;
        }
        if let Ok(v) = std::env::var("AC_DIRECTORY") {
            self.directory = if v.eq_ignore_ascii_case("staging") {
                Directory::Staging
            } else {
                Directory::Production
            };
        }
        if let Ok(v) = std::env::var("AC_RENEW_BEFORE_HOURS") {
            if let Ok(hours) = v.parse() {
                self.renew_before_hours = hours;
            }
        }
        if let Ok(v) = std::env::var("AC_DNS_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                self.dns_timeout_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("AC_CHECK_INTERVAL_SECS") {
            if let Ok(secs) = v.parse() {
                self.check_interval_secs = secs;
            }
        }
    }

    /// Reject configurations the daemon cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.email.is_empty() {
            return Err(ConfigError::Invalid("email is required".into()));
        }
        if self.domains.is_empty() || self.domains.iter().any(|d| d.is_empty()) {
            return Err(ConfigError::Invalid(
                "at least one non-empty domain is required".into(),
            ));
        }
        if self.provider.is_empty() {
            return Err(ConfigError::Invalid("provider is required".into()));
        }
        Ok(())
    }

    /// Primary domain (cache key, expiry subject).
    pub fn primary_domain(&self) -> &str {
        &self.domains[0]
    }

    pub fn renew_before(&self) -> chrono::Duration {
        chrono::Duration::hours(self.renew_before_hours as i64)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
