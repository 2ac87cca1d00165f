use std::path::PathBuf;
use std::time::Duration;

use qsim_core::error::CoreError;

use crate::poller::PollConfig;

/// Tracker configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local development server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Base URL of the simulation server.
    pub api_url: String,
    /// Polling cadence and retry ceiling.
    pub poll: PollConfig,
    /// Directory holding the session record.
    pub state_dir: PathBuf,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            poll: PollConfig::default(),
            state_dir: PathBuf::from(".qsim"),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                 |
    /// |-----------------------------|-------------------------|
    /// | `QSIM_API_URL`              | `http://localhost:8000` |
    /// | `QSIM_POLL_INTERVAL_MS`     | `300`                   |
    /// | `QSIM_POLL_MAX_FAILURES`    | `3`                     |
    /// | `QSIM_STATE_DIR`            | `.qsim`                 |
    /// | `QSIM_REQUEST_TIMEOUT_SECS` | `10`                    |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();

        let api_url = lookup("QSIM_API_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.api_url);

        let interval_ms: u64 = parse_var(&lookup, "QSIM_POLL_INTERVAL_MS", 300)?;
        let max_failures: u32 = parse_var(&lookup, "QSIM_POLL_MAX_FAILURES", 3)?;
        if interval_ms == 0 || max_failures == 0 {
            return Err(CoreError::Validation(
                "QSIM_POLL_INTERVAL_MS and QSIM_POLL_MAX_FAILURES must be positive".into(),
            ));
        }

        let state_dir = lookup("QSIM_STATE_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir);

        let timeout_secs: u64 = parse_var(&lookup, "QSIM_REQUEST_TIMEOUT_SECS", 10)?;

        Ok(Self {
            api_url,
            poll: PollConfig {
                interval: Duration::from_millis(interval_ms),
                max_failures,
            },
            state_dir,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("{key} must be a valid number, got '{raw}'"))),
        None => Ok(default),
    }
}
