//! Queue configuration.

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Mutable global queue parameters.
///
/// Persisted in the store's `queue_config` table and re-read by workers on
/// every poll cycle, so `config set` takes effect without restarting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Default retry ceiling for jobs that do not carry their own.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base for exponential backoff: delay = base^attempts seconds.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,

    /// Seconds a worker sleeps when no job is eligible.
    #[serde(default = "default_poll_interval")]
    pub worker_poll_interval: f64,

    /// Per-job execution timeout in seconds.
    #[serde(default = "default_job_timeout")]
    pub job_timeout: u64,

    /// Seconds after which a processing job's lease counts as stale and may
    /// be reclaimed by another worker. Must exceed the expected maximum
    /// execution time, or slow jobs will be reclaimed while still running.
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base() -> u32 {
    2
}

fn default_poll_interval() -> f64 {
    1.0
}

fn default_job_timeout() -> u64 {
    300
}

fn default_lease_timeout() -> u64 {
    600
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base: default_backoff_base(),
            worker_poll_interval: default_poll_interval(),
            job_timeout: default_job_timeout(),
            lease_timeout: default_lease_timeout(),
        }
    }
}

impl QueueConfig {
    /// CLI-facing keys, in display order.
    pub const KEYS: [&'static str; 5] = [
        "max-retries",
        "backoff-base",
        "worker-poll-interval",
        "job-timeout",
        "lease-timeout",
    ];

    /// Reject non-positive values for every parameter.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_retries == 0 {
            return Err(QueueError::InvalidConfig(
                "max-retries must be at least 1".into(),
            ));
        }
        if self.backoff_base == 0 {
            return Err(QueueError::InvalidConfig(
                "backoff-base must be at least 1".into(),
            ));
        }
        if !(self.worker_poll_interval > 0.0) {
            return Err(QueueError::InvalidConfig(
                "worker-poll-interval must be positive".into(),
            ));
        }
        if self.job_timeout == 0 {
            return Err(QueueError::InvalidConfig(
                "job-timeout must be at least 1 second".into(),
            ));
        }
        if self.lease_timeout == 0 {
            return Err(QueueError::InvalidConfig(
                "lease-timeout must be at least 1 second".into(),
            ));
        }
        Ok(())
    }

    /// Storage rows for the `queue_config` table.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("max_retries", self.max_retries.to_string()),
            ("backoff_base", self.backoff_base.to_string()),
            ("worker_poll_interval", self.worker_poll_interval.to_string()),
            ("job_timeout", self.job_timeout.to_string()),
            ("lease_timeout", self.lease_timeout.to_string()),
        ]
    }

    /// Apply a raw storage row on top of the current values.
    ///
    /// Unknown keys and unparsable values are ignored so a newer database
    /// stays readable by an older binary.
    pub fn apply_raw(&mut self, key: &str, value: &str) {
        match key {
            "max_retries" => {
                if let Ok(v) = value.parse() {
                    self.max_retries = v;
                }
            }
            "backoff_base" => {
                if let Ok(v) = value.parse() {
                    self.backoff_base = v;
                }
            }
            "worker_poll_interval" => {
                if let Ok(v) = value.parse() {
                    self.worker_poll_interval = v;
                }
            }
            "job_timeout" => {
                if let Ok(v) = value.parse() {
                    self.job_timeout = v;
                }
            }
            "lease_timeout" => {
                if let Ok(v) = value.parse() {
                    self.lease_timeout = v;
                }
            }
            _ => {}
        }
    }

    /// Set a parameter from its CLI key, e.g. `max-retries`.
    pub fn set_key(&mut self, key: &str, value: &str) -> Result<(), QueueError> {
        let parse_err = |key: &str, value: &str| {
            QueueError::InvalidConfig(format!("invalid value '{value}' for {key}"))
        };

        match key {
            "max-retries" => {
                self.max_retries = value.parse().map_err(|_| parse_err(key, value))?;
            }
            "backoff-base" => {
                self.backoff_base = value.parse().map_err(|_| parse_err(key, value))?;
            }
            "worker-poll-interval" => {
                self.worker_poll_interval = value.parse().map_err(|_| parse_err(key, value))?;
            }
            "job-timeout" => {
                self.job_timeout = value.parse().map_err(|_| parse_err(key, value))?;
            }
            "lease-timeout" => {
                self.lease_timeout = value.parse().map_err(|_| parse_err(key, value))?;
            }
            other => {
                return Err(QueueError::InvalidConfig(format!(
                    "unknown config key '{}' (valid keys: {})",
                    other,
                    Self::KEYS.join(", ")
                )));
            }
        }

        self.validate()
    }
}
