//! Timing and bound configuration for the orchestrator.
//!
//! Every value has a default matching the behaviour users expect from the
//! editor integration; hosts override individual fields from JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a [`SyncConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration value for '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Timings and bounds of every retry loop and cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Delay before re-reading an undefined HEAD.
    pub head_wait_delay_secs: u64,
    pub head_wait_max_attempts: u32,

    /// Interval between first-analysis polls while `IsAnalyzing`.
    pub analysis_poll_interval_secs: u64,
    pub analysis_poll_max_attempts: u32,

    /// Delay before looking for a pull request again on an unknown branch.
    pub pull_request_lookup_delay_secs: u64,
    pub pull_request_lookup_max_attempts: u32,

    /// Delay before re-fetching the analysis of an outdated enabled branch.
    pub outdated_branch_retry_delay_secs: u64,
    pub outdated_branch_retry_max_attempts: u32,

    /// Quiet period after a push before analysis data is refreshed.
    pub push_debounce_secs: u64,

    /// Delay before re-fetching pull requests while any is being analysed.
    pub pull_request_refresh_secs: u64,

    /// Upper bound on pull request listing pages fetched per refresh.
    pub pull_request_page_limit: u32,

    /// Hard cap on the issues held for one branch.
    pub issue_cap: usize,
    pub issue_page_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            head_wait_delay_secs: 5,
            head_wait_max_attempts: 5,
            analysis_poll_interval_secs: 120,
            analysis_poll_max_attempts: 5,
            pull_request_lookup_delay_secs: 60,
            pull_request_lookup_max_attempts: 3,
            outdated_branch_retry_delay_secs: 60,
            outdated_branch_retry_max_attempts: 3,
            push_debounce_secs: 10,
            pull_request_refresh_secs: 120,
            pull_request_page_limit: 10,
            issue_cap: 300,
            issue_page_size: 100,
        }
    }
}

impl SyncConfig {
    /// Parses and validates a JSON document. Missing fields take their
    /// defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive_secs = [
            ("head_wait_delay_secs", self.head_wait_delay_secs),
            ("analysis_poll_interval_secs", self.analysis_poll_interval_secs),
            ("pull_request_lookup_delay_secs", self.pull_request_lookup_delay_secs),
            ("outdated_branch_retry_delay_secs", self.outdated_branch_retry_delay_secs),
            ("push_debounce_secs", self.push_debounce_secs),
            ("pull_request_refresh_secs", self.pull_request_refresh_secs),
        ];
        for (field, value) in positive_secs {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be at least one second".into(),
                });
            }
        }

        let positive_counts = [
            ("head_wait_max_attempts", self.head_wait_max_attempts),
            ("analysis_poll_max_attempts", self.analysis_poll_max_attempts),
            ("pull_request_page_limit", self.pull_request_page_limit),
        ];
        for (field, value) in positive_counts {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be greater than zero".into(),
                });
            }
        }

        if self.issue_cap == 0 {
            return Err(ConfigError::Invalid {
                field: "issue_cap",
                message: "must be greater than zero".into(),
            });
        }
        if self.issue_page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "issue_page_size",
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn head_wait_delay(&self) -> Duration {
        Duration::from_secs(self.head_wait_delay_secs)
    }

    pub fn analysis_poll_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_poll_interval_secs)
    }

    pub fn pull_request_lookup_delay(&self) -> Duration {
        Duration::from_secs(self.pull_request_lookup_delay_secs)
    }

    pub fn outdated_branch_retry_delay(&self) -> Duration {
        Duration::from_secs(self.outdated_branch_retry_delay_secs)
    }

    pub fn push_debounce(&self) -> Duration {
        Duration::from_secs(self.push_debounce_secs)
    }

    pub fn pull_request_refresh(&self) -> Duration {
        Duration::from_secs(self.pull_request_refresh_secs)
    }
}
