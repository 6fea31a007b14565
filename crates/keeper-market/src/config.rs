//! Market configuration.

use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};

/// Protocol floor for a job's execution timeout, in seconds.
pub const MIN_TIMEOUT: u64 = 3_600;

/// What happens to value deposited beyond the strict minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurplusPolicy {
    /// Keep it. Owner surplus stays in custody; bidder surplus joins their collateral.
    #[default]
    Retain,
    /// Return it to the depositor in the same operation.
    Refund,
}

/// What the owner gets back when cancelling a timed-out job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// Only the forfeited collateral; the escrowed reward stays in custody.
    #[default]
    ForfeitOnly,
    /// Forfeited collateral plus the escrowed max reward.
    ReturnEscrow,
}

/// Configuration for a [`crate::KeeperMarket`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Minimum execution timeout accepted at submission. Never below [`MIN_TIMEOUT`].
    pub min_timeout: u64,
    /// Handling of over-deposits at submission and bid time.
    pub surplus_policy: SurplusPolicy,
    /// Payout on cancellation.
    pub cancellation_policy: CancellationPolicy,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            min_timeout: MIN_TIMEOUT,
            surplus_policy: SurplusPolicy::Retain,
            cancellation_policy: CancellationPolicy::ForfeitOnly,
        }
    }
}

impl MarketConfig {
    /// Set the minimum timeout.
    #[must_use]
    pub const fn with_min_timeout(mut self, secs: u64) -> Self {
        self.min_timeout = secs;
        self
    }

    /// Set the surplus policy.
    #[must_use]
    pub const fn with_surplus_policy(mut self, policy: SurplusPolicy) -> Self {
        self.surplus_policy = policy;
        self
    }

    /// Set the cancellation policy.
    #[must_use]
    pub const fn with_cancellation_policy(mut self, policy: CancellationPolicy) -> Self {
        self.cancellation_policy = policy;
        self
    }

    /// Check the configuration against protocol limits.
    pub fn validate(&self) -> Result<()> {
        if self.min_timeout < MIN_TIMEOUT {
            return Err(MarketError::invalid_config(format!(
                "min_timeout {} is below the protocol floor {MIN_TIMEOUT}",
                self.min_timeout
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MarketError::invalid_config(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}
