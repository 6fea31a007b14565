//! Error types for keeper-market.
//!
//! Every variant carries the job id (when one exists yet) and the values that
//! caused the rejection, so a caller can diagnose without re-querying. Any
//! error aborts the whole operation with no state or value change.

use std::fmt;

use keeper_core::{Amount, CoreError, Principal, Timestamp};
use thiserror::Error;

use crate::id::{JobId, Target};

/// Result type alias for marketplace operations.
pub type Result<T> = std::result::Result<T, MarketError>;

/// Broad classification of a [`MarketError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The caller is not allowed to perform the operation.
    Authorization,
    /// A supplied parameter or amount is unacceptable.
    Validation,
    /// The job is in the wrong place in its lifecycle.
    Lifecycle,
    /// The external capability failed.
    Execution,
    /// A value transfer could not be carried out.
    Settlement,
    /// The market was constructed with an invalid configuration.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Authorization => "authorization",
            Self::Validation => "validation",
            Self::Lifecycle => "lifecycle",
            Self::Execution => "execution",
            Self::Settlement => "settlement",
            Self::Configuration => "configuration",
        };
        f.write_str(s)
    }
}

/// Errors that can occur in marketplace operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    /// Caller is not the market owner.
    #[error("caller {caller} is not the market owner")]
    NotOwner {
        /// The rejected caller.
        caller: Principal,
        /// The job the caller tried to act on, if any.
        job_id: Option<JobId>,
    },

    /// Requested execution timeout is below the minimum.
    #[error("timeout {timeout}s of job {job_id} is shorter than the minimum {minimum}s")]
    TimeoutTooShort {
        /// Id the job would have had.
        job_id: JobId,
        /// Requested timeout.
        timeout: u64,
        /// Configured minimum.
        minimum: u64,
    },

    /// Target does not resolve to an executable capability.
    #[error("target {target} of job {job_id} is not a registered capability")]
    TargetNotCapability {
        /// Id the job would have had.
        job_id: JobId,
        /// The unresolved target.
        target: Target,
    },

    /// Deposit does not cover the maximum reward.
    #[error("deposit {deposited} does not cover max reward {max_reward} of job {job_id}")]
    RewardNotEnough {
        /// Id the job would have had.
        job_id: JobId,
        /// Requested maximum reward.
        max_reward: Amount,
        /// Value actually deposited.
        deposited: Amount,
    },

    /// An identical job is already open.
    #[error("job {job_id} already exists")]
    DuplicateJob {
        /// The colliding id.
        job_id: JobId,
    },

    /// No open job has this id.
    #[error("job {job_id} does not exist")]
    JobDoesNotExist {
        /// The unknown id.
        job_id: JobId,
    },

    /// Bidding window has closed.
    #[error("bidding for job {job_id} closed at {closed_at} (now {now})")]
    BidPeriodOver {
        /// The job.
        job_id: JobId,
        /// Last instant bids were accepted.
        closed_at: Timestamp,
        /// Time of the attempt.
        now: Timestamp,
    },

    /// Bid does not strictly undercut the current lowest bid.
    #[error("bid {bid} for job {job_id} is not below the lowest bid {lowest_bid}")]
    BidNotLowest {
        /// The job.
        job_id: JobId,
        /// Rejected bid.
        bid: Amount,
        /// Current lowest bid.
        lowest_bid: Amount,
    },

    /// Collateral does not cover `max_reward - bid`.
    #[error("collateral {provided} for job {job_id} is below required {required}")]
    NotEnoughCollateral {
        /// The job.
        job_id: JobId,
        /// Minimum collateral for this bid.
        required: Amount,
        /// Collateral actually sent.
        provided: Amount,
    },

    /// Execution attempted on a job nobody bid on.
    #[error("job {job_id} has no bids")]
    NoBidsForJob {
        /// The job.
        job_id: JobId,
    },

    /// Execution attempted before the delay elapsed.
    #[error("job {job_id} is not ready until {ready_at} (now {now})")]
    JobNotReady {
        /// The job.
        job_id: JobId,
        /// First instant execution is allowed.
        ready_at: Timestamp,
        /// Time of the attempt.
        now: Timestamp,
    },

    /// Execution attempted by someone other than the winning bidder.
    #[error("caller {caller} is not the lowest bidder {lowest_bidder} of job {job_id}")]
    NotJobLowestBidder {
        /// The job.
        job_id: JobId,
        /// The rejected caller.
        caller: Principal,
        /// The current winning bidder.
        lowest_bidder: Principal,
    },

    /// Cancellation attempted before the execution timeout elapsed.
    #[error("job {job_id} cannot be cancelled until {cancellable_at} (now {now})")]
    JobTimeoutNotOver {
        /// The job.
        job_id: JobId,
        /// First instant cancellation is allowed.
        cancellable_at: Timestamp,
        /// Time of the attempt.
        now: Timestamp,
    },

    /// The external capability reported failure.
    #[error("execution of job {job_id} on {target} failed: {reason}")]
    JobExecutionFailed {
        /// The job.
        job_id: JobId,
        /// The invoked target.
        target: Target,
        /// Failure reported by the capability.
        reason: String,
    },

    /// A recipient refused a payout.
    #[error("transfer of {amount} to {recipient} for job {job_id} was rejected")]
    TransferRejected {
        /// The job being settled.
        job_id: JobId,
        /// The refusing recipient.
        recipient: Principal,
        /// Amount that could not be delivered.
        amount: Amount,
    },

    /// A settlement would overflow the representable amount range.
    #[error("settlement of job {job_id} overflows")]
    CustodyOverflow {
        /// The job being settled.
        job_id: JobId,
    },

    /// Custody holds less than a settlement needs to pay out.
    #[error("custody holds {held} but job {job_id} needs {required}")]
    CustodyShortfall {
        /// The job being settled.
        job_id: JobId,
        /// Amount the settlement pays out.
        required: Amount,
        /// Amount currently in custody.
        held: Amount,
    },

    /// Configuration rejected.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Why it was rejected.
        reason: String,
    },

    /// Error from a core primitive.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl MarketError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns the category this error belongs to.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::NotOwner { .. } => ErrorCategory::Authorization,
            Self::TimeoutTooShort { .. }
            | Self::TargetNotCapability { .. }
            | Self::RewardNotEnough { .. }
            | Self::DuplicateJob { .. }
            | Self::BidNotLowest { .. }
            | Self::NotEnoughCollateral { .. }
            | Self::Core(_) => ErrorCategory::Validation,
            Self::JobDoesNotExist { .. }
            | Self::BidPeriodOver { .. }
            | Self::NoBidsForJob { .. }
            | Self::JobNotReady { .. }
            | Self::NotJobLowestBidder { .. }
            | Self::JobTimeoutNotOver { .. } => ErrorCategory::Lifecycle,
            Self::JobExecutionFailed { .. } => ErrorCategory::Execution,
            Self::TransferRejected { .. }
            | Self::CustodyOverflow { .. }
            | Self::CustodyShortfall { .. } => ErrorCategory::Settlement,
            Self::InvalidConfig { .. } => ErrorCategory::Configuration,
        }
    }

    /// Returns the job id the error refers to, if any.
    #[must_use]
    pub const fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::NotOwner { job_id, .. } => job_id.as_ref(),
            Self::TimeoutTooShort { job_id, .. }
            | Self::TargetNotCapability { job_id, .. }
            | Self::RewardNotEnough { job_id, .. }
            | Self::DuplicateJob { job_id }
            | Self::JobDoesNotExist { job_id }
            | Self::BidPeriodOver { job_id, .. }
            | Self::BidNotLowest { job_id, .. }
            | Self::NotEnoughCollateral { job_id, .. }
            | Self::NoBidsForJob { job_id }
            | Self::JobNotReady { job_id, .. }
            | Self::NotJobLowestBidder { job_id, .. }
            | Self::JobTimeoutNotOver { job_id, .. }
            | Self::JobExecutionFailed { job_id, .. }
            | Self::TransferRejected { job_id, .. }
            | Self::CustodyOverflow { job_id }
            | Self::CustodyShortfall { job_id, .. } => Some(job_id),
            Self::InvalidConfig { .. } | Self::Core(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobId {
        JobId::from_bytes([0xab; 32])
    }

    #[test]
    fn categories_follow_taxonomy() {
        let owner = keeper_core::Wallet::generate().principal().clone();
        let cases = [
            (
                MarketError::NotOwner { caller: owner.clone(), job_id: None },
                ErrorCategory::Authorization,
            ),
            (
                MarketError::TimeoutTooShort { job_id: job(), timeout: 10, minimum: 3600 },
                ErrorCategory::Validation,
            ),
            (MarketError::JobDoesNotExist { job_id: job() }, ErrorCategory::Lifecycle),
            (MarketError::NoBidsForJob { job_id: job() }, ErrorCategory::Lifecycle),
            (
                MarketError::JobExecutionFailed {
                    job_id: job(),
                    target: Target::new("vault"),
                    reason: "reverted".into(),
                },
                ErrorCategory::Execution,
            ),
            (
                MarketError::TransferRejected { job_id: job(), recipient: owner, amount: Amount::new(5) },
                ErrorCategory::Settlement,
            ),
            (MarketError::invalid_config("bad"), ErrorCategory::Configuration),
        ];
        for (err, category) in cases {
            assert_eq!(err.category(), category, "{err}");
        }
    }

    #[test]
    fn lifecycle_errors_carry_job_id() {
        let err = MarketError::JobNotReady { job_id: job(), ready_at: 100, now: 50 };
        assert_eq!(err.job_id(), Some(&job()));
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains(&job().to_string()));
    }

    #[test]
    fn validation_errors_report_values() {
        let err = MarketError::NotEnoughCollateral {
            job_id: job(),
            required: Amount::new(40),
            provided: Amount::new(39),
        };
        assert!(err.to_string().contains("39"));
        assert!(err.to_string().contains("40"));
    }

    #[test]
    fn core_errors_convert() {
        let err: MarketError = CoreError::InvalidSignature.into();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(err.job_id().is_none());
    }
}
