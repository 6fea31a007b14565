//! Jobs: owner-submitted units of delayed work backed by an escrowed reward.

use std::fmt;

use keeper_core::{Amount, Principal, Timestamp};
use serde::{Deserialize, Serialize};

use crate::id::{JobId, Selector, Target};

/// The owner-chosen parameters of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTerms {
    /// Capability invoked at execution.
    pub target: Target,
    /// Method selector passed to the capability.
    pub selector: Selector,
    /// Opaque call payload.
    pub payload: Vec<u8>,
    /// Seconds from creation until the bidding window closes and execution opens.
    pub delay: u64,
    /// Maximum reward escrowed by the owner.
    pub max_reward: Amount,
    /// Seconds after the delay during which only the winner may act.
    pub timeout: u64,
}

impl JobTerms {
    /// Create job terms.
    #[must_use]
    pub fn new(
        target: Target,
        selector: Selector,
        payload: Vec<u8>,
        delay: u64,
        max_reward: Amount,
        timeout: u64,
    ) -> Self {
        Self {
            target,
            selector,
            payload,
            delay,
            max_reward,
            timeout,
        }
    }
}

/// Where a job is in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Bids are accepted.
    Bidding,
    /// Bidding closed; the winner may execute.
    AwaitingExecution,
    /// Timeout elapsed; the owner may cancel (the winner may still execute first).
    Cancellable,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bidding => write!(f, "bidding"),
            Self::AwaitingExecution => write!(f, "awaiting_execution"),
            Self::Cancellable => write!(f, "cancellable"),
        }
    }
}

/// An open job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Content-addressed identifier.
    pub id: JobId,
    /// Principal that submitted and funds the job.
    pub owner: Principal,
    /// Owner-chosen parameters.
    pub terms: JobTerms,
    /// Creation time on the domain clock.
    pub created_at: Timestamp,
    /// Current lowest bid; starts at `max_reward`.
    pub lowest_bid: Amount,
    /// Current winning bidder.
    pub lowest_bidder: Option<Principal>,
    /// Collateral held for the winning bidder.
    pub bid_collateral: Amount,
}

impl Job {
    /// A freshly created job with no bids.
    #[must_use]
    pub fn new(owner: Principal, terms: JobTerms, created_at: Timestamp) -> Self {
        Self {
            id: JobId::derive(&terms, created_at),
            owner,
            lowest_bid: terms.max_reward,
            lowest_bidder: None,
            bid_collateral: Amount::ZERO,
            terms,
            created_at,
        }
    }

    /// Last instant at which bids are accepted, and first at which execution is.
    #[must_use]
    pub const fn bidding_closes_at(&self) -> Timestamp {
        self.created_at.saturating_add(self.terms.delay)
    }

    /// First instant the owner may cancel.
    #[must_use]
    pub const fn cancellable_at(&self) -> Timestamp {
        self.bidding_closes_at().saturating_add(self.terms.timeout)
    }

    /// Whether a bid placed at `now` falls inside the window.
    #[must_use]
    pub const fn accepts_bids_at(&self, now: Timestamp) -> bool {
        now <= self.bidding_closes_at()
    }

    /// Whether execution is allowed at `now`.
    #[must_use]
    pub const fn executable_at(&self, now: Timestamp) -> bool {
        now >= self.bidding_closes_at()
    }

    /// Whether cancellation is allowed at `now`.
    #[must_use]
    pub const fn cancellable_now(&self, now: Timestamp) -> bool {
        now >= self.cancellable_at()
    }

    /// Lifecycle phase at `now`.
    #[must_use]
    pub const fn phase(&self, now: Timestamp) -> JobPhase {
        if self.accepts_bids_at(now) {
            JobPhase::Bidding
        } else if self.cancellable_now(now) {
            JobPhase::Cancellable
        } else {
            JobPhase::AwaitingExecution
        }
    }

    /// Minimum collateral for a bid of `bid`, or `None` if the bid exceeds the max reward.
    #[must_use]
    pub const fn required_collateral(&self, bid: Amount) -> Option<Amount> {
        self.terms.max_reward.checked_sub(bid)
    }

    /// Whether anyone has bid yet.
    #[must_use]
    pub const fn has_bids(&self) -> bool {
        self.lowest_bidder.is_some()
    }
}
