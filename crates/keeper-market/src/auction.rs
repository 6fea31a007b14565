//! Descending-price auction.
//!
//! While a job's bidding window is open, anyone may take the executor slot by
//! bidding strictly below the current lowest bid and locking collateral of at
//! least `max_reward - bid`. The displaced bidder's collateral is refunded in
//! the same step. An equal bid never displaces the incumbent.

use keeper_core::{Amount, Principal, Timestamp};

use crate::config::SurplusPolicy;
use crate::error::{MarketError, Result};
use crate::id::JobId;
use crate::ledger::{PayoutReason, TransferBatch};
use crate::market::MarketState;

/// Outcome of an accepted bid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidReceipt {
    /// The job.
    pub job_id: JobId,
    /// New lowest bidder.
    pub bidder: Principal,
    /// New lowest bid.
    pub amount: Amount,
    /// Collateral now held for the bidder.
    pub collateral: Amount,
    /// Previous lowest bidder, if any.
    pub displaced: Option<Principal>,
    /// Collateral returned to the previous lowest bidder.
    pub refunded: Amount,
    /// Collateral sent beyond the minimum and returned to the bidder.
    pub surplus_refunded: Amount,
}

impl MarketState {
    /// Record a new lowest bid on `job_id`.
    pub(crate) fn place_bid(
        &mut self,
        policy: SurplusPolicy,
        caller: &Principal,
        job_id: &JobId,
        bid: Amount,
        collateral: Amount,
        now: Timestamp,
    ) -> Result<BidReceipt> {
        let job = self.registry.require(job_id)?;

        if !job.accepts_bids_at(now) {
            return Err(MarketError::BidPeriodOver {
                job_id: *job_id,
                closed_at: job.bidding_closes_at(),
                now,
            });
        }
        let not_lowest = MarketError::BidNotLowest {
            job_id: *job_id,
            bid,
            lowest_bid: job.lowest_bid,
        };
        if bid >= job.lowest_bid {
            return Err(not_lowest);
        }
        let required = job.required_collateral(bid).ok_or(not_lowest)?;
        if collateral < required {
            return Err(MarketError::NotEnoughCollateral {
                job_id: *job_id,
                required,
                provided: collateral,
            });
        }

        let (held, surplus) = match policy {
            SurplusPolicy::Retain => (collateral, Amount::ZERO),
            SurplusPolicy::Refund => (required, collateral.checked_sub(required).unwrap_or(Amount::ZERO)),
        };

        let displaced = job.lowest_bidder.clone();
        let refunded = if displaced.is_some() { job.bid_collateral } else { Amount::ZERO };

        let mut batch = TransferBatch::new(*job_id).deposit(collateral);
        if let Some(previous) = &displaced {
            batch = batch.pay(previous.clone(), refunded, PayoutReason::BidRefund);
        }
        batch = batch.pay(caller.clone(), surplus, PayoutReason::SurplusRefund);
        let prepared = self.ledger.prepare(batch)?;

        let job = self
            .registry
            .get_mut(job_id)
            .ok_or(MarketError::JobDoesNotExist { job_id: *job_id })?;
        self.ledger.commit(prepared);
        job.lowest_bid = bid;
        job.lowest_bidder = Some(caller.clone());
        job.bid_collateral = held;

        Ok(BidReceipt {
            job_id: *job_id,
            bidder: caller.clone(),
            amount: bid,
            collateral: held,
            displaced,
            refunded,
            surplus_refunded: surplus,
        })
    }
}
