//! Execution gateway.
//!
//! Once bidding closes, the winning bidder triggers the job's capability and
//! is paid `lowest_bid + bid_collateral`; the owner gets back
//! `max_reward - lowest_bid`. Settlement is two-phase around the invocation:
//! payouts are prepared first, the capability runs, and only a successful
//! invocation commits them and deletes the job. A failed invocation leaves
//! the job open so the winner can retry.

use keeper_core::{Amount, Principal, Timestamp};
use tracing::warn;

use crate::capability::{invoke_guarded, CapabilityRegistry};
use crate::error::{MarketError, Result};
use crate::id::{JobId, Target};
use crate::ledger::{PayoutReason, TransferBatch};
use crate::market::MarketState;

/// Outcome of a successful execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReceipt {
    /// The executed job, now deleted.
    pub job_id: JobId,
    /// The invoked target.
    pub target: Target,
    /// The executing bidder.
    pub winner: Principal,
    /// Winning bid.
    pub amount: Amount,
    /// Collateral returned to the winner.
    pub collateral: Amount,
    /// Total paid to the winner.
    pub winner_payout: Amount,
    /// Unspent reward paid to the owner.
    pub owner_payout: Amount,
}

impl MarketState {
    /// Run `job_id` on behalf of its winning bidder and settle it.
    pub(crate) fn execute(
        &mut self,
        capabilities: &CapabilityRegistry,
        caller: &Principal,
        job_id: &JobId,
        now: Timestamp,
    ) -> Result<ExecutionReceipt> {
        let job = self.registry.require(job_id)?;

        let winner = job
            .lowest_bidder
            .clone()
            .ok_or(MarketError::NoBidsForJob { job_id: *job_id })?;
        if !job.executable_at(now) {
            return Err(MarketError::JobNotReady {
                job_id: *job_id,
                ready_at: job.bidding_closes_at(),
                now,
            });
        }
        if caller != &winner {
            return Err(MarketError::NotJobLowestBidder {
                job_id: *job_id,
                caller: caller.clone(),
                lowest_bidder: winner,
            });
        }

        let winner_payout = job
            .lowest_bid
            .checked_add(job.bid_collateral)
            .ok_or(MarketError::CustodyOverflow { job_id: *job_id })?;
        let owner_payout = job
            .terms
            .max_reward
            .checked_sub(job.lowest_bid)
            .unwrap_or(Amount::ZERO);

        let batch = TransferBatch::new(*job_id)
            .pay(winner.clone(), winner_payout, PayoutReason::WinnerPayout)
            .pay(job.owner.clone(), owner_payout, PayoutReason::OwnerRemainder);
        let prepared = self.ledger.prepare(batch)?;

        let target = job.terms.target.clone();
        let failed = |reason: String| MarketError::JobExecutionFailed {
            job_id: *job_id,
            target: target.clone(),
            reason,
        };
        let capability = capabilities
            .resolve(&target)
            .ok_or_else(|| failed("target is no longer registered".to_string()))?;
        if let Err(fault) = invoke_guarded(capability.as_ref(), &job.terms.selector, &job.terms.payload) {
            warn!(job_id = %job_id.short(), %target, reason = %fault, "Capability invocation failed");
            return Err(failed(fault.message));
        }

        let receipt = ExecutionReceipt {
            job_id: *job_id,
            target: target.clone(),
            winner,
            amount: job.lowest_bid,
            collateral: job.bid_collateral,
            winner_payout,
            owner_payout,
        };
        self.ledger.commit(prepared);
        self.registry.remove(job_id);
        Ok(receipt)
    }
}
