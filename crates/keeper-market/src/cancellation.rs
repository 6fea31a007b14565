//! Timeout guard: the owner reclaims a job nobody executed in time.

use keeper_core::{Amount, Principal, Timestamp};

use crate::config::CancellationPolicy;
use crate::error::{MarketError, Result};
use crate::id::JobId;
use crate::ledger::{PayoutReason, TransferBatch};
use crate::market::MarketState;

/// Outcome of a cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationReceipt {
    /// The cancelled job, now deleted.
    pub job_id: JobId,
    /// Owner that received the payout.
    pub owner: Principal,
    /// Winner collateral paid to the owner. Zero if nobody bid.
    pub forfeited: Amount,
    /// Escrowed max reward paid to the owner.
    pub escrow_returned: Amount,
    /// Escrowed max reward left in custody.
    pub stranded: Amount,
}

impl MarketState {
    /// Cancel `job_id` after its execution timeout.
    pub(crate) fn cancel(
        &mut self,
        policy: CancellationPolicy,
        caller: &Principal,
        job_id: &JobId,
        now: Timestamp,
    ) -> Result<CancellationReceipt> {
        if caller != &self.owner {
            return Err(MarketError::NotOwner {
                caller: caller.clone(),
                job_id: Some(*job_id),
            });
        }
        let job = self.registry.require(job_id)?;
        if !job.cancellable_now(now) {
            return Err(MarketError::JobTimeoutNotOver {
                job_id: *job_id,
                cancellable_at: job.cancellable_at(),
                now,
            });
        }

        let forfeited = job.bid_collateral;
        let (escrow_returned, stranded) = match policy {
            CancellationPolicy::ForfeitOnly => (Amount::ZERO, job.terms.max_reward),
            CancellationPolicy::ReturnEscrow => (job.terms.max_reward, Amount::ZERO),
        };
        let batch = TransferBatch::new(*job_id)
            .pay(job.owner.clone(), forfeited, PayoutReason::Forfeiture)
            .pay(job.owner.clone(), escrow_returned, PayoutReason::EscrowReturn)
            .strand(stranded);
        let prepared = self.ledger.prepare(batch)?;
        let owner = job.owner.clone();

        self.ledger.commit(prepared);
        self.registry.remove(job_id);

        Ok(CancellationReceipt {
            job_id: *job_id,
            owner,
            forfeited,
            escrow_returned,
            stranded,
        })
    }
}
