//! Custody ledger.
//!
//! Holds pooled escrow (max rewards plus bidder collateral) and moves value
//! out of it. Every movement goes through a [`TransferBatch`] and two phases:
//!
//! 1. [`CustodyLedger::prepare`] checks custody sufficiency, overflow, and that
//!    every recipient accepts its payout, and computes the post-state.
//! 2. [`CustodyLedger::commit`] writes the precomputed post-state. It cannot fail.
//!
//! Nothing is written during prepare, so a rejected batch leaves no trace.
//! Callers hold the market lock across both phases.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use keeper_core::{Amount, Principal};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MarketError, Result};
use crate::id::JobId;

/// Why a payout is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutReason {
    /// Displaced bidder gets their collateral back.
    BidRefund,
    /// Winner receives bid plus collateral.
    WinnerPayout,
    /// Owner receives the unspent part of the max reward.
    OwnerRemainder,
    /// Owner receives a non-performing winner's collateral.
    Forfeiture,
    /// Owner receives the escrowed max reward on cancellation.
    EscrowReturn,
    /// Depositor receives value sent beyond the minimum.
    SurplusRefund,
}

impl fmt::Display for PayoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BidRefund => "bid_refund",
            Self::WinnerPayout => "winner_payout",
            Self::OwnerRemainder => "owner_remainder",
            Self::Forfeiture => "forfeiture",
            Self::EscrowReturn => "escrow_return",
            Self::SurplusRefund => "surplus_refund",
        };
        f.write_str(s)
    }
}

/// A single outbound transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Receiving principal.
    pub recipient: Principal,
    /// Amount sent.
    pub amount: Amount,
    /// Why.
    pub reason: PayoutReason,
}

/// Decides whether a recipient accepts a transfer.
///
/// Models the external transfer boundary: a recipient that refuses value makes
/// the whole enclosing operation fail.
pub trait TransferPolicy: Send + Sync {
    /// Returns true if `recipient` accepts `amount`.
    fn accepts(&self, recipient: &Principal, amount: Amount) -> bool;
}

/// Every recipient accepts every transfer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl TransferPolicy for AcceptAll {
    fn accepts(&self, _recipient: &Principal, _amount: Amount) -> bool {
        true
    }
}

/// Refuses transfers to a fixed set of principals.
#[derive(Debug, Clone, Default)]
pub struct RejectRecipients {
    rejected: Vec<Principal>,
}

impl RejectRecipients {
    /// Refuse every transfer to any of `rejected`.
    #[must_use]
    pub fn new(rejected: impl IntoIterator<Item = Principal>) -> Self {
        Self {
            rejected: rejected.into_iter().collect(),
        }
    }
}

impl TransferPolicy for RejectRecipients {
    fn accepts(&self, recipient: &Principal, _amount: Amount) -> bool {
        !self.rejected.contains(recipient)
    }
}

/// Value movements belonging to one operation on one job.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct TransferBatch {
    job_id: JobId,
    deposit: Amount,
    payouts: Vec<Payout>,
    retained: Amount,
    stranded: Amount,
}

impl TransferBatch {
    /// Start an empty batch for `job_id`.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            deposit: Amount::ZERO,
            payouts: Vec::new(),
            retained: Amount::ZERO,
            stranded: Amount::ZERO,
        }
    }

    /// Value entering custody with the call.
    pub fn deposit(mut self, amount: Amount) -> Self {
        self.deposit = amount;
        self
    }

    /// Pay `amount` out of custody. Zero payouts are dropped.
    pub fn pay(mut self, recipient: Principal, amount: Amount, reason: PayoutReason) -> Self {
        if !amount.is_zero() {
            self.payouts.push(Payout {
                recipient,
                amount,
                reason,
            });
        }
        self
    }

    /// Record over-deposited value that stays in custody unattributed.
    pub fn retain(mut self, amount: Amount) -> Self {
        self.retained = amount;
        self
    }

    /// Record escrow that stays in custody after its job is gone.
    pub fn strand(mut self, amount: Amount) -> Self {
        self.stranded = amount;
        self
    }

    /// The outbound transfers in this batch.
    #[must_use]
    pub fn payouts(&self) -> &[Payout] {
        &self.payouts
    }
}

/// A validated batch, ready to commit.
#[derive(Debug)]
#[must_use = "a prepared transfer does nothing until committed"]
pub struct PreparedTransfer {
    job_id: JobId,
    payouts: Vec<Payout>,
    custody: Amount,
    deposited: Amount,
    paid_out: Amount,
    retained: Amount,
    stranded: Amount,
    balances: Vec<(Principal, Amount)>,
}

impl PreparedTransfer {
    /// The transfers that commit will perform.
    #[must_use]
    pub fn payouts(&self) -> &[Payout] {
        &self.payouts
    }
}

/// Point-in-time view of custody totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustodySnapshot {
    /// Value currently held.
    pub held: Amount,
    /// Total value ever deposited.
    pub deposited: Amount,
    /// Total value ever paid out.
    pub paid_out: Amount,
    /// Over-deposits kept in custody without an owner.
    pub retained_surplus: Amount,
    /// Escrow left in custody by cancelled jobs.
    pub stranded: Amount,
}

impl CustodySnapshot {
    /// Value backing open jobs (held minus retained and stranded).
    #[must_use]
    pub fn backing_open_jobs(&self) -> Amount {
        self.held
            .checked_sub(self.retained_surplus)
            .and_then(|v| v.checked_sub(self.stranded))
            .unwrap_or(Amount::ZERO)
    }
}

/// Pooled custody and the payout accounts it settles into.
pub struct CustodyLedger {
    custody: Amount,
    deposited: Amount,
    paid_out: Amount,
    retained: Amount,
    stranded: Amount,
    balances: HashMap<Principal, Amount>,
    policy: Arc<dyn TransferPolicy>,
}

impl CustodyLedger {
    /// An empty ledger using `policy` for recipient acceptance.
    #[must_use]
    pub fn new(policy: Arc<dyn TransferPolicy>) -> Self {
        Self {
            custody: Amount::ZERO,
            deposited: Amount::ZERO,
            paid_out: Amount::ZERO,
            retained: Amount::ZERO,
            stranded: Amount::ZERO,
            balances: HashMap::new(),
            policy,
        }
    }

    /// Total value paid out to `principal` so far.
    #[must_use]
    pub fn balance(&self, principal: &Principal) -> Amount {
        self.balances.get(principal).copied().unwrap_or(Amount::ZERO)
    }

    /// Current custody totals.
    #[must_use]
    pub const fn snapshot(&self) -> CustodySnapshot {
        CustodySnapshot {
            held: self.custody,
            deposited: self.deposited,
            paid_out: self.paid_out,
            retained_surplus: self.retained,
            stranded: self.stranded,
        }
    }

    /// Validate a batch and compute its effect without applying it.
    pub fn prepare(&self, batch: TransferBatch) -> Result<PreparedTransfer> {
        let job_id = batch.job_id;
        let overflow = || MarketError::CustodyOverflow { job_id };

        let available = self.custody.checked_add(batch.deposit).ok_or_else(overflow)?;
        let mut outgoing = Amount::ZERO;
        let mut balances: Vec<(Principal, Amount)> = Vec::new();

        for payout in &batch.payouts {
            if !self.policy.accepts(&payout.recipient, payout.amount) {
                return Err(MarketError::TransferRejected {
                    job_id,
                    recipient: payout.recipient.clone(),
                    amount: payout.amount,
                });
            }
            outgoing = outgoing.checked_add(payout.amount).ok_or_else(overflow)?;

            // Same recipient may appear twice in one batch; accumulate.
            if let Some((_, bal)) = balances.iter_mut().find(|(p, _)| p == &payout.recipient) {
                *bal = bal.checked_add(payout.amount).ok_or_else(overflow)?;
            } else {
                let bal = self
                    .balance(&payout.recipient)
                    .checked_add(payout.amount)
                    .ok_or_else(overflow)?;
                balances.push((payout.recipient.clone(), bal));
            }
        }

        let custody = available
            .checked_sub(outgoing)
            .ok_or(MarketError::CustodyShortfall {
                job_id,
                required: outgoing,
                held: available,
            })?;

        Ok(PreparedTransfer {
            job_id,
            custody,
            deposited: self.deposited.checked_add(batch.deposit).ok_or_else(overflow)?,
            paid_out: self.paid_out.checked_add(outgoing).ok_or_else(overflow)?,
            retained: self.retained.checked_add(batch.retained).ok_or_else(overflow)?,
            stranded: self.stranded.checked_add(batch.stranded).ok_or_else(overflow)?,
            balances,
            payouts: batch.payouts,
        })
    }

    /// Apply a prepared batch.
    pub fn commit(&mut self, prepared: PreparedTransfer) {
        for payout in &prepared.payouts {
            debug!(
                job_id = %prepared.job_id.short(),
                recipient = %payout.recipient,
                amount = %payout.amount,
                reason = %payout.reason,
                "Custody payout"
            );
        }
        self.custody = prepared.custody;
        self.deposited = prepared.deposited;
        self.paid_out = prepared.paid_out;
        self.retained = prepared.retained;
        self.stranded = prepared.stranded;
        self.balances.extend(prepared.balances);
    }

    /// Prepare and commit in one step.
    pub fn apply(&mut self, batch: TransferBatch) -> Result<()> {
        let prepared = self.prepare(batch)?;
        self.commit(prepared);
        Ok(())
    }
}

impl fmt::Debug for CustodyLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustodyLedger")
            .field("custody", &self.custody)
            .field("paid_out", &self.paid_out)
            .field("accounts", &self.balances.len())
            .finish_non_exhaustive()
    }
}

impl Default for CustodyLedger {
    fn default() -> Self {
        Self::new(Arc::new(AcceptAll))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::Wallet;
    use proptest::prelude::*;

    fn principal() -> Principal {
        Wallet::generate().principal().clone()
    }

    fn job() -> JobId {
        JobId::from_bytes([3; 32])
    }

    #[test]
    fn deposit_enters_custody() {
        let mut ledger = CustodyLedger::default();
        ledger.apply(TransferBatch::new(job()).deposit(Amount::new(100))).unwrap();
        let snap = ledger.snapshot();
        assert_eq!(snap.held, Amount::new(100));
        assert_eq!(snap.deposited, Amount::new(100));
        assert_eq!(snap.paid_out, Amount::ZERO);
    }

    #[test]
    fn payouts_credit_recipients() {
        let mut ledger = CustodyLedger::default();
        let alice = principal();
        ledger
            .apply(
                TransferBatch::new(job())
                    .deposit(Amount::new(100))
                    .pay(alice.clone(), Amount::new(30), PayoutReason::BidRefund),
            )
            .unwrap();
        assert_eq!(ledger.balance(&alice), Amount::new(30));
        assert_eq!(ledger.snapshot().held, Amount::new(70));
        assert_eq!(ledger.snapshot().paid_out, Amount::new(30));
    }

    #[test]
    fn repeated_recipient_accumulates() {
        let mut ledger = CustodyLedger::default();
        let owner = principal();
        ledger
            .apply(
                TransferBatch::new(job())
                    .deposit(Amount::new(100))
                    .pay(owner.clone(), Amount::new(10), PayoutReason::Forfeiture)
                    .pay(owner.clone(), Amount::new(90), PayoutReason::EscrowReturn),
            )
            .unwrap();
        assert_eq!(ledger.balance(&owner), Amount::new(100));
        assert_eq!(ledger.snapshot().held, Amount::ZERO);
    }

    #[test]
    fn zero_payouts_are_dropped() {
        let batch = TransferBatch::new(job()).pay(principal(), Amount::ZERO, PayoutReason::Forfeiture);
        assert!(batch.payouts().is_empty());
    }

    #[test]
    fn shortfall_is_rejected_without_effect() {
        let mut ledger = CustodyLedger::default();
        ledger.apply(TransferBatch::new(job()).deposit(Amount::new(10))).unwrap();
        let before = ledger.snapshot();

        let err = ledger
            .apply(TransferBatch::new(job()).pay(principal(), Amount::new(11), PayoutReason::WinnerPayout))
            .unwrap_err();
        assert!(matches!(err, MarketError::CustodyShortfall { .. }));
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn rejected_recipient_aborts_whole_batch() {
        let bob = principal();
        let alice = principal();
        let mut ledger = CustodyLedger::new(Arc::new(RejectRecipients::new([bob.clone()])));
        ledger.apply(TransferBatch::new(job()).deposit(Amount::new(100))).unwrap();
        let before = ledger.snapshot();

        let err = ledger
            .apply(
                TransferBatch::new(job())
                    .pay(alice.clone(), Amount::new(50), PayoutReason::OwnerRemainder)
                    .pay(bob.clone(), Amount::new(50), PayoutReason::WinnerPayout),
            )
            .unwrap_err();

        assert_eq!(
            err,
            MarketError::TransferRejected { job_id: job(), recipient: bob, amount: Amount::new(50) }
        );
        assert_eq!(ledger.balance(&alice), Amount::ZERO);
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn overflowing_deposit_is_rejected() {
        let mut ledger = CustodyLedger::default();
        ledger.apply(TransferBatch::new(job()).deposit(Amount::MAX)).unwrap();
        let err = ledger.apply(TransferBatch::new(job()).deposit(Amount::new(1))).unwrap_err();
        assert_eq!(err, MarketError::CustodyOverflow { job_id: job() });
    }

    #[test]
    fn prepare_does_not_mutate() {
        let ledger = CustodyLedger::default();
        let prepared = ledger.prepare(TransferBatch::new(job()).deposit(Amount::new(5))).unwrap();
        assert_eq!(prepared.payouts().len(), 0);
        assert_eq!(ledger.snapshot().held, Amount::ZERO);
    }

    #[test]
    fn retained_and_stranded_are_tracked() {
        let mut ledger = CustodyLedger::default();
        ledger
            .apply(TransferBatch::new(job()).deposit(Amount::new(120)).retain(Amount::new(20)))
            .unwrap();
        ledger.apply(TransferBatch::new(job()).strand(Amount::new(100))).unwrap();
        let snap = ledger.snapshot();
        assert_eq!(snap.retained_surplus, Amount::new(20));
        assert_eq!(snap.stranded, Amount::new(100));
        assert_eq!(snap.backing_open_jobs(), Amount::ZERO);
    }

    /// `(deposit, [(recipient index, amount)])` steps; recipient 3 is refused.
    fn batches_strategy() -> impl Strategy<Value = Vec<(u64, Vec<(usize, u64)>)>> {
        prop::collection::vec(
            (0u64..1_000, prop::collection::vec((0usize..4, 0u64..600), 0..4)),
            1..30,
        )
    }

    proptest! {
        #[test]
        fn custody_balances_and_rejections_leave_no_trace(steps in batches_strategy()) {
            let people: Vec<Principal> = (0..4).map(|_| principal()).collect();
            let mut ledger = CustodyLedger::new(Arc::new(RejectRecipients::new([people[3].clone()])));

            for (deposit, payouts) in steps {
                let mut batch = TransferBatch::new(job()).deposit(Amount::new(deposit));
                for (who, amount) in &payouts {
                    batch = batch.pay(people[*who].clone(), Amount::new(*amount), PayoutReason::BidRefund);
                }
                let before = ledger.snapshot();
                let balances_before: Vec<Amount> = people.iter().map(|p| ledger.balance(p)).collect();

                let outgoing: u64 = payouts.iter().map(|(_, a)| a).sum();
                let refused = payouts.iter().any(|(who, _)| *who == 3);
                let covered = before.held.units() + deposit >= outgoing;

                match ledger.apply(batch) {
                    Ok(()) => {
                        prop_assert!(!refused && covered);
                        let after = ledger.snapshot();
                        prop_assert_eq!(after.deposited.units(), before.deposited.units() + deposit);
                        prop_assert_eq!(after.paid_out.units(), before.paid_out.units() + outgoing);
                    }
                    Err(_) => {
                        prop_assert!(refused || !covered);
                        prop_assert_eq!(ledger.snapshot(), before);
                        let balances_after: Vec<Amount> = people.iter().map(|p| ledger.balance(p)).collect();
                        prop_assert_eq!(balances_after, balances_before);
                    }
                }

                let snap = ledger.snapshot();
                prop_assert_eq!(snap.deposited.units(), snap.held.units() + snap.paid_out.units());
                let credited: u64 = people.iter().map(|p| ledger.balance(p).units()).sum();
                prop_assert_eq!(credited, snap.paid_out.units());
            }
        }
    }
}
