//! The marketplace service object.
//!
//! [`KeeperMarket`] owns the job registry and custody ledger behind one lock.
//! Every mutating call holds that lock from validation through settlement, so
//! operations are serialized and an error leaves no partial state behind.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use keeper_core::{Amount, Clock, Principal, SystemClock};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auction::BidReceipt;
use crate::cancellation::CancellationReceipt;
use crate::capability::{Capability, CapabilityRegistry};
use crate::config::MarketConfig;
use crate::error::{ErrorCategory, MarketError, Result};
use crate::events::{EventSink, MarketEvent, TracingEventSink};
use crate::execution::ExecutionReceipt;
use crate::id::{JobId, Target};
use crate::job::{Job, JobPhase, JobTerms};
use crate::ledger::{AcceptAll, CustodyLedger, CustodySnapshot, TransferPolicy};
use crate::registry::JobRegistry;

/// Mutable market state guarded by the market lock.
#[derive(Debug)]
pub(crate) struct MarketState {
    pub(crate) owner: Principal,
    pub(crate) registry: JobRegistry,
    pub(crate) ledger: CustodyLedger,
}

impl MarketState {
    pub(crate) fn new(owner: Principal, ledger: CustodyLedger) -> Self {
        Self {
            owner,
            registry: JobRegistry::new(),
            ledger,
        }
    }
}

/// Builder for [`KeeperMarket`].
pub struct KeeperMarketBuilder {
    owner: Principal,
    config: MarketConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    transfer_policy: Arc<dyn TransferPolicy>,
    capabilities: Vec<(Target, Arc<dyn Capability>)>,
}

impl KeeperMarketBuilder {
    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: MarketConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `clock` as the domain time source.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Deliver notifications to `sink`.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Decide payout acceptance with `policy`.
    #[must_use]
    pub fn transfer_policy(mut self, policy: Arc<dyn TransferPolicy>) -> Self {
        self.transfer_policy = policy;
        self
    }

    /// Register a capability up front.
    #[must_use]
    pub fn capability(mut self, target: Target, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.push((target, capability));
        self
    }

    /// Validate the configuration and build the market.
    pub fn build(self) -> Result<KeeperMarket> {
        self.config.validate()?;

        let capabilities = CapabilityRegistry::new();
        for (target, capability) in self.capabilities {
            capabilities.register(target, capability);
        }

        info!(
            owner = %self.owner,
            min_timeout = self.config.min_timeout,
            surplus_policy = ?self.config.surplus_policy,
            cancellation_policy = ?self.config.cancellation_policy,
            "Keeper market started"
        );

        Ok(KeeperMarket {
            state: Mutex::new(MarketState::new(
                self.owner,
                CustodyLedger::new(self.transfer_policy),
            )),
            config: self.config,
            capabilities,
            clock: self.clock,
            events: self.events,
        })
    }
}

impl fmt::Debug for KeeperMarketBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeeperMarketBuilder")
            .field("owner", &self.owner)
            .field("config", &self.config)
            .field("capabilities", &self.capabilities.len())
            .finish_non_exhaustive()
    }
}

/// Descending-price auction and escrow market for delayed jobs.
///
/// Every operation takes the caller as an already-authenticated [`Principal`].
/// Callers that accept requests from outside the process verify them first with
/// [`Principal::verify`].
pub struct KeeperMarket {
    config: MarketConfig,
    state: Mutex<MarketState>,
    capabilities: CapabilityRegistry,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl KeeperMarket {
    /// Start building a market whose designated owner is `owner`.
    ///
    /// Defaults: [`MarketConfig::default`], [`SystemClock`],
    /// [`TracingEventSink`], and a ledger that accepts every payout.
    #[must_use]
    pub fn builder(owner: Principal) -> KeeperMarketBuilder {
        KeeperMarketBuilder {
            owner,
            config: MarketConfig::default(),
            clock: Arc::new(SystemClock),
            events: Arc::new(TracingEventSink),
            transfer_policy: Arc::new(AcceptAll),
            capabilities: Vec::new(),
        }
    }

    /// A market with default collaborators and `config`.
    pub fn new(owner: Principal, config: MarketConfig) -> Result<Self> {
        Self::builder(owner).config(config).build()
    }

    /// The designated owner.
    #[must_use]
    pub fn owner(&self) -> Principal {
        self.state.lock().owner.clone()
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Register (or replace) the capability behind `target`.
    pub fn register_capability(&self, target: Target, capability: Arc<dyn Capability>) {
        self.capabilities.register(target, capability);
    }

    /// Remove the capability behind `target`. Open jobs pointing at it can no
    /// longer execute.
    pub fn unregister_capability(&self, target: &Target) -> bool {
        self.capabilities.unregister(target)
    }

    /// Submit and fund a new job. Only the designated owner may submit.
    ///
    /// `deposited` must cover `terms.max_reward`; the excess is handled per the
    /// configured surplus policy.
    pub fn submit(&self, caller: &Principal, terms: JobTerms, deposited: Amount) -> Result<JobId> {
        let mut state = self.state.lock();
        let now = self.clock.now();

        let (job, receipt) = state
            .submit(&self.config, &self.capabilities, caller, terms, deposited, now)
            .inspect_err(|e| log_rejection("submit", e))?;

        info!(
            job_id = %job.id.short(),
            target = %job.terms.target,
            max_reward = %job.terms.max_reward,
            deposited = %deposited,
            surplus_retained = %receipt.surplus_retained,
            surplus_refunded = %receipt.surplus_refunded,
            "Job created"
        );
        self.events.emit(&MarketEvent::JobCreated {
            event_id: Uuid::new_v4(),
            timestamp: now,
            recorded_at: Utc::now(),
            job_id: job.id,
            owner: job.owner,
            target: job.terms.target,
            selector: job.terms.selector,
            payload: job.terms.payload,
            delay: job.terms.delay,
            timeout: job.terms.timeout,
            max_reward: job.terms.max_reward,
            deposited,
        });
        Ok(receipt.job_id)
    }

    /// Bid `amount` on `job_id`, locking `collateral`.
    pub fn place_bid(
        &self,
        caller: &Principal,
        job_id: &JobId,
        amount: Amount,
        collateral: Amount,
    ) -> Result<BidReceipt> {
        let mut state = self.state.lock();
        let now = self.clock.now();

        let receipt = state
            .place_bid(self.config.surplus_policy, caller, job_id, amount, collateral, now)
            .inspect_err(|e| log_rejection("place_bid", e))?;

        info!(
            job_id = %job_id.short(),
            bidder = %receipt.bidder,
            amount = %receipt.amount,
            collateral = %receipt.collateral,
            displaced = receipt.displaced.is_some(),
            "Bid placed"
        );
        self.events.emit(&MarketEvent::BidPlaced {
            event_id: Uuid::new_v4(),
            timestamp: now,
            recorded_at: Utc::now(),
            job_id: *job_id,
            bidder: receipt.bidder.clone(),
            amount: receipt.amount,
            collateral: receipt.collateral,
            displaced: receipt.displaced.clone(),
            refunded: receipt.refunded,
        });
        Ok(receipt)
    }

    /// Execute `job_id` as its winning bidder and settle it.
    ///
    /// Capabilities run while the market is locked and must not call back
    /// into the same market.
    pub fn execute(&self, caller: &Principal, job_id: &JobId) -> Result<ExecutionReceipt> {
        let mut state = self.state.lock();
        let now = self.clock.now();

        let receipt = state
            .execute(&self.capabilities, caller, job_id, now)
            .inspect_err(|e| log_rejection("execute", e))?;

        info!(
            job_id = %job_id.short(),
            target = %receipt.target,
            winner = %receipt.winner,
            winner_payout = %receipt.winner_payout,
            owner_payout = %receipt.owner_payout,
            "Job executed"
        );
        self.events.emit(&MarketEvent::JobExecuted {
            event_id: Uuid::new_v4(),
            timestamp: now,
            recorded_at: Utc::now(),
            job_id: *job_id,
            target: receipt.target.clone(),
            winner: receipt.winner.clone(),
            amount: receipt.amount,
            collateral: receipt.collateral,
            owner_payout: receipt.owner_payout,
        });
        Ok(receipt)
    }

    /// Cancel a job whose execution timeout has elapsed. Owner only.
    pub fn cancel_job(&self, caller: &Principal, job_id: &JobId) -> Result<CancellationReceipt> {
        let mut state = self.state.lock();
        let now = self.clock.now();

        let receipt = state
            .cancel(self.config.cancellation_policy, caller, job_id, now)
            .inspect_err(|e| log_rejection("cancel_job", e))?;

        info!(
            job_id = %job_id.short(),
            forfeited = %receipt.forfeited,
            escrow_returned = %receipt.escrow_returned,
            "Job cancelled"
        );
        self.events.emit(&MarketEvent::JobCancelled {
            event_id: Uuid::new_v4(),
            timestamp: now,
            recorded_at: Utc::now(),
            job_id: *job_id,
            forfeited: receipt.forfeited,
            escrow_returned: receipt.escrow_returned,
        });
        Ok(receipt)
    }

    /// Snapshot of an open job.
    #[must_use]
    pub fn job(&self, job_id: &JobId) -> Option<Job> {
        self.state.lock().registry.get(job_id).cloned()
    }

    /// All open jobs, oldest first.
    #[must_use]
    pub fn open_jobs(&self) -> Vec<Job> {
        self.state.lock().registry.sorted()
    }

    /// Lifecycle phase of an open job at the current time.
    pub fn phase(&self, job_id: &JobId) -> Result<JobPhase> {
        let state = self.state.lock();
        let job = state.registry.require(job_id)?;
        Ok(job.phase(self.clock.now()))
    }

    /// Total paid out to `principal`.
    #[must_use]
    pub fn balance(&self, principal: &Principal) -> Amount {
        self.state.lock().ledger.balance(principal)
    }

    /// Custody totals.
    #[must_use]
    pub fn custody(&self) -> CustodySnapshot {
        self.state.lock().ledger.snapshot()
    }
}

impl fmt::Debug for KeeperMarket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("KeeperMarket")
            .field("owner", &state.owner)
            .field("config", &self.config)
            .field("open_jobs", &state.registry.len())
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

fn log_rejection(operation: &'static str, err: &MarketError) {
    let category = err.category();
    let job_id = err.job_id().map(JobId::short);
    match category {
        ErrorCategory::Execution | ErrorCategory::Settlement => {
            warn!(operation, %category, job_id = ?job_id, error = %err, "Operation rejected");
        }
        _ => {
            debug!(operation, %category, job_id = ?job_id, error = %err, "Operation rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::ScriptedCapability;
    use crate::config::{CancellationPolicy, SurplusPolicy};
    use crate::events::RecordingEventSink;
    use crate::id::Selector;
    use crate::ledger::RejectRecipients;
    use keeper_core::{ManualClock, Wallet};

    struct Harness {
        market: KeeperMarket,
        clock: Arc<ManualClock>,
        events: Arc<RecordingEventSink>,
        capability: Arc<ScriptedCapability>,
        owner: Principal,
    }

    fn harness_with(config: MarketConfig, policy: Arc<dyn TransferPolicy>) -> Harness {
        let owner = Wallet::generate().principal().clone();
        let clock = Arc::new(ManualClock::new(1_000));
        let events = Arc::new(RecordingEventSink::new());
        let capability = Arc::new(ScriptedCapability::succeeding());
        let market = KeeperMarket::builder(owner.clone())
            .config(config)
            .clock(clock.clone())
            .event_sink(events.clone())
            .transfer_policy(policy)
            .capability(Target::new("vault"), capability.clone())
            .build()
            .unwrap();
        Harness { market, clock, events, capability, owner }
    }

    fn harness() -> Harness {
        harness_with(MarketConfig::default(), Arc::new(AcceptAll))
    }

    fn terms(max_reward: u64) -> JobTerms {
        JobTerms::new(
            Target::new("vault"),
            Selector::from_signature("harvest()"),
            vec![1],
            86_400,
            Amount::new(max_reward),
            3_600,
        )
    }

    fn principal() -> Principal {
        Wallet::generate().principal().clone()
    }

    #[test]
    fn build_rejects_invalid_config() {
        let result = KeeperMarket::builder(principal())
            .config(MarketConfig::default().with_min_timeout(10))
            .build();
        assert!(matches!(result, Err(MarketError::InvalidConfig { .. })));
    }

    #[test]
    fn submit_records_job_and_event() {
        let h = harness();
        let id = h.market.submit(&h.owner, terms(100), Amount::new(100)).unwrap();

        let job = h.market.job(&id).unwrap();
        assert_eq!(job.created_at, 1_000);
        assert_eq!(job.lowest_bid, Amount::new(100));
        assert_eq!(h.market.custody().held, Amount::new(100));
        assert_eq!(h.events.events()[0].event_type(), "job_created");
    }

    #[test]
    fn submit_validation_order() {
        let h = harness();
        let stranger = principal();
        assert!(matches!(
            h.market.submit(&stranger, terms(100), Amount::new(100)),
            Err(MarketError::NotOwner { job_id: None, .. })
        ));

        let mut short = terms(100);
        short.timeout = 3_599;
        assert_eq!(
            h.market.submit(&h.owner, short.clone(), Amount::new(100)),
            Err(MarketError::TimeoutTooShort {
                job_id: JobId::derive(&short, 1_000),
                timeout: 3_599,
                minimum: 3_600,
            })
        );

        let mut unknown = terms(100);
        unknown.target = Target::new("nowhere");
        let err = h.market.submit(&h.owner, unknown.clone(), Amount::new(100)).unwrap_err();
        assert!(matches!(err, MarketError::TargetNotCapability { .. }));
        assert_eq!(err.job_id(), Some(&JobId::derive(&unknown, 1_000)));

        assert_eq!(
            h.market.submit(&h.owner, terms(100), Amount::new(99)),
            Err(MarketError::RewardNotEnough {
                job_id: JobId::derive(&terms(100), 1_000),
                max_reward: Amount::new(100),
                deposited: Amount::new(99),
            })
        );
        assert!(h.market.open_jobs().is_empty());
        assert!(h.events.is_empty());
    }

    #[test]
    fn identical_submission_in_same_tick_is_duplicate() {
        let h = harness();
        let id = h.market.submit(&h.owner, terms(100), Amount::new(100)).unwrap();
        assert_eq!(
            h.market.submit(&h.owner, terms(100), Amount::new(100)),
            Err(MarketError::DuplicateJob { job_id: id })
        );
        h.clock.advance(1);
        assert!(h.market.submit(&h.owner, terms(100), Amount::new(100)).is_ok());
        assert_eq!(h.market.open_jobs().len(), 2);
    }

    #[test]
    fn owner_surplus_is_retained_by_default() {
        let h = harness();
        h.market.submit(&h.owner, terms(100), Amount::new(150)).unwrap();
        let custody = h.market.custody();
        assert_eq!(custody.held, Amount::new(150));
        assert_eq!(custody.retained_surplus, Amount::new(50));
        assert_eq!(h.market.balance(&h.owner), Amount::ZERO);
    }

    #[test]
    fn owner_surplus_refunded_under_refund_policy() {
        let h = harness_with(
            MarketConfig::default().with_surplus_policy(SurplusPolicy::Refund),
            Arc::new(AcceptAll),
        );
        h.market.submit(&h.owner, terms(100), Amount::new(150)).unwrap();
        assert_eq!(h.market.custody().held, Amount::new(100));
        assert_eq!(h.market.balance(&h.owner), Amount::new(50));
    }

    #[test]
    fn full_lifecycle_through_execution() {
        let h = harness();
        let alice = principal();
        let bob = principal();
        let id = h.market.submit(&h.owner, terms(100), Amount::new(100)).unwrap();

        h.market.place_bid(&alice, &id, Amount::new(60), Amount::new(40)).unwrap();
        h.market.place_bid(&bob, &id, Amount::new(50), Amount::new(50)).unwrap();
        assert_eq!(h.market.balance(&alice), Amount::new(40));
        assert_eq!(h.market.phase(&id).unwrap(), JobPhase::Bidding);

        h.clock.set(87_400);
        let receipt = h.market.execute(&bob, &id).unwrap();
        assert_eq!(receipt.winner_payout, Amount::new(100));
        assert_eq!(h.market.balance(&bob), Amount::new(100));
        assert_eq!(h.market.balance(&h.owner), Amount::new(50));
        assert!(h.market.job(&id).is_none());
        assert_eq!(h.market.custody().held, Amount::ZERO);
        assert_eq!(h.capability.invocations().len(), 1);

        let types: Vec<_> = h.events.events().iter().map(MarketEvent::event_type).collect();
        assert_eq!(types, ["job_created", "bid_placed", "bid_placed", "job_executed"]);
    }

    #[test]
    fn cancel_after_timeout() {
        let h = harness();
        let alice = principal();
        let id = h.market.submit(&h.owner, terms(100), Amount::new(100)).unwrap();
        h.market.place_bid(&alice, &id, Amount::new(60), Amount::new(40)).unwrap();

        h.clock.set(90_999);
        assert_eq!(h.market.phase(&id).unwrap(), JobPhase::AwaitingExecution);
        assert!(matches!(
            h.market.cancel_job(&h.owner, &id),
            Err(MarketError::JobTimeoutNotOver { .. })
        ));

        h.clock.set(91_000);
        assert_eq!(h.market.phase(&id).unwrap(), JobPhase::Cancellable);
        let receipt = h.market.cancel_job(&h.owner, &id).unwrap();
        assert_eq!(receipt.forfeited, Amount::new(40));
        assert_eq!(h.market.balance(&h.owner), Amount::new(40));
        assert!(matches!(
            h.market.execute(&alice, &id),
            Err(MarketError::JobDoesNotExist { .. })
        ));
        assert!(matches!(h.market.phase(&id), Err(MarketError::JobDoesNotExist { .. })));
    }

    #[test]
    fn return_escrow_policy_on_cancel() {
        let h = harness_with(
            MarketConfig::default().with_cancellation_policy(CancellationPolicy::ReturnEscrow),
            Arc::new(AcceptAll),
        );
        let id = h.market.submit(&h.owner, terms(100), Amount::new(100)).unwrap();
        h.clock.set(91_000);
        let receipt = h.market.cancel_job(&h.owner, &id).unwrap();
        assert_eq!(receipt.escrow_returned, Amount::new(100));
        assert_eq!(h.market.custody().held, Amount::ZERO);
    }

    #[test]
    fn refused_refund_rejects_bid() {
        let alice = principal();
        let h = harness_with(
            MarketConfig::default(),
            Arc::new(RejectRecipients::new([alice.clone()])),
        );
        let id = h.market.submit(&h.owner, terms(100), Amount::new(100)).unwrap();
        h.market.place_bid(&alice, &id, Amount::new(60), Amount::new(40)).unwrap();

        let err = h.market.place_bid(&principal(), &id, Amount::new(50), Amount::new(50)).unwrap_err();
        assert!(matches!(err, MarketError::TransferRejected { .. }));
        assert_eq!(h.market.job(&id).unwrap().lowest_bidder, Some(alice));
        assert_eq!(h.market.custody().held, Amount::new(140));
    }

    #[test]
    fn market_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KeeperMarket>();
    }
}
