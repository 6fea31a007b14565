//! # keeper-market
//!
//! Descending-price auction and escrow market for delayed external actions.
//!
//! An owner escrows a maximum reward for a job that should run after a delay.
//! Bidders undercut each other while locking collateral; once bidding closes
//! the lowest bidder alone may execute the job and is paid from escrow. If the
//! winner does not act before the timeout, the owner cancels and keeps the
//! collateral.
//!
//! This crate provides:
//!
//! - Content-addressed job identifiers ([`JobId`])
//! - A registry of open jobs ([`JobRegistry`])
//! - A two-phase custody ledger ([`CustodyLedger`])
//! - The auction, execution, and cancellation rules, behind [`KeeperMarket`]
//! - Structured notifications ([`MarketEvent`], [`EventSink`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auction;
pub mod cancellation;
pub mod capability;
pub mod config;
pub mod error;
pub mod events;
pub mod execution;
pub mod id;
pub mod job;
pub mod ledger;
pub mod market;
pub mod registry;

pub use auction::BidReceipt;
pub use cancellation::CancellationReceipt;
pub use capability::{Capability, CapabilityFault, CapabilityRegistry, Invocation, ScriptedCapability};
pub use config::{CancellationPolicy, MarketConfig, SurplusPolicy, MIN_TIMEOUT};
pub use error::{ErrorCategory, MarketError, Result};
pub use events::{EventSink, MarketEvent, NoopEventSink, RecordingEventSink, TracingEventSink};
pub use execution::ExecutionReceipt;
pub use id::{JobId, Selector, Target, JOB_ID_CONTEXT};
pub use job::{Job, JobPhase, JobTerms};
pub use ledger::{
    AcceptAll, CustodyLedger, CustodySnapshot, Payout, PayoutReason, PreparedTransfer,
    RejectRecipients, TransferBatch, TransferPolicy,
};
pub use market::{KeeperMarket, KeeperMarketBuilder};
pub use registry::{JobRegistry, SubmitReceipt};
