//! Market notifications.
//!
//! Every successful state transition emits one [`MarketEvent`]. Deleted jobs
//! are not archived, so the event stream is the audit history. Sinks decide
//! where events go: [`TracingEventSink`] logs them, [`RecordingEventSink`]
//! keeps them in memory, [`NoopEventSink`] drops them.

use chrono::{DateTime, Utc};
use keeper_core::{Amount, Principal, Timestamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::{JobId, Selector, Target};

/// A structured, externally observable market notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    /// A job was submitted and funded.
    JobCreated {
        /// Unique event identifier.
        event_id: Uuid,
        /// Domain time of the event.
        timestamp: Timestamp,
        /// Wall-clock time the event was recorded.
        recorded_at: DateTime<Utc>,
        /// New job id.
        job_id: JobId,
        /// Submitting owner.
        owner: Principal,
        /// Capability target.
        target: Target,
        /// Method selector.
        selector: Selector,
        /// Opaque payload.
        payload: Vec<u8>,
        /// Delay before execution.
        delay: u64,
        /// Execution timeout after the delay.
        timeout: u64,
        /// Escrowed max reward.
        max_reward: Amount,
        /// Value actually deposited.
        deposited: Amount,
    },

    /// A bid became the new lowest bid.
    BidPlaced {
        /// Unique event identifier.
        event_id: Uuid,
        /// Domain time of the event.
        timestamp: Timestamp,
        /// Wall-clock time the event was recorded.
        recorded_at: DateTime<Utc>,
        /// The job.
        job_id: JobId,
        /// New lowest bidder.
        bidder: Principal,
        /// Bid amount.
        amount: Amount,
        /// Collateral now held for the bidder.
        collateral: Amount,
        /// Bidder who was displaced, if any.
        displaced: Option<Principal>,
        /// Collateral refunded to the displaced bidder.
        refunded: Amount,
    },

    /// The winning bidder executed the job and was paid.
    JobExecuted {
        /// Unique event identifier.
        event_id: Uuid,
        /// Domain time of the event.
        timestamp: Timestamp,
        /// Wall-clock time the event was recorded.
        recorded_at: DateTime<Utc>,
        /// The job.
        job_id: JobId,
        /// Invoked target.
        target: Target,
        /// Executing bidder.
        winner: Principal,
        /// Winning bid.
        amount: Amount,
        /// Collateral returned with the payout.
        collateral: Amount,
        /// Unspent reward returned to the owner.
        owner_payout: Amount,
    },

    /// The owner cancelled a timed-out job.
    JobCancelled {
        /// Unique event identifier.
        event_id: Uuid,
        /// Domain time of the cancellation.
        timestamp: Timestamp,
        /// Wall-clock time the event was recorded.
        recorded_at: DateTime<Utc>,
        /// The job.
        job_id: JobId,
        /// Collateral forfeited to the owner.
        forfeited: Amount,
        /// Escrowed reward returned to the owner (zero under the forfeit-only policy).
        escrow_returned: Amount,
    },
}

impl MarketEvent {
    /// Returns the event id.
    #[must_use]
    pub const fn event_id(&self) -> Uuid {
        match self {
            Self::JobCreated { event_id, .. }
            | Self::BidPlaced { event_id, .. }
            | Self::JobExecuted { event_id, .. }
            | Self::JobCancelled { event_id, .. } => *event_id,
        }
    }

    /// Returns the job the event concerns.
    #[must_use]
    pub const fn job_id(&self) -> &JobId {
        match self {
            Self::JobCreated { job_id, .. }
            | Self::BidPlaced { job_id, .. }
            | Self::JobExecuted { job_id, .. }
            | Self::JobCancelled { job_id, .. } => job_id,
        }
    }

    /// Returns the domain timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        match self {
            Self::JobCreated { timestamp, .. }
            | Self::BidPlaced { timestamp, .. }
            | Self::JobExecuted { timestamp, .. }
            | Self::JobCancelled { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the event type as a string.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => "job_created",
            Self::BidPlaced { .. } => "bid_placed",
            Self::JobExecuted { .. } => "job_executed",
            Self::JobCancelled { .. } => "job_cancelled",
        }
    }

    /// Serializes the event to JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Destination for market events.
pub trait EventSink: Send + Sync {
    /// Deliver an event.
    fn emit(&self, event: &MarketEvent);
}

/// Logs events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &MarketEvent) {
        match event.to_json() {
            Ok(json) => tracing::info!(
                target: "keeper_market::events",
                event_id = %event.event_id(),
                event_type = event.event_type(),
                job_id = %event.job_id(),
                timestamp = event.timestamp(),
                event_json = %json,
                "{}",
                event.event_type()
            ),
            Err(error) => tracing::warn!(
                target: "keeper_market::events",
                event_id = %event.event_id(),
                event_type = event.event_type(),
                job_id = %event.job_id(),
                timestamp = event.timestamp(),
                error = %error,
                "Failed to serialize market event"
            ),
        }
    }
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &MarketEvent) {}
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<MarketEvent>>,
}

impl RecordingEventSink {
    /// An empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All events so far.
    #[must_use]
    pub fn events(&self) -> Vec<MarketEvent> {
        self.events.lock().clone()
    }

    /// Events concerning `job_id`.
    #[must_use]
    pub fn events_for(&self, job_id: &JobId) -> Vec<MarketEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.job_id() == job_id)
            .cloned()
            .collect()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &MarketEvent) {
        self.events.lock().push(event.clone());
    }
}
