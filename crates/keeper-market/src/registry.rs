//! Job registry and submission.
//!
//! The registry stores only live jobs. A job leaves it exactly once, through
//! execution or cancellation, and is not archived.

use std::collections::HashMap;

use keeper_core::{Amount, Principal, Timestamp};

use crate::capability::CapabilityRegistry;
use crate::config::{MarketConfig, SurplusPolicy};
use crate::error::{MarketError, Result};
use crate::id::JobId;
use crate::job::{Job, JobTerms};
use crate::ledger::{PayoutReason, TransferBatch};
use crate::market::MarketState;

/// Open jobs keyed by id.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, Job>,
}

impl JobRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new job. Fails if its id is already open.
    pub fn insert(&mut self, job: Job) -> Result<()> {
        if self.jobs.contains_key(&job.id) {
            return Err(MarketError::DuplicateJob { job_id: job.id });
        }
        self.jobs.insert(job.id, job);
        Ok(())
    }

    /// Look up an open job.
    #[must_use]
    pub fn get(&self, job_id: &JobId) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    /// Look up an open job for mutation.
    pub fn get_mut(&mut self, job_id: &JobId) -> Option<&mut Job> {
        self.jobs.get_mut(job_id)
    }

    /// Look up an open job, failing with `JobDoesNotExist`.
    pub fn require(&self, job_id: &JobId) -> Result<&Job> {
        self.get(job_id)
            .ok_or(MarketError::JobDoesNotExist { job_id: *job_id })
    }

    /// Whether `job_id` is open.
    #[must_use]
    pub fn contains(&self, job_id: &JobId) -> bool {
        self.jobs.contains_key(job_id)
    }

    /// Delete a job.
    pub fn remove(&mut self, job_id: &JobId) -> Option<Job> {
        self.jobs.remove(job_id)
    }

    /// Number of open jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no job is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// All open jobs, oldest first, ties broken by id.
    #[must_use]
    pub fn sorted(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }
}

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// The new job.
    pub job_id: JobId,
    /// Value that entered custody.
    pub deposited: Amount,
    /// Over-deposit kept in custody.
    pub surplus_retained: Amount,
    /// Over-deposit returned to the owner.
    pub surplus_refunded: Amount,
}

impl MarketState {
    /// Validate, fund, and store a new job.
    pub(crate) fn submit(
        &mut self,
        config: &MarketConfig,
        capabilities: &CapabilityRegistry,
        caller: &Principal,
        terms: JobTerms,
        deposited: Amount,
        now: Timestamp,
    ) -> Result<(Job, SubmitReceipt)> {
        if caller != &self.owner {
            return Err(MarketError::NotOwner {
                caller: caller.clone(),
                job_id: None,
            });
        }
        let job_id = JobId::derive(&terms, now);
        if terms.timeout < config.min_timeout {
            return Err(MarketError::TimeoutTooShort {
                job_id,
                timeout: terms.timeout,
                minimum: config.min_timeout,
            });
        }
        if !capabilities.is_capability(&terms.target) {
            return Err(MarketError::TargetNotCapability {
                job_id,
                target: terms.target,
            });
        }
        let surplus = deposited
            .checked_sub(terms.max_reward)
            .ok_or(MarketError::RewardNotEnough {
                job_id,
                max_reward: terms.max_reward,
                deposited,
            })?;

        let job = Job::new(caller.clone(), terms, now);
        if self.registry.contains(&job.id) {
            return Err(MarketError::DuplicateJob { job_id: job.id });
        }

        let batch = TransferBatch::new(job.id).deposit(deposited);
        let (batch, surplus_retained, surplus_refunded) = match config.surplus_policy {
            SurplusPolicy::Retain => (batch.retain(surplus), surplus, Amount::ZERO),
            SurplusPolicy::Refund => (
                batch.pay(caller.clone(), surplus, PayoutReason::SurplusRefund),
                Amount::ZERO,
                surplus,
            ),
        };
        let prepared = self.ledger.prepare(batch)?;

        self.ledger.commit(prepared);
        self.registry.insert(job.clone())?;

        let receipt = SubmitReceipt {
            job_id: job.id,
            deposited,
            surplus_retained,
            surplus_refunded,
        };
        Ok((job, receipt))
    }
}
