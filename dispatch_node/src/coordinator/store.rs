use async_trait::async_trait;
use ethereum_types::Address;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::job::{JobDetails, JobPhase, JobRecord, PayoutOutcome};
use crate::contract::TxHash;
use crate::error::{DispatchError, Result};
use crate::types::JobId;

/// Outcome of registering a job submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First submission; the caller owns the job's lifecycle task
    New,
    AlreadySubmitted(JobPhase),
}

/// Job table behind the coordinator.
///
/// Every method is a single atomic step on one record. Implementations must
/// keep `Confirmed` terminal and let at most one caller win
/// `begin_confirmation` and `claim_payout` per job.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, job_id: &JobId) -> Option<JobRecord>;

    /// Inserts the job as `Received`, or promotes a `Registered` placeholder.
    async fn register_submission(&self, job_id: &JobId) -> Result<Registration>;

    async fn set_details(&self, job_id: &JobId, details: JobDetails) -> Result<()>;

    /// Stores the drone wallet unless one is already recorded. Unknown jobs get
    /// a `Registered` placeholder. Returns whether `wallet` was stored.
    async fn set_drone_wallet(&self, job_id: &JobId, wallet: Address) -> Result<bool>;

    /// Removes the job while it is still an unsubmitted placeholder and
    /// returns the removed record.
    async fn discard_unsubmitted(&self, job_id: &JobId) -> Option<JobRecord>;

    async fn set_phase(&self, job_id: &JobId, phase: JobPhase) -> Result<()>;

    /// Moves a submitted, unconfirmed job into `Confirming`. Returns false
    /// when another task already holds it or it has finished.
    async fn begin_confirmation(&self, job_id: &JobId) -> Result<bool>;

    async fn record_onchain_assignment(&self, job_id: &JobId, assigned: bool) -> Result<()>;

    async fn mark_confirmed(&self, job_id: &JobId, tx_hash: TxHash, attempts: u32) -> Result<()>;

    async fn mark_confirm_failed(&self, job_id: &JobId, attempts: u32, error: String) -> Result<()>;

    /// Exactly-once guard for the manual payout.
    async fn claim_payout(&self, job_id: &JobId) -> Result<bool>;

    async fn record_payout(&self, job_id: &JobId, outcome: PayoutOutcome) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<T>(&self, job_id: &JobId, f: impl FnOnce(&mut JobRecord) -> T) -> Result<T> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| DispatchError::JobNotFound(job_id.to_string()))?;
        let out = f(record);
        record.touch();
        Ok(out)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get(&self, job_id: &JobId) -> Option<JobRecord> {
        self.jobs.read().await.get(job_id).cloned()
    }

    async fn register_submission(&self, job_id: &JobId) -> Result<Registration> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(job_id) {
            Some(record) if record.phase == JobPhase::Registered => {
                record.set_phase(JobPhase::Received);
                Ok(Registration::New)
            }
            Some(record) => Ok(Registration::AlreadySubmitted(record.phase)),
            None => {
                jobs.insert(job_id.clone(), JobRecord::new(job_id.clone(), JobPhase::Received));
                Ok(Registration::New)
            }
        }
    }

    async fn set_details(&self, job_id: &JobId, details: JobDetails) -> Result<()> {
        self.update(job_id, |record| record.apply_details(details)).await
    }

    async fn set_drone_wallet(&self, job_id: &JobId, wallet: Address) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let record = jobs
            .entry(job_id.clone())
            .or_insert_with(|| JobRecord::new(job_id.clone(), JobPhase::Registered));
        if record.drone_wallet.is_some() {
            return Ok(false);
        }
        record.drone_wallet = Some(wallet);
        record.touch();
        Ok(true)
    }

    async fn discard_unsubmitted(&self, job_id: &JobId) -> Option<JobRecord> {
        let mut jobs = self.jobs.write().await;
        if jobs.get(job_id)?.phase.is_submitted() {
            return None;
        }
        jobs.remove(job_id)
    }

    async fn set_phase(&self, job_id: &JobId, phase: JobPhase) -> Result<()> {
        self.update(job_id, |record| {
            if record.phase != JobPhase::Confirmed {
                record.set_phase(phase);
            }
        })
        .await
    }

    async fn begin_confirmation(&self, job_id: &JobId) -> Result<bool> {
        self.update(job_id, |record| match record.phase {
            JobPhase::Received | JobPhase::AwaitingDelivery => {
                record.set_phase(JobPhase::Confirming);
                true
            }
            _ => false,
        })
        .await
    }

    async fn record_onchain_assignment(&self, job_id: &JobId, assigned: bool) -> Result<()> {
        self.update(job_id, |record| record.assigned_on_chain = assigned).await
    }

    async fn mark_confirmed(&self, job_id: &JobId, tx_hash: TxHash, attempts: u32) -> Result<()> {
        self.update(job_id, |record| {
            record.confirm_attempts = attempts;
            record.confirm_tx = Some(tx_hash);
            record.last_error = None;
            record.set_phase(JobPhase::Confirmed);
        })
        .await
    }

    async fn mark_confirm_failed(&self, job_id: &JobId, attempts: u32, error: String) -> Result<()> {
        self.update(job_id, |record| {
            record.confirm_attempts = attempts;
            record.last_error = Some(error);
            if record.phase != JobPhase::Confirmed {
                record.set_phase(JobPhase::ConfirmFailed);
            }
        })
        .await
    }

    async fn claim_payout(&self, job_id: &JobId) -> Result<bool> {
        self.update(job_id, |record| {
            if record.payout == PayoutOutcome::NotEvaluated {
                record.payout = PayoutOutcome::Pending;
                true
            } else {
                false
            }
        })
        .await
    }

    async fn record_payout(&self, job_id: &JobId, outcome: PayoutOutcome) -> Result<()> {
        self.update(job_id, |record| {
            if let PayoutOutcome::Failed { error } = &outcome {
                record.last_error = Some(error.clone());
            }
            record.payout = outcome;
        })
        .await
    }
}
