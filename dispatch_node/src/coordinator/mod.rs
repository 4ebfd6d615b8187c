//! Job coordinator
//!
//! Owns the job table and drives each submitted job through
//! assign → await delivery → confirm → reconcile. Every job runs in its own
//! spawned task; the store's check-and-set operations keep one confirmation
//! per job in flight.

mod job;
mod reconcile;
mod store;

pub use job::{JobDetails, JobPhase, JobRecord, JobStatus, PayoutOutcome};
pub use reconcile::{
    needs_manual_payout, plan_payout, resolve_amount, AmountSource, PayoutDecision, ReconcileInput,
};
pub use store::{InMemoryJobStore, JobStore, Registration};

use ethereum_types::Address;
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::amount::Amount;
use crate::contract::{ContractCapabilities, ContractError, EscrowContract, TxHash};
use crate::drone::{DeliveryRequest, DroneAssignment, DroneFleet};
use crate::error::{DispatchError, Result};
use crate::types::{format_address, JobId};

/// Recipient recorded when the contract cannot be read.
pub const DEFAULT_RECIPIENT: [u8; 20] = [
    0xa5, 0x00, 0x50, 0xdb, 0xdb, 0xe6, 0x72, 0xa5, 0xf0, 0x26, 0x1e, 0x40, 0x39, 0x09, 0xbc, 0xb8,
    0x59, 0x0b, 0x91, 0x30,
];

/// 0.1 ether
pub const DEFAULT_JOB_AMOUNT_WEI: u64 = 100_000_000_000_000_000;

pub const DEFAULT_DELIVERY_DELAY: Duration = Duration::from_secs(10);

/// How long a manual assignment waits for its job to be submitted.
pub const DEFAULT_PLACEHOLDER_TTL: Duration = Duration::from_secs(15 * 60);

/// What moves a job out of `AwaitingDelivery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryTrigger {
    /// Fires after the delay; `mark_delivered` may fire it earlier
    Timer(Duration),
    /// Only `mark_delivered`
    Manual,
}

/// Stand-in job fields for degraded submissions and unresolvable amounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackJob {
    pub recipient: Address,
    pub amount: Amount,
    pub details: String,
}

impl Default for FallbackJob {
    fn default() -> Self {
        FallbackJob {
            recipient: Address::from(DEFAULT_RECIPIENT),
            amount: Amount::from(DEFAULT_JOB_AMOUNT_WEI),
            details: "details unavailable".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub trigger: DeliveryTrigger,
    /// Extra `confirmDelivery` attempts after the first failure
    pub confirm_retries: u32,
    pub retry_backoff: Duration,
    /// Lifetime of a `Registered` placeholder and its fleet entry
    pub placeholder_ttl: Duration,
    pub fallback: FallbackJob,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        CoordinatorSettings {
            trigger: DeliveryTrigger::Timer(DEFAULT_DELIVERY_DELAY),
            confirm_retries: 0,
            retry_backoff: Duration::from_secs(2),
            placeholder_ttl: DEFAULT_PLACEHOLDER_TTL,
            fallback: FallbackJob::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    pub status: &'static str,
    pub job_id: JobId,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAssignment {
    pub assignment: DroneAssignment,
    pub drone_wallet_stored: bool,
    pub contract_supports_assign_drone: bool,
}

pub struct JobCoordinator {
    store: Arc<dyn JobStore>,
    contract: Arc<dyn EscrowContract>,
    fleet: Arc<DroneFleet>,
    settings: CoordinatorSettings,
    delivery_signals: Mutex<HashMap<JobId, oneshot::Sender<()>>>,
}

impl JobCoordinator {
    pub fn new(
        store: Arc<dyn JobStore>,
        contract: Arc<dyn EscrowContract>,
        fleet: Arc<DroneFleet>,
        settings: CoordinatorSettings,
    ) -> Self {
        JobCoordinator {
            store,
            contract,
            fleet,
            settings,
            delivery_signals: Mutex::new(HashMap::new()),
        }
    }

    pub fn fleet(&self) -> &DroneFleet {
        &self.fleet
    }

    pub fn capabilities(&self) -> ContractCapabilities {
        self.contract.capabilities()
    }

    /// Records a posted job and starts its lifecycle in the background.
    ///
    /// Returns as soon as the job details are stored. A contract read failure
    /// does not fail the call; the record is filled from the fallback and
    /// flagged `degraded`. Submitting the same job again does nothing.
    pub async fn submit_job(
        self: &Arc<Self>,
        job_id: JobId,
        amount_hint: Option<&Value>,
    ) -> Result<SubmitReceipt> {
        if let Registration::AlreadySubmitted(phase) = self.store.register_submission(&job_id).await? {
            info!("[{}] Already submitted ({:?}), ignoring", job_id, phase);
            let degraded = self.store.get(&job_id).await.map(|r| r.degraded).unwrap_or(false);
            return Ok(SubmitReceipt {
                status: "received",
                job_id,
                degraded,
            });
        }

        info!("[{}] Job received", job_id);
        let details = self.fetch_details(&job_id, amount_hint).await;
        let degraded = details.degraded;
        self.store.set_details(&job_id, details).await?;

        // Registered before spawning so an immediate mark_delivered is not lost
        let (tx, rx) = oneshot::channel();
        self.delivery_signals.lock().insert(job_id.clone(), tx);

        let coordinator = Arc::clone(self);
        let task_id = job_id.clone();
        tokio::spawn(async move { coordinator.run_lifecycle(task_id, rx).await });

        Ok(SubmitReceipt {
            status: "received",
            job_id,
            degraded,
        })
    }

    /// Unknown jobs read as `pending`.
    pub async fn get_status(&self, job_id: &JobId) -> JobStatus {
        self.store
            .get(job_id)
            .await
            .map(|record| record.phase.status())
            .unwrap_or(JobStatus::Pending)
    }

    pub async fn get_job(&self, job_id: &JobId) -> Option<JobRecord> {
        self.store.get(job_id).await
    }

    /// Signals that the delivery happened. Returns false when the job is not
    /// waiting for one.
    pub fn mark_delivered(&self, job_id: &JobId) -> bool {
        match self.delivery_signals.lock().remove(job_id) {
            Some(signal) => {
                let released = signal.send(()).is_ok();
                if released {
                    info!("[{}] Delivery reported", job_id);
                }
                released
            }
            None => false,
        }
    }

    /// Selects a drone for a job on request and stores its wallet.
    ///
    /// The job does not need to be submitted yet; its lifecycle picks the
    /// stored wallet up later, and the placeholder expires after
    /// `placeholder_ttl` if it never is. An already stored wallet is kept and
    /// reported back instead of a new selection.
    pub async fn assign_drone_manual(
        self: &Arc<Self>,
        job_id: &JobId,
        request: &DeliveryRequest,
    ) -> Result<ManualAssignment> {
        let mut existing = self.stored_wallet(job_id).await;
        if existing.is_none() {
            let assignment = self.fleet.select(job_id, request)?;
            let wallet = assignment.wallet_address;
            if self.store.set_drone_wallet(job_id, wallet).await? {
                self.fleet.record(job_id, &assignment);
                info!("[{}] Drone wallet {} stored", job_id, format_address(&wallet));
                self.expire_if_unsubmitted(job_id, wallet).await;
                return Ok(ManualAssignment {
                    assignment,
                    drone_wallet_stored: true,
                    contract_supports_assign_drone: self.capabilities().assign_drone,
                });
            }
            existing = self.stored_wallet(job_id).await;
        }

        let wallet = existing.ok_or_else(|| DispatchError::JobNotFound(job_id.to_string()))?;
        warn!(
            "[{}] Drone wallet {} already recorded, keeping it",
            job_id,
            format_address(&wallet)
        );
        let assignment = match self.fleet.assignment_of(job_id, wallet) {
            Some(assignment) => assignment,
            None => self.fleet.score_wallet(wallet, request)?,
        };
        Ok(ManualAssignment {
            assignment,
            drone_wallet_stored: false,
            contract_supports_assign_drone: self.capabilities().assign_drone,
        })
    }

    async fn stored_wallet(&self, job_id: &JobId) -> Option<Address> {
        self.store.get(job_id).await.and_then(|record| record.drone_wallet)
    }

    /// Drops a placeholder and frees its drone once the TTL passes without a
    /// submission.
    async fn expire_if_unsubmitted(self: &Arc<Self>, job_id: &JobId, wallet: Address) {
        let submitted = self
            .store
            .get(job_id)
            .await
            .map_or(true, |record| record.phase.is_submitted());
        if submitted {
            return;
        }

        let coordinator = Arc::clone(self);
        let job_id = job_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(coordinator.settings.placeholder_ttl).await;
            if coordinator.store.discard_unsubmitted(&job_id).await.is_some() {
                coordinator.fleet.release_matching(&job_id, wallet);
                info!(
                    "[{}] Not submitted within {:?}, drone assignment dropped",
                    job_id, coordinator.settings.placeholder_ttl
                );
            }
        });
    }

    async fn fetch_details(&self, job_id: &JobId, amount_hint: Option<&Value>) -> JobDetails {
        match self.contract.get_job(job_id).await {
            Ok(job) => {
                info!(
                    "[{}] Poster {}, recipient {}, amount {} ETH",
                    job_id,
                    format_address(&job.poster),
                    format_address(&job.recipient),
                    job.amount.format_ether()
                );
                JobDetails {
                    poster: job.poster,
                    recipient: job.recipient,
                    amount: job.amount,
                    details: job.details,
                    degraded: false,
                }
            }
            Err(e) => {
                warn!("[{}] Could not read job from contract, using defaults: {}", job_id, e);
                let fallback = &self.settings.fallback;
                let amount = match amount_hint.map(Amount::from_json) {
                    Some(Ok(amount)) => amount,
                    Some(Err(e)) => {
                        warn!("[{}] Ignoring amount hint: {}", job_id, e);
                        fallback.amount
                    }
                    None => fallback.amount,
                };
                JobDetails {
                    poster: self.contract.operator(),
                    recipient: fallback.recipient,
                    amount,
                    details: fallback.details.clone(),
                    degraded: true,
                }
            }
        }
    }

    async fn run_lifecycle(self: Arc<Self>, job_id: JobId, delivered: oneshot::Receiver<()>) {
        if let Err(e) = self.drive(&job_id, delivered).await {
            error!("[{}] Lifecycle aborted: {}", job_id, e);
        }
        self.delivery_signals.lock().remove(&job_id);
        self.fleet.release(&job_id);
    }

    async fn drive(&self, job_id: &JobId, delivered: oneshot::Receiver<()>) -> Result<()> {
        self.ensure_drone_assignment(job_id).await?;
        self.store.set_phase(job_id, JobPhase::AwaitingDelivery).await?;
        self.wait_for_delivery(job_id, delivered).await;
        self.run_confirmation(job_id).await
    }

    async fn ensure_drone_assignment(&self, job_id: &JobId) -> Result<()> {
        let record = self
            .store
            .get(job_id)
            .await
            .ok_or_else(|| DispatchError::JobNotFound(job_id.to_string()))?;
        if let Some(wallet) = record.drone_wallet {
            info!("[{}] Using pre-assigned drone wallet {}", job_id, format_address(&wallet));
            return Ok(());
        }

        match self.fleet.select(job_id, &DeliveryRequest::default()) {
            Ok(assignment) => {
                if self.store.set_drone_wallet(job_id, assignment.wallet_address).await? {
                    self.fleet.record(job_id, &assignment);
                } else {
                    info!("[{}] Drone wallet recorded concurrently, keeping it", job_id);
                }
            }
            Err(e) => warn!("[{}] Drone selection failed, continuing without a wallet: {}", job_id, e),
        }
        Ok(())
    }

    async fn wait_for_delivery(&self, job_id: &JobId, delivered: oneshot::Receiver<()>) {
        match self.settings.trigger {
            DeliveryTrigger::Timer(delay) => {
                info!("[{}] Confirming delivery in {:?}", job_id, delay);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    Ok(()) = delivered => info!("[{}] Released before the timer", job_id),
                }
            }
            DeliveryTrigger::Manual => {
                info!("[{}] Waiting for delivery report", job_id);
                if delivered.await.is_err() {
                    warn!("[{}] Delivery signal dropped, confirming anyway", job_id);
                }
            }
        }
    }

    async fn run_confirmation(&self, job_id: &JobId) -> Result<()> {
        if !self.store.begin_confirmation(job_id).await? {
            info!("[{}] Confirmation already handled", job_id);
            return Ok(());
        }
        let record = self
            .store
            .get(job_id)
            .await
            .ok_or_else(|| DispatchError::JobNotFound(job_id.to_string()))?;
        let wallet = record.drone_wallet;

        let assigned_on_chain = self.assign_on_chain(job_id, wallet).await;
        self.store.record_onchain_assignment(job_id, assigned_on_chain).await?;

        match self.confirm_with_retries(job_id).await {
            Ok((tx_hash, attempts)) => {
                info!("[{}] Delivery confirmed in {} (attempt {})", job_id, tx_hash, attempts);
                self.store.mark_confirmed(job_id, tx_hash, attempts).await?;
            }
            Err((attempts, e)) => {
                error!("[{}] Confirmation failed after {} attempt(s): {}", job_id, attempts, e);
                self.store.mark_confirm_failed(job_id, attempts, e.to_string()).await?;
                return Ok(());
            }
        }

        let onchain = match self.contract.get_job(job_id).await {
            Ok(job) => Some(job),
            Err(e) => {
                warn!("[{}] Re-read after confirmation failed: {}", job_id, e);
                None
            }
        };

        let decision = plan_payout(&ReconcileInput {
            local_wallet: wallet,
            assigned_on_chain,
            onchain_wallet: onchain.as_ref().and_then(|job| job.recorded_drone_wallet()),
            local_amount: record.amount,
            onchain_amount: onchain.map(|job| job.amount),
            default_amount: self.settings.fallback.amount,
        });
        self.settle(job_id, decision).await
    }

    async fn assign_on_chain(&self, job_id: &JobId, wallet: Option<Address>) -> bool {
        let Some(wallet) = wallet else {
            return false;
        };
        if !self.capabilities().assign_drone {
            info!("[{}] Contract has no assignDrone, skipping on-chain assignment", job_id);
            return false;
        }
        match self.contract.assign_drone(job_id, wallet).await {
            Ok(tx_hash) => {
                info!("[{}] Drone assigned on-chain in {}", job_id, tx_hash);
                true
            }
            Err(e) => {
                warn!("[{}] On-chain drone assignment failed: {}", job_id, e);
                false
            }
        }
    }

    async fn confirm_with_retries(
        &self,
        job_id: &JobId,
    ) -> std::result::Result<(TxHash, u32), (u32, ContractError)> {
        let max_attempts = self.settings.confirm_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.contract.confirm_delivery(job_id).await {
                Ok(tx_hash) => return Ok((tx_hash, attempt)),
                Err(e) if attempt < max_attempts => {
                    warn!(
                        "[{}] confirmDelivery attempt {}/{} failed: {}",
                        job_id, attempt, max_attempts, e
                    );
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
                Err(e) => return Err((attempt, e)),
            }
        }
    }

    async fn settle(&self, job_id: &JobId, decision: PayoutDecision) -> Result<()> {
        let outcome = match decision {
            PayoutDecision::NoLocalWallet => {
                info!("[{}] No drone wallet recorded, nothing to pay", job_id);
                PayoutOutcome::NotNeeded
            }
            PayoutDecision::PaidOnChain { wallet } => {
                info!("[{}] Drone {} paid by the contract", job_id, format_address(&wallet));
                PayoutOutcome::NotNeeded
            }
            PayoutDecision::ZeroFee { amount, source } => {
                info!(
                    "[{}] Drone fee on {} ({:?}) rounds to zero, skipping payout",
                    job_id, amount, source
                );
                PayoutOutcome::SkippedZero
            }
            PayoutDecision::Pay {
                to,
                fee,
                job_amount,
                source,
            } => {
                if !self.store.claim_payout(job_id).await? {
                    warn!("[{}] Payout already claimed", job_id);
                    return Ok(());
                }
                info!(
                    "[{}] Paying drone {} {} ETH (10% of {} ETH, {:?} amount)",
                    job_id,
                    format_address(&to),
                    fee.format_ether(),
                    job_amount.format_ether(),
                    source
                );
                match self.contract.send_payment(to, fee).await {
                    Ok(tx_hash) => {
                        info!("[{}] Drone payout sent in {}", job_id, tx_hash);
                        PayoutOutcome::Sent {
                            tx_hash,
                            amount: fee,
                        }
                    }
                    Err(e) => {
                        error!("[{}] Drone payout failed: {}", job_id, e);
                        PayoutOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            }
        };
        self.store.record_payout(job_id, outcome).await
    }
}
