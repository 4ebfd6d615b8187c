use chrono::{DateTime, Utc};
use ethereum_types::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::amount::Amount;
use crate::contract::TxHash;
use crate::types::{option_address_hex, JobId};

/// Status exposed to clients. Never anything but these two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Confirmed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("pending"),
            JobStatus::Confirmed => f.write_str("confirmed"),
        }
    }
}

/// Internal lifecycle position of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// Drone wallet stored through manual assignment, job not yet submitted
    Registered,
    Received,
    AwaitingDelivery,
    Confirming,
    Confirmed,
    /// Confirmation attempts exhausted; stays here, no payout
    ConfirmFailed,
}

impl JobPhase {
    pub fn status(self) -> JobStatus {
        match self {
            JobPhase::Confirmed => JobStatus::Confirmed,
            _ => JobStatus::Pending,
        }
    }

    pub fn is_submitted(self) -> bool {
        self != JobPhase::Registered
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PayoutOutcome {
    NotEvaluated,
    /// The drone was paid by the contract itself
    NotNeeded,
    SkippedZero,
    /// Claimed, transfer in flight
    Pending,
    Sent {
        #[serde(rename = "txHash")]
        tx_hash: TxHash,
        amount: Amount,
    },
    Failed { error: String },
}

/// Job fields read from the contract, or their degraded stand-ins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDetails {
    pub poster: Address,
    pub recipient: Address,
    pub amount: Amount,
    pub details: String,
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    pub phase: JobPhase,
    #[serde(with = "option_address_hex")]
    pub poster: Option<Address>,
    #[serde(with = "option_address_hex")]
    pub recipient: Option<Address>,
    pub amount: Option<Amount>,
    pub details: Option<String>,
    pub degraded: bool,
    #[serde(with = "option_address_hex")]
    pub drone_wallet: Option<Address>,
    pub assigned_on_chain: bool,
    pub confirm_attempts: u32,
    pub confirm_tx: Option<TxHash>,
    pub last_error: Option<String>,
    pub payout: PayoutOutcome,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_id: JobId, phase: JobPhase) -> Self {
        let now = Utc::now();
        JobRecord {
            job_id,
            status: phase.status(),
            phase,
            poster: None,
            recipient: None,
            amount: None,
            details: None,
            degraded: false,
            drone_wallet: None,
            assigned_on_chain: false,
            confirm_attempts: 0,
            confirm_tx: None,
            last_error: None,
            payout: PayoutOutcome::NotEvaluated,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn set_phase(&mut self, phase: JobPhase) {
        self.phase = phase;
        self.status = phase.status();
        self.touch();
    }

    pub(crate) fn apply_details(&mut self, details: JobDetails) {
        self.poster = Some(details.poster);
        self.recipient = Some(details.recipient);
        self.amount = Some(details.amount);
        self.details = Some(details.details);
        self.degraded = details.degraded;
        self.touch();
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
