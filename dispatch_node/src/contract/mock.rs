use async_trait::async_trait;
use ethereum_types::Address;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{ContractCapabilities, ContractError, EscrowContract, OnChainJob, TxHash};
use crate::amount::Amount;
use crate::types::JobId;

/// Contract operations that can be observed or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractOp {
    GetJob,
    ConfirmDelivery,
    AssignDrone,
    SendPayment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Always,
    /// Fail the next `n` calls, then succeed.
    Times(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub to: Address,
    pub amount: Amount,
    pub tx_hash: TxHash,
}

#[derive(Default)]
struct MockState {
    jobs: HashMap<JobId, OnChainJob>,
    failures: HashMap<ContractOp, FailureMode>,
    calls: HashMap<ContractOp, u32>,
    confirmed: Vec<JobId>,
    assignments: Vec<(JobId, Address)>,
    payments: Vec<Payment>,
    tx_counter: u64,
}

impl MockState {
    fn enter(&mut self, op: ContractOp) -> Result<(), ContractError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get_mut(&op) {
            Some(FailureMode::Always) => Err(ContractError::Injected(format!("{:?}", op))),
            Some(FailureMode::Times(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(ContractError::Injected(format!("{:?}", op)))
            }
            _ => Ok(()),
        }
    }

    fn next_tx_hash(&mut self) -> TxHash {
        self.tx_counter += 1;
        format!("0x{:064x}", self.tx_counter)
    }
}

/// In-memory escrow contract.
///
/// All state lives in the process; every call is recorded so tests can assert
/// on what the coordinator did. Unknown jobs are rejected unless
/// `with_auto_jobs` is set, which fabricates a funded job on first read.
pub struct MockEscrowClient {
    operator: Address,
    capabilities: ContractCapabilities,
    auto_job_amount: Option<Amount>,
    records_assignment: bool,
    state: Mutex<MockState>,
}

impl MockEscrowClient {
    pub fn new(operator: Address, capabilities: ContractCapabilities) -> Self {
        MockEscrowClient {
            operator,
            capabilities,
            auto_job_amount: None,
            records_assignment: true,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Unknown job ids read as funded jobs escrowing `amount`.
    pub fn with_auto_jobs(mut self, amount: Amount) -> Self {
        self.auto_job_amount = Some(amount);
        self
    }

    /// When false, `assignDrone` succeeds but leaves the stored wallet at zero.
    pub fn with_assignment_recording(mut self, records: bool) -> Self {
        self.records_assignment = records;
        self
    }

    pub fn insert_job(&self, job_id: impl Into<JobId>, job: OnChainJob) {
        self.state.lock().jobs.insert(job_id.into(), job);
    }

    pub fn fail(&self, op: ContractOp, mode: FailureMode) {
        self.state.lock().failures.insert(op, mode);
    }

    pub fn call_count(&self, op: ContractOp) -> u32 {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn confirmed_jobs(&self) -> Vec<JobId> {
        self.state.lock().confirmed.clone()
    }

    pub fn assignments(&self) -> Vec<(JobId, Address)> {
        self.state.lock().assignments.clone()
    }

    pub fn payments(&self) -> Vec<Payment> {
        self.state.lock().payments.clone()
    }

    fn auto_job(&self, amount: Amount) -> OnChainJob {
        OnChainJob {
            poster: self.operator,
            recipient: Address::zero(),
            drone_wallet: Address::zero(),
            details: "mock delivery".to_string(),
            amount,
            funded: true,
            completed: false,
        }
    }

    fn job_entry<'a>(
        &self,
        state: &'a mut MockState,
        job_id: &JobId,
    ) -> Result<&'a mut OnChainJob, ContractError> {
        if !state.jobs.contains_key(job_id) {
            let amount = self
                .auto_job_amount
                .ok_or_else(|| ContractError::UnknownJob(job_id.to_string()))?;
            state.jobs.insert(job_id.clone(), self.auto_job(amount));
        }
        state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ContractError::UnknownJob(job_id.to_string()))
    }
}

#[async_trait]
impl EscrowContract for MockEscrowClient {
    async fn get_job(&self, job_id: &JobId) -> Result<OnChainJob, ContractError> {
        let mut state = self.state.lock();
        state.enter(ContractOp::GetJob)?;
        let job = self.job_entry(&mut state, job_id)?.clone();
        Ok(job)
    }

    async fn confirm_delivery(&self, job_id: &JobId) -> Result<TxHash, ContractError> {
        let mut state = self.state.lock();
        state.enter(ContractOp::ConfirmDelivery)?;
        let job = self.job_entry(&mut state, job_id)?;
        if job.completed {
            return Err(ContractError::Reverted(format!("job {} already completed", job_id)));
        }
        job.completed = true;
        state.confirmed.push(job_id.clone());
        let tx_hash = state.next_tx_hash();
        debug!("[mock] confirmDelivery({}) -> {}", job_id, tx_hash);
        Ok(tx_hash)
    }

    async fn assign_drone(&self, job_id: &JobId, wallet: Address) -> Result<TxHash, ContractError> {
        if !self.capabilities.assign_drone {
            return Err(ContractError::Unsupported("assignDrone"));
        }
        let mut state = self.state.lock();
        state.enter(ContractOp::AssignDrone)?;
        let records = self.records_assignment;
        let job = self.job_entry(&mut state, job_id)?;
        if records {
            job.drone_wallet = wallet;
        }
        state.assignments.push((job_id.clone(), wallet));
        Ok(state.next_tx_hash())
    }

    async fn send_payment(&self, to: Address, amount: Amount) -> Result<TxHash, ContractError> {
        let mut state = self.state.lock();
        state.enter(ContractOp::SendPayment)?;
        let tx_hash = state.next_tx_hash();
        state.payments.push(Payment {
            to,
            amount,
            tx_hash: tx_hash.clone(),
        });
        Ok(tx_hash)
    }

    fn capabilities(&self) -> ContractCapabilities {
        self.capabilities
    }

    fn operator(&self) -> Address {
        self.operator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> MockEscrowClient {
        MockEscrowClient::new(
            Address::from_low_u64_be(1),
            ContractCapabilities { assign_drone: true },
        )
    }

    #[tokio::test]
    async fn test_unknown_job_is_rejected_without_auto_jobs() {
        let mock = client();
        let err = mock.get_job(&JobId::from("9")).await.unwrap_err();
        assert!(matches!(err, ContractError::UnknownJob(_)));

        let auto = client().with_auto_jobs(Amount::from(500));
        let job = auto.get_job(&JobId::from("9")).await.unwrap();
        assert_eq!(job.amount, Amount::from(500));
        assert!(job.funded);
    }

    #[tokio::test]
    async fn test_failure_injection_counts_down() {
        let mock = client().with_auto_jobs(Amount::from(1));
        mock.fail(ContractOp::ConfirmDelivery, FailureMode::Times(2));
        let id = JobId::from("1");

        assert!(mock.confirm_delivery(&id).await.is_err());
        assert!(mock.confirm_delivery(&id).await.is_err());
        assert!(mock.confirm_delivery(&id).await.is_ok());
        assert_eq!(mock.call_count(ContractOp::ConfirmDelivery), 3);
        assert_eq!(mock.confirmed_jobs(), vec![id]);
    }

    #[tokio::test]
    async fn test_confirm_twice_reverts() {
        let mock = client().with_auto_jobs(Amount::from(1));
        let id = JobId::from("3");
        mock.confirm_delivery(&id).await.unwrap();
        assert!(matches!(mock.confirm_delivery(&id).await, Err(ContractError::Reverted(_))));
    }

    #[tokio::test]
    async fn test_assignment_recording_toggle() {
        let wallet = Address::from_low_u64_be(0xd0);
        let id = JobId::from("5");

        let recording = client().with_auto_jobs(Amount::from(1));
        recording.assign_drone(&id, wallet).await.unwrap();
        assert_eq!(recording.get_job(&id).await.unwrap().recorded_drone_wallet(), Some(wallet));

        let silent = client().with_auto_jobs(Amount::from(1)).with_assignment_recording(false);
        silent.assign_drone(&id, wallet).await.unwrap();
        assert_eq!(silent.get_job(&id).await.unwrap().recorded_drone_wallet(), None);
        assert_eq!(silent.assignments(), vec![(id, wallet)]);
    }

    #[tokio::test]
    async fn test_assign_drone_unsupported() {
        let mock = MockEscrowClient::new(Address::zero(), ContractCapabilities::default())
            .with_auto_jobs(Amount::from(1));
        let err = mock.assign_drone(&JobId::from("1"), Address::zero()).await.unwrap_err();
        assert!(matches!(err, ContractError::Unsupported("assignDrone")));
    }
}
