use chrono::{DateTime, Utc};
use ethereum_types::Address;
use log::info;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::{select_drone, DeliveryRequest, Drone, DroneAssignment, DroneStatus, GeoPoint};
use crate::error::{DispatchError, Result};
use crate::types::{address_hex, format_address, parse_address, JobId};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAssignment {
    pub job_id: JobId,
    pub drone_id: String,
    #[serde(with = "address_hex")]
    pub wallet_address: Address,
    pub estimated_delivery_time_minutes: u32,
    pub score: f64,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneView {
    #[serde(flatten)]
    pub drone: Drone,
    pub active_jobs: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSnapshot {
    pub drones: Vec<DroneView>,
    pub active_jobs: Vec<ActiveAssignment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HiveAnalytics {
    pub fleet_size: usize,
    pub available_drones: usize,
    pub active_assignments: usize,
    pub total_assignments: u64,
    pub average_score: f64,
    pub average_eta_minutes: f64,
    pub average_battery_percent: f64,
    pub assignments_by_drone: BTreeMap<String, u64>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Ledger {
    active: HashMap<JobId, ActiveAssignment>,
    total_assignments: u64,
    score_sum: f64,
    eta_sum: u64,
    by_drone: BTreeMap<String, u64>,
}

/// Fixed drone roster plus the ledger of live assignments.
///
/// Every call to [`DroneFleet::select`] runs a fresh selection; nothing is
/// cached between jobs. Only assignments handed to [`DroneFleet::record`]
/// enter the ledger, which feeds load balancing and the read-only snapshot
/// endpoints.
pub struct DroneFleet {
    roster: Vec<Drone>,
    ledger: Mutex<Ledger>,
    rng: Mutex<StdRng>,
}

impl DroneFleet {
    pub fn new(roster: Vec<Drone>) -> Self {
        Self::with_rng(roster, StdRng::from_entropy())
    }

    /// Deterministic selection jitter.
    pub fn with_seed(roster: Vec<Drone>, seed: u64) -> Self {
        Self::with_rng(roster, StdRng::seed_from_u64(seed))
    }

    fn with_rng(roster: Vec<Drone>, rng: StdRng) -> Self {
        DroneFleet {
            roster,
            ledger: Mutex::new(Ledger::default()),
            rng: Mutex::new(rng),
        }
    }

    pub fn roster(&self) -> &[Drone] {
        &self.roster
    }

    /// Runs a fresh selection for the job without touching the ledger.
    pub fn select(&self, job_id: &JobId, request: &DeliveryRequest) -> Result<DroneAssignment> {
        let load = self.load_excluding(job_id);
        let assignment = select_drone(&self.roster, &load, request, &mut *self.rng.lock())?;
        info!(
            "[{}] Selected drone {} (score {:.3}, ETA {} min)",
            job_id, assignment.drone_id, assignment.score, assignment.estimated_delivery_time_minutes
        );
        Ok(assignment)
    }

    /// Makes `assignment` the job's live drone, replacing any earlier entry.
    pub fn record(&self, job_id: &JobId, assignment: &DroneAssignment) {
        let mut ledger = self.ledger.lock();
        ledger.total_assignments += 1;
        ledger.score_sum += assignment.score;
        ledger.eta_sum += u64::from(assignment.estimated_delivery_time_minutes);
        *ledger.by_drone.entry(assignment.drone_id.clone()).or_insert(0) += 1;
        ledger.active.insert(
            job_id.clone(),
            ActiveAssignment {
                job_id: job_id.clone(),
                drone_id: assignment.drone_id.clone(),
                wallet_address: assignment.wallet_address,
                estimated_delivery_time_minutes: assignment.estimated_delivery_time_minutes,
                score: assignment.score,
                assigned_at: Utc::now(),
            },
        );
    }

    /// Live assignment of the job, if it is the drone owning `wallet`.
    pub fn assignment_of(&self, job_id: &JobId, wallet: Address) -> Option<DroneAssignment> {
        self.ledger
            .lock()
            .active
            .get(job_id)
            .filter(|active| active.wallet_address == wallet)
            .map(|active| DroneAssignment {
                drone_id: active.drone_id.clone(),
                wallet_address: active.wallet_address,
                estimated_delivery_time_minutes: active.estimated_delivery_time_minutes,
                score: active.score,
            })
    }

    /// Scores the roster drone owning `wallet` alone. Nothing is recorded.
    pub fn score_wallet(&self, wallet: Address, request: &DeliveryRequest) -> Result<DroneAssignment> {
        let drone = self
            .roster
            .iter()
            .find(|drone| drone.wallet == wallet)
            .ok_or_else(|| {
                DispatchError::NoDroneAvailable(format!("wallet {} is not in the fleet", format_address(&wallet)))
            })?;
        select_drone(
            std::slice::from_ref(drone),
            &HashMap::new(),
            request,
            &mut *self.rng.lock(),
        )
    }

    fn load_excluding(&self, job_id: &JobId) -> HashMap<String, usize> {
        let ledger = self.ledger.lock();
        let mut load: HashMap<String, usize> = HashMap::new();
        for (assigned_job, active) in &ledger.active {
            if assigned_job != job_id {
                *load.entry(active.drone_id.clone()).or_insert(0) += 1;
            }
        }
        load
    }

    /// Frees the drone once the job's lifecycle has ended.
    pub fn release(&self, job_id: &JobId) -> Option<ActiveAssignment> {
        self.ledger.lock().active.remove(job_id)
    }

    /// Frees the job's drone only while it is still the one owning `wallet`.
    pub fn release_matching(&self, job_id: &JobId, wallet: Address) -> Option<ActiveAssignment> {
        let mut ledger = self.ledger.lock();
        match ledger.active.get(job_id) {
            Some(active) if active.wallet_address == wallet => ledger.active.remove(job_id),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        let ledger = self.ledger.lock();
        let drones = self
            .roster
            .iter()
            .map(|drone| DroneView {
                drone: drone.clone(),
                active_jobs: ledger.active.values().filter(|a| a.drone_id == drone.id).count(),
            })
            .collect();
        let mut active_jobs: Vec<ActiveAssignment> = ledger.active.values().cloned().collect();
        active_jobs.sort_by(|a, b| a.assigned_at.cmp(&b.assigned_at).then_with(|| a.job_id.cmp(&b.job_id)));

        FleetSnapshot { drones, active_jobs }
    }

    pub fn analytics(&self) -> HiveAnalytics {
        let ledger = self.ledger.lock();
        let total = ledger.total_assignments;
        let average = |sum: f64| if total == 0 { 0.0 } else { sum / total as f64 };
        let battery_sum: f64 = self.roster.iter().map(|d| d.battery_percent).sum();

        HiveAnalytics {
            fleet_size: self.roster.len(),
            available_drones: self
                .roster
                .iter()
                .filter(|d| d.status == DroneStatus::Available)
                .count(),
            active_assignments: ledger.active.len(),
            total_assignments: total,
            average_score: average(ledger.score_sum),
            average_eta_minutes: average(ledger.eta_sum as f64),
            average_battery_percent: if self.roster.is_empty() {
                0.0
            } else {
                battery_sum / self.roster.len() as f64
            },
            assignments_by_drone: ledger.by_drone.clone(),
            generated_at: Utc::now(),
        }
    }

    /// Built-in fleet used when no roster is configured.
    pub fn default_roster() -> Vec<Drone> {
        const FLEET: [(&str, &str, &str, f64, f64, f64, f64, f64, DroneStatus); 6] = [
            ("DRONE-001", "Falcon X4", "0x5b38da6a701c568545dcfcb03fcb875f56beddc4", 15.3004, 74.1240, 96.0, 5.0, 72.0, DroneStatus::Available),
            ("DRONE-002", "Falcon X4", "0xab8483f64d9c6d1ecf9b849ae677dd3315835cb2", 15.4909, 73.8278, 81.0, 5.0, 72.0, DroneStatus::Available),
            ("DRONE-003", "Heron Cargo", "0x4b20993bc481177ec7e8f571cecae8a9e22c02db", 28.4595, 77.0266, 88.0, 12.0, 55.0, DroneStatus::Available),
            ("DRONE-004", "Swift Mini", "0x78731d3ca6b7e34ac0f824c42a7cc18a495cabab", 28.6139, 77.2090, 64.0, 2.0, 90.0, DroneStatus::Available),
            ("DRONE-005", "Heron Cargo", "0x617f2e2fd72fd9d5503197092ac168c91465e7f2", 15.2832, 73.9862, 100.0, 12.0, 55.0, DroneStatus::Available),
            ("DRONE-006", "Falcon X4", "0x17f6ad8ef982297579c203069c1dbffe4348c372", 28.4089, 77.3178, 23.0, 5.0, 72.0, DroneStatus::Maintenance),
        ];

        FLEET
            .iter()
            .filter_map(|&(id, model, wallet, lat, lng, battery, capacity, speed, status)| {
                Some(Drone {
                    id: id.to_string(),
                    model: model.to_string(),
                    wallet: parse_address(wallet).ok()?,
                    home: GeoPoint::new(lat, lng),
                    battery_percent: battery,
                    payload_capacity_kg: capacity,
                    cruise_speed_kmh: speed,
                    status,
                })
            })
            .collect()
    }
}

impl Default for DroneFleet {
    fn default() -> Self {
        Self::new(Self::default_roster())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roster_is_well_formed() {
        let roster = DroneFleet::default_roster();
        assert_eq!(roster.len(), 6);
        assert!(roster.iter().all(|d| !d.wallet.is_zero()));
    }

    fn assign(fleet: &DroneFleet, job: &str) -> DroneAssignment {
        let id = JobId::from(job);
        let assignment = fleet.select(&id, &DeliveryRequest::default()).unwrap();
        fleet.record(&id, &assignment);
        assignment
    }

    #[test]
    fn test_assign_release_and_analytics() {
        let fleet = DroneFleet::with_seed(DroneFleet::default_roster(), 11);

        let first = assign(&fleet, "1");
        assign(&fleet, "2");

        let snapshot = fleet.snapshot();
        assert_eq!(snapshot.active_jobs.len(), 2);
        let busy: usize = snapshot.drones.iter().map(|d| d.active_jobs).sum();
        assert_eq!(busy, 2);

        let released = fleet.release(&JobId::from("1")).unwrap();
        assert_eq!(released.drone_id, first.drone_id);
        assert!(fleet.release(&JobId::from("1")).is_none());

        let analytics = fleet.analytics();
        assert_eq!(analytics.fleet_size, 6);
        assert_eq!(analytics.available_drones, 5);
        assert_eq!(analytics.active_assignments, 1);
        assert_eq!(analytics.total_assignments, 2);
        assert!((0.0..=1.0).contains(&analytics.average_score));
        assert_eq!(analytics.assignments_by_drone.values().sum::<u64>(), 2);
    }

    #[test]
    fn test_selection_alone_leaves_ledger_untouched() {
        let fleet = DroneFleet::with_seed(DroneFleet::default_roster(), 2);
        fleet.select(&JobId::from("9"), &DeliveryRequest::default()).unwrap();
        assert!(fleet.snapshot().active_jobs.is_empty());
        assert_eq!(fleet.analytics().total_assignments, 0);
    }

    #[test]
    fn test_reassigning_a_job_replaces_its_entry() {
        let fleet = DroneFleet::with_seed(DroneFleet::default_roster(), 5);
        assign(&fleet, "77");
        let second = assign(&fleet, "77");
        assert_eq!(fleet.snapshot().active_jobs.len(), 1);
        assert_eq!(fleet.analytics().total_assignments, 2);
        assert_eq!(
            fleet.assignment_of(&JobId::from("77"), second.wallet_address),
            Some(second)
        );
    }

    #[test]
    fn test_release_matching_checks_wallet() {
        let fleet = DroneFleet::with_seed(DroneFleet::default_roster(), 8);
        let id = JobId::from("3");
        let assignment = assign(&fleet, "3");

        assert!(fleet.release_matching(&id, Address::from_low_u64_be(1)).is_none());
        assert_eq!(fleet.snapshot().active_jobs.len(), 1);
        assert!(fleet.release_matching(&id, assignment.wallet_address).is_some());
        assert!(fleet.snapshot().active_jobs.is_empty());
    }

    #[test]
    fn test_score_wallet_uses_that_drone() {
        let fleet = DroneFleet::with_seed(DroneFleet::default_roster(), 4);
        let drone = fleet.roster()[0].clone();

        let assignment = fleet.score_wallet(drone.wallet, &DeliveryRequest::default()).unwrap();
        assert_eq!(assignment.drone_id, drone.id);
        assert!(fleet.snapshot().active_jobs.is_empty());
        assert!(fleet.score_wallet(Address::from_low_u64_be(1), &DeliveryRequest::default()).is_err());
    }

    #[test]
    fn test_empty_fleet_analytics() {
        let fleet = DroneFleet::with_seed(Vec::new(), 0);
        let analytics = fleet.analytics();
        assert_eq!(analytics.fleet_size, 0);
        assert_eq!(analytics.average_score, 0.0);
        assert!(fleet.select(&JobId::from("1"), &DeliveryRequest::default()).is_err());
    }
}
