//! Drone selection
//! Scores candidates by proximity, battery, payload headroom, weather and load

use rand::Rng;
use std::collections::HashMap;

use super::{DeliveryRequest, Drone, DroneAssignment, DroneStatus, GeoPoint};
use crate::error::{DispatchError, Result};

// Weight factors, summing to 1.0
const W_PROXIMITY: f64 = 0.35;
const W_BATTERY: f64 = 0.25;
const W_PAYLOAD: f64 = 0.15;
const W_WEATHER: f64 = 0.10;
const W_LOAD: f64 = 0.15;

/// Tie-breaking noise added to the weighted score.
const JITTER: f64 = 0.02;

/// Distance at which the proximity score halves.
const PROXIMITY_SCALE_KM: f64 = 25.0;

/// Loading, take-off and hand-over time added to flight time.
const HANDLING_MINUTES: f64 = 5.0;

const EARTH_RADIUS_KM: f64 = 6371.0;

pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Picks the best drone for a delivery.
///
/// `active_jobs` maps drone ids to the number of jobs they currently carry;
/// missing ids count as idle. Drones in maintenance or unable to lift the
/// payload are never chosen.
pub fn select_drone<R: Rng + ?Sized>(
    roster: &[Drone],
    active_jobs: &HashMap<String, usize>,
    request: &DeliveryRequest,
    rng: &mut R,
) -> Result<DroneAssignment> {
    let mut best: Option<(&Drone, f64)> = None;

    for drone in roster {
        if drone.status != DroneStatus::Available || drone.payload_capacity_kg < request.weight_kg {
            continue;
        }
        let load = active_jobs.get(&drone.id).copied().unwrap_or(0);
        let score = (weighted_score(drone, load, request) + rng.gen_range(0.0..JITTER)).clamp(0.0, 1.0);

        if best.map_or(true, |(_, top)| score > top) {
            best = Some((drone, score));
        }
    }

    let (drone, score) = best.ok_or_else(|| {
        DispatchError::NoDroneAvailable(format!(
            "no available drone can carry {:.2} kg",
            request.weight_kg
        ))
    })?;

    Ok(DroneAssignment {
        drone_id: drone.id.clone(),
        wallet_address: drone.wallet,
        estimated_delivery_time_minutes: estimate_minutes(drone, request),
        score,
    })
}

fn weighted_score(drone: &Drone, load: usize, request: &DeliveryRequest) -> f64 {
    let proximity = 1.0 / (1.0 + haversine_km(drone.home, request.pickup) / PROXIMITY_SCALE_KM);
    let battery = (drone.battery_percent / 100.0).clamp(0.0, 1.0);
    let payload = ((drone.payload_capacity_kg - request.weight_kg) / drone.payload_capacity_kg).clamp(0.0, 1.0);
    let weather = request.weather.speed_factor();
    let load = 1.0 / (1.0 + load as f64);

    // Leave room for the jitter so the total stays inside [0, 1]
    (1.0 - JITTER)
        * (W_PROXIMITY * proximity
            + W_BATTERY * battery
            + W_PAYLOAD * payload
            + W_WEATHER * weather
            + W_LOAD * load)
}

fn estimate_minutes(drone: &Drone, request: &DeliveryRequest) -> u32 {
    let distance = haversine_km(drone.home, request.pickup) + haversine_km(request.pickup, request.delivery);
    let speed = (drone.cruise_speed_kmh * request.weather.speed_factor()).max(1.0);
    let minutes = (distance / speed * 60.0 + HANDLING_MINUTES).ceil();
    minutes.min(u32::MAX as f64) as u32
}
