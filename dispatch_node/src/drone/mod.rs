//! Drone fleet and assignment scoring

mod fleet;
mod selector;

pub use fleet::{ActiveAssignment, DroneFleet, DroneView, FleetSnapshot, HiveAnalytics};
pub use selector::{haversine_km, select_drone};

use ethereum_types::Address;
use serde::{Deserialize, Serialize};

use crate::types::address_hex;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        GeoPoint { lat, lng }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weather {
    #[default]
    Clear,
    Cloudy,
    Windy,
    Rain,
    Storm,
}

impl Weather {
    /// Fraction of cruise speed achievable; also used as the weather score.
    pub fn speed_factor(self) -> f64 {
        match self {
            Weather::Clear => 1.0,
            Weather::Cloudy => 0.95,
            Weather::Windy => 0.8,
            Weather::Rain => 0.7,
            Weather::Storm => 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DroneStatus {
    Available,
    Maintenance,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Drone {
    pub id: String,
    pub model: String,
    #[serde(with = "address_hex")]
    pub wallet: Address,
    pub home: GeoPoint,
    pub battery_percent: f64,
    pub payload_capacity_kg: f64,
    pub cruise_speed_kmh: f64,
    pub status: DroneStatus,
}

/// What the selector needs to know about a delivery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeliveryRequest {
    pub pickup: GeoPoint,
    pub delivery: GeoPoint,
    pub weight_kg: f64,
    pub weather: Weather,
}

impl DeliveryRequest {
    pub const DEFAULT_PICKUP: GeoPoint = GeoPoint::new(15.2993, 74.1240);
    pub const DEFAULT_DELIVERY: GeoPoint = GeoPoint::new(28.4089, 77.3178);
    pub const DEFAULT_WEIGHT_KG: f64 = 2.5;

    /// Fills missing fields with the default route; non-positive or
    /// non-finite weights fall back to the default weight.
    pub fn with_defaults(
        pickup: Option<GeoPoint>,
        delivery: Option<GeoPoint>,
        weight_kg: Option<f64>,
        weather: Option<Weather>,
    ) -> Self {
        DeliveryRequest {
            pickup: pickup.unwrap_or(Self::DEFAULT_PICKUP),
            delivery: delivery.unwrap_or(Self::DEFAULT_DELIVERY),
            weight_kg: weight_kg
                .filter(|w| w.is_finite() && *w > 0.0)
                .unwrap_or(Self::DEFAULT_WEIGHT_KG),
            weather: weather.unwrap_or_default(),
        }
    }
}

impl Default for DeliveryRequest {
    fn default() -> Self {
        Self::with_defaults(None, None, None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneAssignment {
    pub drone_id: String,
    #[serde(with = "address_hex")]
    pub wallet_address: Address,
    pub estimated_delivery_time_minutes: u32,
    /// Always within `[0, 1]`.
    pub score: f64,
}
