//! Service interactors consumed by the workflows.
//!
//! Workflows only see the [`FleetService`] and [`TripService`] traits. The
//! simulated implementations add configurable latency and deterministic
//! failure injection so the whole system can run without a backend.

use crate::config::SimulationConfig;
use crate::error::ServiceError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Base fare in cents.
const BASE_FARE_CENTS: u64 = 250;

/// Fare per kilometre in cents.
const PER_KM_CENTS: f64 = 120.0;

/// Approximate length of one degree of latitude.
const KM_PER_DEGREE: f64 = 111.32;

/// Identifier assigned to a registered vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VehicleId(pub Uuid);

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "veh-{}", self.0)
    }
}

/// Identifier of a requested trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripId(pub Uuid);

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trip-{}", self.0)
    }
}

/// A vehicle a driver registers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub make: String,
    pub model: String,
    pub plate: String,
}

impl Vehicle {
    pub fn new(
        make: impl Into<String>,
        model: impl Into<String>,
        plate: impl Into<String>,
    ) -> Self {
        Self {
            make: make.into(),
            model: model.into(),
            plate: plate.into(),
        }
    }
}

/// A point on the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Equirectangular distance, good enough at city scale.
    pub fn distance_km(&self, other: &Location) -> f64 {
        let mean_lat = ((self.latitude + other.latitude) / 2.0).to_radians();
        let dx = (other.longitude - self.longitude) * mean_lat.cos();
        let dy = other.latitude - self.latitude;
        (dx * dx + dy * dy).sqrt() * KM_PER_DEGREE
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.latitude, self.longitude)
    }
}

/// Fare quoted for a pickup and dropoff pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareEstimate {
    pub amount_cents: u64,
    pub currency: String,
    pub distance_km: f64,
}

impl FareEstimate {
    /// Prices a trip from its distance.
    pub fn for_distance(distance_km: f64) -> Self {
        Self {
            amount_cents: BASE_FARE_CENTS + (distance_km * PER_KM_CENTS).round() as u64,
            currency: "USD".to_string(),
            distance_km,
        }
    }
}

impl fmt::Display for FareEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02} {} ({:.1} km)",
            self.amount_cents / 100,
            self.amount_cents % 100,
            self.currency,
            self.distance_km
        )
    }
}

/// Driver-side backend.
#[async_trait]
pub trait FleetService: Send + Sync {
    async fn register_vehicle(&self, vehicle: &Vehicle) -> Result<VehicleId, ServiceError>;

    async fn mark_ready(&self, vehicle: &VehicleId) -> Result<(), ServiceError>;

    async fn mark_not_ready(&self, vehicle: &VehicleId) -> Result<(), ServiceError>;
}

/// Rider-side backend.
#[async_trait]
pub trait TripService: Send + Sync {
    async fn estimate(
        &self,
        pickup: Location,
        dropoff: Location,
    ) -> Result<FareEstimate, ServiceError>;

    async fn request_trip(&self, pickup: Location, dropoff: Location)
        -> Result<TripId, ServiceError>;

    async fn cancel_trip(&self, trip: &TripId) -> Result<(), ServiceError>;
}

/// Latency and failure injection shared by the simulated services.
#[derive(Debug)]
struct Simulation {
    latency: Duration,
    fail_every: u64,
    calls: AtomicU64,
}

impl Simulation {
    fn new(config: &SimulationConfig) -> Self {
        Self {
            latency: config.latency(),
            fail_every: config.fail_every,
            calls: AtomicU64::new(0),
        }
    }

    /// Waits out the latency, then fails every `fail_every`th call.
    async fn call(&self, operation: &str) -> Result<(), ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.fail_every > 0 && call % self.fail_every == 0 {
            tracing::debug!(operation, call, "Injecting simulated outage");
            return Err(ServiceError::Unavailable(format!(
                "simulated outage on call {}",
                call
            )));
        }
        tracing::trace!(operation, call, "Simulated call");
        Ok(())
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// In-memory fleet backend.
#[derive(Debug)]
pub struct SimulatedFleet {
    simulation: Simulation,
    /// Registered vehicles and whether each is ready for dispatch.
    vehicles: Mutex<HashMap<VehicleId, bool>>,
}

impl SimulatedFleet {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            simulation: Simulation::new(config),
            vehicles: Mutex::new(HashMap::new()),
        }
    }

    /// Total calls made, including failed ones.
    pub fn calls(&self) -> u64 {
        self.simulation.calls()
    }

    /// Returns `Some(ready)` for a registered vehicle.
    pub fn is_ready(&self, vehicle: &VehicleId) -> Option<bool> {
        self.vehicles.lock().get(vehicle).copied()
    }

    fn set_ready(&self, vehicle: &VehicleId, ready: bool) -> Result<(), ServiceError> {
        match self.vehicles.lock().get_mut(vehicle) {
            Some(status) => {
                *status = ready;
                Ok(())
            }
            None => Err(ServiceError::VehicleNotFound(vehicle.clone())),
        }
    }
}

#[async_trait]
impl FleetService for SimulatedFleet {
    async fn register_vehicle(&self, vehicle: &Vehicle) -> Result<VehicleId, ServiceError> {
        self.simulation.call("register_vehicle").await?;
        if vehicle.plate.trim().is_empty() {
            return Err(ServiceError::InvalidRequest(
                "vehicle plate is required".to_string(),
            ));
        }

        let id = VehicleId(Uuid::new_v4());
        self.vehicles.lock().insert(id.clone(), false);
        tracing::debug!(vehicle = %id, plate = %vehicle.plate, "Registered vehicle");
        Ok(id)
    }

    async fn mark_ready(&self, vehicle: &VehicleId) -> Result<(), ServiceError> {
        self.simulation.call("mark_ready").await?;
        self.set_ready(vehicle, true)
    }

    async fn mark_not_ready(&self, vehicle: &VehicleId) -> Result<(), ServiceError> {
        self.simulation.call("mark_not_ready").await?;
        self.set_ready(vehicle, false)
    }
}

#[derive(Debug, Clone)]
struct TripRecord {
    pickup: Location,
    dropoff: Location,
    cancelled: bool,
}

/// In-memory trip backend.
#[derive(Debug)]
pub struct SimulatedTrips {
    simulation: Simulation,
    trips: Mutex<HashMap<TripId, TripRecord>>,
}

impl SimulatedTrips {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            simulation: Simulation::new(config),
            trips: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self) -> u64 {
        self.simulation.calls()
    }

    /// Returns `Some(cancelled)` for a known trip.
    pub fn is_cancelled(&self, trip: &TripId) -> Option<bool> {
        self.trips.lock().get(trip).map(|record| record.cancelled)
    }

    /// Returns the pickup and dropoff of a known trip.
    pub fn route(&self, trip: &TripId) -> Option<(Location, Location)> {
        self.trips
            .lock()
            .get(trip)
            .map(|record| (record.pickup, record.dropoff))
    }
}

fn validate_route(pickup: &Location, dropoff: &Location) -> Result<(), ServiceError> {
    if pickup == dropoff {
        return Err(ServiceError::InvalidRequest(
            "pickup and dropoff are the same".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl TripService for SimulatedTrips {
    async fn estimate(
        &self,
        pickup: Location,
        dropoff: Location,
    ) -> Result<FareEstimate, ServiceError> {
        self.simulation.call("estimate").await?;
        validate_route(&pickup, &dropoff)?;
        Ok(FareEstimate::for_distance(pickup.distance_km(&dropoff)))
    }

    async fn request_trip(
        &self,
        pickup: Location,
        dropoff: Location,
    ) -> Result<TripId, ServiceError> {
        self.simulation.call("request_trip").await?;
        validate_route(&pickup, &dropoff)?;

        let id = TripId(Uuid::new_v4());
        self.trips.lock().insert(
            id.clone(),
            TripRecord {
                pickup,
                dropoff,
                cancelled: false,
            },
        );
        tracing::debug!(trip = %id, %pickup, %dropoff, "Trip requested");
        Ok(id)
    }

    async fn cancel_trip(&self, trip: &TripId) -> Result<(), ServiceError> {
        self.simulation.call("cancel_trip").await?;
        match self.trips.lock().get_mut(trip) {
            Some(record) => {
                record.cancelled = true;
                Ok(())
            }
            None => Err(ServiceError::TripNotFound(trip.clone())),
        }
    }
}
