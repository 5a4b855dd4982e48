//! # ridestate-workflows
//!
//! Ride-hailing workflows built on the ridestate engine.
//!
//! This crate provides:
//! - Driver availability (registration, online, going offline)
//! - Rider pre-trip flow (pickup and dropoff selection, fare confirmation)
//! - Trip lifecycle driven by dispatch updates
//! - Service interactor traits with simulated implementations
//! - Layered configuration (defaults, YAML file, environment)

pub mod config;
pub mod driver;
pub mod error;
pub mod interactor;
pub mod pretrip;
pub mod trip;

pub use config::{Config, ConfigError, SimulationConfig};
pub use driver::{DriverState, DriverWorkflow};
pub use error::ServiceError;
pub use interactor::{
    FareEstimate, FleetService, Location, SimulatedFleet, SimulatedTrips, TripId, TripService,
    Vehicle, VehicleId,
};
pub use pretrip::{PreTripState, PreTripWorkflow};
pub use trip::{DriverAssignment, TripPhase, TripUpdate, TripWorkflow};
