//! Service error types.

use crate::interactor::{TripId, VehicleId};
use ridestate_core::TransitionError;
use thiserror::Error;

/// Errors returned by fleet and trip services.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("vehicle not found: {0}")]
    VehicleNotFound(VehicleId),

    #[error("trip not found: {0}")]
    TripNotFound(TripId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ServiceError {
    /// Returns whether the call may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_))
    }

    /// Returns an error code suitable for log fields.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Unavailable(_) => "UNAVAILABLE",
            ServiceError::VehicleNotFound(_) => "VEHICLE_NOT_FOUND",
            ServiceError::TripNotFound(_) => "TRIP_NOT_FOUND",
            ServiceError::InvalidRequest(_) => "BAD_REQUEST",
        }
    }
}

impl From<ServiceError> for TransitionError {
    fn from(error: ServiceError) -> Self {
        TransitionError::operation(error)
    }
}
