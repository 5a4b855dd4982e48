//! Rider pre-trip workflow: choose a route, confirm pickup, confirm the fare.

use crate::interactor::{FareEstimate, Location, TripId, TripService};
use ridestate_core::{
    Executor, MachineConfig, MachineError, StateMachine, StateStream, TransitionError,
    TransitionLogger,
};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum PreTripState {
    SelectingPickupDropoff {
        pickup: Option<Location>,
        dropoff: Option<Location>,
    },
    ConfirmingPickup {
        pickup: Location,
        dropoff: Location,
    },
    ConfirmingTrip {
        pickup: Location,
        dropoff: Location,
        estimate: FareEstimate,
    },
    Confirmed {
        trip: TripId,
    },
}

impl PreTripState {
    /// Nothing selected yet.
    pub fn initial() -> Self {
        PreTripState::SelectingPickupDropoff {
            pickup: None,
            dropoff: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PreTripState::SelectingPickupDropoff { .. } => "selecting pickup and dropoff",
            PreTripState::ConfirmingPickup { .. } => "confirming pickup",
            PreTripState::ConfirmingTrip { .. } => "confirming trip",
            PreTripState::Confirmed { .. } => "confirmed",
        }
    }

    /// Phase reached by `back`, if any.
    fn previous(&self) -> Option<PreTripState> {
        match self {
            PreTripState::ConfirmingPickup { pickup, dropoff } => {
                Some(PreTripState::SelectingPickupDropoff {
                    pickup: Some(*pickup),
                    dropoff: Some(*dropoff),
                })
            }
            PreTripState::ConfirmingTrip {
                pickup, dropoff, ..
            } => Some(PreTripState::ConfirmingPickup {
                pickup: *pickup,
                dropoff: *dropoff,
            }),
            _ => None,
        }
    }
}

/// Drives a [`PreTripState`] machine against a [`TripService`].
pub struct PreTripWorkflow {
    machine: StateMachine<PreTripState>,
    trips: Arc<dyn TripService>,
}

impl PreTripWorkflow {
    pub fn new<E: Executor + ?Sized>(trips: Arc<dyn TripService>, executor: &E) -> Self {
        Self::with_config(trips, MachineConfig::new("pretrip"), executor)
    }

    pub fn with_config<E: Executor + ?Sized>(
        trips: Arc<dyn TripService>,
        config: MachineConfig,
        executor: &E,
    ) -> Self {
        let machine = StateMachine::builder(PreTripState::initial())
            .with_config(config)
            .build(executor);
        Self { machine, trips }
    }

    pub fn with_logger<E: Executor + ?Sized>(
        trips: Arc<dyn TripService>,
        config: MachineConfig,
        logger: Arc<dyn TransitionLogger>,
        executor: &E,
    ) -> Self {
        let machine = StateMachine::builder(PreTripState::initial())
            .with_config(config)
            .with_logger(logger)
            .build(executor);
        Self { machine, trips }
    }

    pub fn observe(&self) -> StateStream<PreTripState> {
        self.machine.observe()
    }

    pub fn state(&self) -> Result<PreTripState, MachineError> {
        self.machine.current_state()
    }

    pub fn machine(&self) -> &StateMachine<PreTripState> {
        &self.machine
    }

    pub fn set_pickup(&self, location: Location) -> Result<(), MachineError> {
        self.machine
            .transition_as("set_pickup", move |state: &PreTripState| match state {
                PreTripState::SelectingPickupDropoff { dropoff, .. } => {
                    Ok(PreTripState::SelectingPickupDropoff {
                        pickup: Some(location),
                        dropoff: *dropoff,
                    })
                }
                other => Err(TransitionError::invalid(other.name(), "set pickup")),
            })
    }

    pub fn set_dropoff(&self, location: Location) -> Result<(), MachineError> {
        self.machine
            .transition_as("set_dropoff", move |state: &PreTripState| match state {
                PreTripState::SelectingPickupDropoff { pickup, .. } => {
                    Ok(PreTripState::SelectingPickupDropoff {
                        pickup: *pickup,
                        dropoff: Some(location),
                    })
                }
                other => Err(TransitionError::invalid(other.name(), "set dropoff")),
            })
    }

    /// Moves on once both ends of the route are chosen.
    pub fn confirm_locations(&self) -> Result<(), MachineError> {
        self.machine
            .transition_as("confirm_locations", |state: &PreTripState| match state {
                PreTripState::SelectingPickupDropoff {
                    pickup: Some(pickup),
                    dropoff: Some(dropoff),
                } => Ok(PreTripState::ConfirmingPickup {
                    pickup: *pickup,
                    dropoff: *dropoff,
                }),
                PreTripState::SelectingPickupDropoff { .. } => Err(TransitionError::invalid(
                    "missing pickup or dropoff",
                    "confirm locations",
                )),
                other => Err(TransitionError::invalid(other.name(), "confirm locations")),
            })
    }

    /// Accepts the pickup point and fetches a fare estimate.
    pub fn confirm_pickup(&self) -> Result<(), MachineError> {
        let trips = self.trips.clone();
        self.machine
            .async_transition_as("confirm_pickup", move |state: &PreTripState| {
                let PreTripState::ConfirmingPickup { pickup, dropoff } = *state else {
                    return Err(TransitionError::invalid(state.name(), "confirm pickup"));
                };
                Ok(async move {
                    let estimate = trips.estimate(pickup, dropoff).await?;
                    Ok::<_, TransitionError>(PreTripState::ConfirmingTrip {
                        pickup,
                        dropoff,
                        estimate,
                    })
                })
            })
    }

    /// Accepts the fare and requests the trip.
    pub fn request_trip(&self) -> Result<(), MachineError> {
        let trips = self.trips.clone();
        self.machine
            .async_transition_as("request_trip", move |state: &PreTripState| {
                let PreTripState::ConfirmingTrip {
                    pickup, dropoff, ..
                } = state
                else {
                    return Err(TransitionError::invalid(state.name(), "request trip"));
                };
                let (pickup, dropoff) = (*pickup, *dropoff);
                Ok(async move {
                    let trip = trips.request_trip(pickup, dropoff).await?;
                    Ok::<_, TransitionError>(PreTripState::Confirmed { trip })
                })
            })
    }

    /// Steps back from a confirming phase, keeping the chosen locations.
    pub fn back(&self) -> Result<(), MachineError> {
        self.machine
            .transition_as("back", |state: &PreTripState| {
                state
                    .previous()
                    .ok_or_else(|| TransitionError::invalid(state.name(), "go back"))
            })
    }

    pub async fn settle(&self) -> Result<(), MachineError> {
        self.machine.flush().await
    }

    pub fn dispose(&self) {
        self.machine.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::interactor::SimulatedTrips;
    use ridestate_core::{FailureKind, MemoryLogger, TokioExecutor};
    use std::time::Duration;

    fn harness(
        simulation: SimulationConfig,
    ) -> (Arc<SimulatedTrips>, Arc<MemoryLogger>, PreTripWorkflow) {
        let trips = Arc::new(SimulatedTrips::new(&simulation));
        let logger = Arc::new(MemoryLogger::new());
        let workflow = PreTripWorkflow::with_logger(
            trips.clone(),
            MachineConfig::new("pretrip"),
            logger.clone(),
            &TokioExecutor::current(),
        );
        (trips, logger, workflow)
    }

    fn instant() -> SimulationConfig {
        SimulationConfig {
            latency_ms: 0,
            fail_every: 0,
        }
    }

    fn pickup() -> Location {
        Location::new(37.7749, -122.4194)
    }

    fn dropoff() -> Location {
        Location::new(37.8044, -122.2712)
    }

    async fn confirming_trip(workflow: &PreTripWorkflow) {
        workflow.set_pickup(pickup()).unwrap();
        workflow.set_dropoff(dropoff()).unwrap();
        workflow.confirm_locations().unwrap();
        workflow.confirm_pickup().unwrap();
        workflow.settle().await.unwrap();
    }

    #[tokio::test]
    async fn test_full_flow() {
        let (trips, logger, workflow) = harness(instant());
        let mut states = workflow.observe();

        confirming_trip(&workflow).await;
        workflow.request_trip().unwrap();
        workflow.settle().await.unwrap();

        let states = states.drain();
        assert_eq!(states.len(), 6);
        assert_eq!(states[0], PreTripState::initial());
        assert_eq!(
            states[3],
            PreTripState::ConfirmingPickup {
                pickup: pickup(),
                dropoff: dropoff()
            }
        );
        assert!(matches!(
            &states[4],
            PreTripState::ConfirmingTrip { estimate, .. } if estimate.amount_cents > 250
        ));

        let PreTripState::Confirmed { trip } = &states[5] else {
            panic!("expected confirmed, got {:?}", states[5]);
        };
        assert_eq!(trips.route(trip), Some((pickup(), dropoff())));
        assert!(logger.is_empty());
    }

    #[tokio::test]
    async fn test_confirm_without_dropoff_is_rejected() {
        let (_trips, logger, workflow) = harness(instant());
        workflow.set_pickup(pickup()).unwrap();
        workflow.confirm_locations().unwrap();
        workflow.settle().await.unwrap();

        assert_eq!(
            workflow.state().unwrap(),
            PreTripState::SelectingPickupDropoff {
                pickup: Some(pickup()),
                dropoff: None
            }
        );
        assert_eq!(logger.entries()[0].transition, "confirm_locations");
    }

    #[tokio::test]
    async fn test_back_keeps_locations() {
        let (_trips, _logger, workflow) = harness(instant());
        confirming_trip(&workflow).await;

        workflow.back().unwrap();
        workflow.back().unwrap();
        workflow.settle().await.unwrap();

        assert_eq!(
            workflow.state().unwrap(),
            PreTripState::SelectingPickupDropoff {
                pickup: Some(pickup()),
                dropoff: Some(dropoff())
            }
        );
    }

    #[tokio::test]
    async fn test_back_from_selecting_is_rejected() {
        let (_trips, logger, workflow) = harness(instant());
        workflow.back().unwrap();
        workflow.settle().await.unwrap();

        assert_eq!(workflow.state().unwrap(), PreTripState::initial());
        assert_eq!(logger.entries()[0].kind, FailureKind::Rejected);
    }

    #[tokio::test]
    async fn test_estimate_failure_stays_on_pickup() {
        let (_trips, logger, workflow) = harness(SimulationConfig {
            latency_ms: 0,
            fail_every: 1,
        });
        workflow.set_pickup(pickup()).unwrap();
        workflow.set_dropoff(dropoff()).unwrap();
        workflow.confirm_locations().unwrap();
        workflow.confirm_pickup().unwrap();
        workflow.settle().await.unwrap();

        assert!(matches!(
            workflow.state().unwrap(),
            PreTripState::ConfirmingPickup { .. }
        ));
        assert_eq!(logger.entries()[0].kind, FailureKind::OperationFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_waits_for_estimate() {
        let (_trips, _logger, workflow) = harness(SimulationConfig {
            latency_ms: 1_000,
            fail_every: 0,
        });
        workflow.set_pickup(pickup()).unwrap();
        workflow.set_dropoff(dropoff()).unwrap();
        workflow.confirm_locations().unwrap();
        workflow.confirm_pickup().unwrap();

        // Tapping back mid-estimate applies to the estimate's result.
        tokio::time::sleep(Duration::from_millis(10)).await;
        workflow.back().unwrap();
        workflow.settle().await.unwrap();

        assert_eq!(
            workflow.state().unwrap(),
            PreTripState::ConfirmingPickup {
                pickup: pickup(),
                dropoff: dropoff()
            }
        );
    }

    #[tokio::test]
    async fn test_locations_locked_after_confirming() {
        let (_trips, logger, workflow) = harness(instant());
        workflow.set_pickup(pickup()).unwrap();
        workflow.set_dropoff(dropoff()).unwrap();
        workflow.confirm_locations().unwrap();
        workflow.set_pickup(dropoff()).unwrap();
        workflow.settle().await.unwrap();

        assert_eq!(
            logger.entries()[0].message,
            "invalid state transition: cannot set pickup while confirming pickup"
        );
    }
}
