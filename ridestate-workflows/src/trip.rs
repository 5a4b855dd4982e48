//! Trip lifecycle after a trip has been requested.

use crate::interactor::{TripId, TripService};
use ridestate_core::{
    Executor, MachineConfig, MachineError, StateMachine, StateStream, TransitionError,
    TransitionLogger,
};
use std::sync::Arc;

/// Driver dispatched to a trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverAssignment {
    pub driver_name: String,
    pub plate: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripPhase {
    WaitingForDriver,
    DriverEnRoute { driver: DriverAssignment },
    DriverArrived { driver: DriverAssignment },
    InProgress { driver: DriverAssignment },
    Completed,
    Cancelled { reason: String },
}

/// Dispatch event pushed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripUpdate {
    DriverAssigned(DriverAssignment),
    DriverArrived,
    Started,
    Completed,
}

impl TripUpdate {
    fn action(&self) -> &'static str {
        match self {
            TripUpdate::DriverAssigned(_) => "assign driver",
            TripUpdate::DriverArrived => "mark driver arrived",
            TripUpdate::Started => "start trip",
            TripUpdate::Completed => "complete trip",
        }
    }
}

impl TripPhase {
    pub fn name(&self) -> &'static str {
        match self {
            TripPhase::WaitingForDriver => "waiting for driver",
            TripPhase::DriverEnRoute { .. } => "driver en route",
            TripPhase::DriverArrived { .. } => "driver arrived",
            TripPhase::InProgress { .. } => "in progress",
            TripPhase::Completed => "completed",
            TripPhase::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TripPhase::Completed | TripPhase::Cancelled { .. })
    }

    /// Riders may cancel until the trip starts.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            TripPhase::WaitingForDriver
                | TripPhase::DriverEnRoute { .. }
                | TripPhase::DriverArrived { .. }
        )
    }

    /// Applies a dispatch update.
    ///
    /// A reassignment while en route replaces the driver.
    pub fn apply(&self, update: TripUpdate) -> Result<TripPhase, TransitionError> {
        let rejected = || TransitionError::invalid(self.name(), update.action());
        match (self, &update) {
            (
                TripPhase::WaitingForDriver | TripPhase::DriverEnRoute { .. },
                TripUpdate::DriverAssigned(driver),
            ) => Ok(TripPhase::DriverEnRoute {
                driver: driver.clone(),
            }),
            (TripPhase::DriverEnRoute { driver }, TripUpdate::DriverArrived) => {
                Ok(TripPhase::DriverArrived {
                    driver: driver.clone(),
                })
            }
            (TripPhase::DriverArrived { driver }, TripUpdate::Started) => {
                Ok(TripPhase::InProgress {
                    driver: driver.clone(),
                })
            }
            (TripPhase::InProgress { .. }, TripUpdate::Completed) => Ok(TripPhase::Completed),
            _ => Err(rejected()),
        }
    }
}

/// Drives a [`TripPhase`] machine for one trip.
pub struct TripWorkflow {
    trip: TripId,
    machine: StateMachine<TripPhase>,
    trips: Arc<dyn TripService>,
}

impl TripWorkflow {
    pub fn new<E: Executor + ?Sized>(
        trip: TripId,
        trips: Arc<dyn TripService>,
        executor: &E,
    ) -> Self {
        Self::with_config(trip, trips, MachineConfig::new("trip"), executor)
    }

    pub fn with_config<E: Executor + ?Sized>(
        trip: TripId,
        trips: Arc<dyn TripService>,
        config: MachineConfig,
        executor: &E,
    ) -> Self {
        let machine = StateMachine::builder(TripPhase::WaitingForDriver)
            .with_config(config)
            .build(executor);
        Self {
            trip,
            machine,
            trips,
        }
    }

    pub fn with_logger<E: Executor + ?Sized>(
        trip: TripId,
        trips: Arc<dyn TripService>,
        config: MachineConfig,
        logger: Arc<dyn TransitionLogger>,
        executor: &E,
    ) -> Self {
        let machine = StateMachine::builder(TripPhase::WaitingForDriver)
            .with_config(config)
            .with_logger(logger)
            .build(executor);
        Self {
            trip,
            machine,
            trips,
        }
    }

    pub fn trip(&self) -> &TripId {
        &self.trip
    }

    pub fn observe(&self) -> StateStream<TripPhase> {
        self.machine.observe()
    }

    pub fn state(&self) -> Result<TripPhase, MachineError> {
        self.machine.current_state()
    }

    pub fn machine(&self) -> &StateMachine<TripPhase> {
        &self.machine
    }

    pub fn apply_update(&self, update: TripUpdate) -> Result<(), MachineError> {
        self.machine
            .transition_as("apply_update", move |phase: &TripPhase| phase.apply(update))
    }

    /// Cancels the trip with the backend.
    pub fn cancel(&self, reason: impl Into<String>) -> Result<(), MachineError> {
        let trips = self.trips.clone();
        let trip = self.trip.clone();
        let reason = reason.into();
        self.machine
            .async_transition_as("cancel", move |phase: &TripPhase| {
                if !phase.is_cancellable() {
                    return Err(TransitionError::invalid(phase.name(), "cancel"));
                }
                Ok(async move {
                    trips.cancel_trip(&trip).await?;
                    tracing::info!(trip = %trip, %reason, "Trip cancelled");
                    Ok::<_, TransitionError>(TripPhase::Cancelled { reason })
                })
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
    use crate::interactor::{Location, SimulatedTrips};
    use ridestate_core::{FailureKind, MemoryLogger, TokioExecutor};
    use std::time::Duration;

    fn assignment() -> DriverAssignment {
        DriverAssignment {
            driver_name: "Sam".to_string(),
            plate: "7ABC123".to_string(),
        }
    }

    async fn harness(
        simulation: SimulationConfig,
    ) -> (Arc<SimulatedTrips>, Arc<MemoryLogger>, TripWorkflow) {
        let trips = Arc::new(SimulatedTrips::new(&simulation));
        let trip = trips
            .request_trip(Location::new(37.77, -122.42), Location::new(37.80, -122.27))
            .await
            .unwrap();
        let logger = Arc::new(MemoryLogger::new());
        let workflow = TripWorkflow::with_logger(
            trip,
            trips.clone(),
            MachineConfig::new("trip"),
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

    #[test]
    fn test_phase_table() {
        let en_route = TripPhase::WaitingForDriver
            .apply(TripUpdate::DriverAssigned(assignment()))
            .unwrap();
        let arrived = en_route.apply(TripUpdate::DriverArrived).unwrap();
        let riding = arrived.apply(TripUpdate::Started).unwrap();
        let done = riding.apply(TripUpdate::Completed).unwrap();

        assert_eq!(arrived, TripPhase::DriverArrived { driver: assignment() });
        assert_eq!(done, TripPhase::Completed);
        assert!(done.is_finished());

        let err = TripPhase::WaitingForDriver
            .apply(TripUpdate::Started)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid state transition: cannot start trip while waiting for driver"
        );
        assert!(TripPhase::Completed
            .apply(TripUpdate::DriverAssigned(assignment()))
            .is_err());
    }

    #[test]
    fn test_reassignment_while_en_route() {
        let other = DriverAssignment {
            driver_name: "Alex".to_string(),
            plate: "8XYZ987".to_string(),
        };
        let phase = TripPhase::DriverEnRoute {
            driver: assignment(),
        };
        assert_eq!(
            phase.apply(TripUpdate::DriverAssigned(other.clone())).unwrap(),
            TripPhase::DriverEnRoute { driver: other }
        );
    }

    #[tokio::test]
    async fn test_new_uses_default_machine() {
        let trips = Arc::new(SimulatedTrips::new(&instant()));
        let trip = trips
            .request_trip(Location::new(37.77, -122.42), Location::new(37.80, -122.27))
            .await
            .unwrap();
        let workflow = TripWorkflow::new(trip.clone(), trips, &TokioExecutor::current());

        assert_eq!(workflow.trip(), &trip);
        assert_eq!(workflow.machine().name(), "trip");
        assert_eq!(workflow.state().unwrap(), TripPhase::WaitingForDriver);
    }

    #[tokio::test]
    async fn test_updates_broadcast_in_order() {
        let (_trips, logger, workflow) = harness(instant()).await;
        let mut phases = workflow.observe();

        workflow
            .apply_update(TripUpdate::DriverAssigned(assignment()))
            .unwrap();
        workflow.apply_update(TripUpdate::DriverArrived).unwrap();
        workflow.apply_update(TripUpdate::Started).unwrap();
        workflow.apply_update(TripUpdate::Completed).unwrap();
        workflow.settle().await.unwrap();

        let names: Vec<_> = phases.drain().iter().map(TripPhase::name).collect();
        assert_eq!(
            names,
            vec![
                "waiting for driver",
                "driver en route",
                "driver arrived",
                "in progress",
                "completed"
            ]
        );
        assert!(logger.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let (trips, _logger, workflow) = harness(instant()).await;
        workflow.cancel("changed plans").unwrap();
        workflow.settle().await.unwrap();

        assert_eq!(
            workflow.state().unwrap(),
            TripPhase::Cancelled {
                reason: "changed plans".to_string()
            }
        );
        assert_eq!(trips.is_cancelled(workflow.trip()), Some(true));
    }

    #[tokio::test]
    async fn test_cancel_in_progress_is_rejected() {
        let (trips, logger, workflow) = harness(instant()).await;
        workflow
            .apply_update(TripUpdate::DriverAssigned(assignment()))
            .unwrap();
        workflow.apply_update(TripUpdate::DriverArrived).unwrap();
        workflow.apply_update(TripUpdate::Started).unwrap();
        workflow.cancel("too slow").unwrap();
        workflow.settle().await.unwrap();

        assert!(matches!(workflow.state().unwrap(), TripPhase::InProgress { .. }));
        assert_eq!(trips.is_cancelled(workflow.trip()), Some(false));
        let entries = logger.entries();
        assert_eq!(entries[0].transition, "cancel");
        assert_eq!(entries[0].kind, FailureKind::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_assignment_during_cancel_is_rejected() {
        let (_trips, logger, workflow) = harness(SimulationConfig {
            latency_ms: 300,
            fail_every: 0,
        })
        .await;

        // The assignment queues behind the cancel call and then finds the
        // trip cancelled.
        workflow.cancel("found another ride").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        workflow
            .apply_update(TripUpdate::DriverAssigned(assignment()))
            .unwrap();
        workflow.settle().await.unwrap();

        assert!(matches!(workflow.state().unwrap(), TripPhase::Cancelled { .. }));
        assert_eq!(
            logger.entries()[0].message,
            "invalid state transition: cannot assign driver while cancelled"
        );
    }

    #[tokio::test]
    async fn test_cancel_failure_keeps_phase() {
        // Call 1 is the trip request, call 2 the cancel.
        let (_trips, logger, workflow) = harness(SimulationConfig {
            latency_ms: 0,
            fail_every: 2,
        })
        .await;
        workflow.cancel("changed plans").unwrap();
        workflow.settle().await.unwrap();

        assert_eq!(workflow.state().unwrap(), TripPhase::WaitingForDriver);
        assert_eq!(logger.entries()[0].kind, FailureKind::OperationFailed);
    }
}
