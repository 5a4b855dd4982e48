//! Driver availability workflow.
//!
//! ```text
//! Unregistered --register--> Offline --go_online--> Online
//!                               ^                    |  ^
//!                               |      request_offline  resume_online
//!                               |                    v  |
//!                               +----go_offline--- GoingOffline
//! ```
//!
//! `go_offline` is also accepted straight from `Online`.

use crate::interactor::{FleetService, Vehicle, VehicleId};
use ridestate_core::{
    Executor, MachineConfig, MachineError, StateMachine, StateStream, TransitionError,
    TransitionLogger,
};
use std::sync::Arc;

/// Driver availability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    Unregistered,
    Offline { vehicle: VehicleId },
    Online { vehicle: VehicleId },
    /// The driver asked to stop taking trips but is still dispatchable.
    GoingOffline { vehicle: VehicleId },
}

impl DriverState {
    pub fn name(&self) -> &'static str {
        match self {
            DriverState::Unregistered => "unregistered",
            DriverState::Offline { .. } => "offline",
            DriverState::Online { .. } => "online",
            DriverState::GoingOffline { .. } => "going offline",
        }
    }

    pub fn vehicle(&self) -> Option<&VehicleId> {
        match self {
            DriverState::Unregistered => None,
            DriverState::Offline { vehicle }
            | DriverState::Online { vehicle }
            | DriverState::GoingOffline { vehicle } => Some(vehicle),
        }
    }

    /// Returns true while the driver can receive trips.
    pub fn is_dispatchable(&self) -> bool {
        matches!(
            self,
            DriverState::Online { .. } | DriverState::GoingOffline { .. }
        )
    }
}

/// Drives a [`DriverState`] machine against a [`FleetService`].
pub struct DriverWorkflow {
    machine: StateMachine<DriverState>,
    fleet: Arc<dyn FleetService>,
}

impl DriverWorkflow {
    /// Starts an unregistered driver.
    pub fn new<E: Executor + ?Sized>(fleet: Arc<dyn FleetService>, executor: &E) -> Self {
        Self::with_config(fleet, MachineConfig::new("driver"), executor)
    }

    pub fn with_config<E: Executor + ?Sized>(
        fleet: Arc<dyn FleetService>,
        config: MachineConfig,
        executor: &E,
    ) -> Self {
        let machine = StateMachine::builder(DriverState::Unregistered)
            .with_config(config)
            .build(executor);
        Self { machine, fleet }
    }

    /// Like [`DriverWorkflow::with_config`] with a custom failure logger.
    pub fn with_logger<E: Executor + ?Sized>(
        fleet: Arc<dyn FleetService>,
        config: MachineConfig,
        logger: Arc<dyn TransitionLogger>,
        executor: &E,
    ) -> Self {
        let machine = StateMachine::builder(DriverState::Unregistered)
            .with_config(config)
            .with_logger(logger)
            .build(executor);
        Self { machine, fleet }
    }

    pub fn observe(&self) -> StateStream<DriverState> {
        self.machine.observe()
    }

    pub fn state(&self) -> Result<DriverState, MachineError> {
        self.machine.current_state()
    }

    pub fn machine(&self) -> &StateMachine<DriverState> {
        &self.machine
    }

    /// Registers `vehicle` with the fleet.
    pub fn register(&self, vehicle: Vehicle) -> Result<(), MachineError> {
        let fleet = self.fleet.clone();
        self.machine
            .async_transition_as("register", move |state: &DriverState| {
                if *state != DriverState::Unregistered {
                    return Err(TransitionError::invalid(state.name(), "register"));
                }
                Ok(async move {
                    let vehicle = fleet.register_vehicle(&vehicle).await?;
                    Ok::<_, TransitionError>(DriverState::Offline { vehicle })
                })
            })
    }

    /// Marks the vehicle ready for dispatch.
    pub fn go_online(&self) -> Result<(), MachineError> {
        let fleet = self.fleet.clone();
        self.machine
            .async_transition_as("go_online", move |state: &DriverState| {
                let DriverState::Offline { vehicle } = state else {
                    return Err(TransitionError::invalid(state.name(), "go online"));
                };
                let vehicle = vehicle.clone();
                Ok(async move {
                    fleet.mark_ready(&vehicle).await?;
                    Ok::<_, TransitionError>(DriverState::Online { vehicle })
                })
            })
    }

    /// Asks to stop receiving trips once the current one is done.
    pub fn request_offline(&self) -> Result<(), MachineError> {
        self.machine
            .transition_as("request_offline", |state: &DriverState| match state {
                DriverState::Online { vehicle } => Ok(DriverState::GoingOffline {
                    vehicle: vehicle.clone(),
                }),
                other => Err(TransitionError::invalid(other.name(), "request offline")),
            })
    }

    /// Withdraws a pending offline request.
    pub fn resume_online(&self) -> Result<(), MachineError> {
        self.machine
            .transition_as("resume_online", |state: &DriverState| match state {
                DriverState::GoingOffline { vehicle } => Ok(DriverState::Online {
                    vehicle: vehicle.clone(),
                }),
                other => Err(TransitionError::invalid(other.name(), "resume online")),
            })
    }

    /// Marks the vehicle not ready.
    pub fn go_offline(&self) -> Result<(), MachineError> {
        let fleet = self.fleet.clone();
        self.machine
            .async_transition_as("go_offline", move |state: &DriverState| {
                let vehicle = match state {
                    DriverState::Online { vehicle } | DriverState::GoingOffline { vehicle } => {
                        vehicle.clone()
                    }
                    other => return Err(TransitionError::invalid(other.name(), "go offline")),
                };
                Ok(async move {
                    fleet.mark_not_ready(&vehicle).await?;
                    Ok::<_, TransitionError>(DriverState::Offline { vehicle })
                })
            })
    }

    /// Waits until every submitted action has been evaluated.
    pub async fn settle(&self) -> Result<(), MachineError> {
        self.machine.flush().await
    }

    pub fn dispose(&self) {
        self.machine.dispose();
    }
}
