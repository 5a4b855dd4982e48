//! ridestate - Ride-hailing workflow simulator
//!
//! Runs scripted driver or rider sessions against simulated backends and logs
//! every committed state.

use clap::{Parser, Subcommand};
use ridestate_core::{StateStream, TokioExecutor};
use ridestate_workflows::{
    Config, DriverAssignment, DriverWorkflow, Location, PreTripState, PreTripWorkflow,
    SimulatedFleet, SimulatedTrips, TripUpdate, TripWorkflow, Vehicle,
};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ridestate")]
#[command(about = "Simulate ride-hailing workflows on reactive state machines")]
#[command(version)]
struct Cli {
    /// YAML config file (overrides RIDESTATE_CONFIG)
    #[arg(short, long, env = "RIDESTATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a vehicle and cycle the driver online and offline
    Driver,

    /// Book a trip and follow it to completion
    Rider {
        /// Cancel the trip once a driver is assigned
        #[arg(long)]
        cancel: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // Defaults, then the config file, then RIDESTATE_* overrides
    let config = Config::load_from(cli.config.as_deref()).map_err(|e| {
        tracing::error!("Failed to load config: {}", e);
        e
    })?;
    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }

    tracing::info!("Starting ridestate simulator");
    tracing::info!("  Machine prefix: {}", config.machine.name);
    tracing::info!("  Simulated latency: {}ms", config.simulation.latency_ms);
    if config.simulation.fail_every > 0 {
        tracing::info!(
            "  Failure injection: every {} call(s)",
            config.simulation.fail_every
        );
    }

    let session = async move {
        match cli.command {
            Commands::Driver => run_driver(&config).await,
            Commands::Rider { cancel } => run_rider(&config, cancel).await,
        }
    };

    tokio::select! {
        result = session => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping session...");
        }
    }

    tracing::info!("Simulator stopped");
    Ok(())
}

/// Logs every state of `stream` until its machine is disposed.
fn log_states<S>(label: &'static str, stream: StateStream<S>)
where
    S: Debug + Send + 'static,
{
    stream
        .deliver_on(&TokioExecutor::current(), move |state| {
            tracing::info!(workflow = label, "State: {:?}", state);
        })
        .detach();
}

async fn run_driver(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let executor = TokioExecutor::current();
    let fleet = Arc::new(SimulatedFleet::new(&config.simulation));
    let driver = DriverWorkflow::with_config(fleet, config.machine_for("driver"), &executor);
    log_states("driver", driver.observe());

    driver.register(Vehicle::new("Toyota", "Prius", "7ABC123"))?;
    driver.go_online()?;
    driver.request_offline()?;
    driver.resume_online()?;
    // Already online, rejected and logged.
    driver.go_online()?;
    driver.request_offline()?;
    driver.go_offline()?;
    driver.settle().await?;

    let stats = driver.machine().stats();
    tracing::info!(
        "Driver session finished: {:?} ({} committed, {} rejected, {} failed)",
        driver.state()?,
        stats.committed.load(Ordering::Relaxed),
        stats.rejected.load(Ordering::Relaxed),
        stats.failed.load(Ordering::Relaxed),
    );
    Ok(())
}

async fn run_rider(config: &Config, cancel: bool) -> Result<(), Box<dyn std::error::Error>> {
    let executor = TokioExecutor::current();
    let trips = Arc::new(SimulatedTrips::new(&config.simulation));

    let pretrip =
        PreTripWorkflow::with_config(trips.clone(), config.machine_for("pretrip"), &executor);
    log_states("pretrip", pretrip.observe());

    pretrip.set_pickup(Location::new(37.7749, -122.4194))?;
    pretrip.set_dropoff(Location::new(37.8044, -122.2712))?;
    pretrip.confirm_locations()?;
    pretrip.confirm_pickup()?;
    pretrip.request_trip()?;
    pretrip.settle().await?;

    let trip = match pretrip.state()? {
        PreTripState::Confirmed { trip } => trip,
        other => {
            tracing::warn!("Trip was not booked, stopped at: {}", other.name());
            return Ok(());
        }
    };
    pretrip.dispose();
    tracing::info!("Booked {}", trip);

    let lifecycle = TripWorkflow::with_config(trip, trips, config.machine_for("trip"), &executor);
    log_states("trip", lifecycle.observe());

    let driver = DriverAssignment {
        driver_name: "Sam".to_string(),
        plate: "7ABC123".to_string(),
    };
    lifecycle.apply_update(TripUpdate::DriverAssigned(driver))?;
    if cancel {
        lifecycle.cancel("rider cancelled")?;
    }

    let dispatch_delay = config.simulation.latency().max(Duration::from_millis(100));
    for update in [
        TripUpdate::DriverArrived,
        TripUpdate::Started,
        TripUpdate::Completed,
    ] {
        tokio::time::sleep(dispatch_delay).await;
        lifecycle.apply_update(update)?;
    }
    lifecycle.settle().await?;

    tracing::info!("Trip finished: {}", lifecycle.state()?.name());
    Ok(())
}
