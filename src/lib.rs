//! # Nimbus
//!
//! Control and telemetry core for DVB-S/S2 satellite receiver NIMs: a
//! tuner, demodulator and LNA chipset behind a USB/I2C bridge.
//!
//! ## Features
//!
//! - **Ordered configuration queue**: any thread can enqueue tuning requests
//! - **Apply state machine**: seven-step hardware bring-up with fail-stop
//! - **Telemetry polling**: gated register reads into a status snapshot
//! - **Power level lookup**: AGC code to dBm calibration tables
//! - **Publishing**: broadcast subscribers plus one direct callback
//! - **Simulated board**: register-level NIM model with fault injection
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nimbus::{ConfigurationRequest, NimFrontend, PowerLevelLookup, SimulatedBus, WorkerBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (bus, _sim) = SimulatedBus::new();
//! let worker = WorkerBuilder::new(NimFrontend::new(bus), PowerLevelLookup::builtin()?)
//!     .callback(|status| println!("locked: {}", status.is_locked()))
//!     .spawn()?;
//!
//! worker.enqueue(ConfigurationRequest::new(1_296_000_000, 1_500_000))?;
//! let mut telemetry = worker.subscribe();
//! let status = telemetry.blocking_recv()?;
//! println!("MER: {}", status.mer);
//!
//! worker.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`bus`] - Register transport trait and bus faults
//! - [`chips`] - Multiplexer, demodulator, tuner and LNA drivers
//! - [`frontend`] - The hardware operations the worker drives
//! - [`apply`] - Configuration apply sequence
//! - [`telemetry`] - Snapshot collection and publishing
//! - [`calibration`] - AGC power level tables
//! - [`worker`] - The per-NIM thread and its handle
//! - [`sim`] - Simulated NIM board

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod apply;
pub mod bus;
pub mod calibration;
pub mod chips;
pub mod config;
pub mod frontend;
pub mod queue;
pub mod sim;
pub mod telemetry;
pub mod worker;

// Re-export main public types for convenience
pub use apply::{apply_configuration, ApplyError, ApplyStep};
pub use bus::{BusAdapter, BusFault, RegisterAddress};
pub use calibration::{CalibrationTable, PowerLevelLookup};
pub use chips::{DriverError, LockState, PolarizationSupply};
pub use config::{ConfigurationRequest, WorkerConfig};
pub use frontend::{Frontend, NimFrontend};
pub use queue::{ConfigSender, QueueError};
pub use sim::{FaultRule, SimHandle, SimulatedBus};
pub use telemetry::StatusSnapshot;
pub use worker::{WorkerBuilder, WorkerError, WorkerExit, WorkerHandle, WorkerState};
