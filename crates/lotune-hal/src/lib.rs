//! # lotune Hardware Layer
//!
//! Device access for the LO re-lock benchmark and the timed GPIO exerciser.
//!
//! - [`device`]: the synchronous [`RadioDevice`] trait, tune requests,
//!   sensors and GPIO attributes
//! - [`hal`]: driver registry (`uhd://`, `simulator://`) and the UHD driver
//! - [`simulator`]: deterministic virtual-clock device
//! - [`probe`]: [`DeviceLockProbe`] and the pre-search lock checks
//! - [`gpio`]: the timed GPIO sequence
//!
//! ## Example
//!
//! ```rust,ignore
//! use lotune_core::search::{LockBoundarySearch, NoopObserver, SearchConfig};
//! use lotune_hal::hal::create_default_registry;
//! use lotune_hal::probe::{BenchSetup, DeviceLockProbe};
//!
//! let mut device = create_default_registry().create("simulator://")?;
//! let setup = BenchSetup::new(500e6);
//! let request = setup.apply(device.as_mut())?;
//! setup.check_lock_sensors(device.as_mut())?;
//!
//! let mut probe = DeviceLockProbe::new(device.as_mut(), request);
//! let report = LockBoundarySearch::new(SearchConfig::new(500e6, 5e9))?
//!     .run(&mut probe, &mut NoopObserver)?;
//! ```

pub mod device;
pub mod gpio;
pub mod hal;
pub mod probe;
pub mod simulator;

pub use device::{
    DeviceInfo, GpioAttr, RadioDevice, SdrError, SdrResult, SensorData, SensorValue,
    TunePolicy, TuneRequest, TuneResult,
};
pub use gpio::{GpioReport, TimedGpioPlan};
pub use hal::{create_default_registry, DeviceDriver, DriverRegistry};
pub use probe::{BenchSetup, DeviceLockProbe};
pub use simulator::{SimConfig, Simulator, SimulatorDriver};
