//! # Hardware Abstraction Layer (HAL)
//!
//! Drivers that turn a connection string into a [`RadioDevice`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          lo-tune-bench / timed-gpio                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │   LockBoundarySearch  ◄── DeviceLockProbe    TimedGpioPlan  │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  RadioDevice (Rust trait)                   │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │   Simulator (virtual clock)  │  UHD (libuhd, runtime-loaded)│
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use lotune_hal::hal::create_default_registry;
//!
//! let registry = create_default_registry();
//!
//! // Bare UHD args select the UHD driver
//! let usrp = registry.create("addr=192.168.10.2")?;
//!
//! // Deterministic simulator
//! let sim = registry.create("simulator://lock_time=0.0002")?;
//! ```

use crate::device::{DeviceInfo, RadioDevice, SdrError, SdrResult};
use std::collections::HashMap;

pub mod uhd;

pub use uhd::UhdDriver;

/// Driver factory for creating devices.
pub trait DeviceDriver: Send + Sync {
    /// Driver name (e.g., "uhd", "simulator").
    fn name(&self) -> &str;

    /// Discover available devices.
    fn discover(&self) -> Vec<DeviceInfo>;

    /// Create a device from the argument part of a connection string.
    fn create_from_string(&self, args: &str) -> SdrResult<Box<dyn RadioDevice>>;
}

/// Parse `key=value,key=value` device arguments.
///
/// Entries without `=` are ignored; later keys win.
pub fn parse_args(args: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    for part in args.split(',') {
        if let Some(pos) = part.find('=') {
            let key = part[..pos].trim().to_string();
            let value = part[pos + 1..].trim().to_string();
            result.insert(key, value);
        }
    }
    result
}

/// Registry of available device drivers.
pub struct DriverRegistry {
    drivers: Vec<Box<dyn DeviceDriver>>,
}

impl DriverRegistry {
    /// Driver used for connection strings without a `driver://` prefix.
    pub const DEFAULT_DRIVER: &'static str = "uhd";

    /// Create a new registry.
    pub fn new() -> Self {
        Self {
            drivers: Vec::new(),
        }
    }

    /// Register a device driver.
    pub fn register(&mut self, driver: Box<dyn DeviceDriver>) {
        self.drivers.push(driver);
    }

    /// Get a driver by name.
    pub fn get(&self, name: &str) -> Option<&dyn DeviceDriver> {
        self.drivers
            .iter()
            .find(|d| d.name() == name)
            .map(|d| d.as_ref())
    }

    /// List all available drivers.
    pub fn list(&self) -> Vec<&str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    /// Discover all devices across all drivers.
    pub fn discover_all(&self) -> Vec<(String, DeviceInfo)> {
        let mut devices = Vec::new();
        for driver in &self.drivers {
            for info in driver.discover() {
                devices.push((driver.name().to_string(), info));
            }
        }
        devices
    }

    /// Split a connection string into driver name and args.
    ///
    /// `"simulator://lock_time=1e-4"` → `("simulator", "lock_time=1e-4")`;
    /// `"addr=192.168.10.2"` → `("uhd", "addr=192.168.10.2")`.
    pub fn split_uri(uri: &str) -> (&str, &str) {
        match uri.find("://") {
            Some(pos) => (&uri[..pos], &uri[pos + 3..]),
            None => (Self::DEFAULT_DRIVER, uri),
        }
    }

    /// Create a device from a connection string.
    pub fn create(&self, uri: &str) -> SdrResult<Box<dyn RadioDevice>> {
        let (driver_name, args) = Self::split_uri(uri);

        let driver = self.get(driver_name).ok_or_else(|| {
            SdrError::DeviceNotFound(format!("Unknown driver: {}", driver_name))
        })?;

        driver.create_from_string(args)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a driver registry with all built-in drivers.
///
/// This includes:
/// - UHD driver (USRP devices; needs the `uhd` feature and libuhd)
/// - Simulator driver
pub fn create_default_registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    registry.register(Box::new(uhd::UhdDriver::new()));
    registry.register(Box::new(crate::simulator::SimulatorDriver));
    registry
}
