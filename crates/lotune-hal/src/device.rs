//! Radio Device Abstraction
//!
//! This module defines the synchronous interface the diagnostics drive:
//! device time, timed commands, RX tuning, sensors and GPIO attributes.

use lotune_core::config::ClockSource;
use lotune_core::timing::TimeSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Result type for device operations
pub type SdrResult<T> = Result<T, SdrError>;

/// Errors that can occur during device operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SdrError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Hardware error: {0}")]
    HardwareError(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// How one stage of a tune request picks its frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TunePolicy {
    /// Leave this stage untouched
    None,
    /// Let the driver choose
    #[default]
    Auto,
    /// Use the frequency given in the request
    Manual,
}

impl TunePolicy {
    /// Policy code used by the UHD C API.
    pub fn code(&self) -> u8 {
        match self {
            TunePolicy::None => b'N',
            TunePolicy::Auto => b'A',
            TunePolicy::Manual => b'M',
        }
    }
}

/// An RX tune request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneRequest {
    /// Overall target frequency in Hz
    pub target_freq: f64,
    /// RF (LO) stage policy
    pub rf_freq_policy: TunePolicy,
    /// RF frequency in Hz, used with [`TunePolicy::Manual`]
    pub rf_freq: f64,
    /// DSP (CORDIC) stage policy
    pub dsp_freq_policy: TunePolicy,
    /// DSP frequency in Hz, used with [`TunePolicy::Manual`]
    pub dsp_freq: f64,
    /// Extra driver args, e.g. `mode_n=integer`
    pub args: String,
}

impl TuneRequest {
    /// Automatic tune to `target_freq`.
    pub fn new(target_freq: f64) -> Self {
        Self {
            target_freq,
            rf_freq_policy: TunePolicy::Auto,
            rf_freq: 0.0,
            dsp_freq_policy: TunePolicy::Auto,
            dsp_freq: 0.0,
            args: String::new(),
        }
    }

    /// Tune the LO directly with no DSP offset.
    ///
    /// With the DSP stage left alone, a hop only moves the LO, so the
    /// streaming rate never has to keep up with the hop rate.
    pub fn manual_rf(freq: f64, int_n: bool) -> Self {
        Self {
            target_freq: freq,
            rf_freq_policy: TunePolicy::Manual,
            rf_freq: freq,
            dsp_freq_policy: TunePolicy::None,
            dsp_freq: 0.0,
            args: if int_n {
                "mode_n=integer".to_string()
            } else {
                String::new()
            },
        }
    }

    /// Same request retargeted to `freq`.
    pub fn retarget(&self, freq: f64) -> Self {
        Self {
            target_freq: freq,
            rf_freq: freq,
            ..self.clone()
        }
    }

    /// Whether integer-N synthesis was requested.
    pub fn is_integer_n(&self) -> bool {
        self.args
            .split(',')
            .any(|kv| kv.trim() == "mode_n=integer")
    }

    /// LO frequency this request asks for.
    pub fn lo_frequency(&self) -> f64 {
        match self.rf_freq_policy {
            TunePolicy::Manual => self.rf_freq,
            _ => self.target_freq,
        }
    }
}

/// What the driver actually did for a tune request.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TuneResult {
    pub clipped_rf_freq: f64,
    pub target_rf_freq: f64,
    pub actual_rf_freq: f64,
    pub target_dsp_freq: f64,
    pub actual_dsp_freq: f64,
}

/// Typed payload of a sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorData {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

/// A named sensor reading.
///
/// For booleans, `unit` holds the label of the current state
/// (e.g. `locked` / `unlocked`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorValue {
    pub name: String,
    pub data: SensorData,
    pub unit: String,
}

impl SensorValue {
    /// Boolean reading labelled `when_true` / `when_false`.
    pub fn boolean(name: &str, value: bool, when_true: &str, when_false: &str) -> Self {
        Self {
            name: name.to_string(),
            data: SensorData::Boolean(value),
            unit: if value { when_true } else { when_false }.to_string(),
        }
    }

    /// Lock-detect reading as reported by USRP daughterboards.
    pub fn lock(name: &str, locked: bool) -> Self {
        Self::boolean(name, locked, "locked", "unlocked")
    }

    /// Interpret the reading as a boolean.
    pub fn to_bool(&self) -> bool {
        match &self.data {
            SensorData::Boolean(value) => *value,
            SensorData::Integer(value) => *value != 0,
            SensorData::Real(value) => *value != 0.0,
            SensorData::Text(value) => {
                matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
            }
        }
    }

    /// Human-readable form, e.g. `LO: locked`.
    pub fn to_pp_string(&self) -> String {
        match &self.data {
            SensorData::Boolean(_) => format!("{}: {}", self.name, self.unit),
            SensorData::Integer(value) => format!("{}: {} {}", self.name, value, self.unit),
            SensorData::Real(value) => format!("{}: {} {}", self.name, value, self.unit),
            SensorData::Text(value) => format!("{}: {} {}", self.name, value, self.unit),
        }
        .trim_end()
        .to_string()
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_pp_string())
    }
}

/// GPIO bank attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GpioAttr {
    /// 0 = manual GPIO, 1 = ATR controlled
    Ctrl,
    /// Data direction, 1 = output
    Ddr,
    /// Manual output levels
    Out,
    /// ATR level while idle
    Atr0x,
    /// ATR level while receiving
    AtrRx,
    /// ATR level while transmitting
    AtrTx,
    /// ATR level in full duplex
    AtrXx,
    /// Pin levels as read back
    Readback,
}

impl GpioAttr {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpioAttr::Ctrl => "CTRL",
            GpioAttr::Ddr => "DDR",
            GpioAttr::Out => "OUT",
            GpioAttr::Atr0x => "ATR_0X",
            GpioAttr::AtrRx => "ATR_RX",
            GpioAttr::AtrTx => "ATR_TX",
            GpioAttr::AtrXx => "ATR_XX",
            GpioAttr::Readback => "READBACK",
        }
    }
}

impl fmt::Display for GpioAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GpioAttr {
    type Err = SdrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CTRL" => Ok(GpioAttr::Ctrl),
            "DDR" => Ok(GpioAttr::Ddr),
            "OUT" => Ok(GpioAttr::Out),
            "ATR_0X" => Ok(GpioAttr::Atr0x),
            "ATR_RX" => Ok(GpioAttr::AtrRx),
            "ATR_TX" => Ok(GpioAttr::AtrTx),
            "ATR_XX" => Ok(GpioAttr::AtrXx),
            "READBACK" => Ok(GpioAttr::Readback),
            other => Err(SdrError::ConfigError(format!(
                "Unknown GPIO attribute: {}",
                other
            ))),
        }
    }
}

/// Device information for discovery
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    /// Device type/driver
    pub driver: String,
    /// Device serial number
    pub serial: String,
    /// Device label/name
    pub label: String,
    /// Connection string
    pub address: String,
}

/// A radio the diagnostics can drive.
///
/// Calls block until the device accepts the command. While a command time
/// is set, commands are queued for that device time instead of executing
/// immediately.
pub trait RadioDevice: Send {
    /// Multi-line description of the device.
    fn pp_string(&self) -> SdrResult<String>;

    // ---- Clocking -------------------------------------------------------

    fn set_clock_source(&mut self, source: ClockSource) -> SdrResult<()>;

    fn set_time_source(&mut self, source: &str) -> SdrResult<()>;

    /// Set device time immediately.
    fn set_time_now(&mut self, time: TimeSpec) -> SdrResult<()>;

    /// Set device time at the next PPS edge.
    fn set_time_next_pps(&mut self, time: TimeSpec) -> SdrResult<()>;

    fn time_now(&mut self) -> SdrResult<TimeSpec>;

    /// Queue following commands for device time `time`.
    fn set_command_time(&mut self, time: TimeSpec) -> SdrResult<()>;

    fn clear_command_time(&mut self) -> SdrResult<()>;

    // ---- RX front end ---------------------------------------------------

    fn set_rx_freq(&mut self, request: &TuneRequest) -> SdrResult<TuneResult>;

    fn rx_freq(&mut self) -> SdrResult<f64>;

    fn set_rx_subdev_spec(&mut self, spec: &str) -> SdrResult<()>;

    fn set_rx_antenna(&mut self, antenna: &str) -> SdrResult<()>;

    fn rx_antennas(&mut self) -> SdrResult<Vec<String>>;

    // ---- Sensors --------------------------------------------------------

    fn rx_sensor_names(&mut self, chan: usize) -> SdrResult<Vec<String>>;

    fn rx_sensor(&mut self, name: &str, chan: usize) -> SdrResult<SensorValue>;

    fn mboard_sensor_names(&mut self, mboard: usize) -> SdrResult<Vec<String>>;

    fn mboard_sensor(&mut self, name: &str, mboard: usize) -> SdrResult<SensorValue>;

    // ---- GPIO -----------------------------------------------------------

    fn set_gpio_attr(&mut self, bank: &str, attr: GpioAttr, value: u32, mask: u32)
        -> SdrResult<()>;

    fn gpio_attr(&mut self, bank: &str, attr: GpioAttr) -> SdrResult<u32>;

    /// Block for `duration` of device time.
    fn settle(&mut self, duration: Duration) -> SdrResult<()> {
        std::thread::sleep(duration);
        Ok(())
    }

    // ---- Provided helpers -----------------------------------------------

    fn has_rx_sensor(&mut self, name: &str, chan: usize) -> SdrResult<bool> {
        Ok(self.rx_sensor_names(chan)?.iter().any(|n| n == name))
    }

    fn has_mboard_sensor(&mut self, name: &str, mboard: usize) -> SdrResult<bool> {
        Ok(self.mboard_sensor_names(mboard)?.iter().any(|n| n == name))
    }

    /// Make the masked lines outputs (or inputs).
    fn set_gpio_direction(&mut self, bank: &str, mask: u32, output: bool) -> SdrResult<()> {
        self.set_gpio_attr(bank, GpioAttr::Ddr, if output { mask } else { 0 }, mask)
    }

    /// Put the masked lines under manual GPIO control.
    fn set_gpio_manual(&mut self, bank: &str, mask: u32) -> SdrResult<()> {
        self.set_gpio_attr(bank, GpioAttr::Ctrl, 0, mask)
    }

    /// Drive the masked lines high or low.
    fn set_gpio_output(&mut self, bank: &str, mask: u32, high: bool) -> SdrResult<()> {
        self.set_gpio_attr(bank, GpioAttr::Out, if high { mask } else { 0 }, mask)
    }

    /// Current pin levels.
    fn gpio_value(&mut self, bank: &str) -> SdrResult<u32> {
        self.gpio_attr(bank, GpioAttr::Readback)
    }
}
