//! Simulated USRP
//!
//! A deterministic, pure-software [`RadioDevice`] for exercising the lock
//! search and the GPIO sequence without hardware.
//!
//! ## Model
//!
//! - **Clock**: a virtual device clock. Every call costs `latency` seconds;
//!   `settle()` advances it instantly instead of sleeping.
//! - **Command queue**: commands execute in FIFO order, each no earlier than
//!   its command time. Immediate commands and all reads wait for the queue;
//!   timed writes return at once.
//! - **LO**: unlocked for `lock_time` seconds (or `int_n_lock_time` with
//!   `mode_n=integer`) after every tune executes.
//! - **GPIO**: bank `FP0` with CTRL/DDR/OUT/ATR registers; READBACK reflects
//!   the driven levels of output pins.
//!
//! ## Arguments
//!
//! ```text
//! simulator://lock_time=0.0002,int_n_lock_time=0.0001,latency=1e-6,no_lo_sensor,ref_unlocked
//! ```

use std::collections::{HashMap, VecDeque};

use lotune_core::config::ClockSource;
use lotune_core::timing::TimeSpec;
use std::time::Duration;
use tracing::{debug, trace};

use crate::device::{
    DeviceInfo, GpioAttr, RadioDevice, SdrError, SdrResult, SensorValue, TuneRequest, TuneResult,
};
use crate::hal::DeviceDriver;

/// Comparison slack for lock windows, in seconds.
const TIME_EPSILON: f64 = 1e-9;

/// Tunes remembered for lock evaluation.
const TUNE_HISTORY: usize = 16;

/// The one GPIO bank the simulator exposes.
pub const SIM_GPIO_BANK: &str = "FP0";

/// Simulator parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// LO re-lock time after a fractional-N tune (seconds)
    pub lock_time: f64,
    /// LO re-lock time after an integer-N tune (seconds)
    pub int_n_lock_time: f64,
    /// Device time consumed by each call (seconds)
    pub latency: f64,
    /// Expose the `lo_locked` RX sensor
    pub lo_sensor: bool,
    /// Report external/MIMO references as unlocked
    pub ref_unlocked: bool,
    /// Tunable LO range (Hz)
    pub freq_range: (f64, f64),
    /// RX antennas
    pub antennas: Vec<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            lock_time: 0.000_200,
            int_n_lock_time: 0.000_100,
            latency: 0.000_001,
            lo_sensor: true,
            ref_unlocked: false,
            freq_range: (70e6, 6e9),
            antennas: vec!["TX/RX".to_string(), "RX2".to_string()],
        }
    }
}

impl SimConfig {
    /// Parse `key=value` simulator args. Bare words act as boolean flags.
    pub fn from_args(args: &str) -> SdrResult<Self> {
        let mut config = Self::default();

        for part in args.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = match part.find('=') {
                Some(pos) => (part[..pos].trim(), Some(part[pos + 1..].trim())),
                None => (part, None),
            };
            match key {
                "lock_time" => config.lock_time = parse_seconds(key, value)?,
                "int_n_lock_time" => config.int_n_lock_time = parse_seconds(key, value)?,
                "latency" => config.latency = parse_seconds(key, value)?,
                "no_lo_sensor" => config.lo_sensor = !parse_flag(key, value)?,
                "ref_unlocked" => config.ref_unlocked = parse_flag(key, value)?,
                other => debug!(key = other, "Ignoring unknown simulator arg"),
            }
        }

        Ok(config)
    }
}

fn parse_seconds(key: &str, value: Option<&str>) -> SdrResult<f64> {
    let raw = value.ok_or_else(|| SdrError::ConfigError(format!("{} needs a value", key)))?;
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(SdrError::ConfigError(format!(
            "{} must be a non-negative number of seconds, got '{}'",
            key, raw
        ))),
    }
}

fn parse_flag(key: &str, value: Option<&str>) -> SdrResult<bool> {
    match value.map(|v| v.to_ascii_lowercase()) {
        None => Ok(true),
        Some(v) if v == "1" || v == "true" || v == "yes" => Ok(true),
        Some(v) if v == "0" || v == "false" || v == "no" => Ok(false),
        Some(v) => Err(SdrError::ConfigError(format!(
            "{} expects a boolean, got '{}'",
            key, v
        ))),
    }
}

/// One executed (or queued) LO tune.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimTune {
    /// Device time the tune executes
    pub at: TimeSpec,
    /// LO frequency after the tune
    pub frequency: f64,
    /// How long the LO stays unlocked
    pub lock_time: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GpioBank {
    ctrl: u32,
    ddr: u32,
    out: u32,
    atr_0x: u32,
    atr_rx: u32,
    atr_tx: u32,
    atr_xx: u32,
}

impl GpioBank {
    fn register(&mut self, attr: GpioAttr) -> Option<&mut u32> {
        match attr {
            GpioAttr::Ctrl => Some(&mut self.ctrl),
            GpioAttr::Ddr => Some(&mut self.ddr),
            GpioAttr::Out => Some(&mut self.out),
            GpioAttr::Atr0x => Some(&mut self.atr_0x),
            GpioAttr::AtrRx => Some(&mut self.atr_rx),
            GpioAttr::AtrTx => Some(&mut self.atr_tx),
            GpioAttr::AtrXx => Some(&mut self.atr_xx),
            GpioAttr::Readback => None,
        }
    }

    fn write(&mut self, attr: GpioAttr, value: u32, mask: u32) -> SdrResult<()> {
        let reg = self.register(attr).ok_or_else(|| {
            SdrError::HardwareError(format!("GPIO attribute {} is read-only", attr))
        })?;
        *reg = (*reg & !mask) | (value & mask);
        Ok(())
    }

    fn read(&self, attr: GpioAttr) -> u32 {
        match attr {
            GpioAttr::Ctrl => self.ctrl,
            GpioAttr::Ddr => self.ddr,
            GpioAttr::Out => self.out,
            GpioAttr::Atr0x => self.atr_0x,
            GpioAttr::AtrRx => self.atr_rx,
            GpioAttr::AtrTx => self.atr_tx,
            GpioAttr::AtrXx => self.atr_xx,
            // Radio idle: ATR pins show ATR_0X
            GpioAttr::Readback => {
                let manual = self.out & !self.ctrl;
                let atr = self.atr_0x & self.ctrl;
                (manual | atr) & self.ddr
            }
        }
    }
}

#[derive(Debug, Clone)]
struct PendingGpio {
    at: f64,
    bank: String,
    attr: GpioAttr,
    value: u32,
    mask: u32,
}

/// Deterministic simulated USRP.
pub struct Simulator {
    config: SimConfig,
    /// Monotonic simulation time in seconds
    mono: f64,
    /// Device time minus `mono`
    epoch: f64,
    /// Device time to apply at the next whole-second PPS edge
    pending_pps: Option<(f64, f64)>,
    /// Command time for following commands, in mono seconds
    command_time: Option<f64>,
    /// When the last queued command executes, in mono seconds
    queue_tail: f64,
    /// Recent tunes, oldest first, times in mono seconds
    tunes: VecDeque<(f64, f64, f64)>,
    tune_count: u64,
    rx_freq: f64,
    clock_source: ClockSource,
    time_source: String,
    subdev: String,
    antenna: String,
    gpio: HashMap<String, GpioBank>,
    pending_gpio: Vec<PendingGpio>,
}

impl Simulator {
    /// Create a simulator with the given parameters.
    pub fn new(config: SimConfig) -> Self {
        let antenna = config.antennas.first().cloned().unwrap_or_default();
        let mut gpio = HashMap::new();
        gpio.insert(SIM_GPIO_BANK.to_string(), GpioBank::default());

        Self {
            rx_freq: config.freq_range.0,
            config,
            mono: 0.0,
            epoch: 0.0,
            pending_pps: None,
            command_time: None,
            queue_tail: 0.0,
            tunes: VecDeque::with_capacity(TUNE_HISTORY),
            tune_count: 0,
            clock_source: ClockSource::Internal,
            time_source: "internal".to_string(),
            subdev: "A:0".to_string(),
            antenna,
            gpio,
            pending_gpio: Vec::new(),
        }
    }

    /// Create a simulator from `simulator://` args.
    pub fn from_args(args: &str) -> SdrResult<Self> {
        Ok(Self::new(SimConfig::from_args(args)?))
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Number of tunes issued so far.
    pub fn tune_count(&self) -> u64 {
        self.tune_count
    }

    /// Most recent tunes, oldest first.
    pub fn recent_tunes(&self) -> Vec<SimTune> {
        self.tunes
            .iter()
            .map(|&(at, frequency, lock_time)| SimTune {
                at: self.device_time(at),
                frequency,
                lock_time,
            })
            .collect()
    }

    /// Current device time without advancing the clock.
    pub fn peek_time(&self) -> TimeSpec {
        self.device_time(self.mono)
    }

    pub fn clock_source(&self) -> ClockSource {
        self.clock_source
    }

    pub fn time_source(&self) -> &str {
        &self.time_source
    }

    pub fn subdev(&self) -> &str {
        &self.subdev
    }

    pub fn antenna(&self) -> &str {
        &self.antenna
    }

    /// Whether a command time is currently set.
    pub fn has_command_time(&self) -> bool {
        self.command_time.is_some()
    }

    fn device_time(&self, mono: f64) -> TimeSpec {
        TimeSpec::from_secs(mono + self.epoch)
    }

    fn to_mono(&self, time: TimeSpec) -> f64 {
        time.as_secs() - self.epoch
    }

    /// Advance the clock to `target`, applying PPS and timed GPIO writes.
    fn advance_to(&mut self, target: f64) {
        if target <= self.mono {
            return;
        }
        self.mono = target;

        if let Some((edge, time)) = self.pending_pps {
            if edge <= self.mono {
                self.epoch = time - edge;
                self.pending_pps = None;
                debug!(edge, "Device time latched on PPS");
            }
        }

        if self.pending_gpio.iter().any(|w| w.at <= self.mono) {
            let mono = self.mono;
            let (due, later): (Vec<_>, Vec<_>) =
                self.pending_gpio.drain(..).partition(|w| w.at <= mono);
            self.pending_gpio = later;
            for write in due {
                if let Some(bank) = self.gpio.get_mut(&write.bank) {
                    // Validated when queued
                    let _ = bank.write(write.attr, write.value, write.mask);
                }
            }
        }
    }

    /// Per-call latency.
    fn tick(&mut self) {
        let target = self.mono + self.config.latency;
        self.advance_to(target);
    }

    /// Slot the next command in the queue and return when it executes.
    fn enqueue(&mut self) -> f64 {
        let at = self.command_time.unwrap_or(self.mono);
        let exec = at.max(self.queue_tail).max(self.mono);
        self.queue_tail = exec;
        exec
    }

    /// Slot a command that the caller waits for.
    fn enqueue_blocking(&mut self) -> f64 {
        let exec = self.enqueue();
        self.advance_to(exec);
        exec
    }

    /// LO lock state at `t` (mono seconds).
    fn lo_locked_at(&self, t: f64) -> bool {
        match self.tunes.iter().rev().find(|&&(at, _, _)| at <= t + TIME_EPSILON) {
            Some(&(at, _, lock_time)) => t - at + TIME_EPSILON >= lock_time,
            None => true,
        }
    }

    fn bank_mut(&mut self, bank: &str) -> SdrResult<&mut GpioBank> {
        self.gpio
            .get_mut(bank)
            .ok_or_else(|| SdrError::HardwareError(format!("Unknown GPIO bank: {}", bank)))
    }

    fn unknown_sensor(name: &str) -> SdrError {
        SdrError::HardwareError(format!("Sensor '{}' not found", name))
    }
}

impl RadioDevice for Simulator {
    fn pp_string(&self) -> SdrResult<String> {
        Ok(format!(
            "Single USRP:\n  Device: Simulated USRP\n  Mboard 0: SIM\n  RX Channel: 0\n    RX DSP: 0\n    RX Dboard: A\n    RX Subdev: Simulated RX ({:.0} MHz - {:.0} MHz)",
            self.config.freq_range.0 / 1e6,
            self.config.freq_range.1 / 1e6
        ))
    }

    fn set_clock_source(&mut self, source: ClockSource) -> SdrResult<()> {
        self.tick();
        self.clock_source = source;
        Ok(())
    }

    fn set_time_source(&mut self, source: &str) -> SdrResult<()> {
        self.tick();
        match source {
            "internal" | "external" | "gpsdo" | "mimo" => {
                self.time_source = source.to_string();
                Ok(())
            }
            other => Err(SdrError::HardwareError(format!(
                "Unsupported time source: {}",
                other
            ))),
        }
    }

    fn set_time_now(&mut self, time: TimeSpec) -> SdrResult<()> {
        self.tick();
        let exec = self.enqueue_blocking();
        self.epoch = time.as_secs() - exec;
        Ok(())
    }

    fn set_time_next_pps(&mut self, time: TimeSpec) -> SdrResult<()> {
        self.tick();
        let edge = self.mono.floor() + 1.0;
        self.pending_pps = Some((edge, time.as_secs()));
        Ok(())
    }

    fn time_now(&mut self) -> SdrResult<TimeSpec> {
        self.tick();
        Ok(self.device_time(self.mono))
    }

    fn set_command_time(&mut self, time: TimeSpec) -> SdrResult<()> {
        self.tick();
        self.command_time = Some(self.to_mono(time));
        Ok(())
    }

    fn clear_command_time(&mut self) -> SdrResult<()> {
        self.tick();
        self.command_time = None;
        Ok(())
    }

    fn set_rx_freq(&mut self, request: &TuneRequest) -> SdrResult<TuneResult> {
        self.tick();
        let (min, max) = self.config.freq_range;
        let target = request.lo_frequency();
        if !target.is_finite() {
            return Err(SdrError::HardwareError(format!(
                "Invalid RF frequency: {}",
                target
            )));
        }
        let actual = target.clamp(min, max);

        let exec = if self.command_time.is_some() {
            self.enqueue()
        } else {
            self.enqueue_blocking()
        };
        let lock_time = if request.is_integer_n() {
            self.config.int_n_lock_time
        } else {
            self.config.lock_time
        };

        if self.tunes.len() == TUNE_HISTORY {
            self.tunes.pop_front();
        }
        self.tunes.push_back((exec, actual, lock_time));
        self.tune_count += 1;
        self.rx_freq = actual;
        trace!(frequency = actual, at = exec + self.epoch, "Simulated tune");

        Ok(TuneResult {
            clipped_rf_freq: actual,
            target_rf_freq: target,
            actual_rf_freq: actual,
            target_dsp_freq: 0.0,
            actual_dsp_freq: 0.0,
        })
    }

    fn rx_freq(&mut self) -> SdrResult<f64> {
        self.tick();
        Ok(self.rx_freq)
    }

    fn set_rx_subdev_spec(&mut self, spec: &str) -> SdrResult<()> {
        self.tick();
        let valid = !spec.trim().is_empty()
            && spec.split_whitespace().all(|pair| {
                let mut parts = pair.split(':');
                matches!(
                    (parts.next(), parts.next(), parts.next()),
                    (Some(db), Some(sd), None) if !db.is_empty() && !sd.is_empty()
                )
            });
        if !valid {
            return Err(SdrError::HardwareError(format!(
                "Invalid subdev spec: '{}'",
                spec
            )));
        }
        self.subdev = spec.to_string();
        Ok(())
    }

    fn set_rx_antenna(&mut self, antenna: &str) -> SdrResult<()> {
        self.tick();
        if !self.config.antennas.iter().any(|a| a == antenna) {
            return Err(SdrError::HardwareError(format!(
                "Invalid antenna '{}', expected one of {:?}",
                antenna, self.config.antennas
            )));
        }
        self.antenna = antenna.to_string();
        Ok(())
    }

    fn rx_antennas(&mut self) -> SdrResult<Vec<String>> {
        self.tick();
        Ok(self.config.antennas.clone())
    }

    fn rx_sensor_names(&mut self, _chan: usize) -> SdrResult<Vec<String>> {
        self.tick();
        let mut names = Vec::new();
        if self.config.lo_sensor {
            names.push("lo_locked".to_string());
        }
        Ok(names)
    }

    fn rx_sensor(&mut self, name: &str, chan: usize) -> SdrResult<SensorValue> {
        self.tick();
        if chan != 0 {
            return Err(SdrError::HardwareError(format!("No RX channel {}", chan)));
        }
        match name {
            "lo_locked" if self.config.lo_sensor => {
                let at = self.enqueue_blocking();
                Ok(SensorValue::lock("LO", self.lo_locked_at(at)))
            }
            _ => Err(Self::unknown_sensor(name)),
        }
    }

    fn mboard_sensor_names(&mut self, _mboard: usize) -> SdrResult<Vec<String>> {
        self.tick();
        Ok(vec!["ref_locked".to_string(), "mimo_locked".to_string()])
    }

    fn mboard_sensor(&mut self, name: &str, mboard: usize) -> SdrResult<SensorValue> {
        self.tick();
        if mboard != 0 {
            return Err(SdrError::HardwareError(format!("No motherboard {}", mboard)));
        }
        let external_ok = !self.config.ref_unlocked;
        match name {
            "ref_locked" => Ok(SensorValue::lock(
                "Ref",
                self.clock_source == ClockSource::Internal || external_ok,
            )),
            "mimo_locked" => Ok(SensorValue::lock(
                "MIMO",
                self.clock_source == ClockSource::Mimo && external_ok,
            )),
            _ => Err(Self::unknown_sensor(name)),
        }
    }

    fn set_gpio_attr(
        &mut self,
        bank: &str,
        attr: GpioAttr,
        value: u32,
        mask: u32,
    ) -> SdrResult<()> {
        self.tick();
        if attr == GpioAttr::Readback {
            return Err(SdrError::HardwareError(
                "GPIO attribute READBACK is read-only".to_string(),
            ));
        }
        self.bank_mut(bank)?;

        if self.command_time.is_some() {
            let at = self.enqueue();
            if at > self.mono {
                self.pending_gpio.push(PendingGpio {
                    at,
                    bank: bank.to_string(),
                    attr,
                    value,
                    mask,
                });
                return Ok(());
            }
        } else {
            self.enqueue_blocking();
        }
        self.bank_mut(bank)?.write(attr, value, mask)
    }

    fn gpio_attr(&mut self, bank: &str, attr: GpioAttr) -> SdrResult<u32> {
        self.tick();
        self.enqueue_blocking();
        Ok(self.bank_mut(bank)?.read(attr))
    }

    fn settle(&mut self, duration: Duration) -> SdrResult<()> {
        let target = self.mono + duration.as_secs_f64();
        self.advance_to(target);
        Ok(())
    }
}

/// Driver for `simulator://` connection strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatorDriver;

impl DeviceDriver for SimulatorDriver {
    fn name(&self) -> &str {
        "simulator"
    }

    fn discover(&self) -> Vec<DeviceInfo> {
        vec![DeviceInfo {
            driver: "simulator".to_string(),
            serial: "SIM001".to_string(),
            label: "Simulated USRP".to_string(),
            address: "simulator://".to_string(),
        }]
    }

    fn create_from_string(&self, args: &str) -> SdrResult<Box<dyn RadioDevice>> {
        Ok(Box::new(Simulator::from_args(args)?))
    }
}

/// Create a simulator with default settings.
pub fn create_test_simulator() -> Simulator {
    Simulator::new(SimConfig::default())
}
