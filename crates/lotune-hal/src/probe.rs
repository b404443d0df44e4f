//! Device-backed lock probing
//!
//! [`DeviceLockProbe`] drives a [`RadioDevice`] for the lock-boundary search.
//! [`BenchSetup`] performs the one-shot configuration and the reference /
//! LO lock checks that must pass before a search starts.

use std::time::Duration;

use lotune_core::config::{ClockSource, DeviceConfig};
use lotune_core::error::{SearchError, SearchResult};
use lotune_core::search::{LockProbe, LO_LOCKED_SENSOR};
use lotune_core::timing::TimeSpec;
use tracing::{debug, info};

use crate::device::{RadioDevice, SdrError, SdrResult, SensorValue, TuneRequest};

/// RX channel and motherboard probed.
const CHANNEL: usize = 0;
const MBOARD: usize = 0;

/// Time allowed for the front end to settle after setup.
pub const SETUP_SETTLE: Duration = Duration::from_secs(1);

/// Motherboard sensor reporting MIMO-cable reference lock.
pub const MIMO_LOCKED_SENSOR: &str = "mimo_locked";

/// Motherboard sensor reporting external reference lock.
pub const REF_LOCKED_SENSOR: &str = "ref_locked";

impl From<SdrError> for SearchError {
    fn from(err: SdrError) -> Self {
        match err {
            SdrError::ConfigError(msg) => SearchError::InvalidConfig(msg),
            other => SearchError::Hardware(other.to_string()),
        }
    }
}

/// [`LockProbe`] over a radio, using timed commands on RX channel 0.
///
/// Every retune reuses the same request template, so RF/DSP policies and
/// integer-N mode apply to the hop and to the return to baseline alike.
pub struct DeviceLockProbe<'a, D: RadioDevice + ?Sized> {
    device: &'a mut D,
    request: TuneRequest,
}

impl<'a, D: RadioDevice + ?Sized> DeviceLockProbe<'a, D> {
    /// Wrap `device`, retuning with copies of `request`.
    pub fn new(device: &'a mut D, request: TuneRequest) -> Self {
        Self { device, request }
    }

    /// Tune request template used for every retune.
    pub fn request(&self) -> &TuneRequest {
        &self.request
    }

    /// The underlying device.
    pub fn device(&mut self) -> &mut D {
        &mut *self.device
    }

    fn read_lock(&mut self) -> SearchResult<bool> {
        Ok(self.device.rx_sensor(LO_LOCKED_SENSOR, CHANNEL)?.to_bool())
    }
}

impl<D: RadioDevice + ?Sized> LockProbe for DeviceLockProbe<'_, D> {
    fn has_lock_sensor(&mut self) -> SearchResult<bool> {
        Ok(self.device.has_rx_sensor(LO_LOCKED_SENSOR, CHANNEL)?)
    }

    fn now(&mut self) -> SearchResult<TimeSpec> {
        Ok(self.device.time_now()?)
    }

    fn schedule_retune(&mut self, frequency: f64, at: TimeSpec) -> SearchResult<f64> {
        self.device.set_command_time(at)?;
        self.device.set_rx_freq(&self.request.retarget(frequency))?;
        Ok(self.device.rx_freq()?)
    }

    fn query_lock_status(&mut self, at: TimeSpec) -> SearchResult<bool> {
        self.device.set_command_time(at)?;
        self.read_lock()
    }

    fn query_lock_now(&mut self) -> SearchResult<bool> {
        self.read_lock()
    }

    fn reset_to_baseline(&mut self, frequency: f64) -> SearchResult<f64> {
        self.device.clear_command_time()?;
        self.device.set_rx_freq(&self.request.retarget(frequency))?;
        Ok(self.device.rx_freq()?)
    }
}

/// Front-end configuration applied before a search.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchSetup {
    /// Baseline RX frequency in Hz
    pub frequency: f64,
    pub antenna: Option<String>,
    pub subdev: Option<String>,
    pub clock_source: ClockSource,
    /// Request integer-N synthesis
    pub int_n: bool,
}

impl BenchSetup {
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency,
            antenna: None,
            subdev: None,
            clock_source: ClockSource::Internal,
            int_n: false,
        }
    }

    /// Setup for `frequency` using the device section of the config.
    pub fn from_device_config(device: &DeviceConfig, frequency: f64) -> Self {
        Self {
            frequency,
            antenna: device.antenna.clone(),
            subdev: device.subdev.clone(),
            clock_source: device.clock_source,
            int_n: device.int_n,
        }
    }

    /// Tune request for the baseline frequency.
    pub fn tune_request(&self) -> TuneRequest {
        TuneRequest::manual_rf(self.frequency, self.int_n)
    }

    /// Configure the device and wait for it to settle.
    ///
    /// Order matters: the subdevice spec changes channel mapping, so it is
    /// applied before anything addressed by channel.
    pub fn apply<D: RadioDevice + ?Sized>(&self, device: &mut D) -> SdrResult<TuneRequest> {
        device.set_clock_source(self.clock_source)?;

        if let Some(subdev) = &self.subdev {
            device.set_rx_subdev_spec(subdev)?;
        }

        device.set_time_now(TimeSpec::ZERO)?;

        let request = self.tune_request();
        let result = device.set_rx_freq(&request)?;
        info!(
            frequency = self.frequency,
            actual = result.actual_rf_freq,
            int_n = self.int_n,
            "Tuned to baseline"
        );

        if let Some(antenna) = &self.antenna {
            device.set_rx_antenna(antenna)?;
        }

        device.settle(SETUP_SETTLE)?;
        Ok(request)
    }

    /// Verify LO and reference lock.
    ///
    /// Sensors the device does not have are skipped. Returns the sensors
    /// that were checked, in order.
    pub fn check_lock_sensors<D: RadioDevice + ?Sized>(
        &self,
        device: &mut D,
    ) -> SdrResult<Vec<SensorValue>> {
        let mut checked = Vec::new();

        if device.has_rx_sensor(LO_LOCKED_SENSOR, CHANNEL)? {
            checked.push(require_locked(
                device.rx_sensor(LO_LOCKED_SENSOR, CHANNEL)?,
            )?);
        }

        let reference_sensor = match self.clock_source {
            ClockSource::Mimo => Some(MIMO_LOCKED_SENSOR),
            ClockSource::External => Some(REF_LOCKED_SENSOR),
            ClockSource::Internal => None,
        };
        if let Some(name) = reference_sensor {
            if device.has_mboard_sensor(name, MBOARD)? {
                checked.push(require_locked(device.mboard_sensor(name, MBOARD)?)?);
            }
        }

        Ok(checked)
    }
}

fn require_locked(sensor: SensorValue) -> SdrResult<SensorValue> {
    debug!(sensor = %sensor, "Checked lock sensor");
    if sensor.to_bool() {
        Ok(sensor)
    } else {
        Err(SdrError::PreconditionFailed(format!(
            "{} (sensor must report locked)",
            sensor.to_pp_string()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::Simulator;
    use approx::assert_relative_eq;
    use lotune_core::cancel::CancelToken;
    use lotune_core::search::{LockBoundarySearch, NoopObserver, SearchConfig, SearchOutcome};

    fn prepared(args: &str, setup: &BenchSetup) -> (Simulator, TuneRequest) {
        let mut sim = Simulator::from_args(args).unwrap();
        let request = setup.apply(&mut sim).unwrap();
        (sim, request)
    }

    #[test]
    fn test_apply_configures_device() {
        let setup = BenchSetup {
            antenna: Some("RX2".to_string()),
            subdev: Some("A:0".to_string()),
            clock_source: ClockSource::External,
            ..BenchSetup::new(500e6)
        };
        let (mut sim, request) = prepared("", &setup);

        assert_eq!(sim.clock_source(), ClockSource::External);
        assert_eq!(sim.antenna(), "RX2");
        assert_eq!(sim.subdev(), "A:0");
        assert_eq!(sim.rx_freq().unwrap(), 500e6);
        assert!(!request.is_integer_n());
        // Time was zeroed, then the setup settle elapsed
        let now = sim.time_now().unwrap().as_secs();
        assert!((1.0..1.001).contains(&now));
    }

    #[test]
    fn test_check_lock_sensors() {
        let setup = BenchSetup {
            clock_source: ClockSource::External,
            ..BenchSetup::new(500e6)
        };
        let (mut sim, _) = prepared("", &setup);
        let checked = setup.check_lock_sensors(&mut sim).unwrap();
        let names: Vec<_> = checked.iter().map(|s| s.to_pp_string()).collect();
        assert_eq!(names, vec!["LO: locked", "Ref: locked"]);
    }

    #[test]
    fn test_internal_reference_skips_ref_sensor() {
        let setup = BenchSetup::new(500e6);
        let (mut sim, _) = prepared("ref_unlocked", &setup);
        assert_eq!(setup.check_lock_sensors(&mut sim).unwrap().len(), 1);
    }

    #[test]
    fn test_unlocked_reference_fails_precondition() {
        let setup = BenchSetup {
            clock_source: ClockSource::Mimo,
            ..BenchSetup::new(500e6)
        };
        let (mut sim, _) = prepared("ref_unlocked", &setup);
        let err = setup.check_lock_sensors(&mut sim).unwrap_err();
        assert!(matches!(err, SdrError::PreconditionFailed(ref m) if m.contains("MIMO")));
    }

    #[test]
    fn test_unsettled_lo_fails_precondition() {
        let mut sim = Simulator::from_args("lock_time=0.0002").unwrap();
        sim.set_rx_freq(&TuneRequest::manual_rf(1e9, false)).unwrap();
        let err = BenchSetup::new(1e9).check_lock_sensors(&mut sim).unwrap_err();
        assert!(matches!(err, SdrError::PreconditionFailed(_)));
    }

    #[test]
    fn test_sdr_error_conversion() {
        let cfg: SearchError = SdrError::ConfigError("bad".into()).into();
        assert!(cfg.is_configuration());
        let hw: SearchError = SdrError::HardwareError("usb".into()).into();
        assert_eq!(hw, SearchError::Hardware("Hardware error: usb".into()));
    }

    #[test]
    fn test_search_against_simulator() {
        let setup = BenchSetup::new(500e6);
        let (mut sim, request) = prepared("lock_time=0.0002", &setup);

        let search = LockBoundarySearch::new(SearchConfig::new(500e6, 5e9)).unwrap();
        let report = {
            let mut probe = DeviceLockProbe::new(&mut sim, request);
            search.run(&mut probe, &mut NoopObserver).unwrap()
        };

        assert_eq!(report.outcome, SearchOutcome::Exhausted);
        assert_eq!(report.iterations(), 51);
        let first = report.first_unlock().unwrap();
        assert_eq!(first.iteration, 32);
        assert_relative_eq!(first.offset, 0.00019, epsilon = 1e-12);
        assert_relative_eq!(first.lock_time(), 0.0002, epsilon = 1e-12);
        // Every offset below the lock time reads unlocked
        assert_eq!(report.unlocks().count(), 20);
        // Baseline tune + one retune and one reset per iteration
        assert_eq!(sim.tune_count(), 1 + 2 * 51);
        assert_eq!(sim.rx_freq().unwrap(), 500e6);
        assert!(!sim.has_command_time());
    }

    #[test]
    fn test_integer_n_search() {
        let setup = BenchSetup {
            int_n: true,
            ..BenchSetup::new(500e6)
        };
        let (mut sim, request) = prepared("lock_time=0.0002,int_n_lock_time=0.0001", &setup);

        let config = SearchConfig::new(500e6, 5e9).with_stop_on_first_unlock(true);
        let search = LockBoundarySearch::new(config).unwrap();
        let mut probe = DeviceLockProbe::new(&mut sim, request);
        assert!(probe.request().is_integer_n());
        let report = search.run(&mut probe, &mut NoopObserver).unwrap();

        assert_eq!(report.outcome, SearchOutcome::StoppedOnUnlock);
        let boundary = report.boundary().unwrap();
        assert_relative_eq!(boundary.lock_time(), 0.0001, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_lo_sensor() {
        let setup = BenchSetup::new(500e6);
        let (mut sim, request) = prepared("no_lo_sensor", &setup);
        let search = LockBoundarySearch::new(SearchConfig::new(500e6, 5e9)).unwrap();
        let mut probe = DeviceLockProbe::new(&mut sim, request);
        let err = search.run(&mut probe, &mut NoopObserver).unwrap_err();
        assert!(err.is_precondition());
        assert_eq!(sim.tune_count(), 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let setup = BenchSetup::new(500e6);
        let (mut sim, request) = prepared("", &setup);
        let cancel = CancelToken::new();
        cancel.cancel();
        let search = LockBoundarySearch::new(SearchConfig::new(500e6, 5e9))
            .unwrap()
            .with_cancel(cancel);
        let report = {
            let mut probe = DeviceLockProbe::new(&mut sim, request);
            search.run(&mut probe, &mut NoopObserver).unwrap()
        };
        assert_eq!(report.outcome, SearchOutcome::Cancelled);
        assert_eq!(report.iterations(), 0);
        assert_eq!(sim.tune_count(), 1);
    }
}
