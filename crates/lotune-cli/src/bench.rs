//! `lo-tune-bench`: LO re-lock latency benchmark.

use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use lotune_core::cancel::CancelToken;
use lotune_core::config::{ClockSource, LotuneConfig};
use lotune_core::search::{
    Boundary, LockBoundarySearch, ProbeRecord, SearchObserver, SearchOutcome, SearchReport,
};
use lotune_core::timing::TimeSpec;
use lotune_hal::probe::{BenchSetup, DeviceLockProbe};
use tracing::info;

use crate::common::{open_device, sig6, CommonArgs};

/// Measure how long the LO takes to re-lock after a timed frequency hop.
///
/// The device is tuned to FREQ, then repeatedly hopped to HOP_FREQ with a
/// timed command while the LO lock sensor is read OFFSET seconds after the
/// hop. The offset shrinks by RESOLUTION each round until the sensor reports
/// unlocked.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "lo-tune-bench", version, about = "UHD LO Tune Benchmark")]
pub struct BenchArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Baseline RF center frequency in Hz [default: 500e6]
    #[arg(long, value_name = "HZ")]
    pub freq: Option<f64>,

    /// Hop target frequency in Hz [default: 5e9]
    #[arg(long, value_name = "HZ")]
    pub hop_freq: Option<f64>,

    /// RX antenna selection
    #[arg(long, value_name = "NAME")]
    pub ant: Option<String>,

    /// RX subdevice specification
    #[arg(long, value_name = "SPEC")]
    pub subdev: Option<String>,

    /// Offset decrement per round in seconds [default: 1e-5]
    #[arg(long, value_name = "SECONDS")]
    pub resolution: Option<f64>,

    /// First offset after the hop in seconds [default: 500e-6]
    #[arg(long, value_name = "SECONDS")]
    pub offset: Option<f64>,

    /// Reference source: internal, external or mimo [default: internal]
    #[arg(long = "ref", value_name = "SOURCE")]
    pub reference: Option<ClockSource>,

    /// Tune with integer-N synthesis
    #[arg(long)]
    pub int_n: bool,

    /// Give up waiting for an unlocked LO after this many seconds, 0 = never
    /// [default: 5]
    #[arg(long, value_name = "SECONDS")]
    pub settle_timeout: Option<f64>,

    /// Stop at the first unlock instead of scanning down to zero
    #[arg(long)]
    pub stop_on_first_unlock: bool,
}

impl BenchArgs {
    /// Apply flag overrides to `config`.
    pub fn apply(&self, config: &mut LotuneConfig) {
        self.common.apply(config);

        let device = &mut config.device;
        if let Some(ant) = &self.ant {
            device.antenna = Some(ant.clone());
        }
        if let Some(subdev) = &self.subdev {
            device.subdev = Some(subdev.clone());
        }
        if let Some(reference) = self.reference {
            device.clock_source = reference;
        }
        device.int_n |= self.int_n;

        let bench = &mut config.bench;
        if let Some(freq) = self.freq {
            bench.frequency = freq;
        }
        if let Some(hop_freq) = self.hop_freq {
            bench.hop_frequency = hop_freq;
        }
        if let Some(resolution) = self.resolution {
            bench.resolution = resolution;
        }
        if let Some(offset) = self.offset {
            bench.start_offset = offset;
        }
        if let Some(timeout) = self.settle_timeout {
            bench.settle_timeout = timeout;
        }
        bench.stop_on_first_unlock |= self.stop_on_first_unlock;
    }

    /// Config file merged with flags, validated.
    pub fn resolve(&self) -> Result<LotuneConfig> {
        let mut config = self.common.load_config()?;
        self.apply(&mut config);
        config.validate().context("Invalid benchmark settings")?;
        Ok(config)
    }
}

/// Prints search progress in the benchmark's console format.
pub struct ConsoleObserver<W: Write> {
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> ConsoleObserver<W> {
    /// Observer writing to `out`.
    pub fn new(out: W) -> Self {
        Self { out, error: None }
    }

    /// Surface the first write error, if any.
    pub fn finish(self) -> io::Result<W> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.out),
        }
    }

    fn line(&mut self, args: std::fmt::Arguments<'_>) {
        if self.error.is_none() {
            if let Err(err) = self.out.write_fmt(args).and_then(|_| self.out.write_all(b"\n")) {
                self.error = Some(err);
            }
        }
    }
}

impl<W: Write> SearchObserver for ConsoleObserver<W> {
    fn on_retune(&mut self, _iteration: u64, frequency: f64, at: TimeSpec) {
        self.line(format_args!(
            "Setting frequency to: {} at {}",
            frequency,
            sig6(at.frac_secs())
        ));
    }

    fn on_lock_status(&mut self, _iteration: u64, offset: f64, locked: bool) {
        self.line(format_args!(
            "LO-lock status: {} after {} seconds",
            u8::from(locked),
            sig6(offset)
        ));
    }

    fn on_reset(&mut self, frequency: f64, at: TimeSpec) {
        self.line(format_args!(
            "Resetting frequency to: {} at {}",
            frequency,
            sig6(at.frac_secs())
        ));
    }

    fn on_probe(&mut self, _probe: &ProbeRecord) {
        self.line(format_args!(""));
    }

    fn on_unlock(&mut self, boundary: &Boundary, from: f64, to: f64) {
        self.line(format_args!(
            "Hop from {} to {} took {} seconds!",
            from,
            to,
            sig6(boundary.lock_time())
        ));
        self.line(format_args!(""));
    }

    fn on_finish(&mut self, report: &SearchReport) {
        match report.outcome {
            SearchOutcome::Exhausted if !report.lock_failure_observed() => {
                self.line(format_args!("\nDevice did not report failure to lock LO.\n"));
            }
            SearchOutcome::Cancelled => {
                self.line(format_args!(
                    "Interrupted after {} rounds.",
                    report.iterations()
                ));
            }
            _ => {}
        }
        if let Some(first) = report.first_unlock() {
            self.line(format_args!(
                "First unlock at {} seconds after the hop: lock time {} seconds",
                sig6(first.offset),
                sig6(first.lock_time())
            ));
        }
    }
}

/// Run the benchmark against the configured device.
pub fn run_bench<W: Write>(
    config: &LotuneConfig,
    cancel: CancelToken,
    out: &mut W,
) -> Result<SearchReport> {
    // Reject bad search parameters before touching the device.
    let search_config = config
        .bench
        .search_config()
        .context("Invalid search parameters")?;
    let search = LockBoundarySearch::new(search_config)
        .context("Invalid search parameters")?
        .with_cancel(cancel);

    let mut device = open_device(&config.device.args, out)?;

    let setup = BenchSetup::from_device_config(&config.device, config.bench.frequency);
    writeln!(out, "Setting device timestamp to 0...")?;
    let request = setup
        .apply(device.as_mut())
        .context("Failed to configure device")?;

    for sensor in setup
        .check_lock_sensors(device.as_mut())
        .context("Lock check failed")?
    {
        writeln!(out, "Checking RX: {} ...", sensor.to_pp_string())?;
    }
    writeln!(out)?;

    info!(
        from = config.bench.frequency,
        to = config.bench.hop_frequency,
        int_n = setup.int_n,
        "Starting LO tune benchmark"
    );

    let mut probe = DeviceLockProbe::new(device.as_mut(), request);
    let mut observer = ConsoleObserver::new(&mut *out);
    let report = search
        .run(&mut probe, &mut observer)
        .context("LO tune benchmark failed")?;
    observer.finish()?;

    writeln!(out)?;
    writeln!(out, "Done!")?;
    writeln!(out)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lotune_core::error::SearchError;
    use std::io::Write as _;

    fn sim_config(args: &str) -> LotuneConfig {
        let mut config = LotuneConfig::default();
        config.device.args = args.to_string();
        config
    }

    fn run_to_string(config: &LotuneConfig) -> (Result<SearchReport>, String) {
        let mut out = Vec::new();
        let result = run_bench(config, CancelToken::new(), &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_flags_override_config() {
        let args = BenchArgs::try_parse_from([
            "lo-tune-bench",
            "--freq",
            "2.4e9",
            "--hop-freq",
            "1e9",
            "--ref",
            "external",
            "--int-n",
            "--resolution",
            "5e-6",
            "--settle-timeout",
            "0",
            "--stop-on-first-unlock",
            "--ant",
            "RX2",
        ])
        .unwrap();
        let mut config = LotuneConfig::default();
        args.apply(&mut config);

        assert_eq!(config.bench.frequency, 2.4e9);
        assert_eq!(config.bench.hop_frequency, 1e9);
        assert_eq!(config.bench.resolution, 5e-6);
        assert_eq!(config.device.clock_source, ClockSource::External);
        assert_eq!(config.device.antenna.as_deref(), Some("RX2"));
        assert!(config.device.int_n);
        assert!(config.bench.stop_on_first_unlock);
        assert_eq!(config.bench.search_config().unwrap().settle_timeout, None);
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let err = BenchArgs::try_parse_from(["lo-tune-bench", "--ref", "gpsdo"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_resolve_reads_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "device:\n  args: \"simulator://\"\nbench:\n  frequency: 1.0e9\n  resolution: 2.0e-5"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args =
            BenchArgs::try_parse_from(["lo-tune-bench", "--config", &path, "--freq", "7e8"])
                .unwrap();
        let config = args.resolve().unwrap();
        assert_eq!(config.device.args, "simulator://");
        assert_eq!(config.bench.frequency, 7e8);
        assert_eq!(config.bench.resolution, 2e-5);
    }

    #[test]
    fn test_resolve_rejects_bad_resolution() {
        let args = BenchArgs::try_parse_from([
            "lo-tune-bench",
            "--config",
            "/nonexistent/lotune.yaml",
        ])
        .unwrap();
        assert!(args.resolve().is_err());

        let mut config = LotuneConfig::default();
        BenchArgs::try_parse_from(["lo-tune-bench", "--resolution", "0.001"])
            .unwrap()
            .apply(&mut config);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bench_on_simulator() {
        let (result, text) = run_to_string(&sim_config("simulator://lock_time=0.0002"));
        let report = result.unwrap();

        assert_eq!(report.iterations(), 51);
        assert_eq!(report.outcome, SearchOutcome::Exhausted);
        assert_relative_eq!(report.first_unlock().unwrap().lock_time(), 0.0002, epsilon = 1e-12);

        assert!(text.contains("Creating the usrp device with: simulator://lock_time=0.0002..."));
        assert!(text.contains("Setting device timestamp to 0..."));
        assert!(text.contains("Checking RX: LO: locked ..."));
        assert!(text.contains("Setting frequency to: 5000000000 at "));
        assert!(text.contains("LO-lock status: 1 after 0.0005 seconds"));
        assert!(text.contains("LO-lock status: 0 after 0.00019 seconds"));
        assert!(text.contains("Resetting frequency to: 500000000 at "));
        assert!(text.contains("Hop from 500000000 to 5000000000 took 0.0002 seconds!"));
        assert!(!text.contains("Device did not report failure to lock LO."));
        assert!(text.trim_end().ends_with("Done!"));
    }

    #[test]
    fn test_bench_without_unlock() {
        let mut config = sim_config("simulator://lock_time=0.00001,int_n_lock_time=0");
        config.device.int_n = true;
        config.bench.start_offset = 0.0001;
        let (result, text) = run_to_string(&config);

        let report = result.unwrap();
        assert_eq!(report.iterations(), 11);
        assert!(report.boundary().is_none());
        assert!(text.contains("Device did not report failure to lock LO."));
    }

    #[test]
    fn test_bench_stop_on_first_unlock() {
        let mut config = sim_config("simulator://lock_time=0.0002");
        config.bench.stop_on_first_unlock = true;
        let (result, text) = run_to_string(&config);

        let report = result.unwrap();
        assert_eq!(report.outcome, SearchOutcome::StoppedOnUnlock);
        assert_eq!(report.iterations(), 32);
        assert_eq!(text.matches("took").count(), 1);
    }

    #[test]
    fn test_bench_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut out = Vec::new();
        let report = run_bench(&sim_config("simulator://"), cancel, &mut out).unwrap();
        assert_eq!(report.outcome, SearchOutcome::Cancelled);
        assert!(String::from_utf8(out).unwrap().contains("Interrupted after 0 rounds."));
    }

    #[test]
    fn test_bench_missing_lo_sensor() {
        let (result, _) = run_to_string(&sim_config("simulator://no_lo_sensor"));
        let err = result.unwrap_err();
        let search_err = err.downcast_ref::<SearchError>().unwrap();
        assert!(search_err.is_precondition());
    }

    #[test]
    fn test_bench_reference_unlocked() {
        let mut config = sim_config("simulator://ref_unlocked");
        config.device.clock_source = ClockSource::External;
        let (result, text) = run_to_string(&config);
        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("Ref: unlocked"));
        assert!(!text.contains("Setting frequency to"));
    }

    #[test]
    fn test_huge_offset_ratio_rejected() {
        let args = BenchArgs::try_parse_from([
            "lo-tune-bench",
            "--args",
            "simulator://",
            "--offset",
            "1e20",
            "--resolution",
            "1",
        ])
        .unwrap();
        let mut config = LotuneConfig::default();
        args.apply(&mut config);
        assert!(config.validate().is_err());

        let (result, text) = run_to_string(&config);
        assert!(result.is_err());
        assert!(text.is_empty());
    }

    #[test]
    fn test_bad_durations_fail_before_device() {
        for (setup_delay, settle_timeout) in [(-1.0, 5.0), (0.010, f64::NAN), (0.010, 1e30)] {
            let mut config = sim_config("simulator://");
            config.bench.setup_delay = setup_delay;
            config.bench.settle_timeout = settle_timeout;
            let (result, text) = run_to_string(&config);
            assert!(result.is_err(), "setup_delay={setup_delay} settle_timeout={settle_timeout}");
            assert!(text.is_empty());
        }
    }

    #[test]
    fn test_bench_invalid_search_before_device() {
        let mut config = sim_config("simulator://");
        config.bench.resolution = 0.0;
        let (result, text) = run_to_string(&config);
        assert!(result.is_err());
        assert!(text.is_empty());
    }
}
