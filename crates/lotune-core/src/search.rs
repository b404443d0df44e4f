//! # Lock-Boundary Search
//!
//! Measures how long an LO takes to re-lock after a frequency hop by probing
//! the lock sensor at decreasing offsets after a timed retune.
//!
//! ## Probe Cycle
//!
//! ```text
//!   now      hop_time = now + setup_delay      hop_time + offset
//!    │              │                                 │
//!    ▼              ▼                                 ▼
//! ───┼──────────────┼─────────────────────────────────┼──────────▶ device time
//!    │   retune to next_frequency (timed)    query lo_locked (timed)
//!    │
//!    └─ then: reset to last_frequency, wait for re-lock if unlocked,
//!             offset -= resolution
//! ```
//!
//! The first offset at which the sensor reads unlocked is the boundary: the
//! hop needed `offset + resolution` seconds to lock.
//!
//! ## Example
//!
//! ```rust,ignore
//! use lotune_core::search::{LockBoundarySearch, NoopObserver, SearchConfig};
//!
//! let config = SearchConfig::new(500e6, 5e9);
//! let report = LockBoundarySearch::new(config)?.run(&mut probe, &mut NoopObserver)?;
//! match report.first_unlock() {
//!     Some(b) => println!("hop took {} s", b.lock_time()),
//!     None => println!("no failure observed"),
//! }
//! ```

use crate::cancel::CancelToken;
use crate::error::{SearchError, SearchResult};
use crate::timing::TimeSpec;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name of the LO lock sensor on RX channels.
pub const LO_LOCKED_SENSOR: &str = "lo_locked";

/// Initial probe offset. Covers the worst-case USRP lock time.
pub const DEFAULT_START_OFFSET: f64 = 0.000_500;

/// Default offset decrement per iteration.
pub const DEFAULT_RESOLUTION: f64 = 0.000_010;

/// Lead time between "now" and the scheduled hop.
pub const DEFAULT_SETUP_DELAY: Duration = Duration::from_millis(10);

/// Default bound on the settle wait after an observed unlock.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on iterations a single search may plan.
pub const MAX_ITERATIONS: u64 = 10_000_000;

/// Device capabilities the search needs.
///
/// Implementations own the device handle exclusively; every call blocks
/// until the device has accepted the command.
pub trait LockProbe {
    /// Whether the device exposes a lock sensor to probe.
    fn has_lock_sensor(&mut self) -> SearchResult<bool>;

    /// Current device time.
    fn now(&mut self) -> SearchResult<TimeSpec>;

    /// Schedule a retune to `frequency` at device time `at`.
    ///
    /// Returns the frequency the device reports after accepting the request.
    fn schedule_retune(&mut self, frequency: f64, at: TimeSpec) -> SearchResult<f64>;

    /// Read the lock sensor as of device time `at`.
    fn query_lock_status(&mut self, at: TimeSpec) -> SearchResult<bool>;

    /// Read the lock sensor immediately.
    fn query_lock_now(&mut self) -> SearchResult<bool>;

    /// Return to `frequency` immediately, dropping any pending command time.
    fn reset_to_baseline(&mut self, frequency: f64) -> SearchResult<f64>;
}

/// Hooks for reporting search progress as it happens.
///
/// All methods default to no-ops.
pub trait SearchObserver {
    /// A retune was scheduled.
    fn on_retune(&mut self, _iteration: u64, _frequency: f64, _at: TimeSpec) {}

    /// The lock sensor was read `offset` seconds after the hop.
    fn on_lock_status(&mut self, _iteration: u64, _offset: f64, _locked: bool) {}

    /// The device was returned to the baseline frequency.
    fn on_reset(&mut self, _frequency: f64, _at: TimeSpec) {}

    /// An iteration completed.
    fn on_probe(&mut self, _probe: &ProbeRecord) {}

    /// An unlock was observed; `boundary` is the new candidate.
    fn on_unlock(&mut self, _boundary: &Boundary, _from: f64, _to: f64) {}

    /// The search ended without error.
    fn on_finish(&mut self, _report: &SearchReport) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SearchObserver for NoopObserver {}

/// Search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// First probe offset after the hop, in seconds
    pub start_offset: f64,
    /// Offset decrement per iteration, in seconds
    pub resolution: f64,
    /// Baseline frequency in Hz
    pub last_frequency: f64,
    /// Hop target frequency in Hz
    pub next_frequency: f64,
    /// Lead time before the scheduled hop
    pub setup_delay: Duration,
    /// Bound on the re-lock wait (`None` waits forever)
    pub settle_timeout: Option<Duration>,
    /// End the search at the first observed unlock
    pub stop_on_first_unlock: bool,
}

impl SearchConfig {
    /// Default parameters for a hop from `last_frequency` to `next_frequency`.
    pub fn new(last_frequency: f64, next_frequency: f64) -> Self {
        Self {
            start_offset: DEFAULT_START_OFFSET,
            resolution: DEFAULT_RESOLUTION,
            last_frequency,
            next_frequency,
            setup_delay: DEFAULT_SETUP_DELAY,
            settle_timeout: Some(DEFAULT_SETTLE_TIMEOUT),
            stop_on_first_unlock: false,
        }
    }

    /// Set the initial offset.
    pub fn with_start_offset(mut self, start_offset: f64) -> Self {
        self.start_offset = start_offset;
        self
    }

    /// Set the resolution.
    pub fn with_resolution(mut self, resolution: f64) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the settle timeout.
    pub fn with_settle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Stop at the first observed unlock instead of probing down to zero.
    pub fn with_stop_on_first_unlock(mut self, stop: bool) -> Self {
        self.stop_on_first_unlock = stop;
        self
    }

    /// Check the parameters.
    pub fn validate(&self) -> SearchResult<()> {
        if !self.start_offset.is_finite() || self.start_offset <= 0.0 {
            return Err(SearchError::InvalidConfig(format!(
                "start offset must be > 0 s, got {}",
                self.start_offset
            )));
        }
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(SearchError::InvalidConfig(format!(
                "resolution must be > 0 s, got {}",
                self.resolution
            )));
        }
        if self.resolution >= self.start_offset {
            return Err(SearchError::InvalidConfig(format!(
                "resolution {} s must be smaller than start offset {} s",
                self.resolution, self.start_offset
            )));
        }
        for (name, freq) in [
            ("baseline frequency", self.last_frequency),
            ("hop frequency", self.next_frequency),
        ] {
            if !freq.is_finite() || freq <= 0.0 {
                return Err(SearchError::InvalidConfig(format!(
                    "{} must be > 0 Hz, got {}",
                    name, freq
                )));
            }
        }
        if self.settle_timeout == Some(Duration::ZERO) {
            return Err(SearchError::InvalidConfig(
                "settle timeout must be non-zero (use None for no bound)".to_string(),
            ));
        }
        // Checked as f64 so huge ratios are rejected before the u64 cast.
        let ratio = self.step_ratio();
        if ratio + 1.0 > MAX_ITERATIONS as f64 {
            return Err(SearchError::InvalidConfig(format!(
                "{:.0} iterations planned, limit is {}",
                ratio.floor() + 1.0,
                MAX_ITERATIONS
            )));
        }
        Ok(())
    }

    /// `start_offset / resolution`, nudged up by a relative epsilon.
    ///
    /// The epsilon absorbs representation error in the quotient, so
    /// 0.0005 / 0.00001 counts 50 steps, not 49, while 3.0 - 2e-9 stays
    /// below 3.
    fn step_ratio(&self) -> f64 {
        let ratio = self.start_offset / self.resolution;
        ratio + ratio.abs() * 1e-12
    }

    /// Number of decrements before the offset drops below zero.
    fn steps(&self) -> u64 {
        // `as` saturates; validate() keeps the ratio within MAX_ITERATIONS.
        self.step_ratio().floor() as u64
    }

    /// Iterations a full search runs: `floor(start_offset / resolution) + 1`.
    pub fn planned_iterations(&self) -> u64 {
        self.steps().saturating_add(1)
    }
}

/// Mutable loop state.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningState {
    /// Baseline frequency in Hz
    pub last_frequency: f64,
    /// Hop target in Hz
    pub next_frequency: f64,
    /// Offset probed by the current iteration
    pub current_offset: f64,
    /// Decrement per iteration
    pub resolution: f64,
    start_offset: f64,
    index: u64,
    steps: u64,
}

impl TuningState {
    fn new(config: &SearchConfig) -> Self {
        Self {
            last_frequency: config.last_frequency,
            next_frequency: config.next_frequency,
            current_offset: config.start_offset,
            resolution: config.resolution,
            start_offset: config.start_offset,
            index: 0,
            steps: config.steps(),
        }
    }

    /// 1-based number of the current iteration.
    pub fn iteration(&self) -> u64 {
        self.index + 1
    }

    /// Decrement the offset. Returns `false` once it has dropped below zero.
    fn advance(&mut self) -> bool {
        self.index += 1;
        if self.index > self.steps {
            self.current_offset = self.start_offset - self.index as f64 * self.resolution;
            return false;
        }
        // Derived from the index so rounding never accumulates.
        self.current_offset = (self.start_offset - self.index as f64 * self.resolution).max(0.0);
        true
    }
}

/// A single timed read of the lock sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockObservation {
    /// Device time the sensor was sampled at
    pub timestamp: TimeSpec,
    /// Sensor value
    pub locked: bool,
}

/// Outcome of one search iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRecord {
    /// 1-based iteration number
    pub iteration: u64,
    /// Seconds after the hop the sensor was read
    pub offset: f64,
    /// Device time of the hop
    pub hop_time: TimeSpec,
    /// The sensor read
    pub observation: LockObservation,
    /// Polls needed to see the LO re-lock (0 when it never unlocked)
    pub settle_polls: u64,
}

impl ProbeRecord {
    /// Whether the LO read locked at the probed offset.
    pub fn locked(&self) -> bool {
        self.observation.locked
    }
}

/// A boundary candidate: the offset at which lock was found missing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boundary {
    /// Iteration the unlock was seen in
    pub iteration: u64,
    /// Offset at which the sensor read unlocked
    pub offset: f64,
    /// Resolution of the search
    pub resolution: f64,
}

impl Boundary {
    /// Last offset that was still locked: the hop's lock time.
    pub fn lock_time(&self) -> f64 {
        self.offset + self.resolution
    }
}

/// How a search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The offset dropped below zero
    Exhausted,
    /// Stopped at the first unlock (stop-on-first-unlock mode)
    StoppedOnUnlock,
    /// Cancellation was observed between iterations
    Cancelled,
}

/// Everything a search observed.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
    /// Baseline frequency in Hz
    pub last_frequency: f64,
    /// Hop target in Hz
    pub next_frequency: f64,
    /// Search resolution in seconds
    pub resolution: f64,
    /// One record per completed iteration
    pub probes: Vec<ProbeRecord>,
    /// How the search ended
    pub outcome: SearchOutcome,
}

impl SearchReport {
    /// Completed iterations.
    pub fn iterations(&self) -> usize {
        self.probes.len()
    }

    /// Iterations that read unlocked.
    pub fn unlocks(&self) -> impl Iterator<Item = &ProbeRecord> {
        self.probes.iter().filter(|p| !p.locked())
    }

    /// Whether any iteration read unlocked.
    pub fn lock_failure_observed(&self) -> bool {
        self.unlocks().next().is_some()
    }

    /// Most recent boundary candidate.
    pub fn boundary(&self) -> Option<Boundary> {
        self.unlocks().last().map(|p| self.boundary_for(p))
    }

    /// First boundary candidate: the largest offset that read unlocked.
    pub fn first_unlock(&self) -> Option<Boundary> {
        self.unlocks().next().map(|p| self.boundary_for(p))
    }

    fn boundary_for(&self, probe: &ProbeRecord) -> Boundary {
        Boundary {
            iteration: probe.iteration,
            offset: probe.offset,
            resolution: self.resolution,
        }
    }
}

/// Decrementing linear search for the LO lock boundary.
#[derive(Debug, Clone)]
pub struct LockBoundarySearch {
    config: SearchConfig,
    cancel: CancelToken,
}

impl LockBoundarySearch {
    /// Create a search after validating `config`.
    pub fn new(config: SearchConfig) -> SearchResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Use `cancel` to stop the search between iterations.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Search parameters.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run the search to completion.
    pub fn run<P, O>(&self, probe: &mut P, observer: &mut O) -> SearchResult<SearchReport>
    where
        P: LockProbe + ?Sized,
        O: SearchObserver + ?Sized,
    {
        if !probe.has_lock_sensor()? {
            return Err(SearchError::SensorUnavailable(LO_LOCKED_SENSOR.to_string()));
        }

        let mut state = TuningState::new(&self.config);
        let mut probes = Vec::new();

        info!(
            from = state.last_frequency,
            to = state.next_frequency,
            start_offset = self.config.start_offset,
            resolution = state.resolution,
            iterations = self.config.planned_iterations(),
            "Starting lock-boundary search"
        );

        let outcome = loop {
            if self.cancel.is_cancelled() {
                info!(iteration = state.iteration(), "Search cancelled");
                break SearchOutcome::Cancelled;
            }

            let record = self.probe_once(probe, observer, &state)?;
            let unlocked = !record.locked();
            observer.on_probe(&record);

            if unlocked {
                let boundary = Boundary {
                    iteration: record.iteration,
                    offset: record.offset,
                    resolution: state.resolution,
                };
                info!(
                    offset = boundary.offset,
                    lock_time = boundary.lock_time(),
                    "LO lost lock"
                );
                observer.on_unlock(&boundary, state.last_frequency, state.next_frequency);
            }
            probes.push(record);

            if unlocked && self.config.stop_on_first_unlock {
                break SearchOutcome::StoppedOnUnlock;
            }
            if !state.advance() {
                break SearchOutcome::Exhausted;
            }
        };

        let report = SearchReport {
            last_frequency: self.config.last_frequency,
            next_frequency: self.config.next_frequency,
            resolution: self.config.resolution,
            probes,
            outcome,
        };
        if outcome == SearchOutcome::Exhausted && !report.lock_failure_observed() {
            info!("Device did not report failure to lock LO");
        }
        observer.on_finish(&report);
        Ok(report)
    }

    fn probe_once<P, O>(
        &self,
        probe: &mut P,
        observer: &mut O,
        state: &TuningState,
    ) -> SearchResult<ProbeRecord>
    where
        P: LockProbe + ?Sized,
        O: SearchObserver + ?Sized,
    {
        let iteration = state.iteration();
        let offset = state.current_offset;

        let hop_time = probe.now()? + self.config.setup_delay;
        let tuned = probe.schedule_retune(state.next_frequency, hop_time)?;
        observer.on_retune(iteration, tuned, hop_time);

        let query_time = hop_time + offset;
        let locked = probe.query_lock_status(query_time)?;
        debug!(iteration, offset, locked, "LO lock probe");
        observer.on_lock_status(iteration, offset, locked);

        // Always return to baseline so repeated probes start from the same state.
        let baseline = probe.reset_to_baseline(state.last_frequency)?;
        let reset_at = probe.now()?;
        observer.on_reset(baseline, reset_at);

        let settle_polls = if locked { 0 } else { self.wait_for_lock(probe, offset)? };

        Ok(ProbeRecord {
            iteration,
            offset,
            hop_time,
            observation: LockObservation {
                timestamp: query_time,
                locked,
            },
            settle_polls,
        })
    }

    /// Busy-poll the sensor until the LO reports locked again.
    fn wait_for_lock<P>(&self, probe: &mut P, offset: f64) -> SearchResult<u64>
    where
        P: LockProbe + ?Sized,
    {
        let started = Instant::now();
        let mut polls = 0u64;
        loop {
            polls += 1;
            if probe.query_lock_now()? {
                debug!(polls, "LO re-locked");
                return Ok(polls);
            }
            if let Some(timeout) = self.config.settle_timeout {
                if started.elapsed() >= timeout {
                    warn!(polls, ?timeout, "LO did not re-lock");
                    return Err(SearchError::SettleTimeout {
                        offset,
                        timeout,
                        polls,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Scripted probe: `unlocked_at` lists 1-based iterations whose timed
    /// query reads unlocked.
    #[derive(Default)]
    struct ScriptedProbe {
        unlocked_at: Vec<u64>,
        always_unlocked: bool,
        no_sensor: bool,
        relock_after_polls: u64,
        never_relock: bool,
        clock: f64,
        retunes: Vec<(f64, TimeSpec)>,
        queries: Vec<TimeSpec>,
        resets: Vec<f64>,
        polls: u64,
        fail_on_retune: Option<usize>,
    }

    impl ScriptedProbe {
        fn iteration(&self) -> u64 {
            self.retunes.len() as u64
        }
    }

    impl LockProbe for ScriptedProbe {
        fn has_lock_sensor(&mut self) -> SearchResult<bool> {
            Ok(!self.no_sensor)
        }

        fn now(&mut self) -> SearchResult<TimeSpec> {
            self.clock += 0.001;
            Ok(TimeSpec::from_secs(self.clock))
        }

        fn schedule_retune(&mut self, frequency: f64, at: TimeSpec) -> SearchResult<f64> {
            if self.fail_on_retune == Some(self.retunes.len() + 1) {
                return Err(SearchError::Hardware("tune rejected".to_string()));
            }
            self.retunes.push((frequency, at));
            Ok(frequency)
        }

        fn query_lock_status(&mut self, at: TimeSpec) -> SearchResult<bool> {
            self.queries.push(at);
            let it = self.iteration();
            Ok(!(self.always_unlocked || self.unlocked_at.contains(&it)))
        }

        fn query_lock_now(&mut self) -> SearchResult<bool> {
            self.polls += 1;
            if self.never_relock {
                return Ok(false);
            }
            Ok(self.polls > self.relock_after_polls)
        }

        fn reset_to_baseline(&mut self, frequency: f64) -> SearchResult<f64> {
            self.resets.push(frequency);
            Ok(frequency)
        }
    }

    fn config(start: f64, resolution: f64) -> SearchConfig {
        SearchConfig::new(500e6, 5e9)
            .with_start_offset(start)
            .with_resolution(resolution)
    }

    fn run(config: SearchConfig, probe: &mut ScriptedProbe) -> SearchResult<SearchReport> {
        LockBoundarySearch::new(config)?.run(probe, &mut NoopObserver)
    }

    #[test]
    fn test_iteration_count_matches_floor_plus_one() {
        for (start, res, expected) in [
            (0.0005, 0.00001, 51u64),
            (0.001, 0.0003, 4),
            (1.0, 0.25, 5),
            (0.0007, 0.0002, 4),
            (3.0 - 2e-9, 1.0, 3),
        ] {
            let cfg = config(start, res);
            assert_eq!(cfg.planned_iterations(), expected);

            let mut probe = ScriptedProbe::default();
            let report = run(cfg, &mut probe).unwrap();
            assert_eq!(report.iterations() as u64, expected, "start={start} res={res}");
            assert_eq!(report.outcome, SearchOutcome::Exhausted);
        }
    }

    #[test]
    fn test_offsets_decrease_by_resolution() {
        let mut probe = ScriptedProbe::default();
        let report = run(config(0.001, 0.0003), &mut probe).unwrap();

        for (k, record) in report.probes.iter().enumerate() {
            assert_eq!(record.iteration, k as u64 + 1);
            assert_relative_eq!(record.offset, 0.001 - k as f64 * 0.0003, epsilon = 1e-15);
            assert_relative_eq!(
                record.observation.timestamp - record.hop_time,
                record.offset,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_always_locked_reports_no_failure() {
        let mut probe = ScriptedProbe::default();
        let report = run(config(0.0005, 0.00001), &mut probe).unwrap();

        assert!(!report.lock_failure_observed());
        assert!(report.boundary().is_none());
        assert!(report.first_unlock().is_none());
        assert_eq!(probe.polls, 0);
    }

    #[test]
    fn test_single_unlock_reports_its_offset() {
        let mut probe = ScriptedProbe {
            unlocked_at: vec![4],
            ..Default::default()
        };
        let report = run(config(0.0005, 0.00001), &mut probe).unwrap();

        let boundary = report.boundary().unwrap();
        assert_eq!(boundary.iteration, 4);
        assert_relative_eq!(boundary.offset, 0.0005 - 3.0 * 0.00001, epsilon = 1e-15);
        assert_eq!(report.first_unlock(), Some(boundary));
        assert_eq!(report.probes[3].settle_polls, 1);
    }

    #[test]
    fn test_unlock_below_threshold_first_seen_at_iteration_31() {
        // Loses lock whenever offset <= 0.0002: iterations 31..=51.
        let mut probe = ScriptedProbe {
            unlocked_at: (31..=51).collect(),
            ..Default::default()
        };
        let report = run(config(0.0005, 0.00001), &mut probe).unwrap();

        assert_eq!(report.iterations(), 51);
        let first = report.first_unlock().unwrap();
        assert_eq!(first.iteration, 31);
        assert_relative_eq!(first.offset, 0.0002, epsilon = 1e-12);
        assert_relative_eq!(first.lock_time(), 0.00021, epsilon = 1e-12);

        // Continue mode keeps probing past the first unlock.
        let last = report.boundary().unwrap();
        assert_eq!(last.iteration, 51);
        assert_relative_eq!(last.offset, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reset_once_per_iteration() {
        let mut probe = ScriptedProbe {
            unlocked_at: vec![2, 5, 6],
            ..Default::default()
        };
        let report = run(config(0.001, 0.0001), &mut probe).unwrap();

        assert_eq!(probe.resets.len(), report.iterations());
        assert_eq!(probe.retunes.len(), report.iterations());
        assert_eq!(probe.queries.len(), report.iterations());
        assert!(probe.resets.iter().all(|&f| f == 500e6));
        assert!(probe.retunes.iter().all(|&(f, _)| f == 5e9));
    }

    #[test]
    fn test_chronically_unlocked_still_decrements() {
        let mut probe = ScriptedProbe {
            always_unlocked: true,
            ..Default::default()
        };
        let report = run(config(0.001, 0.0001), &mut probe).unwrap();

        assert_eq!(report.iterations(), 11);
        assert_eq!(report.unlocks().count(), 11);
        assert_eq!(report.outcome, SearchOutcome::Exhausted);
    }

    #[test]
    fn test_stop_on_first_unlock() {
        let mut probe = ScriptedProbe {
            unlocked_at: vec![3, 4, 5],
            ..Default::default()
        };
        let cfg = config(0.001, 0.0001).with_stop_on_first_unlock(true);
        let report = run(cfg, &mut probe).unwrap();

        assert_eq!(report.outcome, SearchOutcome::StoppedOnUnlock);
        assert_eq!(report.iterations(), 3);
        assert_eq!(report.boundary().unwrap().iteration, 3);
    }

    #[test]
    fn test_hop_scheduled_after_setup_delay() {
        let mut probe = ScriptedProbe::default();
        run(config(0.001, 0.0005), &mut probe).unwrap();

        // First now() returns 0.001; hop is 10 ms later.
        assert_relative_eq!(probe.retunes[0].1.as_secs(), 0.011, epsilon = 1e-12);
        assert_relative_eq!(probe.queries[0].as_secs(), 0.012, epsilon = 1e-12);
    }

    #[test]
    fn test_settle_waits_for_relock() {
        let mut probe = ScriptedProbe {
            unlocked_at: vec![1],
            relock_after_polls: 7,
            ..Default::default()
        };
        let report = run(config(0.001, 0.0005), &mut probe).unwrap();
        assert_eq!(report.probes[0].settle_polls, 8);
        assert_eq!(report.probes[1].settle_polls, 0);
    }

    #[test]
    fn test_settle_timeout() {
        let mut probe = ScriptedProbe {
            unlocked_at: vec![2],
            never_relock: true,
            ..Default::default()
        };
        let cfg = config(0.001, 0.0005).with_settle_timeout(Some(Duration::from_millis(5)));
        let err = run(cfg, &mut probe).unwrap_err();

        match err {
            SearchError::SettleTimeout { offset, polls, .. } => {
                assert_relative_eq!(offset, 0.0005, epsilon = 1e-15);
                assert!(polls >= 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(probe.resets.len(), 2);
    }

    #[test]
    fn test_cancellation_between_iterations() {
        struct CancelAfter {
            token: CancelToken,
            after: u64,
        }
        impl SearchObserver for CancelAfter {
            fn on_probe(&mut self, probe: &ProbeRecord) {
                if probe.iteration == self.after {
                    self.token.cancel();
                }
            }
        }

        let token = CancelToken::new();
        let mut observer = CancelAfter {
            token: token.clone(),
            after: 3,
        };
        let mut probe = ScriptedProbe::default();
        let report = LockBoundarySearch::new(config(0.0005, 0.00001))
            .unwrap()
            .with_cancel(token)
            .run(&mut probe, &mut observer)
            .unwrap();

        assert_eq!(report.outcome, SearchOutcome::Cancelled);
        assert_eq!(report.iterations(), 3);
        assert_eq!(probe.retunes.len(), 3);
        assert_eq!(probe.queries.len(), 3);
        assert_eq!(probe.resets.len(), 3);
    }

    #[test]
    fn test_cancelled_before_start_touches_nothing() {
        let token = CancelToken::new();
        token.cancel();
        let mut probe = ScriptedProbe::default();
        let report = LockBoundarySearch::new(config(0.001, 0.0001))
            .unwrap()
            .with_cancel(token)
            .run(&mut probe, &mut NoopObserver)
            .unwrap();

        assert_eq!(report.iterations(), 0);
        assert!(probe.retunes.is_empty());
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let bad = [
            config(0.001, 0.0),
            config(0.001, -0.0001),
            config(0.001, 0.001),
            config(0.001, 0.002),
            config(0.0, 0.0001),
            config(f64::NAN, 0.0001),
            SearchConfig::new(0.0, 5e9),
            config(0.001, 0.0001).with_settle_timeout(Some(Duration::ZERO)),
            config(1.0, 1e-9),
            config(1e20, 1.0),
            config(f64::MAX, f64::MIN_POSITIVE),
        ];
        for cfg in bad {
            let err = LockBoundarySearch::new(cfg.clone()).unwrap_err();
            assert!(err.is_configuration(), "{cfg:?} gave {err}");
        }
    }

    #[test]
    fn test_missing_sensor_is_precondition_failure() {
        let mut probe = ScriptedProbe {
            no_sensor: true,
            ..Default::default()
        };
        let err = run(config(0.001, 0.0001), &mut probe).unwrap_err();
        assert_eq!(err, SearchError::SensorUnavailable("lo_locked".to_string()));
        assert!(probe.retunes.is_empty());
    }

    #[test]
    fn test_hardware_failure_propagates() {
        let mut probe = ScriptedProbe {
            fail_on_retune: Some(2),
            ..Default::default()
        };
        let err = run(config(0.001, 0.0001), &mut probe).unwrap_err();
        assert_eq!(err, SearchError::Hardware("tune rejected".to_string()));
        assert_eq!(probe.resets.len(), 1);
    }

    #[test]
    fn test_observer_sees_events_in_order() {
        #[derive(Default)]
        struct Recorder(Vec<String>);
        impl SearchObserver for Recorder {
            fn on_retune(&mut self, iteration: u64, _f: f64, _at: TimeSpec) {
                self.0.push(format!("retune{iteration}"));
            }
            fn on_lock_status(&mut self, iteration: u64, _offset: f64, locked: bool) {
                self.0.push(format!("status{iteration}:{locked}"));
            }
            fn on_reset(&mut self, _f: f64, _at: TimeSpec) {
                self.0.push("reset".to_string());
            }
            fn on_unlock(&mut self, b: &Boundary, _from: f64, _to: f64) {
                self.0.push(format!("unlock{}", b.iteration));
            }
            fn on_finish(&mut self, _r: &SearchReport) {
                self.0.push("finish".to_string());
            }
        }

        let mut probe = ScriptedProbe {
            unlocked_at: vec![2],
            ..Default::default()
        };
        let mut recorder = Recorder::default();
        LockBoundarySearch::new(config(0.001, 0.0005))
            .unwrap()
            .run(&mut probe, &mut recorder)
            .unwrap();

        assert_eq!(
            recorder.0,
            vec![
                "retune1", "status1:true", "reset",
                "retune2", "status2:false", "reset", "unlock2",
                "retune3", "status3:true", "reset",
                "finish",
            ]
        );
    }
}
