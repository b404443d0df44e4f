//! # lotune Core Library
//!
//! Core logic for measuring local-oscillator (LO) re-lock latency on SDR
//! hardware.
//!
//! ## Overview
//!
//! After a frequency hop, an LO needs a short time to lock on the new
//! frequency. This crate finds that time with a decrementing linear search:
//! it schedules a timed retune, reads the lock sensor a known offset after
//! the hop, and shrinks the offset by a fixed resolution until the sensor
//! reports unlocked.
//!
//! - **Search**: [`LockBoundarySearch`] over any [`LockProbe`]
//! - **Timing**: device-clock [`TimeSpec`] timestamps
//! - **Cancellation**: [`CancelToken`] checked between iterations
//! - **Configuration**: optional YAML defaults ([`config::LotuneConfig`])
//! - **Logging**: `tracing` subscriber setup ([`observe::init_logging`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use lotune_core::{CancelToken, LockBoundarySearch, NoopObserver, SearchConfig};
//!
//! let config = SearchConfig::new(500e6, 5e9).with_resolution(10e-6);
//! let report = LockBoundarySearch::new(config)?
//!     .with_cancel(CancelToken::new())
//!     .run(&mut probe, &mut NoopObserver)?;
//!
//! if let Some(boundary) = report.first_unlock() {
//!     println!("hop took {} s", boundary.lock_time());
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod observe;
pub mod search;
pub mod timing;

pub use cancel::CancelToken;
pub use config::{ClockSource, ConfigError, LotuneConfig};
pub use error::{SearchError, SearchResult};
pub use search::{
    Boundary, LockBoundarySearch, LockObservation, LockProbe, NoopObserver, ProbeRecord,
    SearchConfig, SearchObserver, SearchOutcome, SearchReport, TuningState,
};
pub use timing::TimeSpec;
