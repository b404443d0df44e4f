//! # Observability
//!
//! Structured logging via `tracing`. Library code emits events with
//! `tracing::{info, debug, warn}`; binaries call [`init_logging`] once.

pub mod logging;

pub use logging::{init_logging, level_for_verbosity};
