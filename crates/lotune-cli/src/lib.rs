//! # lotune command-line tools
//!
//! Two utilities built on [`lotune_hal`]:
//!
//! - `lo-tune-bench`: measures LO re-lock latency after a timed hop
//!   ([`bench::run_bench`])
//! - `timed-gpio`: drives front-panel GPIO lines high at a timed instant
//!   ([`gpio::run_gpio`])
//!
//! Both take `--args` for the device address. `simulator://` selects the
//! built-in virtual device, anything else goes to UHD.

pub mod bench;
pub mod common;
pub mod gpio;
