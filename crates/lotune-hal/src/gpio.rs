//! Timed GPIO exercise
//!
//! Drives a set of front-panel GPIO lines low, then high at a chosen device
//! time, and reads the bank back so the transition can be checked on a
//! scope or logic analyzer.

use std::time::Duration;

use lotune_core::config::GpioConfig;
use lotune_core::timing::TimeSpec;
use tracing::info;

use crate::device::{GpioAttr, RadioDevice, SdrError, SdrResult};

/// Time allowed for the PPS-latched time reset to take effect.
pub const PPS_SETTLE: Duration = Duration::from_secs(1);

/// A fixed low-then-high sequence on one GPIO bank.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedGpioPlan {
    pub bank: String,
    /// Lines to drive
    pub line_mask: u32,
    /// Delay before the high transition; zero means immediately
    pub delay: Duration,
    /// How long to hold before the final readback
    pub hold: Duration,
}

impl Default for TimedGpioPlan {
    fn default() -> Self {
        Self {
            bank: "FP0".to_string(),
            line_mask: 0xFF,
            delay: Duration::ZERO,
            hold: Duration::from_secs(1),
        }
    }
}

/// Register values observed while running a [`TimedGpioPlan`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpioReport {
    /// OUT after driving the lines low
    pub initial_out: u32,
    /// Device time the high transition was issued for
    pub transition_at: TimeSpec,
    /// OUT after the hold
    pub final_out: u32,
    /// READBACK after the hold
    pub final_readback: u32,
}

impl GpioReport {
    /// Whether every masked line went from low to high.
    pub fn transitioned(&self, mask: u32) -> bool {
        self.initial_out & mask == 0 && self.final_out & mask == mask
    }
}

impl TimedGpioPlan {
    /// Build a plan from the `gpio` config section.
    pub fn from_config(config: &GpioConfig) -> SdrResult<Self> {
        let seconds = |name: &str, value: f64| {
            Duration::try_from_secs_f64(value).map_err(|_| {
                SdrError::ConfigError(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    name, value
                ))
            })
        };
        let plan = Self {
            bank: config.bank.clone(),
            line_mask: config.line_mask,
            delay: seconds("delay", config.delay)?,
            hold: seconds("hold", config.hold)?,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> SdrResult<()> {
        if self.bank.trim().is_empty() {
            return Err(SdrError::ConfigError("GPIO bank must be named".to_string()));
        }
        if self.line_mask == 0 {
            return Err(SdrError::ConfigError(
                "GPIO line mask selects no lines".to_string(),
            ));
        }
        Ok(())
    }

    /// Run the sequence.
    pub fn run<D: RadioDevice + ?Sized>(&self, device: &mut D) -> SdrResult<GpioReport> {
        self.validate()?;
        let bank = self.bank.as_str();
        let mask = self.line_mask;

        device.set_time_source("internal")?;
        device.set_time_next_pps(TimeSpec::ZERO)?;
        device.settle(PPS_SETTLE)?;

        device.set_gpio_direction(bank, mask, true)?;
        device.set_gpio_manual(bank, mask)?;
        device.set_gpio_output(bank, mask, false)?;
        let initial_out = device.gpio_attr(bank, GpioAttr::Out)?;
        info!(bank, mask, initial_out, "GPIO lines driven low");

        let transition_at = if self.delay.is_zero() {
            let now = device.time_now()?;
            device.set_gpio_output(bank, mask, true)?;
            now
        } else {
            let at = device.time_now()? + self.delay;
            device.set_command_time(at)?;
            let issued = device.set_gpio_output(bank, mask, true);
            // Never leave later commands timed, even if the write failed.
            device.clear_command_time()?;
            issued?;
            at
        };
        info!(bank, mask, at = %transition_at, "GPIO high transition issued");

        device.settle(self.delay + self.hold)?;
        let final_out = device.gpio_attr(bank, GpioAttr::Out)?;
        let final_readback = device.gpio_value(bank)?;

        Ok(GpioReport {
            initial_out,
            transition_at,
            final_out,
            final_readback,
        })
    }
}
