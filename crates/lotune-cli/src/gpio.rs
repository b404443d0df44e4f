//! `timed-gpio`: drive front-panel GPIO lines high at a timed instant.

use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use lotune_core::config::LotuneConfig;
use lotune_hal::gpio::{GpioReport, TimedGpioPlan};

use crate::common::{open_device, parse_line_mask, sig6, CommonArgs};

/// Drive GPIO lines low, then high after an optional delay, and read the bank
/// back.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "timed-gpio", version, about = "UHD Timed GPIO Example")]
pub struct GpioArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// GPIO bank name [default: FP0]
    #[arg(long, value_name = "BANK")]
    pub bank: Option<String>,

    /// Lines to drive, hex (0x20) or decimal [default: 0xFF]
    #[arg(long, value_name = "MASK", value_parser = parse_line_mask)]
    pub line: Option<u32>,

    /// Seconds to wait before driving the lines high, 0 = immediately
    #[arg(long, value_name = "SECONDS")]
    pub delay: Option<f64>,

    /// Seconds to hold before reading back [default: 1]
    #[arg(long, value_name = "SECONDS")]
    pub hold: Option<f64>,
}

impl GpioArgs {
    pub fn apply(&self, config: &mut LotuneConfig) {
        self.common.apply(config);
        let gpio = &mut config.gpio;
        if let Some(bank) = &self.bank {
            gpio.bank = bank.clone();
        }
        if let Some(line) = self.line {
            gpio.line_mask = line;
        }
        if let Some(delay) = self.delay {
            gpio.delay = delay;
        }
        if let Some(hold) = self.hold {
            gpio.hold = hold;
        }
    }

    /// Config file merged with flags, validated.
    pub fn resolve(&self) -> Result<LotuneConfig> {
        let mut config = self.common.load_config()?;
        self.apply(&mut config);
        config.validate().context("Invalid GPIO settings")?;
        Ok(config)
    }
}

/// Run the timed GPIO sequence against the configured device.
pub fn run_gpio<W: Write>(config: &LotuneConfig, out: &mut W) -> Result<GpioReport> {
    let plan = TimedGpioPlan::from_config(&config.gpio).context("Invalid GPIO settings")?;
    let mut device = open_device(&config.device.args, out)?;

    writeln!(out, "Setting device timestamp to 0...")?;
    let report = plan
        .run(device.as_mut())
        .with_context(|| format!("Timed GPIO on bank {} failed", plan.bank))?;

    writeln!(out, "GPIO OUT Readback: {:#x}", report.initial_out)?;
    if plan.delay.is_zero() {
        writeln!(out, "Driving lines {:#x} high now", plan.line_mask)?;
    } else {
        writeln!(
            out,
            "Driving lines {:#x} high at {} seconds",
            plan.line_mask,
            sig6(report.transition_at.as_secs())
        )?;
    }
    writeln!(out, "GPIO OUT Readback: {:#x}", report.final_out)?;
    writeln!(out, "GPIO READBACK: {:#x}", report.final_readback)?;
    if !report.transitioned(plan.line_mask) {
        writeln!(out, "Warning: lines {:#x} did not all go high", plan.line_mask)?;
    }

    writeln!(out)?;
    writeln!(out, "Done!")?;
    writeln!(out)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_config() -> LotuneConfig {
        let mut config = LotuneConfig::default();
        config.device.args = "simulator://latency=0".to_string();
        config
    }

    #[test]
    fn test_flags_override_config() {
        let args = GpioArgs::try_parse_from([
            "timed-gpio",
            "--bank",
            "FP0",
            "--line",
            "0x20",
            "--delay",
            "0.5",
            "--hold",
            "0.25",
        ])
        .unwrap();
        let mut config = LotuneConfig::default();
        args.apply(&mut config);
        assert_eq!(config.gpio.line_mask, 0x20);
        assert_eq!(config.gpio.delay, 0.5);
        assert_eq!(config.gpio.hold, 0.25);
    }

    #[test]
    fn test_zero_line_mask_rejected() {
        let err = GpioArgs::try_parse_from(["timed-gpio", "--line", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_negative_delay_rejected() {
        let mut config = sim_config();
        config.gpio.delay = -1.0;
        let mut out = Vec::new();
        assert!(run_gpio(&config, &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_gpio_immediate() {
        let mut out = Vec::new();
        let report = run_gpio(&sim_config(), &mut out).unwrap();
        assert_eq!(report.final_out, 0xFF);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("GPIO OUT Readback: 0x0"));
        assert!(text.contains("Driving lines 0xff high now"));
        assert!(text.contains("GPIO OUT Readback: 0xff"));
        assert!(text.contains("GPIO READBACK: 0xff"));
        assert!(!text.contains("Warning"));
        assert!(text.trim_end().ends_with("Done!"));
    }

    #[test]
    fn test_gpio_delayed() {
        let mut config = sim_config();
        config.gpio.line_mask = 0x20;
        config.gpio.delay = 0.5;
        config.gpio.hold = 0.1;
        let mut out = Vec::new();
        let report = run_gpio(&config, &mut out).unwrap();
        assert!(report.transitioned(0x20));

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Driving lines 0x20 high at 0.5 seconds"));
        assert!(text.contains("GPIO READBACK: 0x20"));
    }

    #[test]
    fn test_gpio_unknown_bank() {
        let mut config = sim_config();
        config.gpio.bank = "FP7".to_string();
        let mut out = Vec::new();
        let err = run_gpio(&config, &mut out).unwrap_err();
        assert!(format!("{:#}", err).contains("bank FP7"));
    }
}
