//! Pieces shared by both binaries: common flags, config loading, logging,
//! device creation and Ctrl+C handling.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{ArgAction, Args};
use lotune_core::cancel::CancelToken;
use lotune_core::config::{LogFormat, LotuneConfig};
use lotune_core::observe::{init_logging, level_for_verbosity};
use lotune_hal::device::RadioDevice;
use lotune_hal::hal::create_default_registry;
use tracing::info;

/// Exit status when usage help was shown.
pub const HELP_EXIT_CODE: u8 = 255;

/// Flags every lotune utility accepts.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct CommonArgs {
    /// Device address args, e.g. "type=b200", "addr=192.168.10.2" or
    /// "simulator://lock_time=0.0002"
    #[arg(long, value_name = "ARGS")]
    pub args: Option<String>,

    /// YAML file with default settings
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log format: pretty, compact or json
    #[arg(long, value_name = "FORMAT")]
    pub log_format: Option<LogFormat>,
}

impl CommonArgs {
    /// Read the config file named by `--config`, or the default search path.
    pub fn load_config(&self) -> Result<LotuneConfig> {
        match &self.config {
            Some(path) => LotuneConfig::load_from(path)
                .with_context(|| format!("Failed to load config {}", path.display())),
            None => LotuneConfig::load().context("Failed to load config"),
        }
    }

    /// Apply flag overrides to `config`.
    pub fn apply(&self, config: &mut LotuneConfig) {
        if let Some(args) = &self.args {
            config.device.args = args.clone();
        }
        if self.verbose > 0 {
            config.logging.level = level_for_verbosity(self.verbose).to_string();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

/// Install the global subscriber for `config`.
pub fn setup_logging(config: &LotuneConfig) {
    init_logging(&config.logging);
}

/// Map a clap parse failure to the process exit status.
///
/// Help exits with 255; version with 0; usage errors keep clap's code.
pub fn parse_error_exit(err: clap::Error) -> ExitCode {
    // Nothing useful to do if stdout/stderr are gone.
    let _ = err.print();
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
            ExitCode::from(HELP_EXIT_CODE)
        }
        ErrorKind::DisplayVersion => ExitCode::SUCCESS,
        _ => ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1)),
    }
}

/// Report a failed run on stderr.
pub fn failure_exit(err: &anyhow::Error) -> ExitCode {
    eprintln!("Error: {:#}", err);
    ExitCode::FAILURE
}

/// Cancel token tripped by Ctrl+C.
pub fn install_cancel_handler() -> Result<CancelToken> {
    let cancel = CancelToken::new();
    let handler_side = cancel.clone();
    ctrlc::set_handler(move || {
        handler_side.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;
    Ok(cancel)
}

/// Create the device and print what was opened.
pub fn open_device<W: Write>(args: &str, out: &mut W) -> Result<Box<dyn RadioDevice>> {
    writeln!(out)?;
    writeln!(out, "Creating the usrp device with: {}...", args)?;
    let device = create_default_registry()
        .create(args)
        .with_context(|| format!("Failed to create device '{}'", args))?;
    let description = device.pp_string().context("Failed to describe device")?;
    writeln!(out, "Using Device: {}", description)?;
    info!(args, "Device ready");
    Ok(device)
}

/// Parse a GPIO line mask in hex (`0x20`) or decimal (`32`).
pub fn parse_line_mask(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    match parsed {
        Ok(0) => Err("line mask selects no lines".to_string()),
        Ok(mask) => Ok(mask),
        Err(e) => Err(format!("invalid line mask '{}': {}", s, e)),
    }
}

/// Round to six significant digits for display.
///
/// Offsets are computed in binary floating point, so `0.00019` may come out
/// as `0.00019000000000000003`; this prints it as `0.00019`.
pub fn sig6(value: f64) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let digits = 5 - value.abs().log10().floor() as i32;
    if digits >= 0 {
        let factor = 10f64.powi(digits);
        (value * factor).round() / factor
    } else {
        let factor = 10f64.powi(-digits);
        (value / factor).round() * factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        common: CommonArgs,
    }

    #[test]
    fn test_parse_line_mask() {
        assert_eq!(parse_line_mask("0xFF"), Ok(0xFF));
        assert_eq!(parse_line_mask("0x20"), Ok(32));
        assert_eq!(parse_line_mask("32"), Ok(32));
        assert!(parse_line_mask("0").is_err());
        assert!(parse_line_mask("0xZZ").is_err());
        assert!(parse_line_mask("-1").is_err());
    }

    #[test]
    fn test_sig6() {
        assert_eq!(sig6(0.000_190_000_000_000_000_03), 0.00019);
        assert_eq!(sig6(0.000_2), 0.0002);
        assert_eq!(sig6(0.0), 0.0);
        assert_eq!(sig6(5e9), 5e9);
        assert_eq!(sig6(0.010_000_123_4), 0.0100001);
    }

    #[test]
    fn test_common_overrides() {
        let cli = TestCli::try_parse_from([
            "test",
            "--args",
            "simulator://",
            "-vv",
            "--log-format",
            "json",
        ])
        .unwrap();
        let mut config = LotuneConfig::default();
        cli.common.apply(&mut config);
        assert_eq!(config.device.args, "simulator://");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_no_flags_keep_config() {
        let cli = TestCli::try_parse_from(["test"]).unwrap();
        let mut config = LotuneConfig::default();
        cli.common.apply(&mut config);
        assert_eq!(config, LotuneConfig::default());
    }

    #[test]
    fn test_help_exit_code() {
        let err = TestCli::try_parse_from(["test", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert_eq!(parse_error_exit(err), ExitCode::from(HELP_EXIT_CODE));
    }

    #[test]
    fn test_open_simulator() {
        let mut out = Vec::new();
        let device = open_device("simulator://", &mut out).unwrap();
        drop(device);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Creating the usrp device with: simulator://..."));
        assert!(text.contains("Using Device: Single USRP"));
    }

    #[test]
    fn test_open_unknown_driver() {
        let mut out = Vec::new();
        let err = open_device("nosuch://", &mut out).err().unwrap();
        assert!(format!("{:#}", err).contains("Unknown driver"));
    }
}
