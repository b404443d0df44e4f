//! UHD Timed GPIO (command-line entry point)

use std::process::ExitCode;

use clap::Parser;
use lotune_cli::common::{failure_exit, parse_error_exit, setup_logging};
use lotune_cli::gpio::{run_gpio, GpioArgs};

fn main() -> ExitCode {
    let args = match GpioArgs::try_parse() {
        Ok(args) => args,
        Err(err) => return parse_error_exit(err),
    };

    let result = args.resolve().and_then(|config| {
        setup_logging(&config);
        let stdout = std::io::stdout();
        run_gpio(&config, &mut stdout.lock())
    });

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => failure_exit(&err),
    }
}
