//! UHD LO Tune Benchmark (command-line entry point)

use std::process::ExitCode;

use clap::Parser;
use lotune_cli::bench::{run_bench, BenchArgs};
use lotune_cli::common::{failure_exit, install_cancel_handler, parse_error_exit, setup_logging};

fn main() -> ExitCode {
    let args = match BenchArgs::try_parse() {
        Ok(args) => args,
        Err(err) => return parse_error_exit(err),
    };

    let result = args.resolve().and_then(|config| {
        setup_logging(&config);
        let cancel = install_cancel_handler()?;
        let stdout = std::io::stdout();
        run_bench(&config, cancel, &mut stdout.lock())
    });

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => failure_exit(&err),
    }
}
