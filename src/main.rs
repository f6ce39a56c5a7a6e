use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use pmtu_check::{app, cli};

fn main() -> Result<ExitCode> {
    let args = cli::Cli::parse();
    init_logging(args.verbose, args.quiet);

    let passed = match args.cmd {
        cli::Cmd::Run(opts) => app::run(opts)?,
        cli::Cmd::Simulate(opts) => app::simulate(opts)?,
        cli::Cmd::Mss(opts) => {
            app::mss(opts)?;
            true
        }
    };
    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// INFO by default, one level per -v/-q. RUST_LOG wins when set.
fn init_logging(verbose: u8, quiet: u8) {
    let level = match 2 + i16::from(verbose) - i16::from(quiet) {
        i16::MIN..=0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
