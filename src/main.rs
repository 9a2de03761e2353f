use std::process::ExitCode;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use verify_audio::cli::{Cli, VerbosityLevel};
use verify_audio::{CancellationController, ConfigManager, Output, ScanExit, ScanOptions, scan};

/// Exit status for configuration and unrecoverable I/O errors
const FATAL_EXIT: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(FATAL_EXIT)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let config = ConfigManager::load_config(&cli)
        .await
        .context("failed to load configuration")?;
    let verbosity = config.output.verbosity();
    init_tracing(verbosity);

    let options = ScanOptions::from_config(cli.root.clone(), &config)
        .context("invalid configuration")?;

    let controller = CancellationController::new();
    let listener = controller.listen_for_interrupt();

    let result = tokio::select! {
        result = scan::run(options, &controller) => result,
        _ = controller.halted() => {
            // Halting implies cancellation, so running tools are already being
            // killed. Exiting here skips runtime shutdown, which waits on
            // blocking reads.
            std::process::exit(i32::from(ScanExit::Cancelled.code()));
        }
    };
    listener.abort();
    let report = result.context("scan failed")?;

    Output::new(verbosity, config.output.format).emit(&report);
    Ok(report.exit().code())
}

fn init_tracing(verbosity: VerbosityLevel) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
