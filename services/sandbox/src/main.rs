use clap::Parser;
use hearth_config::{init_tracing, LoggingConfig};
use hearth_sandbox::{Cli, Command};
use std::process::ExitCode;
use tracing::debug;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let Command::Serve(args) = cli.command;

    // Sandbox stderr is forwarded by the supervisor, keep it quiet by default
    let logging = LoggingConfig {
        level: if args.verbose { "debug" } else { "warn" }.into(),
        ..LoggingConfig::default()
    };
    init_tracing(&logging);
    debug!(?args, "Starting sandbox");

    match hearth_sandbox::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The supervisor scrapes this line to classify startup failures
            eprintln!("*** Fatal uncaught exception: {e}");
            ExitCode::FAILURE
        }
    }
}
