//! `truthloop` entry point.

use std::process::ExitCode;
use truthloop_cli::{build_checker, load_config, run, telemetry, CliResult, Invocation};

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init_tracing();
    match execute().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn execute() -> CliResult<()> {
    let invocation = Invocation::from_env()?;
    let config = load_config(invocation.config_path.as_deref())?;
    let checker = build_checker(&config)?;

    tokio::select! {
        result = run(&checker, invocation.command) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            Ok(())
        }
    }
}
