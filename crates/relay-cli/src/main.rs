//! `relay` - operator command line for the task ledger

mod cli;
mod commands;
mod logging;

use anyhow::Context;
use relay_core::RelayConfig;
use std::path::PathBuf;
use std::process::ExitCode;

/// How a successful command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    /// `next` or `plan` found a stalled queue
    Stalled,
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli::build().get_matches();

    match run(&matches).await {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::Stalled) => ExitCode::from(2),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(matches: &clap::ArgMatches) -> anyhow::Result<Outcome> {
    let config_path = matches.get_one::<PathBuf>("config");
    let mut config = RelayConfig::load(config_path.map(PathBuf::as_path))
        .context("failed to load configuration")?;
    if let Some(dir) = matches.get_one::<PathBuf>("data-dir") {
        config.store.data_dir.clone_from(dir);
    }
    if matches.get_flag("json-logs") {
        config.logging.json = true;
    }

    logging::init(&config.logging);
    commands::dispatch(matches, &config).await
}
