mod cli;
mod commands;
mod error;
mod observability;
mod output;

use std::process::ExitCode;

use clap::Parser;
use hypermirror_core::load_config;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    observability::init_tracing(&config.logging.filter);

    let output = commands::run(&cli, config).await?;
    output::render(&output, cli.pretty)
}
