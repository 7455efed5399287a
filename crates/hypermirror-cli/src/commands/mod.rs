mod config;
mod fetch;
mod run;
mod sources;

use hypermirror_core::MirrorConfig;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::output::CommandOutput;

pub async fn run(cli: &Cli, config: MirrorConfig) -> Result<CommandOutput, CliError> {
    match &cli.command {
        Command::Run(args) => run::run(args, config).await,
        Command::Fetch(args) => fetch::run(args, config).await,
        Command::Sources(args) => sources::run(args, &config),
        Command::Config(args) => config::run(args, &config),
    }
}
