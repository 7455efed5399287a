use hypermirror_core::MirrorConfig;

use crate::cli::ConfigArgs;
use crate::error::CliError;
use crate::output::CommandOutput;

pub fn run(args: &ConfigArgs, config: &MirrorConfig) -> Result<CommandOutput, CliError> {
    // Loading already validated the file; `--check` only reports success via the exit code.
    if args.check {
        return Ok(CommandOutput::Nothing);
    }
    Ok(CommandOutput::Text(config.to_toml_string()?))
}
