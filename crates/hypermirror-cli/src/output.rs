use serde_json::Value;

use crate::error::CliError;

/// What a command wants printed on stdout.
#[derive(Debug, PartialEq)]
pub enum CommandOutput {
    Json(Value),
    Text(String),
    Nothing,
}

pub fn render(output: &CommandOutput, pretty: bool) -> Result<(), CliError> {
    match output {
        CommandOutput::Json(value) => println!("{}", to_json(value, pretty)?),
        CommandOutput::Text(text) => print!("{text}"),
        CommandOutput::Nothing => {}
    }
    Ok(())
}

fn to_json(value: &Value, pretty: bool) -> Result<String, CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(payload)
}
