use hypermirror_core::{MirrorConfig, MirrorError, MirrorRuntime, SourceId};
use serde_json::{json, Value};

use crate::cli::FetchArgs;
use crate::error::CliError;
use crate::output::CommandOutput;

pub async fn run(args: &FetchArgs, config: MirrorConfig) -> Result<CommandOutput, CliError> {
    let id: SourceId = args.source.parse()?;
    let runtime = MirrorRuntime::builder(config).build()?;
    let poller = runtime.poller(id.as_str())?;

    let key = args
        .key
        .as_deref()
        .unwrap_or_else(|| poller.source().primary_key());
    if !poller.source().owned_keys().contains(&key) {
        return Err(MirrorError::KeyNotOwned {
            source_name: id.to_string(),
            key: key.to_owned(),
        }
        .into());
    }

    let report = poller.refresh().await?;
    let raw = poller.read_through(key).await?;
    let data: Value = serde_json::from_str(&raw)?;

    Ok(CommandOutput::Json(json!({
        "source": id,
        "key": key,
        "recordsWritten": report.records_written,
        "event": report.event,
        "data": data,
    })))
}
