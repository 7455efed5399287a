use hypermirror_core::MirrorConfig;
use serde::Serialize;

use crate::cli::SourcesArgs;
use crate::error::CliError;
use crate::output::CommandOutput;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceListing {
    name: &'static str,
    enabled: bool,
    interval_ms: u64,
    topic: String,
    primary_key: String,
    keys: Vec<String>,
}

pub fn run(args: &SourcesArgs, config: &MirrorConfig) -> Result<CommandOutput, CliError> {
    let sources = config
        .resolved_sources()
        .into_iter()
        .filter(|resolved| args.all || resolved.enabled)
        .map(|resolved| {
            let source = resolved
                .id
                .build(&config.endpoints, resolved.ttl, resolved.top_n);
            SourceListing {
                name: resolved.id.as_str(),
                enabled: resolved.enabled,
                interval_ms: resolved.interval.as_millis() as u64,
                topic: source.topic().to_owned(),
                primary_key: source.primary_key().to_owned(),
                keys: source.owned_keys().into_iter().map(str::to_owned).collect(),
            }
        })
        .collect::<Vec<_>>();

    Ok(CommandOutput::Json(serde_json::json!({
        "sources": serde_json::to_value(sources)?,
    })))
}
