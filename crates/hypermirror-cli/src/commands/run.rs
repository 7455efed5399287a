use std::sync::Arc;
use std::time::Duration;

use hypermirror_core::{MessageHandler, MirrorConfig, MirrorError, MirrorRuntime, SourceReport};
use serde_json::{json, Value};
use tracing::info;

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::output::CommandOutput;

pub async fn run(args: &RunArgs, config: MirrorConfig) -> Result<CommandOutput, CliError> {
    let runtime = MirrorRuntime::builder(config).build()?;
    let fabric = runtime.fabric();

    let mut subscriptions = Vec::new();
    for report in runtime.reports() {
        let topic = report.topic.clone();
        let handler: MessageHandler = Arc::new(move |message: String| {
            info!(topic = %topic, %message, "update published");
        });
        subscriptions.push(
            fabric
                .subscribe(&report.topic, handler)
                .map_err(MirrorError::from)?,
        );
    }

    runtime.start();
    match args.duration_secs {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c().await?,
    }
    runtime.stop();
    drop(subscriptions);

    let sources: Vec<Value> = runtime.reports().iter().map(summarize).collect();
    Ok(CommandOutput::Json(json!({ "sources": sources })))
}

fn summarize(report: &SourceReport) -> Value {
    json!({
        "source": report.name,
        "cyclesCompleted": report.status.cycles_completed,
        "cyclesFailed": report.status.cycles_failed,
        "cyclesSkipped": report.status.cycles_skipped,
        "lastSuccessAt": report.status.last_success_at,
        "lastError": report.status.last_error,
        "circuit": report.circuit.state.as_str(),
    })
}
