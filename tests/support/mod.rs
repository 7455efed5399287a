//! Shared fixtures for behavior tests: scripted transports and wiring helpers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hypermirror_core::{
    CacheFabric, CircuitBreaker, CircuitBreakerConfig, GuardedClient, GuardedClientConfig,
    HttpClient, HttpError, HttpRequest, HttpResponse, RetryConfig, Source, SourcePoller,
};

type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Ok(String),
    Status(u16, String),
    Transport(&'static str),
    /// Never answers; only a client-side timeout ends the call.
    Hang,
    /// Answers with `body` after `delay`.
    Slow(Duration, String),
}

impl Step {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::Ok(body.into())
    }
}

/// Replays `steps` in order, repeating the last one once exhausted.
pub struct ScriptedHttpClient {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn always(step: Step) -> Arc<Self> {
        Self::new([step])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    fn next_step(&self) -> Step {
        let mut last = self.last.lock().expect("last step lock");
        if let Some(step) = self.steps.lock().expect("steps lock").pop_front() {
            *last = Some(step.clone());
            return step;
        }
        last.clone()
            .unwrap_or_else(|| Step::Transport("script exhausted"))
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let step = self.next_step();

        Box::pin(async move {
            match step {
                Step::Ok(body) => Ok(HttpResponse::ok_json(body)),
                Step::Status(status, body) => Ok(HttpResponse::with_status(status, body)),
                Step::Transport(message) => Err(HttpError::transport(&request, message)),
                Step::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!("pending never resolves")
                }
                Step::Slow(delay, body) => {
                    tokio::time::sleep(delay).await;
                    Ok(HttpResponse::ok_json(body))
                }
            }
        })
    }
}

pub fn client_config(attempts: u32) -> GuardedClientConfig {
    GuardedClientConfig {
        timeout: Duration::from_secs(5),
        retry: RetryConfig::linear(attempts, Duration::from_secs(1)),
    }
}

pub fn guarded(transport: Arc<ScriptedHttpClient>, attempts: u32) -> GuardedClient {
    GuardedClient::new(transport, client_config(attempts))
}

/// Poller for `source` with no retries and a default breaker.
pub fn poller_for(
    source: Arc<dyn Source>,
    transport: Arc<ScriptedHttpClient>,
    fabric: Arc<dyn CacheFabric>,
    interval: Duration,
) -> Arc<SourcePoller> {
    let name = source.name().to_owned();
    Arc::new(SourcePoller::new(
        source,
        guarded(transport, 1),
        Arc::new(CircuitBreaker::new(name, CircuitBreakerConfig::default())),
        fabric,
        interval,
    ))
}

/// Ten raw vault records: two closed, one child, seven that survive filtering.
pub fn vault_fixture() -> String {
    let vaults = [
        ("Hyperliquidity Provider", "0x01", "350000000", false, "parent"),
        ("Growi HF", "0x02", "12000000", false, "normal"),
        ("Closed Alpha", "0x03", "500000", true, "normal"),
        ("MC Recovery", "0x04", "900000", false, "normal"),
        ("HLP Strategy A", "0x05", "120000000", false, "child"),
        ("Sifu", "0x06", "4000000", false, "normal"),
        ("Closed Beta", "0x07", "10", true, "normal"),
        ("Amber Ridge", "0x08", "2500000", false, "normal"),
        ("Pain Protocol", "0x09", "75000", false, "normal"),
        ("FC Genesis", "0x0a", "1800000", false, "normal"),
    ];
    let records: Vec<String> = vaults
        .iter()
        .map(|(name, address, tvl, closed, kind)| {
            format!(
                r#"{{"apr": 0.1, "summary": {{"name": "{name}", "vaultAddress": "{address}",
                    "leader": "0xleader", "tvl": "{tvl}", "isClosed": {closed},
                    "relationship": {{"type": "{kind}"}}, "createTimeMillis": 1700000000000}}}}"#
            )
        })
        .collect();
    format!("[{}]", records.join(","))
}
