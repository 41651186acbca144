use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use report::{DrainReport, ListenerRegistry};

use crate::ResultsIngestor;

mod http;
mod request;
mod routes;
mod server_runtime;

pub(crate) use http::{HttpRequest, HttpResponse};
pub(crate) use routes::handle_request;
pub use server_runtime::{TransportBackpressureMetrics, serve_http, serve_http_with_workers};

use http::render_response_bytes;
use request::parse_head;

pub(crate) const MAX_HTTP_BODY_BYTES: usize = 16 * 1024 * 1024;
const SOCKET_TIMEOUT_SECS: u64 = 5;

pub type SharedRuntime = Arc<ResultsRuntime>;

/// State shared by every transport worker: the ingestor with its listener
/// registry, plus counters for `/metrics`.
#[derive(Debug)]
pub struct ResultsRuntime {
    ingestor: ResultsIngestor,
    accepted_results_total: AtomicU64,
    rejected_results_total: AtomicU64,
    listeners_notified_total: AtomicU64,
    listener_failures_total: AtomicU64,
    backpressure: OnceLock<Arc<TransportBackpressureMetrics>>,
    started_at: Instant,
}

impl ResultsRuntime {
    pub fn new(ingestor: ResultsIngestor) -> Self {
        Self {
            ingestor,
            accepted_results_total: AtomicU64::new(0),
            rejected_results_total: AtomicU64::new(0),
            listeners_notified_total: AtomicU64::new(0),
            listener_failures_total: AtomicU64::new(0),
            backpressure: OnceLock::new(),
            started_at: Instant::now(),
        }
    }

    pub fn shared(ingestor: ResultsIngestor) -> SharedRuntime {
        Arc::new(Self::new(ingestor))
    }

    pub fn ingestor(&self) -> &ResultsIngestor {
        &self.ingestor
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        self.ingestor.registry()
    }

    pub fn accepted_results_total(&self) -> u64 {
        self.accepted_results_total.load(Ordering::Relaxed)
    }

    pub fn rejected_results_total(&self) -> u64 {
        self.rejected_results_total.load(Ordering::Relaxed)
    }

    fn observe_accepted(&self, drain: DrainReport) {
        self.accepted_results_total.fetch_add(1, Ordering::Relaxed);
        self.observe_drain(drain);
    }

    fn observe_drain(&self, drain: DrainReport) {
        self.listeners_notified_total
            .fetch_add(drain.notified as u64, Ordering::Relaxed);
        self.listener_failures_total
            .fetch_add(drain.failed as u64, Ordering::Relaxed);
    }

    fn observe_rejected(&self) {
        self.rejected_results_total.fetch_add(1, Ordering::Relaxed);
    }

    fn set_transport_backpressure_metrics(&self, metrics: Arc<TransportBackpressureMetrics>) {
        let _ = self.backpressure.set(metrics);
    }

    fn metrics_text(&self) -> String {
        let mut body = format!(
            "# TYPE htmlrunner_results_accepted_total counter\n\
htmlrunner_results_accepted_total {}\n\
# TYPE htmlrunner_results_rejected_total counter\n\
htmlrunner_results_rejected_total {}\n\
# TYPE htmlrunner_results_listeners_notified_total counter\n\
htmlrunner_results_listeners_notified_total {}\n\
# TYPE htmlrunner_results_listener_failures_total counter\n\
htmlrunner_results_listener_failures_total {}\n\
# TYPE htmlrunner_results_listeners_registered gauge\n\
htmlrunner_results_listeners_registered {}\n\
# TYPE htmlrunner_results_uptime_seconds gauge\n\
htmlrunner_results_uptime_seconds {:.4}\n",
            self.accepted_results_total(),
            self.rejected_results_total(),
            self.listeners_notified_total.load(Ordering::Relaxed),
            self.listener_failures_total.load(Ordering::Relaxed),
            self.registry().len(),
            self.started_at.elapsed().as_secs_f64()
        );
        if let Some(backpressure) = self.backpressure.get() {
            body.push_str(&backpressure.metrics_text());
        }
        body
    }
}

/// Run one raw HTTP/1.1 request through the same routing the server uses and
/// return the raw response bytes.
pub fn handle_http_request_bytes(
    runtime: &SharedRuntime,
    raw_request: &[u8],
) -> Result<Vec<u8>, String> {
    let head_end = raw_request
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .ok_or_else(|| "missing HTTP header terminator".to_string())?;
    let head = std::str::from_utf8(&raw_request[..head_end])
        .map_err(|_| "request headers must be valid UTF-8".to_string())
        .and_then(parse_head)?;
    let body = &raw_request[head_end + 4..];
    if head.body_len()? != body.len() {
        return Err("content-length does not match body size".to_string());
    }

    let response = handle_request(runtime, &head.with_body(body.to_vec()));
    Ok(render_response_bytes(&response))
}
