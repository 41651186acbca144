use report::TextRepair;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:4444";
pub const DEFAULT_HTTP_QUEUE_CAPACITY_PER_WORKER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRuntime {
    Std,
    Axum,
}

impl TransportRuntime {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Std => "std",
            Self::Axum => "axum",
        }
    }
}

/// Service settings read from `HTMLRUNNER_RESULTS_*`, falling back to the
/// older `SELENIUM_RESULTS_*` names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind_addr: String,
    pub http_workers: usize,
    pub http_queue_capacity: usize,
    pub transport_runtime: TransportRuntime,
    pub text_repair: TextRepair,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let bind_addr = env_with_fallback("HTMLRUNNER_RESULTS_BIND", "SELENIUM_RESULTS_BIND")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let http_workers = parse_http_workers();
        Self {
            bind_addr,
            http_workers,
            http_queue_capacity: resolve_http_queue_capacity(http_workers),
            transport_runtime: parse_transport_runtime(),
            text_repair: parse_text_repair(),
        }
    }
}

pub fn env_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .or_else(|| std::env::var(fallback).ok())
}

pub fn parse_env_with_fallback<T>(primary: &str, fallback: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env_with_fallback(primary, fallback).and_then(|value| value.parse::<T>().ok())
}

fn parse_http_workers() -> usize {
    parse_env_with_fallback::<usize>("HTMLRUNNER_RESULTS_HTTP_WORKERS", "SELENIUM_RESULTS_HTTP_WORKERS")
        .filter(|workers| *workers > 0)
        .unwrap_or_else(default_http_workers)
}

fn default_http_workers() -> usize {
    std::thread::available_parallelism()
        .map(|parallelism| parallelism.get().clamp(1, 32))
        .unwrap_or(4)
}

pub fn resolve_http_queue_capacity(worker_count: usize) -> usize {
    parse_env_with_fallback::<usize>(
        "HTMLRUNNER_RESULTS_HTTP_QUEUE_CAPACITY",
        "SELENIUM_RESULTS_HTTP_QUEUE_CAPACITY",
    )
    .filter(|value| *value > 0)
    .unwrap_or_else(|| worker_count.max(1) * DEFAULT_HTTP_QUEUE_CAPACITY_PER_WORKER)
}

fn parse_transport_runtime() -> TransportRuntime {
    let runtime_raw = env_with_fallback(
        "HTMLRUNNER_RESULTS_TRANSPORT_RUNTIME",
        "SELENIUM_RESULTS_TRANSPORT_RUNTIME",
    );
    match runtime_raw.as_deref() {
        Some("axum") => TransportRuntime::Axum,
        _ => TransportRuntime::Std,
    }
}

fn parse_text_repair() -> TextRepair {
    let raw = env_with_fallback("HTMLRUNNER_RESULTS_TEXT_REPAIR", "SELENIUM_RESULTS_TEXT_REPAIR");
    parse_text_repair_value(raw.as_deref())
}

pub fn parse_text_repair_value(raw: Option<&str>) -> TextRepair {
    let Some(raw) = raw else {
        return TextRepair::default();
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "latin1" | "iso-8859-1" | "on" => TextRepair::Latin1Redecode,
        "off" | "none" | "passthrough" | "false" => TextRepair::Passthrough,
        other => {
            tracing::warn!(
                value = other,
                "ignoring unknown text repair mode (expected latin1 or off)"
            );
            TextRepair::default()
        }
    }
}
