use std::{
    net::{TcpListener, TcpStream},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, AtomicUsize, Ordering},
        mpsc,
    },
    time::Duration,
};

use crate::config::resolve_http_queue_capacity;

use super::{
    HttpResponse, SOCKET_TIMEOUT_SECS, SharedRuntime, handle_request,
    http::{write_backpressure_response, write_response},
    request::read_http_request,
};

/// Queue depth and rejections of the accept-loop to worker handoff.
#[derive(Debug)]
pub struct TransportBackpressureMetrics {
    queue_capacity: usize,
    queue_depth: AtomicUsize,
    queue_full_rejections_total: AtomicU64,
}

impl TransportBackpressureMetrics {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue_capacity,
            queue_depth: AtomicUsize::new(0),
            queue_full_rejections_total: AtomicU64::new(0),
        }
    }

    pub fn observe_enqueued(&self) {
        self.queue_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_dequeued(&self) {
        let _ = self
            .queue_depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |depth| {
                depth.checked_sub(1)
            });
    }

    pub fn observe_rejected(&self) {
        self.queue_full_rejections_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn queue_full_rejections_total(&self) -> u64 {
        self.queue_full_rejections_total.load(Ordering::Relaxed)
    }

    pub(super) fn metrics_text(&self) -> String {
        format!(
            "# TYPE htmlrunner_results_transport_queue_capacity gauge\n\
htmlrunner_results_transport_queue_capacity {}\n\
# TYPE htmlrunner_results_transport_queue_depth gauge\n\
htmlrunner_results_transport_queue_depth {}\n\
# TYPE htmlrunner_results_transport_queue_full_reject_total counter\n\
htmlrunner_results_transport_queue_full_reject_total {}\n",
            self.queue_capacity,
            self.queue_depth(),
            self.queue_full_rejections_total()
        )
    }
}

/// Serves on `bind_addr` with one worker per available core (at most 32).
pub fn serve_http(runtime: SharedRuntime, bind_addr: &str) -> std::io::Result<()> {
    let workers = std::thread::available_parallelism()
        .map(|parallelism| parallelism.get().clamp(1, 32))
        .unwrap_or(4);
    serve_http_with_workers(runtime, bind_addr, workers, resolve_http_queue_capacity(workers))
}

pub fn serve_http_with_workers(
    runtime: SharedRuntime,
    bind_addr: &str,
    workers: usize,
    queue_capacity: usize,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr)?;
    tracing::info!(bind = bind_addr, workers, queue_capacity, "results transport listening");
    serve_listener(runtime, listener, workers, queue_capacity)
}

type ConnectionQueue = Arc<Mutex<mpsc::Receiver<TcpStream>>>;

/// Accepts on the calling thread and hands connections to `workers` threads
/// through a queue of `queue_capacity`. Returns when the listener stops.
pub(super) fn serve_listener(
    runtime: SharedRuntime,
    listener: TcpListener,
    workers: usize,
    queue_capacity: usize,
) -> std::io::Result<()> {
    let queue_capacity = queue_capacity.max(1);
    let metrics = Arc::new(TransportBackpressureMetrics::new(queue_capacity));
    runtime.set_transport_backpressure_metrics(Arc::clone(&metrics));
    let (sender, receiver) = mpsc::sync_channel(queue_capacity);
    let queue: ConnectionQueue = Arc::new(Mutex::new(receiver));

    std::thread::scope(|scope| {
        for _ in 0..workers.max(1) {
            let (runtime, queue, metrics) = (&runtime, Arc::clone(&queue), &metrics);
            scope.spawn(move || run_worker(runtime, &queue, metrics));
        }

        for accepted in listener.incoming() {
            let stream = match accepted {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(error = %err, "results transport accept error");
                    continue;
                }
            };
            if !enqueue(&sender, stream, &metrics) {
                break;
            }
        }
        drop(sender);
    });
    Ok(())
}

/// Returns false once every worker is gone.
fn enqueue(
    sender: &mpsc::SyncSender<TcpStream>,
    stream: TcpStream,
    metrics: &TransportBackpressureMetrics,
) -> bool {
    metrics.observe_enqueued();
    let rejected = match sender.try_send(stream) {
        Ok(()) => return true,
        Err(mpsc::TrySendError::Disconnected(_)) => {
            metrics.observe_dequeued();
            tracing::error!("results transport worker queue closed");
            return false;
        }
        Err(mpsc::TrySendError::Full(stream)) => stream,
    };
    metrics.observe_dequeued();
    metrics.observe_rejected();
    tracing::debug!(
        queue_depth = metrics.queue_depth(),
        "results worker queue full, rejecting connection"
    );
    if let Err(err) = write_backpressure_response(rejected, SOCKET_TIMEOUT_SECS) {
        tracing::warn!(error = %err, "results transport backpressure response failed");
    }
    true
}

fn run_worker(runtime: &SharedRuntime, queue: &ConnectionQueue, metrics: &TransportBackpressureMetrics) {
    loop {
        let next = match queue.lock() {
            Ok(receiver) => receiver.recv(),
            Err(_) => return,
        };
        let Ok(stream) = next else {
            return;
        };
        metrics.observe_dequeued();
        if let Err(err) = handle_connection(runtime, stream) {
            tracing::warn!(error = %err, "results transport error");
        }
    }
}

fn handle_connection(runtime: &SharedRuntime, mut stream: TcpStream) -> std::io::Result<()> {
    let timeout = Some(Duration::from_secs(SOCKET_TIMEOUT_SECS));
    stream.set_read_timeout(timeout)?;
    stream.set_write_timeout(timeout)?;

    let response = match read_http_request(&mut stream) {
        Ok(Some(request)) => handle_request(runtime, &request),
        Ok(None) => return Ok(()),
        Err(err) => HttpResponse::bad_request(&err),
    };
    write_response(&mut stream, &response)
}
