use axum::{
    Router,
    body::{Body, to_bytes},
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, Request, Response, StatusCode, header::CONTENT_TYPE, request::Parts},
    routing::any,
};

use crate::transport::{HttpRequest, HttpResponse, MAX_HTTP_BODY_BYTES, SharedRuntime, handle_request};

/// Serves the same routes as the std transport on a tokio runtime.
pub fn serve_http_with_axum(
    runtime: SharedRuntime,
    bind_addr: &str,
    worker_threads: usize,
) -> Result<(), String> {
    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads.max(1))
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build tokio runtime: {e}"))?;

    tokio_runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(|e| format!("failed to bind {bind_addr}: {e}"))?;
        tracing::info!(bind = bind_addr, "axum results transport listening");
        axum::serve(listener, router(runtime))
            .await
            .map_err(|e| format!("axum server failed: {e}"))
    })
}

fn router(runtime: SharedRuntime) -> Router {
    Router::new()
        .fallback(any(dispatch))
        .with_state(runtime)
        .layer(DefaultBodyLimit::max(MAX_HTTP_BODY_BYTES))
}

async fn dispatch(State(runtime): State<SharedRuntime>, request: Request<Body>) -> Response<Body> {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_HTTP_BODY_BYTES).await {
        Ok(bytes) => bytes.to_vec(),
        Err(err) => {
            return into_axum_response(HttpResponse::bad_request(&format!(
                "request body error: {err}"
            )));
        }
    };
    let request = transport_request(&parts, body);

    // Listeners are user code and may block; keep them off the reactor.
    let response = tokio::task::spawn_blocking(move || handle_request(&runtime, &request))
        .await
        .unwrap_or_else(|err| {
            tracing::error!(error = %err, "results handler task failed");
            HttpResponse::error(500, "results handler failed", None)
        });
    into_axum_response(response)
}

fn transport_request(parts: &Parts, body: Vec<u8>) -> HttpRequest {
    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_ascii_lowercase(), value.to_string()))
        })
        .collect();
    HttpRequest {
        method: parts.method.as_str().to_string(),
        target: parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string()),
        headers,
        body,
    }
}

fn into_axum_response(response: HttpResponse) -> Response<Body> {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    out.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static(response.content_type),
    );
    out
}
