use crate::params::FormParams;

use super::{HttpRequest, HttpResponse, SharedRuntime, request::split_target};

pub(crate) fn handle_request(runtime: &SharedRuntime, request: &HttpRequest) -> HttpResponse {
    let (path, query) = split_target(&request.target);
    match (request.method.as_str(), path) {
        ("GET", "/health") => HttpResponse::ok_json("{\"status\":\"ok\"}".to_string()),
        ("GET", "/metrics") => HttpResponse::ok_text(runtime.metrics_text()),
        _ => {
            let params = FormParams::from_request_parts(query, request.form_body());
            let mut response = HttpResponse::pending();
            match runtime
                .ingestor()
                .handle(&request.method, path, &params, &mut response)
            {
                None => HttpResponse::not_found(&format!(
                    "no route for {} {path}",
                    request.method
                )),
                Some(Ok(outcome)) => {
                    runtime.observe_accepted(outcome.drain);
                    response
                }
                Some(Err(err)) => {
                    if let Some(drain) = err.dispatched() {
                        runtime.observe_drain(drain);
                    }
                    runtime.observe_rejected();
                    HttpResponse::error(err.status(), &err.to_string(), Some(err.kind()))
                }
            }
        }
    }
}
