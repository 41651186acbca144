use std::{collections::HashMap, io::Write, net::TcpStream, time::Duration};

use serde::Serialize;

use crate::ResponseChannel;

const BACKPRESSURE_QUEUE_FULL_MESSAGE: &str = "service unavailable: results worker queue full";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) body: Vec<u8>,
}

impl HttpRequest {
    /// The body is only read as fields when it is declared (or assumed) to be
    /// `application/x-www-form-urlencoded`.
    pub(crate) fn form_body(&self) -> Option<&[u8]> {
        match self.headers.get("content-type") {
            Some(content_type)
                if !content_type
                    .to_ascii_lowercase()
                    .contains("application/x-www-form-urlencoded") =>
            {
                None
            }
            _ => Some(self.body.as_slice()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpResponse {
    pub(crate) status: u16,
    pub(crate) content_type: &'static str,
    pub(crate) body: Vec<u8>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'a str>,
}

const JSON: &str = "application/json";
const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

impl HttpResponse {
    fn with_body(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body,
        }
    }

    /// A 200 response with no content type yet; the results renderer sets it.
    pub(crate) fn pending() -> Self {
        Self::with_body(200, "application/octet-stream", Vec::new())
    }

    pub(crate) fn ok_json(body: String) -> Self {
        Self::with_body(200, JSON, body.into_bytes())
    }

    pub(crate) fn ok_text(body: String) -> Self {
        Self::with_body(200, PROMETHEUS_TEXT, body.into_bytes())
    }

    /// JSON `{"error": .., "kind": ..}`; `kind` is omitted for transport errors.
    pub(crate) fn error(status: u16, message: &str, kind: Option<&str>) -> Self {
        let body = serde_json::to_vec(&ErrorBody {
            error: message,
            kind,
        })
        .unwrap_or_else(|_| b"{\"error\":\"internal error\"}".to_vec());
        Self::with_body(status, JSON, body)
    }

    pub(crate) fn bad_request(message: &str) -> Self {
        Self::error(400, message, None)
    }

    pub(crate) fn not_found(message: &str) -> Self {
        Self::error(404, message, None)
    }
}

impl ResponseChannel for HttpResponse {
    fn set_content_type(&mut self, content_type: &'static str) {
        self.content_type = content_type;
    }

    fn output(&mut self) -> &mut dyn Write {
        &mut self.body
    }
}

pub(crate) fn write_backpressure_response(
    mut stream: TcpStream,
    socket_timeout_secs: u64,
) -> std::io::Result<()> {
    stream.set_write_timeout(Some(Duration::from_secs(socket_timeout_secs)))?;
    write_response(
        &mut stream,
        &HttpResponse::error(503, BACKPRESSURE_QUEUE_FULL_MESSAGE, None),
    )
}

pub(crate) fn write_response(stream: &mut TcpStream, response: &HttpResponse) -> std::io::Result<()> {
    stream.write_all(&render_response_bytes(response))?;
    stream.flush()
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}

pub(crate) fn render_response_bytes(response: &HttpResponse) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason_phrase(response.status),
        response.content_type,
        response.body.len()
    )
    .into_bytes();
    out.extend_from_slice(&response.body);
    out
}
