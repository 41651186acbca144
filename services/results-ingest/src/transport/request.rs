use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Read},
};

use super::{HttpRequest, MAX_HTTP_BODY_BYTES};

const MAX_HTTP_HEAD_BYTES: usize = 64 * 1024;

/// Request line and headers, before the body is read.
#[derive(Debug)]
pub(super) struct RequestHead {
    pub(super) method: String,
    pub(super) target: String,
    pub(super) headers: HashMap<String, String>,
}

impl RequestHead {
    /// `Content-Length`, checked against the body limit. Absent means empty.
    pub(super) fn body_len(&self) -> Result<usize, String> {
        let Some(raw) = self.headers.get("content-length") else {
            return Ok(0);
        };
        let len = raw
            .parse::<usize>()
            .map_err(|_| "invalid content-length header".to_string())?;
        if len > MAX_HTTP_BODY_BYTES {
            return Err(format!(
                "content-length exceeds max body size ({MAX_HTTP_BODY_BYTES} bytes)"
            ));
        }
        Ok(len)
    }

    pub(super) fn with_body(self, body: Vec<u8>) -> HttpRequest {
        HttpRequest {
            method: self.method,
            target: self.target,
            headers: self.headers,
            body,
        }
    }
}

/// Parses a head block with CRLF or LF line endings, blank trailing line optional.
pub(super) fn parse_head(block: &str) -> Result<RequestHead, String> {
    let mut lines = block.lines();
    let request_line = lines
        .next()
        .ok_or_else(|| "missing request line".to_string())?;
    let (method, target) = parse_request_line(request_line)?;

    let mut headers = HashMap::new();
    for line in lines.map(str::trim_end).take_while(|line| !line.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| "invalid HTTP header".to_string())?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    Ok(RequestHead {
        method,
        target,
        headers,
    })
}

/// Reads one request. `Ok(None)` means the peer closed before sending anything.
pub(super) fn read_http_request(stream: impl Read) -> Result<Option<HttpRequest>, String> {
    let mut reader = BufReader::new(stream);

    let mut block = String::new();
    {
        // One byte past the limit so an oversized head is detected, not truncated.
        let mut head_reader = reader.by_ref().take(MAX_HTTP_HEAD_BYTES as u64 + 1);
        loop {
            let before = block.len();
            let read = head_reader
                .read_line(&mut block)
                .map_err(|e| e.to_string())?;
            if block.len() > MAX_HTTP_HEAD_BYTES {
                return Err(format!("request head exceeds {MAX_HTTP_HEAD_BYTES} bytes"));
            }
            if read == 0 {
                if block.is_empty() {
                    return Ok(None);
                }
                break;
            }
            if before > 0 && block[before..].trim_end().is_empty() {
                break;
            }
        }
    }

    let head = parse_head(&block)?;
    let mut body = vec![0u8; head.body_len()?];
    reader.read_exact(&mut body).map_err(|e| e.to_string())?;
    Ok(Some(head.with_body(body)))
}

/// Path and raw (still percent-encoded) query string.
pub(super) fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

fn parse_request_line(line: &str) -> Result<(String, String), String> {
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("malformed request line: {:?}", line.trim()));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(format!("unsupported HTTP version {version}"));
    }
    Ok((method.to_string(), target.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_head_lowercases_header_names_and_stops_at_blank_line() {
        let head = parse_head(
            "POST /postResults?x=1 HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 3\r\n\r\nignored: yes",
        )
        .unwrap();
        assert_eq!(head.method, "POST");
        assert_eq!(head.target, "/postResults?x=1");
        assert_eq!(
            head.headers.get("content-type").map(String::as_str),
            Some("application/x-www-form-urlencoded")
        );
        assert!(!head.headers.contains_key("ignored"));
        assert_eq!(head.body_len(), Ok(3));
    }

    #[test]
    fn parse_head_rejects_bad_request_lines() {
        assert!(parse_head("").is_err());
        assert!(parse_head("POST /postResults\r\n").is_err());
        assert!(parse_head("POST /postResults SPDY/3\r\n").is_err());
        assert!(parse_head("POST /postResults HTTP/1.0\r\nno colon here\r\n").is_err());
    }

    #[test]
    fn read_http_request_reads_head_and_body() {
        let raw = b"POST /postResults HTTP/1.1\r\nContent-Length: 9\r\n\r\nresult=okEXTRA";
        let request = read_http_request(&raw[..]).unwrap().expect("request expected");
        assert_eq!(request.method, "POST");
        assert_eq!(request.body, b"result=ok");

        assert_eq!(read_http_request(&b""[..]), Ok(None));
    }

    #[test]
    fn read_http_request_stops_an_endless_header_line() {
        let head = std::io::Cursor::new(&b"POST /postResults HTTP/1.1\r\nX-Filler: "[..]);
        let endless = head.chain(std::io::repeat(b'a'));
        let err = read_http_request(endless).unwrap_err();
        assert!(err.contains("request head exceeds"));
    }

    #[test]
    fn body_len_guards_the_body_limit() {
        let head = parse_head(&format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n",
            MAX_HTTP_BODY_BYTES + 1
        ))
        .unwrap();
        assert!(head.body_len().unwrap_err().contains("exceeds max body size"));

        let head = parse_head("POST / HTTP/1.1\r\nContent-Length: lots\r\n").unwrap();
        assert_eq!(head.body_len(), Err("invalid content-length header".to_string()));
    }
}
