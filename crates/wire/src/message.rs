//! HTTP-shaped request and response messages.
//!
//! A message is start line, header lines, a blank line, then the body. The
//! body is the remainder of the frame, taken verbatim. Station payloads
//! must survive the trip byte-for-byte, so the parser never rebuilds or
//! re-encodes it.

use crate::WireError;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The header every message must carry (SYNC tolerates its absence).
pub const LAMPORT_HEADER: &str = "Lamport-Clock";

const HTTP_VERSION: &str = "HTTP/1.1";

/// Request methods understood by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Sync,
}

impl FromStr for Method {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::Get),
            "PUT" => Ok(Method::Put),
            "SYNC" => Ok(Method::Sync),
            other => Err(WireError::UnknownMethod(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Sync => "SYNC",
        })
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A parsed inbound request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl Request {
    /// Build a request for rendering (used by feeders, readers, and tests).
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// The peer's `Lamport-Clock` value, if present and an integer.
    pub fn lamport_clock(&self) -> Option<u64> {
        self.headers.get(LAMPORT_HEADER)?.parse().ok()
    }

    /// Parse a request from frame text.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let (start, headers, body) = split_message(text)?;

        let mut parts = start.split_whitespace();
        let (Some(method), Some(target), Some(_version)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(WireError::MalformedStartLine(start.to_string()));
        };

        Ok(Self {
            method: method.parse()?,
            target: target.to_string(),
            headers,
            body,
        })
    }

    /// Render to frame text.
    pub fn render(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, self.target, HTTP_VERSION);
        render_headers(&mut out, &self.headers, &self.body);
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// An outbound (or, for clients, parsed inbound) response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
}

impl Response {
    /// A response with the canonical reason phrase for `status`.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_lamport(self, lamport: u64) -> Self {
        self.with_header(LAMPORT_HEADER, lamport.to_string())
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The server's `Lamport-Clock` value, if present and an integer.
    pub fn lamport_clock(&self) -> Option<u64> {
        self.headers.get(LAMPORT_HEADER)?.parse().ok()
    }

    /// Parse a response from frame text.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let (start, headers, body) = split_message(text)?;

        let mut parts = start.split_whitespace();
        let _version = parts
            .next()
            .ok_or_else(|| WireError::MalformedStartLine(start.to_string()))?;
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| WireError::MalformedStartLine(start.to_string()))?;
        let reason = parts.collect::<Vec<_>>().join(" ");

        Ok(Self {
            status,
            reason,
            headers,
            body: if body.is_empty() { None } else { Some(body) },
        })
    }

    /// Render to frame text. `Content-Type`/`Content-Length` are attached
    /// when a body is present; they are informational on the wire.
    pub fn render(&self) -> String {
        let mut out = format!("{} {} {}\r\n", HTTP_VERSION, self.status, self.reason);
        let body = self.body.as_deref().unwrap_or("");
        render_headers(&mut out, &self.headers, body);
        out.push_str("\r\n");
        out.push_str(body);
        out
    }
}

/// Canonical reason phrase for the status codes this protocol uses.
fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

// ---------------------------------------------------------------------------
// Shared parsing / rendering helpers
// ---------------------------------------------------------------------------

/// Split message text into (start line, headers, verbatim body).
///
/// The body is everything after the first blank line, untouched. Header
/// values are trimmed; names are matched exactly.
fn split_message(text: &str) -> Result<(&str, HashMap<String, String>, String), WireError> {
    if text.is_empty() {
        return Err(WireError::Empty);
    }

    let (head, body) = match text.find("\r\n\r\n") {
        Some(idx) => (&text[..idx], &text[idx + 4..]),
        // Tolerate bare-LF peers.
        None => match text.find("\n\n") {
            Some(idx) => (&text[..idx], &text[idx + 2..]),
            None => (text, ""),
        },
    };

    let mut lines = head.lines();
    let start = lines.next().ok_or(WireError::Empty)?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| WireError::MalformedHeader(line.to_string()))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }

    Ok((start, headers, body.to_string()))
}

fn render_headers(out: &mut String, headers: &HashMap<String, String>, body: &str) {
    for (name, value) in headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    if !body.is_empty() {
        out.push_str("Content-Type: application/json\r\n");
        out.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_get_request() {
        let text = "GET /S1 HTTP/1.1\r\nLamport-Clock: 7\r\n\r\n";
        let req = Request::parse(text).unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.target, "/S1");
        assert_eq!(req.lamport_clock(), Some(7));
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_parse_put_with_body() {
        let body = r#"{"id":"S1","humidity":"55"}"#;
        let text = format!(
            "PUT /weather.json HTTP/1.1\r\nLamport-Clock: 3\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let req = Request::parse(&text).unwrap();
        assert_eq!(req.method, Method::Put);
        assert_eq!(req.body, body);
    }

    #[test]
    fn test_body_is_verbatim() {
        // Bodies with internal newlines must not be rebuilt.
        let body = "{\n  \"id\": \"S1\",\n  \"wind\": \"NW\"\n}";
        let text = format!("PUT /weather.json HTTP/1.1\r\nLamport-Clock: 1\r\n\r\n{}", body);
        let req = Request::parse(&text).unwrap();
        assert_eq!(req.body, body);
    }

    #[test]
    fn test_parse_bare_lf() {
        let text = "SYNC / HTTP/1.1\nLamport-Clock: 2\n\n";
        let req = Request::parse(text).unwrap();
        assert_eq!(req.method, Method::Sync);
        assert_eq!(req.lamport_clock(), Some(2));
    }

    #[test]
    fn test_header_value_is_trimmed() {
        let text = "GET / HTTP/1.1\r\nLamport-Clock:   42  \r\n\r\n";
        let req = Request::parse(text).unwrap();
        assert_eq!(req.lamport_clock(), Some(42));
    }

    #[test]
    fn test_non_integer_lamport() {
        let text = "GET / HTTP/1.1\r\nLamport-Clock: soon\r\n\r\n";
        let req = Request::parse(text).unwrap();
        assert_eq!(req.lamport_clock(), None);
    }

    #[test]
    fn test_unknown_method_rejected() {
        let err = Request::parse("DELETE /S1 HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, WireError::UnknownMethod(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Request::parse("").is_err());
        assert!(Request::parse("complete nonsense").is_err());
        assert!(Request::parse("GET\r\n\r\n").is_err());
    }

    #[test]
    fn test_malformed_header_rejected() {
        let err = Request::parse("GET / HTTP/1.1\r\nno-colon-here\r\n\r\n").unwrap_err();
        assert!(matches!(err, WireError::MalformedHeader(_)));
    }

    #[test]
    fn test_request_roundtrip() {
        let req = Request::new(Method::Put, "/weather.json")
            .with_header(LAMPORT_HEADER, "9")
            .with_body(r#"{"id":"S9"}"#);
        let parsed = Request::parse(&req.render()).unwrap();
        assert_eq!(parsed.method, Method::Put);
        assert_eq!(parsed.target, "/weather.json");
        assert_eq!(parsed.lamport_clock(), Some(9));
        assert_eq!(parsed.body, r#"{"id":"S9"}"#);
    }

    #[test]
    fn test_response_render_and_parse() {
        let resp = Response::new(201).with_lamport(12);
        let text = resp.render();
        assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));

        let parsed = Response::parse(&text).unwrap();
        assert_eq!(parsed.status, 201);
        assert_eq!(parsed.reason, "Created");
        assert_eq!(parsed.lamport_clock(), Some(12));
        assert!(parsed.body.is_none());
    }

    #[test]
    fn test_response_with_body_carries_length() {
        let resp = Response::new(200).with_lamport(4).with_body("[]");
        let text = resp.render();
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n[]"));

        let parsed = Response::parse(&text).unwrap();
        assert_eq!(parsed.body.as_deref(), Some("[]"));
    }

    #[test]
    fn test_response_parse_bad_status() {
        assert!(Response::parse("HTTP/1.1 abc OK\r\n\r\n").is_err());
    }
}
