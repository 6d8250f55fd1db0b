//! HTTP/1.1-shaped request and response codec for connection payloads.
//!
//! Only the framing is HTTP: a start line, `Name: value` headers separated by
//! CRLF, a blank line, then the body. There is no chunking and
//! `Content-Length` is informational; the body is whatever follows the blank
//! line in the reliably delivered payload.

use std::borrow::Cow;
use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

pub const HTTP_VERSION: &str = "HTTP/1.1";

const CRLF: &str = "\r\n";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty message")]
    Empty,

    #[error("message head is not valid UTF-8")]
    NotUtf8,

    #[error("invalid request line: {0:?}")]
    RequestLine(String),

    #[error("invalid status line: {0:?}")]
    StatusLine(String),

    #[error("invalid header line: {0:?}")]
    Header(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Patch,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Other(method) => method,
        }
    }
}

/// Method tokens are case-sensitive: `get` is an unknown method.
impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            _ => Self::Other(s.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the sender wants the connection kept after this exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPreference {
    KeepAlive,
    Close,
}

impl ConnectionPreference {
    /// `keep-alive` (any case) keeps the connection; anything else, including
    /// a missing header, closes it.
    pub fn from_headers(headers: &Headers) -> Self {
        match headers.get("Connection") {
            Some(value) if value.eq_ignore_ascii_case("keep-alive") => Self::KeepAlive,
            _ => Self::Close,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeepAlive => "keep-alive",
            Self::Close => "close",
        }
    }
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace every value for `name` with `value`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.0.retain(|(key, _)| !key.eq_ignore_ascii_case(&name));
        self.0.push((name, value.into()));
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn parse<'a>(lines: impl Iterator<Item = &'a str>) -> Result<Self, CodecError> {
        let mut headers = Self::new();
        for line in lines.filter(|line| !line.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| CodecError::Header(line.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(CodecError::Header(line.to_string()));
            }
            headers.append(name, value.trim());
        }
        Ok(headers)
    }

    fn write_to(&self, buf: &mut BytesMut) {
        for (name, value) in self.iter() {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(CRLF.as_bytes());
        }
        buf.put_slice(CRLF.as_bytes());
    }
}

/// Split a message into its head text and the body that follows the blank
/// line. A message without a blank line is all head.
fn split_message(message: &Bytes) -> Result<(&str, Bytes), CodecError> {
    if message.is_empty() {
        return Err(CodecError::Empty);
    }

    let (head_end, body_start) = match find(message, b"\r\n\r\n") {
        Some(at) => (at, at + 4),
        None => match find(message, b"\n\n") {
            Some(at) => (at, at + 2),
            None => (message.len(), message.len()),
        },
    };

    let head = std::str::from_utf8(&message[..head_end]).map_err(|_| CodecError::NotUtf8)?;
    Ok((head, message.slice(body_start..)))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn encode_message(start_line: &str, headers: &Headers, body: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(start_line.len() + 64 + body.len());
    buf.put_slice(start_line.as_bytes());
    buf.put_slice(CRLF.as_bytes());
    headers.write_to(&mut buf);
    buf.put_slice(body);
    buf.freeze()
}

// ── Request ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub version: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            version: HTTP_VERSION.to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::Post, path).body(body)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn connection(&self) -> ConnectionPreference {
        ConnectionPreference::from_headers(&self.headers)
    }

    /// Declared `Content-Length`, if present and numeric
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("Content-Length")?.parse().ok()
    }

    pub fn decode(message: Bytes) -> Result<Self, CodecError> {
        let (head, body) = split_message(&message)?;
        let mut lines = head.lines();
        let start = lines.next().unwrap_or_default();

        let mut parts = start.split_whitespace();
        let (Some(method), Some(path), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CodecError::RequestLine(start.to_string()));
        };
        if !version.starts_with("HTTP/") {
            return Err(CodecError::RequestLine(start.to_string()));
        }

        Ok(Self {
            method: Method::from(method),
            path: path.to_string(),
            version: version.to_string(),
            headers: Headers::parse(lines)?,
            body,
        })
    }

    pub fn encode(&self) -> Bytes {
        let start = format!("{} {} {}", self.method, self.path, self.version);
        encode_message(&start, &self.headers, &self.body)
    }
}

// ── Response ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            version: HTTP_VERSION.to_string(),
            status,
            reason: reason.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// `text/plain` response with `body`
    pub fn text(status: u16, reason: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(status, reason)
            .header("Content-Type", "text/plain")
            .body(body)
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::text(200, "OK", body)
    }

    pub fn bad_request(message: impl Into<Bytes>) -> Self {
        Self::text(400, "Bad Request", message).header("Connection", "close")
    }

    pub fn method_not_allowed() -> Self {
        Self::text(405, "Method Not Allowed", "Method not supported.").header("Connection", "close")
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn connection(&self) -> ConnectionPreference {
        ConnectionPreference::from_headers(&self.headers)
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn decode(message: Bytes) -> Result<Self, CodecError> {
        let (head, body) = split_message(&message)?;
        let mut lines = head.lines();
        let start = lines.next().unwrap_or_default();

        let mut parts = start.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let status = parts.next().and_then(|code| code.parse::<u16>().ok());
        let (true, Some(status)) = (version.starts_with("HTTP/"), status) else {
            return Err(CodecError::StatusLine(start.to_string()));
        };

        Ok(Self {
            version: version.to_string(),
            status,
            reason: parts.next().unwrap_or_default().trim().to_string(),
            headers: Headers::parse(lines)?,
            body,
        })
    }

    pub fn encode(&self) -> Bytes {
        let start = format!("{} {} {}", self.version, self.status, self.reason);
        encode_message(&start, &self.headers, &self.body)
    }
}
