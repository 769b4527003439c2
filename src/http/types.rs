//! HTTP/1.1 client types.
//!
//! Provides [`Method`], [`Version`], [`Url`], the outgoing [`HttpRequest`]
//! and the parsed [`Response`].

use std::fmt;
use std::io;
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// HEAD
    Head,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
    /// OPTIONS
    Options,
    /// PATCH
    Patch,
    /// Any other token, sent verbatim.
    Extension(String),
}

impl Method {
    /// Recognizes a method token; `None` for empty or non-alphabetic input.
    #[must_use]
    pub fn from_bytes(src: &[u8]) -> Option<Self> {
        match src {
            b"GET" => Some(Self::Get),
            b"HEAD" => Some(Self::Head),
            b"POST" => Some(Self::Post),
            b"PUT" => Some(Self::Put),
            b"DELETE" => Some(Self::Delete),
            b"OPTIONS" => Some(Self::Options),
            b"PATCH" => Some(Self::Patch),
            other => std::str::from_utf8(other)
                .ok()
                .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphabetic()))
                .map(|s| Self::Extension(s.to_owned())),
        }
    }

    /// Token written on the request line.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Extension(s) => s,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    /// HTTP/1.0
    Http10,
    /// HTTP/1.1
    Http11,
}

impl Version {
    /// Recognizes the version field of a status line.
    #[must_use]
    pub fn from_bytes(src: &[u8]) -> Option<Self> {
        match src {
            b"HTTP/1.0" => Some(Self::Http10),
            b"HTTP/1.1" => Some(Self::Http11),
            _ => None,
        }
    }

    /// Token as written on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `http://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    /// Host name or address literal, without brackets.
    pub host: String,
    /// Port, 80 unless given.
    pub port: u16,
    /// Path and query, always starting with `/`.
    pub target: String,
}

impl Url {
    /// Parses an absolute `http://` URL. Fragments are dropped.
    pub fn parse(input: &str) -> Result<Self, HttpError> {
        let invalid = || HttpError::InvalidUrl(input.to_owned());
        let (scheme, rest) = input.split_once("://").ok_or_else(invalid)?;
        if !scheme.eq_ignore_ascii_case("http") {
            return Err(HttpError::UnsupportedScheme(scheme.to_owned()));
        }
        let rest = rest.split('#').next().unwrap_or_default();
        let split = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, target) = rest.split_at(split);
        if authority.is_empty() || authority.contains('@') {
            return Err(invalid());
        }
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match after.strip_prefix(':') {
                Some(port) => Some(port),
                None if after.is_empty() => None,
                None => return Err(invalid()),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };
        let port = match port {
            Some(port) => port.parse().map_err(|_| invalid())?,
            None => 80,
        };
        if host.is_empty() {
            return Err(invalid());
        }
        let target = if target.starts_with('/') {
            target.to_owned()
        } else {
            format!("/{target}")
        };
        Ok(Self {
            host: host.to_owned(),
            port,
            target,
        })
    }

    /// Value of the `Host` header.
    #[must_use]
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == 80 {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

/// An outgoing HTTP/1.1 request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Target URL.
    pub url: Url,
    /// Extra headers. `Host`, `Content-Length` and `Connection` are added.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
    /// Time allowed from submission to a complete response.
    pub timeout: Duration,
}

impl HttpRequest {
    /// Creates a request with no headers, an empty body and the default
    /// timeout.
    pub fn new(method: Method, url: &str) -> Result<Self, HttpError> {
        Ok(Self {
            method,
            url: Url::parse(url)?,
            headers: Vec::new(),
            body: Vec::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// A GET request.
    pub fn get(url: &str) -> Result<Self, HttpError> {
        Self::new(Method::Get, url)
    }

    /// A POST request carrying `body`.
    pub fn post(url: &str, body: impl Into<Vec<u8>>) -> Result<Self, HttpError> {
        Ok(Self::new(Method::Post, url)?.with_body(body))
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Replace the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A complete response as handed to a transfer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP version.
    pub version: Version,
    /// Three-digit status code.
    pub status: u16,
    /// Reason phrase, possibly empty.
    pub reason: String,
    /// Headers in arrival order, names as sent.
    pub headers: Vec<(String, String)>,
    /// Response body bytes, with any chunked framing removed.
    pub body: Vec<u8>,
}

impl Response {
    /// First header named `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// True for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Failure of one transfer, delivered to its callback.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HttpError {
    /// The URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    /// Only plain `http` is supported.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
    /// The host name did not resolve.
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        /// Host being resolved.
        host: String,
        /// Resolver error.
        source: io::Error,
    },
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),
    /// Sending or receiving failed.
    #[error("transfer failed: {0}")]
    Io(#[from] io::Error),
    /// The response was not valid HTTP/1.x.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The request did not finish within its timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The transfer was cancelled.
    #[error("request cancelled")]
    Cancelled,
}
