//! HTTP/1.1 request encoding and incremental response parsing.

use super::types::{HttpError, HttpRequest, Method, Response, Version};

const MAX_HEAD: usize = 64 * 1024;
const MANAGED_HEADERS: [&str; 3] = ["host", "content-length", "connection"];

/// Serializes a request. The connection is always closed after one
/// exchange.
pub(crate) fn encode_request(request: &HttpRequest) -> Vec<u8> {
    let mut out = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\n",
        request.method,
        request.url.target,
        request.url.authority()
    );
    for (name, value) in &request.headers {
        if MANAGED_HEADERS.iter().any(|managed| name.eq_ignore_ascii_case(managed)) {
            continue;
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    let body_expected = matches!(request.method, Method::Post | Method::Put | Method::Patch);
    if body_expected || !request.body.is_empty() {
        out.push_str(&format!("Content-Length: {}\r\n", request.body.len()));
    }
    out.push_str("Connection: close\r\n\r\n");
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(&request.body);
    bytes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(usize),
    Chunked,
    UntilEof,
}

#[derive(Debug)]
struct Head {
    version: Version,
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    len: usize,
    framing: Framing,
}

/// Accumulates response bytes until a complete response is available.
#[derive(Debug)]
pub(crate) struct ResponseParser {
    head_only: bool,
    buf: Vec<u8>,
    head: Option<Head>,
}

impl ResponseParser {
    /// `head_only` marks a response to HEAD, which never has a body.
    pub(crate) fn new(head_only: bool) -> Self {
        Self {
            head_only,
            buf: Vec::new(),
            head: None,
        }
    }

    /// Appends received bytes and returns the response once complete.
    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Result<Option<Response>, HttpError> {
        self.buf.extend_from_slice(bytes);
        self.try_complete(false)
    }

    /// Signals end of stream.
    pub(crate) fn finish(&mut self) -> Result<Response, HttpError> {
        self.try_complete(true)?
            .ok_or_else(|| HttpError::Malformed("connection closed before response completed".into()))
    }

    fn try_complete(&mut self, eof: bool) -> Result<Option<Response>, HttpError> {
        if self.head.is_none() {
            let Some(head) = self.parse_head()? else {
                return Ok(None);
            };
            self.head = Some(head);
        }
        let Some(head) = &self.head else {
            return Ok(None);
        };
        let body = &self.buf[head.len..];
        let body = match head.framing {
            Framing::Empty => Some(Vec::new()),
            Framing::Length(len) => (body.len() >= len).then(|| body[..len].to_vec()),
            Framing::Chunked => decode_chunked(body)?,
            Framing::UntilEof => eof.then(|| body.to_vec()),
        };
        let Some(body) = body else {
            return Ok(None);
        };
        let Some(head) = self.head.take() else {
            return Ok(None);
        };
        Ok(Some(Response {
            version: head.version,
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            body,
        }))
    }

    fn parse_head(&mut self) -> Result<Option<Head>, HttpError> {
        loop {
            let Some(end) = find(&self.buf, b"\r\n\r\n") else {
                if self.buf.len() > MAX_HEAD {
                    return Err(HttpError::Malformed("response head too large".into()));
                }
                return Ok(None);
            };
            let head = parse_head_block(&self.buf[..end], end + 4, self.head_only)?;
            if (100..200).contains(&head.status) {
                self.buf.drain(..head.len);
                continue;
            }
            return Ok(Some(head));
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn malformed(what: &str) -> HttpError {
    HttpError::Malformed(what.to_owned())
}

fn parse_head_block(block: &[u8], len: usize, head_only: bool) -> Result<Head, HttpError> {
    let text = std::str::from_utf8(block).map_err(|_| malformed("response head is not utf-8"))?;
    let mut lines = text.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts
        .next()
        .and_then(|v| Version::from_bytes(v.as_bytes()))
        .ok_or_else(|| malformed("bad status line"))?;
    let status: u16 = parts
        .next()
        .and_then(|code| code.parse().ok())
        .filter(|code| (100..1000).contains(code))
        .ok_or_else(|| malformed("bad status code"))?;
    let reason = parts.next().unwrap_or_default().to_owned();

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line.split_once(':').ok_or_else(|| malformed("bad header line"))?;
        headers.push((name.trim().to_owned(), value.trim().to_owned()));
    }

    let lookup = |wanted: &str| {
        headers
            .iter()
            .find(|(name, _): &&(String, String)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, value)| value.as_str())
    };
    let framing = if head_only || status == 204 || status == 304 || (100..200).contains(&status) {
        Framing::Empty
    } else if lookup("transfer-encoding").is_some_and(|te| te.to_ascii_lowercase().contains("chunked")) {
        Framing::Chunked
    } else if let Some(length) = lookup("content-length") {
        Framing::Length(length.parse().map_err(|_| malformed("bad content-length"))?)
    } else {
        Framing::UntilEof
    };

    Ok(Head {
        version,
        status,
        reason,
        headers,
        len,
        framing,
    })
}

/// Decodes a chunked body. Returns `None` until the final chunk and the
/// trailer section have arrived.
fn decode_chunked(mut input: &[u8]) -> Result<Option<Vec<u8>>, HttpError> {
    let mut body = Vec::new();
    loop {
        let Some(line_end) = find(input, b"\r\n") else {
            return Ok(None);
        };
        let line = std::str::from_utf8(&input[..line_end]).map_err(|_| malformed("bad chunk size"))?;
        let size_text = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_text, 16).map_err(|_| malformed("bad chunk size"))?;
        input = &input[line_end + 2..];
        if size == 0 {
            // Trailer fields end with an empty line.
            return Ok(find(input, b"\r\n").and_then(|first| {
                if first == 0 {
                    Some(body)
                } else {
                    find(input, b"\r\n\r\n").map(|_| body)
                }
            }));
        }
        if input.len() < size + 2 {
            return Ok(None);
        }
        if &input[size..size + 2] != b"\r\n" {
            return Err(malformed("chunk not terminated"));
        }
        body.extend_from_slice(&input[..size]);
        input = &input[size + 2..];
    }
}
