//! HTTP messages embedded in WARC `request` / `response` blocks.

use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::debug;

use crate::error::RecordParseError;

/// Header mapping with unique, case-insensitive keys in first-seen order.
///
/// A repeated header keeps the position of its first occurrence and the
/// value of its last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap(Vec<(String, String)>);

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(key, _)| key.eq_ignore_ascii_case(&name)) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self.0.iter().position(|(key, _)| key.eq_ignore_ascii_case(name))?;
        Some(self.0.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for HeaderMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Parsed request block.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Parsed response block.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

pub fn parse_request(block: &[u8]) -> Result<HttpRequest, RecordParseError> {
    let (start_line, headers, body) = split_message(block)?;
    let mut parts = start_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(RecordParseError::InvalidHttpMessage(format!(
            "bad request line {start_line:?}"
        )));
    };

    Ok(HttpRequest {
        method: method.to_ascii_uppercase(),
        target: target.to_string(),
        headers,
        body: body.to_vec(),
    })
}

pub fn parse_response(block: &[u8]) -> Result<HttpResponse, RecordParseError> {
    let (start_line, headers, body) = split_message(block)?;
    let status = start_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| {
            RecordParseError::InvalidHttpMessage(format!("bad status line {start_line:?}"))
        })?;

    Ok(HttpResponse {
        status,
        headers,
        body: body.to_vec(),
    })
}

impl HttpResponse {
    /// Payload with transfer and content encodings removed.
    ///
    /// Chunked transfer encoding and gzip/deflate content encodings are
    /// undone; anything that fails to decode, or any other encoding, is
    /// returned as captured.
    pub fn decoded_body(&self) -> Vec<u8> {
        let mut body = self.body.clone();

        let chunked = self
            .headers
            .get("Transfer-Encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
        if chunked {
            match dechunk(&body) {
                Some(plain) => body = plain,
                None => debug!("Body is not valid chunked encoding; keeping it as captured"),
            }
        }

        let encoding = self
            .headers
            .get("Content-Encoding")
            .map(|enc| enc.trim().to_ascii_lowercase());
        let decoded = match encoding.as_deref() {
            Some("gzip" | "x-gzip") => read_all(GzDecoder::new(body.as_slice())),
            Some("deflate") => read_all(ZlibDecoder::new(body.as_slice()))
                .or_else(|| read_all(DeflateDecoder::new(body.as_slice()))),
            _ => return body,
        };

        match decoded {
            Some(decoded) => decoded,
            None => {
                debug!(encoding = ?encoding, "Cannot decode body; keeping it as captured");
                body
            }
        }
    }
}

fn read_all(mut reader: impl Read) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).ok()?;
    Some(out)
}

/// Split a message into start line, headers and body.
fn split_message(block: &[u8]) -> Result<(String, HeaderMap, &[u8]), RecordParseError> {
    let (head, body) = match find_subslice(block, b"\r\n\r\n") {
        Some(pos) => (&block[..pos], &block[pos + 4..]),
        None => match find_subslice(block, b"\n\n") {
            Some(pos) => (&block[..pos], &block[pos + 2..]),
            None => (block, &block[block.len()..]),
        },
    };

    let head = latin1(head);
    let mut lines = head.lines();
    let start_line = lines
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .ok_or_else(|| RecordParseError::InvalidHttpMessage("empty message".into()))?;

    let mut headers = HeaderMap::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(RecordParseError::InvalidHeaderLine(line.to_string()));
        };
        headers.insert(name.trim(), value.trim());
    }

    Ok((start_line.to_string(), headers, body))
}

/// HTTP header bytes are ISO-8859-1; every byte maps to the code point of
/// the same value.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn dechunk(mut data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    loop {
        let line_end = find_subslice(data, b"\r\n")?;
        let size_line = std::str::from_utf8(&data[..line_end]).ok()?;
        let size_hex = size_line.split(';').next()?.trim();
        let size = usize::from_str_radix(size_hex, 16).ok()?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Some(out);
        }
        if data.len() < size {
            return None;
        }
        out.extend_from_slice(&data[..size]);
        data = data.get(size..)?;
        data = data.strip_prefix(b"\r\n").unwrap_or(data);
    }
}
