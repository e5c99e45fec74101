//! Fixture builders: WARC records and WACZ (ZIP) containers written on the fly.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::Crc;
use flate2::write::{DeflateEncoder, GzEncoder};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Stored,
    Deflate,
}

/// One member of a ZIP fixture.
pub struct Member {
    pub name: String,
    pub data: Vec<u8>,
    pub method: Method,
    /// Store a wrong CRC-32 in the headers.
    pub corrupt_crc: bool,
}

impl Member {
    pub fn stored(name: &str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.to_string(),
            data: data.into(),
            method: Method::Stored,
            corrupt_crc: false,
        }
    }

    pub fn deflated(name: &str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            method: Method::Deflate,
            ..Self::stored(name, data)
        }
    }

    pub fn directory(name: &str) -> Self {
        Self::stored(name, Vec::new())
    }

    pub fn with_corrupt_crc(mut self) -> Self {
        self.corrupt_crc = true;
        self
    }
}

/// Serialise `members` as a ZIP archive.
pub fn zip_bytes(members: &[Member]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();

    for member in members {
        let mut crc = Crc::new();
        crc.update(&member.data);
        let crc32 = if member.corrupt_crc {
            crc.sum() ^ 0xDEAD_BEEF
        } else {
            crc.sum()
        };

        let (method, payload) = match member.method {
            Method::Stored => (0u16, member.data.clone()),
            Method::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&member.data).unwrap();
                (8u16, encoder.finish().unwrap())
            }
        };
        let offset = out.len() as u32;
        let name = member.name.as_bytes();

        out.write_u32::<LittleEndian>(0x0403_4b50).unwrap();
        out.write_u16::<LittleEndian>(20).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(method).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0x21).unwrap();
        out.write_u32::<LittleEndian>(crc32).unwrap();
        out.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(member.data.len() as u32).unwrap();
        out.write_u16::<LittleEndian>(name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.extend_from_slice(name);
        out.extend_from_slice(&payload);

        central.write_u32::<LittleEndian>(0x0201_4b50).unwrap();
        central.write_u16::<LittleEndian>(20).unwrap();
        central.write_u16::<LittleEndian>(20).unwrap();
        central.write_u16::<LittleEndian>(0).unwrap();
        central.write_u16::<LittleEndian>(method).unwrap();
        central.write_u16::<LittleEndian>(0).unwrap();
        central.write_u16::<LittleEndian>(0x21).unwrap();
        central.write_u32::<LittleEndian>(crc32).unwrap();
        central.write_u32::<LittleEndian>(payload.len() as u32).unwrap();
        central.write_u32::<LittleEndian>(member.data.len() as u32).unwrap();
        central.write_u16::<LittleEndian>(name.len() as u16).unwrap();
        central.write_u16::<LittleEndian>(0).unwrap();
        central.write_u16::<LittleEndian>(0).unwrap();
        central.write_u16::<LittleEndian>(0).unwrap();
        central.write_u16::<LittleEndian>(0).unwrap();
        central.write_u32::<LittleEndian>(0).unwrap();
        central.write_u32::<LittleEndian>(offset).unwrap();
        central.extend_from_slice(name);
    }

    let cd_offset = out.len() as u32;
    let cd_size = central.len() as u32;
    out.extend_from_slice(&central);

    out.write_u32::<LittleEndian>(0x0605_4b50).unwrap();
    out.write_u16::<LittleEndian>(0).unwrap();
    out.write_u16::<LittleEndian>(0).unwrap();
    out.write_u16::<LittleEndian>(members.len() as u16).unwrap();
    out.write_u16::<LittleEndian>(members.len() as u16).unwrap();
    out.write_u32::<LittleEndian>(cd_size).unwrap();
    out.write_u32::<LittleEndian>(cd_offset).unwrap();
    out.write_u16::<LittleEndian>(0).unwrap();
    out
}

pub fn write_wacz(dir: &Path, name: &str, members: &[Member]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, zip_bytes(members)).unwrap();
    path
}

/// One WARC record with the given extra headers and block.
pub fn record(kind: &str, id: &str, headers: &[(&str, &str)], block: &[u8]) -> Vec<u8> {
    let mut head = format!("WARC/1.1\r\nWARC-Type: {kind}\r\nWARC-Record-ID: {id}\r\n");
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", block.len()));

    let mut out = head.into_bytes();
    out.extend_from_slice(block);
    out.extend_from_slice(b"\r\n\r\n");
    out
}

/// A GET request record for `url`, pointing at response `response_id`.
pub fn get_request(id: &str, url: &str, response_id: &str) -> Vec<u8> {
    let path = url.splitn(4, '/').nth(3).unwrap_or("");
    let http = format!("GET /{path} HTTP/1.1\r\nAccept: */*\r\n\r\n");
    record(
        "request",
        id,
        &[
            ("WARC-Target-URI", url),
            ("WARC-Concurrent-To", response_id),
            ("WARC-Date", "2024-05-01T10:00:00Z"),
        ],
        http.as_bytes(),
    )
}

/// A POST request record with a JSON or form body.
pub fn post_request(id: &str, url: &str, response_id: &str, content_type: &str, body: &str) -> Vec<u8> {
    let http = format!(
        "POST / HTTP/1.1\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    record(
        "request",
        id,
        &[
            ("WARC-Target-URI", url),
            ("WARC-Concurrent-To", response_id),
            ("WARC-Date", "2024-05-01T10:00:00Z"),
        ],
        http.as_bytes(),
    )
}

/// A 200 response record with the given content type and body.
pub fn response(id: &str, url: &str, content_type: &str, body: &[u8]) -> Vec<u8> {
    let mut http = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    http.extend_from_slice(body);
    record("response", id, &[("WARC-Target-URI", url)], &http)
}

/// A response whose body is gzip content-encoded.
pub fn gzip_response(id: &str, url: &str, body: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).unwrap();
    let encoded = encoder.finish().unwrap();

    let mut http = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
        encoded.len()
    )
    .into_bytes();
    http.extend_from_slice(&encoded);
    record("response", id, &[("WARC-Target-URI", url)], &http)
}

/// Records compressed as one gzip member each, as WARC writers do.
pub fn gzip_records(records: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(record).unwrap();
        out.extend(encoder.finish().unwrap());
    }
    out
}
