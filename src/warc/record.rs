use std::fmt;
use std::io::{self, BufRead, Read};

use crate::error::RecordParseError;

const VERSION_PREFIX: &[u8] = b"WARC/";

/// `WARC-Type` of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordType {
    Warcinfo,
    Request,
    Response,
    Resource,
    Metadata,
    Revisit,
    Conversion,
    Continuation,
    Other(String),
}

impl From<&str> for RecordType {
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "warcinfo" => RecordType::Warcinfo,
            "request" => RecordType::Request,
            "response" => RecordType::Response,
            "resource" => RecordType::Resource,
            "metadata" => RecordType::Metadata,
            "revisit" => RecordType::Revisit,
            "conversion" => RecordType::Conversion,
            "continuation" => RecordType::Continuation,
            _ => RecordType::Other(value.to_string()),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordType::Warcinfo => "warcinfo",
            RecordType::Request => "request",
            RecordType::Response => "response",
            RecordType::Resource => "resource",
            RecordType::Metadata => "metadata",
            RecordType::Revisit => "revisit",
            RecordType::Conversion => "conversion",
            RecordType::Continuation => "continuation",
            RecordType::Other(other) => other,
        };
        f.write_str(name)
    }
}

/// Header block of one WARC record.
#[derive(Debug, Clone)]
pub struct RecordHeader {
    version: String,
    fields: Vec<(String, String)>,
    record_type: RecordType,
    content_length: u64,
}

impl RecordHeader {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn record_type(&self) -> &RecordType {
        &self.record_type
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// First value of a header, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// All values of a repeatable header, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn record_id(&self) -> Option<&str> {
        self.get("WARC-Record-ID")
    }

    pub fn concurrent_to(&self) -> impl Iterator<Item = &str> {
        self.get_all("WARC-Concurrent-To")
    }

    /// `WARC-Target-URI`, with the angle brackets some WARC/1.1 writers add
    /// removed.
    pub fn target_uri(&self) -> Option<&str> {
        self.get("WARC-Target-URI").map(|uri| {
            uri.strip_prefix('<')
                .and_then(|u| u.strip_suffix('>'))
                .unwrap_or(uri)
        })
    }

    pub fn date(&self) -> Option<&str> {
        self.get("WARC-Date")
    }
}

/// Sequential reader over the records of one archive unit.
///
/// After a malformed header the reader resynchronises on the next line
/// starting with `WARC/`, so a bad record costs one error and the stream
/// continues.
pub struct WarcReader<R> {
    inner: R,
    unread_block: u64,
    resync: bool,
    line: Vec<u8>,
}

impl<R: BufRead> WarcReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            unread_block: 0,
            resync: false,
            line: Vec::new(),
        }
    }

    /// Advance to the next record header, skipping whatever is left of the
    /// current record's block. Returns `None` at end of stream.
    pub fn next_header(&mut self) -> Option<Result<RecordHeader, RecordParseError>> {
        if let Err(e) = self.skip_block() {
            self.resync = true;
            return Some(Err(e));
        }

        match self.find_version_line() {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                self.resync = true;
                return Some(Err(e));
            }
        }

        let result = self.parse_header();
        if result.is_err() && self.unread_block == 0 {
            self.resync = true;
        }
        Some(result)
    }

    /// Read the current record's block in full.
    pub fn read_block(&mut self) -> Result<Vec<u8>, RecordParseError> {
        let expected = self.unread_block;
        let mut block = Vec::with_capacity(expected.min(1 << 20) as usize);
        let read = (&mut self.inner).take(expected).read_to_end(&mut block)?;
        self.unread_block = 0;
        if (read as u64) < expected {
            return Err(RecordParseError::Truncated);
        }
        Ok(block)
    }

    fn skip_block(&mut self) -> Result<(), RecordParseError> {
        if self.unread_block == 0 {
            return Ok(());
        }
        let expected = self.unread_block;
        self.unread_block = 0;
        let skipped = io::copy(&mut (&mut self.inner).take(expected), &mut io::sink())?;
        if skipped < expected {
            return Err(RecordParseError::Truncated);
        }
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<bool> {
        self.line.clear();
        Ok(self.inner.read_until(b'\n', &mut self.line)? > 0)
    }

    /// Position on a version line, leaving it in `self.line`. Blank lines
    /// between records are skipped; while resynchronising anything that is
    /// not a version line is skipped too.
    fn find_version_line(&mut self) -> Result<bool, RecordParseError> {
        loop {
            if !self.read_line()? {
                return Ok(false);
            }
            if self.line.starts_with(VERSION_PREFIX) {
                self.resync = false;
                return Ok(true);
            }
            if self.resync || trim_eol(&self.line).is_empty() {
                continue;
            }
            return Err(RecordParseError::InvalidVersionLine(
                String::from_utf8_lossy(trim_eol(&self.line)).into_owned(),
            ));
        }
    }

    fn parse_header(&mut self) -> Result<RecordHeader, RecordParseError> {
        let version = String::from_utf8_lossy(trim_eol(&self.line)).into_owned();
        let mut fields: Vec<(String, String)> = Vec::new();

        loop {
            if !self.read_line()? {
                return Err(RecordParseError::Truncated);
            }
            let line = trim_eol(&self.line);
            if line.is_empty() {
                break;
            }
            let text = std::str::from_utf8(line).map_err(|_| {
                RecordParseError::InvalidHeaderLine(String::from_utf8_lossy(line).into_owned())
            })?;

            if text.starts_with([' ', '\t']) {
                let Some((_, value)) = fields.last_mut() else {
                    return Err(RecordParseError::InvalidHeaderLine(text.to_string()));
                };
                value.push(' ');
                value.push_str(text.trim());
                continue;
            }

            let Some((name, value)) = text.split_once(':') else {
                return Err(RecordParseError::InvalidHeaderLine(text.to_string()));
            };
            fields.push((name.trim().to_string(), value.trim().to_string()));
        }

        let raw_length = fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("Content-Length"))
            .map(|(_, value)| value.as_str())
            .ok_or(RecordParseError::MissingField("Content-Length"))?;
        let content_length: u64 = raw_length
            .parse()
            .map_err(|_| RecordParseError::InvalidContentLength(raw_length.to_string()))?;
        // The block is skippable from here on, even if the record is rejected.
        self.unread_block = content_length;

        let record_type = fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("WARC-Type"))
            .map(|(_, value)| RecordType::from(value.as_str()))
            .ok_or(RecordParseError::MissingField("WARC-Type"))?;

        Ok(RecordHeader {
            version,
            fields,
            record_type,
            content_length,
        })
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
