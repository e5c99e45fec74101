//! Error taxonomy.
//!
//! Archive-level failures ([`ContainerError`]) and handler loading failures
//! ([`HandlerLoadError`]) surface to the caller. Record-level failures
//! ([`RecordParseError`]) and handler runtime failures ([`HandlerError`])
//! are logged and skipped by the pipeline and never abort a run.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The WACZ container is missing, unreadable, or a member cannot be extracted.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("archive not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("not a valid WACZ/ZIP archive '{source_name}': {reason}")]
    Invalid { source_name: String, reason: String },

    #[error("member '{0}' not found in archive")]
    MemberNotFound(String),

    #[error("member '{0}' has an unsafe path")]
    UnsafeMemberPath(String),

    #[error("failed to extract member '{member}': {reason}")]
    Extraction { member: String, reason: String },

    #[error("archive is closed")]
    Closed,

    #[error("archive I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ContainerError {
    pub(crate) fn invalid(source_name: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn extraction(member: &str, reason: impl ToString) -> Self {
        Self::Extraction {
            member: member.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A handler could not be loaded or registered.
///
/// Fatal to the registration call that produced it only; handlers that are
/// already registered stay usable.
#[derive(Debug, Error)]
pub enum HandlerLoadError {
    #[error("handler library not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("cannot load handler library {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("{} does not export a handler (missing symbol `{symbol}`)", path.display())]
    MissingEntryPoint { path: PathBuf, symbol: &'static str },

    #[error("{} was built for handler ABI {found}, expected {expected}", path.display())]
    AbiMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("handler '{identity}' failed to construct: {reason}")]
    Construct { identity: String, reason: String },

    #[error("handler '{identity}' has an invalid descriptor: {reason}")]
    InvalidDescriptor { identity: String, reason: String },

    #[error("a handler named '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("handler '{identity}' would share output directory {} with another handler", path.display())]
    DuplicateOutputDir { identity: String, path: PathBuf },

    #[error("handler '{handler}' declares invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        handler: String,
        pattern: String,
        #[source]
        source: PatternError,
    },
}

/// A URL pattern could not be compiled.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,

    #[error("regular expression pattern is empty")]
    EmptyRegex,

    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// A capture record could not be parsed. The record is skipped.
#[derive(Debug, Error)]
pub enum RecordParseError {
    #[error("record truncated")]
    Truncated,

    #[error("invalid WARC version line: {0:?}")]
    InvalidVersionLine(String),

    #[error("invalid header line: {0:?}")]
    InvalidHeaderLine(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    #[error("invalid HTTP message: {0}")]
    InvalidHttpMessage(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Raised by a handler from `extract` or `finalise`.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("extraction failed: {0}")]
    Extract(String),

    #[error("finalisation failed: {0}")]
    Finalise(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Failure to open a processor.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    HandlerLoad(#[from] HandlerLoadError),
}
