//! # warcex
//!
//! Extract structured data from WACZ web archives.
//!
//! A WACZ file is a ZIP container holding WARC capture files. This library
//! opens the container (locally, or remotely with HTTP Range requests so
//! only the needed members are downloaded), reconstructs the HTTP
//! request/response pairs recorded in each WARC file and hands every pair
//! whose URL a content handler claims to that handler.
//!
//! ## Features
//!
//! - WACZ/ZIP access from the local filesystem or HTTP/HTTPS URLs
//! - ZIP64, STORED and DEFLATE members, CRC-checked extraction
//! - Plain and gzip-compressed WARC files
//! - Two-pass request/response correlation bounded by the claimed traffic
//! - URL routing with exact, prefix (`*`) and `/regex/` patterns
//! - Built-in handlers plus handlers sideloaded from dynamic libraries
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use warcex::{ProcessorOptions, WaczProcessor};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let options = ProcessorOptions {
//!         output_root: "output".into(),
//!         ..Default::default()
//!     };
//!     let mut processor = WaczProcessor::open(Path::new("capture.wacz"), options).await?;
//!
//!     let result = processor.run().await?;
//!     for (handler, count) in &result.handler_counts {
//!         println!("{handler}: {count}");
//!     }
//!
//!     processor.close()?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod error;
pub mod handler;
pub mod io;
pub mod pairer;
pub mod pipeline;
pub mod warc;
pub mod zip;

pub use archive::{ArchiveMember, MemberRole, WaczArchive};
pub use error::{
    ContainerError, HandlerError, HandlerLoadError, PatternError, ProcessorError, RecordParseError,
};
pub use handler::{
    Handler, HandlerDescriptor, HandlerId, HandlerRegistry, QueryParams, QueryValue, RequestData,
    ResponseData, UrlPattern,
};
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};
pub use pairer::{Pair, PairingStats, RecordPairer};
pub use pipeline::{ExtractionResult, FailureStage, HandlerFailure, ProcessorOptions, WaczProcessor};
