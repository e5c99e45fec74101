//! WARC capture records.
//!
//! [`WarcReader`] walks the records of one archive unit sequentially. Record
//! blocks are only read when asked for, so a scan that looks at headers
//! alone never buffers bodies. The [`http`] submodule parses the HTTP
//! messages embedded in `request` and `response` record blocks.

pub mod http;
mod record;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use flate2::bufread::MultiGzDecoder;

pub use http::{HeaderMap, HttpRequest, HttpResponse};
pub use record::{RecordHeader, RecordType, WarcReader};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Open a `.warc` or `.warc.gz` file. Compression is detected from the
/// content, not the file name.
pub fn open_unit(path: &Path) -> io::Result<WarcReader<Box<dyn BufRead>>> {
    let mut file = BufReader::new(File::open(path)?);
    let gzipped = file.fill_buf()?.starts_with(&GZIP_MAGIC);

    let inner: Box<dyn BufRead> = if gzipped {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(file)
    };
    Ok(WarcReader::new(inner))
}
