//! Random-access byte sources for the WACZ container.
//!
//! The container is read from the end (central directory first), then one
//! member at a time, so every source only needs positioned reads.

mod http;
mod local;

pub use http::HttpRangeReader;
pub use local::LocalFileReader;

use std::io;

use async_trait::async_trait;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer, returning the
    /// number of bytes read. May return fewer bytes than requested.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill `buf` completely from `offset`, failing with
    /// [`io::ErrorKind::UnexpectedEof`] if the source ends first.
    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_at(offset + filled as u64, &mut buf[filled..]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("source ended at offset {}", offset + filled as u64),
                ));
            }
            filled += n;
        }
        Ok(())
    }
}
