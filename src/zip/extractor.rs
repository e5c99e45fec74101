use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use flate2::Crc;
use flate2::write::DeflateDecoder;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::io::ReadAt;

use super::ZipError;
use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// Upper bound on bytes read from the source per request.
const CHUNK_SIZE: u64 = 256 * 1024;

/// ZIP member extractor
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    pub fn reader(&self) -> &Arc<R> {
        self.parser.reader()
    }

    /// List all entries in the archive
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>, ZipError> {
        self.parser.list_files().await
    }

    /// Extract a member into memory. Meant for small metadata members.
    pub async fn extract_to_memory(&self, entry: &ZipFileEntry) -> Result<Vec<u8>, ZipError> {
        let mut buf = Vec::with_capacity(entry.uncompressed_size.min(CHUNK_SIZE) as usize);
        self.copy_entry(entry, &mut buf).await?;
        Ok(buf)
    }

    /// Extract a member to `output_path`, creating parent directories.
    /// Returns the number of bytes written.
    pub async fn extract_to_file(
        &self,
        entry: &ZipFileEntry,
        output_path: &Path,
    ) -> Result<u64, ZipError> {
        if let Some(parent) = output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(output_path).await?;
        let written = self.copy_entry(entry, &mut file).await?;
        file.flush().await?;
        Ok(written)
    }

    /// Stream the member's data through the decoder into `out`, then check
    /// the decoded size and CRC-32 against the Central Directory.
    async fn copy_entry<W>(&self, entry: &ZipFileEntry, out: &mut W) -> Result<u64, ZipError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if entry.is_encrypted() {
            return Err(ZipError::Encrypted);
        }
        let mut inflater = match entry.compression_method {
            CompressionMethod::Stored => None,
            CompressionMethod::Deflate => Some(DeflateDecoder::new(Vec::new())),
            CompressionMethod::Unknown(method) => {
                return Err(ZipError::UnsupportedCompression(method));
            }
        };

        let mut offset = self.parser.data_offset(entry).await?;
        let mut remaining = entry.compressed_size;
        let mut chunk = vec![0u8; remaining.min(CHUNK_SIZE) as usize];
        let mut crc = Crc::new();
        let mut written: u64 = 0;

        while remaining > 0 {
            let n = remaining.min(CHUNK_SIZE) as usize;
            self.parser
                .reader()
                .read_exact_at(offset, &mut chunk[..n])
                .await?;
            offset += n as u64;
            remaining -= n as u64;

            let decoded: &[u8] = match inflater.as_mut() {
                Some(inflater) => {
                    inflater.write_all(&chunk[..n])?;
                    inflater.get_ref().as_slice()
                }
                None => &chunk[..n],
            };
            crc.update(decoded);
            out.write_all(decoded).await?;
            written += decoded.len() as u64;
            if let Some(inflater) = inflater.as_mut() {
                inflater.get_mut().clear();
            }
        }

        if let Some(inflater) = inflater {
            let tail = inflater.finish()?;
            crc.update(&tail);
            out.write_all(&tail).await?;
            written += tail.len() as u64;
        }

        if written != entry.uncompressed_size {
            return Err(ZipError::SizeMismatch {
                expected: entry.uncompressed_size,
                actual: written,
            });
        }
        if crc.sum() != entry.crc32 {
            return Err(ZipError::CrcMismatch {
                expected: entry.crc32,
                actual: crc.sum(),
            });
        }

        Ok(written)
    }
}
