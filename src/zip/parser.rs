//! Low-level ZIP structure parser over any [`ReadAt`] source.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::io::ReadAt;

use super::ZipError;
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Reads the Central Directory and Local File Headers of an archive.
///
/// Typically used through [`ZipExtractor`](super::ZipExtractor).
pub struct ZipParser<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Locate the End of Central Directory record.
    ///
    /// Tries the comment-less position first, then scans the tail of the
    /// source backwards for a signature whose comment length lines up with
    /// the end of the file.
    async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64), ZipError> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(ZipError::MissingEocd);
        }

        let offset = self.size - eocd_size;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf).await?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && buf[20..22] == [0, 0] {
            return Ok((EndOfCentralDirectory::from_bytes(&buf)?, offset));
        }

        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;
        let mut tail = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut tail).await?;

        for i in (0..=tail.len() - EndOfCentralDirectory::SIZE).rev() {
            if &tail[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let comment_len = u16::from_le_bytes([tail[i + 20], tail[i + 21]]) as usize;
            if comment_len == tail.len() - i - EndOfCentralDirectory::SIZE {
                let eocd =
                    EndOfCentralDirectory::from_bytes(&tail[i..i + EndOfCentralDirectory::SIZE])?;
                return Ok((eocd, search_start + i as u64));
            }
        }

        Err(ZipError::MissingEocd)
    }

    /// Follow the ZIP64 locator that sits right before the regular EOCD.
    async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EndOfCentralDirectory, ZipError> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64Locator::SIZE as u64)
            .ok_or(ZipError::InvalidStructure("ZIP64 end of central directory locator"))?;
        let mut locator_buf = vec![0u8; Zip64Locator::SIZE];
        self.reader
            .read_exact_at(locator_offset, &mut locator_buf)
            .await?;
        let locator = Zip64Locator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EndOfCentralDirectory::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
            .await?;
        Zip64EndOfCentralDirectory::from_bytes(&eocd64_buf)
    }

    /// List every entry of the Central Directory, in stored order.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>, ZipError> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                u64::from(eocd.cd_offset),
                u64::from(eocd.cd_size),
                u64::from(eocd.total_entries),
            )
        };

        if cd_offset.checked_add(cd_size).is_none_or(|end| end > self.size)
            || total_entries.saturating_mul(CDFH_MIN_SIZE as u64) > cd_size
        {
            return Err(ZipError::InvalidStructure("central directory bounds"));
        }

        // One read for the whole directory; a single Range request over HTTP.
        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut cd_data).await?;

        let mut cursor = Cursor::new(cd_data.as_slice());
        (0..total_entries)
            .map(|_| Self::parse_cdfh(&mut cursor))
            .collect()
    }

    fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry, ZipError> {
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            return Err(ZipError::InvalidStructure("central directory file header"));
        }

        let _version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let _last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let _last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = u64::from(cursor.read_u32::<LittleEndian>()?);
        let mut uncompressed_size = u64::from(cursor.read_u32::<LittleEndian>()?);
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let _external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut lfh_offset = u64::from(cursor.read_u32::<LittleEndian>()?);

        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut file_name_bytes)?;
        let file_name = String::from_utf8_lossy(&file_name_bytes).into_owned();
        let is_directory = file_name.ends_with('/');

        let extra_end = cursor.position() + u64::from(extra_field_length);
        while cursor.position() + 4 <= extra_end {
            let tag = cursor.read_u16::<LittleEndian>()?;
            let field_size = u64::from(cursor.read_u16::<LittleEndian>()?);
            let field_end = cursor.position() + field_size;

            if tag == ZIP64_EXTRA_FIELD {
                // Values appear only for header fields saturated to 0xFFFFFFFF, in this order.
                if uncompressed_size == 0xFFFF_FFFF && cursor.position() + 8 <= field_end {
                    uncompressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if compressed_size == 0xFFFF_FFFF && cursor.position() + 8 <= field_end {
                    compressed_size = cursor.read_u64::<LittleEndian>()?;
                }
                if lfh_offset == 0xFFFF_FFFF && cursor.position() + 8 <= field_end {
                    lfh_offset = cursor.read_u64::<LittleEndian>()?;
                }
            }
            cursor.set_position(field_end);
        }
        cursor.set_position(extra_end + u64::from(file_comment_length));

        Ok(ZipFileEntry {
            file_name,
            compression_method: CompressionMethod::from(compression_method),
            flags,
            compressed_size,
            uncompressed_size,
            crc32,
            lfh_offset,
            is_directory,
        })
    }

    /// Offset of the first byte of member data.
    ///
    /// The Local File Header repeats the name and may carry a different
    /// extra field than the Central Directory, so its lengths are re-read.
    pub async fn data_offset(&self, entry: &ZipFileEntry) -> Result<u64, ZipError> {
        let mut lfh = [0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh).await?;
        if &lfh[0..4] != LFH_SIGNATURE {
            return Err(ZipError::InvalidStructure("local file header"));
        }

        let file_name_length = u64::from(u16::from_le_bytes([lfh[26], lfh[27]]));
        let extra_field_length = u64::from(u16::from_le_bytes([lfh[28], lfh[29]]));

        Ok(entry.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}
