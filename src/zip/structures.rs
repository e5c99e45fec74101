use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::ZipError;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl From<u16> for CompressionMethod {
    fn from(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            other => CompressionMethod::Unknown(other),
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
pub(crate) struct EndOfCentralDirectory {
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self, ZipError> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::InvalidStructure("end of central directory"));
        }

        // Skip the two disk number fields; multi-disk archives are not supported.
        let mut cursor = Cursor::new(&data[8..]);
        Ok(Self {
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFF_FFFF
            || self.cd_offset == 0xFFFF_FFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub(crate) struct Zip64Locator {
    pub eocd64_offset: u64,
}

impl Zip64Locator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self, ZipError> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::InvalidStructure("ZIP64 end of central directory locator"));
        }

        let mut cursor = Cursor::new(&data[8..]);
        Ok(Self {
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub(crate) struct Zip64EndOfCentralDirectory {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self, ZipError> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::InvalidStructure("ZIP64 end of central directory"));
        }

        // signature(4) size(8) versions(4) disk numbers(8) disk entries(8)
        let mut cursor = Cursor::new(&data[32..]);
        Ok(Self {
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub(crate) const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub(crate) const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub(crate) const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub(crate) const LFH_SIZE: usize = 30;

/// Extra field tag carrying ZIP64 sizes and offsets.
pub(crate) const ZIP64_EXTRA_FIELD: u16 = 0x0001;

const FLAG_ENCRYPTED: u16 = 0x0001;

/// One member as described by the Central Directory.
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub compression_method: CompressionMethod,
    pub flags: u16,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub is_directory: bool,
}

impl ZipFileEntry {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
}
