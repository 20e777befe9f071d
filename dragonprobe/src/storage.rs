//! Decoding of the persistent storage header.
//!
//! The device keeps a 256 byte header in the last page of its flash:
//!
//! ```text
//!   0..16   magic
//!  16..18   firmware version (u16 le)
//!  18       current mode
//!  19       number of stored mode blobs
//!  20..28   reserved
//!  28..32   checksum of the mode table (u32 le)
//!  32..224  mode table, 16 entries of 12 bytes
//! 224..256  reserved
//! ```
//!
//! Unused table entries are filled with `0xff`.
use crate::error::{Error, Result};

pub const HEADER_SIZE: usize = 256;
pub const MODE_ENTRY_SIZE: usize = 12;
pub const MAX_MODE_ENTRIES: usize = 16;

pub const MAGIC: [u8; 16] = *b"\xf0\x9f\x8f\xb3\xef\xb8\x8f\xe2\x80\x8d\xe2\x9a\xa7\xef\xb8\x8f";

const TABLE_START: usize = 32;
const TABLE_END: usize = TABLE_START + MAX_MODE_ENTRIES * MODE_ENTRY_SIZE;
const EMPTY: u16 = 0xffff;

/// Checksum used by the firmware for the mode table and the mode blobs.
///
/// Note this is not textbook djb2: the device computes `h += h * 33 + b`.
pub fn djb2(data: &[u8]) -> u32 {
    data.iter().fold(5381u32, |hash, byte| {
        hash.wrapping_add(hash.wrapping_mul(33))
            .wrapping_add(u32::from(*byte))
    })
}

/// One row of the mode table, describing a stored per-mode data blob.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ModeEntry {
    pub version: u16,
    pub data_size: u16,
    /// Offset of the blob from the start of flash (28 bits).
    pub offset: u32,
    pub mode: u8,
    pub data_djb2: u32,
}

impl ModeEntry {
    fn from_bytes(b: &[u8]) -> ModeEntry {
        let offset_and_mode = u32::from_le_bytes([b[4], b[5], b[6], b[7]]);
        ModeEntry {
            version: u16::from_le_bytes([b[0], b[1]]),
            data_size: u16::from_le_bytes([b[2], b[3]]),
            offset: offset_and_mode & ((1 << 28) - 1),
            mode: (offset_and_mode >> 28) as u8,
            data_djb2: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
        }
    }

    fn is_empty(&self) -> bool {
        self.version == EMPTY || self.data_size == EMPTY
    }

    /// Checks a blob fetched from the device against this entry.
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() == usize::from(self.data_size) && djb2(data) == self.data_djb2
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageInfo {
    pub magic: [u8; 16],
    pub version: u16,
    pub current_mode: u8,
    pub nmodes: u8,
    pub table_djb2: u32,
    /// Valid rows of the mode table, in table order.
    pub modes: Vec<ModeEntry>,
    table: Vec<u8>,
}

impl StorageInfo {
    pub fn from_bytes(b: &[u8]) -> Result<StorageInfo> {
        if b.len() != HEADER_SIZE {
            return Err(Error::Framing(format!(
                "storage header has {} bytes, expected {}",
                b.len(),
                HEADER_SIZE
            )));
        }

        let mut magic = [0u8; 16];
        magic.copy_from_slice(&b[..16]);
        let table = b[TABLE_START..TABLE_END].to_vec();
        let modes: Vec<ModeEntry> = table
            .chunks_exact(MODE_ENTRY_SIZE)
            .map(ModeEntry::from_bytes)
            .filter(|entry| !entry.is_empty())
            .collect();

        let nmodes = b[19];
        if modes.len() != usize::from(nmodes) {
            return Err(Error::Framing(format!(
                "storage header claims {} stored modes, but the table has {} valid entries",
                nmodes,
                modes.len()
            )));
        }

        Ok(StorageInfo {
            magic,
            version: u16::from_le_bytes([b[16], b[17]]),
            current_mode: b[18],
            nmodes,
            table_djb2: u32::from_le_bytes([b[28], b[29], b[30], b[31]]),
            modes,
            table,
        })
    }

    pub fn magic_valid(&self) -> bool {
        self.magic == MAGIC
    }

    /// Whether the stored table checksum matches the raw table.
    pub fn table_valid(&self) -> bool {
        djb2(&self.table) == self.table_djb2
    }

    pub fn entry_for_mode(&self, mode: u8) -> Option<&ModeEntry> {
        self.modes.iter().find(|entry| entry.mode == mode)
    }
}
