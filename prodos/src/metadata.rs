//! Pack/unpack of directory entries and their header variants.

use crate::datetime::P8DateTime;
use crate::error::{Error, Result};
use bitflags::bitflags;

pub const ENTRY_LENGTH: usize = 39;
pub const ENTRIES_PER_BLOCK: usize = 13;
pub const BLOCK_SIZE: usize = 512;
pub const VOLUME_KEY_BLOCK: u16 = 2;
pub const VOLUME_DIRECTORY_LENGTH: u16 = 4;

bitflags! {
    /// Per-entry access bitmask. `D` (destroy) and `N` (rename) gate
    /// structural operations; `I` (invisible) and `B` (backup) are
    /// informational only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        const READ    = 0x01;
        const WRITE   = 0x02;
        const INVISIBLE = 0x04;
        const BACKUP  = 0x20;
        const RENAME  = 0x40;
        const DESTROY = 0x80;
    }
}

impl Default for Access {
    fn default() -> Self {
        Access::READ | Access::WRITE | Access::BACKUP | Access::RENAME | Access::DESTROY
    }
}

/// The 4-bit storage-type tag of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Empty,
    Seedling,
    Sapling,
    Tree,
    Subdirectory,
    SubdirectoryHeader,
    VolumeHeader,
    /// Any tag this library does not mutate (Pascal area, extended files, ...).
    Other(u8),
}

impl StorageType {
    pub fn code(self) -> u8 {
        match self {
            StorageType::Empty => 0x0,
            StorageType::Seedling => 0x1,
            StorageType::Sapling => 0x2,
            StorageType::Tree => 0x3,
            StorageType::Subdirectory => 0xD,
            StorageType::SubdirectoryHeader => 0xE,
            StorageType::VolumeHeader => 0xF,
            StorageType::Other(c) => c,
        }
    }

    pub fn from_code(c: u8) -> Self {
        match c {
            0x0 => StorageType::Empty,
            0x1 => StorageType::Seedling,
            0x2 => StorageType::Sapling,
            0x3 => StorageType::Tree,
            0xD => StorageType::Subdirectory,
            0xE => StorageType::SubdirectoryHeader,
            0xF => StorageType::VolumeHeader,
            other => StorageType::Other(other),
        }
    }

    pub fn is_simple_file(self) -> bool {
        matches!(self, StorageType::Seedling | StorageType::Sapling | StorageType::Tree)
    }

    pub fn is_directory_header(self) -> bool {
        matches!(self, StorageType::SubdirectoryHeader | StorageType::VolumeHeader)
    }

    /// Storage type for a standard file of `eof` bytes.
    pub fn for_size(eof: usize) -> Self {
        if eof <= BLOCK_SIZE {
            StorageType::Seedling
        } else if eof <= BLOCK_SIZE * 256 {
            StorageType::Sapling
        } else {
            StorageType::Tree
        }
    }

    /// Tree depth (1, 2 or 3) for SEEDLING/SAPLING/TREE.
    pub fn depth(self) -> usize {
        match self {
            StorageType::Seedling => 1,
            StorageType::Sapling => 2,
            StorageType::Tree => 3,
            _ => 0,
        }
    }
}

/// Decode the 15-byte name field given a name length from the header nibble.
pub fn decode_name(bytes: &[u8; 15], len: u8) -> String {
    let len = (len as usize).min(15);
    String::from_utf8_lossy(&bytes[..len]).to_uppercase()
}

/// Encode a name into its 15-byte field plus its length, erroring if too long.
pub fn encode_name(name: &str) -> Result<([u8; 15], u8)> {
    let upper = name.to_uppercase();
    if upper.len() > 15 {
        return Err(Error::Capacity(format!("name '{}' exceeds 15 characters", name)));
    }
    let mut buf = [0u8; 15];
    buf[..upper.len()].copy_from_slice(upper.as_bytes());
    Ok((buf, upper.len() as u8))
}

/// Normalize a `/`-separated path for storage: upper-case, each component
/// forced to start with a letter, and any character outside `[A-Z0-9./]`
/// replaced with `'0'`.
pub fn legal_path(path: &str) -> String {
    let upper = path.to_uppercase();
    upper
        .split('/')
        .map(|part| {
            let mut cleaned: String = part
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '0' })
                .collect();
            if let Some(first) = cleaned.chars().next() {
                if !first.is_ascii_alphabetic() {
                    cleaned.insert(0, 'A');
                }
            }
            cleaned
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// A standard-file or subdirectory entry, as seen from its parent directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub storage_type: StorageType,
    pub name: String,
    pub file_type: u8,
    pub key_pointer: u16,
    pub blocks_used: u16,
    pub eof: u32,
    pub date_time: P8DateTime,
    pub version: u8,
    pub min_version: u8,
    pub access: Access,
    pub aux_type: u16,
    pub last_mod: P8DateTime,
    pub header_pointer: u16,
}

impl FileEntry {
    pub const EMPTY_BYTES: [u8; ENTRY_LENGTH] = [0u8; ENTRY_LENGTH];

    pub fn is_active(&self) -> bool {
        !matches!(self.storage_type, StorageType::Empty)
    }

    pub fn pack(&self) -> [u8; ENTRY_LENGTH] {
        let mut out = [0u8; ENTRY_LENGTH];
        let (name_bytes, name_len) = encode_name(&self.name).unwrap_or(([0u8; 15], 0));
        out[0] = (self.storage_type.code() << 4) | (name_len & 0x0f);
        out[1..16].copy_from_slice(&name_bytes);
        out[16] = self.file_type;
        out[17..19].copy_from_slice(&self.key_pointer.to_le_bytes());
        out[19..21].copy_from_slice(&self.blocks_used.to_le_bytes());
        let eof_lo = (self.eof & 0xffff) as u16;
        let eof_hi = ((self.eof >> 16) & 0xff) as u8;
        out[21..23].copy_from_slice(&eof_lo.to_le_bytes());
        out[23] = eof_hi;
        out[24..28].copy_from_slice(&self.date_time.pack());
        out[28] = self.version;
        out[29] = self.min_version;
        out[30] = self.access.bits();
        out[31..33].copy_from_slice(&self.aux_type.to_le_bytes());
        out[33..37].copy_from_slice(&self.last_mod.pack());
        out[37..39].copy_from_slice(&self.header_pointer.to_le_bytes());
        out
    }

    pub fn unpack(buf: &[u8; ENTRY_LENGTH]) -> Self {
        let storage_type = StorageType::from_code(buf[0] >> 4);
        let name_len = buf[0] & 0x0f;
        let mut name_bytes = [0u8; 15];
        name_bytes.copy_from_slice(&buf[1..16]);
        let name = decode_name(&name_bytes, name_len);
        let eof_lo = u16::from_le_bytes([buf[21], buf[22]]);
        let eof = eof_lo as u32 | ((buf[23] as u32) << 16);
        let mut dt = [0u8; 4];
        dt.copy_from_slice(&buf[24..28]);
        let mut lm = [0u8; 4];
        lm.copy_from_slice(&buf[33..37]);
        FileEntry {
            storage_type,
            name,
            file_type: buf[16],
            key_pointer: u16::from_le_bytes([buf[17], buf[18]]),
            blocks_used: u16::from_le_bytes([buf[19], buf[20]]),
            eof,
            date_time: P8DateTime::unpack(&dt),
            version: buf[28],
            min_version: buf[29],
            access: Access::from_bits_truncate(buf[30]),
            aux_type: u16::from_le_bytes([buf[31], buf[32]]),
            last_mod: P8DateTime::unpack(&lm),
            header_pointer: u16::from_le_bytes([buf[37], buf[38]]),
        }
    }

    /// A blank (inactive) entry slot.
    pub fn empty() -> Self {
        FileEntry::unpack(&Self::EMPTY_BYTES)
    }
}

/// The header entry of the root (volume) directory's key block.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeHeader {
    pub name: String,
    pub date_time: P8DateTime,
    pub version: u8,
    pub min_version: u8,
    pub access: Access,
    pub entries_per_block: u8,
    pub file_count: u16,
    pub bit_map_pointer: u16,
    pub total_blocks: u16,
}

impl VolumeHeader {
    pub fn pack(&self) -> [u8; ENTRY_LENGTH] {
        let mut out = [0u8; ENTRY_LENGTH];
        let (name_bytes, name_len) = encode_name(&self.name).unwrap_or(([0u8; 15], 0));
        out[0] = (StorageType::VolumeHeader.code() << 4) | (name_len & 0x0f);
        out[1..16].copy_from_slice(&name_bytes);
        // 8 reserved bytes at 16..24
        out[24..28].copy_from_slice(&self.date_time.pack());
        out[28] = self.version;
        out[29] = self.min_version;
        out[30] = self.access.bits();
        out[31] = ENTRY_LENGTH as u8;
        out[32] = self.entries_per_block;
        out[33..35].copy_from_slice(&self.file_count.to_le_bytes());
        out[35..37].copy_from_slice(&self.bit_map_pointer.to_le_bytes());
        out[37..39].copy_from_slice(&self.total_blocks.to_le_bytes());
        out
    }

    pub fn unpack(buf: &[u8; ENTRY_LENGTH]) -> Result<Self> {
        let storage_type = StorageType::from_code(buf[0] >> 4);
        if !matches!(storage_type, StorageType::VolumeHeader) {
            return Err(Error::Format(format!(
                "expected volume header, found storage type {:#x}",
                storage_type.code()
            )));
        }
        let name_len = buf[0] & 0x0f;
        let mut name_bytes = [0u8; 15];
        name_bytes.copy_from_slice(&buf[1..16]);
        let mut dt = [0u8; 4];
        dt.copy_from_slice(&buf[24..28]);
        Ok(VolumeHeader {
            name: decode_name(&name_bytes, name_len),
            date_time: P8DateTime::unpack(&dt),
            version: buf[28],
            min_version: buf[29],
            access: Access::from_bits_truncate(buf[30]),
            entries_per_block: buf[32],
            file_count: u16::from_le_bytes([buf[33], buf[34]]),
            bit_map_pointer: u16::from_le_bytes([buf[35], buf[36]]),
            total_blocks: u16::from_le_bytes([buf[37], buf[38]]),
        })
    }
}

/// The header entry of a subdirectory's key block.
#[derive(Debug, Clone, PartialEq)]
pub struct SubdirHeader {
    pub name: String,
    pub date_time: P8DateTime,
    pub version: u8,
    pub min_version: u8,
    pub access: Access,
    pub entries_per_block: u8,
    pub file_count: u16,
    pub parent_pointer: u16,
    pub parent_entry_number: u8,
}

impl SubdirHeader {
    pub fn pack(&self) -> [u8; ENTRY_LENGTH] {
        let mut out = [0u8; ENTRY_LENGTH];
        let (name_bytes, name_len) = encode_name(&self.name).unwrap_or(([0u8; 15], 0));
        out[0] = (StorageType::SubdirectoryHeader.code() << 4) | (name_len & 0x0f);
        out[1..16].copy_from_slice(&name_bytes);
        // 8 reserved bytes at 16..24
        out[24..28].copy_from_slice(&self.date_time.pack());
        out[28] = self.version;
        out[29] = self.min_version;
        out[30] = self.access.bits();
        out[31] = ENTRY_LENGTH as u8;
        out[32] = self.entries_per_block;
        out[33..35].copy_from_slice(&self.file_count.to_le_bytes());
        out[35..37].copy_from_slice(&self.parent_pointer.to_le_bytes());
        out[37] = self.parent_entry_number;
        out[38] = ENTRY_LENGTH as u8;
        out
    }

    pub fn unpack(buf: &[u8; ENTRY_LENGTH]) -> Result<Self> {
        let storage_type = StorageType::from_code(buf[0] >> 4);
        if !matches!(storage_type, StorageType::SubdirectoryHeader) {
            return Err(Error::Format(format!(
                "expected subdirectory header, found storage type {:#x}",
                storage_type.code()
            )));
        }
        let name_len = buf[0] & 0x0f;
        let mut name_bytes = [0u8; 15];
        name_bytes.copy_from_slice(&buf[1..16]);
        let mut dt = [0u8; 4];
        dt.copy_from_slice(&buf[24..28]);
        Ok(SubdirHeader {
            name: decode_name(&name_bytes, name_len),
            date_time: P8DateTime::unpack(&dt),
            version: buf[28],
            min_version: buf[29],
            access: Access::from_bits_truncate(buf[30]),
            entries_per_block: buf[32],
            file_count: u16::from_le_bytes([buf[33], buf[34]]),
            parent_pointer: u16::from_le_bytes([buf[35], buf[36]]),
            parent_entry_number: buf[37],
        })
    }
}

/// Either header kind found in slot 0 of a directory's key block.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderEntry {
    Volume(VolumeHeader),
    Subdirectory(SubdirHeader),
}

impl HeaderEntry {
    pub fn pack(&self) -> [u8; ENTRY_LENGTH] {
        match self {
            HeaderEntry::Volume(h) => h.pack(),
            HeaderEntry::Subdirectory(h) => h.pack(),
        }
    }

    pub fn file_count(&self) -> u16 {
        match self {
            HeaderEntry::Volume(h) => h.file_count,
            HeaderEntry::Subdirectory(h) => h.file_count,
        }
    }

    pub fn set_file_count(&mut self, n: u16) {
        match self {
            HeaderEntry::Volume(h) => h.file_count = n,
            HeaderEntry::Subdirectory(h) => h.file_count = n,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            HeaderEntry::Volume(h) => &h.name,
            HeaderEntry::Subdirectory(h) => &h.name,
        }
    }

    /// Tries to decode whichever header kind the first byte's storage type indicates.
    pub fn unpack(buf: &[u8; ENTRY_LENGTH]) -> Result<Self> {
        let storage_type = StorageType::from_code(buf[0] >> 4);
        match storage_type {
            StorageType::VolumeHeader => Ok(HeaderEntry::Volume(VolumeHeader::unpack(buf)?)),
            StorageType::SubdirectoryHeader => {
                Ok(HeaderEntry::Subdirectory(SubdirHeader::unpack(buf)?))
            }
            other => Err(Error::Format(format!(
                "expected a directory header, found storage type {:#x}",
                other.code()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_entry_round_trip() {
        let e = FileEntry {
            storage_type: StorageType::Sapling,
            name: "HELLO.TXT".to_string(),
            file_type: 0x04,
            key_pointer: 17,
            blocks_used: 5,
            eof: 70000,
            date_time: P8DateTime::now(),
            version: 0,
            min_version: 0,
            access: Access::default(),
            aux_type: 0,
            last_mod: P8DateTime::now(),
            header_pointer: 2,
        };
        let packed = e.pack();
        assert_eq!(packed.len(), ENTRY_LENGTH);
        let unpacked = FileEntry::unpack(&packed);
        assert_eq!(unpacked, e);
    }

    #[test]
    fn empty_entry_is_not_active() {
        assert!(!FileEntry::empty().is_active());
    }

    #[test]
    fn volume_header_round_trip() {
        let h = VolumeHeader {
            name: "MYDISK".to_string(),
            date_time: P8DateTime::EMPTY,
            version: 0,
            min_version: 0,
            access: Access::default(),
            entries_per_block: ENTRIES_PER_BLOCK as u8,
            file_count: 3,
            bit_map_pointer: 6,
            total_blocks: 280,
        };
        let packed = h.pack();
        assert_eq!(VolumeHeader::unpack(&packed).unwrap(), h);
    }

    #[test]
    fn legal_path_forces_leading_letter_and_uppercase() {
        assert_eq!(legal_path("/1data/my file!"), "/A1DATA/MY0FILE0");
    }

    #[test]
    fn legal_path_is_idempotent() {
        let once = legal_path("weird name$$.txt");
        let twice = legal_path(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn name_too_long_is_capacity_error() {
        assert!(encode_name("THIS.NAME.IS.WAY.TOO.LONG").is_err());
    }
}
