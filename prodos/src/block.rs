//! Pack/unpack of directory, index, and bitmap blocks.

use crate::metadata::{HeaderEntry, FileEntry, BLOCK_SIZE, ENTRIES_PER_BLOCK, ENTRY_LENGTH};
use log::warn;

/// One 512-byte block of a directory: an optional header entry (present
/// only in the key block), a run of file entries, and a one-byte pad.
#[derive(Debug, Clone)]
pub struct DirectoryBlock {
    pub prev: u16,
    pub next: u16,
    pub header: Option<HeaderEntry>,
    pub entries: Vec<FileEntry>,
}

impl DirectoryBlock {
    /// Packs this block, padding with empty entries / zero bytes as needed.
    /// `entries` together with an optional header must fill the block exactly:
    /// `(header.is_some() as usize) + entries.len() == ENTRIES_PER_BLOCK`.
    pub fn pack(&self) -> [u8; BLOCK_SIZE] {
        let mut out = [0u8; BLOCK_SIZE];
        out[0..2].copy_from_slice(&self.prev.to_le_bytes());
        out[2..4].copy_from_slice(&self.next.to_le_bytes());
        let mut offset = 4;
        if let Some(h) = &self.header {
            out[offset..offset + ENTRY_LENGTH].copy_from_slice(&h.pack());
            offset += ENTRY_LENGTH;
        }
        for e in &self.entries {
            out[offset..offset + ENTRY_LENGTH].copy_from_slice(&e.pack());
            offset += ENTRY_LENGTH;
        }
        while offset + ENTRY_LENGTH <= 4 + ENTRIES_PER_BLOCK * ENTRY_LENGTH {
            out[offset..offset + ENTRY_LENGTH].copy_from_slice(&FileEntry::empty().pack());
            offset += ENTRY_LENGTH;
        }
        // last byte of the block is the padding byte, left zero.
        out
    }

    /// Unpacks a block. `is_key_block` tells the decoder whether slot 0
    /// should be read as a directory header.
    pub fn unpack(buf: &[u8; BLOCK_SIZE], is_key_block: bool) -> crate::error::Result<Self> {
        let prev = u16::from_le_bytes([buf[0], buf[1]]);
        let next = u16::from_le_bytes([buf[2], buf[3]]);
        let mut offset = 4;
        let header = if is_key_block {
            let mut raw = [0u8; ENTRY_LENGTH];
            raw.copy_from_slice(&buf[offset..offset + ENTRY_LENGTH]);
            offset += ENTRY_LENGTH;
            Some(HeaderEntry::unpack(&raw)?)
        } else {
            None
        };
        let mut entries = Vec::new();
        while offset + ENTRY_LENGTH <= 4 + ENTRIES_PER_BLOCK * ENTRY_LENGTH {
            let mut raw = [0u8; ENTRY_LENGTH];
            raw.copy_from_slice(&buf[offset..offset + ENTRY_LENGTH]);
            entries.push(FileEntry::unpack(&raw));
            offset += ENTRY_LENGTH;
        }
        if buf[offset] != 0 {
            warn!("directory block padding byte is non-zero ({:#x})", buf[offset]);
        }
        Ok(DirectoryBlock { prev, next, header, entries })
    }
}

/// A 256-pointer index block: low bytes at 0..256, high bytes at 256..512.
/// A pointer of 0 denotes a sparse (unallocated) subtree.
#[derive(Debug, Clone)]
pub struct IndexBlock {
    pub pointers: [u16; 256],
}

impl IndexBlock {
    pub fn pack(&self) -> [u8; BLOCK_SIZE] {
        let mut out = [0u8; BLOCK_SIZE];
        for (i, p) in self.pointers.iter().enumerate() {
            out[i] = (*p & 0xff) as u8;
            out[256 + i] = (*p >> 8) as u8;
        }
        out
    }

    pub fn unpack(buf: &[u8; BLOCK_SIZE]) -> Self {
        let mut pointers = [0u16; 256];
        for i in 0..256 {
            pointers[i] = buf[i] as u16 | ((buf[256 + i] as u16) << 8);
        }
        IndexBlock { pointers }
    }
}

/// Location of block `i`'s free/used bit within the bitmap area.
pub fn bit_location(i: u16) -> (usize, u8) {
    let i = i as usize;
    (i / 8, 7 - (i % 8) as u8)
}

pub fn bitmap_blocks_needed(total_blocks: u16) -> u16 {
    ((total_blocks as u32 - 1) / (BLOCK_SIZE as u32 * 8) + 1) as u16
}
