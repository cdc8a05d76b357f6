//! The directory file: a linked list of directory blocks holding the
//! volume or subdirectory header plus a compactable table of entries.

use log::warn;

use crate::block::DirectoryBlock;
use crate::datetime::P8DateTime;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::file;
use crate::metadata::{
    Access, FileEntry, HeaderEntry, StorageType, SubdirHeader, VolumeHeader, ENTRIES_PER_BLOCK,
};

/// A directory loaded into memory: its header, its entries (including the
/// EMPTY holes left by removal), and the key blocks backing it on disk.
pub struct DirectoryFile {
    pub key_block: u16,
    pub header: HeaderEntry,
    pub entries: Vec<FileEntry>,
    pub block_list: Vec<u16>,
}

/// Matches a single character against a `[...]` bracket body, supporting
/// `a-z` ranges and a leading `!` negation, as in shell/fnmatch globs.
fn bracket_matches(set: &[u8], c: u8) -> bool {
    let (negate, set) = match set.first() {
        Some(b'!') => (true, &set[1..]),
        _ => (false, set),
    };
    let mut hit = false;
    let mut i = 0;
    while i < set.len() {
        if i + 2 < set.len() && set[i + 1] == b'-' {
            if set[i] <= c && c <= set[i + 2] {
                hit = true;
            }
            i += 3;
        } else {
            if set[i] == c {
                hit = true;
            }
            i += 1;
        }
    }
    hit != negate
}

fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &n[1..]),
            (Some(b'['), _) => {
                if let Some(close) = p.iter().position(|c| *c == b']') {
                    if n.is_empty() {
                        return false;
                    }
                    let set = &p[1..close];
                    if bracket_matches(set, n[0]) {
                        inner(&p[close + 1..], &n[1..])
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
            (Some(pc), Some(nc)) if pc == nc => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.to_uppercase().as_bytes(), name.to_uppercase().as_bytes())
}

impl DirectoryFile {
    /// Reads a directory starting at its key block.
    pub fn read(device: &mut BlockDevice, key_block: u16) -> Result<Self> {
        let mut block_list = vec![key_block];
        let first = DirectoryBlock::unpack(&device.read_block(key_block)?, true)?;
        let header = first.header.clone().expect("key block always has a header");
        let mut entries = first.entries;
        let mut prev = key_block;
        let mut next = first.next;
        while next != 0 {
            let block = DirectoryBlock::unpack(&device.read_block(next)?, false)?;
            if block.prev != prev {
                warn!(
                    "directory block {} has prev_pointer {}, expected {}",
                    next, block.prev, prev
                );
            }
            block_list.push(next);
            entries.extend(block.entries);
            prev = next;
            next = block.next;
        }
        Ok(DirectoryFile { key_block, header, entries, block_list })
    }

    pub fn is_root(&self) -> bool {
        matches!(self.header, HeaderEntry::Volume(_))
    }

    /// Glob a single path component against this directory's active entries.
    pub fn glob_file(&self, pattern: &str) -> Vec<FileEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_active() && glob_match(pattern, &e.name))
            .cloned()
            .collect()
    }

    /// Exact, case-insensitive single-entry lookup.
    pub fn file_entry(&self, name: &str) -> Result<FileEntry> {
        let upper = name.to_uppercase();
        let hits: Vec<_> = self.entries.iter().filter(|e| e.is_active() && e.name == upper).collect();
        match hits.len() {
            0 => Err(Error::NotFound(format!("no entry named {}", name))),
            1 => Ok(hits[0].clone()),
            _ => Err(Error::Ambiguous(format!("more than one entry named {}", name))),
        }
    }

    fn free_slot_index(&self) -> Option<usize> {
        self.entries.iter().position(|e| !e.is_active())
    }

    /// Finds (or makes room for) a slot to hold a new entry, growing the
    /// entries table by one block if every slot is occupied. The root
    /// directory never grows past its original 4 blocks (51 entries), per
    /// the ProDOS volume directory invariant.
    fn reserve_slot(&mut self) -> Result<usize> {
        if let Some(i) = self.free_slot_index() {
            return Ok(i);
        }
        if self.is_root() {
            return Err(Error::Capacity("volume directory is full (51 entries)".into()));
        }
        for _ in 0..ENTRIES_PER_BLOCK {
            self.entries.push(FileEntry::empty());
        }
        Ok(self.free_slot_index().expect("just grew the table"))
    }

    fn file_count(&self) -> u16 {
        self.entries.iter().filter(|e| e.is_active()).count() as u16
    }

    /// Writes an entry into directory storage, creating the file's data
    /// blocks first, then records its directory entry.
    pub fn add_simple_file(
        &mut self,
        device: &mut BlockDevice,
        name: &str,
        file_type: u8,
        aux_type: u16,
        data: &[u8],
    ) -> Result<()> {
        if let Ok(existing) = self.file_entry(name) {
            self.remove_simple_file(device, &existing)?;
        }
        let written = file::write(device, data)?;
        let slot = self.reserve_slot()?;
        let now = P8DateTime::now();
        self.entries[slot] = FileEntry {
            storage_type: written.storage_type,
            name: name.to_uppercase(),
            file_type,
            key_pointer: written.key_pointer,
            blocks_used: written.blocks_used,
            eof: written.eof,
            date_time: now,
            version: 0,
            min_version: 0,
            access: Access::default(),
            aux_type,
            last_mod: now,
            header_pointer: self.key_block,
        };
        self.write(device)
    }

    pub fn remove_simple_file(&mut self, device: &mut BlockDevice, entry: &FileEntry) -> Result<()> {
        if !entry.storage_type.is_simple_file() {
            return Err(Error::TypeMismatch(format!("{} is not a standard file", entry.name)));
        }
        file::free(device, entry.key_pointer, entry.storage_type.depth())?;
        self.remove_entry_named(&entry.name)?;
        self.write(device)
    }

    pub fn add_directory(&mut self, device: &mut BlockDevice, name: &str) -> Result<()> {
        if self.file_entry(name).is_ok() {
            return Err(Error::Invariant(format!("{} already exists", name)));
        }
        let slot = self.reserve_slot()?;
        let child_key = device.allocate_block()?;
        let now = P8DateTime::now();
        let child_header = SubdirHeader {
            name: name.to_uppercase(),
            date_time: now,
            version: 0,
            min_version: 0,
            access: Access::default(),
            entries_per_block: ENTRIES_PER_BLOCK as u8,
            file_count: 0,
            parent_pointer: self.key_block,
            parent_entry_number: (slot + 1) as u8,
        };
        let child = DirectoryBlock {
            prev: 0,
            next: 0,
            header: Some(HeaderEntry::Subdirectory(child_header)),
            entries: vec![FileEntry::empty(); ENTRIES_PER_BLOCK - 1],
        };
        device.write_block(child_key, &child.pack())?;
        self.entries[slot] = FileEntry {
            storage_type: StorageType::Subdirectory,
            name: name.to_uppercase(),
            file_type: 0x0f,
            key_pointer: child_key,
            blocks_used: 1,
            eof: 512,
            date_time: now,
            version: 0,
            min_version: 0,
            access: Access::default(),
            aux_type: 0,
            last_mod: now,
            header_pointer: self.key_block,
        };
        self.write(device)
    }

    pub fn remove_directory(&mut self, device: &mut BlockDevice, entry: &FileEntry) -> Result<()> {
        if !matches!(entry.storage_type, StorageType::Subdirectory) {
            return Err(Error::TypeMismatch(format!("{} is not a directory", entry.name)));
        }
        let child = DirectoryFile::read(device, entry.key_pointer)?;
        if child.entries.iter().any(|e| e.is_active()) {
            return Err(Error::Invariant(format!("directory {} is not empty", entry.name)));
        }
        for block in &child.block_list {
            device.free_block(*block)?;
        }
        self.remove_entry_named(&entry.name)?;
        self.write(device)
    }

    /// Renames an entry in place, without moving it to another directory.
    pub fn rename_entry(&mut self, device: &mut BlockDevice, entry: &FileEntry, new_name: &str) -> Result<()> {
        let slot = self
            .entries
            .iter()
            .position(|e| e.is_active() && e.name == entry.name)
            .ok_or_else(|| Error::NotFound(format!("no entry named {}", entry.name)))?;
        self.entries[slot].name = new_name.to_uppercase();
        self.write(device)
    }

    /// Moves a standard file from this directory into `dst`, optionally
    /// renaming it. The file's data blocks are never touched; only the
    /// directory entry's slot and `header_pointer` change.
    pub fn move_simple_file(
        &mut self,
        device: &mut BlockDevice,
        entry: &FileEntry,
        dst: &mut DirectoryFile,
        new_name: &str,
    ) -> Result<()> {
        let mut moved = entry.clone();
        moved.name = new_name.to_uppercase();
        moved.header_pointer = dst.key_block;
        self.remove_entry_named(&entry.name)?;
        let slot = dst.reserve_slot()?;
        dst.entries[slot] = moved;
        self.write(device)?;
        dst.write(device)
    }

    /// Moves a subdirectory from this directory into `dst`, optionally
    /// renaming it. The child's own key block and data never move; its
    /// subdirectory header is rewritten to point at its new parent slot.
    /// Moving the root directory is forbidden (the root has no entry of
    /// its own to move).
    pub fn move_directory(
        &mut self,
        device: &mut BlockDevice,
        entry: &FileEntry,
        dst: &mut DirectoryFile,
        new_name: &str,
    ) -> Result<()> {
        if entry.header_pointer == 0 {
            return Err(Error::Invariant("cannot move the root directory".into()));
        }
        let mut moved = entry.clone();
        moved.name = new_name.to_uppercase();
        moved.header_pointer = dst.key_block;
        self.remove_entry_named(&entry.name)?;
        let slot = dst.reserve_slot()?;
        dst.entries[slot] = moved.clone();

        let mut child = DirectoryFile::read(device, moved.key_pointer)?;
        if let HeaderEntry::Subdirectory(h) = &mut child.header {
            h.parent_pointer = dst.key_block;
            h.parent_entry_number = (slot + 1) as u8;
        }
        child.rewrite_header_only(device)?;

        self.write(device)?;
        dst.write(device)
    }

    fn remove_entry_named(&mut self, name: &str) -> Result<()> {
        let upper = name.to_uppercase();
        let slot = self
            .entries
            .iter()
            .position(|e| e.is_active() && e.name == upper)
            .ok_or_else(|| Error::NotFound(format!("no entry named {}", name)))?;
        self.entries[slot] = FileEntry::empty();
        Ok(())
    }

    /// Rewrites only the header entry of this directory's key block,
    /// leaving its file entries untouched. Used after editing the
    /// `parent_pointer`/`parent_entry_number` of a moved subdirectory.
    fn rewrite_header_only(&self, device: &mut BlockDevice) -> Result<()> {
        let mut block = DirectoryBlock::unpack(&device.read_block(self.key_block)?, true)?;
        block.header = Some(self.header.clone());
        device.write_block(self.key_block, &block.pack())
    }

    /// Compacts non-root directories, resizes the block chain to fit, and
    /// writes every block back out.
    pub fn write(&mut self, device: &mut BlockDevice) -> Result<()> {
        if !self.is_root() {
            self.entries.retain(|e| e.is_active());
        }
        // Pad to 13k - 1 entries (at least one block's worth).
        while (self.entries.len() + 1) % ENTRIES_PER_BLOCK != 0 {
            self.entries.push(FileEntry::empty());
        }
        self.header.set_file_count(self.file_count());

        let blocks_needed = (self.entries.len() + 1) / ENTRIES_PER_BLOCK;
        while self.block_list.len() < blocks_needed {
            let b = device.allocate_block()?;
            self.block_list.push(b);
        }
        while self.block_list.len() > blocks_needed && !self.is_root() {
            let b = self.block_list.pop().unwrap();
            device.free_block(b)?;
        }

        let mut offset = 0;
        for (i, block_index) in self.block_list.clone().iter().enumerate() {
            let is_key = i == 0;
            let slots = if is_key { ENTRIES_PER_BLOCK - 1 } else { ENTRIES_PER_BLOCK };
            let chunk = self.entries[offset..offset + slots].to_vec();
            offset += slots;
            let prev = if i == 0 { 0 } else { self.block_list[i - 1] };
            let next = if i + 1 < self.block_list.len() { self.block_list[i + 1] } else { 0 };
            let block = DirectoryBlock {
                prev,
                next,
                header: if is_key { Some(self.header.clone()) } else { None },
                entries: chunk,
            };
            device.write_block(*block_index, &block.pack())?;
        }
        Ok(())
    }
}

/// Standalone entry representing the root directory, so path resolution
/// can treat `/` uniformly with subdirectory entries.
pub fn root_entry(volume_header: &VolumeHeader) -> FileEntry {
    FileEntry {
        storage_type: StorageType::Subdirectory,
        name: volume_header.name.clone(),
        file_type: 0x0f,
        key_pointer: crate::metadata::VOLUME_KEY_BLOCK,
        blocks_used: crate::metadata::VOLUME_DIRECTORY_LENGTH,
        eof: 512 * crate::metadata::VOLUME_DIRECTORY_LENGTH as u32,
        date_time: volume_header.date_time,
        version: volume_header.version,
        min_version: volume_header.min_version,
        access: volume_header.access,
        aux_type: 0,
        last_mod: volume_header.date_time,
        header_pointer: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Volume;

    fn temp_volume(name: &str, blocks: u16) -> Volume {
        let path = std::env::temp_dir().join(format!("prodos-directory-test-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_file(&path);
        Volume::create(&path, "TESTVOL", blocks, true, None).unwrap()
    }

    #[test]
    fn add_and_find_simple_file() {
        let mut vol = temp_volume("addfind", 280);
        let mut root = vol.root_directory().unwrap();
        root.add_simple_file(vol.device_mut(), "HELLO.TXT", 0x04, 0, b"hi there").unwrap();
        let root = vol.root_directory().unwrap();
        let e = root.file_entry("hello.txt").unwrap();
        assert_eq!(e.name, "HELLO.TXT");
        assert!(matches!(e.storage_type, StorageType::Seedling));
    }

    #[test]
    fn glob_is_case_insensitive_and_supports_wildcards() {
        let mut vol = temp_volume("glob", 280);
        let mut root = vol.root_directory().unwrap();
        root.add_simple_file(vol.device_mut(), "README", 0x04, 0, b"x").unwrap();
        root.add_simple_file(vol.device_mut(), "README.TXT", 0x04, 0, b"y").unwrap();
        let root = vol.root_directory().unwrap();
        let hits = root.glob_file("read*");
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn remove_directory_requires_empty() {
        let mut vol = temp_volume("rmdir", 280);
        let mut root = vol.root_directory().unwrap();
        root.add_directory(vol.device_mut(), "SUBDIR").unwrap();
        let mut root = vol.root_directory().unwrap();
        let sub_entry = root.file_entry("subdir").unwrap();
        let mut sub = DirectoryFile::read(vol.device_mut(), sub_entry.key_pointer).unwrap();
        sub.add_simple_file(vol.device_mut(), "KID", 0x04, 0, b"x").unwrap();

        assert!(root.remove_directory(vol.device_mut(), &sub_entry).is_err());

        let mut sub = DirectoryFile::read(vol.device_mut(), sub_entry.key_pointer).unwrap();
        let kid = sub.file_entry("kid").unwrap();
        sub.remove_simple_file(vol.device_mut(), &kid).unwrap();
        assert!(root.remove_directory(vol.device_mut(), &sub_entry).is_ok());
    }

    #[test]
    fn file_count_tracks_active_entries() {
        let mut vol = temp_volume("filecount", 280);
        let mut root = vol.root_directory().unwrap();
        root.add_simple_file(vol.device_mut(), "A", 0x04, 0, b"1").unwrap();
        root.add_simple_file(vol.device_mut(), "B", 0x04, 0, b"2").unwrap();
        let root = vol.root_directory().unwrap();
        assert_eq!(root.header.file_count(), 2);
    }
}
