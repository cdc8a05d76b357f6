//! The volume facade: open/create, path resolution, and the boot loader.

use std::path::Path;

use log::{info, warn};

use crate::block::DirectoryBlock;
use crate::datetime::P8DateTime;
use crate::device::{BlockDevice, Mode};
use crate::directory::{root_entry, DirectoryFile};
use crate::error::{Error, Result};
use crate::file;
use crate::metadata::{
    Access, FileEntry, HeaderEntry, StorageType, VolumeHeader, BLOCK_SIZE, ENTRIES_PER_BLOCK,
    VOLUME_DIRECTORY_LENGTH, VOLUME_KEY_BLOCK,
};

const LOADER_BLOCKS: u16 = 2;
const LOADER_BYTES: usize = LOADER_BLOCKS as usize * BLOCK_SIZE;
const DEFAULT_BIT_MAP_POINTER: u16 = 6;

pub struct Volume {
    device: BlockDevice,
    header: VolumeHeader,
}

impl Volume {
    /// Opens an existing image and validates its volume directory.
    pub fn open(path: impl AsRef<Path>, mode: Mode) -> Result<Self> {
        let mut device = BlockDevice::open(path, mode)?;
        let key_block = DirectoryBlock::unpack(&device.read_block(VOLUME_KEY_BLOCK)?, true)?;
        let header = match key_block.header {
            Some(HeaderEntry::Volume(h)) => h,
            _ => return Err(Error::Format("block 2 is not a volume directory key block".into())),
        };
        if header.total_blocks != device.total_blocks() {
            return Err(Error::Format(format!(
                "volume header total_blocks {} does not match image size {} blocks",
                header.total_blocks,
                device.total_blocks()
            )));
        }
        device.reset_free_map(header.bit_map_pointer)?;
        Ok(Volume { device, header })
    }

    /// Creates a fresh volume: reserves the boot blocks, writes a 4-block
    /// volume directory, and writes the free bitmap.
    pub fn create(
        path: impl AsRef<Path>,
        name: &str,
        total_blocks: u16,
        force: bool,
        loader: Option<&[u8]>,
    ) -> Result<Self> {
        let mut device = BlockDevice::create(path, total_blocks, force)?;
        device.init_free_map(DEFAULT_BIT_MAP_POINTER);

        // Blocks 0-1: boot loader.
        for b in 0..LOADER_BLOCKS {
            let allocated = device.allocate_block()?;
            debug_assert_eq!(allocated, b);
        }

        let now = P8DateTime::now();
        let header = VolumeHeader {
            name: name.to_uppercase(),
            date_time: now,
            version: 0,
            min_version: 0,
            access: Access::default(),
            entries_per_block: ENTRIES_PER_BLOCK as u8,
            file_count: 0,
            bit_map_pointer: DEFAULT_BIT_MAP_POINTER,
            total_blocks,
        };

        // Blocks 2-5: the volume directory's own key + 3 linked blocks.
        let mut block_list = Vec::with_capacity(VOLUME_DIRECTORY_LENGTH as usize);
        for b in VOLUME_KEY_BLOCK..VOLUME_KEY_BLOCK + VOLUME_DIRECTORY_LENGTH {
            let allocated = device.allocate_block()?;
            debug_assert_eq!(allocated, b);
            block_list.push(allocated);
        }
        let mut dir = DirectoryFile {
            key_block: VOLUME_KEY_BLOCK,
            header: HeaderEntry::Volume(header.clone()),
            entries: vec![FileEntry::empty(); ENTRIES_PER_BLOCK * VOLUME_DIRECTORY_LENGTH as usize - 1],
            block_list,
        };
        dir.write(&mut device)?;

        // Remaining blocks: the bitmap area itself.
        let bitmap_blocks = crate::block::bitmap_blocks_needed(total_blocks);
        for b in DEFAULT_BIT_MAP_POINTER..DEFAULT_BIT_MAP_POINTER + bitmap_blocks {
            let allocated = device.allocate_block()?;
            debug_assert_eq!(allocated, b);
        }
        device.write_free_map()?;

        let mut volume = Volume { device, header };
        if let Some(loader) = loader {
            volume.write_loader(loader)?;
        }
        Ok(volume)
    }

    pub fn info(&self) -> String {
        format!(
            "{}: {} blocks total, {} free ({} bytes)",
            self.header.name,
            self.header.total_blocks,
            self.device.blocks_free(),
            self.header.total_blocks as u64 * BLOCK_SIZE as u64,
        )
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    pub fn device_mut(&mut self) -> &mut BlockDevice {
        &mut self.device
    }

    pub fn root_directory(&mut self) -> Result<DirectoryFile> {
        DirectoryFile::read(&mut self.device, VOLUME_KEY_BLOCK)
    }

    pub fn read_directory(&mut self, entry: &FileEntry) -> Result<DirectoryFile> {
        if !matches!(entry.storage_type, StorageType::Subdirectory) {
            return Err(Error::TypeMismatch(format!("{} is not a directory", entry.name)));
        }
        DirectoryFile::read(&mut self.device, entry.key_pointer)
    }

    pub fn read_simple_file(&mut self, entry: &FileEntry) -> Result<Vec<u8>> {
        if !entry.storage_type.is_simple_file() {
            return Err(Error::TypeMismatch(format!("{} is not a standard file", entry.name)));
        }
        file::read(&mut self.device, entry.key_pointer, entry.storage_type.depth(), entry.eof as usize)
    }

    /// Resolves a `/`-separated path against the root. An empty (root)
    /// path resolves to the synthetic root entry.
    pub fn path_entry(&mut self, path: &str) -> Result<FileEntry> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(root_entry(&self.header));
        }
        let parts: Vec<&str> = trimmed.split('/').collect();
        let mut dir = self.root_directory()?;
        for (i, part) in parts.iter().enumerate() {
            let hit = dir.file_entry(part)?;
            if i + 1 == parts.len() {
                return Ok(hit);
            }
            dir = self.read_directory(&hit)?;
        }
        unreachable!("empty path was handled above")
    }

    /// Resolves each of `paths` via `glob_path` semantics and dedupes hits.
    pub fn glob_paths(&mut self, paths: &[String]) -> Result<Vec<FileEntry>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for path in paths {
            let trimmed = path.trim_matches('/');
            if trimmed.is_empty() {
                let entry = root_entry(&self.header);
                if seen.insert((entry.header_pointer, entry.key_pointer)) {
                    out.push(entry);
                }
                continue;
            }
            let parts: Vec<&str> = trimmed.split('/').collect();
            let hits = self.glob_path_in(VOLUME_KEY_BLOCK, &parts)?;
            for entry in hits {
                if seen.insert((entry.header_pointer, entry.key_pointer)) {
                    out.push(entry);
                }
            }
        }
        Ok(out)
    }

    fn glob_path_in(&mut self, dir_key: u16, parts: &[&str]) -> Result<Vec<FileEntry>> {
        let dir = DirectoryFile::read(&mut self.device, dir_key)?;
        let hits = dir.glob_file(parts[0]);
        if parts.len() == 1 {
            return Ok(hits);
        }
        let mut out = Vec::new();
        for hit in hits {
            if matches!(hit.storage_type, StorageType::Subdirectory) {
                out.extend(self.glob_path_in(hit.key_pointer, &parts[1..])?);
            }
        }
        Ok(out)
    }

    /// Writes a boot loader image into blocks 0-1, zero-padded to 1024
    /// bytes; truncates (with a warning) anything longer.
    pub fn write_loader(&mut self, loader: &[u8]) -> Result<()> {
        let mut buf = [0u8; LOADER_BYTES];
        if loader.len() > LOADER_BYTES {
            warn!("loader is {} bytes, truncating to {}", loader.len(), LOADER_BYTES);
            buf.copy_from_slice(&loader[..LOADER_BYTES]);
        } else {
            if loader.len() < LOADER_BYTES {
                info!("loader is {} bytes, zero-padding to {}", loader.len(), LOADER_BYTES);
            }
            buf[..loader.len()].copy_from_slice(loader);
        }
        let mut b0 = [0u8; BLOCK_SIZE];
        let mut b1 = [0u8; BLOCK_SIZE];
        b0.copy_from_slice(&buf[..BLOCK_SIZE]);
        b1.copy_from_slice(&buf[BLOCK_SIZE..]);
        self.device.write_block(0, &b0)?;
        self.device.write_block(1, &b1)
    }

    /// Reads blocks 0-1 back out as the 1024-byte loader blob.
    pub fn read_loader(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(LOADER_BYTES);
        out.extend_from_slice(&self.device.read_block(0)?);
        out.extend_from_slice(&self.device.read_block(1)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("prodos-volume-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn create_reserves_loader_and_directory_blocks() {
        let path = temp_path("create.po");
        let _ = std::fs::remove_file(&path);
        let vol = Volume::create(&path, "floppy", 140, true, None).unwrap();
        assert_eq!(vol.name(), "FLOPPY");
        // 2 loader + 4 voldir + 1 bitmap block reserved.
        assert_eq!(vol.device.blocks_free(), 140 - 2 - 4 - 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn create_as_2mg_has_exact_on_disk_size() {
        let path = temp_path("create.2mg");
        let _ = std::fs::remove_file(&path);
        let _ = Volume::create(&path, "floppy", 140, true, None).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 140 * 512 + 64);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn open_round_trips_a_created_volume() {
        let path = temp_path("reopen.po");
        let _ = std::fs::remove_file(&path);
        drop(Volume::create(&path, "reopen", 280, true, None).unwrap());
        let vol = Volume::open(&path, Mode::ReadOnly).unwrap();
        assert_eq!(vol.name(), "REOPEN");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn root_path_resolves_to_synthetic_entry() {
        let path = temp_path("rootpath.po");
        let _ = std::fs::remove_file(&path);
        let mut vol = Volume::create(&path, "rootpath", 280, true, None).unwrap();
        let root = vol.path_entry("/").unwrap();
        assert_eq!(root.key_pointer, VOLUME_KEY_BLOCK);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn loader_round_trips_with_zero_padding() {
        let path = temp_path("loader.po");
        let _ = std::fs::remove_file(&path);
        let loader = vec![0xaau8; 300];
        let mut vol = Volume::create(&path, "loader", 280, true, Some(&loader)).unwrap();
        let back = vol.read_loader().unwrap();
        assert_eq!(back.len(), LOADER_BYTES);
        assert_eq!(&back[..300], &loader[..]);
        assert!(back[300..].iter().all(|b| *b == 0));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn create_and_import_file_then_glob_finds_it() {
        let path = temp_path("importglob.po");
        let _ = std::fs::remove_file(&path);
        let mut vol = Volume::create(&path, "importglob", 280, true, None).unwrap();
        let mut root = vol.root_directory().unwrap();
        root.add_simple_file(vol.device_mut(), "NOTES.TXT", 0x04, 0, b"hello").unwrap();
        let hits = vol.glob_paths(&["NOTES*".to_string()]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "NOTES.TXT");
        let _ = std::fs::remove_file(&path);
    }
}
