//! The standard-file tree codec: seedling/sapling/tree read and write.

use crate::block::IndexBlock;
use crate::device::BlockDevice;
use crate::error::Result;
use crate::metadata::{StorageType, BLOCK_SIZE};

/// Addressable size, in bytes, of a subtree of the given depth (1, 2, or 3).
pub fn chunk_size(depth: usize) -> usize {
    1usize << (9 + 8 * (depth.saturating_sub(1)))
}

/// Minimal depth needed to store `len` bytes as a standard file.
pub fn depth_for_len(len: usize) -> usize {
    let mut depth = 1;
    let mut chunk = BLOCK_SIZE;
    while chunk < len {
        chunk <<= 8;
        depth += 1;
    }
    depth
}

/// Reads `eof` bytes starting at `key`, a block of the given tree depth.
pub fn read(device: &mut BlockDevice, key: u16, depth: usize, eof: usize) -> Result<Vec<u8>> {
    if key == 0 {
        return Ok(vec![0u8; eof]);
    }
    if depth == 1 {
        let block = device.read_block(key)?;
        return Ok(block[..eof.min(BLOCK_SIZE)].to_vec());
    }
    let idx_block = IndexBlock::unpack(&device.read_block(key)?);
    let sub_chunk = chunk_size(depth - 1);
    let n = (eof + sub_chunk - 1) / sub_chunk;
    let mut out = Vec::with_capacity(eof);
    for j in 0..n {
        let remaining = eof - j * sub_chunk;
        let this_len = remaining.min(sub_chunk);
        out.extend(read(device, idx_block.pointers[j], depth - 1, this_len)?);
    }
    Ok(out)
}

/// The result of writing a standard file: its storage type, key block,
/// blocks used, and eof, ready to be stored into a directory entry.
pub struct WrittenFile {
    pub storage_type: StorageType,
    pub key_pointer: u16,
    pub blocks_used: u16,
    pub eof: u32,
}

/// Writes `data` as a fresh standard file, allocating a new tree. The
/// caller is responsible for freeing any previously allocated tree first.
pub fn write(device: &mut BlockDevice, data: &[u8]) -> Result<WrittenFile> {
    let depth = depth_for_len(data.len());
    let mut blocks_used: u16 = 0;
    let key = write_subtree(device, data, depth, true, &mut blocks_used)?;
    Ok(WrittenFile {
        storage_type: match depth {
            1 => StorageType::Seedling,
            2 => StorageType::Sapling,
            _ => StorageType::Tree,
        },
        key_pointer: key,
        blocks_used,
        eof: data.len() as u32,
    })
}

/// Frees every block reachable from `key` at the given depth.
pub fn free(device: &mut BlockDevice, key: u16, depth: usize) -> Result<()> {
    if key == 0 {
        return Ok(());
    }
    if depth > 1 {
        let idx_block = IndexBlock::unpack(&device.read_block(key)?);
        for p in idx_block.pointers {
            if p != 0 {
                free(device, p, depth - 1)?;
            }
        }
    }
    device.free_block(key)
}

/// Writes one subtree of the given depth, returning its root block index.
/// `is_first` forces materialization even for an all-zero chunk: the first
/// data block of a standard file is always allocated, per the ProDOS
/// technote (a deliberate divergence from writers that permit a wholly
/// sparse empty sapling/tree file with no reachable data block at all).
fn write_subtree(
    device: &mut BlockDevice,
    data: &[u8],
    depth: usize,
    is_first: bool,
    blocks_used: &mut u16,
) -> Result<u16> {
    if depth == 1 {
        let block = device.allocate_block()?;
        let mut buf = [0u8; BLOCK_SIZE];
        buf[..data.len()].copy_from_slice(data);
        device.write_block(block, &buf)?;
        *blocks_used += 1;
        return Ok(block);
    }
    let sub_chunk = chunk_size(depth - 1);
    let n_chunks = (data.len() + sub_chunk - 1) / sub_chunk;
    let block = device.allocate_block()?;
    *blocks_used += 1;
    let mut pointers = [0u16; 256];
    for j in 0..n_chunks.max(1) {
        let start = j * sub_chunk;
        if start >= data.len() {
            break;
        }
        let end = (start + sub_chunk).min(data.len());
        let chunk = &data[start..end];
        let nonzero = chunk.iter().any(|b| *b != 0);
        if nonzero || (j == 0 && is_first) {
            pointers[j] = write_subtree(device, chunk, depth - 1, j == 0 && is_first, blocks_used)?;
        } else {
            pointers[j] = 0;
        }
    }
    device.write_block(block, &IndexBlock { pointers }.pack())?;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_device(name: &str, blocks: u16) -> BlockDevice {
        let path = std::env::temp_dir().join(format!("prodos-file-test-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_file(&path);
        let mut dev = BlockDevice::create(&path, blocks, true).unwrap();
        dev.init_free_map(0);
        dev
    }

    #[test]
    fn depth_boundaries_match_size_classes() {
        assert_eq!(depth_for_len(0), 1);
        assert_eq!(depth_for_len(512), 1);
        assert_eq!(depth_for_len(513), 2);
        assert_eq!(depth_for_len(131072), 2);
        assert_eq!(depth_for_len(131073), 3);
    }

    #[test]
    fn seedling_round_trip() {
        let mut dev = temp_device("seedling", 16);
        let data = b"hello, prodos".to_vec();
        let written = write(&mut dev, &data).unwrap();
        assert!(matches!(written.storage_type, StorageType::Seedling));
        let back = read(&mut dev, written.key_pointer, 1, data.len()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn sapling_with_sparse_middle_round_trips() {
        let mut dev = temp_device("sapling", 600);
        let mut data = vec![0u8; 131072];
        data[0] = 1;
        data[data.len() - 1] = 2;
        let written = write(&mut dev, &data).unwrap();
        assert!(matches!(written.storage_type, StorageType::Sapling));
        assert!((written.blocks_used as usize) < data.len() / BLOCK_SIZE + 1);
        let back = read(&mut dev, written.key_pointer, 2, data.len()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn empty_file_still_allocates_a_first_data_block() {
        let mut dev = temp_device("emptytree", 600);
        let data = vec![0u8; 131073];
        let written = write(&mut dev, &data).unwrap();
        assert!(matches!(written.storage_type, StorageType::Tree));
        assert_ne!(written.key_pointer, 0);
        let idx = IndexBlock::unpack(&dev.read_block(written.key_pointer).unwrap());
        assert_ne!(idx.pointers[0], 0, "first master-index slot must point at an allocated sapling");
    }

    #[test]
    fn freeing_a_tree_reclaims_every_block() {
        let mut dev = temp_device("freetree", 600);
        let data = vec![7u8; 131073];
        let written = write(&mut dev, &data).unwrap();
        let before = dev.blocks_free();
        free(&mut dev, written.key_pointer, 3).unwrap();
        assert!(dev.blocks_free() > before);
    }
}
