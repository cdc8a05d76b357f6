//! A read/write ProDOS 8 file system library operating on a host disk
//! image (raw `.po`-style or `.2mg`-wrapped).
//!
//! [`Volume`] is the entry point: open an existing image or create a
//! fresh one, then resolve paths, list and glob directories, and
//! import/export standard files through [`DirectoryFile`].

pub mod block;
pub mod datetime;
pub mod device;
pub mod directory;
pub mod error;
pub mod file;
pub mod metadata;
pub mod volume;

pub use block::{DirectoryBlock, IndexBlock};
pub use datetime::P8DateTime;
pub use device::{AccessKind, BlockDevice, Mode};
pub use directory::DirectoryFile;
pub use error::{Error, Result};
pub use metadata::{Access, FileEntry, StorageType, SubdirHeader, VolumeHeader};
pub use volume::Volume;
