use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use prodos::device::Mode;
use prodos::metadata::StorageType;
use prodos::Volume;

/// A command-line tool for manipulating ProDOS disk images
#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct MainArgs {
    /// Path to the disk image
    #[arg(short, long)]
    image: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new volume
    Create {
        name: String,
        /// Size of the new volume in 512-byte blocks
        #[arg(long, default_value_t = 280)]
        blocks: u16,
        /// Overwrite the image if it already exists
        #[arg(long)]
        force: bool,
        /// Host file to write into blocks 0-1 as the boot loader
        #[arg(long)]
        loader: Option<PathBuf>,
    },
    /// Print volume statistics
    Info,
    /// List entries matching one or more paths (globs allowed)
    Ls {
        #[arg(default_value = "/")]
        paths: Vec<String>,
    },
    /// Export one or more files to the host filesystem
    Cp(CpArgs),
    /// Rename or move an entry
    Mv { from: String, to: String },
    /// Remove matching files
    Rm { path: String },
    /// Create a subdirectory
    Mkdir { path: String },
    /// Remove an empty subdirectory
    Rmdir { path: String },
    /// Import a host file into the volume
    Import(ImportArgs),
    /// Export a volume file to the host filesystem
    Export { path: String, dest: PathBuf },
    /// Integrity check (not implemented)
    Check,
}

#[derive(Args, Debug)]
struct CpArgs {
    from: String,
    to: String,
}

#[derive(Args, Debug)]
struct ImportArgs {
    host_path: PathBuf,
    /// Destination path/name inside the volume; defaults to the host file's name
    dest: Option<String>,
    /// Overwrite an existing entry of the same name
    #[arg(long)]
    force: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = MainArgs::parse();

    match &args.command {
        Commands::Create { name, blocks, force, loader } => {
            let loader_bytes = loader.as_ref().map(fs::read).transpose()?;
            let mut volume = Volume::create(&args.image, name, *blocks, *force, loader_bytes.as_deref())?;
            println!("{}", volume.info());
        }
        Commands::Info => {
            let mut volume = Volume::open(&args.image, Mode::ReadOnly)?;
            println!("{}", volume.info());
        }
        Commands::Ls { paths } => {
            let mut volume = Volume::open(&args.image, Mode::ReadOnly)?;
            let hits = volume.glob_paths(paths)?;
            for entry in hits {
                let kind = if matches!(entry.storage_type, StorageType::Subdirectory) { "DIR" } else { "   " };
                println!("{:<4} {:<16} {:>8} bytes", kind, entry.name, entry.eof);
            }
        }
        Commands::Cp(CpArgs { from, to }) => {
            let mut volume = Volume::open(&args.image, Mode::ReadWrite)?;
            let entry = volume.path_entry(from)?;
            let data = volume.read_simple_file(&entry)?;
            let (dir_path, name) = split_parent(to);
            let mut dir = directory_for(&mut volume, &dir_path)?;
            dir.add_simple_file(volume.device_mut(), &name, entry.file_type, entry.aux_type, &data)?;
        }
        Commands::Mv { from, to } => {
            let mut volume = Volume::open(&args.image, Mode::ReadWrite)?;
            let entry = volume.path_entry(from)?;
            if entry.header_pointer == 0 {
                return Err("cannot move the root directory".into());
            }
            let (src_dir_path, _) = split_parent(from);
            let (dst_dir_path, new_name) = split_parent(to);
            let mut src_dir = directory_for(&mut volume, &src_dir_path)?;
            if src_dir_path == dst_dir_path {
                src_dir.rename_entry(volume.device_mut(), &entry, &new_name)?;
            } else {
                let mut dst_dir = directory_for(&mut volume, &dst_dir_path)?;
                if matches!(entry.storage_type, StorageType::Subdirectory) {
                    src_dir.move_directory(volume.device_mut(), &entry, &mut dst_dir, &new_name)?;
                } else {
                    src_dir.move_simple_file(volume.device_mut(), &entry, &mut dst_dir, &new_name)?;
                }
            }
        }
        Commands::Rm { path } => {
            let mut volume = Volume::open(&args.image, Mode::ReadWrite)?;
            let (dir_path, pattern) = split_parent(path);
            let mut dir = directory_for(&mut volume, &dir_path)?;
            let hits = dir.glob_file(&pattern);
            if hits.is_empty() {
                return Err(format!("no entry matches {}", path).into());
            }
            for entry in hits {
                dir.remove_simple_file(volume.device_mut(), &entry)?;
            }
        }
        Commands::Mkdir { path } => {
            let mut volume = Volume::open(&args.image, Mode::ReadWrite)?;
            let (dir_path, name) = split_parent(path);
            let mut dir = directory_for(&mut volume, &dir_path)?;
            dir.add_directory(volume.device_mut(), &name)?;
        }
        Commands::Rmdir { path } => {
            let mut volume = Volume::open(&args.image, Mode::ReadWrite)?;
            let entry = volume.path_entry(path)?;
            let (dir_path, _) = split_parent(path);
            let mut dir = directory_for(&mut volume, &dir_path)?;
            dir.remove_directory(volume.device_mut(), &entry)?;
        }
        Commands::Import(ImportArgs { host_path, dest, force }) => {
            let mut volume = Volume::open(&args.image, Mode::ReadWrite)?;
            let data = fs::read(host_path)?;
            let default_name = host_path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or("host path has no file name")?
                .to_string();
            let dest_path = dest.clone().unwrap_or(default_name);
            let (dir_path, name) = split_parent(&dest_path);
            let mut dir = directory_for(&mut volume, &dir_path)?;
            if !force && dir.file_entry(&name).is_ok() {
                return Err(format!("{} already exists (pass --force to overwrite)", name).into());
            }
            dir.add_simple_file(volume.device_mut(), &name, 0x06, 0, &data)?;
        }
        Commands::Export { path, dest } => {
            let mut volume = Volume::open(&args.image, Mode::ReadOnly)?;
            let entry = volume.path_entry(path)?;
            let data = volume.read_simple_file(&entry)?;
            fs::write(dest, data)?;
        }
        Commands::Check => {
            println!("check: not yet implemented");
        }
    }
    Ok(())
}

fn split_parent(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => (trimmed[..i].to_string(), trimmed[i + 1..].to_string()),
        None => ("/".to_string(), trimmed.to_string()),
    }
}

fn directory_for(volume: &mut Volume, dir_path: &str) -> Result<prodos::DirectoryFile, Box<dyn Error>> {
    if dir_path.trim_matches('/').is_empty() {
        return Ok(volume.root_directory()?);
    }
    let entry = volume.path_entry(dir_path)?;
    Ok(volume.read_directory(&entry)?)
}
