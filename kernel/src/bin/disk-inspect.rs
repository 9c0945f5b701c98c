use std::sync::Arc;

use intro_kernel::block::MemoryDisk;
use intro_kernel::boot::{init_filesystems, BootVolumes};
use intro_kernel::fs::memfs::MemFsConfig;
use intro_kernel::part::PartitionTable;
use intro_kernel::vfs::{FsError, NodeType, OpenFlags, VfsContext};

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} <disk_file> partitions|tree|ls [path]|cat <path>");
    std::process::exit(1);
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let (disk_file, command) = match &args[..] {
        [_, disk_file, command @ ..] if !command.is_empty() => (disk_file, command),
        _ => usage(&args[0]),
    };

    intro_kernel::logging::init(|line| eprintln!("{line}")).expect("logger installed twice");

    let image = std::fs::read(disk_file).unwrap_or_else(|err| {
        eprintln!("Failed to read {disk_file}: {err}");
        std::process::exit(1);
    });
    let disk = Arc::new(MemoryDisk::new(image));
    let volumes = init_filesystems(disk, MemFsConfig::default())
        .expect("fresh context has no root yet");

    let result = match command.iter().map(String::as_str).collect::<Vec<_>>()[..] {
        ["partitions"] => {
            print_partitions(&volumes);
            Ok(())
        }
        ["tree"] => tree(&volumes.vfs, "/", 0),
        ["ls"] => ls(&volumes.vfs, "/"),
        ["ls", path] => ls(&volumes.vfs, path),
        ["cat", path] => cat(&volumes.vfs, path),
        _ => usage(&args[0]),
    };
    if let Err(err) = result {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn print_partitions(volumes: &BootVolumes) {
    print!("{}", PartitionTable(&volumes.partitions));
    for report in &volumes.reports {
        match &report.result {
            Ok(fs) => println!(
                "{:<8} {} {}",
                report.mount_point,
                fs.fs_type(),
                fs.volume_label().unwrap_or_default()
            ),
            Err(err) => println!("{:<8} not mounted: {err}", report.mount_point),
        }
    }
    if !volumes.config.is_empty() {
        println!("Boot configuration:");
        print!("{}", volumes.config);
    }
}

fn ls(vfs: &VfsContext, path: &str) -> Result<(), FsError> {
    let mut node = vfs.open(path, OpenFlags::empty())?;
    if !node.is_dir() {
        println!("{:>10} {path}", node.size());
        return Ok(());
    }
    while let Some(entry) = node.read_dir()? {
        let kind = match entry.node_type {
            NodeType::Directory => "<DIR>",
            NodeType::File => "",
        };
        println!("{kind:<5} {:>10} {}", entry.size, entry.name);
    }
    Ok(())
}

fn tree(vfs: &VfsContext, path: &str, depth: usize) -> Result<(), FsError> {
    let mut node = vfs.open(path, OpenFlags::empty())?;
    while let Some(entry) = node.read_dir()? {
        println!("{:indent$}{}", "", entry.name, indent = depth * 2);
        if entry.node_type == NodeType::Directory {
            let child = format!("{}/{}", path.trim_end_matches('/'), entry.name);
            tree(vfs, &child, depth + 1)?;
        }
    }
    Ok(())
}

fn cat(vfs: &VfsContext, path: &str) -> Result<(), FsError> {
    use std::io::Write;

    let mut node = vfs.open(path, OpenFlags::empty())?;
    let data = node.read_to_end()?;
    std::io::stdout()
        .write_all(&data)
        .expect("failed to write to stdout");
    Ok(())
}
