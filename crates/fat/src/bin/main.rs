use std::fs::File;
use std::os::unix::prelude::FileExt;

use fat::{BootSector, Cluster, DirectoryIter, FatTable, Geometry, SECTOR_SIZE};

fn main() {
    // Get command line arguments: a FAT image and optionally the sector the
    // volume starts at within it.
    let args: Vec<String> = std::env::args().collect();
    let (disk_file, start_sector) = match &args[..] {
        [_, disk_file] => (disk_file, 0),
        [_, disk_file, start] => match start.parse::<u64>() {
            Ok(start) => (disk_file, start),
            Err(err) => {
                eprintln!("Invalid start sector {start}: {err}");
                std::process::exit(1);
            }
        },
        _ => {
            eprintln!("Usage: {} <disk_file> [start_sector]", args[0]);
            std::process::exit(1);
        }
    };

    println!("Reading FAT disk file: {disk_file}");
    let file = File::open(disk_file).expect("failed to open disk file");
    let volume_offset = start_sector * SECTOR_SIZE as u64;

    let sector = read_bytes(&file, volume_offset, SECTOR_SIZE);
    let Some(boot) = BootSector::parse(&sector) else {
        eprintln!("Not a FAT volume (no jump instruction in the boot sector)");
        std::process::exit(1);
    };
    println!("{:#X?}", boot.bpb);
    println!("{:#X?}", boot.extended);
    println!("OEM name: {:?}", boot.oem_name());
    println!("Volume label: {:?}", boot.volume_label());

    let geometry = match boot.geometry() {
        Ok(geometry) => geometry,
        Err(err) => {
            eprintln!("Invalid FAT geometry: {err}");
            std::process::exit(1);
        }
    };
    println!("{geometry:#?}");

    let fat_bytes = read_bytes(
        &file,
        volume_offset + u64::from(geometry.first_fat_sector) * SECTOR_SIZE as u64,
        geometry.fat_bytes(),
    );
    let table = FatTable::new(geometry.variant, fat_bytes, geometry.cluster_count);
    let free = (Cluster::FIRST.0..=geometry.max_cluster())
        .filter(|&c| table.entry(Cluster(c)) == Some(fat::FatEntry::Free))
        .count();
    println!("Free clusters: {free} / {}", geometry.cluster_count);

    let root = read_root(&file, volume_offset, &geometry, &table);
    println!("Root directory:");
    for entry in DirectoryIter::new(&root, geometry.variant) {
        let chain = table.chain_len(entry.first_cluster);
        println!(
            "  {:<5} {:>10} {} {:>6} cluster(s) from {:<8} {}",
            if entry.is_dir() { "<DIR>" } else { "" },
            entry.size,
            entry.modified,
            chain,
            entry.first_cluster.0,
            entry.name,
        );
    }
}

fn read_root(file: &File, volume_offset: u64, geometry: &Geometry, table: &FatTable) -> Vec<u8> {
    match geometry.root_cluster {
        None => read_bytes(
            file,
            volume_offset + u64::from(geometry.first_root_dir_sector) * SECTOR_SIZE as u64,
            geometry.root_dir_sectors as usize * SECTOR_SIZE,
        ),
        Some(root) => table
            .chain(root)
            .flat_map(|cluster| {
                let sector = geometry
                    .cluster_sector(cluster)
                    .expect("chain only yields valid clusters");
                read_bytes(
                    file,
                    volume_offset + u64::from(sector) * SECTOR_SIZE as u64,
                    geometry.cluster_bytes(),
                )
            })
            .collect(),
    }
}

fn read_bytes(file: &File, offset: u64, len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    file.read_exact_at(&mut buf, offset)
        .expect("failed to read bytes");
    buf
}
