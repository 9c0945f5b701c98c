//! Fixtures for driver tests: a sparse disk and a builder for small FAT
//! images.

use core::sync::atomic::{AtomicUsize, Ordering};

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use fat::{
    Attributes, BiosParameterBlock, BootSector, Cluster, ExtendedBpb16, ExtendedBpb32, FatTable,
    FatVariant, Geometry, RawDirEntry, ShortName, DIR_ENTRY_SIZE, EXTENDED_BOOT_SIGNATURE,
};
use spin::Mutex;
use zerocopy::{AsBytes, FromZeroes};

use crate::block::{BlockDevice, IoError, Sector, SECTOR_SIZE};

/// A disk that only stores sectors that were written. Unwritten sectors read
/// as zeroes.
#[derive(Debug)]
pub(crate) struct SparseDisk {
    sectors: Mutex<BTreeMap<u64, Sector>>,
    sector_count: u64,
    failing: Mutex<Option<u64>>,
    reads: AtomicUsize,
}

impl SparseDisk {
    pub(crate) fn new(sector_count: u64) -> Self {
        Self {
            sectors: Mutex::new(BTreeMap::new()),
            sector_count,
            failing: Mutex::new(None),
            reads: AtomicUsize::new(0),
        }
    }

    /// Makes every read of `lba` fail like a device error would.
    pub(crate) fn fail_reads_at(&self, lba: u64) {
        *self.failing.lock() = Some(lba);
    }

    /// Number of sectors read so far.
    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl BlockDevice for SparseDisk {
    fn read_sector(&self, lba: u64, buf: &mut Sector) -> Result<(), IoError> {
        if lba >= self.sector_count {
            return Err(IoError::OutOfRange { lba });
        }
        if *self.failing.lock() == Some(lba) {
            return Err(IoError::Device { lba });
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        match self.sectors.lock().get(&lba) {
            Some(sector) => buf.copy_from_slice(sector),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_sector(&self, lba: u64, buf: &Sector) -> Result<(), IoError> {
        if lba >= self.sector_count {
            return Err(IoError::OutOfRange { lba });
        }
        self.sectors.lock().insert(lba, *buf);
        Ok(())
    }

    fn sector_count(&self) -> Option<u64> {
        Some(self.sector_count)
    }
}

#[derive(Debug, Clone)]
enum Item {
    File { name: String, data: Vec<u8> },
    Dir { name: String, children: Vec<Item> },
}

impl Item {
    fn name(&self) -> &str {
        match self {
            Self::File { name, .. } | Self::Dir { name, .. } => name,
        }
    }
}

/// Builds a formatted FAT volume with the given files. The three presets
/// land in the FAT12, FAT16 and FAT32 cluster count ranges.
#[derive(Debug, Clone)]
pub(crate) struct FatImageBuilder {
    variant: FatVariant,
    total_sectors: u32,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    sectors_per_fat: u32,
    root_entries: u16,
    label: Option<String>,
    label_entry: Option<String>,
    fragmented: bool,
    root: Vec<Item>,
}

impl FatImageBuilder {
    /// A 1.44 MB floppy.
    pub(crate) fn fat12() -> Self {
        Self {
            variant: FatVariant::Fat12,
            total_sectors: 2880,
            sectors_per_cluster: 1,
            reserved_sectors: 1,
            sectors_per_fat: 9,
            root_entries: 224,
            label: None,
            label_entry: None,
            fragmented: false,
            root: Vec::new(),
        }
    }

    /// 10 MiB with 2 KiB clusters.
    pub(crate) fn fat16() -> Self {
        Self {
            variant: FatVariant::Fat16,
            total_sectors: 20480,
            sectors_per_cluster: 4,
            reserved_sectors: 4,
            sectors_per_fat: 20,
            root_entries: 512,
            ..Self::fat12()
        }
    }

    /// Just enough clusters to be FAT32, with 512 byte clusters.
    pub(crate) fn fat32() -> Self {
        Self {
            variant: FatVariant::Fat32,
            total_sectors: 67000,
            sectors_per_cluster: 1,
            reserved_sectors: 32,
            sectors_per_fat: 520,
            root_entries: 0,
            ..Self::fat12()
        }
    }

    /// Label stored in the extended BPB.
    pub(crate) fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    /// Label stored as a volume-id entry in the root directory.
    pub(crate) fn label_entry(mut self, label: &str) -> Self {
        self.label_entry = Some(label.to_string());
        self
    }

    /// Leaves a free cluster between every allocated one so no chain is
    /// contiguous.
    pub(crate) fn fragmented(mut self) -> Self {
        self.fragmented = true;
        self
    }

    pub(crate) fn dir(mut self, path: &str) -> Self {
        let (parent, name) = split_path(path);
        children_mut(&mut self.root, parent).push(Item::Dir {
            name: name.to_string(),
            children: Vec::new(),
        });
        self
    }

    pub(crate) fn file(mut self, path: &str, data: &[u8]) -> Self {
        let (parent, name) = split_path(path);
        children_mut(&mut self.root, parent).push(Item::File {
            name: name.to_string(),
            data: data.to_vec(),
        });
        self
    }

    fn boot_sector(&self) -> Sector {
        let mut sector = [0; SECTOR_SIZE];

        let mut bpb = BiosParameterBlock::new_zeroed();
        bpb.jmp_boot = [0xEB, 0x58, 0x90];
        bpb.oem_name = *b"MSWIN4.1";
        bpb.bytes_per_sector.set(SECTOR_SIZE as u16);
        bpb.sectors_per_cluster = self.sectors_per_cluster;
        bpb.reserved_sectors.set(self.reserved_sectors);
        bpb.fat_count = 2;
        bpb.root_dir_entries.set(self.root_entries);
        match u16::try_from(self.total_sectors) {
            Ok(total) => bpb.total_sectors.set(total),
            Err(_) => bpb.total_sectors_large.set(self.total_sectors),
        }
        bpb.media_descriptor = 0xF8;
        bpb.sectors_per_track.set(63);
        bpb.head_count.set(255);

        let label = padded_label(self.label.as_deref().unwrap_or("NO NAME"));
        let extended = BiosParameterBlock::SIZE;
        if self.variant == FatVariant::Fat32 {
            let mut ext = ExtendedBpb32::new_zeroed();
            ext.sectors_per_fat.set(self.sectors_per_fat);
            ext.root_cluster.set(Cluster::FIRST.0);
            ext.fsinfo_sector.set(1);
            ext.backup_boot_sector.set(6);
            ext.drive_number = 0x80;
            ext.signature = EXTENDED_BOOT_SIGNATURE;
            ext.volume_id.set(0x1234_5678);
            ext.volume_label = label;
            ext.system_id = *b"FAT32   ";
            sector[extended..extended + ExtendedBpb32::SIZE].copy_from_slice(ext.as_bytes());
        } else {
            bpb.sectors_per_fat.set(self.sectors_per_fat as u16);
            let mut ext = ExtendedBpb16::new_zeroed();
            ext.drive_number = 0x80;
            ext.signature = EXTENDED_BOOT_SIGNATURE;
            ext.volume_id.set(0x1234_5678);
            ext.volume_label = label;
            ext.system_id = if self.variant == FatVariant::Fat12 {
                *b"FAT12   "
            } else {
                *b"FAT16   "
            };
            sector[extended..extended + ExtendedBpb16::SIZE].copy_from_slice(ext.as_bytes());
        }
        sector[..BiosParameterBlock::SIZE].copy_from_slice(bpb.as_bytes());
        sector[510] = 0x55;
        sector[511] = 0xAA;
        sector
    }

    pub(crate) fn build(&self) -> FatImage {
        let boot_sector = self.boot_sector();
        let geometry = BootSector::parse(&boot_sector)
            .expect("builder wrote a FAT boot sector")
            .geometry()
            .expect("builder geometry is valid");
        assert_eq!(geometry.variant, self.variant);

        let mut layout = Layout {
            table: FatTable::empty(geometry.variant, geometry.cluster_count),
            geometry: geometry.clone(),
            next: Cluster::FIRST.0,
            stride: if self.fragmented { 2 } else { 1 },
            sectors: BTreeMap::new(),
            chains: Vec::new(),
        };

        let label_entry = self.label_entry.as_deref();
        match geometry.root_cluster {
            None => {
                let bytes = layout.directory_bytes(&self.root, None, "", label_entry);
                assert!(
                    bytes.len() <= usize::from(self.root_entries) * DIR_ENTRY_SIZE,
                    "root directory overflows its fixed region"
                );
                layout.write_bytes(geometry.first_root_dir_sector, &bytes);
            }
            Some(root_cluster) => {
                let slots = directory_slots(&self.root) + usize::from(label_entry.is_some());
                let chain = layout.alloc(layout.clusters_for(slots * DIR_ENTRY_SIZE).max(1));
                assert_eq!(chain[0], root_cluster);
                let bytes = layout.directory_bytes(&self.root, None, "", label_entry);
                layout.write_chain(&chain, &bytes);
            }
        }

        FatImage {
            boot_sector,
            geometry,
            table: layout.table,
            sectors: layout.sectors,
            chains: layout.chains,
        }
    }
}

fn split_path(path: &str) -> (&str, &str) {
    let path = path.trim_start_matches('/');
    path.rsplit_once('/').unwrap_or(("", path))
}

fn children_mut<'a>(mut items: &'a mut Vec<Item>, path: &str) -> &'a mut Vec<Item> {
    for component in path.split('/').filter(|c| !c.is_empty()) {
        items = items
            .iter_mut()
            .find_map(|item| match item {
                Item::Dir { name, children } if name.as_str() == component => Some(children),
                _ => None,
            })
            .unwrap_or_else(|| panic!("image has no directory {component}"));
    }
    items
}

fn padded_label(label: &str) -> [u8; 11] {
    let mut padded = [b' '; 11];
    for (dst, src) in padded.iter_mut().zip(label.bytes()) {
        *dst = src;
    }
    padded
}

fn is_short_name_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || "!#$%&'()-@^_`{}~".contains(c)
}

/// Whether `name` can be stored as an 8.3 entry without a long name.
fn is_short_name(name: &str) -> bool {
    let (base, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    (1..=8).contains(&base.len())
        && ext.len() <= 3
        && !(name.contains('.') && ext.is_empty())
        && base.chars().chain(ext.chars()).all(is_short_name_char)
}

fn needs_long_name(name: &str) -> bool {
    !is_short_name(name)
}

/// Number of 32 byte slots the entries for `children` take, not counting
/// dot entries.
fn directory_slots(children: &[Item]) -> usize {
    children
        .iter()
        .map(|item| {
            let name = item.name();
            if needs_long_name(name) {
                fat::long_name_chunks(name).len() + 1
            } else {
                1
            }
        })
        .sum()
}

/// Generates `BASE~N.EXT` short names the way Windows does for names that
/// don't fit 8.3.
fn generated_short_name(name: &str, taken: &[ShortName]) -> ShortName {
    let (base, ext) = match name.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() => (base, ext),
        _ => (name, ""),
    };
    let clean = |s: &str, max: usize| -> String {
        s.chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_uppercase())
            .take(max)
            .collect()
    };
    let mut base = clean(base, 6);
    if base.is_empty() {
        base = String::from("FILE");
    }
    let ext = clean(ext, 3);
    (1..)
        .map(|n| ShortName::from_display(&format!("{base}~{n}.{ext}")))
        .find(|candidate| !taken.contains(candidate))
        .expect("ran out of short names")
}

struct Layout {
    geometry: Geometry,
    table: FatTable,
    next: u32,
    stride: u32,
    sectors: BTreeMap<u64, Sector>,
    chains: Vec<(String, Vec<Cluster>)>,
}

impl Layout {
    fn clusters_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.geometry.cluster_bytes())
    }

    fn alloc(&mut self, count: usize) -> Vec<Cluster> {
        let chain: Vec<Cluster> = (0..count)
            .map(|_| {
                let cluster = Cluster(self.next);
                assert!(self.geometry.is_valid_cluster(cluster), "image is full");
                self.next += self.stride;
                cluster
            })
            .collect();
        for pair in chain.windows(2) {
            self.table.set_raw_entry(pair[0].0, pair[1].0);
        }
        if let Some(last) = chain.last() {
            self.table
                .set_raw_entry(last.0, self.geometry.variant.end_of_chain());
        }
        chain
    }

    fn write_bytes(&mut self, first_sector: u32, data: &[u8]) {
        for (i, chunk) in data.chunks(SECTOR_SIZE).enumerate() {
            let mut sector = [0; SECTOR_SIZE];
            sector[..chunk.len()].copy_from_slice(chunk);
            self.sectors
                .insert(u64::from(first_sector) + i as u64, sector);
        }
    }

    fn write_chain(&mut self, chain: &[Cluster], data: &[u8]) {
        let cluster_bytes = self.geometry.cluster_bytes();
        for (i, &cluster) in chain.iter().enumerate() {
            let start = (i * cluster_bytes).min(data.len());
            let end = ((i + 1) * cluster_bytes).min(data.len());
            let sector = self
                .geometry
                .cluster_sector(cluster)
                .expect("allocated clusters are valid");
            self.write_bytes(sector, &data[start..end]);
        }
    }

    /// Allocates and writes everything below a directory and returns the
    /// directory's own bytes. `dots` holds this directory's first cluster and
    /// its parent's (0 for the root), and is `None` for the root itself.
    fn directory_bytes(
        &mut self,
        children: &[Item],
        dots: Option<(Cluster, Cluster)>,
        path: &str,
        label_entry: Option<&str>,
    ) -> Vec<u8> {
        let mut entries: Vec<[u8; DIR_ENTRY_SIZE]> = Vec::new();
        let push = |entries: &mut Vec<[u8; DIR_ENTRY_SIZE]>, entry: &RawDirEntry| {
            let mut bytes = [0; DIR_ENTRY_SIZE];
            bytes.copy_from_slice(entry.as_bytes());
            entries.push(bytes);
        };

        if let Some(label) = label_entry {
            let entry = RawDirEntry::new(
                ShortName(padded_label(label)),
                Attributes::VOLUME_ID,
                Cluster(0),
                0,
            );
            push(&mut entries, &entry);
        }
        let this = dots.map_or(Cluster(0), |(this, _)| this);
        if let Some((this, parent)) = dots {
            let dot = RawDirEntry::new(ShortName(*b".          "), Attributes::DIRECTORY, this, 0);
            let dotdot =
                RawDirEntry::new(ShortName(*b"..         "), Attributes::DIRECTORY, parent, 0);
            push(&mut entries, &dot);
            push(&mut entries, &dotdot);
        }

        let mut taken: Vec<ShortName> = Vec::new();
        for item in children {
            let name = item.name();
            let item_path = format!("{path}/{name}");
            let short = if needs_long_name(name) {
                generated_short_name(name, &taken)
            } else {
                ShortName::from_display(name)
            };
            taken.push(short);

            let entry = match item {
                Item::File { data, .. } => {
                    let chain = self.alloc(self.clusters_for(data.len()));
                    self.write_chain(&chain, data);
                    let first = chain.first().copied().unwrap_or(Cluster(0));
                    self.chains.push((item_path, chain));
                    RawDirEntry::new(short, Attributes::ARCHIVE, first, data.len() as u32)
                }
                Item::Dir { children, .. } => {
                    let slots = directory_slots(children) + 2;
                    let chain = self.alloc(self.clusters_for(slots * DIR_ENTRY_SIZE).max(1));
                    let bytes =
                        self.directory_bytes(children, Some((chain[0], this)), &item_path, None);
                    self.write_chain(&chain, &bytes);
                    self.chains.push((item_path, chain.clone()));
                    RawDirEntry::new(short, Attributes::DIRECTORY, chain[0], 0)
                }
            };

            if needs_long_name(name) {
                entries.extend(fat::long_name_entries(name, &entry));
            } else {
                push(&mut entries, &entry);
            }
        }

        entries.concat()
    }
}

/// A built FAT image, kept in pieces so tests can damage it before writing
/// it to a disk.
#[derive(Debug, Clone)]
pub(crate) struct FatImage {
    pub(crate) boot_sector: Sector,
    pub(crate) geometry: Geometry,
    table: FatTable,
    sectors: BTreeMap<u64, Sector>,
    chains: Vec<(String, Vec<Cluster>)>,
}

impl FatImage {
    pub(crate) fn total_sectors(&self) -> u64 {
        u64::from(self.geometry.total_sectors)
    }

    pub(crate) fn table_mut(&mut self) -> &mut FatTable {
        &mut self.table
    }

    /// Clusters allocated to the file or directory at `path`.
    pub(crate) fn chain(&self, path: &str) -> &[Cluster] {
        self.chains
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, chain)| chain.as_slice())
            .unwrap_or_else(|| panic!("image has no {path}"))
    }

    /// Writes the volume to `disk` starting at sector `start`.
    pub(crate) fn write_to(&self, disk: &dyn BlockDevice, start: u64) {
        disk.write_sector(start, &self.boot_sector).unwrap();

        let fat = self.table.as_bytes();
        for copy in 0..self.geometry.fat_count {
            let first = u64::from(self.geometry.first_fat_sector)
                + u64::from(copy) * u64::from(self.geometry.sectors_per_fat);
            for (i, chunk) in fat.chunks(SECTOR_SIZE).enumerate() {
                let mut sector = [0; SECTOR_SIZE];
                sector[..chunk.len()].copy_from_slice(chunk);
                disk.write_sector(start + first + i as u64, &sector).unwrap();
            }
        }

        for (&lba, sector) in &self.sectors {
            disk.write_sector(start + lba, sector).unwrap();
        }
    }

    /// A disk holding just this volume.
    pub(crate) fn disk(&self) -> Arc<SparseDisk> {
        let disk = Arc::new(SparseDisk::new(self.total_sectors()));
        self.write_to(&*disk, 0);
        disk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_rules() {
        assert!(is_short_name("FIRE.COM"));
        assert!(is_short_name("README"));
        assert!(!is_short_name("fire.com"));
        assert!(!is_short_name("TOOLONGNAME.TXT"));
        assert!(!is_short_name("A.B.C"));
        assert!(!is_short_name("TRAIL."));

        let first = generated_short_name("areallylongfilename.txt", &[]);
        assert_eq!(first.to_string(), "AREALL~1.TXT");
        let second = generated_short_name("areallylongfilename.txt", &[first]);
        assert_eq!(second.to_string(), "AREALL~2.TXT");
    }

    #[test]
    fn presets_have_expected_variants() {
        for builder in [
            FatImageBuilder::fat12(),
            FatImageBuilder::fat16(),
            FatImageBuilder::fat32(),
        ] {
            let image = builder.build();
            assert_eq!(image.geometry.variant, builder.variant);
        }
    }

    #[test]
    fn fragmented_chains_skip_clusters() {
        let image = FatImageBuilder::fat12()
            .fragmented()
            .file("/A.BIN", &[1; 1500])
            .build();
        assert_eq!(image.chain("/A.BIN"), &[Cluster(2), Cluster(4), Cluster(6)]);
    }
}
