use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use fat::{BootSector, Cluster, DirEntry, DirectoryIter, FatTable, FatVariant, Geometry};

use crate::block::{BlockDevice, Sector, SECTOR_SIZE};
use crate::vfs::{FilePath, FsError, MountError};

/// A mounted FAT volume: its geometry, the whole FAT and the root directory,
/// all loaded at mount time.
#[derive(Debug)]
pub struct FatVolume {
    device: Arc<dyn BlockDevice>,
    /// First sector of the volume on the device.
    start: u64,
    geometry: Geometry,
    table: FatTable,
    oem_name: String,
    label: Option<String>,
    root: Vec<DirEntry>,
}

impl FatVolume {
    /// Reads the volume starting at sector `start`. Returns `Ok(None)` if
    /// the volume isn't a FAT12/16/32 volume we can use.
    pub fn mount(
        device: Arc<dyn BlockDevice>,
        start: u64,
        size: u64,
        scratch: &mut Sector,
    ) -> Result<Option<Self>, MountError> {
        device.read_sector(start, scratch)?;
        let Some(boot) = BootSector::parse(scratch.as_slice()) else {
            log::debug!("fat: no FAT boot sector at sector {start}");
            return Ok(None);
        };
        let geometry = match boot.geometry() {
            Ok(geometry) => geometry,
            Err(e) => {
                log::warn!("fat: ignoring volume at sector {start}: {e}");
                return Ok(None);
            }
        };
        if geometry.variant == FatVariant::ExFat {
            log::warn!("fat: volume at sector {start} has exFAT's cluster count, not mounting");
            return Ok(None);
        }
        // The FATs and root directory lie below total_sectors, so this also
        // keeps every table read inside the partition.
        if size != 0 && u64::from(geometry.total_sectors) > size {
            log::warn!(
                "fat: volume at sector {start} claims {} sectors but its partition has {size}, not mounting",
                geometry.total_sectors
            );
            return Ok(None);
        }

        let Ok(mut fat_bytes) = zeroed_buffer(geometry.fat_bytes()) else {
            log::error!("fat: out of memory loading a {} byte FAT", geometry.fat_bytes());
            return Err(MountError::OutOfMemory);
        };
        device.read_sectors(start + u64::from(geometry.first_fat_sector), &mut fat_bytes)?;
        let table = FatTable::new(geometry.variant, fat_bytes, geometry.cluster_count);

        let mut volume = Self {
            device,
            start,
            oem_name: boot.oem_name().to_string(),
            label: boot.volume_label().map(ToString::to_string),
            geometry,
            table,
            root: Vec::new(),
        };

        let root_bytes = match volume.root_bytes() {
            Ok(bytes) => bytes,
            Err(FsError::Io(e)) => return Err(e.into()),
            Err(FsError::NoSpace) => return Err(MountError::OutOfMemory),
            Err(e) => {
                log::warn!("fat: can't load root directory of volume at sector {start}: {e}");
                return Ok(None);
            }
        };
        if volume.label.is_none() {
            volume.label = fat::volume_label(&root_bytes);
        }
        volume.root = DirectoryIter::new(&root_bytes, volume.geometry.variant).collect();

        log::info!(
            "fat: {} volume {:?} at sector {start}: {} clusters of {} bytes, formatted by {:?}",
            volume.geometry.variant,
            volume.label.as_deref().unwrap_or(""),
            volume.geometry.cluster_count,
            volume.geometry.cluster_bytes(),
            volume.oem_name,
        );
        Ok(Some(volume))
    }

    fn root_bytes(&self) -> Result<Vec<u8>, FsError> {
        if let Some(root_cluster) = self.geometry.root_cluster {
            return self.read_chain(root_cluster);
        }
        let mut bytes = zeroed_buffer(self.geometry.root_dir_sectors as usize * SECTOR_SIZE)?;
        self.device.read_sectors(
            self.start + u64::from(self.geometry.first_root_dir_sector),
            &mut bytes,
        )?;
        Ok(bytes)
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn table(&self) -> &FatTable {
        &self.table
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn oem_name(&self) -> &str {
        &self.oem_name
    }

    pub fn root(&self) -> &[DirEntry] {
        &self.root
    }

    /// Reads one cluster into `buf`, which must be one cluster long.
    pub fn read_cluster(&self, cluster: Cluster, buf: &mut [u8]) -> Result<(), FsError> {
        let sector = self
            .geometry
            .cluster_sector(cluster)
            .ok_or(FsError::Corrupt("cluster number outside the data region"))?;
        self.device
            .read_sectors(self.start + u64::from(sector), buf)?;
        Ok(())
    }

    /// Reads every cluster of the chain starting at `first` into one buffer.
    pub fn read_chain(&self, first: Cluster) -> Result<Vec<u8>, FsError> {
        let cluster_bytes = self.geometry.cluster_bytes();
        let len = self.table.chain_len(first) as usize;
        let mut bytes = zeroed_buffer(len * cluster_bytes)?;
        for (cluster, chunk) in self
            .table
            .chain(first)
            .zip(bytes.chunks_exact_mut(cluster_bytes))
        {
            self.read_cluster(cluster, chunk)?;
        }
        Ok(bytes)
    }

    /// Lists the directory starting at `first`. Cluster 0 is what `..`
    /// entries use for the root.
    pub fn directory(&self, first: Cluster) -> Result<Vec<DirEntry>, FsError> {
        if first.0 == 0 {
            return Ok(self.root.clone());
        }
        let bytes = self.read_chain(first)?;
        Ok(DirectoryIter::new(&bytes, self.geometry.variant).collect())
    }

    /// Finds the entry for `path`. `None` stands for the root directory,
    /// which has no entry of its own.
    pub fn lookup(&self, path: &FilePath) -> Result<Option<DirEntry>, FsError> {
        let Some((last, parents)) = path.components.split_last() else {
            return Ok(None);
        };

        let mut listing: Option<Vec<DirEntry>> = None;
        for component in parents {
            let entries = listing.as_deref().unwrap_or(&self.root);
            let entry = find(entries, component.as_str())?;
            if !entry.is_dir() {
                return Err(FsError::NotADirectory);
            }
            let first = entry.first_cluster;
            listing = Some(self.directory(first)?);
        }

        let entries = listing.as_deref().unwrap_or(&self.root);
        find(entries, last.as_str()).cloned().map(Some)
    }
}

fn find<'a>(entries: &'a [DirEntry], name: &str) -> Result<&'a DirEntry, FsError> {
    entries
        .iter()
        .find(|e| e.name_matches(name))
        .ok_or(FsError::NotFound)
}

pub(super) fn zeroed_buffer(len: usize) -> Result<Vec<u8>, FsError> {
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(len)
        .map_err(|_| FsError::NoSpace)?;
    bytes.resize(len, 0);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::block::IoError;
    use crate::testing::FatImageBuilder;

    fn path(s: &str) -> FilePath {
        FilePath::parse(s).unwrap()
    }

    fn mount(disk: Arc<dyn BlockDevice>, start: u64, size: u64) -> Option<FatVolume> {
        let mut scratch = [0; SECTOR_SIZE];
        FatVolume::mount(disk, start, size, &mut scratch).unwrap()
    }

    #[test]
    fn mounts_all_three_variants() {
        for (builder, variant) in [
            (FatImageBuilder::fat12(), FatVariant::Fat12),
            (FatImageBuilder::fat16(), FatVariant::Fat16),
            (FatImageBuilder::fat32(), FatVariant::Fat32),
        ] {
            let image = builder.label("DEMOS").file("/FIRE.COM", b"fire").build();
            let volume = mount(image.disk(), 0, image.total_sectors()).unwrap();
            assert_eq!(volume.geometry().variant, variant);
            assert_eq!(volume.label(), Some("DEMOS"));
            assert_eq!(volume.oem_name(), "MSWIN4.1");
            let names: Vec<&str> = volume.root().iter().map(|e| e.name.as_str()).collect();
            assert_eq!(names, ["FIRE.COM"]);
        }
    }

    #[test]
    fn label_falls_back_to_root_entry() {
        let image = FatImageBuilder::fat16().label_entry("INTROS").build();
        let volume = mount(image.disk(), 0, 0).unwrap();
        assert_eq!(volume.label(), Some("INTROS"));
        // The label entry itself is not listed.
        assert!(volume.root().is_empty());
    }

    #[test]
    fn not_mine_without_boot_jump() {
        let image = FatImageBuilder::fat12().build();
        let disk = image.disk();
        let mut boot = image.boot_sector;
        boot[0] = 0xE9;
        disk.write_sector(0, &boot).unwrap();
        assert!(mount(disk, 0, 0).is_none());
    }

    #[test]
    fn not_mine_with_impossible_geometry() {
        let image = FatImageBuilder::fat12().build();
        let disk = image.disk();
        let mut boot = image.boot_sector;
        boot[13] = 3; // sectors per cluster
        disk.write_sector(0, &boot).unwrap();
        assert!(mount(disk, 0, 0).is_none());
    }

    #[test]
    fn not_mine_when_larger_than_partition() {
        let image = FatImageBuilder::fat16().build();
        assert!(mount(image.disk(), 0, image.total_sectors() - 1).is_none());
        assert!(mount(image.disk(), 0, image.total_sectors()).is_some());
    }

    #[test]
    fn huge_fat_claim_is_rejected_without_loading() {
        let image = FatImageBuilder::fat32().build();
        let disk = image.disk();
        let mut boot = image.boot_sector;
        boot[16] = 1; // FAT count
        boot[32..36].copy_from_slice(&0xFFFF_FFFF_u32.to_le_bytes());
        boot[36..40].copy_from_slice(&0xF000_0000_u32.to_le_bytes());
        disk.write_sector(0, &boot).unwrap();
        assert!(mount(disk.clone(), 0, 67000).is_none());
        // Only the boot sector was read.
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn io_errors_fail_the_mount() {
        let image = FatImageBuilder::fat16().build();
        let disk = image.disk();
        disk.fail_reads_at(u64::from(image.geometry.first_fat_sector));
        let mut scratch = [0; SECTOR_SIZE];
        let err = FatVolume::mount(disk, 0, 0, &mut scratch).unwrap_err();
        assert_eq!(err, MountError::Io(IoError::Device { lba: 4 }));
    }

    #[test]
    fn mounts_at_an_offset() {
        let image = FatImageBuilder::fat12().file("/A.TXT", b"offset").build();
        let disk = Arc::new(crate::testing::SparseDisk::new(image.total_sectors() + 100));
        image.write_to(&*disk, 100);
        let volume = mount(disk, 100, image.total_sectors()).unwrap();
        let entry = volume.lookup(&path("/a.txt")).unwrap().unwrap();
        let data = volume.read_chain(entry.first_cluster).unwrap();
        assert_eq!(&data[..6], b"offset");
    }

    #[test]
    fn lookup_walks_directories() {
        let image = FatImageBuilder::fat32()
            .dir("/DEMOS")
            .dir("/DEMOS/OLD")
            .file("/DEMOS/OLD/FIRE.COM", b"fire")
            .file("/README.TXT", b"readme")
            .build();
        let volume = mount(image.disk(), 0, 0).unwrap();

        assert!(volume.lookup(&FilePath::root()).unwrap().is_none());
        let fire = volume.lookup(&path("demos/old/fire.com")).unwrap().unwrap();
        assert_eq!(fire.size, 4);
        assert_eq!(fire.first_cluster, image.chain("/DEMOS/OLD/FIRE.COM")[0]);

        assert_eq!(
            volume.lookup(&path("/README.TXT/x")).unwrap_err(),
            FsError::NotADirectory
        );
        assert_eq!(
            volume.lookup(&path("/DEMOS/NOPE")).unwrap_err(),
            FsError::NotFound
        );

        // `..` in a subdirectory of the root points at cluster 0.
        let demos = volume.lookup(&path("/DEMOS")).unwrap().unwrap();
        let listing = volume.directory(demos.first_cluster).unwrap();
        let dotdot = listing.iter().find(|e| e.name == "..").unwrap();
        assert_eq!(volume.directory(dotdot.first_cluster).unwrap(), volume.root());
    }

    #[test]
    fn long_names_are_found() {
        let image = FatImageBuilder::fat16()
            .file("/areallylongfilename.txt", b"long")
            .build();
        let volume = mount(image.disk(), 0, 0).unwrap();
        let entry = volume
            .lookup(&path("/AReallyLongFileName.TXT"))
            .unwrap()
            .unwrap();
        assert_eq!(entry.name, "areallylongfilename.txt");
        assert_eq!(entry.short_name.to_string(), "AREALL~1.TXT");
        // The short alias works too.
        assert!(volume.lookup(&path("/areall~1.txt")).unwrap().is_some());
    }
}
