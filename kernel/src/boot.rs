//! Boot-time filesystem setup: memfs becomes the root, and every volume of
//! the boot disk is mounted below it.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use fat::BootSector;

use crate::block::{BlockDevice, Sector, SECTOR_SIZE};
use crate::config::{ConfigList, KernelConfig};
use crate::fs::memfs::{MemFs, MemFsConfig};
use crate::part::{mbr_table_is_valid, read_partitions, Partition};
use crate::vfs::{Device, FileSystem, FsError, MountError, OpenFlags, VfsContext};

/// Name of the boot disk under the root directory.
pub const BOOT_DISK: &str = "hd0";

/// Configuration file looked up at the root of each mounted volume.
pub const CONFIG_FILE: &str = "BOOT.CFG";

const MAX_PARTITIONS: usize = 16;

/// What happened to one volume of the boot disk.
#[derive(Debug)]
pub struct MountReport {
    pub mount_point: String,
    /// `None` when the whole disk was mounted as a superfloppy.
    pub partition: Option<Partition>,
    pub result: Result<Arc<dyn FileSystem>, MountError>,
}

impl MountReport {
    pub fn is_mounted(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug)]
pub struct BootVolumes {
    pub vfs: VfsContext,
    pub memfs: Arc<MemFs>,
    pub partitions: Vec<Partition>,
    pub reports: Vec<MountReport>,
    /// Contents of the first `BOOT.CFG` found, empty if there was none.
    pub config: ConfigList,
    pub kernel_config: KernelConfig,
}

/// Mounts memfs as the root and the volumes of `device` below it, then
/// applies the boot configuration.
///
/// Only a failure to mount the root is an error. Everything else is logged
/// and shows up in [`BootVolumes::reports`].
pub fn init_filesystems(
    device: Arc<dyn BlockDevice>,
    memfs_config: MemFsConfig,
) -> Result<BootVolumes, MountError> {
    let mut vfs = VfsContext::new();
    let memfs = Arc::new(MemFs::new(memfs_config));
    vfs.mount_filesystem(memfs.clone(), None)?;

    let partitions = scan_partitions(&*device);
    let mut reports = Vec::new();
    if partitions.is_empty() {
        let mount_point = format!("/{BOOT_DISK}");
        let size = device.sector_count().unwrap_or(0);
        reports.push(mount_volume(&mut vfs, &device, mount_point, None, 0, size));
    }
    for (i, partition) in partitions.iter().enumerate() {
        let mount_point = format!("/{BOOT_DISK}p{i}");
        reports.push(mount_volume(
            &mut vfs,
            &device,
            mount_point,
            Some(*partition),
            partition.start_sector,
            partition.size_sectors,
        ));
    }

    let config = load_config(&vfs, &reports);
    let kernel_config = KernelConfig::from_list(&config);
    crate::logging::set_level(kernel_config.log_level);
    if let Some(limit) = kernel_config.memfs_limit {
        log::info!("memfs limited to {limit} bytes");
        memfs.set_capacity_limit(Some(limit));
    }

    Ok(BootVolumes {
        vfs,
        memfs,
        partitions,
        reports,
        config,
        kernel_config,
    })
}

/// Partitions of the boot disk. Empty when the disk is a superfloppy or
/// has no usable partition table.
fn scan_partitions(device: &dyn BlockDevice) -> Vec<Partition> {
    let mut sector: Sector = [0; SECTOR_SIZE];
    if let Err(e) = device.read_sector(0, &mut sector) {
        log::error!("can't read the boot disk: {e}");
        return Vec::new();
    }
    let is_fat = BootSector::parse(&sector).is_some_and(|boot| boot.geometry().is_ok());
    if is_fat && !mbr_table_is_valid(&sector, device.sector_count()) {
        log::info!("{BOOT_DISK} starts with a FAT boot sector, treating it as a superfloppy");
        return Vec::new();
    }

    match read_partitions(device, MAX_PARTITIONS) {
        Ok(partitions) => partitions,
        Err(e) => {
            log::warn!("{BOOT_DISK}: {e}");
            Vec::new()
        }
    }
}

fn mount_volume(
    vfs: &mut VfsContext,
    device: &Arc<dyn BlockDevice>,
    mount_point: String,
    partition: Option<Partition>,
    start: u64,
    size: u64,
) -> MountReport {
    let result = vfs
        .open(&mount_point, OpenFlags::CREATE | OpenFlags::DIRECTORY)
        .map_err(MountError::InvalidMountPoint)
        .and_then(|_| vfs.mount(Device::Block(device.clone()), start, size, Some(&mount_point)));
    if let Err(e) = &result {
        log::error!("failed to mount {mount_point}: {e}");
    }
    MountReport {
        mount_point,
        partition,
        result,
    }
}

fn load_config(vfs: &VfsContext, reports: &[MountReport]) -> ConfigList {
    for report in reports.iter().filter(|r| r.is_mounted()) {
        let path = format!("{}/{CONFIG_FILE}", report.mount_point);
        match ConfigList::load(vfs, &path) {
            Ok(config) => {
                log::info!("loaded {} settings from {path}", config.len());
                return config;
            }
            Err(FsError::NotFound) => {}
            Err(e) => log::warn!("can't read {path}: {e}"),
        }
    }
    log::debug!("no {CONFIG_FILE} on any volume");
    ConfigList::new()
}
