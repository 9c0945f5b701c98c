use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::block::{BlockDevice, Sector, SECTOR_SIZE};
use crate::fs::memfs::{MemFs, MemFsConfig};

use super::{FilePath, FileSystem, FsError, MountError, Node, OpenFlags};

/// Tries to recognise a volume of `size` sectors starting at sector `start`.
/// `Ok(None)` means the volume belongs to some other driver. The scratch
/// sector is free for the constructor to use during the call.
pub type FsConstructor = fn(
    device: &Arc<dyn BlockDevice>,
    start: u64,
    size: u64,
    scratch: &mut Sector,
) -> Result<Option<Arc<dyn FileSystem>>, MountError>;

/// Constructors tried, in order, for block devices.
pub const DEFAULT_CONSTRUCTORS: &[FsConstructor] = &[crate::fs::fat::probe as FsConstructor];

/// What to mount.
#[derive(Debug, Clone)]
pub enum Device {
    /// A volume on a block device, handed to the constructors in turn.
    Block(Arc<dyn BlockDevice>),
    /// A fresh in-memory filesystem.
    Memory(MemFsConfig),
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub point: FilePath,
    pub fs: Arc<dyn FileSystem>,
}

/// Mount table and current directory. Everything path based goes through
/// here.
#[derive(Debug)]
pub struct VfsContext {
    constructors: Vec<FsConstructor>,
    mounts: Vec<Mount>,
    cwd: FilePath,
    scratch: Sector,
}

impl Default for VfsContext {
    fn default() -> Self {
        Self::new()
    }
}

impl VfsContext {
    pub fn new() -> Self {
        Self::with_constructors(DEFAULT_CONSTRUCTORS.to_vec())
    }

    pub fn with_constructors(constructors: Vec<FsConstructor>) -> Self {
        Self {
            constructors,
            mounts: Vec::new(),
            cwd: FilePath::root(),
            scratch: [0; SECTOR_SIZE],
        }
    }

    /// Mounts a filesystem. Without a mount point it becomes the root;
    /// otherwise the mount point must be an existing directory.
    pub fn mount(
        &mut self,
        device: Device,
        start: u64,
        size: u64,
        mount_point: Option<&str>,
    ) -> Result<Arc<dyn FileSystem>, MountError> {
        let point = self.check_mount_point(mount_point)?;
        let fs: Arc<dyn FileSystem> = match device {
            Device::Memory(config) => Arc::new(MemFs::new(config)),
            Device::Block(device) => self.probe(&device, start, size)?,
        };
        self.attach(point, fs.clone());
        Ok(fs)
    }

    /// Mounts an already constructed filesystem.
    pub fn mount_filesystem(
        &mut self,
        fs: Arc<dyn FileSystem>,
        mount_point: Option<&str>,
    ) -> Result<(), MountError> {
        let point = self.check_mount_point(mount_point)?;
        self.attach(point, fs);
        Ok(())
    }

    fn attach(&mut self, point: FilePath, fs: Arc<dyn FileSystem>) {
        log::info!("mounted {} filesystem at {point}", fs.fs_type());
        self.mounts.push(Mount { point, fs });
    }

    fn check_mount_point(&self, mount_point: Option<&str>) -> Result<FilePath, MountError> {
        let Some(mount_point) = mount_point else {
            if self.root().is_some() {
                return Err(MountError::RootAlreadyMounted);
            }
            return Ok(FilePath::root());
        };

        if self.root().is_none() {
            return Err(MountError::NoRoot);
        }
        let point = self
            .absolute(mount_point)
            .map_err(MountError::InvalidMountPoint)?;
        if self.mounts.iter().any(|m| m.point == point) {
            return Err(MountError::AlreadyMounted);
        }
        let node = self
            .open_absolute(&point, OpenFlags::empty())
            .map_err(MountError::InvalidMountPoint)?;
        if !node.is_dir() {
            return Err(MountError::InvalidMountPoint(FsError::NotADirectory));
        }
        Ok(point)
    }

    fn probe(
        &mut self,
        device: &Arc<dyn BlockDevice>,
        start: u64,
        size: u64,
    ) -> Result<Arc<dyn FileSystem>, MountError> {
        for constructor in &self.constructors {
            if let Some(fs) = constructor(device, start, size, &mut self.scratch)? {
                return Ok(fs);
            }
        }
        log::warn!("no filesystem recognised the volume at sector {start}");
        Err(MountError::Unrecognized)
    }

    /// Detaches the filesystem mounted at `mount_point`. Open nodes keep it
    /// alive until they are closed. Fails if other filesystems are mounted
    /// below it.
    pub fn unmount(&mut self, mount_point: &str) -> Result<(), MountError> {
        let point = self.absolute(mount_point).map_err(|_| MountError::NotMounted)?;
        let index = self
            .mounts
            .iter()
            .position(|m| m.point == point)
            .ok_or(MountError::NotMounted)?;
        let nested = self
            .mounts
            .iter()
            .any(|m| m.point != point && m.point.strip_prefix(&point).is_some());
        if nested {
            return Err(MountError::Busy);
        }
        let mount = self.mounts.remove(index);
        log::info!("unmounted {} filesystem from {point}", mount.fs.fs_type());
        Ok(())
    }

    pub fn root(&self) -> Option<&Arc<dyn FileSystem>> {
        self.mounts
            .iter()
            .find(|m| m.point.is_root())
            .map(|m| &m.fs)
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    /// Opens a file or directory. Relative paths start at the current
    /// directory.
    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<Node, FsError> {
        let path = self.absolute(path)?;
        self.open_absolute(&path, flags)
    }

    fn open_absolute(&self, path: &FilePath, flags: OpenFlags) -> Result<Node, FsError> {
        let (fs, relative) = self.resolve(path)?;
        fs.open(&relative, flags)
    }

    /// Finds the filesystem owning `path` (the one with the longest matching
    /// mount point) and the rest of the path within it.
    fn resolve(&self, path: &FilePath) -> Result<(&Arc<dyn FileSystem>, FilePath), FsError> {
        self.mounts
            .iter()
            .filter_map(|m| Some((m, path.strip_prefix(&m.point)?)))
            .max_by_key(|(m, _)| m.point.components.len())
            .map(|(m, relative)| (&m.fs, relative))
            .ok_or(FsError::NotFound)
    }

    fn absolute(&self, path: &str) -> Result<FilePath, FsError> {
        let path = FilePath::parse(path).ok_or(FsError::InvalidPath)?;
        Ok(self.cwd.join(&path).normalize())
    }

    pub fn chdir(&mut self, path: &str) -> Result<(), FsError> {
        let path = self.absolute(path)?;
        let node = self.open_absolute(&path, OpenFlags::empty())?;
        if !node.is_dir() {
            return Err(FsError::NotADirectory);
        }
        self.cwd = path;
        Ok(())
    }

    pub fn getcwd(&self) -> &FilePath {
        &self.cwd
    }
}
