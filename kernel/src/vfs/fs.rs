use core::fmt::{self, Debug};

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;

use super::{FilePath, FsError};

/// Drivers a filesystem can come from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FsType {
    Fat,
    Mem,
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fat => "fat",
            Self::Mem => "memfs",
        })
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct OpenFlags: u8 {
        /// Create the last path component if it doesn't exist.
        const CREATE = 1 << 0;
        /// With `CREATE`, create a directory instead of a file.
        const DIRECTORY = 1 << 1;
        /// Empty an existing file.
        const TRUNCATE = 1 << 2;
        /// Every write goes to the end of the file.
        const APPEND = 1 << 3;
    }
}

/// Top level VFS abstraction for an underlying filesystem.
pub trait FileSystem: Debug + Send + Sync {
    fn fs_type(&self) -> FsType;

    fn volume_label(&self) -> Option<String> {
        None
    }

    /// Opens `path`, which is relative to the root of this filesystem and
    /// already free of `.` and `..` components.
    fn open(&self, path: &FilePath, flags: OpenFlags) -> Result<Node, FsError>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

impl SeekFrom {
    /// Computes the new absolute position.
    pub fn resolve(self, current: u64, size: u64) -> Result<u64, FsError> {
        let (base, offset) = match self {
            Self::Start(pos) => return Ok(pos),
            Self::Current(offset) => (current, offset),
            Self::End(offset) => (size, offset),
        };
        base.checked_add_signed(offset).ok_or(FsError::InvalidSeek)
    }
}

/// Entry returned by [`Node::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub node_type: NodeType,
    pub size: u64,
}

/// Operations a driver implements for an open file or directory. Every
/// driver implements every operation, returning an error for the ones that
/// make no sense for the node or the filesystem.
pub trait NodeOps: Debug + Send {
    fn size(&self) -> u64;

    fn tell(&self) -> u64;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError>;

    fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError>;

    fn rewind_dir(&mut self) -> Result<(), FsError>;

    fn read_dir(&mut self) -> Result<Option<DirEntry>, FsError>;

    /// Called once when the node is closed or dropped.
    fn close(&mut self) {}
}

/// An open file or directory. Owned by whoever opened it; driver state is
/// released when it is closed or dropped.
#[derive(Debug)]
pub struct Node {
    node_type: NodeType,
    ops: Box<dyn NodeOps>,
}

impl Node {
    pub fn new(node_type: NodeType, ops: Box<dyn NodeOps>) -> Self {
        Self { node_type, ops }
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn is_dir(&self) -> bool {
        self.node_type == NodeType::Directory
    }

    pub fn size(&self) -> u64 {
        self.ops.size()
    }

    pub fn tell(&self) -> u64 {
        self.ops.tell()
    }

    /// Reads up to `buf.len()` bytes at the current position. Returns 0 at
    /// the end of the file.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        self.ops.read(buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        self.ops.write(buf)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64, FsError> {
        self.ops.seek(pos)
    }

    pub fn rewind_dir(&mut self) -> Result<(), FsError> {
        self.ops.rewind_dir()
    }

    /// Returns the next directory entry, or `None` once all were returned.
    pub fn read_dir(&mut self) -> Result<Option<DirEntry>, FsError> {
        self.ops.read_dir()
    }

    /// Reads from the current position to the end of the file.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>, FsError> {
        let mut data = Vec::new();
        let mut chunk = [0; 512];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                return Ok(data);
            }
            data.extend_from_slice(&chunk[..n]);
        }
    }

    /// Writes all of `buf`, failing if the driver stops accepting data.
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<(), FsError> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(FsError::NoSpace);
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.ops.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_resolution() {
        assert_eq!(SeekFrom::Start(7).resolve(3, 10), Ok(7));
        assert_eq!(SeekFrom::Current(-3).resolve(3, 10), Ok(0));
        assert_eq!(SeekFrom::Current(-4).resolve(3, 10), Err(FsError::InvalidSeek));
        assert_eq!(SeekFrom::End(5).resolve(3, 10), Ok(15));
        assert_eq!(SeekFrom::End(-10).resolve(3, 10), Ok(0));
        assert_eq!(SeekFrom::Current(1).resolve(u64::MAX, 0), Err(FsError::InvalidSeek));
    }
}
