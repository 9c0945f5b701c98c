use crate::block::IoError;

/// Errors from operations on paths and open nodes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("file exists")]
    AlreadyExists,
    #[error("operation not supported by this filesystem")]
    Unsupported,
    #[error("invalid path")]
    InvalidPath,
    #[error("file name too long")]
    NameTooLong,
    #[error("invalid seek")]
    InvalidSeek,
    #[error("no space left")]
    NoSpace,
    #[error("filesystem is corrupt: {0}")]
    Corrupt(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

/// Errors from mounting and unmounting filesystems.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MountError {
    #[error("I/O error while mounting: {0}")]
    Io(#[from] IoError),
    #[error("a root filesystem is already mounted")]
    RootAlreadyMounted,
    #[error("no root filesystem is mounted")]
    NoRoot,
    #[error("a filesystem is already mounted there")]
    AlreadyMounted,
    #[error("no filesystem recognised the volume")]
    Unrecognized,
    #[error("invalid mount point: {0}")]
    InvalidMountPoint(FsError),
    #[error("nothing is mounted there")]
    NotMounted,
    #[error("other filesystems are mounted below the root")]
    Busy,
    #[error("not enough memory to load the volume")]
    OutOfMemory,
}
