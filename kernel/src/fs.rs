//! Filesystem drivers that plug into the VFS.

pub mod fat;
pub mod memfs;
