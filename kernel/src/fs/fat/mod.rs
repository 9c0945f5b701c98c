//! Read-only FAT12/16/32 driver. The on-disk structures live in the `fat`
//! crate; this module does the I/O and plugs volumes into the VFS.
//!
//! # Resources
//!
//! - <https://wiki.osdev.org/FAT>
//! - <https://en.wikipedia.org/wiki/Design_of_the_FAT_file_system>

mod vfs;
mod volume;

pub use vfs::*;
pub use volume::*;
