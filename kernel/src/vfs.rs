//! Virtual filesystem layer. A [`VfsContext`] owns the mount table and the
//! current directory and hands path operations to the filesystem that owns
//! the path. Open files and directories are [`Node`]s.

mod context;
mod error;
mod fs;
mod path;

pub use context::*;
pub use error::*;
pub use fs::*;
pub use path::*;
