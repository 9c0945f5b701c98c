use core::str::FromStr;

use alloc::fmt;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// A path in the file system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePath {
    /// An absolute path starts from the root directory.
    pub absolute: bool,

    /// Components of a path not including separators (the `/` character).
    pub components: Vec<FilePathComponent>,
}

impl FilePath {
    pub fn root() -> Self {
        Self {
            absolute: true,
            components: Vec::new(),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let absolute = s.starts_with('/');
        let components: Vec<FilePathComponent> = s
            .split('/')
            .filter(|s| !s.is_empty())
            .filter_map(FilePathComponent::new)
            .collect();
        if !absolute && components.is_empty() {
            None
        } else {
            Some(Self {
                absolute,
                components,
            })
        }
    }

    pub fn is_root(&self) -> bool {
        self.absolute && self.components.is_empty()
    }

    /// Appends `other` to this path, unless `other` is absolute in which case
    /// it replaces it.
    pub fn join(&self, other: &Self) -> Self {
        if other.absolute {
            return other.clone();
        }
        let mut components = self.components.clone();
        components.extend(other.components.iter().cloned());
        Self {
            absolute: self.absolute,
            components,
        }
    }

    /// Resolves `.` and `..` lexically. `..` at the root of an absolute path
    /// stays at the root.
    pub fn normalize(&self) -> Self {
        let mut components: Vec<FilePathComponent> = Vec::new();
        for component in &self.components {
            match component.as_str() {
                "." => {}
                ".." => {
                    if components.last().is_some_and(|c| c.as_str() != "..") {
                        components.pop();
                    } else if !self.absolute {
                        components.push(component.clone());
                    }
                }
                _ => components.push(component.clone()),
            }
        }
        Self {
            absolute: self.absolute,
            components,
        }
    }

    /// If `prefix` names this path or one of its ancestors, returns the
    /// remaining components as a relative path.
    pub fn strip_prefix(&self, prefix: &Self) -> Option<Self> {
        if self.absolute != prefix.absolute || prefix.components.len() > self.components.len() {
            return None;
        }
        let (head, rest) = self.components.split_at(prefix.components.len());
        if head != prefix.components.as_slice() {
            return None;
        }
        Some(Self {
            absolute: false,
            components: rest.to_vec(),
        })
    }

    pub fn as_string(&self) -> String {
        let mut s = String::new();
        if self.absolute {
            s.push('/');
        }
        s.push_str(
            &self
                .components
                .iter()
                .map(FilePathComponent::as_str)
                .collect::<Vec<_>>()
                .join("/"),
        );
        s
    }
}

/// A component of a file path. It is non-empty and has no `/`; `new`
/// returns `None` for anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePathComponent(String);

impl FilePathComponent {
    pub fn new(s: &str) -> Option<Self> {
        if s.is_empty() || s.contains('/') {
            None
        } else {
            Some(Self(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilePathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FilePath {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or("file path is empty")
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}
