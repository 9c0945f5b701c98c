//! `key = value` configuration files, like the `BOOT.CFG` read at boot.

use core::fmt;
use core::str::FromStr;

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use log::LevelFilter;

use crate::vfs::{FsError, OpenFlags, VfsContext};

/// One `key = value` line. The value is kept as text; `int` is its integer
/// reading, if it starts with a number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOption {
    key: String,
    value: String,
    int: Option<i64>,
}

impl ConfigOption {
    fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            int: parse_int(value),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn as_int(&self) -> Option<i64> {
        self.int
    }

    fn matches(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }
}

/// Ordered list of options. Keys compare case-insensitively and the first
/// option with a key wins.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConfigList {
    options: Vec<ConfigOption>,
}

impl ConfigList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses configuration text. Blank lines and lines starting with `#`
    /// are ignored; malformed lines are logged and skipped.
    pub fn parse(text: &str) -> Self {
        let mut list = Self::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                log::warn!("config: skipping line {} without '=': {line}", number + 1);
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                log::warn!("config: skipping line {} with an empty key or value", number + 1);
                continue;
            }
            log::debug!("config: {key} = {value}");
            list.options.push(ConfigOption::new(key, value));
        }
        list
    }

    pub fn load(vfs: &VfsContext, path: &str) -> Result<Self, FsError> {
        let mut node = vfs.open(path, OpenFlags::empty())?;
        if node.is_dir() {
            return Err(FsError::IsADirectory);
        }
        let bytes = node.read_to_end()?;
        Ok(Self::parse(&String::from_utf8_lossy(&bytes)))
    }

    /// Writes the list to `path`, replacing the file. Fails on read-only
    /// filesystems.
    pub fn save(&self, vfs: &VfsContext, path: &str) -> Result<(), FsError> {
        let mut node = vfs.open(path, OpenFlags::CREATE | OpenFlags::TRUNCATE)?;
        node.write_all(self.to_string().as_bytes())
    }

    fn find(&self, key: &str) -> Option<&ConfigOption> {
        self.options.iter().find(|o| o.matches(key))
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.find(key).map(ConfigOption::value)
    }

    /// The integer reading of `key`. `None` if the key is missing or its
    /// value doesn't start with a number.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.find(key).and_then(ConfigOption::as_int)
    }

    /// Replaces the value of the first option named `key`, or appends a new
    /// option.
    pub fn set_str(&mut self, key: &str, value: &str) {
        match self.options.iter_mut().find(|o| o.matches(key)) {
            Some(option) => *option = ConfigOption::new(&option.key, value),
            None => self.options.push(ConfigOption::new(key, value)),
        }
    }

    pub fn set_int(&mut self, key: &str, value: i64) {
        self.set_str(key, &value.to_string());
    }

    /// Removes the first option named `key`. Returns whether there was one.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(index) = self.options.iter().position(|o| o.matches(key)) else {
            return false;
        };
        self.options.remove(index);
        true
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigOption> {
        self.options.iter()
    }
}

impl fmt::Display for ConfigList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for option in &self.options {
            writeln!(f, "{} = {}", option.key, option.value)?;
        }
        Ok(())
    }
}

/// Reads the longest integer prefix of `s` the way C's `strtol` does with
/// base 0: optional sign, then `0x` for hex, a leading `0` for octal,
/// decimal otherwise. Out of range values saturate.
pub fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let hex = rest
        .strip_prefix("0x")
        .or_else(|| rest.strip_prefix("0X"))
        .filter(|digits| digits.starts_with(|c: char| c.is_ascii_hexdigit()));
    let (radix, digits) = match hex {
        Some(digits) => (16, digits),
        None if rest.starts_with('0') => (8, rest),
        None => (10, rest),
    };

    let len = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if len == 0 {
        return None;
    }
    let magnitude = digits[..len].chars().fold(0_i64, |acc, c| {
        let digit = c.to_digit(radix).map_or(0, i64::from);
        acc.saturating_mul(i64::from(radix)).saturating_add(digit)
    });
    Some(if negative { -magnitude } else { magnitude })
}

/// Kernel settings read from the boot configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// `loglevel`: off, error, warn, info, debug or trace.
    pub log_level: LevelFilter,
    /// `memfs_limit`: byte budget of the in-memory root filesystem.
    pub memfs_limit: Option<usize>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Info,
            memfs_limit: None,
        }
    }
}

impl KernelConfig {
    pub fn from_list(list: &ConfigList) -> Self {
        let mut config = Self::default();

        if let Some(level) = list.get_str("loglevel") {
            match LevelFilter::from_str(level) {
                Ok(level) => config.log_level = level,
                Err(_) => log::warn!("config: unknown loglevel {level:?}"),
            }
        }

        if let Some(value) = list.get_str("memfs_limit") {
            match list.get_int("memfs_limit").map(usize::try_from) {
                Some(Ok(limit)) => config.memfs_limit = Some(limit),
                _ => log::warn!("config: memfs_limit must be a byte count, got {value:?}"),
            }
        }

        config
    }
}
