use core::fmt;

use alloc::vec::Vec;

/// An 8.3 name as stored in a directory entry: 8 bytes of base name and 3
/// bytes of extension, both padded with spaces.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortName(pub [u8; 11]);

impl ShortName {
    pub fn base(&self) -> &[u8] {
        trim_trailing_spaces(&self.0[..8])
    }

    pub fn extension(&self) -> &[u8] {
        trim_trailing_spaces(&self.0[8..])
    }

    /// Checksum stored in every long name entry belonging to this short name,
    /// used to detect long name entries orphaned by a non LFN-aware writer.
    pub fn checksum(&self) -> u8 {
        self.0
            .iter()
            .fold(0_u8, |sum, &b| sum.rotate_right(1).wrapping_add(b))
    }

    /// Builds a short name from `BASE.EXT` style text. Only meant for names
    /// that are already valid 8.3 names; longer parts are truncated.
    pub fn from_display(name: &str) -> Self {
        let mut raw = [b' '; 11];
        let (base, ext) = match name.rsplit_once('.') {
            Some((base, ext)) if !base.is_empty() => (base, ext),
            _ => (name, ""),
        };
        for (dst, src) in raw[..8].iter_mut().zip(base.bytes()) {
            *dst = src.to_ascii_uppercase();
        }
        for (dst, src) in raw[8..].iter_mut().zip(ext.bytes()) {
            *dst = src.to_ascii_uppercase();
        }
        Self(raw)
    }
}

impl fmt::Display for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.base() {
            write!(f, "{}", char::from(b))?;
        }
        let ext = self.extension();
        if !ext.is_empty() {
            f.write_str(".")?;
            for &b in ext {
                write!(f, "{}", char::from(b))?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName({self})")
    }
}

fn trim_trailing_spaces(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Interprets a space (or NUL) padded ASCII field from the boot sector.
pub(crate) fn trim_padded(bytes: &[u8]) -> &str {
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(0, |i| i + 1);
    core::str::from_utf8(&bytes[..end]).unwrap_or("")
}

/// Number of UTF-16 code units held by one long name entry.
pub const LFN_CHARS_PER_ENTRY: usize = 13;

/// Longest long name a directory can store.
pub const LFN_MAX_CHARS: usize = 255;

/// Splits a long name into the 13 code unit chunks stored by consecutive long
/// name entries, in logical order (the first chunk belongs to sequence
/// number 1). The last chunk is terminated with 0x0000 when there is room,
/// and padded with 0xFFFF after that.
pub fn long_name_chunks(name: &str) -> Vec<[u16; LFN_CHARS_PER_ENTRY]> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let mut chunks: Vec<[u16; LFN_CHARS_PER_ENTRY]> = units
        .chunks(LFN_CHARS_PER_ENTRY)
        .map(|chunk| {
            let mut out = [0xFFFF; LFN_CHARS_PER_ENTRY];
            out[..chunk.len()].copy_from_slice(chunk);
            if chunk.len() < LFN_CHARS_PER_ENTRY {
                out[chunk.len()] = 0x0000;
            }
            out
        })
        .collect();
    if chunks.is_empty() {
        let mut out = [0xFFFF; LFN_CHARS_PER_ENTRY];
        out[0] = 0;
        chunks.push(out);
    }
    chunks
}
