use core::fmt;

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use bitflags::bitflags;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::{Cluster, FatVariant, ShortName, DIR_ENTRY_SIZE, LFN_CHARS_PER_ENTRY};

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;

        /// Combination marking a long file name entry.
        const LONG_NAME = Self::READ_ONLY.bits()
            | Self::HIDDEN.bits()
            | Self::SYSTEM.bits()
            | Self::VOLUME_ID.bits();
    }
}

impl Attributes {
    /// Bits that take part in the long name check; the top two bits are
    /// reserved and may be set on long name entries.
    pub const MASK: u8 = 0x3F;

    pub fn is_long_name(raw: u8) -> bool {
        raw & Self::MASK == Self::LONG_NAME.bits()
    }
}

/// First name byte of the entry terminating a directory.
pub const END_OF_DIRECTORY: u8 = 0x00;
/// First name byte of a deleted entry.
pub const DELETED_ENTRY: u8 = 0xE5;
/// Stands in for a real 0xE5 first byte (a valid lead byte in Shift JIS).
pub const KANJI_E5: u8 = 0x05;

/// `RawDirEntry::nt_flags` bits Windows NT uses to store all-lowercase 8.3
/// names without a long name entry.
const NT_LOWERCASE_BASE: u8 = 0x08;
const NT_LOWERCASE_EXT: u8 = 0x10;

/// An 8.3 directory entry as stored on disk.
#[derive(Debug, Clone, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct RawDirEntry {
    /// 0x00
    pub name: [u8; 11],
    /// 0x0B
    pub attributes: u8,
    /// 0x0C
    pub nt_flags: u8,
    /// 0x0D: tenths of a second, 0-199.
    pub created_tenths: u8,
    /// 0x0E
    pub created_time: U16<LittleEndian>,
    /// 0x10
    pub created_date: U16<LittleEndian>,
    /// 0x12
    pub accessed_date: U16<LittleEndian>,
    /// 0x14: high 16 bits of the first cluster, FAT32 only.
    pub cluster_high: U16<LittleEndian>,
    /// 0x16
    pub modified_time: U16<LittleEndian>,
    /// 0x18
    pub modified_date: U16<LittleEndian>,
    /// 0x1A
    pub cluster_low: U16<LittleEndian>,
    /// 0x1C
    pub size: U32<LittleEndian>,
}

impl RawDirEntry {
    pub fn new(name: ShortName, attributes: Attributes, first_cluster: Cluster, size: u32) -> Self {
        let mut entry = Self::new_zeroed();
        entry.name = name.0;
        entry.attributes = attributes.bits();
        entry.cluster_high.set((first_cluster.0 >> 16) as u16);
        entry.cluster_low.set(first_cluster.0 as u16);
        entry.size.set(size);
        entry
    }

    pub fn short_name(&self) -> ShortName {
        let mut name = self.name;
        if name[0] == KANJI_E5 {
            name[0] = DELETED_ENTRY;
        }
        ShortName(name)
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_truncate(self.attributes)
    }

    pub fn first_cluster(&self, variant: FatVariant) -> Cluster {
        let low = u32::from(self.cluster_low.get());
        if variant.has_high_cluster_bits() {
            Cluster((u32::from(self.cluster_high.get()) << 16) | low)
        } else {
            Cluster(low)
        }
    }

    /// The 8.3 name as text, honouring the NT lowercase flags.
    fn display_name(&self) -> String {
        let short = self.short_name();
        let mut name = String::new();
        let lower_base = self.nt_flags & NT_LOWERCASE_BASE != 0;
        let lower_ext = self.nt_flags & NT_LOWERCASE_EXT != 0;
        for &b in short.base() {
            name.push(char::from(if lower_base { b.to_ascii_lowercase() } else { b }));
        }
        if !short.extension().is_empty() {
            name.push('.');
            for &b in short.extension() {
                name.push(char::from(if lower_ext { b.to_ascii_lowercase() } else { b }));
            }
        }
        name
    }
}

/// Long file name entry. Up to 20 of these precede the short entry they
/// belong to, in reverse order: the entry with the highest sequence number
/// (flagged with [`RawLfnEntry::LAST`]) comes first on disk.
#[derive(Debug, Clone, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct RawLfnEntry {
    /// 0x00: sequence number, 1-based, in the low 5 bits.
    pub order: u8,
    /// 0x01
    pub name1: [U16<LittleEndian>; 5],
    /// 0x0B: always `Attributes::LONG_NAME`.
    pub attributes: u8,
    /// 0x0C
    pub kind: u8,
    /// 0x0D: checksum of the short name this entry belongs to.
    pub checksum: u8,
    /// 0x0E
    pub name2: [U16<LittleEndian>; 6],
    /// 0x1A: always zero.
    pub first_cluster: U16<LittleEndian>,
    /// 0x1C
    pub name3: [U16<LittleEndian>; 2],
}

impl RawLfnEntry {
    pub const LAST: u8 = 0x40;
    pub const SEQUENCE_MASK: u8 = 0x1F;

    pub fn new(sequence: u8, last: bool, checksum: u8, chars: &[u16; LFN_CHARS_PER_ENTRY]) -> Self {
        let mut entry = Self::new_zeroed();
        entry.order = sequence | if last { Self::LAST } else { 0 };
        entry.attributes = Attributes::LONG_NAME.bits();
        entry.checksum = checksum;
        let slots = entry
            .name1
            .iter_mut()
            .chain(entry.name2.iter_mut())
            .chain(entry.name3.iter_mut());
        for (slot, &c) in slots.zip(chars) {
            slot.set(c);
        }
        entry
    }

    pub fn sequence(&self) -> u8 {
        self.order & Self::SEQUENCE_MASK
    }

    pub fn is_last(&self) -> bool {
        self.order & Self::LAST != 0
    }

    pub fn chars(&self) -> impl Iterator<Item = u16> + '_ {
        self.name1
            .iter()
            .chain(self.name2.iter())
            .chain(self.name3.iter())
            .map(|c| c.get())
    }
}

/// Builds the on-disk entries for a file with a long name: the long name
/// entries in disk order followed by the short entry. Used when preparing
/// images.
pub fn long_name_entries(long_name: &str, short: &RawDirEntry) -> Vec<[u8; DIR_ENTRY_SIZE]> {
    let checksum = short.short_name().checksum();
    let chunks = crate::long_name_chunks(long_name);
    let count = chunks.len();
    let mut entries: Vec<[u8; DIR_ENTRY_SIZE]> = chunks
        .iter()
        .enumerate()
        .rev()
        .map(|(i, chunk)| {
            let entry = RawLfnEntry::new(i as u8 + 1, i + 1 == count, checksum, chunk);
            let mut bytes = [0; DIR_ENTRY_SIZE];
            bytes.copy_from_slice(entry.as_bytes());
            bytes
        })
        .collect();
    let mut bytes = [0; DIR_ENTRY_SIZE];
    bytes.copy_from_slice(short.as_bytes());
    entries.push(bytes);
    entries
}

/// A date and time as stored in directory entries, in local time with two
/// second resolution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Timestamp {
    pub fn from_fat(date: u16, time: u16) -> Self {
        Self {
            year: 1980 + (date >> 9),
            month: ((date >> 5) & 0x0F) as u8,
            day: (date & 0x1F) as u8,
            hour: (time >> 11) as u8,
            minute: ((time >> 5) & 0x3F) as u8,
            second: ((time & 0x1F) * 2) as u8,
        }
    }

    pub fn from_fat_date(date: u16) -> Self {
        Self::from_fat(date, 0)
    }

    /// Inverse of [`Timestamp::from_fat`]. Returns `(date, time)`.
    pub fn to_fat(self) -> (u16, u16) {
        let date = (self.year.saturating_sub(1980) << 9)
            | (u16::from(self.month) << 5)
            | u16::from(self.day);
        let time = (u16::from(self.hour) << 11)
            | (u16::from(self.minute) << 5)
            | u16::from(self.second / 2);
        (date, time)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// A decoded directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// The long name if a valid one precedes the entry, otherwise the 8.3
    /// name.
    pub name: String,
    pub short_name: ShortName,
    pub attributes: Attributes,
    pub first_cluster: Cluster,
    pub size: u32,
    pub created: Timestamp,
    pub modified: Timestamp,
    pub accessed: Timestamp,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.attributes.contains(Attributes::DIRECTORY)
    }

    /// `.` and `..` entries present in every subdirectory.
    pub fn is_dot_entry(&self) -> bool {
        matches!(&self.short_name.0, b".          " | b"..         ")
    }

    /// Case-insensitive comparison against both the long and short name.
    pub fn name_matches(&self, name: &str) -> bool {
        eq_ignore_case(&self.name, name) || eq_ignore_case(&self.short_name.to_string(), name)
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Iterates over the live entries of a directory's bytes, skipping deleted
/// entries, long name entries (which are folded into the short entry they
/// describe) and volume labels. Iteration stops at the first end marker.
pub struct DirectoryIter<'a> {
    bytes: &'a [u8],
    variant: FatVariant,
    index: usize,
}

impl<'a> DirectoryIter<'a> {
    pub fn new(bytes: &'a [u8], variant: FatVariant) -> Self {
        Self {
            bytes,
            variant,
            index: 0,
        }
    }

    fn raw(&self, index: usize) -> Option<&'a [u8]> {
        self.bytes
            .get(index * DIR_ENTRY_SIZE..(index + 1) * DIR_ENTRY_SIZE)
    }

    /// Reconstructs the long name of the short entry at `index` by walking
    /// back over the long name entries before it. Any gap in the sequence or
    /// checksum mismatch discards the long name.
    fn long_name(&self, index: usize, short: &RawDirEntry) -> Option<String> {
        let checksum = short.short_name().checksum();
        let mut units: Vec<u16> = Vec::new();
        let mut expected = 1;
        let mut i = index;
        loop {
            i = i.checked_sub(1)?;
            let lfn = RawLfnEntry::read_from(self.raw(i)?)?;
            if !Attributes::is_long_name(lfn.attributes)
                || lfn.order == DELETED_ENTRY
                || lfn.sequence() != expected
                || lfn.checksum != checksum
            {
                return None;
            }
            units.extend(lfn.chars());
            if lfn.is_last() {
                break;
            }
            expected += 1;
            if usize::from(expected) * LFN_CHARS_PER_ENTRY > crate::LFN_MAX_CHARS + LFN_CHARS_PER_ENTRY {
                return None;
            }
        }

        let end = units.iter().position(|&c| c == 0).unwrap_or(units.len());
        let name: String = char::decode_utf16(units[..end].iter().copied())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();
        (!name.is_empty()).then_some(name)
    }
}

impl Iterator for DirectoryIter<'_> {
    type Item = DirEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let index = self.index;
            let raw = RawDirEntry::read_from(self.raw(index)?)?;
            if raw.name[0] == END_OF_DIRECTORY {
                // Stay on the end marker so the iterator is fused.
                return None;
            }
            self.index += 1;

            if raw.name[0] == DELETED_ENTRY || Attributes::is_long_name(raw.attributes) {
                continue;
            }
            let attributes = raw.attributes();
            if attributes.contains(Attributes::VOLUME_ID) {
                continue;
            }

            let name = self
                .long_name(index, &raw)
                .unwrap_or_else(|| raw.display_name());
            let created = Timestamp::from_fat(raw.created_date.get(), raw.created_time.get());
            return Some(DirEntry {
                name,
                short_name: raw.short_name(),
                attributes,
                first_cluster: raw.first_cluster(self.variant),
                size: raw.size.get(),
                created: Timestamp {
                    second: created.second + raw.created_tenths / 100,
                    ..created
                },
                modified: Timestamp::from_fat(raw.modified_date.get(), raw.modified_time.get()),
                accessed: Timestamp::from_fat_date(raw.accessed_date.get()),
            });
        }
    }
}

/// Finds the volume label entry of a root directory, if it has one.
pub fn volume_label(bytes: &[u8]) -> Option<String> {
    bytes
        .chunks_exact(DIR_ENTRY_SIZE)
        .map_while(|chunk| RawDirEntry::read_from(chunk).filter(|e| e.name[0] != END_OF_DIRECTORY))
        .find(|e| {
            e.name[0] != DELETED_ENTRY
                && !Attributes::is_long_name(e.attributes)
                && e.attributes().contains(Attributes::VOLUME_ID)
        })
        .map(|e| crate::trim_padded(&e.name).to_string())
}
