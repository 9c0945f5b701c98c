//! MBR and extended (EBR) partition tables.
//!
//! # Resources
//!
//! - <https://en.wikipedia.org/wiki/Master_boot_record>
//! - <https://en.wikipedia.org/wiki/Extended_boot_record>
//! - <https://en.wikipedia.org/wiki/Partition_type>

use core::fmt;

use alloc::vec::Vec;

use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::block::{BlockDevice, IoError, Sector, SECTOR_SIZE};

const BOOT_SIGNATURE_OFFSET: usize = 510;
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const TABLE_OFFSET: usize = 0x1BE;

const MBR_RECORDS: usize = 4;
const EBR_RECORDS: usize = 2;

const TYPE_EMPTY: u8 = 0x00;
const TYPE_EXTENDED: u8 = 0x05;
const TYPE_EXTENDED_LBA: u8 = 0x0F;

const STATUS_ACTIVE: u8 = 0x80;

/// A 16 byte partition table record.
#[derive(Debug, Clone, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct PartitionRecord {
    /// 0x00: 0x80 marks the active (bootable) partition.
    pub status: u8,
    /// 0x01
    pub first_chs: [u8; 3],
    /// 0x04
    pub kind: u8,
    /// 0x05
    pub last_chs: [u8; 3],
    /// 0x08
    pub first_lba: U32<LittleEndian>,
    /// 0x0C
    pub sector_count: U32<LittleEndian>,
}

impl PartitionRecord {
    pub const SIZE: usize = 16;

    fn is_extended(&self) -> bool {
        matches!(self.kind, TYPE_EXTENDED | TYPE_EXTENDED_LBA)
    }
}

/// A primary or logical partition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Partition {
    pub start_sector: u64,
    pub size_sectors: u64,
    pub kind: u8,
    pub active: bool,
    pub primary: bool,
}

impl Partition {
    pub fn type_name(&self) -> &'static str {
        partition_type_name(self.kind)
    }

    pub fn human_size(&self) -> HumanSize {
        HumanSize(self.size_sectors)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("failed to read partition table: {0}")]
    Io(#[from] IoError),
    #[error("invalid partition table, sector {sector} has no boot signature")]
    MissingSignature { sector: u64 },
    #[error("extended partition chain loops back to sector {sector}")]
    Loop { sector: u64 },
}

/// Whether the MBR in `sector` looks like a real partition table: signed,
/// status bytes of 0x00 or 0x80, and at least one non-empty record that
/// starts past sector 0 and fits on a disk of `sector_count` sectors.
///
/// FAT boot code of a superfloppy overlaps the table area, so a FAT boot
/// sector only counts as an MBR when this holds.
pub fn mbr_table_is_valid(sector: &Sector, sector_count: Option<u64>) -> bool {
    if sector[BOOT_SIGNATURE_OFFSET..] != BOOT_SIGNATURE {
        return false;
    }
    let mut used = 0;
    let records = sector[TABLE_OFFSET..]
        .chunks_exact(PartitionRecord::SIZE)
        .take(MBR_RECORDS)
        .filter_map(PartitionRecord::read_from);
    for record in records {
        if record.status & !STATUS_ACTIVE != 0 {
            return false;
        }
        if record.kind == TYPE_EMPTY {
            continue;
        }
        let first = u64::from(record.first_lba.get());
        let end = first + u64::from(record.sector_count.get());
        if first == 0 || end == first || sector_count.is_some_and(|count| end > count) {
            return false;
        }
        used += 1;
    }
    used > 0
}

/// Reads the MBR and the chain of EBRs behind its extended partition, and
/// returns at most `capacity` partitions in table order.
///
/// Start sectors of logical partitions and of further EBRs are relative to
/// the first EBR. Empty MBR records are skipped, while an empty EBR record ends
/// the chain.
pub fn read_partitions(
    device: &dyn BlockDevice,
    capacity: usize,
) -> Result<Vec<Partition>, PartitionError> {
    let mut sector: Sector = [0; SECTOR_SIZE];
    let mut partitions = Vec::new();
    let mut lba = 0;
    let mut first_ebr: Option<u64> = None;
    let mut visited: Vec<u64> = Vec::new();

    loop {
        device.read_sector(lba, &mut sector)?;
        if sector[BOOT_SIGNATURE_OFFSET..] != BOOT_SIGNATURE {
            return Err(PartitionError::MissingSignature { sector: lba });
        }

        let is_mbr = first_ebr.is_none();
        let base = first_ebr.unwrap_or(0);
        let num_records = if is_mbr { MBR_RECORDS } else { EBR_RECORDS };

        let mut next_ebr = None;
        let records = sector[TABLE_OFFSET..]
            .chunks_exact(PartitionRecord::SIZE)
            .take(num_records)
            .filter_map(PartitionRecord::read_from);
        for record in records {
            if record.kind == TYPE_EMPTY {
                if is_mbr {
                    continue;
                }
                break;
            }

            if record.is_extended() {
                next_ebr = Some(base + u64::from(record.first_lba.get()));
                continue;
            }

            if partitions.len() == capacity {
                break;
            }
            partitions.push(Partition {
                start_sector: base + u64::from(record.first_lba.get()),
                size_sectors: u64::from(record.sector_count.get()),
                kind: record.kind,
                active: record.status & STATUS_ACTIVE != 0,
                primary: is_mbr,
            });
        }

        if partitions.len() >= capacity {
            break;
        }
        let Some(next) = next_ebr else {
            break;
        };
        if next == 0 || visited.contains(&next) {
            return Err(PartitionError::Loop { sector: next });
        }
        visited.push(next);
        first_ebr.get_or_insert(next);
        lba = next;
    }

    log::debug!("found {} partitions", partitions.len());
    Ok(partitions)
}

pub fn partition_type_name(kind: u8) -> &'static str {
    match kind {
        0x00 => "empty",
        0x01 => "fat12",
        0x04 => "fat16 (<32mb)",
        0x05 => "extended (chs)",
        0x06 => "fat16",
        0x07 => "ntfs/exfat",
        0x0B => "fat32 (chs)",
        0x0C => "fat32 (lba)",
        0x0E => "fat16 (lba)",
        0x0F => "extended (lba)",
        0x11 => "hidden fat12",
        0x14 => "hidden fat16 (<32mb)",
        0x16 => "hidden fat16",
        0x17 => "hidden ntfs/exfat",
        0x1B => "hidden fat32 (chs)",
        0x1C => "hidden fat32 (lba)",
        0x1E => "hidden fat16 (lba)",
        0x27 => "windows recovery",
        0x42 => "windows dynamic",
        0x63 => "unix system v",
        0x7F => "alt os development",
        0x82 => "linux swap",
        0x83 => "linux",
        0x85 => "linux extended",
        0x8E => "linux lvm",
        0xA5 => "freebsd",
        0xA6 => "openbsd",
        0xA8 => "mac os x ufs",
        0xA9 => "netbsd",
        0xAB => "mac os x boot",
        0xAF => "mac os x hfs+",
        0xBE => "solaris boot",
        0xBF => "solaris",
        0xEE => "gpt protective mbr",
        0xEF => "efi system",
        0xFB => "vmware vmfs",
        0xFD => "linux raid",
        _ => "unknown",
    }
}

/// A size in 512 byte sectors, displayed with a binary unit suffix.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HumanSize(pub u64);

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SUFFIXES: [&str; 5] = ["kb", "mb", "gb", "tb", "pb"];

        let mut size = self.0 as f64 / 2.0;
        let mut unit = 0;
        while size > 1024.0 && unit + 1 < SUFFIXES.len() {
            size /= 1024.0;
            unit += 1;
        }
        write!(f, "{size:.1} {}", SUFFIXES[unit])
    }
}

/// Formats partitions like the boot-time partition table printout.
pub struct PartitionTable<'a>(pub &'a [Partition]);

impl fmt::Display for PartitionTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Partition table")?;
        writeln!(f, "---------------")?;
        for (i, part) in self.0.iter().enumerate() {
            writeln!(
                f,
                "{i}{} ({}) {:<20} start: {:<10} size: {:<10} [{}]",
                if part.active { '*' } else { ' ' },
                if part.primary { "pri" } else { "log" },
                part.type_name(),
                part.start_sector,
                part.size_sectors,
                part.human_size(),
            )?;
        }
        writeln!(f, "---------------")
    }
}
