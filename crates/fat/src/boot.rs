use core::fmt;

use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::{trim_padded, Cluster};

/// FAT volumes are only supported on devices with 512 byte sectors.
pub const SECTOR_SIZE: usize = 512;

/// Size of a single directory entry (short or long name) on disk.
pub const DIR_ENTRY_SIZE: usize = 32;

/// The BIOS parameter block is the first part of the boot sector. It is shared
/// by every FAT variant and is always followed by either [`ExtendedBpb16`] or
/// [`ExtendedBpb32`].
///
/// All multi-byte fields are little-endian and the struct has an alignment of
/// 1, so it can be read from any offset of a sector buffer.
#[derive(Debug, Clone, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct BiosParameterBlock {
    /// 0x00: short jump over the BPB (`EB xx 90`).
    pub jmp_boot: [u8; 3],
    /// 0x03
    pub oem_name: [u8; 8],
    /// 0x0B
    pub bytes_per_sector: U16<LittleEndian>,
    /// 0x0D
    pub sectors_per_cluster: u8,
    /// 0x0E: sectors before the first FAT, including the boot sector.
    pub reserved_sectors: U16<LittleEndian>,
    /// 0x10
    pub fat_count: u8,
    /// 0x11: zero on FAT32, where the root directory is a cluster chain.
    pub root_dir_entries: U16<LittleEndian>,
    /// 0x13: zero if the count doesn't fit, see `total_sectors_large`.
    pub total_sectors: U16<LittleEndian>,
    /// 0x15
    pub media_descriptor: u8,
    /// 0x16: zero on FAT32, see [`ExtendedBpb32::sectors_per_fat`].
    pub sectors_per_fat: U16<LittleEndian>,
    /// 0x18
    pub sectors_per_track: U16<LittleEndian>,
    /// 0x1A
    pub head_count: U16<LittleEndian>,
    /// 0x1C
    pub hidden_sectors: U32<LittleEndian>,
    /// 0x20
    pub total_sectors_large: U32<LittleEndian>,
}

impl BiosParameterBlock {
    pub const OFFSET: usize = 0;
    pub const SIZE: usize = 36;
}

/// Extended BPB used by FAT12 and FAT16 volumes, located right after the
/// [`BiosParameterBlock`].
#[derive(Debug, Clone, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct ExtendedBpb16 {
    /// 0x24
    pub drive_number: u8,
    /// 0x25
    pub nt_flags: u8,
    /// 0x26: 0x29 if the following three fields are valid.
    pub signature: u8,
    /// 0x27
    pub volume_id: U32<LittleEndian>,
    /// 0x2B
    pub volume_label: [u8; 11],
    /// 0x36
    pub system_id: [u8; 8],
}

/// Extended BPB used by FAT32 volumes, located right after the
/// [`BiosParameterBlock`].
#[derive(Debug, Clone, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
pub struct ExtendedBpb32 {
    /// 0x24
    pub sectors_per_fat: U32<LittleEndian>,
    /// 0x28
    pub flags: U16<LittleEndian>,
    /// 0x2A
    pub version: U16<LittleEndian>,
    /// 0x2C: first cluster of the root directory.
    pub root_cluster: U32<LittleEndian>,
    /// 0x30
    pub fsinfo_sector: U16<LittleEndian>,
    /// 0x32
    pub backup_boot_sector: U16<LittleEndian>,
    /// 0x34
    pub reserved: [u8; 12],
    /// 0x40
    pub drive_number: u8,
    /// 0x41
    pub nt_flags: u8,
    /// 0x42
    pub signature: u8,
    /// 0x43
    pub volume_id: U32<LittleEndian>,
    /// 0x47
    pub volume_label: [u8; 11],
    /// 0x52
    pub system_id: [u8; 8],
}

impl ExtendedBpb16 {
    pub const SIZE: usize = 26;
}

impl ExtendedBpb32 {
    pub const SIZE: usize = 54;
}

/// Value of [`ExtendedBpb16::signature`] / [`ExtendedBpb32::signature`] when the
/// volume id, label and system id fields are present.
pub const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;

#[derive(Debug, Clone)]
pub enum ExtendedBpb {
    Fat16(ExtendedBpb16),
    Fat32(ExtendedBpb32),
}

/// A parsed FAT boot sector.
#[derive(Debug, Clone)]
pub struct BootSector {
    pub bpb: BiosParameterBlock,
    pub extended: ExtendedBpb,
}

impl BootSector {
    pub const JUMP_OPCODE: u8 = 0xEB;
    pub const NOP_OPCODE: u8 = 0x90;

    /// Parses the boot sector at the start of a volume. Returns `None` when the
    /// sector doesn't start with the short jump FAT boot sectors carry, which
    /// means the volume is not FAT (or the buffer is too short to tell).
    pub fn parse(sector: &[u8]) -> Option<Self> {
        let bpb = BiosParameterBlock::read_from_prefix(sector)?;
        if bpb.jmp_boot[0] != Self::JUMP_OPCODE || bpb.jmp_boot[2] != Self::NOP_OPCODE {
            return None;
        }

        let extended_bytes = sector.get(BiosParameterBlock::SIZE..)?;

        // FAT32 is the only layout that moves the FAT size into the extended
        // BPB, so a zero 16-bit FAT size tells the layouts apart.
        let extended = if bpb.sectors_per_fat.get() == 0 {
            ExtendedBpb::Fat32(ExtendedBpb32::read_from_prefix(extended_bytes)?)
        } else {
            ExtendedBpb::Fat16(ExtendedBpb16::read_from_prefix(extended_bytes)?)
        };

        Some(Self { bpb, extended })
    }

    pub fn total_sectors(&self) -> u32 {
        match self.bpb.total_sectors.get() {
            0 => self.bpb.total_sectors_large.get(),
            n => u32::from(n),
        }
    }

    pub fn sectors_per_fat(&self) -> u32 {
        match &self.extended {
            ExtendedBpb::Fat16(_) => u32::from(self.bpb.sectors_per_fat.get()),
            ExtendedBpb::Fat32(ext) => ext.sectors_per_fat.get(),
        }
    }

    pub fn oem_name(&self) -> &str {
        trim_padded(&self.bpb.oem_name)
    }

    /// The volume label stored in the extended BPB, if there is one. Newer
    /// formatters store the label as a volume-id directory entry instead and
    /// leave "NO NAME" here.
    pub fn volume_label(&self) -> Option<&str> {
        let (signature, label) = match &self.extended {
            ExtendedBpb::Fat16(ext) => (ext.signature, &ext.volume_label),
            ExtendedBpb::Fat32(ext) => (ext.signature, &ext.volume_label),
        };
        if signature != EXTENDED_BOOT_SIGNATURE {
            return None;
        }
        match trim_padded(label) {
            "" | "NO NAME" => None,
            label => Some(label),
        }
    }

    /// Derives the volume geometry: where the FATs, root directory and data
    /// region live, and how many clusters there are.
    pub fn geometry(&self) -> Result<Geometry, FormatError> {
        let bpb = &self.bpb;

        let bytes_per_sector = bpb.bytes_per_sector.get();
        if usize::from(bytes_per_sector) != SECTOR_SIZE {
            return Err(FormatError::UnsupportedSectorSize(bytes_per_sector));
        }
        let sectors_per_cluster = bpb.sectors_per_cluster;
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(FormatError::InvalidClusterSize(sectors_per_cluster));
        }
        if bpb.fat_count == 0 {
            return Err(FormatError::NoFats);
        }
        let sectors_per_fat = self.sectors_per_fat();
        if sectors_per_fat == 0 {
            return Err(FormatError::ZeroFatSize);
        }

        let sector_size = SECTOR_SIZE as u32;
        let root_dir_entries = u32::from(bpb.root_dir_entries.get());
        let root_dir_sectors =
            (root_dir_entries * DIR_ENTRY_SIZE as u32).div_ceil(sector_size);

        let first_fat_sector = u32::from(bpb.reserved_sectors.get());
        let first_root_dir_sector = u64::from(first_fat_sector)
            + u64::from(bpb.fat_count) * u64::from(sectors_per_fat);
        let first_data_sector = first_root_dir_sector + u64::from(root_dir_sectors);

        let total_sectors = self.total_sectors();
        if first_data_sector >= u64::from(total_sectors) {
            return Err(FormatError::VolumeTooSmall {
                total_sectors,
                first_data_sector,
            });
        }
        // Both fit in u32 now that they are below total_sectors.
        let first_root_dir_sector = first_root_dir_sector as u32;
        let first_data_sector = first_data_sector as u32;

        let data_sectors = total_sectors - first_data_sector;
        let cluster_count = data_sectors / u32::from(sectors_per_cluster);
        let variant = FatVariant::from_cluster_count(cluster_count);

        let root_cluster = match (variant, &self.extended) {
            (FatVariant::Fat12 | FatVariant::Fat16, _) => None,
            (FatVariant::Fat32 | FatVariant::ExFat, ExtendedBpb::Fat32(ext)) => {
                let root = ext.root_cluster.get();
                if root < Cluster::FIRST.0 || root > cluster_count + 1 {
                    return Err(FormatError::InvalidRootCluster(root));
                }
                Some(Cluster(root))
            }
            (FatVariant::Fat32 | FatVariant::ExFat, ExtendedBpb::Fat16(_)) => {
                return Err(FormatError::MissingRootCluster(variant));
            }
        };

        let cluster_shift = (SECTOR_SIZE as u32 * u32::from(sectors_per_cluster)).ilog2();

        Ok(Geometry {
            variant,
            sectors_per_cluster: u32::from(sectors_per_cluster),
            cluster_shift,
            total_sectors,
            fat_count: u32::from(bpb.fat_count),
            sectors_per_fat,
            first_fat_sector,
            root_dir_entries,
            root_dir_sectors,
            first_root_dir_sector,
            first_data_sector,
            data_sectors,
            cluster_count,
            root_cluster,
        })
    }
}

/// Reasons a boot sector that looks like FAT can't be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("unsupported sector size {0} (only 512 byte sectors are supported)")]
    UnsupportedSectorSize(u16),
    #[error("sectors per cluster must be a non-zero power of two, got {0}")]
    InvalidClusterSize(u8),
    #[error("boot sector declares zero FATs")]
    NoFats,
    #[error("boot sector declares a zero sized FAT")]
    ZeroFatSize,
    #[error("volume has {total_sectors} sectors but data starts at sector {first_data_sector}")]
    VolumeTooSmall {
        total_sectors: u32,
        first_data_sector: u64,
    },
    #[error("{0} volume has no FAT32 extended boot record to locate the root directory")]
    MissingRootCluster(FatVariant),
    #[error("root directory cluster {0} is outside the data region")]
    InvalidRootCluster(u32),
}

/// The FAT variant, which is a function of the number of clusters and nothing
/// else. The thresholds are the ones Microsoft's FAT documentation uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FatVariant {
    Fat12,
    Fat16,
    Fat32,
    ExFat,
}

impl FatVariant {
    /// Volumes with fewer clusters than this are FAT12.
    pub const FAT16_MIN_CLUSTERS: u32 = 4085;
    /// Volumes with fewer clusters than this (and at least
    /// `FAT16_MIN_CLUSTERS`) are FAT16.
    pub const FAT32_MIN_CLUSTERS: u32 = 65525;
    /// Volumes with at least this many clusters are classified as exFAT.
    pub const EXFAT_MIN_CLUSTERS: u32 = 268_435_445;

    pub fn from_cluster_count(cluster_count: u32) -> Self {
        if cluster_count < Self::FAT16_MIN_CLUSTERS {
            Self::Fat12
        } else if cluster_count < Self::FAT32_MIN_CLUSTERS {
            Self::Fat16
        } else if cluster_count < Self::EXFAT_MIN_CLUSTERS {
            Self::Fat32
        } else {
            Self::ExFat
        }
    }

    /// Width of a single FAT entry in bits.
    pub fn entry_bits(self) -> u32 {
        match self {
            Self::Fat12 => 12,
            Self::Fat16 => 16,
            Self::Fat32 | Self::ExFat => 32,
        }
    }

    /// Entry values at or above this mark the end of a cluster chain.
    pub fn end_of_chain(self) -> u32 {
        match self {
            Self::Fat12 => 0xFF8,
            Self::Fat16 => 0xFFF8,
            Self::Fat32 => 0x0FFF_FFF8,
            Self::ExFat => 0xFFFF_FFF8,
        }
    }

    /// Entry value marking a cluster with bad sectors.
    pub fn bad_cluster(self) -> u32 {
        self.end_of_chain() - 1
    }

    /// Bits of an entry that are significant. FAT32 entries are really 28
    /// bits wide, the top nibble is reserved.
    pub fn entry_mask(self) -> u32 {
        match self {
            Self::Fat12 => 0xFFF,
            Self::Fat16 => 0xFFFF,
            Self::Fat32 => 0x0FFF_FFFF,
            Self::ExFat => 0xFFFF_FFFF,
        }
    }

    /// Whether directory entries carry the high 16 bits of the first cluster.
    pub fn has_high_cluster_bits(self) -> bool {
        matches!(self, Self::Fat32 | Self::ExFat)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Fat12 => "fat12",
            Self::Fat16 => "fat16",
            Self::Fat32 => "fat32",
            Self::ExFat => "exfat",
        }
    }
}

impl fmt::Display for FatVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Layout of a FAT volume, in sectors relative to the start of the volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Geometry {
    pub variant: FatVariant,
    pub sectors_per_cluster: u32,
    /// `log2` of the cluster size in bytes. Byte offsets are turned into
    /// cluster indices with a shift instead of a division.
    pub cluster_shift: u32,
    pub total_sectors: u32,
    pub fat_count: u32,
    pub sectors_per_fat: u32,
    pub first_fat_sector: u32,
    pub root_dir_entries: u32,
    pub root_dir_sectors: u32,
    pub first_root_dir_sector: u32,
    /// Invariant: `first_fat_sector + fat_count * sectors_per_fat +
    /// root_dir_sectors`.
    pub first_data_sector: u32,
    pub data_sectors: u32,
    pub cluster_count: u32,
    /// Start of the root directory chain on FAT32. `None` means the root
    /// directory is the fixed region at `first_root_dir_sector`.
    pub root_cluster: Option<Cluster>,
}

impl Geometry {
    pub fn cluster_bytes(&self) -> usize {
        1 << self.cluster_shift
    }

    pub fn fat_bytes(&self) -> usize {
        self.sectors_per_fat as usize * SECTOR_SIZE
    }

    /// Highest valid cluster number. Cluster numbering starts at 2.
    pub fn max_cluster(&self) -> u32 {
        self.cluster_count + 1
    }

    pub fn is_valid_cluster(&self, cluster: Cluster) -> bool {
        cluster.0 >= Cluster::FIRST.0 && cluster.0 <= self.max_cluster()
    }

    /// First sector of the given cluster, relative to the volume start.
    pub fn cluster_sector(&self, cluster: Cluster) -> Option<u32> {
        if !self.is_valid_cluster(cluster) {
            return None;
        }
        Some(self.first_data_sector + (cluster.0 - Cluster::FIRST.0) * self.sectors_per_cluster)
    }

    /// Index of the cluster (within a chain) holding the given byte offset.
    pub fn cluster_index(&self, byte_offset: u64) -> u64 {
        byte_offset >> self.cluster_shift
    }

    /// Offset of a byte within its cluster.
    pub fn offset_in_cluster(&self, byte_offset: u64) -> usize {
        (byte_offset & (self.cluster_bytes() as u64 - 1)) as usize
    }
}
