use alloc::vec::Vec;

use crate::FatVariant;

/// A cluster number. Cluster 0 and 1 are reserved, data clusters start at
/// [`Cluster::FIRST`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cluster(pub u32);

impl Cluster {
    pub const FIRST: Self = Self(2);
}

/// Interpretation of a single FAT entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FatEntry {
    Free,
    /// The chain continues at the given cluster.
    Next(Cluster),
    Bad,
    EndOfChain,
    /// Reserved values, and links to cluster 1 or past the last cluster.
    Reserved(u32),
}

/// An in-memory copy of a file allocation table.
///
/// The table is stored as the raw bytes from disk. FAT12 entries are packed
/// 1.5 bytes each, so entry `n` starts at byte `n + n / 2`: even entries take
/// the low 12 bits of the little-endian word found there, odd entries the
/// high 12 bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatTable {
    variant: FatVariant,
    bytes: Vec<u8>,
    cluster_count: u32,
}

impl FatTable {
    /// Wraps the bytes of one FAT. `cluster_count` is the number of data
    /// clusters on the volume; entries past it are ignored.
    pub fn new(variant: FatVariant, bytes: Vec<u8>, cluster_count: u32) -> Self {
        Self {
            variant,
            bytes,
            cluster_count,
        }
    }

    /// Builds a zeroed table large enough for `cluster_count` clusters, with
    /// the two reserved entries set like a formatter would.
    pub fn empty(variant: FatVariant, cluster_count: u32) -> Self {
        let entries = cluster_count as usize + 2;
        let len = match variant {
            FatVariant::Fat12 => (entries * 3).div_ceil(2),
            FatVariant::Fat16 => entries * 2,
            FatVariant::Fat32 | FatVariant::ExFat => entries * 4,
        };
        let mut table = Self::new(variant, alloc::vec![0; len], cluster_count);
        table.set_raw_entry(0, variant.entry_mask() & 0xFFFF_FFF8);
        table.set_raw_entry(1, variant.entry_mask());
        table
    }

    pub fn variant(&self) -> FatVariant {
        self.variant
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    /// Number of entries present in the table bytes.
    pub fn len(&self) -> u32 {
        let len = self.bytes.len();
        let entries = match self.variant {
            FatVariant::Fat12 => len * 2 / 3,
            FatVariant::Fat16 => len / 2,
            FatVariant::Fat32 | FatVariant::ExFat => len / 4,
        };
        u32::try_from(entries).unwrap_or(u32::MAX)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn word16(&self, offset: usize) -> Option<u16> {
        let bytes = self.bytes.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// The raw value of entry `index`, masked to the width of the variant, or
    /// `None` if the table is too short to hold it.
    pub fn raw_entry(&self, index: u32) -> Option<u32> {
        let i = index as usize;
        match self.variant {
            FatVariant::Fat12 => {
                let word = self.word16(i + i / 2)?;
                let value = if i & 1 == 1 { word >> 4 } else { word & 0xFFF };
                Some(u32::from(value))
            }
            FatVariant::Fat16 => self.word16(i * 2).map(u32::from),
            FatVariant::Fat32 | FatVariant::ExFat => {
                let bytes = self.bytes.get(i * 4..i * 4 + 4)?;
                let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                Some(value & self.variant.entry_mask())
            }
        }
    }

    /// Overwrites entry `index`. FAT12 neighbours sharing a byte and the
    /// reserved top nibble of FAT32 entries are preserved. Out of range
    /// indices are ignored.
    pub fn set_raw_entry(&mut self, index: u32, value: u32) {
        let i = index as usize;
        let value = value & self.variant.entry_mask();
        match self.variant {
            FatVariant::Fat12 => {
                let offset = i + i / 2;
                let Some(word) = self.word16(offset) else {
                    return;
                };
                let value = value as u16;
                let word = if i & 1 == 1 {
                    (word & 0x000F) | (value << 4)
                } else {
                    (word & 0xF000) | value
                };
                self.bytes[offset..offset + 2].copy_from_slice(&word.to_le_bytes());
            }
            FatVariant::Fat16 => {
                if let Some(bytes) = self.bytes.get_mut(i * 2..i * 2 + 2) {
                    bytes.copy_from_slice(&(value as u16).to_le_bytes());
                }
            }
            FatVariant::Fat32 | FatVariant::ExFat => {
                if let Some(bytes) = self.bytes.get_mut(i * 4..i * 4 + 4) {
                    let old = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                    let new = (old & !self.variant.entry_mask()) | value;
                    bytes.copy_from_slice(&new.to_le_bytes());
                }
            }
        }
    }

    /// Decodes the entry for `cluster`.
    pub fn entry(&self, cluster: Cluster) -> Option<FatEntry> {
        let raw = self.raw_entry(cluster.0)?;
        Some(self.classify(raw))
    }

    fn classify(&self, raw: u32) -> FatEntry {
        let end_of_chain = self.variant.end_of_chain();
        if raw == 0 {
            FatEntry::Free
        } else if raw >= end_of_chain {
            FatEntry::EndOfChain
        } else if raw == self.variant.bad_cluster() {
            FatEntry::Bad
        } else if raw >= Cluster::FIRST.0 && raw <= self.cluster_count + 1 {
            FatEntry::Next(Cluster(raw))
        } else {
            FatEntry::Reserved(raw)
        }
    }

    /// The cluster following `cluster` in its chain, or `None` at the end of
    /// the chain. Bad, free and out of range links also end the chain so a
    /// corrupt table can't send a reader off the end of the volume.
    pub fn next_cluster(&self, cluster: Cluster) -> Option<Cluster> {
        match self.entry(cluster)? {
            FatEntry::Next(next) => Some(next),
            _ => None,
        }
    }

    /// Follows `count` links from `start`. `find_cluster(0, c)` is `c`
    /// itself. Returns `None` if the chain ends first.
    pub fn find_cluster(&self, count: u32, start: Cluster) -> Option<Cluster> {
        let mut cluster = start;
        for _ in 0..count {
            cluster = self.next_cluster(cluster)?;
        }
        Some(cluster)
    }

    /// Iterates over the chain starting at `start`, including `start` itself.
    pub fn chain(&self, start: Cluster) -> ClusterChain<'_> {
        ClusterChain {
            table: self,
            next: Some(start).filter(|c| c.0 >= Cluster::FIRST.0 && c.0 <= self.cluster_count + 1),
            remaining: self.cluster_count,
        }
    }

    /// Number of clusters in the chain starting at `start`.
    pub fn chain_len(&self, start: Cluster) -> u32 {
        self.chain(start).count() as u32
    }
}

/// Iterator over the clusters of a chain. Yields at most as many clusters as
/// the volume has, so a cyclic chain terminates.
pub struct ClusterChain<'a> {
    table: &'a FatTable,
    next: Option<Cluster>,
    remaining: u32,
}

impl Iterator for ClusterChain<'_> {
    type Item = Cluster;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.next?;
        self.remaining -= 1;
        self.next = self.table.next_cluster(current);
        Some(current)
    }
}

/// Tracks a position within a cluster chain so sequential reads don't walk
/// the chain from the start every time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCursor {
    start: Cluster,
    index: u64,
    current: Cluster,
}

impl ClusterCursor {
    pub fn new(start: Cluster) -> Self {
        Self {
            start,
            index: 0,
            current: start,
        }
    }

    pub fn start(&self) -> Cluster {
        self.start
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn current(&self) -> Cluster {
        self.current
    }

    /// Moves to the `index`th cluster of the chain and returns it. Seeking
    /// backwards restarts from the first cluster; seeking forwards walks on
    /// from the current one. Returns `None` (leaving the cursor unchanged) if
    /// the chain is shorter than `index + 1` clusters.
    pub fn seek(&mut self, table: &FatTable, index: u64) -> Option<Cluster> {
        let (mut cluster, mut at) = if index < self.index {
            (self.start, 0)
        } else {
            (self.current, self.index)
        };
        while at < index {
            cluster = table.next_cluster(cluster)?;
            at += 1;
        }
        self.index = index;
        self.current = cluster;
        Some(cluster)
    }
}
