use core::fmt::Debug;

use alloc::vec::Vec;

use spin::Mutex;

/// Every device we talk to uses 512 byte sectors.
pub const SECTOR_SIZE: usize = 512;

pub type Sector = [u8; SECTOR_SIZE];

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IoError {
    #[error("sector {lba} is past the end of the device")]
    OutOfRange { lba: u64 },
    #[error("device reported an error accessing sector {lba}")]
    Device { lba: u64 },
    #[error("device does not support LBA access")]
    Unsupported,
    #[error("buffer of {len} bytes is not a whole number of sectors")]
    UnalignedBuffer { len: usize },
}

/// A device addressed in 512 byte sectors.
///
/// Note: we use `&self` and not `&mut self` on these methods. Implementations
/// that need mutable state wrap it in a lock.
pub trait BlockDevice: Debug + Send + Sync {
    fn read_sector(&self, lba: u64, buf: &mut Sector) -> Result<(), IoError>;

    fn write_sector(&self, lba: u64, buf: &Sector) -> Result<(), IoError>;

    /// Number of sectors on the device, if known.
    fn sector_count(&self) -> Option<u64> {
        None
    }

    /// Reads consecutive sectors starting at `lba`, one at a time.
    fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> Result<(), IoError> {
        let len = buf.len();
        if len % SECTOR_SIZE != 0 {
            return Err(IoError::UnalignedBuffer { len });
        }
        for (i, chunk) in buf.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            let Ok(sector) = <&mut Sector>::try_from(chunk) else {
                return Err(IoError::UnalignedBuffer { len });
            };
            self.read_sector(lba + i as u64, sector)?;
        }
        Ok(())
    }

    /// Writes consecutive sectors starting at `lba`, one at a time.
    fn write_sectors(&self, lba: u64, buf: &[u8]) -> Result<(), IoError> {
        let len = buf.len();
        if len % SECTOR_SIZE != 0 {
            return Err(IoError::UnalignedBuffer { len });
        }
        for (i, chunk) in buf.chunks_exact(SECTOR_SIZE).enumerate() {
            let Ok(sector) = <&Sector>::try_from(chunk) else {
                return Err(IoError::UnalignedBuffer { len });
            };
            self.write_sector(lba + i as u64, sector)?;
        }
        Ok(())
    }
}

/// A disk image held in memory. Used as the memory disk and to run the
/// drivers against image files on the host.
#[derive(Debug)]
pub struct MemoryDisk {
    data: Mutex<Vec<u8>>,
}

impl MemoryDisk {
    /// Wraps a disk image. A trailing partial sector is zero padded.
    pub fn new(mut image: Vec<u8>) -> Self {
        let padded = image.len().div_ceil(SECTOR_SIZE) * SECTOR_SIZE;
        image.resize(padded, 0);
        Self {
            data: Mutex::new(image),
        }
    }

    pub fn zeroed(sectors: u64) -> Self {
        Self::new(alloc::vec![0; sectors as usize * SECTOR_SIZE])
    }

    /// Copies `data` into the image at a byte offset.
    #[cfg(test)]
    pub(crate) fn write_bytes(&self, offset: usize, data: &[u8]) {
        self.data.lock()[offset..offset + data.len()].copy_from_slice(data);
    }

    fn byte_range(lba: u64, len: usize) -> Result<core::ops::Range<usize>, IoError> {
        let start = usize::try_from(lba)
            .ok()
            .and_then(|lba| lba.checked_mul(SECTOR_SIZE))
            .ok_or(IoError::OutOfRange { lba })?;
        match start.checked_add(SECTOR_SIZE) {
            Some(end) if end <= len => Ok(start..end),
            _ => Err(IoError::OutOfRange { lba }),
        }
    }
}

impl BlockDevice for MemoryDisk {
    fn read_sector(&self, lba: u64, buf: &mut Sector) -> Result<(), IoError> {
        let image = self.data.lock();
        let range = Self::byte_range(lba, image.len())?;
        buf.copy_from_slice(&image[range]);
        Ok(())
    }

    fn write_sector(&self, lba: u64, buf: &Sector) -> Result<(), IoError> {
        let mut image = self.data.lock();
        let range = Self::byte_range(lba, image.len())?;
        image[range].copy_from_slice(buf);
        Ok(())
    }

    fn sector_count(&self) -> Option<u64> {
        Some((self.data.lock().len() / SECTOR_SIZE) as u64)
    }
}
