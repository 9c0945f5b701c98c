//! Disk access through the BIOS int 13h extended (LBA) services.
//!
//! The kernel runs in protected mode, so every BIOS call goes through a
//! real-mode trampoline. That trampoline lives outside this crate and is
//! reached through the [`Firmware`] trait: it runs a software interrupt with a
//! register file, and gives access to a small buffer in low memory that real
//! mode code can address.
//!
//! # Resources
//!
//! - <https://en.wikipedia.org/wiki/INT_13H>
//! - <https://www.ctyme.com/intr/rb-0706.htm> (function 41h)
//! - <https://www.ctyme.com/intr/rb-0708.htm> (function 42h)

use core::fmt::Debug;

use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::block::{BlockDevice, IoError, Sector};

/// Register file handed to and returned from a real-mode interrupt.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Registers {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,
    pub flags: u16,
}

pub const FLAGS_CARRY: u16 = 1 << 0;

impl Registers {
    pub fn carry(&self) -> bool {
        self.flags & FLAGS_CARRY != 0
    }
}

/// Narrow interface to the real-mode firmware.
pub trait Firmware: Debug + Send + Sync {
    /// Linear address of the low memory buffer shared with real mode code.
    /// It is 16 byte aligned and has at least 64 KiB plus one sector of room
    /// behind it.
    fn low_buffer(&self) -> u32;

    /// Runs software interrupt `vector` in real mode. `regs` holds the input
    /// registers and receives the output registers.
    fn int86(&self, vector: u8, regs: &mut Registers);

    /// Copies low memory at linear address `addr` into `buf`.
    fn peek(&self, addr: u32, buf: &mut [u8]);

    /// Copies `data` into low memory at linear address `addr`.
    fn poke(&self, addr: u32, data: &[u8]);
}

const DISK_INTERRUPT: u8 = 0x13;

const FN_CHECK_EXTENSIONS: u32 = 0x41;
const FN_EXTENDED_READ: u32 = 0x42;
const FN_EXTENDED_WRITE: u32 = 0x43;

const EXTENSIONS_PROBE: u32 = 0x55AA;
/// Returned in BX by a BIOS that implements the extensions.
const EXTENSIONS_SIGNATURE: u32 = 0xAA55;

/// Disk address packet describing a single extended read or write.
#[derive(Debug, Clone, FromZeroes, FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct DiskAddressPacket {
    /// 0x00: size of this packet.
    size: u8,
    /// 0x01
    zero: u8,
    /// 0x02: max 127 on some implementations.
    num_sectors: U16<LittleEndian>,
    /// 0x04: transfer buffer as a real mode `segment:offset` pair.
    buffer_offset: U16<LittleEndian>,
    /// 0x06
    buffer_segment: U16<LittleEndian>,
    /// 0x08
    lba_low: U32<LittleEndian>,
    /// 0x0C
    lba_high: U32<LittleEndian>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Operation {
    Read,
    Write,
}

/// A BIOS drive accessed with int 13h extensions. There is no CHS fallback:
/// without extensions every access fails with [`IoError::Unsupported`].
#[derive(Debug)]
pub struct BiosDisk<F> {
    firmware: F,
    drive: u8,
    has_extensions: bool,
}

impl<F: Firmware> BiosDisk<F> {
    /// Checks whether the BIOS supports int 13h extensions for `drive`.
    pub fn probe(firmware: F, drive: u8) -> Self {
        let mut regs = Registers {
            eax: FN_CHECK_EXTENSIONS << 8,
            ebx: EXTENSIONS_PROBE,
            edx: u32::from(drive),
            ..Registers::default()
        };
        firmware.int86(DISK_INTERRUPT, &mut regs);

        // Some BIOSes clear carry for functions they don't know, so the
        // swapped signature in BX is what confirms support.
        let has_extensions = !regs.carry() && regs.ebx & 0xFFFF == EXTENSIONS_SIGNATURE;
        if has_extensions {
            log::info!("BIOS supports int13h extensions (LBA access) for drive {drive:#x}");
        } else {
            log::warn!("BIOS does not support int13h extensions (LBA access) for drive {drive:#x}");
        }

        Self {
            firmware,
            drive,
            has_extensions,
        }
    }

    pub fn has_extensions(&self) -> bool {
        self.has_extensions
    }

    pub fn drive(&self) -> u8 {
        self.drive
    }

    /// The packet goes at the start of the low buffer, and data is staged in
    /// a bounce buffer at the next 64 KiB boundary so the transfer never
    /// crosses a DMA segment.
    fn bounce_buffer(&self) -> u32 {
        let packet = self.firmware.low_buffer();
        (packet + core::mem::size_of::<DiskAddressPacket>() as u32 + 0xFFFF) & 0xFFFF_0000
    }

    fn transfer(&self, lba: u64, op: Operation, buf: &mut Sector) -> Result<(), IoError> {
        if !self.has_extensions {
            return Err(IoError::Unsupported);
        }

        let packet_addr = self.firmware.low_buffer();
        let bounce = self.bounce_buffer();

        let function = match op {
            Operation::Read => FN_EXTENDED_READ,
            Operation::Write => {
                self.firmware.poke(bounce, &buf[..]);
                FN_EXTENDED_WRITE
            }
        };

        let mut packet = DiskAddressPacket::new_zeroed();
        packet.size = core::mem::size_of::<DiskAddressPacket>() as u8;
        packet.num_sectors.set(1);
        packet.buffer_offset.set((bounce & 0xF) as u16);
        packet.buffer_segment.set((bounce >> 4) as u16);
        packet.lba_low.set(lba as u32);
        packet.lba_high.set((lba >> 32) as u32);
        self.firmware.poke(packet_addr, packet.as_bytes());

        let mut regs = Registers {
            eax: function << 8,
            edx: u32::from(self.drive),
            ds: (packet_addr >> 4) as u16,
            esi: packet_addr & 0xF,
            ..Registers::default()
        };
        self.firmware.int86(DISK_INTERRUPT, &mut regs);

        if regs.carry() {
            log::debug!(
                "int13h function {function:#x} failed for sector {lba} (status {:#x})",
                (regs.eax >> 8) & 0xFF
            );
            return Err(IoError::Device { lba });
        }

        if op == Operation::Read {
            self.firmware.peek(bounce, &mut buf[..]);
        }
        Ok(())
    }
}

impl<F: Firmware> BlockDevice for BiosDisk<F> {
    fn read_sector(&self, lba: u64, buf: &mut Sector) -> Result<(), IoError> {
        self.transfer(lba, Operation::Read, buf)
    }

    fn write_sector(&self, lba: u64, buf: &Sector) -> Result<(), IoError> {
        let mut staged: Sector = *buf;
        self.transfer(lba, Operation::Write, &mut staged)
    }
}

const _: () = assert!(core::mem::size_of::<DiskAddressPacket>() == 16);
