//! Filesystem core of the intro launcher: block devices, partition tables,
//! the VFS with its FAT and memory filesystems, boot configuration and
//! logging.
//!
//! Everything here is `no_std` + `alloc`. The firmware disk driver talks to
//! the BIOS through the [`bios_disk::Firmware`] trait, so the same code runs
//! under `cargo test` and in the host tools.

#![cfg_attr(not(test), no_std)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cargo_common_metadata,
    clippy::doc_markdown,
    clippy::implicit_hasher,
    clippy::implicit_return,
    clippy::len_without_is_empty,
    clippy::missing_const_for_fn,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::multiple_crate_versions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::option_if_let_else,
    clippy::redundant_pub_crate,
    clippy::suboptimal_flops,
    clippy::upper_case_acronyms,
    clippy::wildcard_imports
)]

extern crate alloc;

pub mod bios_disk;
pub mod block;
pub mod boot;
pub mod config;
pub mod fs;
pub mod logging;
pub mod part;
#[cfg(test)]
mod testing;
pub mod vfs;

/// Called from the `#[panic_handler]` of the boot image. Panics are fatal:
/// the message is logged and the CPU spins forever.
pub fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    log::error!("PANIC: {info}");
    halt_loop()
}

pub fn halt_loop() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
