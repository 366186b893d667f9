// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! MCP register block access.
//!
//! Every access is a real bus access: reading `MCP_STATUS` can clear latched
//! conditions on some chip revisions, so callers must not cache, reorder or
//! elide register operations.

use bitflags::bitflags;

#[cfg(target_os = "linux")]
use crate::error::McpError;
#[cfg(target_os = "linux")]
use std::fs::File;
#[cfg(target_os = "linux")]
use std::os::unix::io::AsRawFd;
#[cfg(target_os = "linux")]
use std::path::Path;

// General registers
pub const MCP_CTRL: u32 = 0x100;
pub const MCP_STATUS: u32 = 0x104;
pub const MCP_EN: u32 = 0x108;
pub const MCP_CTRL1: u32 = 0x198;

// Ring-buffer registers
pub const MCP_BASE: u32 = 0x10c;
pub const MCP_LIMIT: u32 = 0x110;
pub const MCP_RDPTR: u32 = 0x114;
pub const MCP_WRPTR: u32 = 0x118;
pub const MCP_DES_COUNT: u32 = 0x134;
pub const MCP_DES_COMPARE: u32 = 0x138;

// Initial key registers
pub const MCP_DES_INI_KEY: u32 = 0x11c;
pub const MCP_AES_INI_KEY: u32 = 0x124;

/// CP power management.
pub const PWM_CTRL: u32 = 0x1e0;

/// Size of the register window that must be mapped.
pub const MCP_REG_SPAN: usize = 0x200;

/// Written to `MCP_EN` / `MCP_STATUS` to mask every interrupt source and
/// clear every latched status bit.
pub const IRQ_ALL: u32 = !1;

/// `MCP_CTRL1` bit that disables hash auto padding when set.
pub const CTRL1_AUTO_PADDING_OFF: u32 = 1 << 11;

/// RTD1395 automatic clock gating enables in `PWM_CTRL`.
pub const PWM_AUTO_POWER_BITS: u32 =
    (1 << 22) | (1 << 23) | (1 << 24) | (1 << 25) | (1 << 27) | (1 << 28);

bitflags! {
    /// `MCP_CTRL` bits.
    ///
    /// Writes with `WRITE_DATA` set turn the other written bits on; writes
    /// without it turn them off.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CtrlBits: u32 {
        const WRITE_DATA = 1 << 0;
        const GO = 1 << 1;
        const IDLE = 1 << 2;
        const SWAP = 1 << 3;
        const CLEAR = 1 << 4;
    }
}

bitflags! {
    /// `MCP_STATUS` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusBits: u32 {
        const RING_EMPTY = 1 << 1;
        const ERROR = 1 << 2;
        const COMPARE = 1 << 3;
        const K_KL_DONE = 1 << 13;
        const KL_DONE = 1 << 20;
    }
}

/// Typed access to the engine's register block.
pub trait RegisterIo: Send + Sync {
    /// Read a 32-bit register.
    fn read(&self, offset: u32) -> u32;

    /// Write a 32-bit register.
    fn write(&self, offset: u32, value: u32);

    /// Read, clear `mask`, OR in `value & mask`, write back.
    fn update_bits(&self, offset: u32, mask: u32, value: u32) {
        let v = self.read(offset);
        self.write(offset, (v & !mask) | (value & mask));
    }
}

// ============================================================================
// Linux Implementation
// ============================================================================

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;

    /// Register block mapped from a UIO (or `/dev/mem`-style) device node.
    pub struct MmioRegisters {
        /// Kept open for the lifetime of the mapping.
        #[allow(dead_code)]
        file: File,
        base: *mut u8,
        len: usize,
    }

    // SAFETY: the mapping is owned and valid until drop, and every access is
    // a single aligned volatile 32-bit load or store.
    unsafe impl Send for MmioRegisters {}

    // SAFETY: see above; serialization of multi-register sequences is the
    // caller's job (the engine lock).
    unsafe impl Sync for MmioRegisters {}

    impl MmioRegisters {
        /// Map `len` bytes of register space starting at `offset` of `path`.
        ///
        /// For UIO devices the offset selects the map (`N * page_size`).
        pub fn open(path: &Path, offset: u64, len: usize) -> Result<Self, McpError> {
            if len < MCP_REG_SPAN {
                return Err(McpError::InvalidArgument(format!(
                    "register window {:#x} smaller than {:#x}",
                    len, MCP_REG_SPAN
                )));
            }

            let file = File::options()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        McpError::PermissionDenied(path.display().to_string())
                    } else {
                        McpError::Io(e)
                    }
                })?;

            let base = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    offset as libc::off_t,
                )
            };

            if base == libc::MAP_FAILED {
                return Err(McpError::MmapFailed(format!(
                    "mmap failed for {}",
                    path.display()
                )));
            }

            Ok(Self {
                file,
                base: base as *mut u8,
                len,
            })
        }
    }

    impl RegisterIo for MmioRegisters {
        #[inline]
        fn read(&self, offset: u32) -> u32 {
            debug_assert!(offset as usize + 4 <= self.len && offset % 4 == 0);
            unsafe { std::ptr::read_volatile(self.base.add(offset as usize) as *const u32) }
        }

        #[inline]
        fn write(&self, offset: u32, value: u32) {
            debug_assert!(offset as usize + 4 <= self.len && offset % 4 == 0);
            unsafe { std::ptr::write_volatile(self.base.add(offset as usize) as *mut u32, value) }
        }
    }

    impl Drop for MmioRegisters {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.len);
            }
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux_impl::MmioRegisters;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Plain(Mutex<u32>);

    impl RegisterIo for Plain {
        fn read(&self, _offset: u32) -> u32 {
            *self.0.lock().unwrap()
        }
        fn write(&self, _offset: u32, value: u32) {
            *self.0.lock().unwrap() = value;
        }
    }

    #[test]
    fn test_update_bits() {
        let r = Plain(Mutex::new(0xffff_0000));
        r.update_bits(MCP_CTRL1, CTRL1_AUTO_PADDING_OFF, CTRL1_AUTO_PADDING_OFF);
        assert_eq!(r.read(MCP_CTRL1), 0xffff_0800);

        r.update_bits(MCP_CTRL1, CTRL1_AUTO_PADDING_OFF, 0);
        assert_eq!(r.read(MCP_CTRL1), 0xffff_0000);

        // Bits outside the mask are never touched
        r.update_bits(MCP_CTRL1, 0x0000_00ff, 0xffff_ffff);
        assert_eq!(r.read(MCP_CTRL1), 0xffff_00ff);
    }

    #[test]
    fn test_bit_values() {
        assert_eq!((CtrlBits::GO | CtrlBits::WRITE_DATA).bits(), 0x3);
        assert_eq!(CtrlBits::CLEAR.bits(), 0x10);
        assert_eq!((StatusBits::RING_EMPTY | StatusBits::ERROR).bits(), 0x6);
        assert_eq!(IRQ_ALL, 0xffff_fffe);
    }
}
