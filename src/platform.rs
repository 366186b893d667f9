// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! MCP device discovery.
//!
//! # Platform Support
//!
//! ## Linux
//! The register block is exported to user space as a UIO device whose name
//! contains `mcp`:
//! - `/sys/class/uio/uioN/name` - device name
//! - `/sys/class/uio/uioN/maps/map0/size` - register window size (hex)
//!
//! The device node is `/dev/uioN`. The chip revision comes from the SoC bus
//! at `/sys/devices/soc0/family`.
//!
//! ## Other platforms
//! Discovery returns `PlatformNotSupported`; use the `sim` model instead.

use crate::chip::ChipVariant;
use crate::error::McpError;
use std::path::PathBuf;

#[cfg(target_os = "linux")]
use crate::regs::MmioRegisters;
#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::path::Path;

/// Sysfs class directory for UIO devices (Linux only).
#[cfg(target_os = "linux")]
const SYSFS_UIO_PATH: &str = "/sys/class/uio";

/// Directory holding the UIO device nodes (Linux only).
#[cfg(target_os = "linux")]
const DEV_PATH: &str = "/dev";

/// SoC family as published by the SoC bus (Linux only).
#[cfg(target_os = "linux")]
const SOC_FAMILY_PATH: &str = "/sys/devices/soc0/family";

/// Information about an MCP engine exported through UIO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpDevice {
    /// UIO instance name (e.g., "uio0").
    pub name: String,
    /// Name the kernel driver gave the device.
    pub label: String,
    /// Device node to map the registers from.
    pub dev_path: PathBuf,
    /// Size of the register window (map 0).
    pub map_size: usize,
}

impl McpDevice {
    /// Map the register block.
    #[cfg(target_os = "linux")]
    pub fn open_registers(&self) -> Result<MmioRegisters, McpError> {
        MmioRegisters::open(&self.dev_path, 0, self.map_size)
    }
}

/// Returns true if a UIO device name belongs to an MCP engine.
pub fn is_mcp_label(label: &str) -> bool {
    label.trim().to_ascii_lowercase().contains("mcp")
}

/// Parse a sysfs number such as `0x00001000`.
pub fn parse_sysfs_hex(s: &str) -> Option<u64> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16).ok()
}

// ============================================================================
// Linux Implementation
// ============================================================================

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;

    pub fn discover_devices() -> Result<Vec<McpDevice>, McpError> {
        scan_uio(Path::new(SYSFS_UIO_PATH), Path::new(DEV_PATH))
    }

    /// Scan a UIO class directory for MCP engines, sorted by instance name.
    pub(super) fn scan_uio(class_dir: &Path, dev_dir: &Path) -> Result<Vec<McpDevice>, McpError> {
        if !class_dir.exists() {
            return Err(McpError::PlatformNotSupported);
        }

        let mut devices = Vec::new();
        for entry in fs::read_dir(class_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("uio") {
                continue;
            }

            let path = class_dir.join(&name);
            let Ok(label) = read_sysfs_string(&path.join("name")) else {
                continue;
            };
            if !is_mcp_label(&label) {
                continue;
            }

            let size = read_sysfs_string(&path.join("maps/map0/size"))?;
            let map_size = parse_sysfs_hex(&size)
                .and_then(|v| usize::try_from(v).ok())
                .ok_or_else(|| {
                    McpError::InvalidArgument(format!("invalid map size in sysfs: {}", size))
                })?;

            devices.push(McpDevice {
                dev_path: dev_dir.join(&name),
                name,
                label,
                map_size,
            });
        }

        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    fn read_sysfs_string(path: &Path) -> Result<String, McpError> {
        Ok(fs::read_to_string(path)?.trim().to_string())
    }

    pub fn detect_chip_variant() -> ChipVariant {
        match read_sysfs_string(Path::new(SOC_FAMILY_PATH)) {
            Ok(family) => ChipVariant::from_soc_family(&family),
            Err(_) => ChipVariant::Unknown,
        }
    }

    pub fn is_mcp_available() -> bool {
        discover_devices()
            .map(|devices| !devices.is_empty())
            .unwrap_or(false)
    }
}

// ============================================================================
// Unsupported Platform Stub
// ============================================================================

#[cfg(not(target_os = "linux"))]
mod stub_impl {
    use super::*;

    pub fn discover_devices() -> Result<Vec<McpDevice>, McpError> {
        Err(McpError::PlatformNotSupported)
    }

    pub fn detect_chip_variant() -> ChipVariant {
        ChipVariant::Unknown
    }

    pub fn is_mcp_available() -> bool {
        false
    }
}

#[cfg(target_os = "linux")]
use linux_impl as imp;
#[cfg(not(target_os = "linux"))]
use stub_impl as imp;

// ============================================================================
// Public API
// ============================================================================

/// Discover all MCP engines on the system.
///
/// # Errors
///
/// Returns an error if:
/// - The platform is not supported
/// - The UIO class directory doesn't exist (Linux: no UIO support)
/// - A matching device has an unreadable register window size
///
/// # Example
///
/// ```rust,no_run
/// use mcp_engine::discover_devices;
///
/// for device in discover_devices()? {
///     println!("{} ({}): {:#x} bytes", device.name, device.label, device.map_size);
/// }
/// # Ok::<(), mcp_engine::McpError>(())
/// ```
pub fn discover_devices() -> Result<Vec<McpDevice>, McpError> {
    imp::discover_devices()
}

/// Chip revision of the running SoC; `Unknown` if it cannot be read.
pub fn detect_chip_variant() -> ChipVariant {
    imp::detect_chip_variant()
}

/// Check if an MCP engine is exported on this system.
pub fn is_mcp_available() -> bool {
    imp::is_mcp_available()
}
