// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! # Realtek MCP Crypto Engine Driver
//!
//! This crate drives the MCP crypto accelerator found on Realtek DHC SoCs
//! (RTD1295, RTD1395, RTD1619, RTD1319, RTD1619B) through its descriptor
//! ring. The hardware does the AES/DES/SHA work; the crate loads
//! descriptors, runs the register handshake, polls for completion and keeps
//! concurrent callers from interleaving on the one shared ring.
//!
//! ## Supported Operations
//!
//! - Single descriptor and batch submission
//! - AES (128/192/256), DES and 3DES in ECB, CBC and CTR mode
//! - SHA-1, SHA-256 and SHA-512 block transforms and streaming hashing
//! - Import of external (dma-buf) buffers by bus address
//!
//! ## Platform Support
//!
//! | Platform | Hardware MCP | Software model (`sim`) |
//! |----------|--------------|------------------------|
//! | Linux    | Supported (UIO) | Supported           |
//! | Others   | Not available   | Supported           |
//!
//! On Linux the register block is mapped from a UIO device and coherent
//! memory comes from a reserved carve-out. The `sim` feature (on by default)
//! provides a software model of the engine used by the tests, benches and
//! the demo.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mcp_engine::{BlockCipher, BlockMode, McpCipher, McpError, SgRequest};
//! use mcp_engine::sim::SimPlatform;
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), McpError> {
//!     let platform = SimPlatform::new();
//!     let engine = Arc::new(platform.engine(Default::default())?);
//!
//!     let mut aes = McpCipher::new(engine, BlockCipher::Aes, BlockMode::Cbc)?;
//!     aes.set_key(Some(&[0x2b; 16]))?;
//!
//!     let plain = [0u8; 64];
//!     let mut cipher = [0u8; 64];
//!     let mut req = SgRequest::contiguous(&plain, &mut cipher, [0; 16]);
//!     let done = aes.encrypt(&mut req)?;
//!     println!("encrypted {} bytes", done);
//!     Ok(())
//! }
//! ```
//!
//! ## Requirements
//!
//! ### Hardware
//! - Realtek DHC SoC with the MCP block exported through UIO
//! - A physically contiguous memory carve-out the engine can address
//!
//! ### Software
//! - Linux with UIO support and access to `/dev/uioN`

pub mod chip;
pub mod cipher;
pub mod client;
pub mod descriptor;
pub mod dma;
pub mod dmabuf;
pub mod engine;
pub mod error;
pub mod hash;
pub mod hwlock;
pub mod mode;
pub mod platform;
pub mod regs;
pub mod ring;
#[cfg(feature = "sim")]
pub mod sim;

// Re-exports for convenient access
pub use chip::{decode_status, ChipVariant, Completion, StatusLayout};
pub use cipher::{BlockCipher, McpCipher, SgRequest};
pub use client::McpClient;
pub use descriptor::{ControlFlags, Direction, McpDesc, DESC_SIZE};
pub use dma::{CoherentRegion, DmaAddr, DmaAllocator, DmaBuffer};
pub use dmabuf::{DmaBufImporter, DmaBufMapping, DmaSegment, ImportedHandle};
pub use engine::{EngineConfig, EngineGuard, McpEngine};
pub use error::{McpError, McpResult};
pub use hash::{hash_transform, HashAlgorithm, HashState, HwHasher};
pub use hwlock::{HwSpinlock, Interrupt};
pub use mode::{Algorithm, BlockMode, KeySelect};
pub use platform::{detect_chip_variant, discover_devices, is_mcp_available, McpDevice};
pub use regs::RegisterIo;
pub use ring::PollPolicy;
