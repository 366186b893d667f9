// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! MCP hardware descriptor.
//!
//! The layout matches `struct mcp_desc` from the vendor uapi header: one
//! control word, six key words, four IV words, source and destination bus
//! addresses and a byte count. The engine reads descriptors as little-endian
//! 32-bit words.

use crate::mode::{Algorithm, BlockMode, KeySelect};
use bitflags::bitflags;

/// Size of one descriptor as seen by the engine.
pub const DESC_SIZE: usize = 56;

const MODE_MASK: u32 = 0x0000_001f;
const BCM_SHIFT: u32 = 6;
const BCM_MASK: u32 = 0x0000_00c0;
const KEY_SEL_SHIFT: u32 = 12;
const KEY_SEL_MASK: u32 = 0x0000_3000;

bitflags! {
    /// Single-bit options of the control word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlFlags: u32 {
        /// Encrypt (set) or decrypt (clear).
        const ENCRYPT = 1 << 5;
        /// Take the IV from the engine register instead of the descriptor.
        const IV_FROM_REG = 1 << 11;
    }
}

/// Encrypt/decrypt selector for block-cipher descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// One MCP operation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct McpDesc {
    /// Algorithm, mode, direction and key selector.
    pub ctrl: u32,

    /// Inline key words, or `key[0]` = key address when the key selector is DDR.
    /// Hash transforms carry the chaining state here.
    pub key: [u32; 6],

    /// Initialization vector words (SHA-256 keeps two state words here).
    pub iv: [u32; 4],

    /// Source bus address.
    pub src: u32,

    /// Destination bus address.
    pub dst: u32,

    /// Number of bytes to process.
    pub length: u32,
}

impl McpDesc {
    /// Create a new zeroed descriptor.
    #[inline]
    pub const fn new() -> Self {
        Self {
            ctrl: 0,
            key: [0; 6],
            iv: [0; 4],
            src: 0,
            dst: 0,
            length: 0,
        }
    }

    /// Set the algorithm selector.
    #[inline]
    pub fn set_algorithm(&mut self, algo: Algorithm) {
        self.ctrl = (self.ctrl & !MODE_MASK) | algo.as_u32();
    }

    /// Get the algorithm selector, if it is a known one.
    #[inline]
    pub fn algorithm(&self) -> Option<Algorithm> {
        Algorithm::from_bits(self.ctrl & MODE_MASK)
    }

    #[inline]
    pub fn set_block_mode(&mut self, mode: BlockMode) {
        self.ctrl = (self.ctrl & !BCM_MASK) | ((mode.as_u32() << BCM_SHIFT) & BCM_MASK);
    }

    #[inline]
    pub fn block_mode(&self) -> BlockMode {
        BlockMode::from_bits((self.ctrl & BCM_MASK) >> BCM_SHIFT)
    }

    #[inline]
    pub fn set_key_select(&mut self, sel: KeySelect) {
        self.ctrl = (self.ctrl & !KEY_SEL_MASK) | ((sel.as_u32() << KEY_SEL_SHIFT) & KEY_SEL_MASK);
    }

    #[inline]
    pub fn key_select(&self) -> KeySelect {
        KeySelect::from_bits((self.ctrl & KEY_SEL_MASK) >> KEY_SEL_SHIFT)
    }

    /// Add control flags (OR with existing).
    #[inline]
    pub fn add_flags(&mut self, flags: ControlFlags) {
        self.ctrl |= flags.bits();
    }

    /// Get the single-bit control flags.
    #[inline]
    pub fn flags(&self) -> ControlFlags {
        ControlFlags::from_bits_truncate(self.ctrl)
    }

    #[inline]
    pub fn set_direction(&mut self, dir: Direction) {
        match dir {
            Direction::Encrypt => self.ctrl |= ControlFlags::ENCRYPT.bits(),
            Direction::Decrypt => self.ctrl &= !ControlFlags::ENCRYPT.bits(),
        }
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        if self.flags().contains(ControlFlags::ENCRYPT) {
            Direction::Encrypt
        } else {
            Direction::Decrypt
        }
    }

    /// Bytes the engine will consume for this descriptor: the length rounded
    /// down to the algorithm's block size.
    pub fn block_aligned_length(&self) -> u32 {
        match self.algorithm() {
            Some(algo) => self.length - self.length % algo.block_size(),
            None => self.length,
        }
    }

    /// Create a block-cipher descriptor.
    pub fn cipher(
        algo: Algorithm,
        mode: BlockMode,
        dir: Direction,
        src: u32,
        dst: u32,
        len: u32,
    ) -> Self {
        let mut desc = Self::new();
        desc.set_algorithm(algo);
        desc.set_block_mode(mode);
        desc.set_direction(dir);
        desc.src = src;
        desc.dst = dst;
        desc.length = len;
        desc
    }

    /// Create a hash block-transform descriptor. The chaining state is
    /// filled in separately by the caller.
    pub fn hash(algo: Algorithm, src: u32, dst: u32, len: u32) -> Self {
        let mut desc = Self::new();
        desc.set_algorithm(algo);
        desc.src = src;
        desc.dst = dst;
        desc.length = len;
        desc
    }

    /// Serialize to the engine's in-memory layout.
    pub fn to_bytes(&self) -> [u8; DESC_SIZE] {
        let mut out = [0u8; DESC_SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(self.words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Parse the engine's in-memory layout.
    pub fn from_bytes(bytes: &[u8; DESC_SIZE]) -> Self {
        let mut words = [0u32; DESC_SIZE / 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let mut desc = Self::new();
        desc.ctrl = words[0];
        desc.key.copy_from_slice(&words[1..7]);
        desc.iv.copy_from_slice(&words[7..11]);
        desc.src = words[11];
        desc.dst = words[12];
        desc.length = words[13];
        desc
    }

    fn words(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::once(self.ctrl)
            .chain(self.key.iter().copied())
            .chain(self.iv.iter().copied())
            .chain([self.src, self.dst, self.length])
    }
}

/// Serialize a batch of descriptors into one contiguous image.
pub fn batch_bytes(descs: &[McpDesc]) -> Vec<u8> {
    let mut out = Vec::with_capacity(descs.len() * DESC_SIZE);
    for desc in descs {
        out.extend_from_slice(&desc.to_bytes());
    }
    out
}

const _: () = assert!(std::mem::size_of::<McpDesc>() == DESC_SIZE);
