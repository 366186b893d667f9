// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Hash block transforms.
//!
//! The engine runs the SHA compression function over whole blocks, taking the
//! chaining state as key material and writing the new state to the
//! destination. Padding is left to software: every transform switches the
//! engine's auto padding off first.
//!
//! [`HwHasher`] wraps the transform in the usual `update`/`finalize` shape and
//! performs the Merkle-Damgard length padding itself.

use crate::descriptor::McpDesc;
use crate::dma::CoherentRegion;
use crate::engine::McpEngine;
use crate::error::{McpError, McpResult};
use crate::mode::{Algorithm, KeySelect};
use std::sync::Arc;

const SHA1_IV: [u32; 5] = [0x6745_2301, 0xefcd_ab89, 0x98ba_dcfe, 0x1032_5476, 0xc3d2_e1f0];

const SHA256_IV: [u32; 8] = [
    0x6a09_e667, 0xbb67_ae85, 0x3c6e_f372, 0xa54f_f53a, 0x510e_527f, 0x9b05_688c, 0x1f83_d9ab,
    0x5be0_cd19,
];

const SHA512_IV: [u64; 8] = [
    0x6a09_e667_f3bc_c908,
    0xbb67_ae85_84ca_a73b,
    0x3c6e_f372_fe94_f82b,
    0xa54f_f53a_5f1d_36f1,
    0x510e_527f_ade6_82d1,
    0x9b05_688c_2b3e_6c1f,
    0x1f83_d9ab_fb41_bd6b,
    0x5be0_cd19_137e_2179,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    pub const fn block_size(self) -> usize {
        match self {
            Self::Sha1 | Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    pub const fn digest_size(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Engine algorithm selector.
    pub const fn algorithm(self) -> Algorithm {
        match self {
            Self::Sha1 => Algorithm::Sha1,
            Self::Sha256 => Algorithm::Sha256,
            Self::Sha512 => Algorithm::Sha512,
        }
    }

    /// Width of the trailing message-length field in the final block.
    const fn length_field(self) -> usize {
        match self {
            Self::Sha1 | Self::Sha256 => 8,
            Self::Sha512 => 16,
        }
    }
}

/// Chaining state of one hash computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashState {
    Sha1([u32; 5]),
    Sha256([u32; 8]),
    Sha512([u64; 8]),
}

impl HashState {
    /// The standard initial state for `algo`.
    pub fn initial(algo: HashAlgorithm) -> Self {
        match algo {
            HashAlgorithm::Sha1 => Self::Sha1(SHA1_IV),
            HashAlgorithm::Sha256 => Self::Sha256(SHA256_IV),
            HashAlgorithm::Sha512 => Self::Sha512(SHA512_IV),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Sha1(_) => HashAlgorithm::Sha1,
            Self::Sha256(_) => HashAlgorithm::Sha256,
            Self::Sha512(_) => HashAlgorithm::Sha512,
        }
    }

    /// State serialized big-endian, which is also the digest encoding.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        match self {
            Self::Sha1(s) => s.iter().flat_map(|w| w.to_be_bytes()).collect(),
            Self::Sha256(s) => s.iter().flat_map(|w| w.to_be_bytes()).collect(),
            Self::Sha512(s) => s.iter().flat_map(|w| w.to_be_bytes()).collect(),
        }
    }

    /// Replace the state with the engine's big-endian output.
    fn load_be_bytes(&mut self, bytes: &[u8]) {
        match self {
            Self::Sha1(s) => fill_u32(s, bytes),
            Self::Sha256(s) => fill_u32(s, bytes),
            Self::Sha512(s) => {
                for (w, chunk) in s.iter_mut().zip(bytes.chunks_exact(8)) {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(chunk);
                    *w = u64::from_be_bytes(b);
                }
            }
        }
    }
}

fn fill_u32(words: &mut [u32], bytes: &[u8]) {
    for (w, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *w = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

/// Run the compression function over `blocks`, updating `state` in place.
///
/// `blocks` must be a whole number of blocks. On error `state` is left as it
/// was. Auto padding is switched off on the engine and stays off.
pub fn hash_transform(engine: &McpEngine, state: &mut HashState, blocks: &[u8]) -> McpResult<()> {
    let algo = state.algorithm();
    let bs = algo.block_size();
    if blocks.is_empty() {
        return Ok(());
    }
    if blocks.len() % bs != 0 {
        return Err(McpError::InvalidDescriptor {
            length: (blocks.len() % bs) as u32,
            block_size: bs as u32,
        });
    }
    let len = u32::try_from(blocks.len())
        .map_err(|_| McpError::InvalidArgument(format!("{} bytes in one transform", blocks.len())))?;

    let state_bytes = state.to_be_bytes();
    let src = CoherentRegion::with_bytes(engine.dma_allocator(), blocks)?;
    let dst = engine.alloc_coherent(state_bytes.len())?;

    let mut desc = McpDesc::hash(algo.algorithm(), src.dma_addr(), dst.dma_addr(), len);
    // SHA-512 state is too wide for the descriptor and is read from memory
    let _ddr_state = match &*state {
        HashState::Sha1(s) => {
            desc.key[..5].copy_from_slice(s);
            None
        }
        HashState::Sha256(s) => {
            desc.key.copy_from_slice(&s[..6]);
            desc.iv[..2].copy_from_slice(&s[6..]);
            None
        }
        HashState::Sha512(_) => {
            let region = CoherentRegion::with_bytes(engine.dma_allocator(), &state_bytes)?;
            desc.set_key_select(KeySelect::Ddr);
            desc.key[0] = region.dma_addr();
            Some(region)
        }
    };

    {
        let mut engine = engine.lock()?;
        if engine.auto_padding() {
            engine.set_auto_padding(false);
        }
        if engine.submit(&desc)? == 0 {
            return Err(McpError::InvalidDescriptor {
                length: len,
                block_size: bs as u32,
            });
        }
    }

    state.load_be_bytes(dst.as_slice());
    Ok(())
}

/// Streaming hasher on top of [`hash_transform`].
pub struct HwHasher {
    engine: Arc<McpEngine>,
    state: HashState,
    pending: Vec<u8>,
    total: u128,
}

impl HwHasher {
    pub fn new(engine: Arc<McpEngine>, algo: HashAlgorithm) -> Self {
        Self {
            engine,
            state: HashState::initial(algo),
            pending: Vec::with_capacity(algo.block_size()),
            total: 0,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.state.algorithm()
    }

    /// Feed `data`; whole blocks go to the engine, the rest is buffered.
    pub fn update(&mut self, data: &[u8]) -> McpResult<()> {
        let bs = self.algorithm().block_size();
        self.pending.extend_from_slice(data);
        self.total += data.len() as u128;

        let full = self.pending.len() - self.pending.len() % bs;
        if full > 0 {
            hash_transform(&self.engine, &mut self.state, &self.pending[..full])?;
            self.pending.drain(..full);
        }
        Ok(())
    }

    /// Pad, run the final blocks and return the digest.
    pub fn finalize(mut self) -> McpResult<Vec<u8>> {
        let algo = self.algorithm();
        let bs = algo.block_size();
        let field = algo.length_field();
        let bits = self.total.wrapping_mul(8).to_be_bytes();

        self.pending.push(0x80);
        while self.pending.len() % bs != bs - field {
            self.pending.push(0);
        }
        self.pending.extend_from_slice(&bits[bits.len() - field..]);

        hash_transform(&self.engine, &mut self.state, &self.pending)?;
        let mut digest = self.state.to_be_bytes();
        digest.truncate(algo.digest_size());
        Ok(digest)
    }
}
