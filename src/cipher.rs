// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Block-cipher adapter.
//!
//! Translates AES/DES/3DES requests in ECB, CBC or CTR mode into engine
//! descriptors. A request's source may be scattered over several spans; each
//! span is submitted as its whole-block part, and the partial block left over
//! is carried into the next span.
//!
//! The IV is chained between submissions and written back to the request, so
//! a request can be continued by a later one. A trailing partial block is
//! left untouched and excluded from the returned byte count.
//!
//! On error the destination contents are unspecified.

use crate::descriptor::{Direction, McpDesc};
use crate::dma::CoherentRegion;
use crate::engine::{McpEngine, AES256_KEY_LEN};
use crate::error::{McpError, McpResult};
use crate::mode::{Algorithm, BlockMode, KeySelect};
use std::sync::Arc;

/// IV buffer size; DES family ciphers use the first 8 bytes.
pub const IV_LEN: usize = 16;

/// Cipher family. The key length picks the exact AES variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCipher {
    Aes,
    Des,
    TripleDes,
}

impl BlockCipher {
    pub const fn block_size(self) -> usize {
        match self {
            Self::Aes => 16,
            Self::Des | Self::TripleDes => 8,
        }
    }
}

#[derive(Clone)]
struct KeySetup {
    algo: Algorithm,
    select: KeySelect,
    words: [u32; 6],
    aes256: Option<[u8; AES256_KEY_LEN]>,
}

/// A request over scattered source and destination spans.
pub struct SgRequest<'a> {
    pub src: Vec<&'a [u8]>,
    pub dst: Vec<&'a mut [u8]>,
    pub iv: [u8; IV_LEN],
}

impl<'a> SgRequest<'a> {
    pub fn new(src: Vec<&'a [u8]>, dst: Vec<&'a mut [u8]>, iv: [u8; IV_LEN]) -> Self {
        Self { src, dst, iv }
    }

    /// Single-span request.
    pub fn contiguous(src: &'a [u8], dst: &'a mut [u8], iv: [u8; IV_LEN]) -> Self {
        Self::new(vec![src], vec![dst], iv)
    }

    fn src_len(&self) -> usize {
        self.src.iter().map(|s| s.len()).sum()
    }

    fn dst_len(&self) -> usize {
        self.dst.iter().map(|s| s.len()).sum()
    }
}

/// Sequential writer over the destination spans.
struct DstCursor<'r, 'a> {
    spans: &'r mut [&'a mut [u8]],
    idx: usize,
    off: usize,
}

impl DstCursor<'_, '_> {
    fn write(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let Some(span) = self.spans.get_mut(self.idx) else {
                return;
            };
            let room = span.len() - self.off;
            if room == 0 {
                self.idx += 1;
                self.off = 0;
                continue;
            }
            let n = room.min(data.len());
            span[self.off..self.off + n].copy_from_slice(&data[..n]);
            self.off += n;
            data = &data[n..];
        }
    }
}

/// Cipher transform bound to one engine.
pub struct McpCipher {
    engine: Arc<McpEngine>,
    cipher: BlockCipher,
    mode: BlockMode,
    key: Option<KeySetup>,
}

impl McpCipher {
    pub fn new(engine: Arc<McpEngine>, cipher: BlockCipher, mode: BlockMode) -> McpResult<Self> {
        match (cipher, mode) {
            (_, BlockMode::Ecb | BlockMode::Cbc) | (BlockCipher::Aes, BlockMode::Ctr) => {}
            _ => {
                return Err(McpError::InvalidArgument(format!(
                    "{:?} does not support {:?} mode",
                    cipher, mode
                )))
            }
        }
        Ok(Self {
            engine,
            cipher,
            mode,
            key: None,
        })
    }

    pub fn block_size(&self) -> usize {
        self.cipher.block_size()
    }

    pub fn iv_size(&self) -> usize {
        match self.mode {
            BlockMode::Ecb => 0,
            _ => self.block_size(),
        }
    }

    /// Set the key. `None` selects the engine's one-time-programmable key.
    pub fn set_key(&mut self, key: Option<&[u8]>) -> McpResult<()> {
        let Some(key) = key else {
            let algo = match self.cipher {
                BlockCipher::Aes => Algorithm::Aes,
                BlockCipher::Des => Algorithm::Des,
                BlockCipher::TripleDes => Algorithm::TripleDes,
            };
            self.key = Some(KeySetup {
                algo,
                select: KeySelect::Otp,
                words: [0; 6],
                aes256: None,
            });
            return Ok(());
        };

        let algo = match (self.cipher, key.len()) {
            (BlockCipher::Aes, 16) => Algorithm::Aes,
            (BlockCipher::Aes, 24) => Algorithm::Aes192,
            (BlockCipher::Aes, 32) => Algorithm::Aes256,
            (BlockCipher::Des, 8) => Algorithm::Des,
            (BlockCipher::TripleDes, 24) => Algorithm::TripleDes,
            (cipher, len) => {
                return Err(McpError::InvalidArgument(format!(
                    "invalid {:?} key length {}",
                    cipher, len
                )))
            }
        };

        // AES-256 keys do not fit the descriptor and go through the key cache
        if let Ok(raw) = <[u8; AES256_KEY_LEN]>::try_from(key) {
            self.key = Some(KeySetup {
                algo,
                select: KeySelect::Ddr,
                words: [0; 6],
                aes256: Some(raw),
            });
            return Ok(());
        }

        let mut words = [0u32; 6];
        for (w, chunk) in words.iter_mut().zip(key.chunks_exact(4)) {
            *w = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        self.key = Some(KeySetup {
            algo,
            select: KeySelect::Descriptor,
            words,
            aes256: None,
        });
        Ok(())
    }

    /// Algorithm selector the current key maps to.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.key.as_ref().map(|k| k.algo)
    }

    /// Encrypt the request; returns the number of bytes processed.
    pub fn encrypt(&self, req: &mut SgRequest<'_>) -> McpResult<usize> {
        self.crypt(req, Direction::Encrypt)
    }

    /// Decrypt the request; returns the number of bytes processed.
    pub fn decrypt(&self, req: &mut SgRequest<'_>) -> McpResult<usize> {
        self.crypt(req, Direction::Decrypt)
    }

    fn crypt(&self, req: &mut SgRequest<'_>, dir: Direction) -> McpResult<usize> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| McpError::InvalidArgument("no key set".into()))?;
        let bs = self.block_size();

        let total = req.src_len();
        if total == 0 {
            return Ok(0);
        }
        if total < bs {
            return Err(McpError::InvalidDescriptor {
                length: total as u32,
                block_size: bs as u32,
            });
        }
        // Only whole blocks are processed; the caller resubmits the tail
        let aligned = total - total % bs;
        let dst_len = req.dst_len();
        if dst_len < aligned {
            return Err(McpError::BufferSizeMismatch {
                expected: aligned,
                actual: dst_len,
            });
        }

        let SgRequest { src, dst, iv } = req;
        let mut out = DstCursor {
            spans: dst.as_mut_slice(),
            idx: 0,
            off: 0,
        };
        let mut carry: Vec<u8> = Vec::with_capacity(bs);
        let mut done = 0;

        for span in src.iter() {
            carry.extend_from_slice(span);
            let aligned = carry.len() - carry.len() % bs;
            if aligned == 0 {
                continue;
            }

            let output = self.run_chunk(key, dir, &carry[..aligned], iv)?;
            out.write(&output);
            done += aligned;
            carry.drain(..aligned);
        }

        Ok(done)
    }

    /// Submit one contiguous whole-block chunk and chain the IV.
    fn run_chunk(
        &self,
        key: &KeySetup,
        dir: Direction,
        input: &[u8],
        iv: &mut [u8; IV_LEN],
    ) -> McpResult<Vec<u8>> {
        let len = u32::try_from(input.len())
            .map_err(|_| McpError::InvalidArgument(format!("span of {} bytes", input.len())))?;

        let src = CoherentRegion::with_bytes(self.engine.dma_allocator(), input)?;
        let dst = self.engine.alloc_coherent(input.len())?;

        let mut desc = McpDesc::cipher(
            key.algo,
            self.mode,
            dir,
            src.dma_addr(),
            dst.dma_addr(),
            len,
        );
        desc.set_key_select(key.select);
        desc.key = key.words;
        if self.mode != BlockMode::Ecb {
            for (w, chunk) in desc.iv.iter_mut().zip(iv.chunks_exact(4)) {
                *w = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
        }

        {
            let mut engine = self.engine.lock()?;
            if let Some(raw) = &key.aes256 {
                desc.key = [0; 6];
                desc.key[0] = engine.load_aes256_key(raw);
            }
            engine.submit(&desc)?;
        }

        let output = dst.as_slice().to_vec();
        self.chain_iv(iv, dir, input, &output);
        Ok(output)
    }

    fn chain_iv(&self, iv: &mut [u8; IV_LEN], dir: Direction, input: &[u8], output: &[u8]) {
        let bs = self.block_size();
        match (self.mode, dir) {
            (BlockMode::Cbc, Direction::Encrypt) => {
                iv[..bs].copy_from_slice(&output[output.len() - bs..]);
            }
            (BlockMode::Cbc, Direction::Decrypt) => {
                iv[..bs].copy_from_slice(&input[input.len() - bs..]);
            }
            (BlockMode::Ctr, _) => {
                let blocks = (input.len() / bs) as u128;
                *iv = u128::from_be_bytes(*iv).wrapping_add(blocks).to_be_bytes();
            }
            _ => {}
        }
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::sim::{SimFault, SimPlatform, SIM_OTP_KEY};
    use std::time::Duration;

    const KEY128: [u8; 16] = *b"0123456789abcdef";

    fn engine(p: &SimPlatform) -> Arc<McpEngine> {
        let config = EngineConfig::default().with_poll_interval(Duration::ZERO);
        Arc::new(p.engine(config).unwrap())
    }

    fn xor(data: &[u8], key: &[u8]) -> Vec<u8> {
        data.iter()
            .enumerate()
            .map(|(i, b)| b ^ key[i % key.len()])
            .collect()
    }

    #[test]
    fn test_aes128_ecb_inline_key() {
        let p = SimPlatform::new();
        let mut c = McpCipher::new(engine(&p), BlockCipher::Aes, BlockMode::Ecb).unwrap();
        c.set_key(Some(&KEY128)).unwrap();

        let src: Vec<u8> = (0..64).collect();
        let mut dst = vec![0u8; 64];
        let mut req = SgRequest::contiguous(&src, &mut dst, [0; IV_LEN]);
        assert_eq!(c.encrypt(&mut req).unwrap(), 64);
        assert_eq!(dst, xor(&src, &KEY128));

        let desc = p.mcp.last_batch()[0];
        assert_eq!(desc.key_select(), KeySelect::Descriptor);
        assert_eq!(desc.key[0], 0x3031_3233);
        assert_eq!(desc.algorithm(), Some(Algorithm::Aes));
    }

    #[test]
    fn test_scattered_spans_carry_partial_blocks() {
        let p = SimPlatform::new();
        let mut c = McpCipher::new(engine(&p), BlockCipher::Aes, BlockMode::Ecb).unwrap();
        c.set_key(Some(&KEY128)).unwrap();

        let src: Vec<u8> = (100..132).collect();
        let (a, rest) = src.split_at(5);
        let (b, c3) = rest.split_at(20);
        let mut out = vec![0u8; 32];
        let (d0, d1) = out.split_at_mut(16);

        let mut req = SgRequest::new(vec![a, b, c3], vec![d0, d1], [0; IV_LEN]);
        assert_eq!(c.encrypt(&mut req).unwrap(), 32);
        assert_eq!(out, xor(&src, &KEY128));
        // 5 bytes carried, then 16 of 25, then 16 of 9 + 7
        assert_eq!(p.mcp.stats().dispatches, 2);
    }

    #[test]
    fn test_aes256_goes_through_key_cache() {
        let p = SimPlatform::new();
        let mut c = McpCipher::new(engine(&p), BlockCipher::Aes, BlockMode::Ecb).unwrap();
        let key: [u8; 32] = std::array::from_fn(|i| i as u8 * 7 + 1);
        c.set_key(Some(&key)).unwrap();
        assert_eq!(c.algorithm(), Some(Algorithm::Aes256));

        let src = [0x5au8; 48];
        let mut dst = [0u8; 48];
        c.encrypt(&mut SgRequest::contiguous(&src, &mut dst, [0; IV_LEN]))
            .unwrap();
        assert_eq!(dst.to_vec(), xor(&src, &key));

        let desc = p.mcp.last_batch()[0];
        assert_eq!(desc.key_select(), KeySelect::Ddr);
        assert_ne!(desc.key[0], 0);
        assert_eq!(desc.key[1..], [0; 5]);
    }

    #[test]
    fn test_concurrent_aes256_keys_do_not_mix() {
        let p = SimPlatform::new();
        let engine = engine(&p);

        let threads: Vec<_> = (0..8u8)
            .map(|t| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let key = [t.wrapping_mul(37).wrapping_add(3); 32];
                    let mut c = McpCipher::new(engine, BlockCipher::Aes, BlockMode::Cbc).unwrap();
                    c.set_key(Some(&key)).unwrap();
                    for i in 0..40u8 {
                        let src = [i; 32];
                        let mut dst = [0u8; 32];
                        c.encrypt(&mut SgRequest::contiguous(&src, &mut dst, [0; IV_LEN]))
                            .unwrap();
                        assert_eq!(dst.to_vec(), xor(&src, &key), "thread {t} op {i}");
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(p.mcp.stats().violations, 0);
    }

    #[test]
    fn test_otp_key_and_des() {
        let p = SimPlatform::new();
        let engine = engine(&p);

        let mut otp = McpCipher::new(Arc::clone(&engine), BlockCipher::Aes, BlockMode::Ecb).unwrap();
        otp.set_key(None).unwrap();
        let src = [0u8; 16];
        let mut dst = [0u8; 16];
        otp.encrypt(&mut SgRequest::contiguous(&src, &mut dst, [0; IV_LEN]))
            .unwrap();
        assert_eq!(dst, SIM_OTP_KEY[..16]);
        assert_eq!(p.mcp.last_batch()[0].key_select(), KeySelect::Otp);

        let mut des = McpCipher::new(engine, BlockCipher::Des, BlockMode::Cbc).unwrap();
        des.set_key(Some(b"8bytekey")).unwrap();
        let src = [1u8; 24];
        let mut dst = [0u8; 24];
        des.decrypt(&mut SgRequest::contiguous(&src, &mut dst, [0; IV_LEN]))
            .unwrap();
        assert_eq!(dst.to_vec(), xor(&src, b"8bytekey"));
        let desc = p.mcp.last_batch()[0];
        assert_eq!(desc.algorithm(), Some(Algorithm::Des));
        assert_eq!(desc.direction(), Direction::Decrypt);
    }

    #[test]
    fn test_cbc_iv_chaining() {
        let p = SimPlatform::new();
        let mut c = McpCipher::new(engine(&p), BlockCipher::Aes, BlockMode::Cbc).unwrap();
        c.set_key(Some(&KEY128)).unwrap();

        let src: Vec<u8> = (0..64).collect();
        let mut dst = vec![0u8; 64];
        let iv = [0x11; IV_LEN];
        let (s0, s1) = src.split_at(32);
        let mut req = SgRequest::new(vec![s0, s1], vec![&mut dst[..]], iv);
        c.encrypt(&mut req).unwrap();
        let final_iv = req.iv;
        drop(req);

        // Second span was submitted with the last ciphertext block as IV
        assert_eq!(&final_iv[..], &dst[48..64]);
        let second = p.mcp.last_batch()[0];
        assert_eq!(second.iv[0], u32::from_be_bytes(dst[16..20].try_into().unwrap()));

        let mut back = vec![0u8; 64];
        let mut req = SgRequest::contiguous(&dst, &mut back, iv);
        c.decrypt(&mut req).unwrap();
        assert_eq!(&req.iv[..], &dst[48..64]);
    }

    #[test]
    fn test_ctr_counter_advances() {
        let p = SimPlatform::new();
        let mut c = McpCipher::new(engine(&p), BlockCipher::Aes, BlockMode::Ctr).unwrap();
        c.set_key(Some(&KEY128)).unwrap();

        let mut iv = [0u8; IV_LEN];
        iv[8..].copy_from_slice(&[0xff; 8]);
        let src = [0u8; 48];
        let mut dst = [0u8; 48];
        let mut req = SgRequest::contiguous(&src, &mut dst, iv);
        c.encrypt(&mut req).unwrap();

        let mut expect = [0u8; IV_LEN];
        expect[7] = 1;
        expect[15] = 2;
        assert_eq!(req.iv, expect);
    }

    #[test]
    fn test_trailing_partial_block_left_untouched() {
        let p = SimPlatform::new();
        let mut c = McpCipher::new(engine(&p), BlockCipher::Aes, BlockMode::Ecb).unwrap();
        c.set_key(Some(&KEY128)).unwrap();

        let src: Vec<u8> = (1..=20).collect();
        let mut dst = [0xeeu8; 20];
        let done = c
            .encrypt(&mut SgRequest::contiguous(&src, &mut dst, [0; IV_LEN]))
            .unwrap();
        assert_eq!(done, 16);
        assert_eq!(dst[..16], xor(&src[..16], &KEY128)[..]);
        assert_eq!(dst[16..], [0xee; 4]);
        assert_eq!(p.mcp.stats().dispatches, 1);

        // A destination sized for the whole blocks is enough
        let mut exact = [0u8; 16];
        let (a, b) = src.split_at(10);
        let done = c
            .encrypt(&mut SgRequest::new(vec![a, b], vec![&mut exact[..]], [0; IV_LEN]))
            .unwrap();
        assert_eq!(done, 16);
        assert_eq!(exact.to_vec(), xor(&src[..16], &KEY128));
    }

    #[test]
    fn test_rejected_requests() {
        let p = SimPlatform::new();
        let engine = engine(&p);

        assert!(McpCipher::new(Arc::clone(&engine), BlockCipher::Des, BlockMode::Ctr).is_err());
        assert!(McpCipher::new(Arc::clone(&engine), BlockCipher::Aes, BlockMode::Rc4).is_err());

        let mut c = McpCipher::new(engine, BlockCipher::Aes, BlockMode::Ecb).unwrap();
        let src = [0u8; 20];
        let mut dst = [0u8; 32];
        assert!(c
            .encrypt(&mut SgRequest::contiguous(&src[..16], &mut dst, [0; IV_LEN]))
            .is_err());
        assert!(c.set_key(Some(&[0; 17])).is_err());
        c.set_key(Some(&KEY128)).unwrap();

        assert!(matches!(
            c.encrypt(&mut SgRequest::contiguous(&src[..8], &mut dst, [0; IV_LEN])),
            Err(McpError::InvalidDescriptor {
                length: 8,
                block_size: 16
            })
        ));
        let mut short = [0u8; 8];
        assert!(matches!(
            c.encrypt(&mut SgRequest::contiguous(&src, &mut short, [0; IV_LEN])),
            Err(McpError::BufferSizeMismatch {
                expected: 16,
                actual: 8
            })
        ));
        assert_eq!(c.encrypt(&mut SgRequest::contiguous(&[], &mut [], [0; IV_LEN])).unwrap(), 0);
        assert_eq!(p.mcp.stats().dispatches, 0);

        p.mcp.push_fault(SimFault::Error(0));
        assert!(matches!(
            c.encrypt(&mut SgRequest::contiguous(&src[..16], &mut dst, [0; IV_LEN])),
            Err(McpError::EngineReportedError { .. })
        ));
        assert_eq!(p.mem.live(), 1);
    }
}
