// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! DMA-coherent scratch memory.
//!
//! Descriptor rings, bounce buffers and the AES-256 key cache all live in
//! memory the engine can address with 32-bit bus addresses. Allocations are
//! owned by [`CoherentRegion`], which frees them exactly once when dropped.

use crate::error::{McpError, McpResult};
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::Arc;

/// Bus address as seen by the engine.
pub type DmaAddr = u32;

/// Alignment of every coherent allocation.
pub const DMA_ALIGN: u32 = 64;

/// Raw coherent allocation: CPU pointer plus bus address.
#[derive(Debug)]
pub struct DmaBuffer {
    cpu: NonNull<u8>,
    dma: DmaAddr,
    len: usize,
}

// SAFETY: a DmaBuffer is the unique owner of its bytes until it is handed
// back to the allocator that produced it.
unsafe impl Send for DmaBuffer {}

impl DmaBuffer {
    /// # Safety
    ///
    /// `cpu` must point to `len` bytes that stay valid and exclusively owned
    /// by the returned value until it is passed to `free_coherent`, and the
    /// engine must see those bytes at `dma`.
    pub unsafe fn from_raw(cpu: NonNull<u8>, dma: DmaAddr, len: usize) -> Self {
        Self { cpu, dma, len }
    }

    #[inline]
    pub fn dma_addr(&self) -> DmaAddr {
        self.dma
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn cpu_ptr(&self) -> NonNull<u8> {
        self.cpu
    }
}

/// Source of DMA-coherent memory for one engine.
pub trait DmaAllocator: Send + Sync {
    /// Allocate `len` zeroed bytes reachable by the engine.
    fn alloc_coherent(&self, len: usize) -> McpResult<DmaBuffer>;

    /// Return an allocation. Called exactly once per successful
    /// `alloc_coherent`.
    fn free_coherent(&self, buf: DmaBuffer);
}

/// Scoped ownership of one coherent allocation.
pub struct CoherentRegion {
    alloc: Arc<dyn DmaAllocator>,
    buf: Option<DmaBuffer>,
}

impl CoherentRegion {
    pub fn new(alloc: &Arc<dyn DmaAllocator>, len: usize) -> McpResult<Self> {
        let buf = alloc.alloc_coherent(len)?;
        Ok(Self {
            alloc: Arc::clone(alloc),
            buf: Some(buf),
        })
    }

    /// Allocate and fill with `data`.
    pub fn with_bytes(alloc: &Arc<dyn DmaAllocator>, data: &[u8]) -> McpResult<Self> {
        let mut region = Self::new(alloc, data.len())?;
        region.as_mut_slice().copy_from_slice(data);
        Ok(region)
    }

    #[inline]
    pub fn dma_addr(&self) -> DmaAddr {
        self.buf.as_ref().map_or(0, DmaBuffer::dma_addr)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.as_ref().map_or(0, DmaBuffer::len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.buf {
            // SAFETY: the buffer is exclusively owned and `len` bytes long.
            Some(b) => unsafe { std::slice::from_raw_parts(b.cpu.as_ptr(), b.len) },
            None => &[],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.buf {
            // SAFETY: as above, and `&mut self` guarantees no other borrow.
            Some(b) => unsafe { std::slice::from_raw_parts_mut(b.cpu.as_ptr(), b.len) },
            None => &mut [],
        }
    }
}

impl Drop for CoherentRegion {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.alloc.free_coherent(buf);
        }
    }
}

impl std::fmt::Debug for CoherentRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoherentRegion")
            .field("dma_addr", &format_args!("{:#010x}", self.dma_addr()))
            .field("len", &self.len())
            .finish()
    }
}

/// First-fit allocator over a window of bus addresses.
///
/// Only does the bookkeeping; backing memory is provided by the caller.
#[derive(Debug)]
pub struct RangeAllocator {
    /// start -> length of every free range, coalesced.
    free: BTreeMap<u64, u64>,
    /// start -> length of every live allocation.
    live: BTreeMap<u64, u64>,
}

impl RangeAllocator {
    /// Manage `[base, base + size)`. The window must lie below 4 GiB.
    pub fn new(base: DmaAddr, size: u32) -> McpResult<Self> {
        if size == 0 || base as u64 + size as u64 > 1 << 32 {
            return Err(McpError::InvalidArgument(format!(
                "dma window {:#x}+{:#x} outside 32-bit bus",
                base, size
            )));
        }
        let mut free = BTreeMap::new();
        free.insert(base as u64, size as u64);
        Ok(Self {
            free,
            live: BTreeMap::new(),
        })
    }

    /// Reserve `len` bytes aligned to [`DMA_ALIGN`].
    pub fn alloc(&mut self, len: usize) -> Option<DmaAddr> {
        let align = DMA_ALIGN as u64;
        let len = (len.max(1) as u64).checked_add(align - 1)? & !(align - 1);

        let (start, flen, at) = self.free.iter().find_map(|(&start, &flen)| {
            let at = (start + align - 1) & !(align - 1);
            (at + len <= start + flen).then_some((start, flen, at))
        })?;

        self.free.remove(&start);
        if at > start {
            self.free.insert(start, at - start);
        }
        if at + len < start + flen {
            self.free.insert(at + len, start + flen - (at + len));
        }
        self.live.insert(at, len);
        Some(at as DmaAddr)
    }

    /// Release an allocation. Returns false if `addr` is not live.
    pub fn free(&mut self, addr: DmaAddr) -> bool {
        let Some(mut len) = self.live.remove(&(addr as u64)) else {
            return false;
        };
        let mut start = addr as u64;

        if let Some((&prev, &plen)) = self.free.range(..start).next_back() {
            if prev + plen == start {
                self.free.remove(&prev);
                start = prev;
                len += plen;
            }
        }
        if let Some(&nlen) = self.free.get(&(start + len)) {
            self.free.remove(&(start + len));
            len += nlen;
        }
        self.free.insert(start, len);
        true
    }

    /// Number of live allocations.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Rounded size of the live allocation at `addr`.
    pub fn live_len(&self, addr: DmaAddr) -> Option<usize> {
        self.live.get(&(addr as u64)).map(|&l| l as usize)
    }
}

// ============================================================================
// Linux Implementation
// ============================================================================

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;
    use std::fs::File;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;
    use std::sync::Mutex;

    /// Coherent allocator over a physically contiguous reserved-memory
    /// carve-out mapped uncached from a device node (`/dev/mem`, a UIO map
    /// or a `udmabuf` export).
    pub struct Carveout {
        #[allow(dead_code)]
        file: File,
        map: *mut u8,
        bus_base: DmaAddr,
        size: u32,
        ranges: Mutex<RangeAllocator>,
    }

    // SAFETY: the mapping is owned for the lifetime of the allocator and the
    // range bookkeeping is behind a mutex; handed-out buffers never overlap.
    unsafe impl Send for Carveout {}
    unsafe impl Sync for Carveout {}

    impl Carveout {
        /// Map `size` bytes at file offset `offset` of `path`; the engine sees
        /// the first byte at `bus_base`.
        pub fn open(path: &Path, offset: u64, bus_base: DmaAddr, size: u32) -> McpResult<Self> {
            let ranges = RangeAllocator::new(bus_base, size)?;

            let file = File::options()
                .read(true)
                .write(true)
                .custom_flags(libc::O_SYNC)
                .open(path)
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        McpError::PermissionDenied(path.display().to_string())
                    } else {
                        McpError::Io(e)
                    }
                })?;

            let map = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size as usize,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    offset as libc::off_t,
                )
            };

            if map == libc::MAP_FAILED {
                return Err(McpError::MmapFailed(format!(
                    "mmap of dma carve-out failed for {}",
                    path.display()
                )));
            }

            Ok(Self {
                file,
                map: map as *mut u8,
                bus_base,
                size,
                ranges: Mutex::new(ranges),
            })
        }
    }

    impl DmaAllocator for Carveout {
        fn alloc_coherent(&self, len: usize) -> McpResult<DmaBuffer> {
            let mut ranges = self.ranges.lock().unwrap_or_else(|e| e.into_inner());
            let dma = ranges
                .alloc(len)
                .ok_or(McpError::AllocationFailed { size: len })?;
            drop(ranges);

            let offset = (dma - self.bus_base) as usize;
            // SAFETY: `offset + len` lies within the mapping, and the range
            // allocator never hands out the same bytes twice.
            unsafe {
                let cpu = self.map.add(offset);
                std::ptr::write_bytes(cpu, 0, len);
                Ok(DmaBuffer::from_raw(NonNull::new_unchecked(cpu), dma, len))
            }
        }

        fn free_coherent(&self, buf: DmaBuffer) {
            let mut ranges = self.ranges.lock().unwrap_or_else(|e| e.into_inner());
            if !ranges.free(buf.dma_addr()) {
                log::error!("free of unknown dma buffer {:#010x}", buf.dma_addr());
            }
        }
    }

    impl Drop for Carveout {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.map as *mut libc::c_void, self.size as usize);
            }
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux_impl::Carveout;
