// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Software model of the MCP engine.
//!
//! [`SimMcp`] implements the register block closely enough to run the real
//! ring protocol against it: CTRL write-data semantics, write-1-to-clear
//! STATUS, a self-clearing CLEAR bit, GO that drops once the loaded
//! descriptors have been executed. Faults can be queued per dispatch.
//!
//! The "crypto" is deliberately fake: ciphers XOR the data with the key and
//! hash transforms fold each block into the chaining state. That is enough to
//! tell keys, states and byte counts apart in tests.
//!
//! The model also watches for two threads interleaving register accesses
//! while one of them is between programming a non-zero ring base and clearing
//! status after the dispatch, and counts each such access as a violation.

use crate::descriptor::{McpDesc, DESC_SIZE};
use crate::dma::{DmaAddr, DmaAllocator, DmaBuffer, RangeAllocator};
use crate::dmabuf::{DmaBufImporter, DmaBufMapping, DmaSegment};
use crate::engine::{EngineConfig, McpEngine};
use crate::error::{McpError, McpResult};
use crate::hwlock::HwSpinlock;
use crate::mode::{Algorithm, KeySelect};
use crate::regs::*;
use std::cell::UnsafeCell;
use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

/// Key the model uses when a descriptor selects the OTP key.
pub const SIM_OTP_KEY: [u8; 32] = *b"sim-otp-key-0123456789abcdefghij";

// ===== DMA memory =====

/// Heap-backed bus window with allocation accounting.
pub struct SimMemory {
    base: DmaAddr,
    mem: Box<[UnsafeCell<u8>]>,
    ranges: Mutex<RangeAllocator>,
    allocs: AtomicUsize,
    frees: AtomicUsize,
    fail_next: AtomicUsize,
}

// SAFETY: the byte array is only reached through raw pointers. Allocations
// never overlap, and the model only touches a buffer while its owner is
// blocked in a dispatch.
unsafe impl Send for SimMemory {}
unsafe impl Sync for SimMemory {}

impl SimMemory {
    /// Window of `size` bytes that the engine sees at `base`.
    ///
    /// # Panics
    ///
    /// If the window is empty or does not fit below 4 GiB.
    pub fn new(base: DmaAddr, size: u32) -> Self {
        let ranges = match RangeAllocator::new(base, size) {
            Ok(r) => r,
            Err(e) => panic!("bad sim window: {e}"),
        };
        Self {
            base,
            mem: (0..size).map(|_| UnsafeCell::new(0)).collect(),
            ranges: Mutex::new(ranges),
            allocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` allocations fail.
    pub fn fail_allocs(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn allocs(&self) -> usize {
        self.allocs.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    /// Allocations not yet freed.
    pub fn live(&self) -> usize {
        self.ranges.lock().unwrap_or_else(|e| e.into_inner()).live_count()
    }

    fn ptr(&self, addr: DmaAddr, len: usize) -> Option<*mut u8> {
        let offset = addr.checked_sub(self.base)? as usize;
        if offset.checked_add(len)? > self.mem.len() {
            return None;
        }
        Some(UnsafeCell::raw_get(self.mem[offset..].as_ptr()))
    }

    /// Copy bytes out of the bus window. False if out of range.
    pub fn read(&self, addr: DmaAddr, out: &mut [u8]) -> bool {
        match self.ptr(addr, out.len()) {
            Some(p) => {
                // SAFETY: range checked above.
                unsafe { std::ptr::copy_nonoverlapping(p, out.as_mut_ptr(), out.len()) };
                true
            }
            None => false,
        }
    }

    /// Copy bytes into the bus window. False if out of range.
    pub fn write(&self, addr: DmaAddr, data: &[u8]) -> bool {
        match self.ptr(addr, data.len()) {
            Some(p) => {
                // SAFETY: range checked above.
                unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), p, data.len()) };
                true
            }
            None => false,
        }
    }
}

impl DmaAllocator for SimMemory {
    fn alloc_coherent(&self, len: usize) -> McpResult<DmaBuffer> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(McpError::AllocationFailed { size: len });
        }

        let dma = self
            .ranges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .alloc(len)
            .ok_or(McpError::AllocationFailed { size: len })?;
        let cpu = self
            .ptr(dma, len)
            .and_then(NonNull::new)
            .ok_or(McpError::AllocationFailed { size: len })?;

        // SAFETY: the range allocator handed out [dma, dma + len) to nobody
        // else, and it lies inside the window.
        unsafe { std::ptr::write_bytes(cpu.as_ptr(), 0, len) };
        self.allocs.fetch_add(1, Ordering::SeqCst);
        Ok(unsafe { DmaBuffer::from_raw(cpu, dma, len) })
    }

    fn free_coherent(&self, buf: DmaBuffer) {
        let known = self
            .ranges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .free(buf.dma_addr());
        if !known {
            log::error!("sim: free of unknown dma buffer {:#010x}", buf.dma_addr());
        }
        self.frees.fetch_add(1, Ordering::SeqCst);
    }
}

// ===== Register model =====

/// Fault applied to one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// GO never drops and no status bit is raised.
    Hang,
    /// Stop without executing, with ERROR plus the given bits in STATUS.
    Error(u32),
    /// Execute normally, then raise the given extra STATUS bits.
    Status(u32),
}

/// Counters exposed by the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimStats {
    /// GO rising edges.
    pub dispatches: usize,
    /// Descriptors executed.
    pub descriptors: usize,
    /// CTRL reads while GO was up.
    pub go_polls: usize,
    /// Times the driver had to force the CLEAR bit off.
    pub clear_forced: usize,
    /// Register accesses from a thread other than the one mid-dispatch.
    pub violations: usize,
}

struct Pending {
    remaining: u32,
    fault: Option<SimFault>,
}

struct Inner {
    regs: [u32; MCP_REG_SPAN / 4],
    faults: VecDeque<SimFault>,
    pending: Option<Pending>,
    latency: u32,
    clear_stuck: bool,
    owner: Option<ThreadId>,
    dispatched: bool,
    last_batch: Vec<McpDesc>,
    stats: SimStats,
}

impl Inner {
    fn get(&self, offset: u32) -> u32 {
        self.regs.get(offset as usize / 4).copied().unwrap_or(0)
    }

    fn set(&mut self, offset: u32, value: u32) {
        if let Some(r) = self.regs.get_mut(offset as usize / 4) {
            *r = value;
        }
    }

    fn check_owner(&mut self) {
        let me = std::thread::current().id();
        if matches!(self.owner, Some(owner) if owner != me) {
            self.stats.violations += 1;
        }
    }
}

/// Register-level model of one engine.
pub struct SimMcp {
    mem: Arc<SimMemory>,
    inner: Mutex<Inner>,
}

impl SimMcp {
    pub fn new(mem: Arc<SimMemory>) -> Self {
        Self {
            mem,
            inner: Mutex::new(Inner {
                regs: [0; MCP_REG_SPAN / 4],
                faults: VecDeque::new(),
                pending: None,
                latency: 1,
                clear_stuck: false,
                owner: None,
                dispatched: false,
                last_batch: Vec::new(),
                stats: SimStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a fault for the next dispatch that has none yet.
    pub fn push_fault(&self, fault: SimFault) {
        self.lock().faults.push_back(fault);
    }

    /// Number of GO polls before a dispatch completes (at least one).
    pub fn set_latency(&self, polls: u32) {
        self.lock().latency = polls.max(1);
    }

    /// Keep the CLEAR bit latched until the driver writes it off.
    pub fn set_clear_stuck(&self, stuck: bool) {
        self.lock().clear_stuck = stuck;
    }

    pub fn stats(&self) -> SimStats {
        self.lock().stats
    }

    /// Register value without side effects.
    pub fn peek(&self, offset: u32) -> u32 {
        self.lock().get(offset)
    }

    /// Whether hash auto padding is currently enabled in CTRL1.
    pub fn auto_padding(&self) -> bool {
        self.peek(MCP_CTRL1) & CTRL1_AUTO_PADDING_OFF == 0
    }

    /// Descriptors executed by the most recent successful dispatch.
    pub fn last_batch(&self) -> Vec<McpDesc> {
        self.lock().last_batch.clone()
    }

    fn write_ctrl(&self, inner: &mut Inner, value: u32) {
        let old = inner.get(MCP_CTRL);
        let bits = value & !CtrlBits::WRITE_DATA.bits();

        if value & CtrlBits::WRITE_DATA.bits() != 0 {
            let mut ctrl = old | bits;
            if bits & CtrlBits::CLEAR.bits() != 0 && !inner.clear_stuck {
                ctrl &= !CtrlBits::CLEAR.bits();
            }
            inner.set(MCP_CTRL, ctrl);

            if bits & CtrlBits::GO.bits() != 0 && old & CtrlBits::GO.bits() == 0 {
                inner.stats.dispatches += 1;
                inner.dispatched = true;
                inner.pending = Some(Pending {
                    remaining: inner.latency,
                    fault: inner.faults.pop_front(),
                });
            }
        } else {
            if bits & old & CtrlBits::CLEAR.bits() != 0 {
                inner.stats.clear_forced += 1;
            }
            if bits & CtrlBits::GO.bits() != 0 {
                inner.pending = None;
            }
            inner.set(MCP_CTRL, old & !bits);
        }
    }

    fn poll_ctrl(&self, inner: &mut Inner) {
        if inner.get(MCP_CTRL) & CtrlBits::GO.bits() == 0 {
            return;
        }
        inner.stats.go_polls += 1;

        let Some(pending) = inner.pending.as_mut() else {
            return;
        };
        if pending.fault == Some(SimFault::Hang) {
            return;
        }
        pending.remaining = pending.remaining.saturating_sub(1);
        if pending.remaining > 0 {
            return;
        }

        let fault = pending.fault;
        inner.pending = None;
        let mut status = StatusBits::RING_EMPTY.bits();
        match fault {
            Some(SimFault::Error(bits)) => status |= StatusBits::ERROR.bits() | bits,
            Some(SimFault::Status(bits)) => {
                self.run_ring(inner);
                status |= bits;
            }
            _ => self.run_ring(inner),
        }

        let wrptr = inner.get(MCP_WRPTR);
        inner.set(MCP_RDPTR, wrptr);
        inner.set(MCP_STATUS, inner.get(MCP_STATUS) | status);
        inner.set(MCP_CTRL, inner.get(MCP_CTRL) & !CtrlBits::GO.bits());
    }

    fn run_ring(&self, inner: &mut Inner) {
        let mut addr = inner.get(MCP_RDPTR);
        let end = inner.get(MCP_WRPTR);
        let mut batch = Vec::new();

        while addr < end {
            let mut bytes = [0u8; DESC_SIZE];
            if !self.mem.read(addr, &mut bytes) {
                log::error!("sim: descriptor at {:#010x} outside dma window", addr);
                break;
            }
            let desc = McpDesc::from_bytes(&bytes);
            self.run_desc(&desc);
            batch.push(desc);
            addr += DESC_SIZE as u32;
        }

        inner.stats.descriptors += batch.len();
        inner.last_batch = batch;
    }

    fn run_desc(&self, desc: &McpDesc) {
        let Some(algo) = desc.algorithm() else {
            return;
        };
        if desc.length == 0 {
            return;
        }
        if algo.is_hash() {
            self.run_hash(desc, algo);
        } else {
            self.run_cipher(desc, algo);
        }
    }

    fn run_cipher(&self, desc: &McpDesc, algo: Algorithm) {
        let key = self.key_bytes(desc, algo);
        let len = desc.block_aligned_length() as usize;
        let mut data = vec![0u8; len];
        if key.is_empty() || !self.mem.read(desc.src, &mut data) {
            return;
        }
        for (i, b) in data.iter_mut().enumerate() {
            *b ^= key[i % key.len()];
        }
        self.mem.write(desc.dst, &data);
    }

    fn key_bytes(&self, desc: &McpDesc, algo: Algorithm) -> Vec<u8> {
        let len = match algo {
            Algorithm::Des => 8,
            Algorithm::TripleDes | Algorithm::Aes192 => 24,
            Algorithm::Aes256 => 32,
            _ => 16,
        };
        match desc.key_select() {
            KeySelect::Descriptor => words_be(&desc.key).into_iter().take(len).collect(),
            KeySelect::Otp => SIM_OTP_KEY[..len].to_vec(),
            KeySelect::Ddr => {
                let mut key = vec![0u8; len];
                if self.mem.read(desc.key[0], &mut key) {
                    key
                } else {
                    Vec::new()
                }
            }
            KeySelect::ControlWord => vec![0; len],
        }
    }

    fn run_hash(&self, desc: &McpDesc, algo: Algorithm) {
        let mut state = match algo {
            Algorithm::Md5 => words_be(&desc.key[..4]),
            Algorithm::Sha1 => words_be(&desc.key[..5]),
            Algorithm::Sha256 => {
                let mut s = words_be(&desc.key);
                s.extend(words_be(&desc.iv[..2]));
                s
            }
            _ => {
                let mut s = vec![0u8; 64];
                if !self.mem.read(desc.key[0], &mut s) {
                    return;
                }
                s
            }
        };

        let len = desc.block_aligned_length() as usize;
        let mut data = vec![0u8; len];
        if !self.mem.read(desc.src, &mut data) {
            return;
        }
        for block in data.chunks_exact(algo.block_size() as usize) {
            let n = state.len();
            for (j, b) in block.iter().enumerate() {
                state[j % n] = state[j % n].rotate_left(3) ^ b;
            }
        }
        self.mem.write(desc.dst, &state);
    }
}

fn words_be(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

impl RegisterIo for SimMcp {
    fn read(&self, offset: u32) -> u32 {
        let mut inner = self.lock();
        inner.check_owner();
        if offset == MCP_CTRL {
            self.poll_ctrl(&mut inner);
        }
        inner.get(offset)
    }

    fn write(&self, offset: u32, value: u32) {
        let mut inner = self.lock();
        inner.check_owner();
        match offset {
            MCP_CTRL => self.write_ctrl(&mut inner, value),
            MCP_STATUS => {
                let status = inner.get(MCP_STATUS) & !value;
                inner.set(MCP_STATUS, status);
                if inner.dispatched && inner.get(MCP_CTRL) & CtrlBits::GO.bits() == 0 {
                    inner.owner = None;
                    inner.dispatched = false;
                }
            }
            MCP_BASE => {
                // A non-zero base starts a ring program, a zero base resets it
                inner.owner = (value != 0).then(|| std::thread::current().id());
                inner.dispatched = false;
                inner.set(offset, value);
            }
            _ => inner.set(offset, value),
        }
    }
}

// ===== Hardware spinlock =====

/// In-memory stand-in for a cross-processor hardware spinlock.
#[derive(Debug, Default)]
pub struct SimHwSpinlock {
    held: AtomicBool,
    acquisitions: AtomicUsize,
}

impl SimHwSpinlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock on behalf of a remote processor.
    pub fn hold_remote(&self) -> bool {
        !self.held.swap(true, Ordering::SeqCst)
    }

    pub fn release_remote(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Successful local acquisitions.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl HwSpinlock for SimHwSpinlock {
    fn try_lock(&self) -> bool {
        let taken = !self.held.swap(true, Ordering::SeqCst);
        if taken {
            self.acquisitions.fetch_add(1, Ordering::SeqCst);
        }
        taken
    }

    fn unlock(&self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

// ===== dma-buf exporter =====

/// Hands out fake buffer fds and maps them to preset segment lists.
#[derive(Debug)]
pub struct SimDmaBufs {
    bufs: Mutex<HashMap<i32, Vec<DmaSegment>>>,
    next_fd: AtomicI32,
    maps: AtomicUsize,
    unmaps: AtomicUsize,
}

impl Default for SimDmaBufs {
    fn default() -> Self {
        Self {
            bufs: Mutex::new(HashMap::new()),
            next_fd: AtomicI32::new(100),
            maps: AtomicUsize::new(0),
            unmaps: AtomicUsize::new(0),
        }
    }
}

impl SimDmaBufs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Export a buffer with the given segment list and return its fd.
    pub fn export(&self, segments: Vec<DmaSegment>) -> i32 {
        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        self.bufs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(fd, segments);
        fd
    }

    /// Export one contiguous buffer.
    pub fn export_contiguous(&self, addr: u64, len: u32) -> i32 {
        self.export(vec![DmaSegment { addr, len }])
    }

    /// Mappings created minus mappings torn down.
    pub fn mapped(&self) -> usize {
        self.maps.load(Ordering::SeqCst) - self.unmaps.load(Ordering::SeqCst)
    }
}

impl DmaBufImporter for SimDmaBufs {
    fn map(&self, fd: i32) -> McpResult<DmaBufMapping> {
        let segments = self
            .bufs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&fd)
            .cloned()
            .ok_or_else(|| McpError::InvalidArgument(format!("fd {fd} is not a dma-buf")))?;
        self.maps.fetch_add(1, Ordering::SeqCst);
        Ok(DmaBufMapping {
            id: fd as u64,
            segments,
        })
    }

    fn unmap(&self, _mapping: &DmaBufMapping) {
        self.unmaps.fetch_add(1, Ordering::SeqCst);
    }
}

// ===== Assembled platform =====

/// Default bus address of the simulated DMA window.
pub const SIM_DMA_BASE: DmaAddr = 0x4000_0000;

/// Default size of the simulated DMA window.
pub const SIM_DMA_SIZE: u32 = 1 << 20;

/// A simulated engine with all its collaborators.
pub struct SimPlatform {
    pub mem: Arc<SimMemory>,
    pub mcp: Arc<SimMcp>,
    pub hwlock: Arc<SimHwSpinlock>,
    pub bufs: Arc<SimDmaBufs>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPlatform {
    pub fn new() -> Self {
        let mem = Arc::new(SimMemory::new(SIM_DMA_BASE, SIM_DMA_SIZE));
        Self {
            mcp: Arc::new(SimMcp::new(Arc::clone(&mem))),
            mem,
            hwlock: Arc::new(SimHwSpinlock::new()),
            bufs: Arc::new(SimDmaBufs::new()),
        }
    }

    /// Bring up an engine on the model, wired to the simulated hw spinlock
    /// and dma-buf exporter.
    pub fn engine(&self, config: EngineConfig) -> McpResult<McpEngine> {
        Ok(
            McpEngine::new(self.mcp.clone(), self.mem.clone(), config)?
                .with_hwspinlock(self.hwlock.clone())
                .with_importer(self.bufs.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ctrl_write_data_semantics() {
        let sim = SimMcp::new(Arc::new(SimMemory::new(SIM_DMA_BASE, 0x1000)));
        sim.write(MCP_CTRL, (CtrlBits::SWAP | CtrlBits::WRITE_DATA).bits());
        assert_eq!(sim.peek(MCP_CTRL), CtrlBits::SWAP.bits());

        // CLEAR drops by itself unless stuck
        sim.write(MCP_CTRL, (CtrlBits::CLEAR | CtrlBits::WRITE_DATA).bits());
        assert_eq!(sim.read(MCP_CTRL) & CtrlBits::CLEAR.bits(), 0);

        sim.write(MCP_CTRL, CtrlBits::SWAP.bits());
        assert_eq!(sim.peek(MCP_CTRL), 0);
    }

    #[test]
    fn test_status_is_write_one_to_clear() {
        let sim = SimMcp::new(Arc::new(SimMemory::new(SIM_DMA_BASE, 0x1000)));
        {
            let mut inner = sim.lock();
            inner.set(MCP_STATUS, 0b1111);
        }
        sim.write(MCP_STATUS, 0b0110);
        assert_eq!(sim.peek(MCP_STATUS), 0b1001);
        sim.write(MCP_STATUS, IRQ_ALL);
        assert_eq!(sim.peek(MCP_STATUS), 0b0001);
    }

    #[test]
    fn test_memory_accounting() {
        let mem: Arc<dyn DmaAllocator> = Arc::new(SimMemory::new(SIM_DMA_BASE, 0x1000));
        let a = mem.alloc_coherent(100).unwrap();
        let b = mem.alloc_coherent(100).unwrap();
        assert_ne!(a.dma_addr(), b.dma_addr());
        mem.free_coherent(a);
        mem.free_coherent(b);
        assert!(mem.alloc_coherent(0x2000).is_err());
    }

    #[test]
    fn test_fail_allocs_counts_down() {
        let mem = SimMemory::new(SIM_DMA_BASE, 0x1000);
        mem.fail_allocs(2);
        assert!(mem.alloc_coherent(8).is_err());
        assert!(mem.alloc_coherent(8).is_err());
        let buf = mem.alloc_coherent(8).unwrap();
        mem.free_coherent(buf);
        assert_eq!((mem.allocs(), mem.frees(), mem.live()), (1, 1, 0));
    }

    #[test]
    fn test_spinlock_remote_holder() {
        let lock = SimHwSpinlock::new();
        assert!(lock.hold_remote());
        assert!(!lock.try_lock());
        lock.release_remote();
        assert!(lock.try_lock());
        assert_eq!(lock.acquisitions(), 1);
        lock.unlock();
        assert!(!lock.is_held());
    }
}
