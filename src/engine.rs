// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! High-level MCP engine API.

use crate::chip::ChipVariant;
use crate::descriptor::McpDesc;
use crate::dma::{CoherentRegion, DmaAddr, DmaAllocator};
use crate::dmabuf::DmaBufImporter;
use crate::error::{McpError, McpResult};
use crate::hwlock::{HwLock, HwLockGuard, HwSpinlock, Interrupt, DEFAULT_HWLOCK_RETRY};
use crate::regs::*;
use crate::ring::{PollPolicy, Ring};
use std::sync::Arc;
use std::time::Duration;

/// Size of the AES-256 key cache.
pub const AES256_KEY_LEN: usize = 32;

/// Default number of descriptors per ring load.
pub const DEFAULT_BATCH_CHUNK: usize = 64;

/// Default limit on descriptors accepted by one batch call.
pub const DEFAULT_BATCH_MAX: usize = 1024;

/// Time the engine is given to stop before the ring is torn down.
const TEARDOWN_SETTLE: Duration = Duration::from_millis(10);

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Hardware revision; selects how completion status is decoded.
    pub chip_variant: ChipVariant,
    pub poll: PollPolicy,
    /// Back-off between attempts on a contended engine lock.
    pub hwlock_retry: Duration,
    /// Descriptors per hardware-visible ring load.
    pub batch_chunk: usize,
    /// Largest batch accepted by `submit_batch`.
    pub batch_max: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chip_variant: ChipVariant::default(),
            poll: PollPolicy::default(),
            hwlock_retry: DEFAULT_HWLOCK_RETRY,
            batch_chunk: DEFAULT_BATCH_CHUNK,
            batch_max: DEFAULT_BATCH_MAX,
        }
    }
}

impl EngineConfig {
    pub fn with_chip_variant(mut self, variant: ChipVariant) -> Self {
        self.chip_variant = variant;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Set the number of status polls before a dispatch times out.
    pub fn with_max_polls(mut self, polls: u32) -> Self {
        self.poll.max_polls = polls;
        self
    }

    /// Set the delay between status polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll.poll_interval = interval;
        self
    }

    pub fn with_hwlock_retry(mut self, retry: Duration) -> Self {
        self.hwlock_retry = retry;
        self
    }

    pub fn with_batch_chunk(mut self, chunk: usize) -> Self {
        self.batch_chunk = chunk;
        self
    }

    pub fn with_batch_max(mut self, max: usize) -> Self {
        self.batch_max = max;
        self
    }

    fn validate(&self) -> McpResult<()> {
        if self.batch_chunk == 0 {
            return Err(McpError::InvalidArgument("batch_chunk must be non-zero".into()));
        }
        if self.poll.max_polls == 0 {
            return Err(McpError::InvalidArgument("max_polls must be non-zero".into()));
        }
        Ok(())
    }
}

/// State that only the lock holder may touch.
pub(crate) struct HwState {
    /// Backing store for AES-256 keys, which do not fit the descriptor.
    key_cache: CoherentRegion,
    auto_padding: bool,
}

/// Handle to one MCP engine.
///
/// All submissions are serialized through the engine lock; an `McpEngine` is
/// normally shared between threads behind an `Arc`.
///
/// # Example
///
/// ```rust,no_run
/// use mcp_engine::{McpDesc, McpEngine, McpError, Algorithm, BlockMode, Direction};
/// use mcp_engine::sim::SimPlatform;
///
/// fn main() -> Result<(), McpError> {
///     let platform = SimPlatform::new();
///     let engine = platform.engine(Default::default())?;
///
///     let src = engine.alloc_coherent(32)?;
///     let dst = engine.alloc_coherent(32)?;
///     let desc = McpDesc::cipher(
///         Algorithm::Aes,
///         BlockMode::Ecb,
///         Direction::Encrypt,
///         src.dma_addr(),
///         dst.dma_addr(),
///         32,
///     );
///     let done = engine.submit(&desc)?;
///     println!("processed {} bytes", done);
///     Ok(())
/// }
/// ```
pub struct McpEngine {
    regs: Arc<dyn RegisterIo>,
    dma: Arc<dyn DmaAllocator>,
    lock: HwLock<HwState>,
    config: EngineConfig,
    importer: Option<Arc<dyn DmaBufImporter>>,
}

impl McpEngine {
    /// Bring up the engine behind `regs`.
    ///
    /// Stops any running dispatch, masks and clears interrupts, zeroes the
    /// ring registers and, on revisions that need it, enables automatic
    /// power management.
    pub fn new(
        regs: Arc<dyn RegisterIo>,
        dma: Arc<dyn DmaAllocator>,
        config: EngineConfig,
    ) -> McpResult<Self> {
        config.validate()?;

        let key_cache = CoherentRegion::new(&dma, AES256_KEY_LEN)?;
        let auto_padding = regs.read(MCP_CTRL1) & CTRL1_AUTO_PADDING_OFF == 0;

        let mut lock = HwLock::new(HwState {
            key_cache,
            auto_padding,
        });
        lock.set_retry(config.hwlock_retry);

        let engine = Self {
            regs,
            dma,
            lock,
            config,
            importer: None,
        };
        engine.hw_setup();

        log::info!(
            "mcp engine ready: chip {}, {:?} status layout",
            engine.config.chip_variant,
            engine.config.chip_variant.status_layout()
        );
        Ok(engine)
    }

    /// Open the first MCP engine exported by the platform.
    #[cfg(target_os = "linux")]
    pub fn open_first(dma: Arc<dyn DmaAllocator>) -> McpResult<Self> {
        let devices = crate::platform::discover_devices()?;
        let device = devices.into_iter().next().ok_or(McpError::NoDeviceFound)?;
        let regs = device.open_registers()?;
        let config = EngineConfig::default().with_chip_variant(crate::platform::detect_chip_variant());
        Self::new(Arc::new(regs), dma, config)
    }

    #[cfg(not(target_os = "linux"))]
    pub fn open_first(_dma: Arc<dyn DmaAllocator>) -> McpResult<Self> {
        Err(McpError::PlatformNotSupported)
    }

    /// Arbitrate with other processors through a hardware spinlock.
    pub fn with_hwspinlock(mut self, hwlock: Arc<dyn HwSpinlock>) -> Self {
        log::info!("mcp: using hardware spinlock for engine arbitration");
        self.lock.set_hwspinlock(hwlock);
        self
    }

    /// Enable client buffer imports through `importer`.
    pub fn with_importer(mut self, importer: Arc<dyn DmaBufImporter>) -> Self {
        self.importer = Some(importer);
        self
    }

    fn hw_setup(&self) {
        self.regs.write(MCP_CTRL, CtrlBits::GO.bits());
        self.regs.write(MCP_EN, IRQ_ALL);
        self.regs.write(MCP_STATUS, IRQ_ALL);
        self.reset_window();

        if self.config.chip_variant.needs_auto_power() {
            self.regs
                .update_bits(PWM_CTRL, PWM_AUTO_POWER_BITS, PWM_AUTO_POWER_BITS);
        }
    }

    fn hw_teardown(&self) {
        self.regs.write(MCP_CTRL, CtrlBits::GO.bits());
        self.regs.write(MCP_EN, IRQ_ALL);
        std::thread::sleep(TEARDOWN_SETTLE);
        self.reset_window();
    }

    fn reset_window(&self) {
        for reg in [MCP_BASE, MCP_LIMIT, MCP_RDPTR, MCP_WRPTR] {
            self.regs.write(reg, 0);
        }
    }

    /// Take exclusive ownership of the engine, waiting as long as needed.
    pub fn lock(&self) -> McpResult<EngineGuard<'_>> {
        self.lock_interruptible(&Interrupt::new())
    }

    /// Take exclusive ownership of the engine; the wait is abandoned when
    /// `interrupt` is raised.
    pub fn lock_interruptible(&self, interrupt: &Interrupt) -> McpResult<EngineGuard<'_>> {
        let state = self.lock.acquire(interrupt)?;
        Ok(EngineGuard {
            engine: self,
            state,
        })
    }

    /// Submit one descriptor; see [`EngineGuard::submit`].
    pub fn submit(&self, desc: &McpDesc) -> McpResult<u32> {
        self.lock()?.submit(desc)
    }

    /// Submit a batch of descriptors; see [`EngineGuard::submit_batch`].
    pub fn submit_batch(&self, descs: &[McpDesc]) -> McpResult<()> {
        self.lock()?.submit_batch(descs)
    }

    /// Submit a batch, taking the lock separately for every ring load so a
    /// raised `interrupt` can abandon the remainder between loads.
    pub fn submit_batch_interruptible(
        &self,
        descs: &[McpDesc],
        interrupt: &Interrupt,
    ) -> McpResult<()> {
        self.check_batch_len(descs.len())?;
        for chunk in descs.chunks(self.config.batch_chunk) {
            self.lock_interruptible(interrupt)?.execute(chunk)?;
        }
        Ok(())
    }

    fn check_batch_len(&self, n: usize) -> McpResult<()> {
        if n > self.config.batch_max {
            return Err(McpError::InvalidArgument(format!(
                "batch of {} descriptors exceeds limit of {}",
                n, self.config.batch_max
            )));
        }
        Ok(())
    }

    /// Enable or disable hash auto padding for subsequent submissions.
    pub fn set_auto_padding(&self, enabled: bool) -> McpResult<()> {
        self.lock()?.set_auto_padding(enabled);
        Ok(())
    }

    /// Allocate a scratch buffer the engine can address.
    pub fn alloc_coherent(&self, len: usize) -> McpResult<CoherentRegion> {
        CoherentRegion::new(&self.dma, len)
    }

    pub fn dma_allocator(&self) -> &Arc<dyn DmaAllocator> {
        &self.dma
    }

    pub fn importer(&self) -> Option<&Arc<dyn DmaBufImporter>> {
        self.importer.as_ref()
    }

    pub fn chip_variant(&self) -> ChipVariant {
        self.config.chip_variant
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for McpEngine {
    fn drop(&mut self) {
        self.hw_teardown();
    }
}

/// Exclusive access to the engine and its locked state.
pub struct EngineGuard<'a> {
    engine: &'a McpEngine,
    state: HwLockGuard<'a, HwState>,
}

impl EngineGuard<'_> {
    /// Run one descriptor, processing as many whole blocks as it holds.
    ///
    /// Returns the number of bytes processed, which is the length rounded
    /// down to the algorithm's block size; the caller resubmits the rest. A
    /// zero-length descriptor returns `Ok(0)` without touching the engine.
    pub fn submit(&mut self, desc: &McpDesc) -> McpResult<u32> {
        if desc.length == 0 {
            return Ok(0);
        }

        let aligned = desc.block_aligned_length();
        if aligned == 0 {
            return Err(McpError::InvalidDescriptor {
                length: desc.length,
                block_size: desc.algorithm().map_or(1, |a| a.block_size()),
            });
        }

        let mut desc = *desc;
        desc.length = aligned;
        self.execute(std::slice::from_ref(&desc))?;
        Ok(aligned)
    }

    /// Run a batch in ring loads of at most `batch_chunk` descriptors.
    ///
    /// The first load that fails aborts the rest of the batch. Lengths are
    /// passed to the engine unchanged.
    pub fn submit_batch(&mut self, descs: &[McpDesc]) -> McpResult<()> {
        self.engine.check_batch_len(descs.len())?;
        for chunk in descs.chunks(self.engine.config.batch_chunk) {
            self.execute(chunk)?;
        }
        Ok(())
    }

    /// Run `descs` as a single ring load.
    pub fn execute(&mut self, descs: &[McpDesc]) -> McpResult<()> {
        let engine = self.engine;
        Ring::new(
            &*engine.regs,
            &engine.dma,
            engine.config.chip_variant,
            &engine.config.poll,
        )
        .execute(descs)
    }

    /// Place an AES-256 key in the engine-owned key cache and return the
    /// address a DDR key-select descriptor should point at.
    ///
    /// The cache stays valid until the guard is dropped.
    pub fn load_aes256_key(&mut self, key: &[u8; AES256_KEY_LEN]) -> DmaAddr {
        self.state.key_cache.as_mut_slice().copy_from_slice(key);
        self.state.key_cache.dma_addr()
    }

    pub fn set_auto_padding(&mut self, enabled: bool) {
        let value = if enabled { 0 } else { CTRL1_AUTO_PADDING_OFF };
        self.engine
            .regs
            .update_bits(MCP_CTRL1, CTRL1_AUTO_PADDING_OFF, value);
        self.state.auto_padding = enabled;
    }

    pub fn auto_padding(&self) -> bool {
        self.state.auto_padding
    }

    pub fn engine(&self) -> &McpEngine {
        self.engine
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::descriptor::Direction;
    use crate::mode::{Algorithm, BlockMode};
    use crate::sim::{SimFault, SimPlatform};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn fast() -> EngineConfig {
        EngineConfig::default()
            .with_chip_variant(ChipVariant::Rtd1619)
            .with_poll_interval(Duration::ZERO)
            .with_max_polls(64)
            .with_hwlock_retry(Duration::from_micros(1))
    }

    fn nop() -> McpDesc {
        McpDesc::cipher(Algorithm::Aes, BlockMode::Ecb, Direction::Encrypt, 0, 0, 0)
    }

    #[test]
    fn test_bring_up_and_teardown() {
        let p = SimPlatform::new();
        p.mcp.write(MCP_BASE, 0x1234);
        p.mcp.write(MCP_CTRL, (CtrlBits::GO | CtrlBits::WRITE_DATA).bits());

        let engine = p
            .engine(fast().with_chip_variant(ChipVariant::Rtd1395))
            .unwrap();
        assert_eq!(p.mcp.peek(MCP_CTRL) & CtrlBits::GO.bits(), 0);
        assert_eq!(p.mcp.peek(MCP_BASE), 0);
        assert_eq!(p.mcp.peek(PWM_CTRL) & PWM_AUTO_POWER_BITS, PWM_AUTO_POWER_BITS);
        assert_eq!(p.mem.live(), 1, "key cache");

        p.mcp.write(MCP_LIMIT, 0x40);
        drop(engine);
        assert_eq!(p.mcp.peek(MCP_LIMIT), 0);
        assert_eq!(p.mem.live(), 0);
    }

    #[test]
    fn test_power_bits_only_on_rtd1395() {
        let p = SimPlatform::new();
        let _engine = p.engine(fast()).unwrap();
        assert_eq!(p.mcp.peek(PWM_CTRL), 0);
    }

    #[test]
    fn test_partial_block_is_truncated() {
        let p = SimPlatform::new();
        let engine = p.engine(fast()).unwrap();

        let src = CoherentRegion::with_bytes(engine.dma_allocator(), &[0xaa; 20]).unwrap();
        let dst = engine.alloc_coherent(20).unwrap();
        let desc = McpDesc::cipher(
            Algorithm::Aes,
            BlockMode::Ecb,
            Direction::Encrypt,
            src.dma_addr(),
            dst.dma_addr(),
            20,
        );

        assert_eq!(engine.submit(&desc).unwrap(), 16);
        assert_eq!(p.mcp.stats().go_polls, 1);
        assert_eq!(p.mcp.last_batch()[0].length, 16);
        assert!(dst.as_slice()[..16].iter().all(|&b| b != 0));
        assert_eq!(&dst.as_slice()[16..], &[0; 4]);

        // The 4-byte tail is the caller's problem
        let mut tail = desc;
        tail.src += 16;
        tail.dst += 16;
        tail.length = 4;
        assert!(matches!(
            engine.submit(&tail),
            Err(McpError::InvalidDescriptor {
                length: 4,
                block_size: 16
            })
        ));
        assert_eq!(p.mcp.stats().dispatches, 1);
    }

    #[test]
    fn test_zero_length_is_not_an_error() {
        let p = SimPlatform::new();
        let engine = p.engine(fast()).unwrap();
        assert_eq!(engine.submit(&nop()).unwrap(), 0);
        assert_eq!(p.mcp.stats().dispatches, 0);

        p.mcp.push_fault(SimFault::Error(0));
        let mut desc = nop();
        desc.length = 16;
        assert!(matches!(
            engine.submit(&desc),
            Err(McpError::EngineReportedError { .. })
        ));
    }

    #[test]
    fn test_hang_is_bounded() {
        let p = SimPlatform::new();
        let engine = p.engine(fast().with_max_polls(200)).unwrap();
        p.mcp.push_fault(SimFault::Hang);

        let mut desc = nop();
        desc.length = 16;
        let err = engine.submit(&desc).unwrap_err();
        assert!(matches!(err, McpError::EngineBusyTimeout { polls: 200, .. }));
        assert_eq!(p.mcp.stats().go_polls, 200);

        // The engine is usable again afterwards
        assert_eq!(engine.submit(&desc).unwrap(), 16);
    }

    #[test]
    fn test_batch_is_chunked() {
        let p = SimPlatform::new();
        let engine = p.engine(fast()).unwrap();

        engine.submit_batch(&vec![nop(); 150]).unwrap();
        let stats = p.mcp.stats();
        assert_eq!(stats.dispatches, 3);
        assert_eq!(stats.descriptors, 150);

        let engine = p.engine(fast().with_batch_chunk(10)).unwrap();
        engine.submit_batch(&vec![nop(); 100]).unwrap();
        assert_eq!(p.mcp.stats().dispatches, 3 + 10);
    }

    #[test]
    fn test_batch_aborts_on_first_failed_chunk() {
        let p = SimPlatform::new();
        let engine = p.engine(fast()).unwrap();
        p.mcp.push_fault(SimFault::Status(0));
        p.mcp.push_fault(SimFault::Error(0x100));

        let err = engine.submit_batch(&vec![nop(); 200]).unwrap_err();
        assert!(matches!(err, McpError::EngineReportedError { status } if status & 0x100 != 0));
        let stats = p.mcp.stats();
        assert_eq!(stats.dispatches, 2);
        assert_eq!(stats.descriptors, 64);
        assert_eq!(p.mem.live(), 1);
    }

    #[test]
    fn test_batch_limit() {
        let p = SimPlatform::new();
        let engine = p.engine(fast().with_batch_max(16)).unwrap();
        let err = engine.submit_batch(&vec![nop(); 17]).unwrap_err();
        assert!(matches!(err, McpError::InvalidArgument(_)));
        assert_eq!(p.mcp.stats().dispatches, 0);
        engine.submit_batch(&vec![nop(); 16]).unwrap();
        engine.submit_batch(&[]).unwrap();
        assert_eq!(p.mcp.stats().dispatches, 1);
    }

    #[test]
    fn test_allocations_balance_under_random_faults() {
        let p = SimPlatform::new();
        let engine = p.engine(fast().with_max_polls(8)).unwrap();
        let mut rng = StdRng::seed_from_u64(0x4d43_5031);

        let mut desc = nop();
        for _ in 0..500 {
            match rng.gen_range(0..5) {
                0 => p.mcp.push_fault(SimFault::Hang),
                1 => p.mcp.push_fault(SimFault::Error(0)),
                2 => p.mcp.push_fault(SimFault::Status(rng.gen::<u32>() & 0x0010_2008)),
                3 => p.mem.fail_allocs(1),
                _ => {}
            }
            desc.length = rng.gen_range(0..64);
            let _ = if rng.gen_bool(0.5) {
                engine.submit(&desc).map(|_| ())
            } else {
                let n = rng.gen_range(0..130);
                engine.submit_batch(&vec![desc; n])
            };
            // Only the key cache may stay allocated
            assert_eq!(p.mem.allocs(), p.mem.frees() + 1);
            assert_eq!(p.mem.live(), 1);
            p.mem.fail_allocs(0);
        }

        drop(engine);
        assert_eq!(p.mem.allocs(), p.mem.frees());
    }

    #[test]
    fn test_concurrent_submitters_never_interleave() {
        let p = SimPlatform::new();
        let engine = Arc::new(p.engine(fast()).unwrap());

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let mut desc = nop();
                    desc.length = 16 * (t + 1);
                    for i in 0..50 {
                        if i % 2 == 0 {
                            engine.submit(&desc).unwrap();
                        } else {
                            engine.submit_batch(&[desc, desc]).unwrap();
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let stats = p.mcp.stats();
        assert_eq!(stats.violations, 0);
        assert_eq!(stats.dispatches, 400);
        assert_eq!(p.hwlock.acquisitions(), 400);
        assert!(!p.hwlock.is_held());
    }

    #[test]
    fn test_auto_padding_toggle() {
        let p = SimPlatform::new();
        let engine = p.engine(fast()).unwrap();
        assert!(p.mcp.auto_padding());

        engine.set_auto_padding(false).unwrap();
        assert!(!p.mcp.auto_padding());
        assert!(!engine.lock().unwrap().auto_padding());

        engine.set_auto_padding(true).unwrap();
        assert!(p.mcp.auto_padding());
    }

    #[test]
    fn test_interrupted_lock_while_remote_holds_hwlock() {
        let p = SimPlatform::new();
        let engine = p.engine(fast()).unwrap();
        assert!(p.hwlock.hold_remote());

        let irq = Interrupt::new();
        irq.raise();
        assert!(matches!(
            engine.lock_interruptible(&irq),
            Err(McpError::LockAcquisitionInterrupted)
        ));

        p.hwlock.release_remote();
        let guard = engine.lock_interruptible(&irq).unwrap();
        assert!(p.hwlock.is_held());
        drop(guard);
        assert!(!p.hwlock.is_held());
    }

    #[test]
    fn test_interrupted_while_another_thread_holds_engine() {
        let p = SimPlatform::new();
        let engine = p.engine(fast()).unwrap();
        let held = engine.lock().unwrap();

        let irq = Interrupt::new();
        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let start = std::time::Instant::now();
                let res = engine.lock_interruptible(&irq).map(drop);
                (res, start.elapsed())
            });
            std::thread::sleep(Duration::from_millis(20));
            irq.raise();

            let (res, waited) = waiter.join().unwrap();
            assert!(matches!(res, Err(McpError::LockAcquisitionInterrupted)));
            assert!(waited < Duration::from_millis(500), "waited {waited:?}");
        });

        drop(held);
        engine.lock_interruptible(&irq).unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let p = SimPlatform::new();
        assert!(p.engine(fast().with_batch_chunk(0)).is_err());
        assert!(p.engine(fast().with_max_polls(0)).is_err());
        assert_eq!(p.mem.live(), 0);
    }
}
