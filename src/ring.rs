// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Ring controller.
//!
//! One call to [`Ring::execute`] loads a batch of descriptors into a fresh
//! coherent region, points the ring registers at it, runs the clear
//! handshake, dispatches, and polls for the outcome:
//!
//! ```text
//! Idle -> DescriptorLoaded -> Cleared -> Dispatched -> Completed | Failed | TimedOut -> Idle
//! ```
//!
//! The caller must hold the engine lock for the whole call. After dispatch the
//! engine is always stopped and its status cleared, and the region is always
//! freed, whatever the outcome.

use crate::chip::{decode_status, ChipVariant, Completion};
use crate::descriptor::{batch_bytes, McpDesc, DESC_SIZE};
use crate::dma::{CoherentRegion, DmaAllocator};
use crate::error::{McpError, McpResult};
use crate::regs::*;
use std::sync::Arc;
use std::time::Duration;

/// Spins allowed for the clear handshake before forcing the bit off.
pub const DEFAULT_CLEAR_SPINS: u32 = 30;

/// Status polls after GO before the dispatch is declared stuck.
pub const DEFAULT_MAX_POLLS: u32 = 4096;

/// Delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Bounds on the busy-waits of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub clear_spins: u32,
    pub max_polls: u32,
    /// Zero means spin without sleeping.
    pub poll_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            clear_spins: DEFAULT_CLEAR_SPINS,
            max_polls: DEFAULT_MAX_POLLS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollPolicy {
    /// Worst-case time spent waiting for a dispatch to finish.
    pub fn max_wait(&self) -> Duration {
        self.poll_interval
            .checked_mul(self.max_polls)
            .unwrap_or(Duration::MAX)
    }
}

/// Phase of the ring state machine, used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingState {
    Idle,
    DescriptorLoaded,
    Cleared,
    Dispatched,
    Completed,
    Failed,
    TimedOut,
}

impl std::fmt::Display for RingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::DescriptorLoaded => "descriptor-loaded",
            Self::Cleared => "cleared",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed-out",
        };
        f.write_str(s)
    }
}

/// Borrowed view of everything one dispatch needs.
pub struct Ring<'a> {
    regs: &'a dyn RegisterIo,
    dma: &'a Arc<dyn DmaAllocator>,
    variant: ChipVariant,
    policy: &'a PollPolicy,
}

impl<'a> Ring<'a> {
    pub fn new(
        regs: &'a dyn RegisterIo,
        dma: &'a Arc<dyn DmaAllocator>,
        variant: ChipVariant,
        policy: &'a PollPolicy,
    ) -> Self {
        Self {
            regs,
            dma,
            variant,
            policy,
        }
    }

    /// Run `descs` through the engine as one ring load.
    ///
    /// An empty batch is a no-op that never touches the hardware.
    pub fn execute(&self, descs: &[McpDesc]) -> McpResult<()> {
        if descs.is_empty() {
            return Ok(());
        }

        let mut state = RingState::Idle;
        let region = self.load(descs)?;
        self.transition(&mut state, RingState::DescriptorLoaded);

        self.program_window(&region, descs.len())?;
        self.clear_handshake();
        self.transition(&mut state, RingState::Cleared);

        let regs = self.regs;
        self.regs.write(MCP_EN, IRQ_ALL);
        self.regs.write(MCP_STATUS, IRQ_ALL);
        self.regs
            .write(MCP_CTRL, (CtrlBits::GO | CtrlBits::WRITE_DATA).bits());
        self.transition(&mut state, RingState::Dispatched);

        // Stop the engine and drop latched status on every path out of here.
        let stop = scopeguard::guard((), move |_| {
            regs.write(MCP_CTRL, CtrlBits::GO.bits());
            regs.write(MCP_STATUS, IRQ_ALL);
        });

        let outcome = wait_for_completion(self.regs, self.variant, self.policy);
        let result = match outcome {
            Completion::Done => {
                self.transition(&mut state, RingState::Completed);
                Ok(())
            }
            Completion::Error { status } => {
                self.transition(&mut state, RingState::Failed);
                log::error!(
                    "mcp command failed on {} ({} descriptor(s)), status={:#010x}",
                    self.variant,
                    descs.len(),
                    status
                );
                Err(McpError::EngineReportedError { status })
            }
            Completion::TimedOut { polls, status } => {
                self.transition(&mut state, RingState::TimedOut);
                log::error!(
                    "mcp engine stuck after {} polls, status={:#010x}",
                    polls,
                    status
                );
                Err(McpError::EngineBusyTimeout { polls, status })
            }
        };

        drop(stop);
        drop(region);
        self.transition(&mut state, RingState::Idle);
        result
    }

    /// Copy the batch plus one trailing sentinel slot into a new region.
    fn load(&self, descs: &[McpDesc]) -> McpResult<CoherentRegion> {
        let image = batch_bytes(descs);
        let mut region = CoherentRegion::new(self.dma, (descs.len() + 1) * DESC_SIZE)?;
        region.as_mut_slice()[..image.len()].copy_from_slice(&image);

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "mcp: loading {} descriptor(s) at {:#010x}",
                descs.len(),
                region.dma_addr()
            );
            for (i, row) in image.chunks(16).enumerate() {
                log::debug!("  {:04x}: {:02x?}", i * 16, row);
            }
        }
        Ok(region)
    }

    /// Point the ring registers at the region. LIMIT is exclusive, so a
    /// region ending at the top of the bus cannot be described.
    fn program_window(&self, region: &CoherentRegion, n: usize) -> McpResult<()> {
        let base = region.dma_addr();
        let offset = |slots: usize| {
            u32::try_from(slots * DESC_SIZE)
                .ok()
                .and_then(|len| base.checked_add(len))
        };
        let (Some(limit), Some(wrptr)) = (offset(n + 1), offset(n)) else {
            log::error!(
                "mcp: ring of {} descriptor(s) at {:#010x} runs past the bus",
                n,
                base
            );
            return Err(McpError::UnsupportedBufferLayout {
                segments: 1,
                dma_addr: base as u64,
            });
        };

        self.regs.write(MCP_BASE, base);
        self.regs.write(MCP_LIMIT, limit);
        self.regs.write(MCP_RDPTR, base);
        self.regs.write(MCP_WRPTR, wrptr);
        self.regs.write(MCP_DES_COUNT, 0);
        Ok(())
    }

    /// Reset the ring read logic. The hardware does not always drop the clear
    /// bit by itself; a stuck bit is forced off and the dispatch proceeds.
    fn clear_handshake(&self) {
        self.regs
            .write(MCP_CTRL, (CtrlBits::CLEAR | CtrlBits::WRITE_DATA).bits());

        let mut ctrl = self.regs.read(MCP_CTRL);
        let mut spins = 1;
        while ctrl & CtrlBits::CLEAR.bits() != 0 && spins < self.policy.clear_spins {
            core::hint::spin_loop();
            ctrl = self.regs.read(MCP_CTRL);
            spins += 1;
        }

        if ctrl & CtrlBits::CLEAR.bits() != 0 {
            log::debug!("mcp: clear bit stuck after {} spins, forcing it off", spins);
            self.regs.write(MCP_CTRL, CtrlBits::CLEAR.bits());
        }
    }

    fn transition(&self, state: &mut RingState, to: RingState) {
        log::trace!("mcp ring: {} -> {}", state, to);
        *state = to;
    }
}

/// Poll a dispatched engine until it stops or the budget runs out.
///
/// The engine is considered stopped when GO drops, or when the status
/// register already shows ring-empty or error while GO is still up.
pub fn wait_for_completion(
    regs: &dyn RegisterIo,
    variant: ChipVariant,
    policy: &PollPolicy,
) -> Completion {
    let stop_bits = (StatusBits::RING_EMPTY | StatusBits::ERROR).bits();

    for _ in 0..policy.max_polls {
        if regs.read(MCP_CTRL) & CtrlBits::GO.bits() == 0 {
            return decode_status(regs.read(MCP_STATUS), variant);
        }
        let status = regs.read(MCP_STATUS);
        if status & stop_bits != 0 {
            return decode_status(status, variant);
        }
        if policy.poll_interval.is_zero() {
            core::hint::spin_loop();
        } else {
            std::thread::sleep(policy.poll_interval);
        }
    }

    Completion::TimedOut {
        polls: policy.max_polls,
        status: regs.read(MCP_STATUS),
    }
}
