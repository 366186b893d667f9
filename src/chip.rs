// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Chip revisions and completion-status interpretation.
//!
//! Older revisions report key-ladder activity in bits that must be clear for
//! a successful command; newer ones set those bits as part of a normal
//! completion. The variant is chosen once at engine construction.

use crate::regs::StatusBits;

/// Hardware revision of the MCP engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChipVariant {
    Rtd1295,
    Rtd1395,
    Rtd1619,
    Rtd1319,
    Rtd1619b,
    /// Not identified; treated like the newest layout.
    #[default]
    Unknown,
}

/// How a revision lays out its completion bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLayout {
    /// Only ring-empty and compare may be set on success.
    Basic,
    /// Key-ladder done bits are also part of a clean completion.
    KeyLadder,
}

impl ChipVariant {
    /// Map a SoC family string (as published by the SoC bus) to a variant.
    pub fn from_soc_family(family: &str) -> Self {
        match family.trim() {
            "Realtek Kylin" => Self::Rtd1295,
            "Realtek Hercules" => Self::Rtd1395,
            "Realtek Thor" => Self::Rtd1619,
            "Realtek Hank" => Self::Rtd1319,
            "Realtek Stark" => Self::Rtd1619b,
            _ => Self::Unknown,
        }
    }

    /// Numeric chip id, as used in the vendor tree.
    pub const fn chip_id(self) -> u32 {
        match self {
            Self::Rtd1295 => 0x1295,
            Self::Rtd1395 => 0x1395,
            Self::Rtd1619 => 0x1619,
            Self::Rtd1319 => 0x1319,
            Self::Rtd1619b => 0x1619b,
            Self::Unknown => 0,
        }
    }

    pub const fn status_layout(self) -> StatusLayout {
        match self {
            Self::Rtd1295 | Self::Rtd1395 => StatusLayout::Basic,
            _ => StatusLayout::KeyLadder,
        }
    }

    /// Whether the revision has software-controlled clock gating that must be
    /// enabled at bring-up.
    pub const fn needs_auto_power(self) -> bool {
        matches!(self, Self::Rtd1395)
    }
}

impl std::fmt::Display for ChipVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            other => write!(f, "RTD{:x}", other.chip_id()),
        }
    }
}

impl StatusLayout {
    /// Status bits allowed to be set on a clean completion.
    pub const fn completion_mask(self) -> StatusBits {
        match self {
            Self::Basic => StatusBits::RING_EMPTY.union(StatusBits::COMPARE),
            Self::KeyLadder => StatusBits::RING_EMPTY
                .union(StatusBits::COMPARE)
                .union(StatusBits::KL_DONE)
                .union(StatusBits::K_KL_DONE),
        }
    }
}

/// Terminal outcome of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The engine finished and reported a clean status.
    Done,
    /// The engine stopped with unexpected status bits.
    Error { status: u32 },
    /// GO never cleared within the poll budget.
    TimedOut { polls: u32, status: u32 },
}

impl Completion {
    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Interpret a status word read after the engine stopped.
pub fn decode_status(status: u32, variant: ChipVariant) -> Completion {
    let allowed = variant.status_layout().completion_mask().bits();
    if status & !allowed != 0 {
        Completion::Error { status }
    } else {
        Completion::Done
    }
}
