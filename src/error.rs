// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Error types for MCP engine operations.

use thiserror::Error;

/// Errors that can occur while driving the MCP engine.
#[derive(Debug, Error)]
pub enum McpError {
    /// DMA-coherent memory could not be allocated within the device's
    /// addressable range.
    #[error("DMA-coherent allocation of {size} bytes failed")]
    AllocationFailed { size: usize },

    /// The wait for the hardware lock was interrupted before it was taken.
    #[error("interrupted while waiting for the engine lock")]
    LockAcquisitionInterrupted,

    /// The GO bit never cleared within the poll budget.
    #[error("engine busy: GO still set after {polls} polls, status={status:#010x}")]
    EngineBusyTimeout { polls: u32, status: u32 },

    /// The status register reported an error after the engine stopped.
    #[error("engine reported error: status={status:#010x}")]
    EngineReportedError { status: u32 },

    /// An imported buffer is scattered or has no usable DMA address.
    #[error("unsupported buffer layout: {segments} segment(s), dma address {dma_addr:#x}")]
    UnsupportedBufferLayout { segments: usize, dma_addr: u64 },

    /// The descriptor cannot be processed as a whole number of blocks.
    #[error("invalid descriptor: length {length} is shorter than block size {block_size}")]
    InvalidDescriptor { length: u32, block_size: u32 },

    /// No buffer is imported at the given DMA address.
    #[error("no imported buffer at dma address {dma_addr:#010x}")]
    BufferNotImported { dma_addr: u32 },

    /// Invalid argument provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Buffer size mismatch.
    #[error("buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// I/O error from system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Platform not supported.
    #[error("platform not supported: MCP access requires Linux with a UIO-exported engine")]
    PlatformNotSupported,

    /// No MCP engine found on the system.
    #[error("no MCP engine found")]
    NoDeviceFound,

    /// Permission denied accessing the device.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Memory mapping failed.
    #[error("mmap failed: {0}")]
    MmapFailed(String),
}

/// Result type alias for MCP operations.
pub type McpResult<T> = Result<T, McpError>;
