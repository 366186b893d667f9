// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Per-client engine context.
//!
//! An [`McpClient`] is what a user-space control path holds for one open
//! handle: it submits descriptor batches built by the client, toggles hash
//! auto padding, and tracks the external buffers the client has imported.
//! Every wait for the engine lock can be cut short through the client's
//! [`Interrupt`], and dropping the client unmaps whatever it forgot to
//! release.

use crate::descriptor::McpDesc;
use crate::dma::DmaAddr;
use crate::dmabuf::{BufferRegistry, ImportedBuffer, ImportedHandle};
use crate::engine::McpEngine;
use crate::error::{McpError, McpResult};
use crate::hwlock::Interrupt;
use std::sync::Arc;

/// One open handle on an engine.
pub struct McpClient {
    engine: Arc<McpEngine>,
    buffers: BufferRegistry,
    interrupt: Interrupt,
}

impl McpClient {
    pub fn open(engine: Arc<McpEngine>) -> Self {
        Self {
            engine,
            buffers: BufferRegistry::new(),
            interrupt: Interrupt::new(),
        }
    }

    pub fn engine(&self) -> &Arc<McpEngine> {
        &self.engine
    }

    /// Handle another thread can raise to abort this client's pending lock
    /// wait.
    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Submit a client-built batch, one ring load per chunk.
    pub fn submit_batch(&self, descs: &[McpDesc]) -> McpResult<()> {
        self.engine
            .submit_batch_interruptible(descs, &self.interrupt)
    }

    pub fn set_auto_padding(&self, enabled: bool) -> McpResult<()> {
        self.engine
            .lock_interruptible(&self.interrupt)?
            .set_auto_padding(enabled);
        Ok(())
    }

    /// Import the buffer behind `fd` and make it addressable by bus address.
    pub fn import_buffer(&self, fd: i32) -> McpResult<ImportedHandle> {
        let importer = self
            .engine
            .importer()
            .ok_or(McpError::PlatformNotSupported)?;
        let buf = ImportedBuffer::import(importer, fd)?;
        log::debug!(
            "mcp: imported fd {} at {:#010x} ({} bytes)",
            fd,
            buf.dma_addr(),
            buf.handle().len
        );
        self.buffers.insert(buf)
    }

    /// Unmap a buffer imported by this client.
    pub fn release_buffer(&self, dma_addr: DmaAddr) -> McpResult<()> {
        self.buffers.release(dma_addr)
    }

    pub fn lookup(&self, dma_addr: DmaAddr) -> Option<ImportedHandle> {
        self.buffers.lookup(dma_addr)
    }

    /// Unmap every buffer still imported; returns how many there were.
    pub fn release_all(&self) -> usize {
        self.buffers.release_all()
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.release_all();
    }
}
