// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Imported external buffers.
//!
//! A client can hand the engine a file-descriptor-backed buffer (a dma-buf)
//! and then refer to it by bus address in its descriptors. The engine only
//! accepts buffers that map to one contiguous segment below 4 GiB.

use crate::dma::DmaAddr;
use crate::error::{McpError, McpResult};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// One physically contiguous piece of a mapped buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaSegment {
    pub addr: u64,
    pub len: u32,
}

/// Result of attaching and mapping one external buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaBufMapping {
    /// Importer-defined token, passed back on unmap.
    pub id: u64,
    pub segments: Vec<DmaSegment>,
}

/// Attaches external buffers for bidirectional device access.
pub trait DmaBufImporter: Send + Sync {
    /// Attach `fd` and map it for the engine.
    fn map(&self, fd: i32) -> McpResult<DmaBufMapping>;

    /// Undo a successful `map`. Called exactly once per mapping.
    fn unmap(&self, mapping: &DmaBufMapping);
}

/// What a client gets back for an imported buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportedHandle {
    pub dma_addr: DmaAddr,
    pub len: u32,
}

/// A live mapping; unmapped when dropped.
pub struct ImportedBuffer {
    importer: Arc<dyn DmaBufImporter>,
    mapping: DmaBufMapping,
    handle: ImportedHandle,
}

impl ImportedBuffer {
    /// Map `fd` and check the engine can address it.
    pub fn import(importer: &Arc<dyn DmaBufImporter>, fd: i32) -> McpResult<Self> {
        let mapping = importer.map(fd)?;

        let layout = match mapping.segments.as_slice() {
            [seg] if seg.addr != 0 => DmaAddr::try_from(seg.addr).ok().map(|addr| (addr, seg.len)),
            _ => None,
        };
        let Some((dma_addr, len)) = layout else {
            let err = McpError::UnsupportedBufferLayout {
                segments: mapping.segments.len(),
                dma_addr: mapping.segments.first().map_or(0, |s| s.addr),
            };
            importer.unmap(&mapping);
            return Err(err);
        };

        Ok(Self {
            importer: Arc::clone(importer),
            mapping,
            handle: ImportedHandle { dma_addr, len },
        })
    }

    #[inline]
    pub fn handle(&self) -> ImportedHandle {
        self.handle
    }

    #[inline]
    pub fn dma_addr(&self) -> DmaAddr {
        self.handle.dma_addr
    }
}

impl Drop for ImportedBuffer {
    fn drop(&mut self) {
        self.importer.unmap(&self.mapping);
    }
}

impl std::fmt::Debug for ImportedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportedBuffer")
            .field("id", &self.mapping.id)
            .field("dma_addr", &format_args!("{:#010x}", self.handle.dma_addr))
            .field("len", &self.handle.len)
            .finish()
    }
}

/// Per-client set of imported buffers keyed by bus address.
#[derive(Debug, Default)]
pub struct BufferRegistry {
    bufs: Mutex<BTreeMap<DmaAddr, ImportedBuffer>>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly imported buffer.
    ///
    /// An address that is already registered is rejected and the new mapping
    /// is undone.
    pub fn insert(&self, buf: ImportedBuffer) -> McpResult<ImportedHandle> {
        let handle = buf.handle();
        let mut bufs = self.bufs.lock().unwrap_or_else(|e| e.into_inner());
        if bufs.contains_key(&handle.dma_addr) {
            drop(bufs);
            drop(buf);
            return Err(McpError::InvalidArgument(format!(
                "dma address {:#010x} already imported",
                handle.dma_addr
            )));
        }
        bufs.insert(handle.dma_addr, buf);
        Ok(handle)
    }

    pub fn lookup(&self, dma_addr: DmaAddr) -> Option<ImportedHandle> {
        let bufs = self.bufs.lock().unwrap_or_else(|e| e.into_inner());
        bufs.get(&dma_addr).map(ImportedBuffer::handle)
    }

    /// Unregister and unmap the buffer at `dma_addr`.
    pub fn release(&self, dma_addr: DmaAddr) -> McpResult<()> {
        let buf = {
            let mut bufs = self.bufs.lock().unwrap_or_else(|e| e.into_inner());
            bufs.remove(&dma_addr)
        };
        match buf {
            Some(buf) => {
                drop(buf);
                Ok(())
            }
            None => Err(McpError::BufferNotImported { dma_addr }),
        }
    }

    /// Unmap everything still registered. Returns how many were left behind.
    pub fn release_all(&self) -> usize {
        let mut released = 0;
        loop {
            let next = {
                let mut bufs = self.bufs.lock().unwrap_or_else(|e| e.into_inner());
                bufs.pop_first()
            };
            let Some((addr, buf)) = next else { break };
            log::info!(
                "imported buffer {:#010x} ({} bytes) not freed by client",
                addr,
                buf.handle().len
            );
            drop(buf);
            released += 1;
        }
        released
    }

    pub fn len(&self) -> usize {
        self.bufs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
