// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Basic example demonstrating MCP engine usage.
//!
//! Reports any hardware engine the platform exports, then runs a few
//! operations against the software model.
//!
//! Run with: `cargo run --example basic`

use mcp_engine::sim::SimPlatform;
use mcp_engine::{
    detect_chip_variant, discover_devices, is_mcp_available, BlockCipher, BlockMode,
    EngineConfig, HashAlgorithm, HwHasher, McpCipher, McpClient, McpDesc, McpError, SgRequest,
};
use std::sync::Arc;

fn main() {
    println!("Realtek MCP Basic Example");
    println!("=========================\n");

    // Check platform support
    println!("Checking MCP availability...");
    println!("  MCP hardware detected: {}", is_mcp_available());
    println!("  Chip variant: {}", detect_chip_variant());
    println!();

    println!("Discovering MCP devices...");
    match discover_devices() {
        Ok(devices) if devices.is_empty() => println!("  No MCP hardware found."),
        Ok(devices) => {
            for device in &devices {
                println!("  Device: {} ({})", device.name, device.label);
                println!("    Node: {}", device.dev_path.display());
                println!("    Register window: {:#x} bytes", device.map_size);
            }
        }
        Err(McpError::PlatformNotSupported) => println!("  Platform not supported."),
        Err(e) => println!("  Error discovering devices: {}", e),
    }
    println!();

    // The hardware path also needs a coherent memory carve-out, so the demo
    // always runs against the model.
    println!("Opening simulated MCP engine...");
    let platform = SimPlatform::new();
    let engine = match platform.engine(EngineConfig::default()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            println!("  Failed to open MCP engine: {}", e);
            return;
        }
    };
    println!("  Chip variant: {}", engine.chip_variant());
    println!();

    // AES-128 CBC over two scattered spans
    println!("Encrypting with AES-128-CBC...");
    let plain: Vec<u8> = (0..48).collect();
    let mut out = vec![0u8; 48];
    match McpCipher::new(Arc::clone(&engine), BlockCipher::Aes, BlockMode::Cbc).and_then(|mut aes| {
        aes.set_key(Some(&[0x2b; 16]))?;
        let (a, b) = plain.split_at(20);
        let mut req = SgRequest::new(vec![a, b], vec![&mut out[..]], [0; 16]);
        let done = aes.encrypt(&mut req)?;
        println!("  Next IV: {:02x?}", &req.iv[..8]);
        Ok(done)
    }) {
        Ok(done) => println!("  Encrypted {} bytes, first 8: {:02x?}", done, &out[..8]),
        Err(e) => println!("  Encryption failed: {}", e),
    }
    println!();

    // AES-256 goes through the engine's key cache
    println!("Encrypting with AES-256-ECB...");
    let mut out = vec![0u8; 32];
    match McpCipher::new(Arc::clone(&engine), BlockCipher::Aes, BlockMode::Ecb).and_then(|mut aes| {
        aes.set_key(Some(&[0x11; 32]))?;
        aes.encrypt(&mut SgRequest::contiguous(&plain[..32], &mut out, [0; 16]))
    }) {
        Ok(done) => println!("  Encrypted {} bytes", done),
        Err(e) => println!("  Encryption failed: {}", e),
    }
    println!();

    // Streaming hash with software padding
    println!("Hashing with SHA-256...");
    let mut hasher = HwHasher::new(Arc::clone(&engine), HashAlgorithm::Sha256);
    match hasher.update(b"Hello, MCP!").and_then(|()| hasher.finalize()) {
        Ok(digest) => println!("  Digest: {:02x?}", digest),
        Err(e) => println!("  Hash failed: {}", e),
    }
    println!();

    // Client batch and buffer import
    println!("Submitting a client batch...");
    let client = McpClient::open(Arc::clone(&engine));
    let before = platform.mcp.stats().dispatches;
    match client.submit_batch(&vec![McpDesc::new(); 100]) {
        Ok(()) => println!(
            "  100 descriptors in {} ring loads",
            platform.mcp.stats().dispatches - before
        ),
        Err(e) => println!("  Batch failed: {}", e),
    }
    let fd = platform.bufs.export_contiguous(0x4008_0000, 4096);
    match client.import_buffer(fd) {
        Ok(handle) => println!("  Imported fd {} at {:#010x}", fd, handle.dma_addr),
        Err(e) => println!("  Import failed: {}", e),
    }
    drop(client);
    println!("  Buffers still mapped after close: {}", platform.bufs.mapped());
    println!();

    println!("Done!");
}
