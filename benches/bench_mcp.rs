// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Submission overhead against the software engine model.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mcp_engine::sim::SimPlatform;
use mcp_engine::{
    Algorithm, BlockCipher, BlockMode, Direction, EngineConfig, HashAlgorithm, HwHasher,
    McpCipher, McpDesc, McpEngine, SgRequest,
};
use std::sync::Arc;
use std::time::Duration;

fn engine(platform: &SimPlatform) -> Arc<McpEngine> {
    let config = EngineConfig::default().with_poll_interval(Duration::ZERO);
    Arc::new(platform.engine(config).expect("sim engine"))
}

/// One descriptor per ring load, full protocol each time.
fn bench_submit(c: &mut Criterion) {
    let platform = SimPlatform::new();
    let engine = engine(&platform);
    let src = engine.alloc_coherent(4096).unwrap();
    let dst = engine.alloc_coherent(4096).unwrap();

    let mut group = c.benchmark_group("submit");
    for size in [16u32, 256, 4096] {
        let desc = McpDesc::cipher(
            Algorithm::Aes,
            BlockMode::Ecb,
            Direction::Encrypt,
            src.dma_addr(),
            dst.dma_addr(),
            size,
        );
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("aes_ecb", size), &desc, |b, desc| {
            b.iter(|| engine.submit(desc).unwrap());
        });
    }
    group.finish();
}

/// Batches split into ring loads of 64.
fn bench_batch(c: &mut Criterion) {
    let platform = SimPlatform::new();
    let engine = engine(&platform);

    let mut group = c.benchmark_group("batch");
    for count in [1usize, 16, 64, 256, 1024] {
        let descs = vec![McpDesc::new(); count];
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("descriptors", count), &descs, |b, descs| {
            b.iter(|| engine.submit_batch(descs).unwrap());
        });
    }
    group.finish();
}

/// Cipher adapter including the scatter-gather walk and bounce copies.
fn bench_cipher(c: &mut Criterion) {
    let platform = SimPlatform::new();
    let engine = engine(&platform);

    let mut group = c.benchmark_group("cipher");
    for (name, key) in [("aes128_cbc", &[0x2bu8; 16][..]), ("aes256_cbc", &[0x2bu8; 32][..])] {
        let mut aes = McpCipher::new(Arc::clone(&engine), BlockCipher::Aes, BlockMode::Cbc).unwrap();
        aes.set_key(Some(key)).unwrap();

        for size in [1024usize, 16 * 1024, 128 * 1024] {
            let src: Vec<u8> = (0..size).map(|i| (i & 0xFF) as u8).collect();
            let mut dst = vec![0u8; size];
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::new(name, size), &src, |b, src| {
                b.iter(|| {
                    let mut req = SgRequest::contiguous(src, &mut dst, [0; 16]);
                    aes.encrypt(&mut req).unwrap()
                });
            });
        }
    }
    group.finish();
}

/// Streaming hash with software padding.
fn bench_hash(c: &mut Criterion) {
    let platform = SimPlatform::new();
    let engine = engine(&platform);

    let mut group = c.benchmark_group("hash");
    for size in [64usize, 4096, 64 * 1024] {
        let data = vec![0xa5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        for algo in [HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
            let name = format!("{:?}", algo).to_lowercase();
            group.bench_with_input(BenchmarkId::new(name, size), &data, |b, data| {
                b.iter(|| {
                    let mut h = HwHasher::new(Arc::clone(&engine), algo);
                    h.update(data).unwrap();
                    h.finalize().unwrap()
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_submit, bench_batch, bench_cipher, bench_hash);
criterion_main!(benches);
