// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

//! Dispatch-path latency benchmarks.
//!
//! Measures:
//! - Delta extraction from raw provider chunks
//! - Block assembly over content and tool-call streams
//! - End-to-end per-chunk cost through the orchestrator with the
//!   passthrough policy
//!
//! Run: cargo bench --bench dispatch_latency

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use portcullis::engine::context::NullObserver;
use portcullis::engine::{queue_source, StreamConfig, StreamOrchestrator, StreamRequest};
use portcullis::policy::catalog::PolicyCatalog;
use portcullis::provider::{Provider, RawChunk};
use portcullis::stream::ChunkAssembler;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn content_chunk(text: &str) -> RawChunk {
    RawChunk::new(
        Provider::OpenAi,
        json!({"choices": [{"delta": {"content": text}}]}),
    )
}

fn tool_chunk(index: usize, args: &str) -> RawChunk {
    RawChunk::new(
        Provider::OpenAi,
        json!({"choices": [{"delta": {"tool_calls": [
            {"index": index, "function": {"arguments": args}}
        ]}}]}),
    )
}

fn anthropic_content_chunk(text: &str) -> RawChunk {
    RawChunk::new(
        Provider::Anthropic,
        json!({"type": "content_block_delta", "index": 0,
               "delta": {"type": "text_delta", "text": text}}),
    )
}

fn finish_chunk() -> RawChunk {
    RawChunk::new(
        Provider::OpenAi,
        json!({"choices": [{"delta": {}, "finish_reason": "stop"}]}),
    )
}

/// Typical short content delta (~20 bytes).
const SHORT_DELTA: &str = "the quick brown fox ";

/// Large content delta (~2 KB), the batched-flush shape.
fn long_delta() -> String {
    SHORT_DELTA.repeat(100)
}

fn request() -> StreamRequest {
    StreamRequest::new(Provider::OpenAi, "bench-model", json!({"messages": []}))
}

// ---------------------------------------------------------------------------
// Benchmark: delta extraction
// ---------------------------------------------------------------------------

fn bench_delta_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_extraction");

    group.bench_function("openai_content_short", |b| {
        let chunk = content_chunk(SHORT_DELTA);
        b.iter(|| black_box(&chunk).delta());
    });

    group.bench_function("openai_content_long", |b| {
        let chunk = content_chunk(&long_delta());
        b.iter(|| black_box(&chunk).delta());
    });

    group.bench_function("openai_tool_fragment", |b| {
        let chunk = tool_chunk(0, "{\"city\":\"Oslo\"}");
        b.iter(|| black_box(&chunk).delta());
    });

    group.bench_function("anthropic_content", |b| {
        let chunk = anthropic_content_chunk(SHORT_DELTA);
        b.iter(|| black_box(&chunk).delta());
    });

    group.bench_function("empty_delta", |b| {
        let chunk = RawChunk::new(Provider::OpenAi, json!({"choices": [{"delta": {}}]}));
        b.iter(|| black_box(&chunk).delta());
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: block assembly
// ---------------------------------------------------------------------------

fn bench_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembly");

    // Pure content stream: one growing block.
    for n_chunks in [10, 100, 500] {
        group.bench_with_input(
            BenchmarkId::new("content_stream", n_chunks),
            &n_chunks,
            |b, &n| {
                let chunks: Vec<RawChunk> = (0..n)
                    .map(|_| content_chunk(SHORT_DELTA))
                    .chain(std::iter::once(finish_chunk()))
                    .collect();
                b.iter_batched(
                    ChunkAssembler::new,
                    |mut assembler| {
                        for chunk in &chunks {
                            black_box(assembler.process(chunk));
                        }
                        assembler.finish();
                        assembler
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    // Alternating tool calls: exercises block completion on index change.
    group.bench_function("interleaved_tool_calls", |b| {
        let chunks: Vec<RawChunk> = (0..100)
            .map(|i| tool_chunk(i % 4, "{\"step\":1}"))
            .collect();
        b.iter_batched(
            ChunkAssembler::new,
            |mut assembler| {
                for chunk in &chunks {
                    black_box(assembler.process(chunk));
                }
                assembler.finish();
                assembler
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: end-to-end through the orchestrator
// ---------------------------------------------------------------------------

fn bench_e2e_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("e2e_stream");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let catalog = PolicyCatalog::new();

    for n_chunks in [10, 100] {
        group.bench_with_input(
            BenchmarkId::new("passthrough", n_chunks),
            &n_chunks,
            |b, &n| {
                b.iter(|| {
                    rt.block_on(async {
                        let orchestrator = StreamOrchestrator::with_observer(
                            StreamConfig::default(),
                            Arc::new(NullObserver),
                        );
                        let (feed, source) = queue_source(n + 2);
                        for _ in 0..n {
                            feed.try_send(Ok(content_chunk(SHORT_DELTA))).unwrap();
                        }
                        feed.try_send(Ok(finish_chunk())).unwrap();
                        drop(feed);

                        let policy = catalog.create("passthrough").unwrap();
                        let mut managed = orchestrator.run(request(), source, policy);
                        let mut delivered = 0usize;
                        while let Some(chunk) = managed.next_chunk().await {
                            black_box(&chunk);
                            delivered += 1;
                        }
                        let summary = managed.outcome().await.unwrap();
                        black_box((delivered, summary))
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_delta_extraction,
    bench_assembly,
    bench_e2e_stream,
);
criterion_main!(benches);
