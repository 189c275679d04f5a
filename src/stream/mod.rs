// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Block assembly — turning raw provider chunks into completed blocks.
//
// Responsibilities:
// - `block`: the `StreamBlock` sum type and per-stream `StreamState`
// - `assembler`: the incremental state machine that applies chunk deltas
//   in fixed priority and tracks block completion
//
// The assembler is pure bookkeeping: no I/O, no policy, no channels.
// The engine drives it and feeds its output to the hook dispatcher.

mod assembler;
mod block;

pub use assembler::{ChunkAssembler, ChunkFacts};
pub use block::{StreamBlock, StreamState, ToolCallBlock};
