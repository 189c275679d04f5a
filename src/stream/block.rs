// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Block types and per-stream assembly state.
//
// A `StreamBlock` is a complete, accumulated unit of model output — a
// text span or a single tool invocation. `StreamState` is the working
// memory the chunk assembler mutates as deltas arrive: at most one block
// is in progress at a time, completed blocks are appended exactly once,
// and every raw chunk is retained for reconstruction.

use crate::provider::RawChunk;

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// A single tool invocation accumulated from streamed fragments.
///
/// The id and name arrive before (or alongside) the first argument
/// fragment and are retained across fragments. `arguments` is the
/// concatenation of all fragments, usually a JSON document, and is only
/// meaningful once the block is complete.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallBlock {
    /// Provider block index; interleaves with content on some providers.
    pub index: usize,
    /// Call identifier (e.g., "call_abc" for OpenAI, "toolu_abc" for
    /// Anthropic). May be empty if the provider never sent one.
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// A completed unit of streamed output.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamBlock {
    /// Accumulated text content.
    Content { text: String },
    /// A single tool invocation.
    ToolCall(ToolCallBlock),
}

impl StreamBlock {
    /// The tool-call index, if this is a tool-call block.
    pub fn tool_index(&self) -> Option<usize> {
        match self {
            StreamBlock::ToolCall(call) => Some(call.index),
            StreamBlock::Content { .. } => None,
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, StreamBlock::Content { .. })
    }
}

// ---------------------------------------------------------------------------
// StreamState
// ---------------------------------------------------------------------------

/// Assembly state for one streamed response.
///
/// Invariants maintained by the assembler:
/// - a block moves to `blocks` exactly once, at the moment it completes,
///   and is never mutated afterward;
/// - `finish_reason`, once set, is terminal;
/// - `raw_chunks` grows monotonically in arrival order.
#[derive(Debug, Default)]
pub struct StreamState {
    /// Completed blocks, in completion order.
    pub blocks: Vec<StreamBlock>,
    /// The block currently being built, if any.
    pub current_block: Option<StreamBlock>,
    /// Blocks that completed during the most recent chunk, cleared before
    /// the next chunk is processed. A single chunk can close more than one
    /// block when content and tool fragments interleave.
    pub just_completed: Vec<StreamBlock>,
    /// Terminal finish reason, set at most once.
    pub finish_reason: Option<String>,
    /// Every raw chunk seen, in arrival order, for reconstruction/audit.
    pub raw_chunks: Vec<RawChunk>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear per-chunk bookkeeping and record the incoming raw chunk.
    /// Called by the assembler at the start of every `process`.
    pub(crate) fn begin_chunk(&mut self, chunk: RawChunk) {
        self.just_completed.clear();
        self.raw_chunks.push(chunk);
    }

    /// Move the in-progress block (if any) into `blocks` and mark it as
    /// completed this chunk.
    pub(crate) fn complete_current(&mut self) {
        if let Some(block) = self.current_block.take() {
            self.blocks.push(block.clone());
            self.just_completed.push(block);
        }
    }

    /// Set the finish reason if none has been recorded yet.
    pub(crate) fn record_finish_reason(&mut self, reason: &str) -> bool {
        if self.finish_reason.is_some() {
            return false;
        }
        self.finish_reason = Some(reason.to_string());
        true
    }

    /// Concatenation of all completed content blocks.
    pub fn content_text(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            if let StreamBlock::Content { text } = block {
                out.push_str(text);
            }
        }
        out
    }

    /// Completed tool calls, in completion order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallBlock> {
        self.blocks.iter().filter_map(|b| match b {
            StreamBlock::ToolCall(call) => Some(call),
            StreamBlock::Content { .. } => None,
        })
    }

    /// Accumulated argument text for a completed tool call, by index.
    pub fn tool_arguments(&self, index: usize) -> Option<&str> {
        self.tool_calls()
            .find(|c| c.index == index)
            .map(|c| c.arguments.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;
    use serde_json::json;

    fn chunk() -> RawChunk {
        RawChunk::new(Provider::OpenAi, json!({}))
    }

    #[test]
    fn complete_current_moves_block_exactly_once() {
        let mut state = StreamState::new();
        state.current_block = Some(StreamBlock::Content {
            text: "Hello".to_string(),
        });
        state.complete_current();

        assert_eq!(state.blocks.len(), 1);
        assert_eq!(state.just_completed.len(), 1);
        assert!(state.current_block.is_none());

        // A second call with no in-progress block is a no-op.
        state.complete_current();
        assert_eq!(state.blocks.len(), 1);
    }

    #[test]
    fn begin_chunk_clears_just_completed_and_records_raw() {
        let mut state = StreamState::new();
        state.current_block = Some(StreamBlock::Content {
            text: "a".to_string(),
        });
        state.complete_current();
        assert_eq!(state.just_completed.len(), 1);

        state.begin_chunk(chunk());
        assert!(state.just_completed.is_empty());
        assert_eq!(state.raw_chunks.len(), 1);

        state.begin_chunk(chunk());
        assert_eq!(state.raw_chunks.len(), 2);
    }

    #[test]
    fn finish_reason_is_terminal() {
        let mut state = StreamState::new();
        assert!(state.record_finish_reason("stop"));
        assert!(!state.record_finish_reason("length"));
        assert_eq!(state.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn content_text_skips_tool_calls() {
        let mut state = StreamState::new();
        state.blocks.push(StreamBlock::Content {
            text: "He".to_string(),
        });
        state.blocks.push(StreamBlock::ToolCall(ToolCallBlock {
            index: 0,
            id: "call_1".to_string(),
            name: "read_file".to_string(),
            arguments: "{}".to_string(),
        }));
        state.blocks.push(StreamBlock::Content {
            text: "llo".to_string(),
        });
        assert_eq!(state.content_text(), "Hello");
    }

    #[test]
    fn tool_arguments_lookup_by_index() {
        let mut state = StreamState::new();
        state.blocks.push(StreamBlock::ToolCall(ToolCallBlock {
            index: 2,
            id: "call_2".to_string(),
            name: "search".to_string(),
            arguments: "{\"q\":\"x\"}".to_string(),
        }));
        assert_eq!(state.tool_arguments(2), Some("{\"q\":\"x\"}"));
        assert_eq!(state.tool_arguments(0), None);
        assert_eq!(state.tool_calls().count(), 1);
    }
}
