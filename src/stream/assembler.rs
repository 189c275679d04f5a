// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Chunk assembler.
//
// Consumes raw provider chunks one at a time, in arrival order, and
// advances the `StreamState` block machine. Each call returns the
// `ChunkFacts` the hook dispatcher needs: which semantic sub-events this
// chunk carried. Delta fields are applied in a fixed priority: role
// marker, content text, tool-call fragments, then usage/finish reason.
//
// The assembler never fails. Malformed or unrecognized chunks reduce to
// empty deltas upstream and become no-ops here.

use std::collections::HashSet;

use crate::provider::{RawChunk, ToolCallFragment};
use crate::stream::block::{StreamBlock, StreamState, ToolCallBlock};
use serde_json::Value;

/// Semantic classification of one processed chunk.
///
/// `content_delta` is set only when the chunk actually grew a content
/// block (empty text deltas never open or extend one). `finish_reason`
/// is set only by the chunk that established it; later attempts to
/// overwrite a terminal finish reason are dropped.
#[derive(Debug, Default, Clone)]
pub struct ChunkFacts {
    pub role: Option<String>,
    pub content_delta: Option<String>,
    pub tool_fragments: Vec<ToolCallFragment>,
    pub usage: Option<Value>,
    pub finish_reason: Option<String>,
}

/// Assembles a stream of raw chunks into completed blocks.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    state: StreamState,
    /// Indices of tool calls that have already completed. A completion
    /// fires at most once per index per stream; fragments arriving for a
    /// retired index are dropped.
    retired_indices: HashSet<usize>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn into_state(self) -> StreamState {
        self.state
    }

    /// Process one raw chunk. Must be called in arrival order.
    ///
    /// Completed blocks accumulate in `state().just_completed` for the
    /// duration of this chunk; the list is cleared when the next chunk
    /// is processed.
    pub fn process(&mut self, chunk: &RawChunk) -> ChunkFacts {
        let delta = chunk.delta();
        self.state.begin_chunk(chunk.clone());

        let mut facts = ChunkFacts::default();

        facts.role = delta.role;

        if let Some(text) = delta.content {
            if !text.is_empty() {
                self.append_content(&text);
                facts.content_delta = Some(text);
            }
        }

        for fragment in delta.tool_fragments {
            if self.apply_tool_fragment(&fragment) {
                facts.tool_fragments.push(fragment);
            }
        }

        if let Some(index) = delta.block_boundary {
            self.close_boundary(index);
        }

        facts.usage = delta.usage;

        if let Some(reason) = delta.finish_reason {
            if self.state.record_finish_reason(&reason) {
                // A finish reason closes whatever block is in progress.
                self.complete_current();
                facts.finish_reason = Some(reason);
            }
        }

        facts
    }

    /// Signal end of stream: closes any in-progress block.
    ///
    /// Per-chunk bookkeeping is reset first, so `state().just_completed`
    /// afterwards holds exactly the blocks closed by stream end.
    pub fn finish(&mut self) {
        self.state.just_completed.clear();
        self.complete_current();
    }

    // -- internals ----------------------------------------------------------

    fn complete_current(&mut self) {
        if let Some(StreamBlock::ToolCall(call)) = &self.state.current_block {
            self.retired_indices.insert(call.index);
        }
        self.state.complete_current();
    }

    fn append_content(&mut self, text: &str) {
        match &mut self.state.current_block {
            Some(StreamBlock::Content { text: current }) => current.push_str(text),
            Some(StreamBlock::ToolCall { .. }) => {
                // Content resuming after a tool call closes the call.
                self.complete_current();
                self.state.current_block = Some(StreamBlock::Content {
                    text: text.to_string(),
                });
            }
            None => {
                self.state.current_block = Some(StreamBlock::Content {
                    text: text.to_string(),
                });
            }
        }
    }

    /// Apply one tool-call fragment. Returns false if the fragment was
    /// dropped (its index already completed).
    fn apply_tool_fragment(&mut self, fragment: &ToolCallFragment) -> bool {
        if self.retired_indices.contains(&fragment.index) {
            return false;
        }

        match &mut self.state.current_block {
            Some(StreamBlock::ToolCall(call)) if call.index == fragment.index => {
                // Id and name may trail the first fragment on some
                // providers; retain whatever arrives.
                if let Some(frag_id) = &fragment.id {
                    if call.id.is_empty() {
                        call.id = frag_id.clone();
                    }
                }
                if let Some(frag_name) = &fragment.name {
                    if call.name.is_empty() {
                        call.name = frag_name.clone();
                    }
                }
                if let Some(args) = &fragment.arguments_delta {
                    call.arguments.push_str(args);
                }
            }
            _ => {
                // A different index (or a content block) in progress:
                // that block is complete, this fragment opens a new one.
                self.complete_current();
                self.state.current_block = Some(StreamBlock::ToolCall(ToolCallBlock {
                    index: fragment.index,
                    id: fragment.id.clone().unwrap_or_default(),
                    name: fragment.name.clone().unwrap_or_default(),
                    arguments: fragment.arguments_delta.clone().unwrap_or_default(),
                }));
            }
        }
        true
    }

    /// Explicit provider block boundary (Anthropic `content_block_stop`).
    fn close_boundary(&mut self, index: usize) {
        let closes = match &self.state.current_block {
            Some(StreamBlock::ToolCall(call)) => call.index == index,
            // Content blocks carry no index of their own; any boundary
            // while content is in progress closes it.
            Some(StreamBlock::Content { .. }) => true,
            None => false,
        };
        if closes {
            self.complete_current();
        }
    }
}
