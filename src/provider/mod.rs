// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Provider chunk shapes.
//
// Turns one provider-format chunk into a provider-agnostic `ChunkDelta`:
// role marker, content delta, tool-call fragments, usage, finish reason,
// and explicit block boundaries. Two wire formats are understood: the
// OpenAI-style chat completions stream and the Anthropic-style messages
// stream. Unrecognized shapes yield an empty delta — extraction never
// fails, so new provider fields pass through as no-ops.

pub mod sse;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Wire format of a chunk stream.
///
/// This is **not** a vendor enum — it identifies the API wire format.
/// `OpenAi` covers any provider using OpenAI-compatible chat completion
/// chunks (Cerebras, Groq, Together, etc.). `Anthropic` covers the
/// Anthropic messages stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    OpenAi,
    Anthropic,
}

/// One unit of a provider's streamed response, as parsed JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub provider: Provider,
    pub payload: Value,
}

impl RawChunk {
    pub fn new(provider: Provider, payload: Value) -> Self {
        Self { provider, payload }
    }

    /// Extract the semantic deltas this chunk carries.
    pub fn delta(&self) -> ChunkDelta {
        match self.provider {
            Provider::OpenAi => extract_openai(&self.payload),
            Provider::Anthropic => extract_anthropic(&self.payload),
        }
    }
}

// ---------------------------------------------------------------------------
// Deltas
// ---------------------------------------------------------------------------

/// One fragment of a streamed tool call.
///
/// The id and name usually arrive on the first fragment only; argument
/// text arrives piecewise and is only valid once the block completes.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_delta: Option<String>,
}

/// Provider-agnostic view of the deltas carried by a single chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkDelta {
    pub role: Option<String>,
    pub content: Option<String>,
    pub tool_fragments: Vec<ToolCallFragment>,
    pub usage: Option<Value>,
    pub finish_reason: Option<String>,
    /// Explicit end-of-block signal for the given index (Anthropic
    /// `content_block_stop`). OpenAI streams never set this.
    pub block_boundary: Option<usize>,
}

impl ChunkDelta {
    pub fn is_empty(&self) -> bool {
        self.role.is_none()
            && self.content.is_none()
            && self.tool_fragments.is_empty()
            && self.usage.is_none()
            && self.finish_reason.is_none()
            && self.block_boundary.is_none()
    }
}

// ---------------------------------------------------------------------------
// OpenAI-style extraction
// ---------------------------------------------------------------------------

/// Known locations of the finish reason in OpenAI-style chunks.
///
/// Providers disagree here: the canonical shape is
/// `choices[0].finish_reason`, some gateways nest it under `delta`, and a
/// few re-serialize the non-streaming `message` shape. Each is checked
/// explicitly rather than guessed at.
fn openai_finish_reason(choice: &Value) -> Option<String> {
    for path in [
        choice.get("finish_reason"),
        choice.get("delta").and_then(|d| d.get("finish_reason")),
        choice.get("message").and_then(|m| m.get("finish_reason")),
    ] {
        if let Some(reason) = path.and_then(|f| f.as_str()) {
            return Some(reason.to_string());
        }
    }
    None
}

fn extract_openai(payload: &Value) -> ChunkDelta {
    let mut out = ChunkDelta::default();

    // Usage rides at the top level (stream_options: include_usage).
    if let Some(usage) = payload.get("usage").filter(|u| !u.is_null()) {
        out.usage = Some(usage.clone());
    }

    let choice = match payload.get("choices").and_then(|c| c.get(0)) {
        Some(c) => c,
        None => return out,
    };

    out.finish_reason = openai_finish_reason(choice);

    let delta = match choice.get("delta") {
        Some(d) => d,
        None => return out,
    };

    if let Some(role) = delta.get("role").and_then(|r| r.as_str()) {
        out.role = Some(role.to_string());
    }
    if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
        out.content = Some(content.to_string());
    }

    if let Some(tool_calls) = delta.get("tool_calls").and_then(|tc| tc.as_array()) {
        for call in tool_calls {
            let index = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
            let id = call
                .get("id")
                .and_then(|i| i.as_str())
                .map(|s| s.to_string());
            let function = call.get("function");
            let name = function
                .and_then(|f| f.get("name"))
                .and_then(|n| n.as_str())
                .map(|s| s.to_string());
            let arguments_delta = function
                .and_then(|f| f.get("arguments"))
                .and_then(|a| a.as_str())
                .map(|s| s.to_string());
            out.tool_fragments.push(ToolCallFragment {
                index,
                id,
                name,
                arguments_delta,
            });
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Anthropic-style extraction
// ---------------------------------------------------------------------------

fn extract_anthropic(payload: &Value) -> ChunkDelta {
    let mut out = ChunkDelta::default();
    let event = payload.get("type").and_then(|t| t.as_str()).unwrap_or("");

    match event {
        "message_start" => {
            let message = payload.get("message");
            if let Some(role) = message
                .and_then(|m| m.get("role"))
                .and_then(|r| r.as_str())
            {
                out.role = Some(role.to_string());
            }
            if let Some(usage) = message.and_then(|m| m.get("usage")).filter(|u| !u.is_null()) {
                out.usage = Some(usage.clone());
            }
        }
        "content_block_start" => {
            let index = payload.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
            let block = payload.get("content_block");
            let block_type = block
                .and_then(|b| b.get("type"))
                .and_then(|t| t.as_str())
                .unwrap_or("");
            if block_type == "tool_use" {
                out.tool_fragments.push(ToolCallFragment {
                    index,
                    id: block
                        .and_then(|b| b.get("id"))
                        .and_then(|i| i.as_str())
                        .map(|s| s.to_string()),
                    name: block
                        .and_then(|b| b.get("name"))
                        .and_then(|n| n.as_str())
                        .map(|s| s.to_string()),
                    arguments_delta: None,
                });
            }
            // Text block starts carry no content; the first text_delta
            // opens the block.
        }
        "content_block_delta" => {
            let index = payload.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
            let delta = payload.get("delta");
            let delta_type = delta
                .and_then(|d| d.get("type"))
                .and_then(|t| t.as_str())
                .unwrap_or("");
            match delta_type {
                "text_delta" => {
                    if let Some(text) = delta.and_then(|d| d.get("text")).and_then(|t| t.as_str()) {
                        out.content = Some(text.to_string());
                    }
                }
                "input_json_delta" => {
                    if let Some(partial) = delta
                        .and_then(|d| d.get("partial_json"))
                        .and_then(|p| p.as_str())
                    {
                        out.tool_fragments.push(ToolCallFragment {
                            index,
                            id: None,
                            name: None,
                            arguments_delta: Some(partial.to_string()),
                        });
                    }
                }
                _ => {}
            }
        }
        "content_block_stop" => {
            out.block_boundary =
                Some(payload.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize);
        }
        "message_delta" => {
            if let Some(reason) = payload
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|s| s.as_str())
            {
                out.finish_reason = Some(reason.to_string());
            }
            if let Some(usage) = payload.get("usage").filter(|u| !u.is_null()) {
                out.usage = Some(usage.clone());
            }
        }
        // message_stop, ping, and anything unrecognized: no deltas.
        _ => {}
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn openai(payload: Value) -> ChunkDelta {
        RawChunk::new(Provider::OpenAi, payload).delta()
    }

    fn anthropic(payload: Value) -> ChunkDelta {
        RawChunk::new(Provider::Anthropic, payload).delta()
    }

    // ---------------------------------------------------------------
    // OpenAI conformance
    // ---------------------------------------------------------------

    #[test]
    fn openai_role_marker() {
        let delta = openai(json!({
            "choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}]
        }));
        assert_eq!(delta.role.as_deref(), Some("assistant"));
        assert!(delta.content.is_none());
    }

    #[test]
    fn openai_content_delta() {
        let delta = openai(json!({
            "choices": [{"index": 0, "delta": {"content": "Hello"}, "finish_reason": null}]
        }));
        assert_eq!(delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn openai_empty_content_is_preserved_as_empty() {
        let delta = openai(json!({
            "choices": [{"index": 0, "delta": {"content": ""}}]
        }));
        // The assembler decides that empty deltas open nothing; extraction
        // reports exactly what arrived.
        assert_eq!(delta.content.as_deref(), Some(""));
    }

    #[test]
    fn openai_tool_call_fragment_with_id_and_name() {
        let delta = openai(json!({
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "type": "function",
                 "function": {"name": "read_file", "arguments": ""}}
            ]}}]
        }));
        assert_eq!(delta.tool_fragments.len(), 1);
        let frag = &delta.tool_fragments[0];
        assert_eq!(frag.index, 0);
        assert_eq!(frag.id.as_deref(), Some("call_1"));
        assert_eq!(frag.name.as_deref(), Some("read_file"));
        assert_eq!(frag.arguments_delta.as_deref(), Some(""));
    }

    #[test]
    fn openai_multiple_tool_fragments_in_one_chunk() {
        let delta = openai(json!({
            "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"a\""}},
                {"index": 1, "id": "call_2", "function": {"name": "write_file"}}
            ]}}]
        }));
        assert_eq!(delta.tool_fragments.len(), 2);
        assert_eq!(delta.tool_fragments[0].index, 0);
        assert_eq!(delta.tool_fragments[1].index, 1);
        assert_eq!(delta.tool_fragments[1].name.as_deref(), Some("write_file"));
    }

    #[test]
    fn openai_finish_reason_canonical_location() {
        let delta = openai(json!({
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
        }));
        assert_eq!(delta.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn openai_finish_reason_nested_under_delta() {
        let delta = openai(json!({
            "choices": [{"index": 0, "delta": {"finish_reason": "tool_calls"}}]
        }));
        assert_eq!(delta.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn openai_finish_reason_nested_under_message() {
        let delta = openai(json!({
            "choices": [{"index": 0, "message": {"finish_reason": "length"}}]
        }));
        assert_eq!(delta.finish_reason.as_deref(), Some("length"));
    }

    #[test]
    fn openai_usage_chunk() {
        let delta = openai(json!({
            "choices": [],
            "usage": {"prompt_tokens": 10, "completion_tokens": 4}
        }));
        assert_eq!(delta.usage.unwrap()["completion_tokens"], 4);
    }

    #[test]
    fn openai_unrecognized_shape_is_empty_delta() {
        assert!(openai(json!({"object": "something.new", "data": [1, 2]})).is_empty());
        assert!(openai(json!("not even an object")).is_empty());
    }

    // ---------------------------------------------------------------
    // Anthropic conformance
    // ---------------------------------------------------------------

    #[test]
    fn anthropic_message_start_carries_role_and_usage() {
        let delta = anthropic(json!({
            "type": "message_start",
            "message": {"id": "msg_1", "role": "assistant", "content": [],
                        "usage": {"input_tokens": 12}}
        }));
        assert_eq!(delta.role.as_deref(), Some("assistant"));
        assert_eq!(delta.usage.unwrap()["input_tokens"], 12);
    }

    #[test]
    fn anthropic_text_delta() {
        let delta = anthropic(json!({
            "type": "content_block_delta", "index": 0,
            "delta": {"type": "text_delta", "text": "Hello"}
        }));
        assert_eq!(delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn anthropic_text_block_start_carries_no_content() {
        let delta = anthropic(json!({
            "type": "content_block_start", "index": 0,
            "content_block": {"type": "text", "text": ""}
        }));
        assert!(delta.is_empty());
    }

    #[test]
    fn anthropic_tool_use_start_yields_fragment_with_identity() {
        let delta = anthropic(json!({
            "type": "content_block_start", "index": 1,
            "content_block": {"type": "tool_use", "id": "toolu_1", "name": "search"}
        }));
        let frag = &delta.tool_fragments[0];
        assert_eq!(frag.index, 1);
        assert_eq!(frag.id.as_deref(), Some("toolu_1"));
        assert_eq!(frag.name.as_deref(), Some("search"));
        assert!(frag.arguments_delta.is_none());
    }

    #[test]
    fn anthropic_input_json_delta_yields_argument_fragment() {
        let delta = anthropic(json!({
            "type": "content_block_delta", "index": 1,
            "delta": {"type": "input_json_delta", "partial_json": "{\"q\":"}
        }));
        assert_eq!(
            delta.tool_fragments[0].arguments_delta.as_deref(),
            Some("{\"q\":")
        );
    }

    #[test]
    fn anthropic_content_block_stop_is_a_boundary() {
        let delta = anthropic(json!({"type": "content_block_stop", "index": 1}));
        assert_eq!(delta.block_boundary, Some(1));
    }

    #[test]
    fn anthropic_message_delta_stop_reason() {
        let delta = anthropic(json!({
            "type": "message_delta",
            "delta": {"stop_reason": "end_turn"},
            "usage": {"output_tokens": 42}
        }));
        assert_eq!(delta.finish_reason.as_deref(), Some("end_turn"));
        assert_eq!(delta.usage.unwrap()["output_tokens"], 42);
    }

    #[test]
    fn anthropic_ping_and_message_stop_are_empty() {
        assert!(anthropic(json!({"type": "ping"})).is_empty());
        assert!(anthropic(json!({"type": "message_stop"})).is_empty());
    }
}
