// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Hook dispatcher.
//
// Given an assembled chunk and its semantic classification, invokes the
// policy hooks in the canonical order:
//
//   1. on_chunk_started
//   2. on_role_delta          (role marker present)
//   3. on_content_delta       (content block grew)
//   4. on_tool_call_delta     (once per fragment)
//   5. on_content_complete / on_tool_call_complete (per completed block)
//   6. on_usage_delta         (usage metadata present)
//   7. on_finish_reason       (finish reason set by this chunk)
//   8. on_chunk_complete      (always, last)
//
// Termination — whether signalled by returning `TerminateStream` or by
// calling `ctx.terminate()` — takes effect when the current hook
// returns: remaining hooks for the chunk are skipped and the stream
// shuts down gracefully. Unexpected hook errors stop the chunk the same
// way but surface as failures.

use crate::engine::context::StreamingContext;
use crate::policy::{HookError, HookResult, StreamPolicy};
use crate::provider::RawChunk;
use crate::stream::{ChunkFacts, StreamBlock, StreamState};

/// How a dispatch round ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// All applicable hooks ran; keep streaming.
    Continue,
    /// The policy requested graceful termination.
    Terminated { reason: String },
    /// A hook failed unexpectedly.
    Failed { message: String },
}

/// Resolve one hook's result against the context's termination flag.
/// Returns `None` when dispatch should continue to the next hook.
fn settle(result: HookResult, ctx: &StreamingContext) -> Option<DispatchOutcome> {
    match result {
        Err(HookError::Terminate(t)) => Some(DispatchOutcome::Terminated { reason: t.reason }),
        Err(HookError::Failed(message)) => Some(DispatchOutcome::Failed { message }),
        Ok(()) => ctx.termination().map(|reason| DispatchOutcome::Terminated {
            reason: reason.to_string(),
        }),
    }
}

/// Run the per-chunk hook sequence for one processed chunk.
pub async fn dispatch_chunk(
    policy: &mut dyn StreamPolicy,
    ctx: &mut StreamingContext,
    chunk: &RawChunk,
    facts: &ChunkFacts,
    state: &StreamState,
) -> DispatchOutcome {
    if let Some(out) = settle(policy.on_chunk_started(ctx, chunk).await, ctx) {
        return out;
    }

    if let Some(role) = &facts.role {
        if let Some(out) = settle(policy.on_role_delta(ctx, role).await, ctx) {
            return out;
        }
    }

    if let Some(delta) = &facts.content_delta {
        if let Some(out) = settle(policy.on_content_delta(ctx, delta).await, ctx) {
            return out;
        }
    }

    for fragment in &facts.tool_fragments {
        if let Some(out) = settle(policy.on_tool_call_delta(ctx, fragment).await, ctx) {
            return out;
        }
    }

    if let Some(out) = dispatch_completions(policy, ctx, state).await {
        return out;
    }

    if let Some(usage) = &facts.usage {
        if let Some(out) = settle(policy.on_usage_delta(ctx, usage).await, ctx) {
            return out;
        }
    }

    if let Some(reason) = &facts.finish_reason {
        if let Some(out) = settle(policy.on_finish_reason(ctx, reason).await, ctx) {
            return out;
        }
    }

    if let Some(out) = settle(policy.on_chunk_complete(ctx, chunk, state).await, ctx) {
        return out;
    }

    DispatchOutcome::Continue
}

/// Fire completion hooks for blocks closed by end of stream (upstream
/// EOF closes whatever block was still in progress).
pub async fn dispatch_stream_end(
    policy: &mut dyn StreamPolicy,
    ctx: &mut StreamingContext,
    state: &StreamState,
) -> DispatchOutcome {
    match dispatch_completions(policy, ctx, state).await {
        Some(out) => out,
        None => DispatchOutcome::Continue,
    }
}

/// Completion hooks for everything in `state.just_completed`, dispatched
/// by concrete block type.
async fn dispatch_completions(
    policy: &mut dyn StreamPolicy,
    ctx: &mut StreamingContext,
    state: &StreamState,
) -> Option<DispatchOutcome> {
    for block in &state.just_completed {
        let result = match block {
            StreamBlock::Content { text } => policy.on_content_complete(ctx, text).await,
            StreamBlock::ToolCall(call) => policy.on_tool_call_complete(ctx, call).await,
        };
        if let Some(out) = settle(result, ctx) {
            return Some(out);
        }
    }
    None
}
