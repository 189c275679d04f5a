// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Policy catalog.
//
// Maps policy names to factories. Policies hold per-stream state, so the
// catalog never hands out shared instances; every stream gets a fresh
// value from the named factory.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::engine::context::StreamingContext;
use crate::policy::{HookResult, StreamPolicy};
use crate::provider::RawChunk;

/// Builds one fresh policy value per stream.
pub type PolicyFactory = Box<dyn Fn() -> Box<dyn StreamPolicy> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
#[error("unknown policy: {name}")]
pub struct UnknownPolicy {
    pub name: String,
}

/// Named policy factories. The default catalog carries only
/// `passthrough`; embedders register their own policies on top.
pub struct PolicyCatalog {
    factories: HashMap<String, PolicyFactory>,
}

impl Default for PolicyCatalog {
    fn default() -> Self {
        let mut catalog = Self {
            factories: HashMap::new(),
        };
        catalog.register("passthrough", || PassthroughPolicy);
        catalog
    }
}

impl PolicyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous entry.
    pub fn register<F, P>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: StreamPolicy + 'static,
    {
        self.factories
            .insert(name.to_string(), Box::new(move || Box::new(factory())));
    }

    /// Instantiate a fresh policy for one stream.
    pub fn create(&self, name: &str) -> Result<Box<dyn StreamPolicy>, UnknownPolicy> {
        match self.factories.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(UnknownPolicy {
                name: name.to_string(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered policy names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ---------------------------------------------------------------------------
// Passthrough
// ---------------------------------------------------------------------------

/// Forwards every raw chunk unchanged. The identity policy: with it
/// installed the proxied stream is byte-equivalent to the backend's.
pub struct PassthroughPolicy;

#[async_trait]
impl StreamPolicy for PassthroughPolicy {
    async fn on_chunk_started(
        &mut self,
        ctx: &mut StreamingContext,
        chunk: &RawChunk,
    ) -> HookResult {
        ctx.send(chunk.payload.clone()).await?;
        Ok(())
    }
}
