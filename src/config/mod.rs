// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Config loading and validation.
//
// Loads portcullis.yaml, validates structure, applies defaults, and
// computes a deterministic contract hash over the raw bytes so the
// running configuration can be identified in logs.

mod error;
mod loader;
mod source;

pub use error::ConfigError;
pub use loader::load_config;
pub use source::{ConfigSource, FileSource, StringSource};

use tokio::time::Duration;

use crate::engine::StreamConfig;

/// Top-level parsed and validated portcullis config.
#[derive(Debug)]
pub struct Config {
    /// Contract version. Always "v1".
    pub version: String,
    /// Engine runtime settings.
    pub engine: EngineSection,
    /// Which catalog policy to run per stream.
    pub policy: PolicySection,
    /// Transport listener settings.
    pub transport: TransportSection,
    /// SHA256 hash of the raw YAML bytes: "sha256:{hex}".
    pub contract_hash: String,
}

impl Config {
    /// Project the engine section onto the orchestrator's settings.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            activity_timeout: self.engine.activity_timeout,
            inbound_capacity: self.engine.inbound_queue,
            outbound_capacity: self.engine.outbound_queue,
        }
    }
}

/// Engine runtime configuration.
#[derive(Debug)]
pub struct EngineSection {
    pub activity_timeout: Duration,
    pub inbound_queue: usize,
    pub outbound_queue: usize,
}

/// Which policy to instantiate for each stream.
#[derive(Debug)]
pub struct PolicySection {
    pub name: String,
}

/// Transport listener configuration.
#[derive(Debug)]
pub struct TransportSection {
    /// Address the policy host binds, e.g. "127.0.0.1:9350".
    pub listen: String,
}
