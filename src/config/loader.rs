// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

use sha2::{Digest, Sha256};
use tokio::time::Duration;

use super::error::ConfigError;
use super::source::ConfigSource;
use super::{Config, EngineSection, PolicySection, TransportSection};

/// Load and validate a portcullis config from the given source.
///
/// Steps:
/// 1. Read raw YAML bytes from source
/// 2. Compute SHA256 contract hash
/// 3. Parse YAML into raw deserialization types
/// 4. Validate required fields and values, apply defaults
/// 5. Build typed Config struct
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let contract_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.portcullis != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported contract version \"{}\", expected \"v1\"",
            raw.portcullis
        )));
    }

    let engine = build_engine_section(raw.engine)?;
    let policy = build_policy_section(raw.policy)?;
    let transport = build_transport_section(raw.transport)?;

    Ok(Config {
        version: raw.portcullis,
        engine,
        policy,
        transport,
        contract_hash,
    })
}

fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    let hash = hasher.finalize();
    format!("sha256:{:x}", hash)
}

fn build_engine_section(raw: Option<raw::RawEngineSection>) -> Result<EngineSection, ConfigError> {
    let raw = raw.unwrap_or_default();

    let activity_timeout_ms = raw.activity_timeout_ms.unwrap_or(60_000);
    if activity_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "engine.activity_timeout_ms must be at least 1".to_string(),
        ));
    }

    let inbound_queue = raw.inbound_queue.unwrap_or(64);
    let outbound_queue = raw.outbound_queue.unwrap_or(64);
    if inbound_queue == 0 || outbound_queue == 0 {
        return Err(ConfigError::Validation(
            "engine queue capacities must be at least 1".to_string(),
        ));
    }

    Ok(EngineSection {
        activity_timeout: Duration::from_millis(activity_timeout_ms),
        inbound_queue,
        outbound_queue,
    })
}

fn build_policy_section(raw: Option<raw::RawPolicySection>) -> Result<PolicySection, ConfigError> {
    let raw = raw.unwrap_or_default();
    let name = raw.name.unwrap_or_else(|| "passthrough".to_string());
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "policy.name must not be empty".to_string(),
        ));
    }
    Ok(PolicySection { name })
}

fn build_transport_section(
    raw: Option<raw::RawTransportSection>,
) -> Result<TransportSection, ConfigError> {
    let raw = raw.unwrap_or_default();
    let listen = raw.listen.unwrap_or_else(|| "127.0.0.1:9350".to_string());
    if listen.is_empty() {
        return Err(ConfigError::Validation(
            "transport.listen must not be empty".to_string(),
        ));
    }
    Ok(TransportSection { listen })
}

// ---------------------------------------------------------------------------
// Raw YAML deserialization types (internal)
// ---------------------------------------------------------------------------
// Separate from the public Config structs: serde sees raw optionals, the
// loader applies defaults and validation between raw and public.

mod raw {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct RawConfig {
        pub portcullis: String,
        pub engine: Option<RawEngineSection>,
        pub policy: Option<RawPolicySection>,
        pub transport: Option<RawTransportSection>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct RawEngineSection {
        pub activity_timeout_ms: Option<u64>,
        pub inbound_queue: Option<usize>,
        pub outbound_queue: Option<usize>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct RawPolicySection {
        pub name: Option<String>,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct RawTransportSection {
        pub listen: Option<String>,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
