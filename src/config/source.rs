// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

// Where contract YAML comes from.
//
// The loader hashes a contract as one byte string before parsing, so a
// source hands over the complete document rather than a stream.

use std::path::PathBuf;

use super::error::ConfigError;

pub trait ConfigSource {
    fn load(&self) -> Result<String, ConfigError>;
}

/// Contract file on disk — the usual case (`portcullis.yaml`).
pub struct FileSource {
    pub path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(std::fs::read_to_string(&self.path)?)
    }
}

/// In-memory contract text, for tests and embedders that assemble the
/// contract themselves.
pub struct StringSource {
    pub content: String,
}

impl StringSource {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl ConfigSource for StringSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(self.content.clone())
    }
}
