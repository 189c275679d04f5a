// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod engine;
pub mod policy;
pub mod provider;
pub mod stream;
pub mod transport;
