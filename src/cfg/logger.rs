// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A thin `tracing-subscriber` install helper for the demo binary and
//! integration tests.
//!
//! A library should not install a global subscriber on its caller's behalf —
//! only a binary should — so unlike the teacher's full JSON/file-rotation
//! pipeline, this is just a stdout `fmt` layer plus an `EnvFilter`. Every
//! operation in [`crate::ptc`] and [`crate::facade`] is instrumented with
//! `tracing::debug!`/`warn!` independent of whether a subscriber is ever
//! installed; this helper just gives that instrumentation somewhere to go.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt};

/// Installs a global `tracing` subscriber: stdout, human-readable, filtered
/// by `RUST_LOG` (falling back to `default_level` when unset, e.g. `"info"`
/// or `"meta_cache_client=debug"`). Intended for the demo binary and
/// integration tests, not for library callers embedding this crate.
pub fn init_tracing_subscriber(default_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("failed to build tracing EnvFilter")?;

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
