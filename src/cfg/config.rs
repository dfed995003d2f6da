// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, num::NonZeroUsize, path::Path};

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::{cfg::enums::RoutingStrategy, ptc::ConnectionTarget};

fn default_max_outstanding_requests() -> NonZeroUsize {
    NonZeroUsize::new(1000).unwrap_or(NonZeroUsize::MIN)
}

fn default_timeout_ms() -> u64 {
    1000
}

/// One server to dial, as loaded from config. Mirrors §6's per-target
/// configuration surface: `address`, `port`, `max_outstanding_requests`
/// (default 1000), `timeout_ms` (default 1000; 0 disables the per-request
/// deadline).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TargetConfig {
    /// Hostname or IP address. Must be non-empty.
    pub address: String,
    /// TCP port, 1..=65535.
    pub port: u16,
    /// Hard admission-gate limit on in-flight requests per PTC (I3).
    #[serde(default = "default_max_outstanding_requests")]
    pub max_outstanding_requests: NonZeroUsize,
    /// Per-request timeout in milliseconds; 0 disables it.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl TargetConfig {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            max_outstanding_requests: default_max_outstanding_requests(),
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Converts to the [`ConnectionTarget`] the PTC layer actually consumes.
    pub fn to_connection_target(&self) -> ConnectionTarget {
        ConnectionTarget {
            address: self.address.clone(),
            port: self.port,
            max_outstanding_requests: self.max_outstanding_requests.get(),
            timeout_ms: self.timeout_ms,
        }
    }
}

/// The client's full configuration surface: one or more targets, plus how to
/// route keys across them.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ClientConfig {
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub routing: RoutingStrategy,
}

impl ClientConfig {
    /// A single-target config with direct routing.
    pub fn single(address: impl Into<String>, port: u16) -> Self {
        Self {
            targets: vec![TargetConfig::new(address, port)],
            routing: RoutingStrategy::Direct,
        }
    }

    /// A multi-target config with sharded routing.
    pub fn targets(targets: Vec<TargetConfig>) -> Self {
        Self { targets, routing: RoutingStrategy::Sharded }
    }

    /// Loads, parses, and validates a config from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("failed to read config file {:?}", path.as_ref())
        })?;
        let cfg: ClientConfig =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates invariants from §6: non-empty target list, non-empty
    /// addresses, and a `Direct` routing strategy paired with exactly one
    /// target (a `Direct` router only ever holds one SEC).
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.targets.is_empty(), "at least one target is required");
        for target in &self.targets {
            ensure!(!target.address.is_empty(), "target address must not be empty");
            ensure!(target.port != 0, "target port must be in 1..=65535");
        }
        if self.routing == RoutingStrategy::Direct && self.targets.len() != 1 {
            bail!(
                "routing strategy \"direct\" requires exactly one target, got {}",
                self.targets.len()
            );
        }
        Ok(())
    }
}
