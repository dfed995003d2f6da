// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Small serde-friendly enums used by [`crate::cfg::config`].

use serde::{Deserialize, Serialize};

/// How a multi-target [`crate::cfg::config::ClientConfig`] is routed.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoutingStrategy {
    /// A single target; every key routes to it.
    Direct,
    /// Multiple targets; keys are distributed via FNV-1a + jump hash.
    #[default]
    Sharded,
}
