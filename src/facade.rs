// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The public façade: accepts a key and an operation, asks the
//! [`crate::router::Router`] for a [`ServerEndpointClient`], and forwards the
//! call. `GetMany` is the one operation the façade implements itself, since
//! bulk reads can span multiple [`crate::sec::ServerEndpointClient`]s and the
//! SEC layer deliberately doesn't know about routing.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;

use crate::{
    cfg::{
        config::{ClientConfig, TargetConfig},
        enums::RoutingStrategy,
    },
    codec::{EntryInfo, MutationResult},
    error::{ClientError, Result},
    ptc::ConnectionTarget,
    router::{DirectRouter, Router, ShardedRouter},
    sec::ServerEndpointClient,
};

/// Thin dispatcher over a [`Router`]. Owns the router (and, through it, every
/// [`ServerEndpointClient`] it routes to) for the lifetime of the façade.
pub struct Client {
    router: Arc<dyn Router>,
}

impl Client {
    /// Builds a façade over a single target with direct routing.
    pub async fn single(target: ConnectionTarget) -> Result<Self> {
        let endpoint = Arc::new(ServerEndpointClient::connect(target).await?);
        Ok(Self { router: Arc::new(DirectRouter::new(endpoint)) })
    }

    /// Builds a façade over many targets with sharded (jump-hash) routing.
    /// A single-element `targets` still builds a degenerate one-bucket
    /// `ShardedRouter` rather than a `DirectRouter` — matching the original
    /// source's behavior of always routing through the sharded client once
    /// the caller asked for the multi-target constructor. Callers who want
    /// the single-target fast path should use [`Client::single`] instead.
    pub async fn sharded(targets: Vec<ConnectionTarget>) -> Result<Self> {
        let mut endpoints = Vec::with_capacity(targets.len());
        for target in targets {
            endpoints.push(Arc::new(ServerEndpointClient::connect(target).await?));
        }
        Ok(Self { router: Arc::new(ShardedRouter::new(endpoints)) })
    }

    /// Builds a façade from `"host:port"` strings: direct routing for a
    /// single target, sharded routing for more than one.
    pub async fn from_addresses(addresses: &[String]) -> Result<Self> {
        let mut targets = Vec::with_capacity(addresses.len());
        for address in addresses {
            targets.push(parse_target(address)?);
        }
        if targets.len() == 1 {
            let Some(target) = targets.into_iter().next() else {
                unreachable!("len checked above")
            };
            Self::single(target).await
        } else {
            Self::sharded(targets).await
        }
    }

    /// Builds a façade from a loaded [`ClientConfig`], honoring its
    /// `routing` field rather than inferring it from the target count.
    pub async fn from_config(cfg: &ClientConfig) -> Result<Self> {
        cfg.validate()
            .map_err(|e| ClientError::Protocol(format!("invalid client config: {e}")))?;
        match cfg.routing {
            RoutingStrategy::Direct => {
                let Some(target) = cfg.targets.first() else {
                    return Err(ClientError::Protocol(
                        "direct routing requires exactly one target".to_string(),
                    ));
                };
                Self::single(target.to_connection_target()).await
            },
            RoutingStrategy::Sharded => {
                let targets =
                    cfg.targets.iter().map(TargetConfig::to_connection_target).collect();
                Self::sharded(targets).await
            },
        }
    }

    fn route(&self, key: &str) -> Arc<ServerEndpointClient> {
        self.router.route(key)
    }

    /// `Add(key, value, ttl) -> MutationResult` — store if absent.
    pub async fn add(&self, key: &str, value: &[u8], ttl: i64) -> Result<MutationResult> {
        self.route(key).add(key, value, ttl).await
    }

    /// `Replace(key, value, ttl) -> MutationResult` — store if present.
    pub async fn replace(
        &self,
        key: &str,
        value: &[u8],
        ttl: i64,
    ) -> Result<MutationResult> {
        self.route(key).replace(key, value, ttl).await
    }

    /// `Set(key, value, ttl) -> MutationResult` — unconditional store.
    pub async fn set(&self, key: &str, value: &[u8], ttl: i64) -> Result<MutationResult> {
        self.route(key).set(key, value, ttl).await
    }

    /// `Delete(key) -> MutationResult`.
    pub async fn delete(&self, key: &str) -> Result<MutationResult> {
        self.route(key).delete(key).await
    }

    /// `Touch(key, ttl) -> MutationResult` — update expiration only.
    pub async fn touch(&self, key: &str, ttl: i64) -> Result<MutationResult> {
        self.route(key).touch(key, ttl).await
    }

    /// `Get(key) -> optional bytes`.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.route(key).get(key).await
    }

    /// `Info(key) -> EntryInfo`.
    pub async fn info(&self, key: &str) -> Result<EntryInfo> {
        self.route(key).info(key).await
    }

    /// Issues one `Get` per key, concurrently, possibly against different
    /// shards. Per-key errors degrade to `None` (logged at `warn`, per
    /// §4.5) rather than failing the whole call — bulk reads across shards
    /// cannot fail atomically, so degrading partial failure to misses
    /// preserves the cache-through semantic callers expect. The call
    /// completes once every sub-get has completed.
    pub async fn get_many(&self, keys: &[String]) -> HashMap<String, Option<Bytes>> {
        let tasks: Vec<_> = keys
            .iter()
            .map(|key| {
                let endpoint = self.route(key);
                let key = key.clone();
                tokio::spawn(async move {
                    let value = match endpoint.get(&key).await {
                        Ok(value) => value,
                        Err(e) => {
                            tracing::warn!(
                                "GetMany: {key} failed, degrading to miss: {e}"
                            );
                            None
                        },
                    };
                    (key, value)
                })
            })
            .collect();

        let mut results = HashMap::with_capacity(tasks.len());
        for task in tasks {
            // A panic in one sub-get must not poison the others; it has no
            // meaningful key to degrade to a miss for, so it's just dropped.
            if let Ok((key, value)) = task.await {
                results.insert(key, value);
            }
        }
        results
    }

    /// Closes every endpoint this façade routes to. Idempotent; propagates
    /// Façade -> Router -> SECs -> PTCs, each layer closing what it owns.
    pub async fn shutdown(&self) {
        for endpoint in self.router.endpoints() {
            endpoint.shutdown().await;
        }
    }
}

/// Splits a `"host:port"` string into a [`ConnectionTarget`] with default
/// `max_outstanding_requests`/`timeout_ms`.
fn parse_target(address: &str) -> Result<ConnectionTarget> {
    let (host, port) = address.rsplit_once(':').ok_or_else(|| {
        crate::error::ClientError::Protocol(format!(
            "invalid target address {address:?}: expected \"host:port\""
        ))
    })?;
    let port: u16 = port.parse().map_err(|e| {
        crate::error::ClientError::Protocol(format!(
            "invalid port in target address {address:?}: {e}"
        ))
    })?;
    Ok(ConnectionTarget::new(host, port))
}
