// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The Server Endpoint Client (SEC): two [`PipelinedChannel`]s against one
//! target, one for read-family operations (`Get`, `Info`) and one for
//! mutation-family operations (`Set`, `Add`, `Replace`, `Delete`, `Touch`).
//!
//! Separating reads from mutations means a slow value-body read never stalls
//! acknowledgements for writes, and each side enforces its own
//! `max_outstanding_requests` budget independently.

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    codec::{self, EntryInfo, MutationResult},
    error::{ClientError, Result},
    ptc::{ConnectionTarget, PipelinedChannel},
};

/// A client against a single cache server target, split into a read channel
/// and a mutation channel.
pub struct ServerEndpointClient {
    read: Arc<PipelinedChannel>,
    mutation: Arc<PipelinedChannel>,
}

impl ServerEndpointClient {
    pub async fn connect(target: ConnectionTarget) -> Result<Self> {
        let read = PipelinedChannel::new(target.clone()).await?;
        let mutation = PipelinedChannel::new(target).await?;
        Ok(Self { read, mutation })
    }

    /// `Get(key) -> optional bytes`. `None` on an explicit miss (`EN`).
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let response = self.read.request(codec::encode_get(key)).await?;
        if let Some(error) = response.error {
            return Err(error);
        }
        match response.code() {
            "VA" => Ok(response.value),
            "EN" => Ok(None),
            other => Err(ClientError::Protocol(format!(
                "unexpected reply to Get: {other}"
            ))),
        }
    }

    /// `Info(key) -> EntryInfo`. Requires an `ME` reply with >= 8 tokens.
    pub async fn info(&self, key: &str) -> Result<EntryInfo> {
        let response = self.read.request(codec::encode_info(key)).await?;
        if let Some(error) = response.error {
            return Err(error);
        }
        codec::entry_info(&response.header)
    }

    /// `Set(key, value, ttl) -> MutationResult` — unconditional store.
    pub async fn set(&self, key: &str, value: &[u8], ttl: i64) -> Result<MutationResult> {
        self.mutate(codec::encode_set(key, value, ttl)).await
    }

    /// `Add(key, value, ttl) -> MutationResult` — store if absent.
    pub async fn add(&self, key: &str, value: &[u8], ttl: i64) -> Result<MutationResult> {
        self.mutate(codec::encode_add(key, value, ttl)).await
    }

    /// `Replace(key, value, ttl) -> MutationResult` — store if present.
    pub async fn replace(
        &self,
        key: &str,
        value: &[u8],
        ttl: i64,
    ) -> Result<MutationResult> {
        self.mutate(codec::encode_replace(key, value, ttl)).await
    }

    /// `Delete(key) -> MutationResult`.
    pub async fn delete(&self, key: &str) -> Result<MutationResult> {
        self.mutate(codec::encode_delete(key)).await
    }

    /// `Touch(key, ttl) -> MutationResult` — update expiration only.
    pub async fn touch(&self, key: &str, ttl: i64) -> Result<MutationResult> {
        self.mutate(codec::encode_touch(key, ttl)).await
    }

    async fn mutate(&self, command: Bytes) -> Result<MutationResult> {
        let response = self.mutation.request(command).await?;
        if let Some(error) = response.error {
            return Err(error);
        }
        Ok(codec::mutation_result(&response.header))
    }

    /// Closes both underlying channels. Idempotent.
    pub async fn shutdown(&self) {
        self.read.shutdown().await;
        self.mutation.shutdown().await;
    }
}
