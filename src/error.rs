// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the pipelined channel, the endpoint client, and the
/// façade. Admission (`ConnectionOverloaded`) and timing (`RequestTimeout`)
/// errors are local to the failing call and never tear down the connection;
/// everything else is a transport or protocol failure that triggers a
/// reconnect before the error reaches the caller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The in-flight queue was already at `limit`; the dispatch was rejected
    /// before it reached the wire.
    #[error(
        "connection overloaded: {outstanding} requests already in flight \
         (limit {limit})"
    )]
    ConnectionOverloaded { outstanding: usize, limit: usize },

    /// The reply did not arrive within the configured `timeout_ms`. The
    /// request is still queued on the server side; its reply, if it ever
    /// arrives, is discarded.
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// The connection was torn down while this request was in flight or
    /// queued.
    #[error("connection reset while request was in flight")]
    ConnectionReset,

    /// A malformed reply, an explicit `ERROR`/`CLIENT_ERROR`/`SERVER_ERROR`
    /// reply, or a reply that doesn't match the operation that produced it.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A socket-level failure (connect, read, write, flush).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel has been shut down and no longer accepts dispatches.
    #[error("channel is shutting down")]
    ShuttingDown,
}

impl ClientError {
    /// True for the admission-gate rejection described by I3.
    pub fn is_overloaded(&self) -> bool {
        matches!(self, ClientError::ConnectionOverloaded { .. })
    }

    /// True when the call missed its `timeout_ms` deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::RequestTimeout(_))
    }

    /// True when the failure was a connection reset rather than a protocol
    /// or admission error.
    pub fn is_reset(&self) -> bool {
        matches!(self, ClientError::ConnectionReset)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
