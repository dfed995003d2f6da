// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wire encoding and reply parsing for the memcached "meta" text protocol.
//!
//! Everything here is a pure function operating on already-read bytes; the
//! framing (how many bytes to read off the socket for a value body) lives in
//! [`crate::ptc`], which is the only piece of the crate that actually touches
//! a socket.

use bytes::{Bytes, BytesMut};

use crate::error::ClientError;

/// A single decoded reply: the whitespace-split tokens of the first line
/// (`header[0]` is the reply code), the value body when the code is
/// value-bearing, and a diagnostic error when the code is
/// `ERROR`/`CLIENT_ERROR`/`SERVER_ERROR`.
///
/// Per the data model, at most one of "a non-error reply" or `error` is
/// meaningful: a recognized error code becomes a [`ClientError`] at the
/// [`crate::sec::ServerEndpointClient`] layer, not here.
#[derive(Debug)]
pub struct Response {
    pub header: Vec<String>,
    pub value: Option<Bytes>,
    pub error: Option<ClientError>,
}

impl Response {
    /// The reply code, i.e. the first header token. Empty if somehow the
    /// header was empty (never produced by [`crate::ptc`] in practice).
    pub fn code(&self) -> &str {
        self.header.first().map(String::as_str).unwrap_or("")
    }
}

/// The closed set of outcomes for write-family operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationResult {
    Success,
    NotStored,
    Exists,
    NotFound,
    Error,
}

/// Debug/accounting metadata returned by `Info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    /// Seconds until expiration; negative means no expiration.
    pub time_to_live: i64,
    /// Seconds since the entry was last read.
    pub last_access: u64,
    /// CAS version.
    pub cas_id: u64,
    /// Whether the entry has been read at least once since it was stored.
    pub fetched: bool,
    pub slab_class_id: u32,
    pub size: u64,
}

/// `mg <key> t f v\r\n`
pub fn encode_get(key: &str) -> Bytes {
    Bytes::from(format!("mg {key} t f v\r\n"))
}

/// `mg <key> T<ttl>\r\n`
pub fn encode_touch(key: &str, ttl: i64) -> Bytes {
    Bytes::from(format!("mg {key} T{ttl}\r\n"))
}

/// `md <key>\r\n`
pub fn encode_delete(key: &str) -> Bytes {
    Bytes::from(format!("md {key}\r\n"))
}

/// `me <key>\r\n`
pub fn encode_info(key: &str) -> Bytes {
    Bytes::from(format!("me {key}\r\n"))
}

/// `ms <key> <len> T<ttl>\r\n<value>\r\n` — unconditional store.
pub fn encode_set(key: &str, value: &[u8], ttl: i64) -> Bytes {
    encode_store(key, value, ttl, 'T')
}

/// `ms <key> <len> E<ttl>\r\n<value>\r\n` — store-if-absent.
pub fn encode_add(key: &str, value: &[u8], ttl: i64) -> Bytes {
    encode_store(key, value, ttl, 'E')
}

/// `ms <key> <len> R<ttl>\r\n<value>\r\n` — store-if-present.
pub fn encode_replace(key: &str, value: &[u8], ttl: i64) -> Bytes {
    encode_store(key, value, ttl, 'R')
}

fn encode_store(key: &str, value: &[u8], ttl: i64, mode: char) -> Bytes {
    let mut buf = BytesMut::with_capacity(key.len() + value.len() + 32);
    buf.extend_from_slice(
        format!("ms {key} {} {mode}{ttl}\r\n", value.len()).as_bytes(),
    );
    buf.extend_from_slice(value);
    buf.extend_from_slice(b"\r\n");
    buf.freeze()
}

/// Whether `code` carries a value body, and if so at which token its
/// declared length lives. Returns `None` for codes that never carry a body.
/// Returns `Some(Err(_))` if the length token is missing or unparseable —
/// this is a fatal protocol error for the connection.
pub fn value_body_len(
    code: &str,
    tokens: &[String],
) -> Option<Result<usize, ClientError>> {
    let len_token_index = match code {
        "VA" => 1,
        "VALUE" => 3,
        _ => return None,
    };
    Some(
        tokens
            .get(len_token_index)
            .ok_or_else(|| {
                ClientError::Protocol(format!(
                    "{code} reply missing length token"
                ))
            })
            .and_then(|s| {
                s.parse::<usize>().map_err(|e| {
                    ClientError::Protocol(format!(
                        "invalid length in {code} reply: {e}"
                    ))
                })
            }),
    )
}

/// Whether `code` is a server-side protocol error.
pub fn is_protocol_error(code: &str) -> bool {
    matches!(code, "ERROR" | "CLIENT_ERROR" | "SERVER_ERROR")
}

/// Maps a mutation reply's header to the closed `MutationResult` set.
pub fn mutation_result(header: &[String]) -> MutationResult {
    match header.first().map(String::as_str) {
        Some("HD") => MutationResult::Success,
        Some("NS") => MutationResult::NotStored,
        Some("EX") => MutationResult::Exists,
        Some("NF") | Some("EN") => MutationResult::NotFound,
        _ => MutationResult::Error,
    }
}

/// Parses an `ME` reply into an [`EntryInfo`]. Tolerates more than 8 tokens
/// (forward compatibility) but rejects fewer than 8.
pub fn entry_info(header: &[String]) -> Result<EntryInfo, ClientError> {
    if header.first().map(String::as_str) != Some("ME") {
        return Err(ClientError::Protocol(format!(
            "expected ME reply, got {:?}",
            header.first()
        )));
    }
    if header.len() < 8 {
        return Err(ClientError::Protocol(format!(
            "ME reply too short: {} tokens",
            header.len()
        )));
    }

    let field = |idx: usize| -> Result<&str, ClientError> {
        header[idx].split_once('=').map(|(_, v)| v).ok_or_else(|| {
            ClientError::Protocol(format!(
                "malformed debug field at position {idx}: {:?}",
                header[idx]
            ))
        })
    };
    let parse = |idx: usize| -> Result<i64, ClientError> {
        field(idx)?.parse().map_err(|e| {
            ClientError::Protocol(format!(
                "unparseable integer at position {idx}: {e}"
            ))
        })
    };

    Ok(EntryInfo {
        time_to_live: parse(2)?,
        last_access: parse(3)?.max(0) as u64,
        cas_id: parse(4)?.max(0) as u64,
        fetched: field(5)? == "yes",
        slab_class_id: parse(6)? as u32,
        size: parse(7)?.max(0) as u64,
    })
}
