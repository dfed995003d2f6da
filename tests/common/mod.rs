// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A minimal hand-rolled meta-protocol TCP server used as a fixture across
//! the integration tests in this directory. There is no `memcached` binary
//! to shell out to in this environment, so this takes the place of the
//! teacher's `docker`-backed integration harness and the original source's
//! `testcontainers`-based ones.

#![allow(dead_code)]

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedReadHalf},
    sync::Mutex,
};

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    ttl: i64,
    cas: u64,
    fetched: bool,
}

type Store = Arc<Mutex<HashMap<String, Entry>>>;

/// One parsed request line plus its value body, if any.
struct Command {
    tokens: Vec<String>,
    body: Option<Vec<u8>>,
}

async fn read_command(reader: &mut BufReader<OwnedReadHalf>) -> Option<Command> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await.ok()?;
    if n == 0 {
        return None;
    }
    while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
        line.pop();
    }
    let text = String::from_utf8(line).ok()?;
    let tokens: Vec<String> = text.split_whitespace().map(str::to_owned).collect();
    if tokens.is_empty() {
        return None;
    }

    let body = if tokens[0] == "ms" {
        let len: usize = tokens.get(2)?.parse().ok()?;
        let mut buf = vec![0u8; len + 2];
        reader.read_exact(&mut buf).await.ok()?;
        buf.truncate(len);
        Some(buf)
    } else {
        None
    };

    Some(Command { tokens, body })
}

/// Applies one command against `store` and returns the wire-encoded reply.
async fn handle_command(store: &Store, cmd: &Command) -> Vec<u8> {
    let key = match cmd.tokens.get(1) {
        Some(k) => k.clone(),
        None => return b"CLIENT_ERROR missing key\r\n".to_vec(),
    };

    match cmd.tokens[0].as_str() {
        "mg" => {
            let wants_value = cmd.tokens.iter().any(|t| t == "v");
            let mut store = store.lock().await;
            if wants_value {
                match store.get_mut(&key) {
                    Some(entry) => {
                        entry.fetched = true;
                        format!(
                            "VA {} t{} f0\r\n",
                            entry.value.len(),
                            display_ttl(entry.ttl)
                        )
                        .into_bytes()
                        .into_iter()
                        .chain(entry.value.clone())
                        .chain(*b"\r\n")
                        .collect()
                    },
                    None => b"EN\r\n".to_vec(),
                }
            } else {
                // Touch: `mg <key> T<ttl>`.
                let ttl_token = cmd.tokens.iter().find(|t| t.starts_with('T'));
                let ttl: i64 =
                    ttl_token.and_then(|t| t[1..].parse().ok()).unwrap_or(0);
                match store.get_mut(&key) {
                    Some(entry) => {
                        entry.ttl = ttl;
                        b"HD\r\n".to_vec()
                    },
                    None => b"NF\r\n".to_vec(),
                }
            }
        },
        "ms" => {
            let Some(mode_token) = cmd.tokens.get(3) else {
                return b"CLIENT_ERROR missing mode\r\n".to_vec();
            };
            let mode = mode_token.chars().next().unwrap_or('T');
            let ttl: i64 = mode_token[1..].parse().unwrap_or(0);
            let value = cmd.body.clone().unwrap_or_default();

            let mut store = store.lock().await;
            let exists = store.contains_key(&key);
            let should_store = match mode {
                'E' => !exists,
                'R' => exists,
                _ => true,
            };
            if !should_store {
                return b"NS\r\n".to_vec();
            }
            let cas = store.get(&key).map(|e| e.cas + 1).unwrap_or(1);
            store.insert(key, Entry { value, ttl, cas, fetched: false });
            b"HD\r\n".to_vec()
        },
        "md" => {
            let mut store = store.lock().await;
            if store.remove(&key).is_some() {
                b"HD\r\n".to_vec()
            } else {
                b"NF\r\n".to_vec()
            }
        },
        "me" => {
            let store = store.lock().await;
            match store.get(&key) {
                Some(entry) => format!(
                    "ME {key} ttl={} la=0 c={} f={} cls=1 s={}\r\n",
                    display_ttl(entry.ttl),
                    entry.cas,
                    if entry.fetched { "yes" } else { "no" },
                    entry.value.len()
                )
                .into_bytes(),
                None => b"EN\r\n".to_vec(),
            }
        },
        _ => b"ERROR unknown command\r\n".to_vec(),
    }
}

fn display_ttl(ttl: i64) -> i64 {
    if ttl == 0 { -1 } else { ttl }
}

/// Spawns a server that speaks the meta protocol correctly and persists
/// state in an in-memory map across however many connections are opened
/// against it (so a client that reconnects keeps seeing the same data).
pub async fn spawn_fake_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let store: Store = Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            let store = Arc::clone(&store);
            tokio::spawn(serve_connection(stream, store));
        }
    });

    addr
}

async fn serve_connection(stream: TcpStream, store: Store) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    while let Some(cmd) = read_command(&mut reader).await {
        let reply = handle_command(&store, &cmd).await;
        if writer.write_all(&reply).await.is_err() {
            return;
        }
    }
}

/// Spawns a server whose *first* accepted connection reads and silently
/// discards `drop_after` full commands (no replies at all) before closing
/// the socket — simulating a mid-flight crash with several requests still
/// unacknowledged. Every later connection behaves like
/// [`spawn_fake_server`]'s handler against a fresh, empty store.
pub async fn spawn_drop_once_server(drop_after: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        let mut first = true;
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            if first {
                first = false;
                tokio::spawn(drop_after_n(stream, drop_after));
            } else {
                let store: Store = Arc::new(Mutex::new(HashMap::new()));
                tokio::spawn(serve_connection(stream, store));
            }
        }
    });

    addr
}

async fn drop_after_n(stream: TcpStream, n: usize) {
    let _ = stream.set_nodelay(true);
    let (read_half, _write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    for _ in 0..n {
        if read_command(&mut reader).await.is_none() {
            break;
        }
    }
    // Dropping both halves closes the socket without ever replying.
}

/// Spawns a server that answers every command correctly but only after
/// sleeping `delay`, to keep many concurrent dispatches in flight at once.
pub async fn spawn_slow_server(delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let store: Store = Arc::new(Mutex::new(HashMap::new()));

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            let store = Arc::clone(&store);
            tokio::spawn(serve_connection_slowly(stream, store, delay));
        }
    });

    addr
}

async fn serve_connection_slowly(stream: TcpStream, store: Store, delay: Duration) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    while let Some(cmd) = read_command(&mut reader).await {
        tokio::time::sleep(delay).await;
        let reply = handle_command(&store, &cmd).await;
        if writer.write_all(&reply).await.is_err() {
            return;
        }
    }
}
