// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A thin demo of the public façade, modeled directly on the original
//! source's `cmd/cli.go`: 50 concurrent `Set`s, a `Delete`, 50 more
//! concurrent `Set`s, then 10 concurrent `Get`s, followed by one `Info`
//! call. It exercises the public surface only — no behavior lives here that
//! isn't already on [`meta_cache_client::Client`].

use std::sync::Arc;

use anyhow::{Context, Result};
use meta_cache_client::{Client, ConnectionTarget};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    meta_cache_client::cfg::logger::init_tracing_subscriber("info")
        .context("failed to install tracing subscriber")?;

    let address =
        std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:11211".to_string());
    let (host, port) = address
        .rsplit_once(':')
        .context("expected address in \"host:port\" form")?;
    let port: u16 = port.parse().context("port must be a number")?;

    let client =
        Arc::new(Client::single(ConnectionTarget::new(host, port)).await.context(
            "failed to connect; pass a reachable \"host:port\" as the first argument",
        )?);
    info!("connected to {address}");

    let mut sets = Vec::new();
    for i in 0..50 {
        sets.push(spawn_set(Arc::clone(&client), i));
    }
    for handle in sets {
        handle.await.context("set task panicked")?;
    }

    match client.delete("a").await {
        Ok(result) => info!("delete(a) -> {result:?}"),
        Err(e) => error!("delete(a) failed: {e}"),
    }

    let mut more_sets = Vec::new();
    for i in 50..100 {
        more_sets.push(spawn_set(Arc::clone(&client), i));
    }
    for handle in more_sets {
        handle.await.context("set task panicked")?;
    }

    let mut gets = Vec::new();
    for i in 0..10 {
        let client = Arc::clone(&client);
        gets.push(tokio::spawn(async move {
            match client.get(&i.to_string()).await {
                Ok(value) => info!(
                    "get({i}) -> {:?}",
                    value.as_deref().map(String::from_utf8_lossy)
                ),
                Err(e) => error!("get({i}) failed: {e}"),
            }
        }));
    }
    for handle in gets {
        handle.await.context("get task panicked")?;
    }

    match client.info("0").await {
        Ok(info_result) => info!("info(0) -> {info_result:?}"),
        Err(e) => error!("info(0) failed: {e}"),
    }

    client.shutdown().await;
    Ok(())
}

fn spawn_set(client: Arc<Client>, i: u32) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let key = i.to_string();
        let value = format!("value-{i}");
        match client.set(&key, value.as_bytes(), 0).await {
            Ok(result) => info!("set({key}) -> {result:?}"),
            Err(e) => error!("set({key}) failed: {e}"),
        }
    })
}
