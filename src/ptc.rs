// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The Pipelined TCP Channel (PTC): a single owned TCP connection plus a FIFO
//! queue of in-flight requests.
//!
//! This is the hard part of the crate. A [`PipelinedChannel`] turns an
//! ordered, stream-oriented socket into a concurrent-dispatch primitive:
//! callers hand it pre-encoded command bytes and get back a one-shot
//! receiver for the matching reply. A single background reader owns the
//! readable half of the socket and delivers replies to requests strictly in
//! write order (I1/I2). A mutex guards the writable half and the queue
//! together so "write, then enqueue" is atomic with respect to other
//! dispatchers and the reader (§4.1).

use std::{collections::VecDeque, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    codec,
    error::{ClientError, Result},
};

/// Immutable description of one server to connect to.
#[derive(Debug, Clone)]
pub struct ConnectionTarget {
    pub address: String,
    pub port: u16,
    /// Hard admission-gate limit on in-flight requests (I3).
    pub max_outstanding_requests: usize,
    /// 0 disables the per-request timeout.
    pub timeout_ms: u64,
}

impl ConnectionTarget {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            max_outstanding_requests: 1000,
            timeout_ms: 1000,
        }
    }

    fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Guarded together per §4.1: the writable half and the queue of senders
/// awaiting a reply, plus a generation counter used to tell a stale reader
/// (one whose socket has already been replaced by a concurrent reconnect)
/// that it should simply stop rather than redial again.
struct Io {
    writer: OwnedWriteHalf,
    queue: VecDeque<oneshot::Sender<codec::Response>>,
    generation: u64,
    /// Handle of the currently-running reader task, so `shutdown` can abort
    /// and join it rather than leaking it past shutdown.
    reader_handle: Option<JoinHandle<()>>,
}

/// A single TCP connection to one target, multiplexing concurrent dispatches
/// with FIFO reply correlation, bounded backpressure, and reconnect-on-failure.
pub struct PipelinedChannel {
    target: ConnectionTarget,
    io: Mutex<Io>,
    shutdown: CancellationToken,
}

impl PipelinedChannel {
    /// Connects to `target` and starts the background reader. Fails
    /// immediately if the initial connect attempt fails (the documented
    /// choice between that and a "reconnecting from birth" channel — see
    /// DESIGN.md).
    pub async fn new(target: ConnectionTarget) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(target.socket_addr()).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let channel = Arc::new(Self {
            target,
            io: Mutex::new(Io {
                writer: write_half,
                queue: VecDeque::new(),
                generation: 0,
                reader_handle: None,
            }),
            shutdown: CancellationToken::new(),
        });

        let reader = BufReader::new(read_half);
        let handle = tokio::spawn(Arc::clone(&channel).reader_loop(reader, 0));
        channel.io.lock().await.reader_handle = Some(handle);

        Ok(channel)
    }

    /// Hands `bytes` to the channel. Returns a receiver yielding exactly one
    /// [`codec::Response`], or fails synchronously with
    /// [`ClientError::ConnectionOverloaded`] if the outstanding-request
    /// budget is exhausted (I3) — this call never blocks waiting for a slot.
    pub async fn dispatch(
        self: &Arc<Self>,
        bytes: Bytes,
    ) -> Result<oneshot::Receiver<codec::Response>> {
        if self.shutdown.is_cancelled() {
            return Err(ClientError::ShuttingDown);
        }

        let mut io = self.io.lock().await;
        let outstanding = io.queue.len();
        if outstanding >= self.target.max_outstanding_requests {
            return Err(ClientError::ConnectionOverloaded {
                outstanding,
                limit: self.target.max_outstanding_requests,
            });
        }

        let generation = io.generation;
        if let Err(e) = io.writer.write_all(&bytes).await {
            drop(io);
            self.reconnect(generation).await;
            return Err(e.into());
        }
        if let Err(e) = io.writer.flush().await {
            drop(io);
            self.reconnect(generation).await;
            return Err(e.into());
        }

        let (tx, rx) = oneshot::channel();
        io.queue.push_back(tx);
        Ok(rx)
    }

    /// [`dispatch`](Self::dispatch) plus waiting for the reply, wrapped in
    /// `target.timeout_ms` when non-zero (§4.1 Timeouts). This is what
    /// [`crate::sec::ServerEndpointClient`] calls for every operation.
    pub async fn request(self: &Arc<Self>, bytes: Bytes) -> Result<codec::Response> {
        let rx = self.dispatch(bytes).await?;

        if self.target.timeout_ms == 0 {
            return rx.await.map_err(|_| ClientError::ConnectionReset);
        }

        match timeout(Duration::from_millis(self.target.timeout_ms), rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::ConnectionReset),
            Err(_) => Err(ClientError::RequestTimeout(Duration::from_millis(
                self.target.timeout_ms,
            ))),
        }
    }

    /// Stops accepting dispatches, fails every still-queued request with a
    /// shutdown error, closes the socket, and joins the reader (§4.1, §9).
    /// The reader is aborted rather than relied upon to notice the
    /// cancellation token on its own, since it may be parked in a blocking
    /// socket read against a peer that never closes its end — `abort`
    /// reliably unparks it so the subsequent `await` actually joins.
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let mut io = self.io.lock().await;
        while let Some(tx) = io.queue.pop_front() {
            let _ = tx.send(codec::Response {
                header: Vec::new(),
                value: None,
                error: Some(ClientError::ShuttingDown),
            });
        }
        let _ = io.writer.shutdown().await;
        let reader_handle = io.reader_handle.take();
        drop(io);

        if let Some(handle) = reader_handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Drains and fails every still-queued request with `ConnectionReset`
    /// (I5), dials a fresh socket, and spawns a replacement reader. If
    /// `observed_generation` no longer matches the current generation, a
    /// concurrent caller has already performed the reconnect and this call
    /// is a no-op — the caller (whether the writer path or a stale reader)
    /// should simply stop using its old half of the connection.
    async fn reconnect(self: &Arc<Self>, observed_generation: u64) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let mut io = self.io.lock().await;
        if io.generation != observed_generation {
            return;
        }

        while let Some(tx) = io.queue.pop_front() {
            let _ = tx.send(codec::Response {
                header: Vec::new(),
                value: None,
                error: Some(ClientError::ConnectionReset),
            });
        }

        let stream = match TcpStream::connect(self.target.socket_addr()).await {
            Ok(s) => s,
            Err(e) => {
                warn!("reconnect to {} failed: {e}", self.target.socket_addr());
                // Leave the channel without a reader; the next dispatch will
                // try to write to the stale half and trigger another
                // reconnect attempt.
                return;
            },
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!("failed to set TCP_NODELAY after reconnect: {e}");
        }
        let (read_half, write_half) = stream.into_split();

        io.writer = write_half;
        io.generation += 1;
        let new_generation = io.generation;
        // The old reader task (if any) is left to notice the generation
        // mismatch and exit on its own rather than being aborted here: it
        // may already be mid-delivery of a reply popped before the
        // mismatch check, and aborting it out from under that would violate
        // I4. `shutdown` is the only place that forcibly aborts a reader.
        drop(io);

        debug!(
            "reconnected to {} (generation {new_generation})",
            self.target.socket_addr()
        );

        let reader = BufReader::new(read_half);
        let handle = tokio::spawn(Arc::clone(self).reader_loop(reader, new_generation));
        self.io.lock().await.reader_handle = Some(handle);
    }

    async fn reader_loop(
        self: Arc<Self>,
        mut reader: BufReader<OwnedReadHalf>,
        generation: u64,
    ) {
        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            match read_one_response(&mut reader).await {
                Ok(response) => {
                    let mut io = self.io.lock().await;
                    if io.generation != generation {
                        // A concurrent reconnect already replaced this
                        // reader's socket; this task is stale.
                        return;
                    }
                    let Some(tx) = io.queue.pop_front() else {
                        drop(io);
                        warn!(
                            "reply with no matching request on {}: {:?}; \
                             desynchronized, reconnecting",
                            self.target.socket_addr(),
                            response.header
                        );
                        self.reconnect(generation).await;
                        return;
                    };
                    drop(io);
                    // A dropped receiver (timeout, or the caller lost
                    // interest) is not an error here: the reply is simply
                    // discarded, per §4.1 Timeouts.
                    let _ = tx.send(response);
                },
                Err(e) => {
                    warn!(
                        "reader loop for {} exited: {e}",
                        self.target.socket_addr()
                    );
                    self.reconnect(generation).await;
                    return;
                },
            }
        }
    }
}

/// Reads one CRLF-terminated header line plus, if indicated, its
/// length-prefixed value body. Always strips the trailing CRLF from the
/// value regardless of which code produced it (§9 Open Questions).
async fn read_one_response(
    reader: &mut BufReader<OwnedReadHalf>,
) -> Result<codec::Response> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        )));
    }
    while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
        line.pop();
    }

    let line = String::from_utf8(line)
        .map_err(|e| ClientError::Protocol(format!("non-utf8 reply header: {e}")))?;
    let header: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
    if header.is_empty() {
        return Err(ClientError::Protocol("empty reply line".to_string()));
    }
    let code = header[0].as_str();

    let value = match codec::value_body_len(code, &header) {
        Some(Ok(len)) => {
            let mut buf = vec![0u8; len + 2];
            reader.read_exact(&mut buf).await?;
            buf.truncate(len);
            Some(Bytes::from(buf))
        },
        Some(Err(e)) => return Err(e),
        None => None,
    };

    let error = if codec::is_protocol_error(code) {
        Some(ClientError::Protocol(header.join(" ")))
    } else {
        None
    };

    Ok(codec::Response { header, value, error })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn pipe() -> (
        BufReader<OwnedReadHalf>,
        tokio::net::tcp::OwnedWriteHalf,
    ) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, server) = tokio::join!(connect, accept);
        let client = client.expect("connect");
        let (server, _) = server.expect("accept");
        let (read_half, _client_write) = client.into_split();
        let (_server_read, write_half) = server.into_split();
        (BufReader::new(read_half), write_half)
    }

    #[tokio::test]
    async fn reads_non_value_reply() {
        let (mut reader, mut writer) = pipe().await;
        writer.write_all(b"HD\r\n").await.expect("write");
        let resp = read_one_response(&mut reader).await.expect("parse");
        assert_eq!(resp.header, vec!["HD".to_string()]);
        assert!(resp.value.is_none());
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn reads_value_bearing_reply_and_strips_crlf() {
        let (mut reader, mut writer) = pipe().await;
        writer
            .write_all(b"VA 5 t30 f0\r\nhello\r\n")
            .await
            .expect("write");
        let resp = read_one_response(&mut reader).await.expect("parse");
        assert_eq!(resp.value.as_deref(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn legacy_value_reply_strips_crlf_too() {
        let (mut reader, mut writer) = pipe().await;
        writer
            .write_all(b"VALUE k 0 3\r\nabc\r\n")
            .await
            .expect("write");
        let resp = read_one_response(&mut reader).await.expect("parse");
        assert_eq!(resp.value.as_deref(), Some(&b"abc"[..]));
    }

    #[tokio::test]
    async fn marks_server_errors_without_failing_the_read() {
        let (mut reader, mut writer) = pipe().await;
        writer
            .write_all(b"CLIENT_ERROR bad command line\r\n")
            .await
            .expect("write");
        let resp = read_one_response(&mut reader).await.expect("parse");
        assert!(resp.error.is_some());
        assert_eq!(resp.header[0], "CLIENT_ERROR");
    }
}
