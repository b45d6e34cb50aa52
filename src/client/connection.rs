//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! A single client connection with a background reader task.
//!
//! The connection owns the write half behind an async mutex and runs one
//! spawned task over the read half. Replies are matched to in-flight calls
//! through a pending map keyed by sequence number (binary and WebSocket
//! transports) or by arrival order (HTTP, whose wire carries no sequence).
//! Server pushes — frames without the reply flag — are decoded and handed
//! to the notification channel.

use crate::client::ClientError;
use crate::codec::{Body, BinaryCodec, Codec, HttpCodec};
use crate::message::{ApiMessage, Frame, FLAG_ONEWAY_OR_ERROR};
use crate::transport::{http, tcp, websocket, BoxSink, BoxSource, TransportError};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Reply correlation state shared between callers and the reader task.
enum Pending {
    /// Replies carry the request's sequence number.
    Sequenced(Mutex<HashMap<u8, oneshot::Sender<Frame>>>),
    /// Replies arrive in request order (HTTP pipelining).
    Fifo(Mutex<VecDeque<oneshot::Sender<Frame>>>),
}

impl Pending {
    /// Registers an in-flight call. Returns `false` when the sequence slot
    /// is already taken; the earlier caller keeps its slot.
    fn register(&self, sequence: u8, tx: oneshot::Sender<Frame>) -> bool {
        match self {
            Self::Sequenced(map) => match map.lock().entry(sequence) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                    true
                }
            },
            Self::Fifo(queue) => {
                queue.lock().push_back(tx);
                true
            }
        }
    }

    fn complete(&self, frame: Frame) {
        let tx = match self {
            Self::Sequenced(map) => map.lock().remove(&frame.sequence),
            Self::Fifo(queue) => queue.lock().pop_front(),
        };
        match tx {
            // the caller may have timed out and dropped the receiver
            Some(tx) => drop(tx.send(frame)),
            None => debug!(sequence = frame.sequence, "reply with no pending call"),
        }
    }

    /// Abandons one in-flight call. Returns `false` when unmatched removal
    /// is impossible and the connection must be invalidated instead: with
    /// FIFO correlation a skipped reply would answer the wrong caller.
    fn cancel(&self, sequence: u8) -> bool {
        match self {
            Self::Sequenced(map) => {
                map.lock().remove(&sequence);
                true
            }
            Self::Fifo(_) => false,
        }
    }

    fn fail_all(&self) {
        match self {
            Self::Sequenced(map) => map.lock().clear(),
            Self::Fifo(queue) => queue.lock().clear(),
        }
    }
}

/// One open connection to a server.
pub struct Connection {
    address: String,
    sink: tokio::sync::Mutex<BoxSink>,
    codec: Arc<dyn Codec>,
    pending: Arc<Pending>,
    sequence: AtomicU8,
    valid: Arc<AtomicBool>,
    reader: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Opens a connection to `address` and starts its reader task.
    ///
    /// The scheme picks the transport and codec: `ws://`/`wss://` use
    /// WebSocket with the binary envelope, `http://` uses HTTP text framing,
    /// and `tcp://` or a bare `host:port` use raw binary framing.
    ///
    /// # Errors
    ///
    /// Returns the connect failure so cluster code can fail over.
    pub async fn open(
        address: &str,
        use_http_status: bool,
        notify: mpsc::UnboundedSender<ApiMessage>,
    ) -> Result<Arc<Self>, ClientError> {
        let (sink, source, codec, pending): (BoxSink, BoxSource, Arc<dyn Codec>, Pending) =
            if address.starts_with("ws://") || address.starts_with("wss://") {
                let (sink, source, _) = websocket::connect(address).await?;
                (
                    Box::new(sink),
                    Box::new(source),
                    Arc::new(BinaryCodec),
                    Pending::Sequenced(Mutex::new(HashMap::new())),
                )
            } else if let Some(rest) = address.strip_prefix("http://") {
                let authority = rest.split('/').next().unwrap_or(rest);
                let (stream, _) = tcp::connect_stream(authority).await?;
                let (sink, source) = http::from_stream(stream, true);
                (
                    Box::new(sink),
                    Box::new(source),
                    Arc::new(HttpCodec::new(use_http_status)),
                    Pending::Fifo(Mutex::new(VecDeque::new())),
                )
            } else {
                let authority = address.strip_prefix("tcp://").unwrap_or(address);
                let (sink, source, _) = tcp::connect(authority).await?;
                (
                    Box::new(sink),
                    Box::new(source),
                    Arc::new(BinaryCodec),
                    Pending::Sequenced(Mutex::new(HashMap::new())),
                )
            };

        let pending = Arc::new(pending);
        let valid = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(
            source,
            Arc::clone(&pending),
            Arc::clone(&valid),
            Arc::clone(&codec),
            notify,
            address.to_owned(),
        ));

        Ok(Arc::new(Self {
            address: address.to_owned(),
            sink: tokio::sync::Mutex::new(sink),
            codec,
            pending,
            sequence: AtomicU8::new(1),
            valid,
            reader,
        }))
    }

    /// The address this connection was opened against.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns `true` while the connection is usable.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Marks the connection dead and abandons every in-flight call.
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
        self.pending.fail_all();
    }

    /// Sends a request and waits for the matching reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Timeout`] when no reply arrives within
    /// `timeout`, or a transport/codec error, both of which leave the
    /// connection invalidated where correlation can no longer be trusted.
    pub async fn call(
        &self,
        action: &str,
        body: &Body,
        timeout: Duration,
    ) -> Result<ApiMessage, ClientError> {
        if !self.is_valid() {
            return Err(TransportError::Closed.into());
        }
        let mut frame = self.codec.encode_request(action, body)?;
        let (sequence, rx) = self
            .register_call()
            .ok_or_else(|| ClientError::SequenceExhausted {
                action: action.to_owned(),
            })?;
        frame.sequence = sequence;

        if let Err(err) = self.send_frame(&frame).await {
            self.pending.cancel(frame.sequence);
            self.invalidate();
            return Err(err.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(self.codec.decode(&reply).map_err(|err| {
                self.invalidate();
                err
            })?),
            Ok(Err(_)) => Err(TransportError::ConnectionLost {
                reason: format!("connection to {} dropped mid-call", self.address),
            }
            .into()),
            Err(_) => {
                if !self.pending.cancel(frame.sequence) {
                    self.invalidate();
                }
                Err(ClientError::Timeout {
                    action: action.to_owned(),
                    timeout,
                })
            }
        }
    }

    /// Sends a request without waiting for any reply.
    ///
    /// Returns the number of bytes written to the transport.
    ///
    /// # Errors
    ///
    /// Returns a transport or codec error; transport failures invalidate
    /// the connection.
    pub async fn send_oneway(&self, action: &str, body: &Body) -> Result<usize, ClientError> {
        if !self.is_valid() {
            return Err(TransportError::Closed.into());
        }
        let mut frame = self.codec.encode_request(action, body)?;
        frame.flags |= FLAG_ONEWAY_OR_ERROR;
        frame.sequence = self.next_sequence();
        match self.send_frame(&frame).await {
            Ok(written) => Ok(written),
            Err(err) => {
                self.invalidate();
                Err(err.into())
            }
        }
    }

    /// Closes the transport and stops the reader task.
    pub async fn close(&self) {
        self.invalidate();
        if let Err(err) = self.sink.lock().await.close().await {
            debug!(address = %self.address, error = %err, "close failed");
        }
        self.reader.abort();
    }

    async fn send_frame(&self, frame: &Frame) -> Result<usize, TransportError> {
        self.sink.lock().await.send(frame).await
    }

    /// Claims a free sequence slot for a call. `None` means every slot has
    /// a call in flight, so the new call cannot be correlated.
    fn register_call(&self) -> Option<(u8, oneshot::Receiver<Frame>)> {
        for _ in 0..usize::from(u8::MAX) {
            let sequence = self.next_sequence();
            let (tx, rx) = oneshot::channel();
            if self.pending.register(sequence, tx) {
                return Some((sequence, rx));
            }
        }
        None
    }

    /// Sequence numbers run 1..=255 and wrap; zero is reserved for frames
    /// that carry no correlation.
    fn next_sequence(&self) -> u8 {
        loop {
            let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
            if sequence != 0 {
                return sequence;
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

async fn read_loop(
    mut source: BoxSource,
    pending: Arc<Pending>,
    valid: Arc<AtomicBool>,
    codec: Arc<dyn Codec>,
    notify: mpsc::UnboundedSender<ApiMessage>,
    address: String,
) {
    loop {
        match source.recv().await {
            Ok(Some(frame)) => {
                if frame.is_reply() {
                    pending.complete(frame);
                } else {
                    match codec.decode(&frame) {
                        // the receiver may be gone; pushes are best-effort
                        Ok(message) => drop(notify.send(message)),
                        Err(err) => {
                            warn!(address = %address, error = %err, "undecodable push, closing");
                            break;
                        }
                    }
                }
            }
            Ok(None) => {
                debug!(address = %address, "server closed connection");
                break;
            }
            Err(err) => {
                warn!(address = %address, error = %err, "read failed");
                break;
            }
        }
    }
    valid.store(false, Ordering::Release);
    pending.fail_all();
}
