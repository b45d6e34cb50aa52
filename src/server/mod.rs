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

//! RPC server: accept loop, per-connection pipeline and dispatch.
//!
//! One listener serves all three wire modes. The first packet of every
//! accepted connection is peeked (never consumed) and classified once:
//! a WebSocket upgrade request, plain HTTP, or the binary protocol. The
//! classification is permanent for the connection.
//!
//! Each connection runs one reader loop and one writer task. Requests are
//! decoded on the reader, then either dispatched inline or — with
//! multiplexing on — spawned under a bounded semaphore so one slow handler
//! cannot stall the connection while fan-out stays capped.

pub mod handler;
pub mod session;

pub use handler::{ApiHandler, ApiManager, Call, CallFilter, Params};
pub use session::{Session, SessionRegistry};

use crate::codec::{BinaryCodec, Body, Codec, HttpCodec};
use crate::error::{codes, ApiError};
use crate::host::HostOptions;
use crate::message::Frame;
use crate::transport::{http, tcp, websocket, BoxSink, BoxSource, TransportError};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

/// Error messages matching any of these fragments are replaced wholesale
/// before they reach the wire, so database internals never leak to callers.
const REDACTED_ERROR_PATTERNS: &[&str] = &[
    "SqlException",
    "PgError",
    "MySqlError",
    "SqliteError",
    "DatabaseError",
    "sqlx::Error",
    "rusqlite::Error",
    "diesel::result",
];

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Listen address, e.g. `0.0.0.0:6701`.
    pub address: String,
    /// Dispatch requests concurrently per connection.
    pub multiplex: bool,
    /// Cap on concurrently dispatched requests per connection.
    pub max_inflight: usize,
    /// Set `SO_REUSEADDR` on the listener.
    pub reuse_address: bool,
    /// HTTP mode: carry result codes on the status line instead of the
    /// wrapped JSON envelope.
    pub use_http_status: bool,
    /// Shared timing options.
    pub host: HostOptions,
}

impl ServerOptions {
    /// Creates options listening on `address` with the defaults.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            multiplex: true,
            max_inflight: 64,
            reuse_address: false,
            use_http_status: false,
            host: HostOptions::default(),
        }
    }

    /// Disables concurrent per-connection dispatch.
    #[must_use]
    pub fn without_multiplex(mut self) -> Self {
        self.multiplex = false;
        self
    }

    /// Sets the per-connection dispatch cap.
    #[must_use]
    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight;
        self
    }

    /// Enables `SO_REUSEADDR` on the listener.
    #[must_use]
    pub fn with_reuse_address(mut self) -> Self {
        self.reuse_address = true;
        self
    }

    /// Enables HTTP status-line result codes.
    #[must_use]
    pub fn with_http_status(mut self) -> Self {
        self.use_http_status = true;
        self
    }

    /// Replaces the timing options.
    #[must_use]
    pub fn with_host(mut self, host: HostOptions) -> Self {
        self.host = host;
        self
    }
}

/// Wire mode detected from a connection's first packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireMode {
    Binary,
    Http,
    WebSocket,
}

/// The RPC server.
///
/// # Examples
///
/// ```no_run
/// use srmp::server::{ApiServer, ServerOptions};
///
/// # async fn run() -> Result<(), srmp::transport::TransportError> {
/// let server = ApiServer::new(ServerOptions::new("127.0.0.1:6701"));
/// server.manager().register("demo/echo", |call| async move {
///     let text: String = call.params.get("text")?;
///     Ok(text)
/// });
/// let addr = server.start().await?;
/// println!("listening on {addr}");
/// # Ok(())
/// # }
/// ```
pub struct ApiServer {
    options: ServerOptions,
    manager: Arc<ApiManager>,
    sessions: Arc<SessionRegistry>,
    shutdown: watch::Sender<bool>,
    local_addr: RwLock<Option<SocketAddr>>,
    tasks: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ApiServer {
    /// Creates a stopped server.
    #[must_use]
    pub fn new(options: ServerOptions) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            options,
            manager: Arc::new(ApiManager::new()),
            sessions: Arc::new(SessionRegistry::new()),
            shutdown,
            local_addr: RwLock::new(None),
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// The action registry.
    #[must_use]
    pub fn manager(&self) -> &Arc<ApiManager> {
        &self.manager
    }

    /// Live sessions.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// The bound address once [`start`](Self::start) has returned.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// Returns the bound address, which resolves port `0` requests.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the listener cannot be bound.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, TransportError> {
        let listener = tcp::bind(&self.options.address, self.options.reuse_address).await?;
        let local = listener
            .local_addr()
            .map_err(|e| TransportError::BindFailed {
                address: self.options.address.clone(),
                source: e,
            })?;
        *self.local_addr.write() = Some(local);
        info!(address = %local, "server listening");

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(accept_loop(
            Arc::clone(self),
            listener,
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(stat_loop(
            Arc::clone(&self.manager),
            self.options.host.stat_period,
        )));
        Ok(local)
    }

    /// Pushes a one-way message to every live session.
    ///
    /// Returns how many sessions the message was handed to. Delivery is
    /// best-effort; connections dying mid-send are reaped by their readers.
    pub fn invoke_all(&self, action: &str, body: &Body) -> usize {
        let mut sent = 0;
        for session in self.sessions.all() {
            match session.push(action, body) {
                Ok(()) => sent += 1,
                Err(err) => warn!(session = session.id(), error = %err, "push failed"),
            }
        }
        sent
    }

    /// Stops accepting and tears down background tasks.
    ///
    /// Live connections close as their reader loops observe the shutdown
    /// signal.
    pub fn stop(&self) {
        drop(self.shutdown.send(true));
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("server stopped");
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

async fn accept_loop(
    server: Arc<ApiServer>,
    listener: tokio::net::TcpListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "connection accepted");
                    tokio::spawn(handle_connection(Arc::clone(&server), stream, peer));
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                }
            },
        }
    }
}

/// Peeks the first packet without consuming it and classifies the wire
/// mode. The decision is made once per connection and never revisited.
async fn sniff(stream: &TcpStream) -> Result<WireMode, TransportError> {
    let mut buf = vec![0u8; 8192];
    let mut seen = 0;
    for _ in 0..200 {
        let n = stream
            .peek(&mut buf)
            .await
            .map_err(|e| TransportError::ReadFailed { source: e })?;
        if n == 0 {
            return Err(TransportError::ConnectionLost {
                reason: "peer closed before first packet".into(),
            });
        }
        let data = &buf[..n];
        if !starts_with_http_method(data) {
            return Ok(WireMode::Binary);
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") || n == buf.len() {
            return Ok(if websocket::is_upgrade_request(data) {
                WireMode::WebSocket
            } else {
                WireMode::Http
            });
        }
        // headers still in flight; wait for the rest of the packet
        if n == seen {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        seen = n;
    }
    Ok(WireMode::Http)
}

fn starts_with_http_method(data: &[u8]) -> bool {
    const METHODS: &[&[u8]] = &[
        b"GET ", b"POST ", b"PUT ", b"DELETE ", b"HEAD ", b"OPTIONS ", b"PATCH ",
    ];
    METHODS.iter().any(|m| {
        let n = m.len().min(data.len());
        data[..n] == m[..n]
    })
}

async fn handle_connection(server: Arc<ApiServer>, stream: TcpStream, peer: SocketAddr) {
    let mode = match sniff(&stream).await {
        Ok(mode) => mode,
        Err(err) => {
            debug!(peer = %peer, error = %err, "sniff failed");
            return;
        }
    };
    debug!(peer = %peer, mode = ?mode, "wire mode detected");

    let (sink, source, codec): (BoxSink, BoxSource, Arc<dyn Codec>) = match mode {
        WireMode::Binary => {
            let (sink, source) = tcp::from_stream(stream);
            (Box::new(sink), Box::new(source), Arc::new(BinaryCodec))
        }
        WireMode::Http => {
            let (sink, source) = http::from_stream(stream, false);
            (
                Box::new(sink),
                Box::new(source),
                Arc::new(HttpCodec::new(server.options.use_http_status)),
            )
        }
        WireMode::WebSocket => match websocket::accept(stream).await {
            Ok((sink, source)) => (Box::new(sink), Box::new(source), Arc::new(BinaryCodec)),
            Err(err) => {
                warn!(peer = %peer, error = %err, "websocket handshake failed");
                return;
            }
        },
    };

    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    let session = server.sessions.create(peer, writer_tx, codec);
    let writer = tokio::spawn(write_loop(sink, writer_rx));

    // replies can arrive out of order only where the wire carries
    // correlation; HTTP mode must answer in request order
    let multiplex = server.options.multiplex && mode != WireMode::Http;
    read_loop(&server, &session, source, multiplex).await;

    server.sessions.remove(session.id());
    writer.abort();
    debug!(peer = %peer, session = session.id(), "connection closed");
}

async fn write_loop(mut sink: BoxSink, mut rx: mpsc::UnboundedReceiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        if let Err(err) = sink.send(&frame).await {
            debug!(error = %err, "write failed");
            break;
        }
    }
    drop(sink.close().await);
}

async fn read_loop(
    server: &Arc<ApiServer>,
    session: &Arc<Session>,
    mut source: BoxSource,
    multiplex: bool,
) {
    let mut shutdown = server.shutdown.subscribe();
    let inflight = Arc::new(Semaphore::new(server.options.max_inflight.max(1)));
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            received = source.recv() => match received {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    debug!(session = session.id(), error = %err, "read failed");
                    break;
                }
            },
        };
        session.touch();

        // a server only ever receives requests; stray replies are dropped
        if frame.is_reply() {
            debug!(session = session.id(), "ignoring reply frame");
            continue;
        }

        if multiplex {
            let Ok(permit) = Arc::clone(&inflight).acquire_owned().await else {
                break;
            };
            let server = Arc::clone(server);
            let session = Arc::clone(session);
            tokio::spawn(async move {
                process(&server, &session, frame).await;
                drop(permit);
            });
        } else {
            process(server, session, frame).await;
        }
    }
}

/// Decodes, dispatches and answers a single request frame.
async fn process(server: &Arc<ApiServer>, session: &Arc<Session>, frame: Frame) {
    let codec = Arc::clone(session.codec());
    let oneway = frame.is_oneway();

    let message = match codec.decode(&frame) {
        Ok(message) => message,
        Err(err) => {
            warn!(session = session.id(), error = %err, "undecodable request");
            if !oneway {
                // the action could not be read; replies still need a
                // non-empty one for every codec to round-trip
                respond(session, &codec, &frame, "?", codes::BAD_REQUEST, "bad request");
            }
            return;
        }
    };

    let started = Instant::now();
    let result = if valid_action(&message.action) {
        server
            .manager
            .dispatch(Arc::clone(session), &message.action, message.data)
            .await
            .map_err(redact)
    } else {
        Err(ApiError::bad_request("invalid action name"))
    };

    let elapsed = started.elapsed();
    if elapsed > server.options.host.slow_trace {
        warn!(
            action = %message.action,
            session = session.id(),
            elapsed_ms = elapsed.as_millis() as u64,
            "slow handler"
        );
    }

    if oneway {
        if let Err(err) = &result {
            debug!(action = %message.action, error = %err, "one-way handler failed");
        }
        return;
    }

    match result {
        Ok(body) => match codec.encode_response(&frame, &message.action, codes::SUCCESS, &body) {
            Ok(reply) => session.send_frame(reply),
            Err(err) => {
                warn!(action = %message.action, error = %err, "unencodable response");
                respond(
                    session,
                    &codec,
                    &frame,
                    &message.action,
                    codes::INTERNAL_SERVER_ERROR,
                    "internal error",
                );
            }
        },
        Err(err) => respond(session, &codec, &frame, &message.action, err.code, &err.message),
    }
}

/// Encodes and queues an error reply. The request's action rides along so
/// clients that decode the reply envelope see a well-formed message.
fn respond(
    session: &Arc<Session>,
    codec: &Arc<dyn Codec>,
    request: &Frame,
    action: &str,
    code: i32,
    message: &str,
) {
    let body = Body::Raw(message.as_bytes().to_vec());
    match codec.encode_response(request, action, code, &body) {
        Ok(reply) => session.send_frame(reply),
        Err(err) => warn!(error = %err, "unencodable error reply"),
    }
}

/// Actions must be non-empty printable ASCII; anything else is rejected
/// before lookup so hostile bytes never reach the registry or the logs.
fn valid_action(action: &str) -> bool {
    !action.is_empty()
        && action.len() <= 256
        && action
            .bytes()
            .all(|b| b.is_ascii_graphic() || b == b' ')
}

/// Replaces database-flavored error text with a generic message. Codes are
/// preserved for typed errors; everything recognizably database-shaped
/// becomes an opaque internal error.
fn redact(err: ApiError) -> ApiError {
    let mut text = format!("{err}");
    let mut source: Option<&(dyn std::error::Error + 'static)> = err
        .source
        .as_deref()
        .map(|s| s as &(dyn std::error::Error + 'static));
    while let Some(cause) = source {
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    if REDACTED_ERROR_PATTERNS
        .iter()
        .any(|pattern| text.contains(pattern))
    {
        ApiError::internal("database error")
    } else {
        err
    }
}

async fn stat_loop(manager: Arc<ApiManager>, period: Duration) {
    if period.is_zero() {
        return;
    }
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        for (action, stats) in manager.take_stats() {
            info!(
                action = %action,
                calls = stats.count,
                errors = stats.errors,
                avg_us = stats.avg_micros(),
                max_us = stats.max_micros,
                "action statistics"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_validation() {
        assert!(valid_action("user/get"));
        assert!(valid_action("a"));
        assert!(!valid_action(""));
        assert!(!valid_action("bad\u{7}action"));
        assert!(!valid_action("caf\u{e9}/get"));
        assert!(!valid_action(&"x".repeat(300)));
    }

    #[test]
    fn test_http_method_sniff() {
        assert!(starts_with_http_method(b"GET /a HTTP/1.1\r\n"));
        assert!(starts_with_http_method(b"POST"));
        assert!(starts_with_http_method(b"GE"));
        assert!(!starts_with_http_method(b"GETX"));
        assert!(!starts_with_http_method(&[0x00, 0x05, 0x00]));
    }

    #[test]
    fn test_redaction() {
        let err = redact(ApiError::internal("SqlException: table users has no column x"));
        assert_eq!(err.message, "database error");
        assert_eq!(err.code, codes::INTERNAL_SERVER_ERROR);

        let io = std::io::Error::new(std::io::ErrorKind::Other, "sqlx::Error: pool timed out");
        let err = redact(ApiError::internal("query failed").with_source(io));
        assert_eq!(err.message, "database error");

        let err = redact(ApiError::forbidden("not yours"));
        assert_eq!(err.message, "not yours");
        assert_eq!(err.code, codes::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_error_reply_carries_request_action() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let codec: Arc<dyn Codec> = Arc::new(BinaryCodec);
        let session = registry.create("127.0.0.1:1".parse().unwrap(), tx, Arc::clone(&codec));

        let request = BinaryCodec.encode_request("user/get", &Body::None).unwrap();
        respond(&session, &codec, &request, "user/get", codes::FORBIDDEN, "not yours");

        let reply = rx.recv().await.unwrap();
        assert!(reply.is_error());
        let msg = codec.decode(&reply).unwrap();
        assert_eq!(msg.action, "user/get");
        assert_eq!(msg.code, codes::FORBIDDEN);
        assert_eq!(msg.data.as_deref(), Some(&b"not yours"[..]));
    }

    #[test]
    fn test_options_defaults() {
        let options = ServerOptions::new("127.0.0.1:0");
        assert!(options.multiplex);
        assert!(!options.reuse_address);
        assert!(!options.use_http_status);
        assert_eq!(options.max_inflight, 64);
    }
}
