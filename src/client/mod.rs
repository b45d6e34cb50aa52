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

//! RPC client: typed invocation over a cluster of server addresses.
//!
//! [`ApiClient`] is the entry point. It owns a [`Cluster`] that hands out
//! connections, a notification channel for server pushes, and an optional
//! [`LoginHandler`] that runs once when a call comes back `401`.
//!
//! # Examples
//!
//! ```no_run
//! use srmp::client::ApiClient;
//!
//! # async fn run() -> Result<(), srmp::client::ClientError> {
//! let client = ApiClient::new("10.0.0.1:6701,10.0.0.2:6701");
//! client.open().await?;
//! let greeting: String = client.invoke("demo/hello", &"world").await?;
//! println!("{greeting}");
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod connection;
mod error;
pub mod pool;

pub use cluster::{Cluster, SingleCluster};
pub use connection::Connection;
pub use error::ClientError;
pub use pool::PoolCluster;

use crate::codec::{decode_result, Body};
use crate::error::ApiError;
use crate::host::HostOptions;
use crate::message::ApiMessage;
use crate::stat::CallCounter;
use async_trait::async_trait;
use cluster::Connector;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Hook run when a call is rejected with `401 Unauthorized`.
///
/// The handler typically invokes a login action through the same client to
/// refresh credentials, then the original call is retried exactly once.
/// Calls made *from inside* the handler never trigger another login pass.
#[async_trait]
pub trait LoginHandler: Send + Sync {
    /// Re-establishes credentials with the server.
    async fn login(&self, client: &ApiClient) -> Result<(), ClientError>;
}

struct OpenState {
    cluster: Arc<dyn Cluster>,
    stat_task: tokio::task::JoinHandle<()>,
}

/// RPC client over one or more server addresses.
pub struct ApiClient {
    servers: String,
    options: HostOptions,
    use_pool: bool,
    pool_size: usize,
    use_http_status: bool,
    login: Option<Arc<dyn LoginHandler>>,
    logging_in: AtomicBool,
    state: RwLock<Option<OpenState>>,
    notify_tx: mpsc::UnboundedSender<ApiMessage>,
    notify_rx: Mutex<Option<mpsc::UnboundedReceiver<ApiMessage>>>,
    stats: Arc<CallCounter>,
}

impl ApiClient {
    /// Creates a client for a comma- or semicolon-separated address list.
    ///
    /// Nothing connects until [`open`](Self::open) is called.
    #[must_use]
    pub fn new(servers: impl Into<String>) -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        Self {
            servers: servers.into(),
            options: HostOptions::default(),
            use_pool: false,
            pool_size: 8,
            use_http_status: false,
            login: None,
            logging_in: AtomicBool::new(false),
            state: RwLock::new(None),
            notify_tx,
            notify_rx: Mutex::new(Some(notify_rx)),
            stats: Arc::new(CallCounter::new()),
        }
    }

    /// Replaces the timing options.
    #[must_use]
    pub fn with_options(mut self, options: HostOptions) -> Self {
        self.options = options;
        self
    }

    /// Switches from the sticky single connection to a bounded pool.
    #[must_use]
    pub fn with_pool(mut self, size: usize) -> Self {
        self.use_pool = true;
        self.pool_size = size;
        self
    }

    /// For HTTP-mode servers: read result codes off the status line instead
    /// of the wrapped JSON envelope.
    #[must_use]
    pub fn with_http_status(mut self) -> Self {
        self.use_http_status = true;
        self
    }

    /// Installs the `401` login hook.
    #[must_use]
    pub fn with_login_handler(mut self, handler: Arc<dyn LoginHandler>) -> Self {
        self.login = Some(handler);
        self
    }

    /// Parses the address list and builds the cluster. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NoServers`] when the list is empty after
    /// trimming.
    pub async fn open(&self) -> Result<(), ClientError> {
        if self.state.read().is_some() {
            return Ok(());
        }
        let servers = split_servers(&self.servers);
        if servers.is_empty() {
            return Err(ClientError::NoServers);
        }
        info!(servers = ?servers, pooled = self.use_pool, "opening client");

        let connector = Connector::new(servers, self.use_http_status, self.notify_tx.clone());
        let cluster: Arc<dyn Cluster> = if self.use_pool {
            Arc::new(PoolCluster::new(connector, self.pool_size))
        } else {
            Arc::new(SingleCluster::new(connector))
        };

        let stat_task = tokio::spawn(stat_loop(
            Arc::clone(&self.stats),
            self.options.stat_period,
        ));
        *self.state.write() = Some(OpenState { cluster, stat_task });
        Ok(())
    }

    /// Invokes `action` and decodes the reply into `T`.
    ///
    /// A `401` reply triggers the [`LoginHandler`] (when installed) and one
    /// retry of the original call; any further `401` is surfaced as-is.
    ///
    /// # Errors
    ///
    /// Returns the server's [`ApiError`] for non-zero result codes, a
    /// [`ClientError::Timeout`] past the deadline, or transport/codec
    /// failures.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        action: &str,
        args: &(impl Serialize + Sync + ?Sized),
    ) -> Result<T, ClientError> {
        let body = Body::from_serialize(args)?;
        let message = self.call_with_retry(action, &body).await?;
        Ok(decode_result(message.data.as_deref())?)
    }

    /// Invokes `action` without waiting for a reply.
    ///
    /// Returns the number of bytes written to the transport.
    ///
    /// # Errors
    ///
    /// Returns connect, encode or send failures; there is no server-side
    /// acknowledgement to wait for.
    pub async fn invoke_oneway(
        &self,
        action: &str,
        args: &(impl Serialize + Sync + ?Sized),
    ) -> Result<usize, ClientError> {
        let body = Body::from_serialize(args)?;
        let cluster = self.cluster()?;
        let connection = cluster.get().await?;
        let result = connection.send_oneway(action, &body).await;
        cluster.put(connection).await;
        result
    }

    /// Blocking variant of [`invoke`](Self::invoke) for synchronous callers
    /// inside a multi-threaded runtime.
    ///
    /// # Errors
    ///
    /// Same as [`invoke`](Self::invoke).
    ///
    /// # Panics
    ///
    /// Panics when called from a current-thread runtime, where blocking
    /// in place would deadlock.
    pub fn invoke_blocking<T: DeserializeOwned>(
        &self,
        action: &str,
        args: &(impl Serialize + Sync + ?Sized),
    ) -> Result<T, ClientError> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.invoke(action, args))
        })
    }

    /// Takes the server-push receiver. Returns `None` after the first call.
    pub fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<ApiMessage>> {
        self.notify_rx.lock().take()
    }

    /// Point-in-time call statistics.
    #[must_use]
    pub fn stats(&self) -> crate::stat::CallStats {
        self.stats.snapshot()
    }

    /// Closes every connection and stops background tasks.
    pub async fn close(&self) {
        let state = self.state.write().take();
        if let Some(state) = state {
            state.cluster.reset().await;
            state.stat_task.abort();
        }
    }

    fn cluster(&self) -> Result<Arc<dyn Cluster>, ClientError> {
        self.state
            .read()
            .as_ref()
            .map(|state| Arc::clone(&state.cluster))
            .ok_or(ClientError::NotOpen)
    }

    async fn call_with_retry(&self, action: &str, body: &Body) -> Result<ApiMessage, ClientError> {
        match self.call_once(action, body).await {
            Err(err) if err.is_unauthorized() => {
                let Some(handler) = self.login.clone() else {
                    return Err(err);
                };
                // calls issued by the handler itself must not re-enter here
                if self.logging_in.swap(true, Ordering::Acquire) {
                    return Err(err);
                }
                let login_result = handler.login(self).await;
                self.logging_in.store(false, Ordering::Release);
                login_result?;
                self.call_once(action, body).await
            }
            other => other,
        }
    }

    async fn call_once(&self, action: &str, body: &Body) -> Result<ApiMessage, ClientError> {
        let cluster = self.cluster()?;
        let connection = cluster.get().await?;
        let started = Instant::now();
        let result = connection.call(action, body, self.options.timeout).await;
        // the connection goes back to the cluster on every path
        cluster.put(connection).await;

        let elapsed = started.elapsed();
        self.stats.record(elapsed, result.is_err());
        if elapsed > self.options.slow_trace {
            warn!(action = %action, elapsed_ms = elapsed.as_millis() as u64, "slow call");
        }

        let message = result?;
        if message.is_ok() {
            Ok(message)
        } else {
            let text = message
                .data
                .as_deref()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default();
            Err(ApiError::new(message.code, text).into())
        }
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("servers", &self.servers)
            .field("use_pool", &self.use_pool)
            .field("open", &self.state.read().is_some())
            .finish_non_exhaustive()
    }
}

/// Splits `"a:1,b:2;c:3"` into trimmed, non-empty addresses.
fn split_servers(servers: &str) -> Vec<String> {
    servers
        .split([',', ';'])
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .map(str::to_owned)
        .collect()
}

async fn stat_loop(stats: Arc<CallCounter>, period: std::time::Duration) {
    if period.is_zero() {
        return;
    }
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // the first tick fires immediately
    loop {
        interval.tick().await;
        let window = stats.take();
        if window.count > 0 {
            info!(
                calls = window.count,
                errors = window.errors,
                avg_us = window.avg_micros(),
                max_us = window.max_micros,
                "call statistics"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_servers() {
        assert_eq!(
            split_servers("a:1, b:2 ;c:3"),
            vec!["a:1".to_owned(), "b:2".to_owned(), "c:3".to_owned()]
        );
        assert!(split_servers("  ,; ").is_empty());
        assert_eq!(split_servers("solo:9"), vec!["solo:9".to_owned()]);
    }

    #[tokio::test]
    async fn test_open_rejects_empty_list() {
        let client = ApiClient::new(" ; ,");
        assert!(matches!(client.open().await, Err(ClientError::NoServers)));
    }

    #[tokio::test]
    async fn test_invoke_before_open() {
        let client = ApiClient::new("127.0.0.1:1");
        let result: Result<(), _> = client.invoke("a/b", &()).await;
        assert!(matches!(result, Err(ClientError::NotOpen)));
    }

    #[test]
    fn test_notifications_taken_once() {
        let client = ApiClient::new("127.0.0.1:1");
        assert!(client.take_notifications().is_some());
        assert!(client.take_notifications().is_none());
    }
}
