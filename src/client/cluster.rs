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

//! Connection selection across a server address list.
//!
//! A [`Cluster`] hands out connections for calls and takes them back
//! afterwards. [`SingleCluster`] keeps one sticky connection and fails over
//! along the address list when it dies; [`PoolCluster`] keeps a bounded pool
//! for callers that need concurrent connections.

use crate::client::connection::Connection;
use crate::client::ClientError;
use crate::message::ApiMessage;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Source of connections for the invocation pipeline.
///
/// `get` may connect lazily; `put` must be called for every `get`, success
/// or failure, so pooled implementations can stay balanced.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Checks out a connection, connecting if necessary.
    async fn get(&self) -> Result<Arc<Connection>, ClientError>;

    /// Returns a connection after a call. Invalid connections are discarded.
    async fn put(&self, connection: Arc<Connection>);

    /// Drops every held connection; the next `get` reconnects from scratch.
    async fn reset(&self);
}

/// Dials addresses from a fixed list.
pub(crate) struct Connector {
    servers: Vec<String>,
    use_http_status: bool,
    notify: mpsc::UnboundedSender<ApiMessage>,
}

impl Connector {
    pub(crate) fn new(
        servers: Vec<String>,
        use_http_status: bool,
        notify: mpsc::UnboundedSender<ApiMessage>,
    ) -> Self {
        Self {
            servers,
            use_http_status,
            notify,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.servers.len()
    }

    /// Tries every address once, starting at `start`, and returns the first
    /// connection along with the index it was dialed at. When the whole
    /// pass fails the *last* connect error is surfaced.
    pub(crate) async fn walk(&self, start: usize) -> Result<(Arc<Connection>, usize), ClientError> {
        if self.servers.is_empty() {
            return Err(ClientError::NoServers);
        }
        let mut last_error = None;
        for offset in 0..self.servers.len() {
            let index = (start + offset) % self.servers.len();
            let address = &self.servers[index];
            match Connection::open(address, self.use_http_status, self.notify.clone()).await {
                Ok(connection) => {
                    info!(address = %address, "connected");
                    return Ok((connection, index));
                }
                Err(err) => {
                    warn!(address = %address, error = %err, "connect failed");
                    last_error = Some(err);
                }
            }
        }
        // servers is non-empty, so at least one attempt ran
        Err(last_error.unwrap_or(ClientError::NoServers))
    }
}

/// Sticky single-connection cluster with failover.
///
/// Reads take a shared lock so concurrent calls share the live connection
/// without contention. When the connection dies, one caller at a time walks
/// the address list from the failover cursor; the cursor remembers where the
/// last successful connect landed so reconnects go back to the same server
/// first.
pub struct SingleCluster {
    connector: Connector,
    active: RwLock<Option<Arc<Connection>>>,
    connecting: tokio::sync::Mutex<()>,
    cursor: AtomicUsize,
}

impl SingleCluster {
    pub(crate) fn new(connector: Connector) -> Self {
        Self {
            connector,
            active: RwLock::new(None),
            connecting: tokio::sync::Mutex::new(()),
            cursor: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Cluster for SingleCluster {
    async fn get(&self) -> Result<Arc<Connection>, ClientError> {
        if let Some(connection) = self.active.read().as_ref() {
            if connection.is_valid() {
                return Ok(Arc::clone(connection));
            }
        }

        let _guard = self.connecting.lock().await;
        // another caller may have reconnected while we waited
        if let Some(connection) = self.active.read().as_ref() {
            if connection.is_valid() {
                return Ok(Arc::clone(connection));
            }
        }

        let start = self.cursor.load(Ordering::Relaxed);
        let (connection, index) = self.connector.walk(start).await?;
        self.cursor.store(index, Ordering::Relaxed);
        *self.active.write() = Some(Arc::clone(&connection));
        Ok(connection)
    }

    async fn put(&self, connection: Arc<Connection>) {
        if connection.is_valid() {
            // a healthy return re-arms failover to the preferred first server
            self.cursor.store(0, Ordering::Relaxed);
            return;
        }
        debug!(address = %connection.address(), "discarding dead connection");
        let mut active = self.active.write();
        if let Some(current) = active.as_ref() {
            if Arc::ptr_eq(current, &connection) {
                *active = None;
            }
        }
    }

    async fn reset(&self) {
        let connection = self.active.write().take();
        if let Some(connection) = connection {
            connection.close().await;
        }
        self.cursor.store(0, Ordering::Relaxed);
    }
}
