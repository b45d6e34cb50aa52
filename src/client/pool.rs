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

//! Bounded connection pool.

use crate::client::cluster::{Cluster, Connector};
use crate::client::connection::Connection;
use crate::client::ClientError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Semaphore;
use tracing::debug;

/// Bounded, on-demand connection pool.
///
/// Connections are created lazily up to `max_size`; a `get` beyond the bound
/// waits until another caller returns one. Returned connections go back on
/// the idle queue only while still valid — dead ones are closed and their
/// slot freed, so the pool self-heals after a server restart. New
/// connections spread round-robin across the address list.
pub struct PoolCluster {
    connector: Connector,
    permits: Semaphore,
    idle: Mutex<VecDeque<Arc<Connection>>>,
    /// Weak handles to every connection the pool has created, idle or
    /// checked out, so `reset` can close the ones callers still hold.
    tracked: Mutex<Vec<Weak<Connection>>>,
    cursor: AtomicUsize,
}

impl PoolCluster {
    pub(crate) fn new(connector: Connector, max_size: usize) -> Self {
        Self {
            connector,
            permits: Semaphore::new(max_size.max(1)),
            idle: Mutex::new(VecDeque::new()),
            tracked: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    fn track(&self, connection: &Arc<Connection>) {
        let mut tracked = self.tracked.lock();
        tracked.retain(|weak| weak.strong_count() > 0);
        tracked.push(Arc::downgrade(connection));
    }

    /// Number of idle connections currently held.
    #[must_use]
    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }
}

#[async_trait]
impl Cluster for PoolCluster {
    async fn get(&self) -> Result<Arc<Connection>, ClientError> {
        // the permit is restored in put(), never here on the success path
        match self.permits.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return Err(ClientError::NotOpen),
        }

        while let Some(connection) = self.idle.lock().pop_front() {
            if connection.is_valid() {
                return Ok(connection);
            }
            debug!(address = %connection.address(), "dropping dead idle connection");
        }

        let span = self.connector.len().max(1);
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % span;
        match self.connector.walk(start).await {
            Ok((connection, _)) => {
                self.track(&connection);
                Ok(connection)
            }
            Err(err) => {
                self.permits.add_permits(1);
                Err(err)
            }
        }
    }

    async fn put(&self, connection: Arc<Connection>) {
        if connection.is_valid() {
            self.idle.lock().push_back(connection);
        } else {
            debug!(address = %connection.address(), "discarding dead connection");
            connection.close().await;
        }
        self.permits.add_permits(1);
    }

    async fn reset(&self) {
        let drained: Vec<_> = self.idle.lock().drain(..).collect();
        for connection in &drained {
            connection.close().await;
        }
        // connections still checked out get closed too; their eventual
        // put() sees them invalid and just frees the slot
        let outstanding: Vec<_> = self
            .tracked
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .filter(|conn| !drained.iter().any(|idle| Arc::ptr_eq(idle, conn)))
            .collect();
        for connection in outstanding {
            connection.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::cluster::Connector;
    use crate::transport::tcp;
    use tokio::sync::mpsc;

    async fn echo_server() -> String {
        let listener = tcp::bind("127.0.0.1:0", false).await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                held.push(stream);
            }
        });
        addr
    }

    fn connector(servers: Vec<String>) -> Connector {
        let (tx, _rx) = mpsc::unbounded_channel();
        Connector::new(servers, false, tx)
    }

    #[tokio::test]
    async fn test_connections_are_recycled() {
        let addr = echo_server().await;
        let pool = PoolCluster::new(connector(vec![addr]), 4);

        let first = pool.get().await.unwrap();
        pool.put(Arc::clone(&first)).await;
        assert_eq!(pool.idle_len(), 1);

        let second = pool.get().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        pool.put(second).await;
        pool.reset().await;
    }

    #[tokio::test]
    async fn test_invalid_connection_not_recycled() {
        let addr = echo_server().await;
        let pool = PoolCluster::new(connector(vec![addr]), 4);

        let connection = pool.get().await.unwrap();
        connection.invalidate();
        pool.put(connection).await;
        assert_eq!(pool.idle_len(), 0);

        // the slot was freed, so the pool can still hand out a connection
        let replacement = pool.get().await.unwrap();
        assert!(replacement.is_valid());
        pool.put(replacement).await;
        pool.reset().await;
    }

    #[tokio::test]
    async fn test_reset_closes_checked_out_connections() {
        let addr = echo_server().await;
        let pool = PoolCluster::new(connector(vec![addr]), 4);

        let checked_out = pool.get().await.unwrap();
        let idle = pool.get().await.unwrap();
        pool.put(Arc::clone(&idle)).await;

        pool.reset().await;
        assert!(!checked_out.is_valid());
        assert!(!idle.is_valid());
        assert_eq!(pool.idle_len(), 0);

        // the slot comes back when the caller finally returns it
        pool.put(checked_out).await;
        assert_eq!(pool.idle_len(), 0);
    }

    #[tokio::test]
    async fn test_pool_bound_blocks_until_put() {
        let addr = echo_server().await;
        let pool = Arc::new(PoolCluster::new(connector(vec![addr]), 1));

        let held = pool.get().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.get().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pool.put(held).await;
        let second = waiter.await.unwrap().unwrap();
        pool.put(second).await;
        pool.reset().await;
    }
}
