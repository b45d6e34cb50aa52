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

//! Per-connection server state.
//!
//! A [`Session`] is created when a connection is accepted and dropped when
//! it closes. Handlers reach it through [`Call`](crate::server::handler::Call)
//! to read authentication state, stash per-connection items, or push
//! unsolicited messages back to the peer. All writes to the connection go
//! through the session's outbound channel so the single writer task is the
//! only code touching the socket.

use crate::codec::{Body, Codec, CodecError};
use crate::message::Frame;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// One accepted connection's server-side state.
pub struct Session {
    id: u64,
    peer: SocketAddr,
    last_active: RwLock<Instant>,
    token: RwLock<Option<String>>,
    items: RwLock<HashMap<String, String>>,
    sender: mpsc::UnboundedSender<Frame>,
    codec: Arc<dyn Codec>,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        peer: SocketAddr,
        sender: mpsc::UnboundedSender<Frame>,
        codec: Arc<dyn Codec>,
    ) -> Self {
        Self {
            id,
            peer,
            last_active: RwLock::new(Instant::now()),
            token: RwLock::new(None),
            items: RwLock::new(HashMap::new()),
            sender,
            codec,
        }
    }

    /// Unique id within this server instance.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Remote peer address.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// How long since the last frame arrived on this connection.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_active.read().elapsed()
    }

    pub(crate) fn touch(&self) {
        *self.last_active.write() = Instant::now();
    }

    /// Authentication token, when a login handler has set one.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Stores the authentication token.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Returns `true` once a token has been set.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    /// Reads a per-session item.
    #[must_use]
    pub fn item(&self, key: &str) -> Option<String> {
        self.items.read().get(key).cloned()
    }

    /// Stores a per-session item, returning any previous value.
    pub fn set_item(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.items.write().insert(key.into(), value.into())
    }

    /// Removes a per-session item.
    pub fn remove_item(&self, key: &str) -> Option<String> {
        self.items.write().remove(key)
    }

    /// Pushes an unsolicited message to the peer.
    ///
    /// The frame is a plain request (no reply flag), which the client
    /// surfaces on its notification channel rather than matching to a call.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the body cannot be encoded. A closed
    /// connection is not an error here; the frame is silently dropped and
    /// the session reaped by the read loop.
    pub fn push(&self, action: &str, body: &Body) -> Result<(), CodecError> {
        let frame = self.codec.encode_request(action, body)?;
        drop(self.sender.send(frame));
        Ok(())
    }

    pub(crate) fn send_frame(&self, frame: Frame) {
        drop(self.sender.send(frame));
    }

    pub(crate) fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

/// All live sessions of a server.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create(
        &self,
        peer: SocketAddr,
        sender: mpsc::UnboundedSender<Frame>,
        codec: Arc<dyn Codec>,
    ) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let session = Arc::new(Session::new(id, peer, sender, codec));
        self.sessions.write().insert(id, Arc::clone(&session));
        session
    }

    pub(crate) fn remove(&self, id: u64) {
        self.sessions.write().remove(&id);
    }

    /// Looks a session up by id.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Snapshot of every live session.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` when no sessions are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
