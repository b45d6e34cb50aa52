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

//! Transport layer error types.
//!
//! Transport errors are the lowest layer of the SRMP taxonomy. A connect
//! failure triggers cluster failover to the next configured address; a
//! read/write failure invalidates the connection so the cluster discards it
//! instead of recycling.

use crate::message::FrameError;
use std::io;
use thiserror::Error;

/// Errors that can occur in the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to establish a connection to the remote endpoint.
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        /// The address that failed to connect.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to bind the server listener.
    #[error("failed to bind to {address}: {source}")]
    BindFailed {
        /// The address that failed to bind.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An established connection became unusable.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Why the connection was lost.
        reason: String,
    },

    /// Failed to read from the transport.
    #[error("read failed: {source}")]
    ReadFailed {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to write to the transport.
    #[error("write failed: {source}")]
    WriteFailed {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A frame violated the framing rules (oversized or truncated).
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),

    /// The transport configuration is invalid (unparseable address, bad
    /// scheme).
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Description of the configuration error.
        reason: String,
    },

    /// The transport is already closed.
    #[error("transport is closed")]
    Closed,

    /// WebSocket protocol failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The WebSocket handshake could not be completed.
    #[error("websocket handshake failed: {reason}")]
    WebSocketHandshakeFailed {
        /// Why the handshake failed.
        reason: String,
    },
}

impl TransportError {
    /// Returns `true` if the error happened while connecting, which is the
    /// class of failure the cluster address walk recovers from.
    #[must_use]
    pub const fn is_connect_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::WebSocketHandshakeFailed { .. }
        )
    }
}
