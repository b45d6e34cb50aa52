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

//! Frame-oriented transports.
//!
//! A transport moves whole [`Frame`]s. Every implementation splits into a
//! [`FrameSink`] (the write half, shared behind a lock by callers) and a
//! [`FrameSource`] (the read half, owned by a single reader task), so sends
//! and the receive loop never contend:
//!
//! - [`tcp`]: length-prefixed binary framing over a `TcpStream`
//! - [`http`]: raw HTTP text, message boundaries recovered from
//!   `Content-Length`
//! - [`websocket`]: frames wrapped in binary WebSocket messages, handshake
//!   included

pub mod error;
pub mod http;
pub mod tcp;
pub mod websocket;

pub use error::TransportError;

use crate::message::Frame;
use async_trait::async_trait;

/// The write half of a frame transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Sends one frame, flushing it to the wire.
    ///
    /// Returns the number of bytes written, which one-way calls surface to
    /// their caller.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the write fails; the connection
    /// should be considered invalid afterwards.
    async fn send(&mut self, frame: &Frame) -> Result<usize, TransportError>;

    /// Closes the write half gracefully.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the close handshake fails.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// The read half of a frame transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Receives the next frame.
    ///
    /// Returns `Ok(None)` on clean end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the read fails or framing is
    /// violated; the connection should be torn down.
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError>;
}

/// Boxed write half.
pub type BoxSink = Box<dyn FrameSink>;

/// Boxed read half.
pub type BoxSource = Box<dyn FrameSource>;
