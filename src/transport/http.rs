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

//! HTTP stream transport.
//!
//! In HTTP mode the frame payload *is* the wire bytes: requests and
//! responses travel as plain HTTP/1.1 text with no SRMP frame header.
//! Message boundaries are recovered from `Content-Length` by an
//! [`HttpAssembler`], which buffers partial reads and releases one complete
//! message at a time. Because the text carries no sequence, HTTP
//! connections correlate replies in FIFO order.
//!
//! Frame flags do not survive the text wire on their own, so one-way
//! requests are marked with an `X-Oneway: 1` header on send and the flag is
//! restored on receive. Without it the server would answer a call nobody is
//! waiting for, and under FIFO correlation that stray reply would be
//! matched to the *next* call.

use crate::codec::HttpAssembler;
use crate::message::{Frame, FLAG_ONEWAY_OR_ERROR, FLAG_REPLY};
use crate::transport::{FrameSink, FrameSource, TransportError};
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Write half: sends the frame payload as raw HTTP text.
pub struct HttpSink {
    writer: OwnedWriteHalf,
}

/// Read half: reassembles HTTP messages from the byte stream.
pub struct HttpSource {
    reader: OwnedReadHalf,
    assembler: HttpAssembler,
    /// Whether received messages are replies (client side) or requests
    /// (server side).
    mark_reply: bool,
}

/// Splits a stream into HTTP frame halves.
///
/// `client_side` controls how received messages are flagged: a client
/// receives replies, a server receives requests.
#[must_use]
pub fn from_stream(stream: TcpStream, client_side: bool) -> (HttpSink, HttpSource) {
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    (
        HttpSink { writer },
        HttpSource {
            reader,
            assembler: HttpAssembler::new(),
            mark_reply: client_side,
        },
    )
}

#[async_trait]
impl FrameSink for HttpSink {
    async fn send(&mut self, frame: &Frame) -> Result<usize, TransportError> {
        let payload = if frame.is_oneway() {
            with_oneway_header(&frame.payload)
        } else {
            frame.payload.clone()
        };
        self.writer
            .write_all(&payload)
            .await
            .map_err(|e| TransportError::WriteFailed { source: e })?;
        self.writer
            .flush()
            .await
            .map_err(|e| TransportError::WriteFailed { source: e })?;
        Ok(payload.len())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| TransportError::WriteFailed { source: e })
    }
}

#[async_trait]
impl FrameSource for HttpSource {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        let mut chunk = [0u8; 8 * 1024];
        loop {
            if let Some(message) = self.assembler.poll() {
                let flags = if self.mark_reply {
                    FLAG_REPLY
                } else if has_oneway_header(&message) {
                    FLAG_ONEWAY_OR_ERROR
                } else {
                    0
                };
                return Ok(Some(Frame {
                    flags,
                    sequence: 0,
                    payload: message,
                }));
            }
            let n = self
                .reader
                .read(&mut chunk)
                .await
                .map_err(|e| TransportError::ReadFailed { source: e })?;
            if n == 0 {
                return if self.assembler.pending() == 0 {
                    Ok(None)
                } else {
                    Err(TransportError::ConnectionLost {
                        reason: "eof inside http message".into(),
                    })
                };
            }
            // the assembler copies; `chunk` is reused on the next read
            self.assembler.push(&chunk[..n]);
        }
    }
}

const ONEWAY_HEADER: &str = "X-Oneway";

/// Inserts the one-way marker header ahead of the blank line that ends the
/// header block. Returns the payload unchanged when no header block exists.
fn with_oneway_header(payload: &[u8]) -> Vec<u8> {
    let Some(end) = find_header_end(payload) else {
        return payload.to_vec();
    };
    let marker = format!("{ONEWAY_HEADER}: 1\r\n");
    let mut out = Vec::with_capacity(payload.len() + marker.len());
    out.extend_from_slice(&payload[..end]);
    out.extend_from_slice(marker.as_bytes());
    out.extend_from_slice(&payload[end..]);
    out
}

fn has_oneway_header(message: &[u8]) -> bool {
    let end = find_header_end(message).unwrap_or(message.len());
    message[..end].split(|&b| b == b'\n').any(|line| {
        line.len() > ONEWAY_HEADER.len()
            && line[..ONEWAY_HEADER.len()].eq_ignore_ascii_case(ONEWAY_HEADER.as_bytes())
            && line[ONEWAY_HEADER.len()] == b':'
    })
}

/// Offset of the final `\r\n` that closes the header block.
fn find_header_end(message: &[u8]) -> Option<usize> {
    message
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|at| at + 2)
}
