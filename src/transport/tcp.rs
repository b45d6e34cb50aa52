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

//! TCP frame transport.
//!
//! Frames travel as a fixed six-byte header (flags, sequence, little-endian
//! payload length) followed by the payload. The length prefix is validated
//! against [`MAX_FRAME_SIZE`] before any allocation.

use crate::message::{Frame, FrameError, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
use crate::transport::{FrameSink, FrameSource, TransportError};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::debug;

/// Connects to a remote endpoint and splits the stream into frame halves.
///
/// # Errors
///
/// Returns [`TransportError::ConnectionFailed`] when the connection cannot
/// be established.
pub async fn connect(addr: &str) -> Result<(TcpSink, TcpSource, SocketAddr), TransportError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::ConnectionFailed {
            address: addr.to_owned(),
            source: e,
        })?;
    debug!(address = %addr, "tcp connection established");
    let peer = stream
        .peer_addr()
        .map_err(|e| TransportError::ReadFailed { source: e })?;
    let (sink, source) = from_stream(stream);
    Ok((sink, source, peer))
}

/// Connects and returns the raw stream, for transports that layer their own
/// framing over TCP.
///
/// # Errors
///
/// Returns [`TransportError::ConnectionFailed`] when the connection cannot
/// be established.
pub async fn connect_stream(addr: &str) -> Result<(TcpStream, SocketAddr), TransportError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::ConnectionFailed {
            address: addr.to_owned(),
            source: e,
        })?;
    let peer = stream
        .peer_addr()
        .map_err(|e| TransportError::ReadFailed { source: e })?;
    Ok((stream, peer))
}

/// Splits an already-accepted stream into frame halves.
#[must_use]
pub fn from_stream(stream: TcpStream) -> (TcpSink, TcpSource) {
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();
    (TcpSink { writer }, TcpSource { reader })
}

/// Binds a listener, optionally with `SO_REUSEADDR`.
///
/// # Errors
///
/// Returns [`TransportError::InvalidConfiguration`] for an unparseable
/// address and [`TransportError::BindFailed`] when the bind itself fails.
pub async fn bind(addr: &str, reuse_address: bool) -> Result<TcpListener, TransportError> {
    let parsed: SocketAddr = addr
        .parse()
        .map_err(|_| TransportError::InvalidConfiguration {
            reason: format!("unparseable listen address: {addr}"),
        })?;
    let socket = if parsed.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(|e| TransportError::BindFailed {
        address: addr.to_owned(),
        source: e,
    })?;
    if reuse_address {
        socket
            .set_reuseaddr(true)
            .map_err(|e| TransportError::BindFailed {
                address: addr.to_owned(),
                source: e,
            })?;
    }
    socket.bind(parsed).map_err(|e| TransportError::BindFailed {
        address: addr.to_owned(),
        source: e,
    })?;
    socket.listen(1024).map_err(|e| TransportError::BindFailed {
        address: addr.to_owned(),
        source: e,
    })
}

/// Write half of a TCP frame transport.
#[derive(Debug)]
pub struct TcpSink {
    writer: OwnedWriteHalf,
}

/// Read half of a TCP frame transport.
#[derive(Debug)]
pub struct TcpSource {
    reader: OwnedReadHalf,
}

#[async_trait]
impl FrameSink for TcpSink {
    async fn send(&mut self, frame: &Frame) -> Result<usize, TransportError> {
        let len = frame.payload.len();
        if len > MAX_FRAME_SIZE as usize {
            return Err(FrameError::TooLarge {
                size: len as u32,
                max: MAX_FRAME_SIZE,
            }
            .into());
        }
        self.writer
            .write_all(&frame.header_bytes())
            .await
            .map_err(|e| TransportError::WriteFailed { source: e })?;
        self.writer
            .write_all(&frame.payload)
            .await
            .map_err(|e| TransportError::WriteFailed { source: e })?;
        self.writer
            .flush()
            .await
            .map_err(|e| TransportError::WriteFailed { source: e })?;
        Ok(FRAME_HEADER_SIZE + len)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| TransportError::WriteFailed { source: e })
    }
}

#[async_trait]
impl FrameSource for TcpSource {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        match self.reader.read_exact(&mut header).await {
            Ok(_) => {}
            // EOF at a frame boundary is a clean close
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(TransportError::ReadFailed { source: e }),
        }
        let len = u32::from_le_bytes([header[2], header[3], header[4], header[5]]);
        if len > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            }
            .into());
        }
        let mut payload = vec![0u8; len as usize];
        self.reader
            .read_exact(&mut payload)
            .await
            .map_err(|e| TransportError::ReadFailed { source: e })?;
        Ok(Some(Frame {
            flags: header[0],
            sequence: header[1],
            payload,
        }))
    }
}
