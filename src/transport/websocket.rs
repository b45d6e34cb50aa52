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

//! WebSocket frame transport.
//!
//! Each SRMP frame travels as one binary WebSocket message (header plus
//! payload), so everything above the transport sees plain envelope frames.
//! The client side performs the upgrade handshake on connect; the server
//! side decides per connection from the *first* packet whether the peer is
//! speaking WebSocket at all — see [`is_upgrade_request`]. A connection
//! that fails the sniff is permanently non-WebSocket; there is no per
//! connection retry.

use crate::codec::HttpParser;
use crate::message::Frame;
use crate::transport::{FrameSink, FrameSource, TransportError};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Write half of a WebSocket frame transport.
pub struct WsSink<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

/// Read half of a WebSocket frame transport.
pub struct WsSource<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

/// Connects to a WebSocket server and completes the upgrade handshake.
///
/// # Errors
///
/// Returns [`TransportError::WebSocket`] when the connection or handshake
/// fails.
pub async fn connect(
    url: &str,
) -> Result<
    (
        WsSink<MaybeTlsStream<TcpStream>>,
        WsSource<MaybeTlsStream<TcpStream>>,
        Option<SocketAddr>,
    ),
    TransportError,
> {
    let (stream, _) = connect_async(url).await?;
    debug!(url = %url, "websocket handshake complete");
    let peer = match stream.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok(),
        _ => None,
    };
    let (sink, source) = stream.split();
    Ok((WsSink { inner: sink }, WsSource { inner: source }, peer))
}

/// Completes the server side of the upgrade handshake on an accepted
/// stream whose first packet already passed [`is_upgrade_request`].
///
/// # Errors
///
/// Returns [`TransportError::WebSocket`] when the handshake fails.
pub async fn accept(
    stream: TcpStream,
) -> Result<(WsSink<TcpStream>, WsSource<TcpStream>), TransportError> {
    let stream = accept_async(stream).await?;
    let (sink, source) = stream.split();
    Ok((WsSink { inner: sink }, WsSource { inner: source }))
}

/// Decides whether the first packet of a raw TCP connection is a WebSocket
/// upgrade request.
///
/// The decision is final for the connection: a `false` here routes the
/// connection to the HTTP or binary codec for its whole lifetime.
#[must_use]
pub fn is_upgrade_request(data: &[u8]) -> bool {
    let mut parser = HttpParser::new();
    if !parser.read(data) {
        return false;
    }
    if parser.method.as_deref() != Some("GET") {
        return false;
    }
    parser.parse_headers(data);
    parser
        .header("upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &Frame) -> Result<usize, TransportError> {
        let bytes = frame.encode();
        let len = bytes.len();
        self.inner.send(Message::Binary(bytes)).await?;
        Ok(len)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await?;
        Ok(())
    }
}

#[async_trait]
impl<S> FrameSource for WsSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Frame::parse(&data)?));
                }
                // tungstenite queues the pong internally; nothing to do
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Text(_))) => {
                    return Err(TransportError::WebSocketHandshakeFailed {
                        reason: "received text frame, expected binary".into(),
                    });
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tcp;

    #[test]
    fn test_upgrade_sniff_accepts_handshake() {
        let packet = b"GET /chat HTTP/1.1\r\nHost: h\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: x\r\nSec-WebSocket-Version: 13\r\n\r\n";
        assert!(is_upgrade_request(packet));
    }

    #[test]
    fn test_upgrade_sniff_rejects_plain_http() {
        assert!(!is_upgrade_request(
            b"GET /user/get HTTP/1.1\r\nHost: h\r\n\r\n"
        ));
        assert!(!is_upgrade_request(
            b"POST /a HTTP/1.1\r\nUpgrade: websocket\r\n\r\n"
        ));
    }

    #[test]
    fn test_upgrade_sniff_rejects_binary() {
        assert!(!is_upgrade_request(&[0x00, 0x01, 0x08, 0x00]));
        assert!(!is_upgrade_request(b""));
    }

    #[tokio::test]
    async fn test_ws_frame_roundtrip() {
        let listener = tcp::bind("127.0.0.1:0", false).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut sink, mut source) = accept(stream).await.unwrap();
            let frame = source.recv().await.unwrap().unwrap();
            sink.send(&frame.reply_to(frame.payload.clone(), false))
                .await
                .unwrap();
        });

        let (mut sink, mut source, _) = connect(&format!("ws://{addr}")).await.unwrap();
        let mut request = Frame::request(b"hello".to_vec());
        request.sequence = 9;
        sink.send(&request).await.unwrap();

        let reply = source.recv().await.unwrap().unwrap();
        assert!(reply.is_reply());
        assert_eq!(reply.sequence, 9);
        assert_eq!(reply.payload, b"hello");
        server.await.unwrap();
    }
}
