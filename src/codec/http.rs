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

//! HTTP/1.1 text framing for the envelope.
//!
//! [`HttpCodec`] maps the `(action, code, value)` triple onto request and
//! status lines: `GET /{action}?{query} HTTP/1.1` for argument-less or
//! flat-scalar calls, `POST` with a JSON body otherwise. Responses come in
//! two shapes controlled by [`HttpCodec::use_http_status`]:
//!
//! - `true` — the real result code travels on the status line and the body
//!   is the bare payload
//! - `false` — every response is `200 OK` and the body is the wrapper
//!   `{"action": ..., "code": ..., "data": ...}`; transport-level tooling
//!   that only inspects status lines will see errors as success in this
//!   mode, the `code` field is authoritative
//!
//! [`HttpAssembler`] handles classic HTTP message reassembly over a
//! streaming socket: fragments are defensively copied into a private buffer
//! (the socket layer reuses its receive buffer) and a message is released
//! only once `Content-Length` bytes of body have arrived.

use crate::codec::parser::HttpParser;
use crate::codec::{Body, Codec, CodecError};
use crate::message::{ApiMessage, Frame};
use serde_json::Value;

/// HTTP text codec for the envelope.
///
/// # Examples
///
/// ```rust
/// use srmp::codec::{Body, Codec, HttpCodec};
///
/// let codec = HttpCodec::new(false);
/// let body = Body::from_serialize(&serde_json::json!({ "id": 5 })).unwrap();
/// let frame = codec.encode_request("user/get", &body).unwrap();
/// let text = String::from_utf8(frame.payload.clone()).unwrap();
/// assert!(text.starts_with("GET /user/get?id=5 HTTP/1.1\r\n"));
///
/// let msg = codec.decode(&frame).unwrap();
/// assert_eq!(msg.action, "user/get");
/// assert_eq!(msg.data.unwrap(), b"id=5");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HttpCodec {
    /// When `true`, responses carry the real result code on the status line
    /// and a bare body; when `false`, responses are always `200 OK` with a
    /// JSON-wrapped `(action, code, data)` body.
    pub use_http_status: bool,
}

impl Default for HttpCodec {
    fn default() -> Self {
        Self {
            use_http_status: false,
        }
    }
}

impl HttpCodec {
    /// Creates a codec with the given response shape.
    #[must_use]
    pub const fn new(use_http_status: bool) -> Self {
        Self { use_http_status }
    }

    fn encode_get(action: &str, query: Option<String>) -> Vec<u8> {
        let target = match query {
            Some(query) => format!("/{action}?{query}"),
            None => format!("/{action}"),
        };
        format!("GET {target} HTTP/1.1\r\nHost: srmp\r\nContent-Length: 0\r\n\r\n").into_bytes()
    }

    fn encode_post(action: &str, body: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "POST /{action} HTTP/1.1\r\nHost: srmp\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        out.extend_from_slice(body);
        out
    }

    fn decode_request(parser: &HttpParser, payload: &[u8]) -> Result<ApiMessage, CodecError> {
        let uri = parser.uri.as_deref().ok_or_else(|| CodecError::Http {
            reason: "malformed request line".into(),
        })?;
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (uri, None),
        };
        let action = path.trim_start_matches('/').to_owned();
        if action.is_empty() {
            return Err(CodecError::Action {
                reason: "empty path".into(),
            });
        }
        let data = match query {
            Some(query) if !query.is_empty() => Some(query.as_bytes().to_vec()),
            Some(_) => None,
            None => {
                let body = parser.body(payload);
                (!body.is_empty()).then(|| body.to_vec())
            }
        };
        Ok(ApiMessage {
            action,
            code: 0,
            data,
        })
    }

    fn decode_response(&self, parser: &HttpParser, payload: &[u8]) -> Result<ApiMessage, CodecError> {
        let status = parser.status.unwrap_or(200);
        let body = parser.body(payload);
        if self.use_http_status {
            let code = if status == 200 { 0 } else { i32::from(status) };
            return Ok(ApiMessage {
                action: String::new(),
                code,
                data: (!body.is_empty()).then(|| body.to_vec()),
            });
        }
        // wrapped shape: always 200, code lives in the JSON body
        let wrapper: Value = serde_json::from_slice(body)?;
        let action = wrapper
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let code = wrapper.get("code").and_then(Value::as_i64).unwrap_or(0) as i32;
        let data = match wrapper.get("data") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone().into_bytes()),
            Some(value) => Some(serde_json::to_vec(value)?),
        };
        Ok(ApiMessage { action, code, data })
    }
}

impl Codec for HttpCodec {
    fn encode_request(&self, action: &str, body: &Body) -> Result<Frame, CodecError> {
        let payload = match body {
            Body::None => Self::encode_get(action, None),
            Body::Json(Value::Object(map)) if map.values().all(is_scalar) => {
                Self::encode_get(action, Some(query_string(map)))
            }
            other => {
                let bytes = other.to_bytes()?.unwrap_or_default();
                Self::encode_post(action, &bytes)
            }
        };
        Ok(Frame::request(payload))
    }

    fn encode_response(
        &self,
        request: &Frame,
        action: &str,
        code: i32,
        body: &Body,
    ) -> Result<Frame, CodecError> {
        let payload = if self.use_http_status {
            let status = if code == 0 {
                200
            } else if (100..1000).contains(&code) {
                code as u16
            } else {
                500
            };
            let bytes = body.to_bytes()?.unwrap_or_default();
            let mut out = format!(
                "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                reason(status),
                bytes.len()
            )
            .into_bytes();
            out.extend_from_slice(&bytes);
            out
        } else {
            let data = match body {
                Body::None => Value::Null,
                Body::Json(value) => value.clone(),
                Body::Raw(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
            };
            let wrapper = serde_json::json!({
                "action": action,
                "code": code,
                "data": data,
            });
            let bytes = serde_json::to_vec(&wrapper)?;
            let mut out = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
                bytes.len()
            )
            .into_bytes();
            out.extend_from_slice(&bytes);
            out
        };
        Ok(request.reply_to(payload, code != 0))
    }

    fn decode(&self, frame: &Frame) -> Result<ApiMessage, CodecError> {
        let payload = frame.payload.as_slice();
        let mut parser = HttpParser::new();
        if !parser.read(payload) {
            return Err(CodecError::Http {
                reason: "incomplete message".into(),
            });
        }
        parser.parse_headers(payload);
        if parser.status.is_some() {
            self.decode_response(&parser, payload)
        } else {
            Self::decode_request(&parser, payload)
        }
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

fn query_string(map: &serde_json::Map<String, Value>) -> String {
    let mut out = String::new();
    for (key, value) in map {
        if !out.is_empty() {
            out.push('&');
        }
        out.push_str(&url_encode(key));
        out.push('=');
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        out.push_str(&url_encode(&text));
    }
    out
}

fn url_encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Error",
    }
}

/// Streaming reassembly of HTTP messages read off a socket.
///
/// Fragments are copied into an internal buffer on arrival; [`poll`]
/// releases one complete message at a time so pipelined messages in a
/// single read are handled correctly.
///
/// [`poll`]: HttpAssembler::poll
///
/// # Examples
///
/// ```rust
/// use srmp::codec::HttpAssembler;
///
/// let mut assembler = HttpAssembler::new();
/// assembler.push(b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel");
/// assert!(assembler.poll().is_none());
/// assembler.push(b"lo");
/// let message = assembler.poll().unwrap();
/// assert!(message.ends_with(b"hello"));
/// ```
#[derive(Debug, Default)]
pub struct HttpAssembler {
    buffer: Vec<u8>,
}

impl HttpAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment. The slice is copied; the caller's receive buffer
    /// may be reused immediately.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Extracts the next complete message, if the buffer holds one.
    pub fn poll(&mut self) -> Option<Vec<u8>> {
        let mut parser = HttpParser::new();
        if !parser.read(&self.buffer) {
            return None;
        }
        parser.parse_headers(&self.buffer);
        if !parser.is_complete(&self.buffer) {
            return None;
        }
        let total = parser.total_len();
        let message = self.buffer[..total].to_vec();
        self.buffer.drain(..total);
        Some(message)
    }

    /// Number of buffered, not-yet-released bytes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_without_args() {
        let frame = HttpCodec::new(false)
            .encode_request("user/get", &Body::None)
            .unwrap();
        let text = String::from_utf8(frame.payload).unwrap();
        assert!(text.starts_with("GET /user/get HTTP/1.1\r\n"));
    }

    #[test]
    fn test_get_with_query_roundtrip() {
        let codec = HttpCodec::new(false);
        let body = Body::from_serialize(&serde_json::json!({ "id": 5 })).unwrap();
        let frame = codec.encode_request("user/get", &body).unwrap();
        let msg = codec.decode(&frame).unwrap();
        assert_eq!(msg.action, "user/get");
        assert_eq!(msg.data.unwrap(), b"id=5");
    }

    #[test]
    fn test_post_for_nested_body() {
        let codec = HttpCodec::new(false);
        let body =
            Body::from_serialize(&serde_json::json!({ "user": { "id": 5 } })).unwrap();
        let frame = codec.encode_request("user/save", &body).unwrap();
        let text = String::from_utf8(frame.payload.clone()).unwrap();
        assert!(text.starts_with("POST /user/save HTTP/1.1\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));

        let msg = codec.decode(&frame).unwrap();
        assert_eq!(msg.action, "user/save");
        let value: Value = serde_json::from_slice(&msg.data.unwrap()).unwrap();
        assert_eq!(value["user"]["id"], 5);
    }

    #[test]
    fn test_wrapped_response_always_200() {
        let codec = HttpCodec::new(false);
        let request = codec.encode_request("user/get", &Body::None).unwrap();
        let reply = codec
            .encode_response(&request, "user/get", 500, &Body::from_serialize("boom").unwrap())
            .unwrap();
        let text = String::from_utf8(reply.payload.clone()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));

        let msg = codec.decode(&reply).unwrap();
        assert_eq!(msg.action, "user/get");
        assert_eq!(msg.code, 500);
        assert_eq!(msg.data.unwrap(), b"boom");
    }

    #[test]
    fn test_status_response_carries_real_code() {
        let codec = HttpCodec::new(true);
        let request = codec.encode_request("user/get", &Body::None).unwrap();
        let reply = codec
            .encode_response(&request, "user/get", 404, &Body::None)
            .unwrap();
        let text = String::from_utf8(reply.payload.clone()).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));

        let msg = codec.decode(&reply).unwrap();
        assert_eq!(msg.code, 404);
    }

    #[test]
    fn test_out_of_range_code_becomes_500() {
        let codec = HttpCodec::new(true);
        let request = codec.encode_request("a/b", &Body::None).unwrap();
        let reply = codec
            .encode_response(&request, "a/b", -7, &Body::None)
            .unwrap();
        let text = String::from_utf8(reply.payload).unwrap();
        assert!(text.starts_with("HTTP/1.1 500 "));
    }

    #[test]
    fn test_query_encoding() {
        let body = Body::from_serialize(&serde_json::json!({ "q": "a b&c" })).unwrap();
        let frame = HttpCodec::new(false).encode_request("s/find", &body).unwrap();
        let text = String::from_utf8(frame.payload).unwrap();
        assert!(text.contains("/s/find?q=a%20b%26c "));
    }

    #[test]
    fn test_assembler_fragments() {
        let mut assembler = HttpAssembler::new();
        assembler.push(b"POST /a HTTP/1.1\r\nContent-Len");
        assert!(assembler.poll().is_none());
        assembler.push(b"gth: 5\r\n\r\nhe");
        assert!(assembler.poll().is_none());
        assembler.push(b"llo");
        let message = assembler.poll().unwrap();
        assert!(message.ends_with(b"hello"));
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_assembler_pipelined_messages() {
        let mut assembler = HttpAssembler::new();
        assembler.push(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");
        let first = assembler.poll().unwrap();
        assert!(first.starts_with(b"GET /a"));
        let second = assembler.poll().unwrap();
        assert!(second.starts_with(b"GET /b"));
        assert!(assembler.poll().is_none());
    }
}
