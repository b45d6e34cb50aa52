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

//! The compact binary envelope codec.
//!
//! # Envelope layout
//!
//! ```text
//! request:  [varint len][action utf-8]              ([u32 LE len][data])?
//! response: [varint len][action utf-8] ([i32 code])? ([u32 LE len][data])?
//! ```
//!
//! The code field exists only on error replies (frame error bit set), so a
//! success response is byte-identical to a request apart from the frame
//! flags. A request with no body is nothing but the prefixed action string.

use crate::codec::{Body, Codec, CodecError};
use crate::message::{ApiMessage, Frame, MAX_FRAME_SIZE};

/// The compact binary envelope codec. Stateless; the default for both
/// client and server.
///
/// # Examples
///
/// ```rust
/// use srmp::codec::{BinaryCodec, Body, Codec};
///
/// let codec = BinaryCodec;
/// let frame = codec.encode_request("user/get", &Body::None).unwrap();
/// // minimal framing: one length byte plus the action bytes
/// assert_eq!(frame.payload.len(), "user/get".len() + 1);
///
/// let msg = codec.decode(&frame).unwrap();
/// assert_eq!(msg.action, "user/get");
/// assert_eq!(msg.code, 0);
/// assert!(msg.data.is_none());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    fn encode_envelope(
        action: &str,
        code: Option<i32>,
        body: &Body,
    ) -> Result<Vec<u8>, CodecError> {
        let data = body.to_bytes()?;
        let mut out = Vec::with_capacity(
            action.len() + 5 + data.as_ref().map_or(0, |d| d.len() + 4),
        );
        write_varint(&mut out, action.len() as u32);
        out.extend_from_slice(action.as_bytes());
        if let Some(code) = code {
            out.extend_from_slice(&code.to_le_bytes());
        }
        if let Some(data) = data {
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&data);
        }
        Ok(out)
    }
}

impl Codec for BinaryCodec {
    fn encode_request(&self, action: &str, body: &Body) -> Result<Frame, CodecError> {
        Ok(Frame::request(Self::encode_envelope(action, None, body)?))
    }

    fn encode_response(
        &self,
        request: &Frame,
        action: &str,
        code: i32,
        body: &Body,
    ) -> Result<Frame, CodecError> {
        let error = code != 0;
        let code = error.then_some(code);
        Ok(request.reply_to(Self::encode_envelope(action, code, body)?, error))
    }

    fn decode(&self, frame: &Frame) -> Result<ApiMessage, CodecError> {
        let buf = frame.payload.as_slice();
        let (action, mut offset) = read_action(buf)?;

        let code = if frame.is_error() {
            if buf.len() < offset + 4 {
                return Err(CodecError::Truncated {
                    expected: offset + 4,
                    actual: buf.len(),
                });
            }
            let code = i32::from_le_bytes([
                buf[offset],
                buf[offset + 1],
                buf[offset + 2],
                buf[offset + 3],
            ]);
            offset += 4;
            code
        } else {
            0
        };

        let data = read_data(buf, offset)?;
        Ok(ApiMessage { action, code, data })
    }
}

/// Reads the varint-prefixed action string; errors describe why the action
/// is unreadable so probing garbage is diagnosable.
fn read_action(buf: &[u8]) -> Result<(String, usize), CodecError> {
    let (len, prefix) = read_varint(buf).ok_or_else(|| CodecError::Action {
        reason: "missing length prefix".into(),
    })?;
    let end = prefix + len as usize;
    if len == 0 {
        return Err(CodecError::Action {
            reason: "empty action".into(),
        });
    }
    if buf.len() < end {
        return Err(CodecError::Action {
            reason: format!("declared {len} bytes, only {} present", buf.len() - prefix),
        });
    }
    let action = std::str::from_utf8(&buf[prefix..end])
        .map_err(|_| CodecError::Utf8 { field: "action" })?
        .to_owned();
    Ok((action, end))
}

/// Reads the optional trailing data block. A missing block and a zero-length
/// block both decode as `None`.
fn read_data(buf: &[u8], offset: usize) -> Result<Option<Vec<u8>>, CodecError> {
    if offset == buf.len() {
        return Ok(None);
    }
    if buf.len() < offset + 4 {
        return Err(CodecError::Truncated {
            expected: offset + 4,
            actual: buf.len(),
        });
    }
    let len = u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]);
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::Truncated {
            expected: len as usize,
            actual: buf.len() - offset - 4,
        });
    }
    let start = offset + 4;
    let end = start + len as usize;
    if buf.len() < end {
        return Err(CodecError::Truncated {
            expected: end,
            actual: buf.len(),
        });
    }
    if len == 0 {
        return Ok(None);
    }
    Ok(Some(buf[start..end].to_vec()))
}

/// LEB128-style unsigned varint, low seven bits per byte.
fn write_varint(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(buf: &[u8]) -> Option<(u32, usize)> {
    let mut value: u32 = 0;
    for (i, &byte) in buf.iter().enumerate().take(5) {
        value |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_request_framing() {
        let frame = BinaryCodec.encode_request("user/get", &Body::None).unwrap();
        // one varint byte plus the action, nothing else
        assert_eq!(frame.payload.len(), 1 + "user/get".len());
        assert_eq!(&frame.payload[1..], b"user/get");
    }

    #[test]
    fn test_success_response_has_no_code_field() {
        let request = BinaryCodec.encode_request("user/get", &Body::None).unwrap();
        let reply = BinaryCodec
            .encode_response(&request, "user/get", 0, &Body::None)
            .unwrap();
        assert!(!reply.is_error());
        assert_eq!(reply.payload.len(), 1 + "user/get".len());
    }

    #[test]
    fn test_error_response_roundtrip() {
        let request = BinaryCodec.encode_request("user/get", &Body::None).unwrap();
        let reply = BinaryCodec
            .encode_response(
                &request,
                "user/get",
                404,
                &Body::from_serialize("missing").unwrap(),
            )
            .unwrap();
        assert!(reply.is_error());

        let msg = BinaryCodec.decode(&reply).unwrap();
        assert_eq!(msg.action, "user/get");
        assert_eq!(msg.code, 404);
        assert_eq!(msg.data.unwrap(), b"missing");
    }

    #[test]
    fn test_roundtrip_json_body() {
        let body = Body::from_serialize(&serde_json::json!({ "id": 5, "name": "n" })).unwrap();
        let frame = BinaryCodec.encode_request("user/save", &body).unwrap();
        let msg = BinaryCodec.decode(&frame).unwrap();
        assert_eq!(msg.action, "user/save");
        let value: serde_json::Value =
            serde_json::from_slice(&msg.data.unwrap()).unwrap();
        assert_eq!(value["id"], 5);
    }

    #[test]
    fn test_roundtrip_raw_bytes() {
        let payload = vec![0u8, 255, 1, 128];
        let frame = BinaryCodec
            .encode_request("file/block", &Body::Raw(payload.clone()))
            .unwrap();
        let msg = BinaryCodec.decode(&frame).unwrap();
        assert_eq!(msg.data.unwrap(), payload);
    }

    #[test]
    fn test_zero_length_data_is_none() {
        // hand-build: action + explicit zero-length data block
        let mut payload = Vec::new();
        write_varint(&mut payload, 4);
        payload.extend_from_slice(b"a/do");
        payload.extend_from_slice(&0u32.to_le_bytes());
        let msg = BinaryCodec.decode(&Frame::request(payload)).unwrap();
        assert_eq!(msg.data, None);
    }

    #[test]
    fn test_unreadable_action_rejected() {
        let err = BinaryCodec.decode(&Frame::request(vec![])).unwrap_err();
        assert!(matches!(err, CodecError::Action { .. }));

        // declared length larger than the buffer
        let err = BinaryCodec
            .decode(&Frame::request(vec![10, b'a', b'b']))
            .unwrap_err();
        assert!(matches!(err, CodecError::Action { .. }));
    }

    #[test]
    fn test_empty_action_rejected() {
        let err = BinaryCodec.decode(&Frame::request(vec![0])).unwrap_err();
        assert!(matches!(err, CodecError::Action { .. }));
    }

    #[test]
    fn test_truncated_error_code() {
        let request = BinaryCodec.encode_request("a/b", &Body::None).unwrap();
        let mut reply = request.reply_to(request.payload.clone(), true);
        reply.payload.extend_from_slice(&[1, 2]); // half a code field
        let err = BinaryCodec.decode(&reply).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn test_varint_roundtrip() {
        for value in [0u32, 1, 127, 128, 300, 16_384, u32::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let (decoded, used) = read_varint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(used, buf.len());
        }
    }

    #[test]
    fn test_long_action_varint_prefix() {
        let action = "c".repeat(200);
        let frame = BinaryCodec.encode_request(&action, &Body::None).unwrap();
        // 200 needs a two-byte varint
        assert_eq!(frame.payload.len(), 2 + 200);
        let msg = BinaryCodec.decode(&frame).unwrap();
        assert_eq!(msg.action, action);
    }
}
