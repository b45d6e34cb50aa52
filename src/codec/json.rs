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

//! JSON envelope over the binary framing.
//!
//! The whole envelope travels as one JSON object inside the normal frame:
//!
//! ```json
//! { "action": "user/get", "code": 404, "data": { "id": 5 } }
//! ```
//!
//! `code` is omitted when zero and `data` when absent, mirroring the binary
//! codec's minimal-framing rule. Human-readable and easy to speak from any
//! language; larger and slower than [`BinaryCodec`](crate::codec::BinaryCodec).

use crate::codec::{Body, Codec, CodecError};
use crate::message::{ApiMessage, Frame};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
struct JsonEnvelope {
    action: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(code: &i32) -> bool {
    *code == 0
}

/// JSON envelope codec. Stateless.
///
/// # Examples
///
/// ```rust
/// use srmp::codec::{Body, Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let frame = codec
///     .encode_request("user/get", &Body::from_serialize(&serde_json::json!({"id": 5})).unwrap())
///     .unwrap();
/// let msg = codec.decode(&frame).unwrap();
/// assert_eq!(msg.action, "user/get");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    fn encode_envelope(action: &str, code: i32, body: &Body) -> Result<Vec<u8>, CodecError> {
        let data = match body {
            Body::None => None,
            Body::Json(value) => Some(value.clone()),
            // raw bytes have no lossless JSON shape; carry them as an array
            Body::Raw(bytes) => Some(Value::from(bytes.clone())),
        };
        Ok(serde_json::to_vec(&JsonEnvelope {
            action: action.to_owned(),
            code,
            data,
        })?)
    }
}

impl Codec for JsonCodec {
    fn encode_request(&self, action: &str, body: &Body) -> Result<Frame, CodecError> {
        Ok(Frame::request(Self::encode_envelope(action, 0, body)?))
    }

    fn encode_response(
        &self,
        request: &Frame,
        action: &str,
        code: i32,
        body: &Body,
    ) -> Result<Frame, CodecError> {
        Ok(request.reply_to(Self::encode_envelope(action, code, body)?, code != 0))
    }

    fn decode(&self, frame: &Frame) -> Result<ApiMessage, CodecError> {
        let envelope: JsonEnvelope = serde_json::from_slice(&frame.payload)?;
        if envelope.action.is_empty() {
            return Err(CodecError::Action {
                reason: "empty action".into(),
            });
        }
        let data = match envelope.data {
            None | Some(Value::Null) => None,
            // re-render so downstream decode helpers see the same bytes the
            // binary codec would hand them
            Some(Value::String(text)) => Some(text.into_bytes()),
            Some(value) => Some(serde_json::to_vec(&value)?),
        };
        Ok(ApiMessage {
            action: envelope.action,
            code: envelope.code,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_omits_code() {
        let request = JsonCodec.encode_request("a/b", &Body::None).unwrap();
        let reply = JsonCodec
            .encode_response(&request, "a/b", 0, &Body::None)
            .unwrap();
        let text = String::from_utf8(reply.payload).unwrap();
        assert!(!text.contains("code"));
        assert!(!text.contains("data"));
    }

    #[test]
    fn test_error_roundtrip() {
        let request = JsonCodec.encode_request("a/b", &Body::None).unwrap();
        let reply = JsonCodec
            .encode_response(
                &request,
                "a/b",
                500,
                &Body::from_serialize("boom").unwrap(),
            )
            .unwrap();
        let msg = JsonCodec.decode(&reply).unwrap();
        assert_eq!(msg.code, 500);
        assert_eq!(msg.data.unwrap(), b"boom");
    }

    #[test]
    fn test_object_body_roundtrip() {
        let body = Body::from_serialize(&serde_json::json!({ "id": 5 })).unwrap();
        let frame = JsonCodec.encode_request("user/get", &body).unwrap();
        let msg = JsonCodec.decode(&frame).unwrap();
        let value: Value = serde_json::from_slice(&msg.data.unwrap()).unwrap();
        assert_eq!(value["id"], 5);
    }

    #[test]
    fn test_empty_action_rejected() {
        let frame = Frame::request(br#"{"action":""}"#.to_vec());
        assert!(matches!(
            JsonCodec.decode(&frame),
            Err(CodecError::Action { .. })
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        let frame = Frame::request(vec![0xff, 0xfe]);
        assert!(JsonCodec.decode(&frame).is_err());
    }
}
