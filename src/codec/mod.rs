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

//! Pluggable envelope codecs.
//!
//! A [`Codec`] turns an `(action, code, body)` triple into a transport
//! [`Frame`] and back. Three implementations ship with SRMP:
//!
//! - [`BinaryCodec`]: the compact default — varint-prefixed action plus
//!   optional code/data fields
//! - [`JsonCodec`]: a JSON envelope inside the same binary framing, for
//!   debugging and cross-language peers
//! - [`HttpCodec`]: maps actions onto HTTP/1.1 request and status lines so
//!   plain HTTP clients can call the same server
//!
//! Body values follow one rule everywhere: raw bytes and strings are encoded
//! directly as bytes, everything else is JSON-serialized first.

pub mod binary;
pub mod http;
pub mod json;
pub mod parser;

pub use binary::BinaryCodec;
pub use http::{HttpAssembler, HttpCodec};
pub use json::JsonCodec;
pub use parser::HttpParser;

use crate::message::{ApiMessage, Frame, FrameError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors produced while encoding or decoding envelopes.
///
/// A decode failure is a protocol error: the stream's framing can no longer
/// be trusted and the connection it arrived on should be torn down.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The action string could not be read from the payload.
    #[error("unreadable action: {reason}")]
    Action {
        /// Why the action could not be read.
        reason: String,
    },

    /// The payload ended before a declared field did.
    #[error("truncated envelope: need {expected} bytes, have {actual}")]
    Truncated {
        /// Number of bytes the field declared.
        expected: usize,
        /// Number of bytes actually available.
        actual: usize,
    },

    /// A frame could not be parsed out of a message buffer.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A text field was not valid UTF-8.
    #[error("invalid utf-8 in {field}")]
    Utf8 {
        /// The field that failed to decode.
        field: &'static str,
    },

    /// HTTP text could not be interpreted.
    #[error("malformed http message: {reason}")]
    Http {
        /// Why the message was rejected.
        reason: String,
    },
}

/// A request or response body prior to encoding.
///
/// Raw bytes pass through a codec verbatim; JSON values are rendered the
/// compact way the binary protocol expects (strings as bare UTF-8, other
/// values as JSON text).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// No body at all. Produces the minimal frame.
    None,
    /// Raw bytes, passed through untouched.
    Raw(Vec<u8>),
    /// A JSON value, serialized on encode.
    Json(Value),
}

impl Body {
    /// Builds a JSON body from any serializable value.
    ///
    /// `Option::None` and `()` collapse to [`Body::None`], which keeps
    /// argument-less calls on the minimal wire shape.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError::Json`] if the value cannot be serialized.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, CodecError> {
        match serde_json::to_value(value)? {
            Value::Null => Ok(Self::None),
            other => Ok(Self::Json(other)),
        }
    }

    /// Returns `true` when there is no body.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Renders the body to wire bytes.
    ///
    /// Strings become bare UTF-8 without quotes, raw bytes pass through,
    /// and any other JSON value is rendered as compact JSON text.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError::Json`] if JSON rendering fails.
    pub fn to_bytes(&self) -> Result<Option<Vec<u8>>, CodecError> {
        match self {
            Self::None | Self::Json(Value::Null) => Ok(None),
            Self::Raw(bytes) => Ok(Some(bytes.clone())),
            Self::Json(Value::String(text)) => Ok(Some(text.clone().into_bytes())),
            Self::Json(value) => Ok(Some(serde_json::to_vec(value)?)),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(bytes)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::None,
            other => Self::Json(other),
        }
    }
}

/// Pluggable codec turning envelopes into frames and back.
///
/// `encode_request` leaves the frame sequence at zero; the connection
/// assigns it just before send so the codec stays stateless.
pub trait Codec: Send + Sync {
    /// Encodes a request envelope into a frame.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the body cannot be rendered.
    fn encode_request(&self, action: &str, body: &Body) -> Result<Frame, CodecError>;

    /// Encodes a response correlated with `request`.
    ///
    /// A success code (`0`) is omitted from the wire, keeping the
    /// common-case frame minimal.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the body cannot be rendered.
    fn encode_response(
        &self,
        request: &Frame,
        action: &str,
        code: i32,
        body: &Body,
    ) -> Result<Frame, CodecError>;

    /// Decodes a frame back into an envelope.
    ///
    /// A zero-length data region decodes as `data = None`, never as an
    /// empty buffer.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the payload is malformed; the caller
    /// should tear the connection down.
    fn decode(&self, frame: &Frame) -> Result<ApiMessage, CodecError>;
}

/// Decodes response payload bytes into a typed result.
///
/// Tries JSON first; when the bytes are not valid JSON they are treated as a
/// bare UTF-8 string (the compact encoding strings and numbers travel in).
/// Absent data deserializes as JSON `null`, which covers `()` and `Option`
/// targets.
///
/// # Errors
///
/// Returns a [`CodecError`] if the bytes fit neither interpretation of `T`.
pub fn decode_result<T: DeserializeOwned>(data: Option<&[u8]>) -> Result<T, CodecError> {
    let Some(bytes) = data else {
        return Ok(serde_json::from_value(Value::Null)?);
    };
    match serde_json::from_slice(bytes) {
        Ok(value) => Ok(value),
        Err(json_err) => {
            let Ok(text) = std::str::from_utf8(bytes) else {
                return Err(CodecError::Json(json_err));
            };
            Ok(serde_json::from_value(Value::String(text.to_owned()))?)
        }
    }
}

/// Decodes request argument bytes into a JSON value for parameter binding.
///
/// Non-JSON bytes come back as a bare string value; absent data is `Null`.
#[must_use]
pub fn decode_parameters(data: Option<&[u8]>) -> Value {
    let Some(bytes) = data else {
        return Value::Null;
    };
    if bytes.is_empty() {
        return Value::Null;
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(_) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::String(text.to_owned()),
            Err(_) => Value::Null,
        },
    }
}

/// Converts a decoded parameter value into a concrete type.
///
/// The scalar fallback mirrors [`decode_result`]: a string value is retried
/// as JSON text when direct conversion fails, so `"5"` still binds to an
/// integer parameter.
///
/// # Errors
///
/// Returns a [`CodecError`] when no interpretation fits `T`.
pub fn convert<T: DeserializeOwned>(value: &Value) -> Result<T, CodecError> {
    match serde_json::from_value(value.clone()) {
        Ok(converted) => Ok(converted),
        Err(err) => {
            if let Value::String(text) = value {
                if let Ok(converted) = serde_json::from_str(text) {
                    return Ok(converted);
                }
            }
            Err(CodecError::Json(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_from_serialize_null_collapses() {
        let body = Body::from_serialize(&()).unwrap();
        assert!(body.is_none());
        assert_eq!(body.to_bytes().unwrap(), None);
    }

    #[test]
    fn test_body_string_is_bare_utf8() {
        let body = Body::from_serialize("hello").unwrap();
        assert_eq!(body.to_bytes().unwrap().unwrap(), b"hello");
    }

    #[test]
    fn test_body_object_is_json() {
        let body = Body::from_serialize(&serde_json::json!({ "id": 5 })).unwrap();
        let bytes = body.to_bytes().unwrap().unwrap();
        assert_eq!(bytes, br#"{"id":5}"#);
    }

    #[test]
    fn test_body_raw_passthrough() {
        let body = Body::Raw(vec![0, 159, 146, 150]);
        assert_eq!(body.to_bytes().unwrap().unwrap(), vec![0, 159, 146, 150]);
    }

    #[test]
    fn test_decode_result_json() {
        let value: i64 = decode_result(Some(b"42")).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_decode_result_bare_string() {
        let value: String = decode_result(Some(b"plain text")).unwrap();
        assert_eq!(value, "plain text");
    }

    #[test]
    fn test_decode_result_absent_is_null() {
        let value: Option<i32> = decode_result(None).unwrap();
        assert_eq!(value, None);
        decode_result::<()>(None).unwrap();
    }

    #[test]
    fn test_decode_parameters_fallbacks() {
        assert_eq!(decode_parameters(None), Value::Null);
        assert_eq!(decode_parameters(Some(b"")), Value::Null);
        assert_eq!(
            decode_parameters(Some(br#"{"id":5}"#)),
            serde_json::json!({ "id": 5 })
        );
        assert_eq!(
            decode_parameters(Some(b"not json")),
            Value::String("not json".into())
        );
    }

    #[test]
    fn test_convert_scalar_retry() {
        let value = Value::String("5".into());
        let n: i32 = convert(&value).unwrap();
        assert_eq!(n, 5);
    }
}
