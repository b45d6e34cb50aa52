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

//! Message envelope and transport frame types.
//!
//! SRMP separates the logical envelope from its transport framing:
//!
//! - [`ApiMessage`] is the `(action, code, data)` triple, independent of any
//!   wire encoding. A codec turns it into and out of bytes.
//! - [`Frame`] is the transport-level message: a flags byte, a one-byte
//!   sequence used to correlate requests with replies, and the encoded
//!   envelope payload.
//!
//! # Frame layout (binary and WebSocket modes)
//!
//! ```text
//! +-------+----------+------------------+-----------------+
//! | flags | sequence | length (u32, LE) | payload (bytes) |
//! +-------+----------+------------------+-----------------+
//! ```
//!
//! The flag bits mirror each other between the two directions: bit `0x80`
//! marks a reply; bit `0x40` means *one-way* on a request and *error* on a
//! reply. A reply never itself expects a reply, and a one-way request never
//! produces a response frame.

use thiserror::Error;

/// Maximum frame payload size (16 MB).
///
/// This limit bounds the memory a single message can claim and rejects
/// obviously corrupt length prefixes before any allocation happens.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Size of the fixed frame header: flags (1) + sequence (1) + length (4).
pub const FRAME_HEADER_SIZE: usize = 6;

/// Flag bit marking a frame as a reply.
pub const FLAG_REPLY: u8 = 0x80;

/// Flag bit meaning *one-way* on a request and *error* on a reply.
pub const FLAG_ONEWAY_OR_ERROR: u8 = 0x40;

/// Errors produced while reading a frame out of a byte buffer.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The buffer ended before the frame did.
    #[error("truncated frame: need {expected} bytes, have {actual}")]
    Truncated {
        /// Number of bytes the header promised.
        expected: usize,
        /// Number of bytes actually available.
        actual: usize,
    },

    /// The length prefix exceeds [`MAX_FRAME_SIZE`].
    #[error("frame size {size} exceeds maximum allowed size {max}")]
    TooLarge {
        /// Declared payload size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },
}

/// The logical envelope: the `(action, code, data)` triple independent of
/// wire encoding.
///
/// `code == 0` means success and is omitted from the wire. `action` is never
/// empty on a request; the server rejects non-ASCII actions before dispatch.
///
/// # Examples
///
/// ```rust
/// use srmp::message::ApiMessage;
///
/// let msg = ApiMessage::new("user/get");
/// assert!(msg.is_ok());
/// assert!(msg.data.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiMessage {
    /// Action name, conventionally `"controller/method"`.
    pub action: String,
    /// Result code; `0` is success. Only meaningful on replies.
    pub code: i32,
    /// Request arguments or response payload.
    pub data: Option<Vec<u8>>,
}

impl ApiMessage {
    /// Creates a successful envelope with no payload.
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            code: 0,
            data: None,
        }
    }

    /// Creates an envelope carrying a payload.
    #[must_use]
    pub fn with_data(action: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            action: action.into(),
            code: 0,
            data: Some(data),
        }
    }

    /// Returns `true` when the code signals success.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Transport-level message: flags, correlation sequence, payload bytes.
///
/// The payload is whatever the active codec produced for the envelope. The
/// frame itself is encoding-agnostic; in HTTP mode the payload is the raw
/// HTTP text and the header bytes never touch the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Flag bits; see [`FLAG_REPLY`] and [`FLAG_ONEWAY_OR_ERROR`].
    pub flags: u8,
    /// Correlation sequence. `0` is reserved for uncorrelated frames.
    pub sequence: u8,
    /// Encoded envelope bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a request frame expecting a reply. The sequence is assigned
    /// by the connection just before send.
    #[must_use]
    pub fn request(payload: Vec<u8>) -> Self {
        Self {
            flags: 0,
            sequence: 0,
            payload,
        }
    }

    /// Creates a one-way request frame. One-way frames never produce a
    /// response frame.
    #[must_use]
    pub fn oneway(payload: Vec<u8>) -> Self {
        Self {
            flags: FLAG_ONEWAY_OR_ERROR,
            sequence: 0,
            payload,
        }
    }

    /// Builds the reply frame correlated with this request.
    ///
    /// The reply carries the same sequence with the reply bit set; `error`
    /// additionally sets the error bit so decoders know a code field is
    /// present in the payload.
    #[must_use]
    pub fn reply_to(&self, payload: Vec<u8>, error: bool) -> Self {
        let mut flags = FLAG_REPLY;
        if error {
            flags |= FLAG_ONEWAY_OR_ERROR;
        }
        Self {
            flags,
            sequence: self.sequence,
            payload,
        }
    }

    /// Returns `true` if this frame is a reply.
    #[must_use]
    pub const fn is_reply(&self) -> bool {
        self.flags & FLAG_REPLY != 0
    }

    /// Returns `true` if this is a one-way request.
    #[must_use]
    pub const fn is_oneway(&self) -> bool {
        !self.is_reply() && self.flags & FLAG_ONEWAY_OR_ERROR != 0
    }

    /// Returns `true` if this is an error reply.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.is_reply() && self.flags & FLAG_ONEWAY_OR_ERROR != 0
    }

    /// Returns the fixed six-byte frame header.
    #[must_use]
    pub fn header_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let len = (self.payload.len() as u32).to_le_bytes();
        [self.flags, self.sequence, len[0], len[1], len[2], len[3]]
    }

    /// Encodes the whole frame into a contiguous buffer.
    ///
    /// Used by message-oriented transports (WebSocket) that send the frame
    /// as a single delimited unit.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses a frame out of a complete buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Truncated`] when the buffer is shorter than the
    /// header or the declared payload, and [`FrameError::TooLarge`] when the
    /// length prefix exceeds [`MAX_FRAME_SIZE`].
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::Truncated {
                expected: FRAME_HEADER_SIZE,
                actual: data.len(),
            });
        }
        let len = u32::from_le_bytes([data[2], data[3], data[4], data[5]]);
        if len > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        let total = FRAME_HEADER_SIZE + len as usize;
        if data.len() < total {
            return Err(FrameError::Truncated {
                expected: total,
                actual: data.len(),
            });
        }
        Ok(Self {
            flags: data[0],
            sequence: data[1],
            payload: data[FRAME_HEADER_SIZE..total].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_flags() {
        let frame = Frame::request(vec![1, 2, 3]);
        assert!(!frame.is_reply());
        assert!(!frame.is_oneway());
        assert!(!frame.is_error());
    }

    #[test]
    fn test_oneway_flags() {
        let frame = Frame::oneway(vec![]);
        assert!(frame.is_oneway());
        assert!(!frame.is_reply());
    }

    #[test]
    fn test_reply_correlation() {
        let mut request = Frame::request(vec![9]);
        request.sequence = 42;
        let reply = request.reply_to(vec![7], false);
        assert!(reply.is_reply());
        assert!(!reply.is_error());
        assert_eq!(reply.sequence, 42);

        let error = request.reply_to(vec![], true);
        assert!(error.is_error());
        assert!(!error.is_oneway());
    }

    #[test]
    fn test_encode_parse_roundtrip() {
        let mut frame = Frame::request(b"user/get".to_vec());
        frame.sequence = 7;
        let bytes = frame.encode();
        assert_eq!(bytes.len(), FRAME_HEADER_SIZE + 8);

        let parsed = Frame::parse(&bytes).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_parse_truncated() {
        let frame = Frame::request(vec![0u8; 16]);
        let bytes = frame.encode();
        let err = Frame::parse(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { .. }));
    }

    #[test]
    fn test_parse_oversized_length() {
        let mut bytes = vec![0u8, 0u8];
        bytes.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_le_bytes());
        let err = Frame::parse(&bytes).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { .. }));
    }

    #[test]
    fn test_message_success() {
        let msg = ApiMessage::new("user/get");
        assert!(msg.is_ok());
        let failed = ApiMessage {
            code: 500,
            ..ApiMessage::new("user/get")
        };
        assert!(!failed.is_ok());
    }
}
