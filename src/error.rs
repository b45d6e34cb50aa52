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

//! Top-level error types for SRMP.
//!
//! SRMP uses a layered error taxonomy:
//!
//! 1. **Transport**: connect/send/receive failures
//!    ([`TransportError`](crate::transport::TransportError)) — connect
//!    failures trigger cluster failover, read/write failures invalidate the
//!    connection
//! 2. **Protocol**: malformed frames or envelopes
//!    ([`CodecError`](crate::codec::CodecError)) — the connection they
//!    arrived on is torn down
//! 3. **Api**: typed application failures with a numeric code ([`ApiError`])
//!    — carried across the wire and rethrown on the caller's side
//! 4. **Client**: invocation-pipeline failures
//!    ([`ClientError`](crate::client::ClientError)), including client-side
//!    timeouts that carry the action name and configured timeout
//!
//! [`SrmpError`] composes the layers into one type with layer predicates,
//! for embedders that want a single error surface.

use crate::client::ClientError;
use crate::codec::CodecError;
use crate::transport::TransportError;
use std::error::Error as StdError;
use thiserror::Error;

/// First-class result codes carried in [`ApiError::code`].
///
/// `0` is the success code and never appears inside an `ApiError`; the
/// remaining values follow the HTTP status registry so HTTP-mode framing can
/// reuse them directly on the status line.
pub mod codes {
    /// Success. Omitted from the wire.
    pub const SUCCESS: i32 = 0;
    /// The request was malformed or failed validation.
    pub const BAD_REQUEST: i32 = 400;
    /// The caller must (re-)authenticate. The client retries exactly once
    /// after running its login hook.
    pub const UNAUTHORIZED: i32 = 401;
    /// The caller is authenticated but not allowed.
    pub const FORBIDDEN: i32 = 403;
    /// No action registered under the requested name.
    pub const NOT_FOUND: i32 = 404;
    /// The handler failed unexpectedly.
    pub const INTERNAL_SERVER_ERROR: i32 = 500;
}

/// Typed application-level error: a numeric code plus a message.
///
/// This is the only error that crosses the wire. The server maps every
/// handler failure into one of these before encoding the response, and the
/// client rethrows it to the caller with the server's code and message
/// intact.
///
/// # Examples
///
/// ```rust
/// use srmp::error::{codes, ApiError};
///
/// let err = ApiError::not_found("user/get");
/// assert_eq!(err.code, codes::NOT_FOUND);
/// assert!(err.to_string().contains("user/get"));
/// ```
#[derive(Debug, Error)]
#[error("api error {code}: {message}")]
pub struct ApiError {
    /// Numeric result code; see [`codes`].
    pub code: i32,
    /// Human-readable message. Surfaced verbatim to the caller except for
    /// redacted database errors.
    pub message: String,
    /// Underlying cause, when the handler wrapped one. Never serialized;
    /// inspected server-side for database-error redaction.
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ApiError {
    /// Creates an error with an arbitrary code.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Creates a `400 Bad Request` error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(codes::BAD_REQUEST, message)
    }

    /// Creates a `401 Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(codes::UNAUTHORIZED, message)
    }

    /// Creates a `403 Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(codes::FORBIDDEN, message)
    }

    /// Creates a `404 Not Found` error naming the missing action.
    #[must_use]
    pub fn not_found(action: impl AsRef<str>) -> Self {
        Self::new(
            codes::NOT_FOUND,
            format!("action not found: {}", action.as_ref()),
        )
    }

    /// Creates a `500 Internal Server Error`.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_SERVER_ERROR, message)
    }

    /// Returns `true` when the code is [`codes::UNAUTHORIZED`].
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        self.code == codes::UNAUTHORIZED
    }
}

/// Top-level error composing all SRMP layers.
///
/// # Examples
///
/// ```rust
/// use srmp::error::{ApiError, SrmpError};
///
/// let err: SrmpError = ApiError::forbidden("no").into();
/// assert!(err.is_api_error());
/// assert!(!err.is_transport_error());
/// ```
#[derive(Debug, Error)]
pub enum SrmpError {
    /// A transport-layer failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A protocol-layer failure (malformed frame or envelope).
    #[error("protocol error: {0}")]
    Codec(#[from] CodecError),

    /// A typed application failure.
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// A client invocation-pipeline failure.
    #[error("client error: {0}")]
    Client(#[from] ClientError),
}

impl SrmpError {
    /// Returns `true` if this is a transport error.
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns `true` if this is a protocol (codec) error.
    #[must_use]
    pub const fn is_codec_error(&self) -> bool {
        matches!(self, Self::Codec(_))
    }

    /// Returns `true` if this is a typed application error.
    #[must_use]
    pub const fn is_api_error(&self) -> bool {
        matches!(self, Self::Api(_))
    }

    /// Returns `true` if this error should tear the connection down.
    ///
    /// Protocol errors poison the stream (framing is lost); transport errors
    /// already imply a dead connection. Api and client errors leave the
    /// connection usable.
    #[must_use]
    pub const fn should_close_connection(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Codec(_))
    }
}
