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

//! Client-side error type.

use crate::codec::CodecError;
use crate::error::ApiError;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the client invocation pipeline.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client has not been opened yet, or has been closed.
    #[error("client is not open")]
    NotOpen,

    /// The server list was empty after splitting and trimming.
    #[error("no server addresses configured")]
    NoServers,

    /// A transport failure during connect, send or receive.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A malformed frame or envelope.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A typed application error returned by the server.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// No reply arrived within the configured deadline. Carries the action
    /// name so the log line is useful without further context.
    #[error("call {action:?} timed out after {timeout:?}")]
    Timeout {
        /// The action that was invoked.
        action: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// Every sequence slot already has a call in flight. The wire carries a
    /// single correlation byte, so one connection can track at most 255
    /// outstanding calls.
    #[error("no free sequence for {action:?}: 255 calls in flight")]
    SequenceExhausted {
        /// The action that could not be sent.
        action: String,
    },
}

impl ClientError {
    /// Returns `true` when the failure invalidates the connection it
    /// happened on. Timeouts do not: the reply may still be in flight and
    /// the pending-map entry has already been dropped.
    #[must_use]
    pub const fn invalidates_connection(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Codec(_))
    }

    /// Returns `true` when the server answered `401 Unauthorized`.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api(err) if err.is_unauthorized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_names_action() {
        let err = ClientError::Timeout {
            action: "user/get".into(),
            timeout: Duration::from_secs(15),
        };
        let text = err.to_string();
        assert!(text.contains("user/get"));
        assert!(text.contains("15s"));
    }

    #[test]
    fn test_invalidation_predicate() {
        assert!(ClientError::from(TransportError::Closed).invalidates_connection());
        assert!(!ClientError::Timeout {
            action: "a".into(),
            timeout: Duration::from_secs(1),
        }
        .invalidates_connection());
        assert!(!ClientError::from(ApiError::forbidden("no")).invalidates_connection());
    }

    #[test]
    fn test_unauthorized_predicate() {
        assert!(ClientError::from(ApiError::unauthorized("login")).is_unauthorized());
        assert!(!ClientError::NotOpen.is_unauthorized());
    }
}
