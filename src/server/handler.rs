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

//! Action registry and dispatch.
//!
//! Actions are `controller/operation` strings, matched case-insensitively.
//! Lookup tries the exact action, then a `controller/*` wildcard, then the
//! global `*` catch-all. Handlers receive a [`Call`] carrying the session,
//! the raw request bytes, and [`Params`] — a tolerant view over the
//! arguments that binds JSON objects, query strings and bare scalars alike.

use crate::codec::{convert, decode_parameters, Body};
use crate::error::ApiError;
use crate::server::session::Session;
use crate::stat::{CallCounter, CallStats};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// One inbound request as seen by a handler.
pub struct Call {
    /// The connection the request arrived on.
    pub session: Arc<Session>,
    /// The action as the client sent it (original case).
    pub action: String,
    /// Parsed view over the request arguments.
    pub params: Params,
    /// The raw request bytes, for handlers that do their own decoding.
    pub data: Option<Vec<u8>>,
}

/// Tolerant argument accessor.
///
/// Wraps the decoded request value and answers named lookups against three
/// shapes: a JSON object (field access), a query string like `id=5&name=x`
/// (pair access), or a bare scalar, which binds to any requested name when
/// the action takes a single parameter.
pub struct Params {
    value: Value,
}

impl Params {
    pub(crate) fn from_data(data: Option<&[u8]>) -> Self {
        Self {
            value: decode_parameters(data),
        }
    }

    /// Builds params from an already-decoded value. Used in tests.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        Self { value }
    }

    /// The underlying decoded value.
    #[must_use]
    pub const fn raw(&self) -> &Value {
        &self.value
    }

    /// Looks up `name` and converts it to `T`.
    ///
    /// Object keys match case-insensitively. A bare scalar request binds to
    /// any name, covering single-parameter actions called with just the
    /// value.
    ///
    /// # Errors
    ///
    /// Returns `400 Bad Request` when the parameter is absent or does not
    /// convert.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, ApiError> {
        let found = match &self.value {
            Value::Object(map) => map
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone()),
            Value::String(text) if text.contains('=') => query_pair(text, name),
            Value::Null => None,
            scalar => Some(scalar.clone()),
        };
        let Some(value) = found else {
            return Err(ApiError::bad_request(format!("missing parameter: {name}")));
        };
        convert(&value)
            .map_err(|_| ApiError::bad_request(format!("parameter {name} has the wrong type")))
    }

    /// Like [`get`](Self::get) but absent parameters come back as `None`.
    ///
    /// # Errors
    ///
    /// Returns `400 Bad Request` when the parameter is present but does not
    /// convert.
    pub fn get_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ApiError> {
        match self.get(name) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.message.starts_with("missing parameter") => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Converts the whole argument value into `T`.
    ///
    /// # Errors
    ///
    /// Returns `400 Bad Request` when the value does not fit `T`.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        convert(&self.value).map_err(|err| ApiError::bad_request(err.to_string()))
    }
}

/// Extracts one pair from a form/query string, percent-decoding the value.
fn query_pair(text: &str, name: &str) -> Option<Value> {
    for pair in text.split('&') {
        let (key, value) = pair.split_once('=')?;
        if key.eq_ignore_ascii_case(name) {
            return Some(Value::String(percent_decode(value)));
        }
    }
    None
}

fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// An action implementation.
#[async_trait]
pub trait ApiHandler: Send + Sync {
    /// Runs the action and produces a response body.
    async fn execute(&self, call: Call) -> Result<Body, ApiError>;
}

/// Hook around every dispatched call.
///
/// `before` can reject the call (authentication, rate limiting); `after`
/// sees the outcome and may rewrite it, including replacing an error with a
/// success body.
#[async_trait]
pub trait CallFilter: Send + Sync {
    /// Runs before the handler. An error short-circuits the call.
    async fn before(&self, _call: &Call) -> Result<(), ApiError> {
        Ok(())
    }

    /// Runs after the handler with a mutable view of the outcome.
    async fn after(&self, _session: &Session, _action: &str, _result: &mut Result<Body, ApiError>) {
    }
}

struct Registration {
    handler: Arc<dyn ApiHandler>,
    stats: CallCounter,
}

/// Registry of actions plus the dispatch pipeline.
#[derive(Default)]
pub struct ApiManager {
    handlers: RwLock<HashMap<String, Arc<Registration>>>,
    filters: RwLock<Vec<Arc<dyn CallFilter>>>,
}

impl ApiManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async closure under `action`.
    ///
    /// The closure's return value is serialized as the response body;
    /// `()` produces an empty reply.
    ///
    /// # Examples
    ///
    /// ```
    /// use srmp::server::ApiManager;
    ///
    /// let manager = ApiManager::new();
    /// manager.register("math/double", |call| async move {
    ///     let n: i64 = call.params.get("n")?;
    ///     Ok(n * 2)
    /// });
    /// ```
    pub fn register<F, Fut, T>(&self, action: &str, handler: F)
    where
        F: Fn(Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
        T: Serialize + 'static,
    {
        self.register_raw(action, Arc::new(FnHandler { handler }));
    }

    /// Registers a prebuilt handler under `action`.
    ///
    /// `action` may be `controller/*` or `*` to catch unmatched requests.
    pub fn register_raw(&self, action: &str, handler: Arc<dyn ApiHandler>) {
        self.handlers.write().insert(
            action.to_ascii_lowercase(),
            Arc::new(Registration {
                handler,
                stats: CallCounter::new(),
            }),
        );
    }

    /// Removes a registration.
    pub fn unregister(&self, action: &str) {
        self.handlers.write().remove(&action.to_ascii_lowercase());
    }

    /// Adds a filter. Filters run in registration order.
    pub fn add_filter(&self, filter: Arc<dyn CallFilter>) {
        self.filters.write().push(filter);
    }

    /// Runs the full pipeline for one request.
    ///
    /// # Errors
    ///
    /// Returns `404` for unknown actions, the filter's error when a
    /// `before` hook rejects, or whatever the handler produced (possibly
    /// rewritten by `after` hooks).
    pub async fn dispatch(
        &self,
        session: Arc<Session>,
        action: &str,
        data: Option<Vec<u8>>,
    ) -> Result<Body, ApiError> {
        let Some(registration) = self.find(action) else {
            return Err(ApiError::not_found(action));
        };
        let filters: Vec<_> = self.filters.read().clone();
        let call = Call {
            session: Arc::clone(&session),
            action: action.to_owned(),
            params: Params::from_data(data.as_deref()),
            data,
        };

        for filter in &filters {
            filter.before(&call).await?;
        }

        let started = Instant::now();
        let mut result = registration.handler.execute(call).await;
        for filter in &filters {
            filter.after(&session, action, &mut result).await;
        }
        registration.stats.record(started.elapsed(), result.is_err());
        result
    }

    /// Finds the registration for an action: exact match, then
    /// `controller/*`, then `*`.
    fn find(&self, action: &str) -> Option<Arc<Registration>> {
        let lookup = action.to_ascii_lowercase();
        let handlers = self.handlers.read();
        if let Some(registration) = handlers.get(&lookup) {
            return Some(Arc::clone(registration));
        }
        if let Some((controller, _)) = lookup.split_once('/') {
            if let Some(registration) = handlers.get(&format!("{controller}/*")) {
                return Some(Arc::clone(registration));
            }
        }
        handlers.get("*").map(Arc::clone)
    }

    /// Returns `true` when an action would resolve to some handler.
    #[must_use]
    pub fn contains(&self, action: &str) -> bool {
        self.find(action).is_some()
    }

    /// Drains per-action statistics for periodic reporting.
    pub fn take_stats(&self) -> Vec<(String, CallStats)> {
        self.handlers
            .read()
            .iter()
            .map(|(action, registration)| (action.clone(), registration.stats.take()))
            .filter(|(_, stats)| stats.count > 0)
            .collect()
    }
}

struct FnHandler<F> {
    handler: F,
}

#[async_trait]
impl<F, Fut, T> ApiHandler for FnHandler<F>
where
    F: Fn(Call) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, ApiError>> + Send,
    T: Serialize,
{
    async fn execute(&self, call: Call) -> Result<Body, ApiError> {
        let value = (self.handler)(call).await?;
        Body::from_serialize(&value).map_err(|err| ApiError::internal(err.to_string()))
    }
}
