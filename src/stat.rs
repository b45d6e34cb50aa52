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

//! Call statistics counters.
//!
//! Both sides of the transport keep a [`CallCounter`] per peer (client) or
//! per action (server). A periodic task drains the counters and emits one
//! log line per interval so steady state costs nothing but a few atomic
//! increments per call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Lock-free accumulator for call count, errors and latency.
#[derive(Debug, Default)]
pub struct CallCounter {
    count: AtomicU64,
    errors: AtomicU64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
}

/// Point-in-time copy of a [`CallCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStats {
    /// Calls recorded since the last reset.
    pub count: u64,
    /// Calls that ended in an error.
    pub errors: u64,
    /// Sum of call latencies in microseconds.
    pub total_micros: u64,
    /// Slowest call in microseconds.
    pub max_micros: u64,
}

impl CallCounter {
    /// Creates a zeroed counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one finished call.
    pub fn record(&self, elapsed: Duration, error: bool) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        if error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    /// Returns the current totals without resetting them.
    #[must_use]
    pub fn snapshot(&self) -> CallStats {
        CallStats {
            count: self.count.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            total_micros: self.total_micros.load(Ordering::Relaxed),
            max_micros: self.max_micros.load(Ordering::Relaxed),
        }
    }

    /// Returns the current totals and resets the counter to zero.
    pub fn take(&self) -> CallStats {
        CallStats {
            count: self.count.swap(0, Ordering::Relaxed),
            errors: self.errors.swap(0, Ordering::Relaxed),
            total_micros: self.total_micros.swap(0, Ordering::Relaxed),
            max_micros: self.max_micros.swap(0, Ordering::Relaxed),
        }
    }
}

impl CallStats {
    /// Mean latency over the window, or zero when no calls were recorded.
    #[must_use]
    pub fn avg_micros(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.total_micros / self.count
        }
    }
}
