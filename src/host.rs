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

//! Shared timing configuration for clients and servers.

use std::time::Duration;

/// Timing knobs shared by [`ApiClient`](crate::client::ApiClient) and
/// [`ApiServer`](crate::server::ApiServer).
///
/// # Examples
///
/// ```
/// use srmp::host::HostOptions;
/// use std::time::Duration;
///
/// let options = HostOptions::new()
///     .with_timeout(Duration::from_secs(30))
///     .with_slow_trace(Duration::from_secs(2));
/// assert_eq!(options.timeout, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOptions {
    /// Deadline for a single request/response round trip.
    pub timeout: Duration,
    /// Calls slower than this are logged at warn level.
    pub slow_trace: Duration,
    /// Interval between call statistics log lines.
    pub stat_period: Duration,
}

impl HostOptions {
    /// Creates options with the default timings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the round-trip deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the slow-call logging threshold.
    #[must_use]
    pub fn with_slow_trace(mut self, slow_trace: Duration) -> Self {
        self.slow_trace = slow_trace;
        self
    }

    /// Sets the statistics reporting interval.
    #[must_use]
    pub fn with_stat_period(mut self, stat_period: Duration) -> Self {
        self.stat_period = stat_period;
        self
    }
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(15_000),
            slow_trace: Duration::from_millis(5_000),
            stat_period: Duration::from_secs(600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = HostOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(15));
        assert_eq!(options.slow_trace, Duration::from_secs(5));
        assert_eq!(options.stat_period, Duration::from_secs(600));
    }

    #[test]
    fn test_builders() {
        let options = HostOptions::new()
            .with_timeout(Duration::from_secs(1))
            .with_slow_trace(Duration::from_millis(50))
            .with_stat_period(Duration::from_secs(60));
        assert_eq!(options.timeout, Duration::from_secs(1));
        assert_eq!(options.slow_trace, Duration::from_millis(50));
        assert_eq!(options.stat_period, Duration::from_secs(60));
    }
}
