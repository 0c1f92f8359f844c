// Copyright 2025 Crrow
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

use std::{fmt, sync::Arc, time::Duration};

use smart_default::SmartDefault;

use crate::FlushHandler;

/// Default number of records that triggers an automatic flush.
pub const DEFAULT_FLUSH_AT: usize = 100;

/// Default age of the oldest unflushed record that triggers a flush.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Capacity multiplier applied to `flush_at` when no `max_length` is set.
pub const DEFAULT_CAPACITY_FACTOR: usize = 5;

#[derive(Clone, SmartDefault, bon::Builder)]
pub struct QueueConfig {
    /// Record count at which a push flushes the queue inline.
    #[default(DEFAULT_FLUSH_AT)]
    #[builder(default = DEFAULT_FLUSH_AT)]
    pub flush_at: usize,

    /// Once the first record since the last clear is this old, the next push
    /// flushes regardless of size.
    #[default(DEFAULT_FLUSH_TIMEOUT)]
    #[builder(default = DEFAULT_FLUSH_TIMEOUT)]
    pub flush_timeout: Duration,

    /// Hard capacity. Defaults to five times `flush_at`.
    pub max_length: Option<usize>,

    /// Handler used by flushes that do not bring their own.
    pub on_flush: Option<Arc<dyn FlushHandler>>,

    /// Start from an empty queue, wiping whatever storage holds.
    #[default = false]
    #[builder(default = false)]
    pub skip_reload: bool,
}

impl QueueConfig {
    /// Effective hard capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_length
            .unwrap_or_else(|| self.flush_at.saturating_mul(DEFAULT_CAPACITY_FACTOR))
    }
}

impl fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConfig")
            .field("flush_at", &self.flush_at)
            .field("flush_timeout", &self.flush_timeout)
            .field("max_length", &self.max_length)
            .field("on_flush", &self.on_flush.is_some())
            .field("skip_reload", &self.skip_reload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueueConfig::default();
        assert_eq!(config.flush_at, 100);
        assert_eq!(config.flush_timeout, Duration::from_secs(300));
        assert_eq!(config.capacity(), 500);
        assert!(config.on_flush.is_none());
        assert!(!config.skip_reload);
    }

    #[test]
    fn test_builder_matches_default() {
        let built = QueueConfig::builder().build();
        let default = QueueConfig::default();
        assert_eq!(built.flush_at, default.flush_at);
        assert_eq!(built.flush_timeout, default.flush_timeout);
        assert_eq!(built.max_length, default.max_length);
        assert_eq!(built.skip_reload, default.skip_reload);
    }

    #[test_case(10, None, 50 ; "derived from flush_at")]
    #[test_case(10, Some(20), 20 ; "explicit max_length")]
    #[test_case(usize::MAX, None, usize::MAX ; "saturates")]
    fn test_capacity(flush_at: usize, max_length: Option<usize>, expected: usize) {
        let config = QueueConfig::builder()
            .flush_at(flush_at)
            .maybe_max_length(max_length)
            .build();
        assert_eq!(config.capacity(), expected);
    }
}
