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

use std::{sync::Arc, time::Duration};

use crate::{FlushHandler, Queue, QueueConfig, Registry};

/// Fluent entry point for opening a queue through a [`Registry`].
pub struct QueueBuilder {
    name:     String,
    config:   QueueConfig,
    no_cache: bool,
}

impl QueueBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name:     name.into(),
            config:   QueueConfig::default(),
            no_cache: false,
        }
    }

    pub fn flush_at(mut self, flush_at: usize) -> Self {
        self.config.flush_at = flush_at;
        self
    }

    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.config.flush_timeout = timeout;
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.config.max_length = Some(max_length);
        self
    }

    pub fn on_flush(mut self, handler: Arc<dyn FlushHandler>) -> Self {
        self.config.on_flush = Some(handler);
        self
    }

    /// Start empty instead of reloading stored records.
    pub fn skip_reload(mut self, skip: bool) -> Self {
        self.config.skip_reload = skip;
        self
    }

    /// Replace any cached instance instead of reusing it.
    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub async fn open(self, registry: &Registry) -> Queue {
        if self.no_cache {
            registry.open_fresh(&self.name, self.config).await
        } else {
            registry.open(&self.name, self.config).await
        }
    }
}
