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

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::{debug, info, warn};

use crate::{
    Queue, QueueConfig,
    storage::{MemoryProvider, StorageProvider},
};

/// Live instances by name.
pub(crate) type Entries = Mutex<HashMap<String, Queue>>;

/// Owns the live queue instances of one storage provider.
///
/// At most one instance per name is live at a time. Registries are
/// independent of each other; create one per component (or per test) that
/// manages queue lifecycles.
#[derive(Clone)]
pub struct Registry {
    provider: Arc<dyn StorageProvider>,
    entries:  Arc<Entries>,
}

impl Registry {
    pub fn new(provider: impl StorageProvider + 'static) -> Self {
        Self {
            provider: Arc::new(provider),
            entries:  Arc::default(),
        }
    }

    /// A registry over a fresh [`MemoryProvider`].
    #[must_use]
    pub fn in_memory() -> Self { Self::new(MemoryProvider::new()) }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Queue>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live instance for `name`, creating it if needed.
    ///
    /// `config` always becomes the configuration of the returned instance,
    /// including on a cache hit, where it replaces the configuration of the
    /// running instance. If the cached instance is being destroyed, this
    /// waits for it to stop before creating its successor, so two instances
    /// never share a namespace. A newly created instance has finished its
    /// reload when this resolves; if the reload failed the instance is
    /// poisoned and every operation but `destroy` fails until it is replaced
    /// with [`open_fresh`](Self::open_fresh).
    pub async fn open(&self, name: &str, config: QueueConfig) -> Queue {
        let (queue, loaded) = loop {
            let closing = {
                let mut entries = self.lock();
                match entries.get(name) {
                    Some(existing) if !existing.is_closing() => {
                        existing.reconfigure(config);
                        return existing.clone();
                    }
                    Some(existing) => existing.clone(),
                    None => {
                        let (queue, loaded) = Queue::spawn(
                            name,
                            config,
                            self.provider.open(name),
                            Arc::downgrade(&self.entries),
                        );
                        entries.insert(name.to_string(), queue.clone());
                        break (queue, loaded);
                    }
                }
            };
            debug!(queue = name, "Waiting for closing queue instance to stop");
            closing.stopped().await;
        };

        if !loaded.await.unwrap_or(false) {
            warn!(queue = name, "Queue opened in error state");
        }
        queue
    }

    /// Destroy any cached instance of `name`, keeping its data, then open a
    /// new one.
    ///
    /// The old instance stays registered until it has stopped, so a
    /// concurrent [`open`](Self::open) waits for it instead of racing it.
    pub async fn open_fresh(&self, name: &str, config: QueueConfig) -> Queue {
        if let Some(previous) = self.get(name) {
            info!(queue = name, "Replacing cached queue instance");
            if let Err(e) = previous.destroy(false).await
                && !e.is_destroyed()
            {
                warn!(queue = name, error = %e, "Replaced queue did not shut down cleanly");
            }
        }
        self.open(name, config).await
    }

    /// The live instance for `name`, without creating one.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Queue> { self.lock().get(name).cloned() }

    /// Names of all live instances, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize { self.lock().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }

    /// Destroy every live instance without wiping storage.
    ///
    /// Operations already submitted to each queue complete first. Each
    /// instance leaves the registry as its teardown runs.
    pub async fn shutdown(&self) {
        let queues: Vec<_> = self.lock().values().cloned().collect();
        info!(queues = queues.len(), "Shutting down queue registry");
        for queue in queues {
            if let Err(e) = queue.destroy(false).await
                && !e.is_destroyed()
            {
                warn!(queue = %queue.name(), error = %e, "Queue did not shut down cleanly");
            }
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("queues", &self.names())
            .finish_non_exhaustive()
    }
}
