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

//! Storage adapter seam.
//!
//! A [`Storage`] is a durable key-value map scoped to one queue name. The
//! engine only ever issues one call at a time per queue, so adapters do not
//! need internal synchronisation beyond what their backend requires.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;

use crate::{Record, error::BoxError};

/// Key-value store backing a single named queue.
#[async_trait]
pub trait Storage: Send {
    /// Resolves once the backend is usable.
    async fn ready(&mut self) -> Result<(), BoxError>;

    async fn get(&mut self, key: &str) -> Result<Option<Record>, BoxError>;

    async fn set(&mut self, key: &str, value: &Record) -> Result<(), BoxError>;

    /// Remove every key in this queue's namespace.
    async fn clear(&mut self) -> Result<(), BoxError>;
}

/// Opens a [`Storage`] for a queue name.
pub trait StorageProvider: Send + Sync {
    fn open(&self, name: &str) -> Box<dyn Storage>;
}

type Namespaces = HashMap<String, BTreeMap<String, Record>>;

#[derive(Default)]
struct Shared {
    namespaces: Mutex<Namespaces>,
    ops:        AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Namespaces> {
        self.namespaces.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Process-local provider.
///
/// Data outlives individual queue instances, so a re-created queue reloads
/// what its predecessor wrote.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    shared: Arc<Shared>,
}

impl MemoryProvider {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of keys stored under `name`.
    #[must_use]
    pub fn len(&self, name: &str) -> usize { self.shared.lock().get(name).map_or(0, BTreeMap::len) }

    #[must_use]
    pub fn is_empty(&self, name: &str) -> bool { self.len(name) == 0 }

    /// Raw value stored under `name`/`key`.
    #[must_use]
    pub fn value(&self, name: &str, key: &str) -> Option<Record> {
        self.shared.lock().get(name).and_then(|ns| ns.get(key).cloned())
    }

    /// Total storage calls issued through this provider.
    #[must_use]
    pub fn operations(&self) -> u64 { self.shared.ops.load(Ordering::SeqCst) }
}

impl StorageProvider for MemoryProvider {
    fn open(&self, name: &str) -> Box<dyn Storage> {
        Box::new(MemoryStorage {
            name:   name.to_string(),
            shared: self.shared.clone(),
        })
    }
}

/// [`Storage`] handed out by [`MemoryProvider`].
pub struct MemoryStorage {
    name:   String,
    shared: Arc<Shared>,
}

impl MemoryStorage {
    fn touch(&self) { self.shared.ops.fetch_add(1, Ordering::SeqCst); }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn ready(&mut self) -> Result<(), BoxError> { Ok(()) }

    async fn get(&mut self, key: &str) -> Result<Option<Record>, BoxError> {
        self.touch();
        Ok(self
            .shared
            .lock()
            .get(&self.name)
            .and_then(|ns| ns.get(key).cloned()))
    }

    async fn set(&mut self, key: &str, value: &Record) -> Result<(), BoxError> {
        self.touch();
        self.shared
            .lock()
            .entry(self.name.clone())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), BoxError> {
        self.touch();
        self.shared.lock().remove(&self.name);
        Ok(())
    }
}
