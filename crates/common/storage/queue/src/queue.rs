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
    fmt,
    sync::{
        Arc, PoisonError, RwLock, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use futures::{
    FutureExt,
    future::{self, BoxFuture},
};
use serde::{Serialize, de::DeserializeOwned};
use snafu::ResultExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    FlushAction, FlushHandler, QueueConfig, Record, Result,
    buffer::{SerialBuffer, Submission},
    error::{
        CallbackSnafu, DestroyedSnafu, OverflowSnafu, QueueError, ReloadFailedSnafu, StorageOp,
        StorageSnafu,
    },
    record::{from_record, to_record},
    registry::Entries,
    storage::Storage,
};

/// Why an instance refuses work.
#[derive(Debug, Clone)]
enum Poison {
    Reload(String),
    Destroyed,
}

/// State visible outside the serial buffer.
struct Shared {
    name:      String,
    /// Mirror of `Core::count`, written only by the consumer.
    count:     AtomicUsize,
    /// Stored records plus admitted pushes not yet stored. Never exceeds
    /// capacity through admission.
    occupancy: AtomicUsize,
    /// Set as soon as `destroy` is called.
    closing:   AtomicBool,
    poison:    RwLock<Option<Poison>>,
    config:    RwLock<Arc<QueueConfig>>,
}

impl Shared {
    /// Count one push against `capacity`, or refuse it.
    fn admit(self: &Arc<Self>, capacity: usize) -> Option<Admission> {
        self.occupancy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .ok()?;
        Some(Admission {
            shared: self.clone(),
            stored: false,
        })
    }

    fn config(&self) -> Arc<QueueConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_config(&self, config: QueueConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    fn poison(&self) -> Option<Poison> {
        self.poison
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_poison(&self, poison: Option<Poison>) {
        *self.poison.write().unwrap_or_else(PoisonError::into_inner) = poison;
    }

    /// Fail fast, without touching the buffer, if the instance is poisoned.
    fn check(&self) -> Result<()> {
        match self.poison() {
            None => Ok(()),
            Some(Poison::Destroyed) => DestroyedSnafu { name: &self.name }.fail(),
            Some(Poison::Reload(message)) => ReloadFailedSnafu {
                name: &self.name,
                message,
            }
            .fail(),
        }
    }
}

/// A push counted in `Shared::occupancy`; released unless its record is
/// stored.
struct Admission {
    shared: Arc<Shared>,
    stored: bool,
}

impl Admission {
    fn stored(mut self) { self.stored = true; }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if !self.stored {
            self.shared.occupancy.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// State owned by the serial buffer consumer.
struct Core {
    shared:   Arc<Shared>,
    storage:  Box<dyn Storage>,
    count:    usize,
    deadline: Option<Instant>,
}

impl Core {
    fn set_count(&mut self, count: usize) {
        self.count = count;
        self.shared.count.store(count, Ordering::Release);
    }

    async fn get(&mut self, key: &str) -> Result<Option<Record>> {
        self.storage.get(key).await.context(StorageSnafu {
            name:      self.shared.name.as_str(),
            operation: StorageOp::Get,
        })
    }

    async fn clear(&mut self) -> Result<()> {
        self.storage.clear().await.context(StorageSnafu {
            name:      self.shared.name.as_str(),
            operation: StorageOp::Clear,
        })?;
        self.shared
            .occupancy
            .fetch_sub(self.count, Ordering::AcqRel);
        self.set_count(0);
        self.deadline = None;
        Ok(())
    }

    /// Load `count` from storage. Poisons the instance on failure.
    async fn reload(&mut self) -> bool {
        match self.load().await {
            Ok(()) => {
                self.shared.set_poison(None);
                info!(queue = %self.shared.name, count = self.count, "Queue reloaded");
                true
            }
            Err(e) => {
                let message = error_chain(&e);
                warn!(queue = %self.shared.name, error = %message, "Queue reload failed");
                self.shared.set_poison(Some(Poison::Reload(message)));
                false
            }
        }
    }

    async fn load(&mut self) -> Result<()> {
        self.storage.ready().await.context(StorageSnafu {
            name:      self.shared.name.as_str(),
            operation: StorageOp::Ready,
        })?;

        if self.shared.config().skip_reload {
            return self.clear().await;
        }

        // One key per record, so the length is found by probing.
        let mut count = 0usize;
        while self.get(&count.to_string()).await?.is_some() {
            count += 1;
        }
        self.shared.occupancy.fetch_add(count, Ordering::AcqRel);
        self.set_count(count);
        self.deadline = None;
        Ok(())
    }

    async fn push(&mut self, record: Record, admission: Admission) -> Result<()> {
        let config = self.shared.config();
        let key = self.count.to_string();
        self.storage.set(&key, &record).await.context(StorageSnafu {
            name:      self.shared.name.as_str(),
            operation: StorageOp::Set,
        })?;
        admission.stored();
        self.set_count(self.count + 1);

        let now = Instant::now();
        if self.deadline.is_none() {
            // Unrepresentable deadlines never expire.
            self.deadline = now.checked_add(config.flush_timeout);
        }
        let expired = self.deadline.is_some_and(|deadline| now >= deadline);
        trace!(queue = %self.shared.name, count = self.count, "Pushed record");

        if self.count >= config.flush_at || expired {
            debug!(queue = %self.shared.name, count = self.count, expired, "Auto-flushing");
            self.flush(None).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, handler: Option<Arc<dyn FlushHandler>>) -> Result<()> {
        if self.count == 0 {
            return Ok(());
        }

        let handler = handler.or_else(|| self.shared.config().on_flush.clone());
        let records = self.list().await?;
        let size = records.len();

        let action = match handler {
            Some(handler) => handler.on_flush(records).await.context(CallbackSnafu {
                name: self.shared.name.as_str(),
            })?,
            None => FlushAction::Clear,
        };

        match action {
            FlushAction::Clear => {
                self.clear().await?;
                debug!(queue = %self.shared.name, records = size, "Flushed");
            }
            FlushAction::Retain => {
                debug!(queue = %self.shared.name, records = size, "Flush retained records");
            }
        }
        Ok(())
    }

    async fn list(&mut self) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(self.count);
        for index in 0..self.count {
            let key = index.to_string();
            let record = self
                .storage
                .get(&key)
                .await
                .and_then(|record| record.ok_or_else(|| format!("missing record {key}").into()))
                .context(StorageSnafu {
                    name:      self.shared.name.as_str(),
                    operation: StorageOp::Get,
                })?;
            records.push(record);
        }
        Ok(records)
    }

    async fn destroy(&mut self, wipe: bool) -> Result<()> {
        let result = if wipe { self.clear().await } else { Ok(()) };
        self.shared.set_poison(Some(Poison::Destroyed));
        result
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn failed<T: Send + 'static>(err: QueueError) -> Submission<T> { future::ready(Err(err)).boxed() }

/// Detaches the instance from its registry, then stops the consumer. Dropped
/// with the destroy job, so it also runs if that job panics or is discarded.
struct Teardown {
    queue:  Weak<Inner>,
    closer: CancellationToken,
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if let Some(inner) = self.queue.upgrade() {
            Queue { inner }.detach();
        }
        self.closer.cancel();
    }
}

struct Inner {
    shared:   Arc<Shared>,
    buffer:   SerialBuffer<Core>,
    /// Registry map this instance is cached in.
    registry: Weak<Entries>,
}

/// Handle to one named queue.
///
/// Cloning is cheap; every clone drives the same instance. Each operation is
/// submitted when the method is called and the returned future resolves
/// with that operation's own result.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<Inner>,
}

impl Queue {
    /// Create the instance and submit its initial reload.
    ///
    /// The returned future resolves to whether the reload succeeded.
    pub(crate) fn spawn(
        name: &str,
        config: QueueConfig,
        storage: Box<dyn Storage>,
        registry: Weak<Entries>,
    ) -> (Self, Submission<bool>) {
        debug!(queue = name, ?config, "Opening queue");

        let shared = Arc::new(Shared {
            name:      name.to_string(),
            count:     AtomicUsize::new(0),
            occupancy: AtomicUsize::new(0),
            closing:   AtomicBool::new(false),
            poison:    RwLock::new(None),
            config:    RwLock::new(Arc::new(config)),
        });
        let core = Core {
            shared: shared.clone(),
            storage,
            count: 0,
            deadline: None,
        };

        let buffer = SerialBuffer::spawn(name, core);
        let loaded = buffer.submit(|core: &mut Core| Box::pin(async move { Ok(core.reload().await) }));

        let queue = Self {
            inner: Arc::new(Inner {
                shared,
                buffer,
                registry,
            }),
        };
        (queue, loaded)
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.inner.shared.name }

    /// Record count as of the last completed operation.
    ///
    /// An eventually consistent snapshot; use [`len`](Self::len) for a value
    /// ordered with other operations.
    #[must_use]
    pub fn count(&self) -> usize { self.inner.shared.count.load(Ordering::Acquire) }

    /// Operations submitted but not yet completed.
    #[must_use]
    pub fn pending(&self) -> usize { self.inner.buffer.pending_count() }

    /// Configuration currently in effect.
    #[must_use]
    pub fn config(&self) -> Arc<QueueConfig> { self.inner.shared.config() }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        matches!(self.inner.shared.poison(), Some(Poison::Destroyed)) || self.inner.buffer.is_closed()
    }

    /// Whether `destroy` has been called on this instance.
    pub(crate) fn is_closing(&self) -> bool { self.inner.shared.closing.load(Ordering::Acquire) }

    /// Resolves once the instance no longer touches its storage.
    pub(crate) async fn stopped(&self) {
        let closer = self.inner.buffer.closer();
        closer.cancelled().await;
    }

    /// Replace the configuration used by subsequent operations.
    ///
    /// The buffer, count and armed deadline are left untouched.
    pub(crate) fn reconfigure(&self, config: QueueConfig) {
        debug!(queue = %self.name(), ?config, "Replacing configuration of live queue");
        self.inner.shared.set_config(config);
    }

    fn submit<T, F>(&self, op: F) -> Submission<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut Core) -> BoxFuture<'a, Result<T>> + Send + 'static,
    {
        match self.inner.shared.check() {
            Ok(()) => self.inner.buffer.submit(op),
            Err(e) => failed(e),
        }
    }

    /// Append a record.
    ///
    /// `record` must serialize to a JSON object. Fails with
    /// [`QueueError::Overflow`] when the stored records plus the pushes still
    /// waiting in the buffer reach capacity. Resolves after any flush the
    /// push triggered has finished.
    pub fn push<T: Serialize + ?Sized>(&self, record: &T) -> Submission<()> {
        match to_record(record) {
            Ok(record) => self.push_record(record),
            Err(e) => failed(e),
        }
    }

    pub fn push_record(&self, record: Record) -> Submission<()> {
        let shared = &self.inner.shared;
        if let Err(e) = shared.check() {
            return failed(e);
        }

        let capacity = shared.config().capacity();
        let Some(admission) = shared.admit(capacity) else {
            debug!(queue = %shared.name, capacity, "Push rejected, queue full");
            return failed(
                OverflowSnafu {
                    name:       shared.name.as_str(),
                    max_length: capacity,
                }
                .build(),
            );
        };

        self.inner
            .buffer
            .submit(move |core: &mut Core| Box::pin(core.push(record, admission)))
    }

    /// Hand every record to the configured `on_flush` handler and clear
    /// storage unless it answers [`FlushAction::Retain`].
    pub fn flush(&self) -> Submission<()> { self.submit(|core| Box::pin(core.flush(None))) }

    /// Flush using `handler` instead of the configured one.
    pub fn flush_with(&self, handler: Arc<dyn FlushHandler>) -> Submission<()> {
        self.submit(move |core| Box::pin(core.flush(Some(handler))))
    }

    /// Number of stored records, ordered with other operations.
    pub fn len(&self) -> Submission<usize> {
        self.submit(|core| Box::pin(async move { Ok(core.count) }))
    }

    pub fn is_empty(&self) -> Submission<bool> {
        self.submit(|core| Box::pin(async move { Ok(core.count == 0) }))
    }

    /// All stored records in insertion order. Does not modify the queue.
    pub fn list(&self) -> Submission<Vec<Record>> { self.submit(|core| Box::pin(core.list())) }

    /// [`list`](Self::list), decoded into `T`.
    pub fn list_as<T>(&self) -> Submission<Vec<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let records = self.list();
        async move {
            records
                .await
                .and_then(|records| records.into_iter().map(from_record).collect::<Result<_>>())
        }
        .boxed()
    }

    /// Tear the instance down, optionally wiping its storage first.
    ///
    /// Operations already submitted run first; anything submitted after this
    /// call fails with [`QueueError::Destroyed`]. The instance is removed from
    /// its registry and refuses all further work. The teardown runs even if
    /// the returned future is dropped; awaiting it also waits for the
    /// consumer task to exit.
    pub fn destroy(&self, wipe: bool) -> Submission<()> {
        if self.is_destroyed() {
            return failed(DestroyedSnafu { name: self.name() }.build());
        }
        self.inner.shared.closing.store(true, Ordering::Release);

        let teardown = Teardown {
            queue:  Arc::downgrade(&self.inner),
            closer: self.inner.buffer.closer(),
        };
        let submitted = self.inner.buffer.submit(move |core: &mut Core| {
            Box::pin(async move {
                let _teardown = teardown;
                core.destroy(wipe).await
            })
        });

        let queue = self.clone();
        async move {
            let result = submitted.await;
            queue.inner.buffer.shutdown().await;
            info!(queue = %queue.name(), wipe, "Queue destroyed");
            result
        }
        .boxed()
    }

    /// Remove this instance from its registry if it is still the cached one.
    fn detach(&self) {
        let Some(entries) = self.inner.registry.upgrade() else {
            return;
        };
        let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries
            .get(self.name())
            .is_some_and(|current| current.same_instance(self))
        {
            entries.remove(self.name());
        }
    }

    /// Whether both handles drive the same instance.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool { Arc::ptr_eq(&self.inner, &other.inner) }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name())
            .field("count", &self.count())
            .field("buffer", &self.inner.buffer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use snafu::IntoError;

    use super::*;
    use crate::{MemoryProvider, StorageProvider};

    fn detached(name: &str, provider: &MemoryProvider) -> Queue {
        let (queue, _) = Queue::spawn(
            name,
            QueueConfig::default(),
            provider.open(name),
            Weak::new(),
        );
        queue
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let err = StorageSnafu {
            name:      "q",
            operation: StorageOp::Get,
        }
        .into_error(Box::from("disk gone"));
        assert_eq!(error_chain(&err), "Storage get failed for queue q: disk gone");
    }

    #[tokio::test]
    async fn test_queue_without_registry() {
        let provider = MemoryProvider::new();
        let queue = detached("orphan", &provider);
        let copy = queue.clone();

        queue.push(&json!({ "a": 1 })).await.unwrap();
        assert_eq!(copy.len().await.unwrap(), 1);
        assert!(copy.same_instance(&queue));
        assert!(format!("{queue:?}").contains("orphan"));

        queue.destroy(true).await.unwrap();
        assert!(copy.is_destroyed());
        assert!(provider.is_empty("orphan"));
    }

    #[tokio::test]
    async fn test_reconfigure_applies_to_next_operation() {
        let provider = MemoryProvider::new();
        let queue = detached("tuned", &provider);
        queue.push(&json!({ "a": 1 })).await.unwrap();

        queue.reconfigure(QueueConfig::builder().flush_at(2).build());
        queue.push(&json!({ "a": 2 })).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
        assert_eq!(queue.config().flush_at, 2);
    }
}
