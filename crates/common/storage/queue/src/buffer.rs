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

//! Single-consumer operation pipeline.
//!
//! [`SerialBuffer`] owns a piece of state and runs submitted operations
//! against it strictly one at a time, in submission order. Producers submit
//! from anywhere without locking; each gets back its own future that resolves
//! with that operation's result.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::{
    FutureExt,
    future::{self, BoxFuture},
};
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::{
    Result,
    error::{AbortedSnafu, DestroyedSnafu},
};

/// Future returned for every submitted operation.
pub type Submission<T> = BoxFuture<'static, Result<T>>;

type Job<S> = Box<dyn for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send>;

fn job<S, F>(f: F) -> Job<S>
where
    F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

/// A slot counted in [`SerialBuffer::pending_count`].
///
/// Released when the operation holding it finishes or is discarded.
struct Reservation {
    pending: Arc<AtomicUsize>,
}

impl Drop for Reservation {
    fn drop(&mut self) { self.pending.fetch_sub(1, Ordering::AcqRel); }
}

pub struct SerialBuffer<S> {
    /// Queue name, used for logging and errors.
    name:     String,
    /// Sender side of the job channel.
    tx:       mpsc::UnboundedSender<Job<S>>,
    /// Operations submitted but not yet completed.
    pending:  Arc<AtomicUsize>,
    /// Cancelled to stop the consumer after its current job.
    closer:   CancellationToken,
    /// Consumer task. `None` once joined.
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Send + 'static> SerialBuffer<S> {
    /// Spawn the consumer task that owns `state`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(name: impl Into<String>, state: S) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let closer = CancellationToken::new();
        let consumer = tokio::spawn(run(name.clone(), state, rx, closer.clone()));

        Self {
            name,
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
            closer,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Number of operations submitted but not yet completed.
    #[must_use]
    pub fn pending_count(&self) -> usize { self.pending.load(Ordering::Acquire) }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.closer.is_cancelled() || self.tx.is_closed() }

    fn reserve(&self) -> Reservation {
        self.pending.fetch_add(1, Ordering::AcqRel);
        Reservation {
            pending: self.pending.clone(),
        }
    }

    /// Enqueue `op` and return a future for its result.
    ///
    /// The operation is enqueued when this method is called, not when the
    /// returned future is first polled.
    pub fn submit<T, F>(&self, op: F) -> Submission<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, Result<T>> + Send + 'static,
    {
        let reservation = self.reserve();
        let (reply_tx, reply_rx) = oneshot::channel();
        let name = self.name.clone();
        let aborted = name.clone();

        let job = job(move |state: &mut S| {
            Box::pin(async move {
                let result = match AssertUnwindSafe(op(state)).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        error!(queue = %aborted, "Operation panicked");
                        AbortedSnafu { name: aborted }.fail()
                    }
                };
                // Released before the reply so callers never observe their
                // own operation as pending.
                drop(reservation);
                // The caller may have dropped its future.
                let _ = reply_tx.send(result);
            })
        });

        if self.closer.is_cancelled() || self.tx.send(job).is_err() {
            trace!(queue = %name, "Rejected operation on closed buffer");
            return future::ready(DestroyedSnafu { name }.fail()).boxed();
        }

        async move {
            match reply_rx.await {
                Ok(result) => result,
                Err(_) => DestroyedSnafu { name }.fail(),
            }
        }
        .boxed()
    }

    /// Stop taking new work once the running operation (if any) finishes.
    ///
    /// Operations still waiting are discarded and resolve as destroyed. Safe
    /// to call from inside an operation.
    pub fn close(&self) { self.closer.cancel(); }

    /// A token that closes this buffer when cancelled.
    #[must_use]
    pub fn closer(&self) -> CancellationToken { self.closer.clone() }

    /// Close the buffer and wait for the consumer to exit.
    ///
    /// Must not be awaited from inside an operation on the same buffer.
    pub async fn shutdown(&self) {
        self.close();
        let mut consumer = self.consumer.lock().await;
        if let Some(handle) = consumer.take()
            && let Err(e) = handle.await
        {
            error!(queue = %self.name, error = ?e, "Serial buffer consumer failed");
        }
    }
}

async fn run<S>(
    name: String,
    mut state: S,
    mut rx: mpsc::UnboundedReceiver<Job<S>>,
    closer: CancellationToken,
) {
    debug!(queue = %name, "Serial buffer started");

    loop {
        let job = tokio::select! {
            biased;
            () = closer.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        job(&mut state).await;
    }

    rx.close();
    let mut discarded = 0usize;
    while let Ok(job) = rx.try_recv() {
        drop(job);
        discarded += 1;
    }

    debug!(queue = %name, discarded, "Serial buffer stopped");
}

impl<S> std::fmt::Debug for SerialBuffer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialBuffer")
            .field("name", &self.name)
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .field("closed", &self.closer.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::join_all;

    use super::*;
    use crate::QueueError;

    fn op<S, T, F>(f: F) -> F
    where
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, Result<T>>,
    {
        f
    }

    #[tokio::test]
    async fn test_operations_run_in_submission_order() {
        let buffer = SerialBuffer::spawn("order", Vec::<u32>::new());

        let submissions: Vec<_> = (0..50u32)
            .map(|i| {
                buffer.submit(op(move |log: &mut Vec<u32>| {
                    Box::pin(async move {
                        if i % 7 == 0 {
                            tokio::task::yield_now().await;
                        }
                        log.push(i);
                        Ok(())
                    })
                }))
            })
            .collect();
        join_all(submissions).await;

        let log = buffer
            .submit(op(|log: &mut Vec<u32>| Box::pin(async move { Ok(log.clone()) })))
            .await
            .unwrap();
        assert_eq!(log, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_one_operation_in_flight() {
        #[derive(Default)]
        struct Overlap {
            active:  usize,
            max_hit: usize,
        }

        let buffer = Arc::new(SerialBuffer::spawn("exclusive", Overlap::default()));
        let mut producers = Vec::new();
        for _ in 0..8 {
            let buffer = buffer.clone();
            producers.push(tokio::spawn(async move {
                let mut submissions = Vec::new();
                for _ in 0..20 {
                    submissions.push(buffer.submit(op(|overlap: &mut Overlap| {
                        Box::pin(async move {
                            overlap.active += 1;
                            overlap.max_hit = overlap.max_hit.max(overlap.active);
                            tokio::time::sleep(Duration::from_micros(50)).await;
                            overlap.active -= 1;
                            Ok(())
                        })
                    })));
                }
                join_all(submissions).await
            }));
        }
        for producer in producers {
            assert!(producer.await.unwrap().iter().all(Result::is_ok));
        }

        let max_hit = buffer
            .submit(op(|overlap: &mut Overlap| Box::pin(async move { Ok(overlap.max_hit) })))
            .await
            .unwrap();
        assert_eq!(max_hit, 1);
        assert_eq!(buffer.pending_count(), 0);
    }

    fn explode() -> Result<u32> { panic!("handler bug") }

    #[tokio::test]
    async fn test_failure_is_isolated_to_its_operation() {
        let buffer = SerialBuffer::spawn("isolated", 0u32);

        let first = buffer.submit(op(|n: &mut u32| {
            Box::pin(async move {
                *n += 1;
                Ok(*n)
            })
        }));
        let failing = buffer.submit(op(|_: &mut u32| {
            Box::pin(async move {
                DestroyedSnafu {
                    name: "boom".to_string(),
                }
                .fail::<u32>()
            })
        }));
        let panicking = buffer.submit(op(|_: &mut u32| Box::pin(async move { explode() })));
        let last = buffer.submit(op(|n: &mut u32| {
            Box::pin(async move {
                *n += 1;
                Ok(*n)
            })
        }));

        assert_eq!(first.await.unwrap(), 1);
        assert!(failing.await.is_err());
        assert!(matches!(panicking.await, Err(QueueError::Aborted { .. })));
        assert_eq!(last.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_close_discards_waiting_operations() {
        let buffer = SerialBuffer::spawn("closing", ());
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let closer = buffer.closer();

        let running = buffer.submit(op(move |_: &mut ()| {
            Box::pin(async move {
                let _ = release_rx.await;
                closer.cancel();
                Ok("finished")
            })
        }));
        let waiting = buffer.submit(op(|_: &mut ()| Box::pin(async move { Ok("never") })));
        assert_eq!(buffer.pending_count(), 2);

        release_tx.send(()).unwrap();
        assert_eq!(running.await.unwrap(), "finished");
        assert!(waiting.await.unwrap_err().is_destroyed());

        buffer.shutdown().await;
        assert!(buffer.is_closed());
        assert_eq!(buffer.pending_count(), 0);

        let late = buffer.submit(op(|_: &mut ()| Box::pin(async move { Ok(()) })));
        assert!(late.await.unwrap_err().is_destroyed());
    }
}
