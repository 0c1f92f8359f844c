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

//! Named, durable, append-mostly record queues.
//!
//! Each queue keeps one record per key in a [`Storage`] namespace and runs
//! every operation through a [`SerialBuffer`], so handlers never overlap and
//! apply in submission order. A [`Registry`] keeps at most one live instance
//! per name.
//!
//! ```no_run
//! # async fn demo() -> stash_queue::Result<()> {
//! use stash_queue::{QueueBuilder, Registry};
//!
//! let registry = Registry::in_memory();
//! let queue = QueueBuilder::new("events").flush_at(10).open(&registry).await;
//! queue.push(&serde_json::json!({ "kind": "click" })).await?;
//! assert_eq!(queue.len().await?, 1);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod builder;
pub mod config;
pub mod error;
pub mod handler;
pub mod queue;
pub mod record;
pub mod registry;
pub mod storage;

pub use buffer::{SerialBuffer, Submission};
pub use builder::QueueBuilder;
pub use config::QueueConfig;
pub use error::{BoxError, QueueError, Result, StorageOp};
pub use handler::{FlushAction, FlushHandler, FlushResult};
pub use queue::Queue;
pub use record::{Record, from_record, to_record};
pub use registry::Registry;
pub use storage::{MemoryProvider, MemoryStorage, Storage, StorageProvider};
