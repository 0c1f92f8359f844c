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

use snafu::Snafu;

/// Boxed error reported by storage adapters and flush handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Storage adapter call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum StorageOp {
    #[display("ready")]
    Ready,
    #[display("get")]
    Get,
    #[display("set")]
    Set,
    #[display("clear")]
    Clear,
}

/// Queue operation errors.
#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum QueueError {
    /// Push rejected at submission time because the queue is at capacity.
    #[snafu(display("Queue {name} is full ({max_length} records)"))]
    Overflow {
        name:       String,
        max_length: usize,
        #[snafu(implicit)]
        loc:        snafu::Location,
    },

    /// The storage adapter failed during an operation.
    #[snafu(display("Storage {operation} failed for queue {name}"))]
    Storage {
        name:      String,
        operation: StorageOp,
        source:    BoxError,
        #[snafu(implicit)]
        loc:       snafu::Location,
    },

    /// The flush handler returned an error. Records are left in storage.
    #[snafu(display("Flush handler failed for queue {name}"))]
    Callback {
        name:   String,
        source: BoxError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// The instance has been destroyed.
    #[snafu(display("Queue {name} has been destroyed"))]
    Destroyed { name: String },

    /// The operation panicked inside the serial buffer.
    #[snafu(display("Operation on queue {name} aborted"))]
    Aborted { name: String },

    /// The instance could not load its state and is permanently poisoned.
    #[snafu(display("Queue {name} failed to reload: {message}"))]
    ReloadFailed { name: String, message: String },

    /// The pushed value did not serialize to a key-value map.
    #[snafu(display("Record must serialize to a JSON object, got {kind}"))]
    NotAnObject {
        kind: &'static str,
        #[snafu(implicit)]
        loc:  snafu::Location,
    },

    #[snafu(display("Failed to encode record"))]
    Encode {
        source: serde_json::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to decode record"))]
    Decode {
        source: serde_json::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

impl QueueError {
    #[must_use]
    pub const fn is_overflow(&self) -> bool { matches!(self, Self::Overflow { .. }) }

    #[must_use]
    pub const fn is_destroyed(&self) -> bool { matches!(self, Self::Destroyed { .. }) }

    #[must_use]
    pub const fn is_storage(&self) -> bool { matches!(self, Self::Storage { .. }) }

    #[must_use]
    pub const fn is_callback(&self) -> bool { matches!(self, Self::Callback { .. }) }

    #[must_use]
    pub const fn is_reload_failed(&self) -> bool { matches!(self, Self::ReloadFailed { .. }) }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
