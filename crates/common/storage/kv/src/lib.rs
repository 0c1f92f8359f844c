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

//! SQLite-backed key-value store.
//!
//! [`DBStore`] owns the connection pool and hands out [`KVStore`]s, one per
//! namespace. Both sides of the queue storage seam are implemented here:
//! `DBStore` is a [`StorageProvider`](stash_queue::StorageProvider) and
//! `KVStore` is a [`Storage`](stash_queue::Storage), so a registry can keep
//! its queues in a database file.

pub mod config;
pub mod db;
pub mod err;
pub mod kv;

pub use config::StoreConfig;
pub use db::DBStore;
pub use err::{Error, Result};
pub use kv::KVStore;
