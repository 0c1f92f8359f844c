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

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use snafu::ResultExt;
use sqlx::SqlitePool;
use stash_queue::{BoxError, Record, Storage};

use crate::err::*;

/// Key-value store backed by SQLite
///
/// Keys live in a namespace; stores with different namespaces over the same
/// pool never see each other's keys. All values are serialized to JSON
/// before storage.
#[derive(Clone)]
pub struct KVStore {
    pool:      SqlitePool,
    namespace: String,
}

impl KVStore {
    pub(crate) fn new(pool: SqlitePool, namespace: String) -> Self { Self { pool, namespace } }

    pub fn namespace(&self) -> &str { &self.namespace }

    /// Set a key-value pair, replacing any previous value
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value_json = serde_json::to_string(value).context(CodecSnafu { key })?;

        sqlx::query("INSERT OR REPLACE INTO kv_table (namespace, key, value) VALUES (?, ?, ?)")
            .bind(&self.namespace)
            .bind(key)
            .bind(value_json)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get a value by key
    ///
    /// Returns `None` if the key does not exist
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM kv_table WHERE namespace = ? AND key = ?")
                .bind(&self.namespace)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((value_json,)) => {
                let value = serde_json::from_str(&value_json).context(CodecSnafu { key })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Remove a key-value pair
    pub async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_table WHERE namespace = ? AND key = ?")
            .bind(&self.namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Remove every key in the namespace
    pub async fn clear(&self) -> Result<()> {
        let removed = sqlx::query("DELETE FROM kv_table WHERE namespace = ?")
            .bind(&self.namespace)
            .execute(&self.pool)
            .await?
            .rows_affected();

        tracing::trace!(namespace = %self.namespace, removed, "Cleared namespace");
        Ok(())
    }

    /// Number of keys in the namespace
    pub async fn len(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv_table WHERE namespace = ?")
            .bind(&self.namespace)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.unsigned_abs())
    }
}

#[async_trait]
impl Storage for KVStore {
    async fn ready(&mut self) -> std::result::Result<(), BoxError> {
        self.pool.acquire().await?;
        Ok(())
    }

    async fn get(&mut self, key: &str) -> std::result::Result<Option<Record>, BoxError> {
        Ok(Self::get::<Record>(self, key).await?)
    }

    async fn set(&mut self, key: &str, value: &Record) -> std::result::Result<(), BoxError> {
        Ok(Self::set(self, key, value).await?)
    }

    async fn clear(&mut self) -> std::result::Result<(), BoxError> {
        Ok(Self::clear(self).await?)
    }
}

impl std::fmt::Debug for KVStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KVStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
