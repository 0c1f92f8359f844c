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

use std::path::Path;

use sqlx::{
    Sqlite, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use stash_queue::{Storage, StorageProvider};

use crate::{config::StoreConfig, err::*, kv::KVStore};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv_table (
    namespace TEXT NOT NULL,
    key       TEXT NOT NULL,
    value     TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
)";

/// Database store that manages the SQLite connection pool
#[derive(Clone)]
pub struct DBStore {
    pool: SqlitePool,
}

impl DBStore {
    /// Open the database at `db_path` with default pool settings
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::connect(
            &StoreConfig::builder()
                .db_path(db_path.as_ref().to_path_buf())
                .build(),
        )
        .await
    }

    /// Open the database described by `config`, creating the file and the
    /// schema if missing
    #[tracing::instrument(level = "trace", skip_all, fields(path = %config.db_path.display()), err)]
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;

        tracing::debug!("Initialized DBStore with path: {}", config.db_path.display());

        Ok(Self { pool })
    }

    /// Get a KV store scoped to `namespace`
    pub fn kv_store(&self, namespace: impl Into<String>) -> KVStore {
        KVStore::new(self.pool.clone(), namespace.into())
    }

    /// Namespaces that currently hold at least one key, sorted
    pub async fn namespaces(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT namespace FROM kv_table ORDER BY namespace")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(namespace,)| namespace).collect())
    }

    /// Get the underlying SQLite pool
    pub fn pool(&self) -> &SqlitePool { &self.pool }

    /// Acquire a connection from the pool
    pub async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Close every pooled connection
    pub async fn close(&self) { self.pool.close().await; }
}

impl StorageProvider for DBStore {
    fn open(&self, name: &str) -> Box<dyn Storage> { Box::new(self.kv_store(name)) }
}

impl std::fmt::Debug for DBStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DBStore")
            .field("connections", &self.pool.size())
            .finish_non_exhaustive()
    }
}
