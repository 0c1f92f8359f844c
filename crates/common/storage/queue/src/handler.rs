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

use std::future::Future;

use async_trait::async_trait;

use crate::{Record, error::BoxError};

/// What a flush does with the records it handed to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushAction {
    /// Wipe the records from storage.
    #[default]
    Clear,
    /// Keep every record for the next flush attempt.
    Retain,
}

impl From<bool> for FlushAction {
    fn from(clear: bool) -> Self { if clear { Self::Clear } else { Self::Retain } }
}

impl From<()> for FlushAction {
    fn from((): ()) -> Self { Self::Clear }
}

pub type FlushResult = Result<FlushAction, BoxError>;

/// Receives the full record list on every flush.
///
/// Handlers run inside the queue's serial buffer. Awaiting another operation
/// on the same queue from a handler deadlocks; submit it and let it run after
/// the flush instead.
#[async_trait]
pub trait FlushHandler: Send + Sync {
    async fn on_flush(&self, records: Vec<Record>) -> FlushResult;
}

#[async_trait]
impl<F, Fut> FlushHandler for F
where
    F: Fn(Vec<Record>) -> Fut + Send + Sync,
    Fut: Future<Output = FlushResult> + Send + 'static,
{
    async fn on_flush(&self, records: Vec<Record>) -> FlushResult { self(records).await }
}
