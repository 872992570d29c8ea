// Copyright 2024 The Buttercup Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The plaintext filesystem index backend: the sqlite file sits right next
//! to the synced folder, unencrypted. Used by the `fs` provider type.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use buttercup_error::{make_err, Code, Error};
use buttercup_util::FileRecord;
use tokio::task::spawn_blocking;

use crate::sqlite_store::SqliteStore;
use crate::Index;

/// Name of the index file dropped inside the provider's local directory.
pub const INDEX_FILE_NAME: &str = ".buttercup-index.db";

pub struct PlaintextIndex {
    db_path: PathBuf,
    store: Arc<StdMutex<Option<SqliteStore>>>,
}

impl PlaintextIndex {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        PlaintextIndex {
            db_path: db_path.into(),
            store: Arc::new(StdMutex::new(None)),
        }
    }

    async fn ensure_loaded(&self) -> Result<(), Error> {
        self.load().await
    }

    async fn with_store<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&SqliteStore) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_loaded().await?;
        let store = self.store.clone();
        spawn_blocking(move || {
            let guard = store.lock().expect("index mutex poisoned");
            let store = guard
                .as_ref()
                .ok_or_else(|| make_err!(Code::IndexError, "index not loaded"))?;
            f(store)
        })
        .await
        .map_err(|e| make_err!(Code::Internal, "index task panicked: {e}"))?
    }
}

#[async_trait]
impl Index for PlaintextIndex {
    async fn load(&self) -> Result<(), Error> {
        if self.store.lock().expect("index mutex poisoned").is_some() {
            return Ok(());
        }
        let db_path = self.db_path.clone();
        let opened = spawn_blocking(move || SqliteStore::open(&db_path))
            .await
            .map_err(|e| make_err!(Code::Internal, "index task panicked: {e}"))??;
        *self.store.lock().expect("index mutex poisoned") = Some(opened);
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        let taken = self.store.lock().expect("index mutex poisoned").take();
        if let Some(store) = taken {
            store.close();
        }
        Ok(())
    }

    async fn get_file_info(&self, path: &str) -> Result<FileRecord, Error> {
        let path = path.to_string();
        self.with_store(move |store| store.get_file_info(&path)).await
    }

    async fn set_file_info(&self, record: FileRecord) -> Result<(), Error> {
        self.with_store(move |store| store.set_file_info(&record)).await
    }

    async fn update_path(&self, old_path: &str, new_path: &str) -> Result<(), Error> {
        let old_path = old_path.to_string();
        let new_path = new_path.to_string();
        self.with_store(move |store| store.update_path(&old_path, &new_path)).await
    }

    async fn get_page(&self, offset: i64, limit: i64) -> Result<Vec<FileRecord>, Error> {
        self.with_store(move |store| store.get_page(offset, limit)).await
    }

    async fn mark_deleted(&self, tracking_value: i64) -> Result<(), Error> {
        self.with_store(move |store| store.mark_deleted(tracking_value)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq; // Must be declared in every module.

    #[tokio::test]
    async fn load_is_idempotent_and_close_unloads() {
        let dir = tempfile::tempdir().unwrap();
        let index = PlaintextIndex::new(dir.path().join(INDEX_FILE_NAME));
        index.load().await.unwrap();
        index.load().await.unwrap();
        index.close().await.unwrap();
        // Operations implicitly reload after close.
        let record = FileRecord::new("a.txt", Utc::now());
        index.set_file_info(record.clone()).await.unwrap();
        let fetched = index.get_file_info("a.txt").await.unwrap();
        assert_eq!(fetched.path, record.path);
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let index = PlaintextIndex::new(dir.path().join(INDEX_FILE_NAME));
        let err = index.get_file_info("nope.txt").await.unwrap_err();
        assert_eq!(err.code, Code::NotFound);
    }

    #[tokio::test]
    async fn rename_then_page() {
        let dir = tempfile::tempdir().unwrap();
        let index = PlaintextIndex::new(dir.path().join(INDEX_FILE_NAME));
        index.set_file_info(FileRecord::new("old.txt", Utc::now())).await.unwrap();
        index.update_path("old.txt", "new.txt").await.unwrap();
        assert!(index.get_file_info("old.txt").await.is_err());

        let page = index.get_page(0, 0).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].path, "new.txt");
    }
}
