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

//! The encrypted-local index backend, used by the `efs` provider type: an
//! age+zstd encrypted sqlite file sits at `encrypted_path`, decrypted to a
//! scratch plaintext copy on `load` and re-encrypted from that scratch copy
//! on `close`. The scratch copy never outlives one `load`/`close` cycle.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use buttercup_error::{make_err, Code, Error, ResultExt};
use buttercup_util::{restrict_to_owner, staging_path, FileRecord};
use tokio::task::spawn_blocking;

use crate::sqlite_store::SqliteStore;
use crate::Index;

struct Loaded {
    store: SqliteStore,
    staging_path: PathBuf,
}

pub struct EncryptedFileIndex {
    encrypted_path: PathBuf,
    passphrase: String,
    loaded: Arc<StdMutex<Option<Loaded>>>,
}

impl EncryptedFileIndex {
    pub fn new(encrypted_path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        EncryptedFileIndex {
            encrypted_path: encrypted_path.into(),
            passphrase: passphrase.into(),
            loaded: Arc::new(StdMutex::new(None)),
        }
    }

    async fn with_store<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&SqliteStore) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        self.load().await?;
        let loaded = self.loaded.clone();
        spawn_blocking(move || {
            let guard = loaded.lock().expect("index mutex poisoned");
            let loaded = guard
                .as_ref()
                .ok_or_else(|| make_err!(Code::IndexError, "index not loaded"))?;
            f(&loaded.store)
        })
        .await
        .map_err(|e| make_err!(Code::Internal, "index task panicked: {e}"))?
    }
}

#[async_trait]
impl Index for EncryptedFileIndex {
    async fn load(&self) -> Result<(), Error> {
        if self.loaded.lock().expect("index mutex poisoned").is_some() {
            return Ok(());
        }

        let encrypted_path = self.encrypted_path.clone();
        let passphrase = self.passphrase.clone();
        let staging_path = staging_path(&std::env::temp_dir(), "buttercup-index", "db");
        let staging_path_for_task = staging_path.clone();

        spawn_blocking(move || -> Result<SqliteStore, Error> {
            std::fs::File::create(&staging_path_for_task)
                .map_err(Error::from)
                .err_tip(|| format!("cannot create staging file {}", staging_path_for_task.display()))?;
            restrict_to_owner(&staging_path_for_task)?;
            if encrypted_path.exists() {
                buttercup_codec::decode_file(&encrypted_path, &staging_path_for_task, &passphrase)?;
            }
            SqliteStore::open(&staging_path_for_task)
        })
        .await
        .map_err(|e| make_err!(Code::Internal, "index task panicked: {e}"))?
        .map(|store| {
            *self.loaded.lock().expect("index mutex poisoned") = Some(Loaded {
                store,
                staging_path,
            });
        })
    }

    async fn close(&self) -> Result<(), Error> {
        let taken = self.loaded.lock().expect("index mutex poisoned").take();
        let Some(loaded) = taken else {
            return Ok(());
        };

        loaded.store.close();
        let encrypted_path = self.encrypted_path.clone();
        let passphrase = self.passphrase.clone();
        let staging_path = loaded.staging_path;
        let staging_path_for_cleanup = staging_path.clone();

        let result = spawn_blocking(move || {
            buttercup_codec::encode_file(&staging_path, &encrypted_path, &passphrase)
        })
        .await
        .map_err(|e| make_err!(Code::Internal, "index task panicked: {e}"))?;

        let _ = std::fs::remove_file(&staging_path_for_cleanup);
        result
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
    async fn round_trips_through_close_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let encrypted_path = dir.path().join("index.db.age");
        let index = EncryptedFileIndex::new(&encrypted_path, "correct horse battery staple");

        index
            .set_file_info(FileRecord::new("a.txt", Utc::now()))
            .await
            .unwrap();
        index.close().await.unwrap();
        assert!(encrypted_path.exists());

        let reopened = EncryptedFileIndex::new(&encrypted_path, "correct horse battery staple");
        let record = reopened.get_file_info("a.txt").await.unwrap();
        assert_eq!(record.path, "a.txt");
    }

    #[tokio::test]
    async fn wrong_passphrase_fails_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let encrypted_path = dir.path().join("index.db.age");
        let index = EncryptedFileIndex::new(&encrypted_path, "right");
        index
            .set_file_info(FileRecord::new("a.txt", Utc::now()))
            .await
            .unwrap();
        index.close().await.unwrap();

        let reopened = EncryptedFileIndex::new(&encrypted_path, "wrong");
        let err = reopened.get_file_info("a.txt").await.unwrap_err();
        assert_eq!(err.code, Code::CodecError);
    }

    #[tokio::test]
    async fn close_without_load_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let index = EncryptedFileIndex::new(dir.path().join("index.db.age"), "pw");
        index.close().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn staged_plaintext_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let index = EncryptedFileIndex::new(dir.path().join("index.db.age"), "pw");
        index.load().await.unwrap();

        let staging_path = index
            .loaded
            .lock()
            .expect("index mutex poisoned")
            .as_ref()
            .unwrap()
            .staging_path
            .clone();
        let mode = std::fs::metadata(&staging_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
