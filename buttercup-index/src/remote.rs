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

//! The encrypted-remote index backend, used by the `s3` provider type: the
//! same age+zstd encrypted sqlite file as [`crate::EncryptedFileIndex`], but
//! it lives as a single well-known object in the remote
//! [`buttercup_util::BlobBackend`] rather than on local disk. `load`
//! downloads and decrypts it into a local scratch file; `close` re-encrypts
//! and re-uploads it, then discards the scratch copy.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use buttercup_error::{make_err, Code, Error, ResultExt};
use buttercup_util::{restrict_to_owner, staging_path, BlobBackend, FileRecord};
use tokio::task::spawn_blocking;

use crate::sqlite_store::SqliteStore;
use crate::Index;

/// Well-known object key for the encrypted index, same role as the
/// original's single fixed index blob name.
pub const INDEX_OBJECT_KEY: &str = ".buttercup-index.db.age";

struct Loaded {
    store: SqliteStore,
    staging_path: PathBuf,
}

pub struct RemoteEncryptedIndex<B: BlobBackend> {
    backend: B,
    passphrase: String,
    loaded: Arc<StdMutex<Option<Loaded>>>,
}

impl<B: BlobBackend + 'static> RemoteEncryptedIndex<B> {
    pub fn new(backend: B, passphrase: impl Into<String>) -> Self {
        RemoteEncryptedIndex {
            backend,
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
impl<B: BlobBackend + 'static> Index for RemoteEncryptedIndex<B> {
    async fn load(&self) -> Result<(), Error> {
        if self.loaded.lock().expect("index mutex poisoned").is_some() {
            return Ok(());
        }

        let remote_bytes = self.backend.get(INDEX_OBJECT_KEY).await?;
        let passphrase = self.passphrase.clone();
        let staging_path = staging_path(&std::env::temp_dir(), "buttercup-remote-index", "db");
        let staging_path_for_task = staging_path.clone();

        let store = spawn_blocking(move || -> Result<SqliteStore, Error> {
            std::fs::File::create(&staging_path_for_task)
                .map_err(Error::from)
                .err_tip(|| format!("cannot create staging file {}", staging_path_for_task.display()))?;
            restrict_to_owner(&staging_path_for_task)?;
            if let Some(bytes) = remote_bytes {
                let downloaded_path = staging_path_for_task.with_extension("age");
                std::fs::write(&downloaded_path, &bytes).map_err(Error::from)?;
                let result = buttercup_codec::decode_file(&downloaded_path, &staging_path_for_task, &passphrase);
                let _ = std::fs::remove_file(&downloaded_path);
                result?;
            }
            SqliteStore::open(&staging_path_for_task)
        })
        .await
        .map_err(|e| make_err!(Code::Internal, "index task panicked: {e}"))??;

        *self.loaded.lock().expect("index mutex poisoned") = Some(Loaded { store, staging_path });
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        let taken = self.loaded.lock().expect("index mutex poisoned").take();
        let Some(loaded) = taken else {
            return Ok(());
        };

        loaded.store.close();
        let passphrase = self.passphrase.clone();
        let staging_path = loaded.staging_path;
        let encoded_path = staging_path.with_extension("age");
        let staging_path_for_cleanup = staging_path.clone();
        let encoded_path_for_cleanup = encoded_path.clone();

        let encode_result = spawn_blocking(move || {
            buttercup_codec::encode_file(&staging_path, &encoded_path, &passphrase)
        })
        .await
        .map_err(|e| make_err!(Code::Internal, "index task panicked: {e}"))?;

        let _ = std::fs::remove_file(&staging_path_for_cleanup);

        if let Err(e) = encode_result {
            let _ = std::fs::remove_file(&encoded_path_for_cleanup);
            return Err(e);
        }

        let encoded_bytes = tokio::fs::read(&encoded_path_for_cleanup)
            .await
            .map_err(Error::from)?;
        let _ = tokio::fs::remove_file(&encoded_path_for_cleanup).await;

        self.backend.put(INDEX_OBJECT_KEY, encoded_bytes.into()).await
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
