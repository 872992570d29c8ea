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

//! The encrypted filesystem provider (§4.3.2): the `efs` provider type.
//! Payloads sit at an opaque `storedPath` (§4.3.3) under `root`, each one
//! age+zstd encrypted; the index itself is the encrypted sqlite file
//! managed by [`buttercup_index::EncryptedFileIndex`]. Mirrors
//! `EfsProvider.go`.

use std::io::Cursor;
use std::path::PathBuf;

use async_trait::async_trait;
use buttercup_error::{make_err, Code, Error, ResultExt};
use buttercup_index::{EncryptedFileIndex, Index, INDEX_FILE_NAME};
use buttercup_util::buf_channel::{read_to_end, reader_from_bytes, DropCloserReadHalf};
use buttercup_util::FileRecord;
use chrono::{DateTime, Utc};

use crate::random_path::create_random_path;
use crate::{Provider, LOCK_FILE_NAME};

pub struct EncryptedFsProvider {
    root: PathBuf,
    client_name: String,
    passphrase: String,
    index: EncryptedFileIndex,
}

impl EncryptedFsProvider {
    pub async fn new(
        root: impl Into<PathBuf>,
        client_name: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Result<Self, Error> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(Error::from)
            .err_tip(|| format!("cannot create provider root {}", root.display()))?;

        let passphrase = passphrase.into();
        let index = EncryptedFileIndex::new(root.join(INDEX_FILE_NAME), passphrase.clone());
        index.load().await?;

        Ok(EncryptedFsProvider {
            root,
            client_name: client_name.into(),
            passphrase,
            index,
        })
    }

    fn full_path(&self, stored_path: &str) -> PathBuf {
        self.root.join(stored_path)
    }

    /// Assigns a fresh `storedPath` the first time a record is written,
    /// mirroring `CreateRandomPath`'s "generate once, keep forever" rule
    /// (§4.3.3).
    fn stored_path_for(record: &FileRecord) -> (String, bool) {
        match &record.stored_path {
            Some(p) => (p.clone(), false),
            None => (create_random_path(), true),
        }
    }
}

#[async_trait]
impl Provider for EncryptedFsProvider {
    async fn retrieve_file(&self, path: &str) -> Result<DropCloserReadHalf, Error> {
        let fi = self.index.get_file_info(path).await?;
        if fi.deleted {
            return Err(make_err!(Code::NotFound, "file is deleted: {path}"));
        }
        let stored_path = fi
            .stored_path
            .ok_or_else(|| make_err!(Code::IndexError, "record has no stored path: {path}"))?;

        let full_path = self.full_path(&stored_path);
        let ciphertext = tokio::fs::read(&full_path)
            .await
            .map_err(Error::from)
            .err_tip(|| format!("cannot open {} for retrieval", full_path.display()))?;

        let passphrase = self.passphrase.clone();
        let plaintext = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, Error> {
            let mut out = Vec::new();
            buttercup_codec::decode(Cursor::new(ciphertext), &mut out, &passphrase)?;
            Ok(out)
        })
        .await
        .map_err(|e| make_err!(Code::Internal, "decode task panicked: {e}"))??;

        Ok(reader_from_bytes(plaintext.into()))
    }

    async fn store_file(&self, fi: FileRecord, reader: DropCloserReadHalf) -> Result<(), Error> {
        let existing = self.index.get_file_info(&fi.path).await.ok();
        let base = existing.clone().unwrap_or_else(|| FileRecord::new(fi.path.clone(), fi.updated));
        let (stored_path, is_new) = Self::stored_path_for(&base);

        let full_path = self.full_path(&stored_path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::from)?;
        }

        let plaintext = read_to_end(reader).await?;
        let passphrase = self.passphrase.clone();
        let full_path_for_task = full_path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), Error> {
            let output = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&full_path_for_task)
                .map_err(Error::from)?;
            buttercup_codec::encode(Cursor::new(plaintext), output, &passphrase)
        })
        .await
        .map_err(|e| make_err!(Code::Internal, "encode task panicked: {e}"))??;

        let mut record = base;
        record.updated = fi.updated;
        record.deleted = false;
        if is_new {
            record.stored_path = Some(stored_path);
        }
        self.index.set_file_info(record).await
    }

    async fn remove_file(&self, fi: FileRecord) -> Result<(), Error> {
        let Ok(mut record) = self.index.get_file_info(&fi.path).await else {
            let mut tombstone = FileRecord::new(fi.path.clone(), fi.updated);
            tombstone.stored_path = Some(create_random_path());
            tombstone.deleted = true;
            return self.index.set_file_info(tombstone).await;
        };

        if let Some(stored_path) = &record.stored_path {
            let full_path = self.full_path(stored_path);
            match tokio::fs::remove_file(&full_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::from(e)).err_tip(|| format!("could not remove {}", full_path.display()))
                }
            }
        }

        record.deleted = true;
        record.updated = fi.updated;
        self.index.set_file_info(record).await
    }

    async fn move_file(&self, old_path: &str, new_path: &str) -> Result<(), Error> {
        self.index.update_path(old_path, new_path).await
    }

    async fn set_last_synced(&self, path: &str, date: DateTime<Utc>) -> Result<(), Error> {
        let mut fi = self.index.get_file_info(path).await?;
        fi.last_synced = date;
        self.index.set_file_info(fi).await
    }

    async fn get_file_info(&self, path: &str) -> Result<FileRecord, Error> {
        self.index.get_file_info(path).await
    }

    async fn get_file_infos(&self, limit: i64, offset: i64) -> Result<Vec<FileRecord>, Error> {
        self.index.get_page(offset, limit).await
    }

    async fn lock(&self) -> Result<(), Error> {
        let lock_path = self.root.join(LOCK_FILE_NAME);
        if tokio::fs::metadata(&lock_path).await.is_ok() {
            return Err(make_err!(Code::Locked, "cannot set lock, already locked"));
        }
        tokio::fs::write(&lock_path, self.client_name.as_bytes())
            .await
            .map_err(Error::from)
            .err_tip(|| "error setting lock")
    }

    async fn unlock(&self) -> Result<(), Error> {
        let lock_path = self.root.join(LOCK_FILE_NAME);
        let data = tokio::fs::read(&lock_path)
            .await
            .map_err(|_| make_err!(Code::Locked, "already unlocked"))?;
        if data != self.client_name.as_bytes() {
            return Err(make_err!(
                Code::Locked,
                "store locked by another client: {}",
                String::from_utf8_lossy(&data)
            ));
        }
        tokio::fs::remove_file(&lock_path)
            .await
            .map_err(Error::from)
            .err_tip(|| "error removing lock file")?;
        self.index.close().await
    }
}
