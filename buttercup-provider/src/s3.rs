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

//! The encrypted S3 provider (§4.3.2): the `s3` provider type. Same
//! `storedPath` scheme as [`crate::EncryptedFsProvider`], but payloads and
//! the index both live in the bucket via [`buttercup_s3::S3Client`].
//! Mirrors `S3Provider.go`.

use std::io::Cursor;

use async_trait::async_trait;
use buttercup_config::S3ProviderConfig;
use buttercup_error::{make_err, Code, Error};
use buttercup_index::{Index, RemoteEncryptedIndex};
use buttercup_s3::S3Client;
use buttercup_util::buf_channel::{read_to_end, reader_from_bytes, DropCloserReadHalf};
use buttercup_util::{BlobBackend, FileRecord};
use chrono::{DateTime, Utc};

use crate::random_path::create_random_path;
use crate::{Provider, LOCK_FILE_NAME};

pub struct S3Provider {
    client: S3Client,
    client_name: String,
    passphrase: String,
    index: RemoteEncryptedIndex<S3Client>,
}

impl S3Provider {
    pub async fn new(config: &S3ProviderConfig, client_name: &str) -> Result<Self, Error> {
        let client = S3Client::new(config).await;
        let index = RemoteEncryptedIndex::new(S3Client::new(config).await, config.passphrase.clone());
        index.load().await?;

        Ok(S3Provider {
            client,
            client_name: client_name.to_string(),
            passphrase: config.passphrase.clone(),
            index,
        })
    }

    fn stored_path_for(record: &FileRecord) -> (String, bool) {
        match &record.stored_path {
            Some(p) => (p.clone(), false),
            None => (create_random_path(), true),
        }
    }
}

#[async_trait]
impl Provider for S3Provider {
    async fn retrieve_file(&self, path: &str) -> Result<DropCloserReadHalf, Error> {
        let fi = self.index.get_file_info(path).await?;
        if fi.deleted {
            return Err(make_err!(Code::NotFound, "file is deleted: {path}"));
        }
        let stored_path = fi
            .stored_path
            .ok_or_else(|| make_err!(Code::IndexError, "record has no stored path: {path}"))?;

        let ciphertext = self
            .client
            .download_file(&stored_path)
            .await?;

        let passphrase = self.passphrase.clone();
        let plaintext = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, Error> {
            let mut out = Vec::new();
            buttercup_codec::decode(Cursor::new(ciphertext.to_vec()), &mut out, &passphrase)?;
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

        let plaintext = read_to_end(reader).await?;
        let passphrase = self.passphrase.clone();
        let ciphertext = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, Error> {
            let mut out = Vec::new();
            buttercup_codec::encode(Cursor::new(plaintext), &mut out, &passphrase)?;
            Ok(out)
        })
        .await
        .map_err(|e| make_err!(Code::Internal, "encode task panicked: {e}"))??;

        self.client.upload_file(&stored_path, ciphertext.into()).await?;

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
            self.client.delete_file(stored_path).await?;
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
        if self.client.exists(LOCK_FILE_NAME).await? {
            return Err(make_err!(Code::Locked, "cannot set lock, already locked"));
        }
        self.client
            .put(LOCK_FILE_NAME, self.client_name.clone().into_bytes().into())
            .await
    }

    async fn unlock(&self) -> Result<(), Error> {
        let data = self
            .client
            .get(LOCK_FILE_NAME)
            .await?
            .ok_or_else(|| make_err!(Code::Locked, "already unlocked"))?;
        if data.as_ref() != self.client_name.as_bytes() {
            return Err(make_err!(
                Code::Locked,
                "store locked by another client: {}",
                String::from_utf8_lossy(&data)
            ));
        }
        self.client.delete(LOCK_FILE_NAME).await?;
        self.index.close().await
    }
}
