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

//! The plaintext filesystem provider (§4.3.2): the `fs` provider type. The
//! index sits right next to the payload files, unencrypted; a file's
//! payload lives at its logical path. On construction the whole rooted
//! directory is walked once to pick up out-of-band edits (files dropped in
//! by something other than buttercup), mirroring `NewFsProvider`'s
//! `refreshDates`.

use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use buttercup_error::{make_err, Code, Error, ResultExt};
use buttercup_index::{Index, PlaintextIndex, INDEX_FILE_NAME};
use buttercup_util::buf_channel::{read_to_end, reader_from_bytes, DropCloserReadHalf};
use buttercup_util::FileRecord;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use walkdir::WalkDir;

use crate::{Provider, LOCK_FILE_NAME};

pub struct PlaintextFsProvider {
    root: PathBuf,
    client_name: String,
    index: PlaintextIndex,
}

impl PlaintextFsProvider {
    /// Walks `root`, loads (and creates if absent) the index, and
    /// reconciles the two (§4.3.2) before returning. The original panics
    /// if either step fails; here both surface as an error instead (§9).
    pub async fn new(root: impl Into<PathBuf>, client_name: impl Into<String>) -> Result<Self, Error> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(Error::from)
            .err_tip(|| format!("cannot create provider root {}", root.display()))?;

        let index = PlaintextIndex::new(root.join(INDEX_FILE_NAME));
        index.load().await?;

        let provider = PlaintextFsProvider {
            root,
            client_name: client_name.into(),
            index,
        };
        provider.refresh_dates().await?;
        Ok(provider)
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    /// Stamps every file currently on disk with the current scan epoch,
    /// then sweeps everything not stamped into a tombstone (§4.3.2).
    async fn refresh_dates(&self) -> Result<(), Error> {
        let tracking_value = Utc::now().timestamp();
        let root = self.root.clone();

        let entries = tokio::task::spawn_blocking(move || -> Result<Vec<(String, SystemTime)>, Error> {
            let mut out = Vec::new();
            for entry in WalkDir::new(&root) {
                let entry = entry
                    .map_err(|e| make_err!(Code::BackendError, "error walking {}: {e}", root.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }

                let relative = entry
                    .path()
                    .strip_prefix(&root)
                    .expect("walkdir always yields paths under root");
                let relative_str = relative.to_string_lossy().replace('\\', "/");
                if relative_str == INDEX_FILE_NAME || relative_str == LOCK_FILE_NAME {
                    continue;
                }

                let modified = entry
                    .metadata()
                    .map_err(|e| make_err!(Code::BackendError, "cannot stat {}: {e}", entry.path().display()))?
                    .modified()
                    .map_err(|e| make_err!(Code::BackendError, "no mtime for {}: {e}", entry.path().display()))?;
                out.push((relative_str, modified));
            }
            Ok(out)
        })
        .await
        .map_err(|e| make_err!(Code::Internal, "walk task panicked: {e}"))??;

        for (path, modified) in entries {
            let updated: DateTime<Utc> = modified.into();
            match self.index.get_file_info(&path).await {
                Ok(mut fi) => {
                    fi.tracking_value = tracking_value;
                    fi.updated = updated;
                    self.index.set_file_info(fi).await?;
                }
                Err(e) if e.code == Code::NotFound => {
                    let mut fi = FileRecord::new(path, updated);
                    fi.tracking_value = tracking_value;
                    self.index.set_file_info(fi).await?;
                }
                Err(e) => return Err(e),
            }
        }

        self.index.mark_deleted(tracking_value).await
    }
}

#[async_trait]
impl Provider for PlaintextFsProvider {
    async fn retrieve_file(&self, path: &str) -> Result<DropCloserReadHalf, Error> {
        let fi = self.index.get_file_info(path).await?;
        if fi.deleted {
            return Err(make_err!(Code::NotFound, "file is deleted: {path}"));
        }

        let full_path = self.full_path(path);
        let data = tokio::fs::read(&full_path)
            .await
            .map_err(Error::from)
            .err_tip(|| format!("cannot open {} for retrieval", full_path.display()))?;
        Ok(reader_from_bytes(data.into()))
    }

    async fn store_file(&self, fi: FileRecord, reader: DropCloserReadHalf) -> Result<(), Error> {
        let existing = self.index.get_file_info(&fi.path).await;
        if existing.is_err() {
            self.index
                .set_file_info(FileRecord::new(fi.path.clone(), fi.updated))
                .await?;
        }

        let full_path = self.full_path(&fi.path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::from)?;
        }

        let data = read_to_end(reader).await?;
        tokio::fs::write(&full_path, &data)
            .await
            .map_err(Error::from)
            .err_tip(|| format!("could not store file at {}", full_path.display()))?;
        filetime::set_file_times(&full_path, FileTime::from(fi.updated), FileTime::from(fi.updated))
            .map_err(Error::from)
            .err_tip(|| format!("could not set new updated times on {}", full_path.display()))?;

        let mut record = existing.unwrap_or_else(|_| FileRecord::new(fi.path.clone(), fi.updated));
        record.updated = fi.updated;
        record.deleted = false;
        self.index.set_file_info(record).await
    }

    async fn remove_file(&self, fi: FileRecord) -> Result<(), Error> {
        let Ok(mut record) = self.index.get_file_info(&fi.path).await else {
            let mut tombstone = FileRecord::new(fi.path.clone(), fi.updated);
            tombstone.deleted = true;
            return self.index.set_file_info(tombstone).await;
        };

        let full_path = self.full_path(&fi.path);
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::from(e)).err_tip(|| format!("could not remove {}", full_path.display()))
            }
        }

        record.deleted = true;
        record.updated = fi.updated;
        self.index.set_file_info(record).await
    }

    async fn move_file(&self, old_path: &str, new_path: &str) -> Result<(), Error> {
        let new_full = self.full_path(new_path);
        if let Some(parent) = new_full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(Error::from)
                .err_tip(|| "could not create target directory")?;
        }
        tokio::fs::rename(self.full_path(old_path), &new_full)
            .await
            .map_err(Error::from)
            .err_tip(|| format!("could not rename to {}", new_full.display()))?;
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
        let lock_path = self.full_path(LOCK_FILE_NAME);
        if tokio::fs::metadata(&lock_path).await.is_ok() {
            return Err(make_err!(Code::Locked, "cannot set lock, already locked"));
        }
        tokio::fs::write(&lock_path, self.client_name.as_bytes())
            .await
            .map_err(Error::from)
            .err_tip(|| "error setting lock")
    }

    async fn unlock(&self) -> Result<(), Error> {
        let lock_path = self.full_path(LOCK_FILE_NAME);
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

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq; // Must be declared in every module.

    async fn provider() -> (tempfile::TempDir, PlaintextFsProvider) {
        let dir = tempfile::tempdir().unwrap();
        let provider = PlaintextFsProvider::new(dir.path(), "client").await.unwrap();
        (dir, provider)
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips_bytes() {
        let (_dir, provider) = provider().await;
        let fi = FileRecord::new("foo.txt", Utc::now());
        provider
            .store_file(fi.clone(), reader_from_bytes(Bytes::from_static(b"hello")))
            .await
            .unwrap();

        let read = provider.retrieve_file("foo.txt").await.unwrap();
        let data = read_to_end(read).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn remove_tombstones_and_blocks_retrieval() {
        let (_dir, provider) = provider().await;
        let fi = FileRecord::new("foo.txt", Utc::now());
        provider
            .store_file(fi.clone(), reader_from_bytes(Bytes::from_static(b"hi")))
            .await
            .unwrap();

        provider.remove_file(FileRecord::new("foo.txt", Utc::now())).await.unwrap();
        let info = provider.get_file_info("foo.txt").await.unwrap();
        assert!(info.deleted);
        assert!(provider.retrieve_file("foo.txt").await.is_err());
    }

    #[tokio::test]
    async fn remove_on_absent_path_creates_tombstone() {
        let (_dir, provider) = provider().await;
        provider.remove_file(FileRecord::new("never-existed.txt", Utc::now())).await.unwrap();
        let info = provider.get_file_info("never-existed.txt").await.unwrap();
        assert!(info.deleted);
    }

    #[tokio::test]
    async fn move_file_renames_backend_and_index() {
        let (_dir, provider) = provider().await;
        provider
            .store_file(FileRecord::new("a.txt", Utc::now()), reader_from_bytes(Bytes::from_static(b"x")))
            .await
            .unwrap();
        provider.move_file("a.txt", "b.txt").await.unwrap();
        assert!(provider.get_file_info("a.txt").await.is_err());
        assert!(provider.get_file_info("b.txt").await.is_ok());
    }

    #[tokio::test]
    async fn second_lock_fails_and_unlock_twice_fails() {
        let (_dir, provider) = provider().await;
        provider.lock().await.unwrap();
        assert_eq!(provider.lock().await.unwrap_err().code, Code::Locked);
        provider.unlock().await.unwrap();
        assert_eq!(provider.unlock().await.unwrap_err().code, Code::Locked);
    }

    #[tokio::test]
    async fn picks_up_files_dropped_in_out_of_band() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("manual.txt"), b"manual").unwrap();

        let provider = PlaintextFsProvider::new(dir.path(), "client").await.unwrap();
        let info = provider.get_file_info("manual.txt").await.unwrap();
        assert!(!info.deleted);
    }
}
