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

//! The source adapter (§4.5): moves one file's content and metadata
//! between a local and a remote [`Provider`], always finishing by stamping
//! `last_synced` so the next comparison sees this side as caught up.
//! Mirrors `source/Source.go`.

use std::sync::Arc;

use buttercup_error::{Error, ResultExt};
use buttercup_provider::Provider;
use buttercup_util::FileRecord;

pub struct Source {
    local: Arc<dyn Provider>,
    remote: Arc<dyn Provider>,
}

impl Source {
    pub fn new(local: Arc<dyn Provider>, remote: Arc<dyn Provider>) -> Self {
        Source { local, remote }
    }

    /// Pulls `fi` (a remote record) into the local side under `new_path`
    /// (which may differ from `fi.path` for a conflict copy). A deleted
    /// record just removes the local copy.
    pub async fn pull_file(&self, mut fi: FileRecord, new_path: &str) -> Result<(), Error> {
        if fi.deleted {
            self.local
                .remove_file(fi.clone())
                .await
                .err_tip(|| "could not remove file locally")?;
        } else {
            let reader = self
                .remote
                .retrieve_file(&fi.path)
                .await
                .err_tip(|| "could not retrieve file from remote")?;

            fi.path = new_path.to_string();
            self.local
                .store_file(fi.clone(), reader)
                .await
                .err_tip(|| "could not store file locally")?;
        }

        self.local
            .set_last_synced(&fi.path, fi.updated)
            .await
            .err_tip(|| "could not set last_synced date")
    }

    /// Pushes `fi` (a local record) out to the remote side.
    pub async fn push_file(&self, fi: FileRecord) -> Result<(), Error> {
        if fi.deleted {
            self.remote
                .remove_file(fi.clone())
                .await
                .err_tip(|| "could not remove file remotely")?;
        } else {
            let reader = self
                .local
                .retrieve_file(&fi.path)
                .await
                .err_tip(|| "could not read local file")?;

            self.remote
                .store_file(fi.clone(), reader)
                .await
                .err_tip(|| "could not store file remotely")?;
        }

        self.local
            .set_last_synced(&fi.path, fi.updated)
            .await
            .err_tip(|| "could not set last_synced date")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buttercup_provider::InMemoryProvider;
    use buttercup_util::buf_channel::{read_to_end, reader_from_bytes};
    use bytes::Bytes;
    use chrono::Utc;
    use pretty_assertions::assert_eq; // Must be declared in every module.

    fn providers() -> (Arc<dyn Provider>, Arc<dyn Provider>) {
        (
            Arc::new(InMemoryProvider::new("local")),
            Arc::new(InMemoryProvider::new("remote")),
        )
    }

    #[tokio::test]
    async fn pull_file_stores_locally_and_stamps_last_synced() {
        let (local, remote) = providers();
        let fi = FileRecord::new("foo.txt", Utc::now());
        remote
            .store_file(fi.clone(), reader_from_bytes(Bytes::from_static(b"remote bytes")))
            .await
            .unwrap();

        let source = Source::new(local.clone(), remote.clone());
        source.pull_file(fi.clone(), "foo.txt").await.unwrap();

        let data = read_to_end(local.retrieve_file("foo.txt").await.unwrap()).await.unwrap();
        assert_eq!(data, b"remote bytes");
        let stored = local.get_file_info("foo.txt").await.unwrap();
        assert_eq!(stored.last_synced, fi.updated);
    }

    #[tokio::test]
    async fn pull_file_to_a_different_path_stores_under_new_path() {
        let (local, remote) = providers();
        let fi = FileRecord::new("foo.txt", Utc::now());
        remote
            .store_file(fi.clone(), reader_from_bytes(Bytes::from_static(b"x")))
            .await
            .unwrap();

        let source = Source::new(local.clone(), remote.clone());
        source.pull_file(fi, "foo.conflict.txt").await.unwrap();

        assert!(local.get_file_info("foo.conflict.txt").await.is_ok());
        assert!(local.get_file_info("foo.txt").await.is_err());
    }

    #[tokio::test]
    async fn pull_file_deleted_removes_locally() {
        let (local, remote) = providers();
        local
            .store_file(FileRecord::new("foo.txt", Utc::now()), reader_from_bytes(Bytes::from_static(b"x")))
            .await
            .unwrap();

        let mut deleted = FileRecord::new("foo.txt", Utc::now());
        deleted.deleted = true;

        let source = Source::new(local.clone(), remote.clone());
        source.pull_file(deleted, "foo.txt").await.unwrap();

        assert!(local.get_file_info("foo.txt").await.unwrap().deleted);
    }

    #[tokio::test]
    async fn push_file_stores_remotely_and_stamps_last_synced() {
        let (local, remote) = providers();
        let fi = FileRecord::new("foo.txt", Utc::now());
        local
            .store_file(fi.clone(), reader_from_bytes(Bytes::from_static(b"local bytes")))
            .await
            .unwrap();

        let source = Source::new(local.clone(), remote.clone());
        source.push_file(fi.clone()).await.unwrap();

        let data = read_to_end(remote.retrieve_file("foo.txt").await.unwrap()).await.unwrap();
        assert_eq!(data, b"local bytes");
        let stored = local.get_file_info("foo.txt").await.unwrap();
        assert_eq!(stored.last_synced, fi.updated);
    }
}
