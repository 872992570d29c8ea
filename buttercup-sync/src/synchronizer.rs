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

//! The synchronizer (§4.6): orchestrates `Pull`/`Push`/`Sync` over a pair
//! of providers, dispatching each file through [`Compare`] and the
//! [`Source`] adapter. Mirrors `syncer/Syncer.go`, including its lock
//! ordering (`Pull` locks local only; `Push` locks remote then local) and
//! the `canPush` safety gate that refuses to push until a pull would bring
//! nothing new in.

use std::sync::Arc;

use buttercup_error::{make_err, Code, Error, ResultExt};
use buttercup_provider::Provider;
use buttercup_util::conflict_name;

use crate::compare::{compare, Compare};
use crate::source::Source;

pub struct Synchronizer {
    local: Arc<dyn Provider>,
    remote: Arc<dyn Provider>,
    source: Source,
}

impl Synchronizer {
    pub fn new(local: Arc<dyn Provider>, remote: Arc<dyn Provider>) -> Self {
        let source = Source::new(local.clone(), remote.clone());
        Synchronizer { local, remote, source }
    }

    /// Brings the local side up to date with the remote one. Locks local
    /// only -- the remote is only ever read here, never written to.
    pub async fn pull(&self) -> Result<(), Error> {
        self.local.lock().await.err_tip(|| "cannot lock local")?;
        let result = self.pull_locked().await;
        let unlock_result = self.local.unlock().await;
        match (result, unlock_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Err(e)) => Err(e),
            (Err(e), Err(unlock_err)) => Err(e.merge(unlock_err)),
        }
    }

    async fn pull_locked(&self) -> Result<(), Error> {
        let remote_files = self
            .remote
            .get_file_infos(0, 0)
            .await
            .err_tip(|| "could not get remote files")?;

        for rfile in remote_files {
            let lfile = match self.local.get_file_info(&rfile.path).await {
                Ok(lfile) => lfile,
                Err(_) => {
                    tracing::info!(path = %rfile.path, "pulling new file");
                    if let Err(e) = self.source.pull_file(rfile.clone(), &rfile.path).await {
                        tracing::error!(path = %rfile.path, error = %e, "error pulling file");
                    }
                    continue;
                }
            };

            let cmp = match compare(&rfile, &lfile, false) {
                Ok(cmp) => cmp,
                Err(e) => {
                    tracing::error!(path = %lfile.path, error = %e, "skipping file");
                    continue;
                }
            };

            match cmp {
                Compare::UpToDate => {
                    if !rfile.deleted {
                        tracing::info!(path = %rfile.path, "up-to-date already");
                    } else {
                        tracing::debug!(path = %rfile.path, "up-to-date and deleted");
                    }
                }
                Compare::RemoteNewer => {
                    tracing::info!(path = %rfile.path, "pulling new version");
                    if let Err(e) = self.source.pull_file(rfile.clone(), &lfile.path).await {
                        tracing::error!(path = %rfile.path, error = %e, "error pulling file");
                    }
                }
                Compare::ConflictLocalNewer => {
                    tracing::info!(path = %rfile.path, "both files changed, local is more recent");
                    let new_path = conflict_name(&rfile.path);
                    if let Err(e) = self.source.pull_file(rfile.clone(), &new_path).await {
                        tracing::error!(path = %rfile.path, error = %e, "error pulling file");
                    }
                }
                Compare::ConflictRemoteNewer => {
                    tracing::info!(path = %rfile.path, "both files changed, remote is more recent");
                    let new_path = conflict_name(&rfile.path);
                    if let Err(e) = self.local.move_file(&rfile.path, &new_path).await {
                        tracing::error!(path = %rfile.path, error = %e, "renaming file failed");
                        continue;
                    }
                    if let Err(e) = self.source.pull_file(rfile.clone(), &rfile.path).await {
                        tracing::error!(path = %rfile.path, error = %e, "error fetching file");
                    }
                }
                Compare::LocalNewer => {}
            }
        }

        Ok(())
    }

    /// True if pushing now would not clobber an update the local side
    /// hasn't seen yet: every remote record the local side also has must
    /// compare as `LocalNewer` or `UpToDate`.
    async fn can_push(&self) -> Result<bool, Error> {
        let remote_files = self
            .remote
            .get_file_infos(0, 0)
            .await
            .err_tip(|| "could not get remote files")?;

        for rfile in remote_files {
            let Ok(lfile) = self.local.get_file_info(&rfile.path).await else {
                continue;
            };

            match compare(&rfile, &lfile, false)? {
                Compare::LocalNewer | Compare::UpToDate => continue,
                _ => return Ok(false),
            }
        }

        Ok(true)
    }

    /// Sends local changes to the remote side. Locks remote, then local
    /// (the local lock is held only so `last_synced` stamps are
    /// consistent with the rest of the run); refuses to proceed if
    /// [`Self::can_push`] says the local side is missing remote updates.
    pub async fn push(&self) -> Result<(), Error> {
        self.remote.lock().await.err_tip(|| "cannot lock remote")?;

        if let Err(e) = self.local.lock().await.err_tip(|| "cannot lock local") {
            let unlock_err = self.remote.unlock().await.err();
            return Err(match unlock_err {
                Some(u) => e.merge(u),
                None => e,
            });
        }

        let result = self.push_locked().await;

        let local_unlock = self.local.unlock().await;
        let remote_unlock = self.remote.unlock().await;

        let mut errors: Vec<Error> = Vec::new();
        if let Err(e) = result {
            errors.push(e);
        }
        if let Err(e) = local_unlock {
            errors.push(e);
        }
        if let Err(e) = remote_unlock {
            errors.push(e);
        }

        let mut iter = errors.into_iter();
        match iter.next() {
            None => Ok(()),
            Some(first) => Err(iter.fold(first, |acc, e| acc.merge(e))),
        }
    }

    async fn push_locked(&self) -> Result<(), Error> {
        if !self.can_push().await.err_tip(|| "cannot check if we can push")? {
            return Err(make_err!(
                Code::CompareError,
                "cannot push, local is missing updates from remote. Pull first"
            ));
        }

        let local_files = self
            .local
            .get_file_infos(0, 0)
            .await
            .err_tip(|| "could not get local files")?;

        for lfile in local_files {
            let rfile = match self.remote.get_file_info(&lfile.path).await {
                Ok(rfile) => rfile,
                Err(_) => {
                    tracing::info!(path = %lfile.path, "pushing new file");
                    if let Err(e) = self.source.push_file(lfile.clone()).await {
                        tracing::error!(path = %lfile.path, error = %e, "error pushing file");
                    }
                    continue;
                }
            };

            let cmp = match compare(&lfile, &rfile, true) {
                Ok(cmp) => cmp,
                Err(e) => {
                    tracing::error!(path = %rfile.path, error = %e, "skipping file");
                    continue;
                }
            };

            match cmp {
                Compare::UpToDate => tracing::info!(path = %lfile.path, "up-to-date already"),
                Compare::LocalNewer => {
                    tracing::info!(path = %lfile.path, "pushing updated file");
                    if let Err(e) = self.source.push_file(lfile.clone()).await {
                        tracing::error!(path = %lfile.path, error = %e, "error pushing file");
                    }
                }
                other => {
                    tracing::error!(path = %lfile.path, result = ?other, "unexpected compare result");
                }
            }
        }

        Ok(())
    }

    /// Pulls, then pushes. Stops without pushing if the pull itself fails.
    pub async fn sync(&self) -> Result<(), Error> {
        self.pull().await.err_tip(|| "sync failed")?;
        self.push().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buttercup_provider::InMemoryProvider;
    use buttercup_util::buf_channel::{read_to_end, reader_from_bytes};
    use buttercup_util::FileRecord;
    use bytes::Bytes;
    use pretty_assertions::assert_eq; // Must be declared in every module.
    use chrono::{Duration, Utc};

    fn synchronizer() -> (Arc<dyn Provider>, Arc<dyn Provider>, Synchronizer) {
        let local: Arc<dyn Provider> = Arc::new(InMemoryProvider::new("local"));
        let remote: Arc<dyn Provider> = Arc::new(InMemoryProvider::new("remote"));
        let sync = Synchronizer::new(local.clone(), remote.clone());
        (local, remote, sync)
    }

    #[tokio::test]
    async fn pull_brings_in_a_new_remote_file() {
        let (local, remote, sync) = synchronizer();
        remote
            .store_file(FileRecord::new("foo.txt", Utc::now()), reader_from_bytes(Bytes::from_static(b"hi")))
            .await
            .unwrap();

        sync.pull().await.unwrap();

        let data = read_to_end(local.retrieve_file("foo.txt").await.unwrap()).await.unwrap();
        assert_eq!(data, b"hi");
    }

    #[tokio::test]
    async fn push_sends_a_new_local_file() {
        let (local, remote, sync) = synchronizer();
        local
            .store_file(FileRecord::new("foo.txt", Utc::now()), reader_from_bytes(Bytes::from_static(b"hi")))
            .await
            .unwrap();

        sync.push().await.unwrap();

        let data = read_to_end(remote.retrieve_file("foo.txt").await.unwrap()).await.unwrap();
        assert_eq!(data, b"hi");
    }

    #[tokio::test]
    async fn push_refuses_when_remote_has_an_update_local_has_not_pulled() {
        let (local, remote, sync) = synchronizer();
        let now = Utc::now();

        // Both sides have seen the file in the past...
        let mut base = FileRecord::new("foo.txt", now - Duration::hours(3));
        base.last_synced = now - Duration::hours(3);
        local
            .store_file(base.clone(), reader_from_bytes(Bytes::from_static(b"v0")))
            .await
            .unwrap();
        local.set_last_synced("foo.txt", now - Duration::hours(3)).await.unwrap();
        remote
            .store_file(base.clone(), reader_from_bytes(Bytes::from_static(b"v0")))
            .await
            .unwrap();

        // ...but only the remote has changed since.
        remote
            .store_file(FileRecord::new("foo.txt", now), reader_from_bytes(Bytes::from_static(b"v1")))
            .await
            .unwrap();

        let err = sync.push().await.unwrap_err();
        assert_eq!(err.code, Code::CompareError);
    }

    #[tokio::test]
    async fn sync_pulls_then_pushes() {
        let (local, remote, sync) = synchronizer();
        remote
            .store_file(FileRecord::new("from-remote.txt", Utc::now()), reader_from_bytes(Bytes::from_static(b"r")))
            .await
            .unwrap();
        local
            .store_file(FileRecord::new("from-local.txt", Utc::now()), reader_from_bytes(Bytes::from_static(b"l")))
            .await
            .unwrap();

        sync.sync().await.unwrap();

        assert!(local.get_file_info("from-remote.txt").await.is_ok());
        assert!(remote.get_file_info("from-local.txt").await.is_ok());
    }

    #[tokio::test]
    async fn conflict_remote_newer_renames_local_and_pulls_remote_in_place() {
        let (local, remote, sync) = synchronizer();
        let now = Utc::now();
        let last_synced = now - Duration::hours(3);

        let mut local_fi = FileRecord::new("foo.txt", now - Duration::hours(1));
        local_fi.last_synced = last_synced;
        local
            .store_file(local_fi, reader_from_bytes(Bytes::from_static(b"local version")))
            .await
            .unwrap();
        local.set_last_synced("foo.txt", last_synced).await.unwrap();

        let remote_fi = FileRecord::new("foo.txt", now);
        remote
            .store_file(remote_fi, reader_from_bytes(Bytes::from_static(b"remote version")))
            .await
            .unwrap();

        sync.pull().await.unwrap();

        let remote_copy = read_to_end(local.retrieve_file("foo.txt").await.unwrap()).await.unwrap();
        assert_eq!(remote_copy, b"remote version");
        let conflict_copy = read_to_end(local.retrieve_file("foo.conflict.txt").await.unwrap()).await.unwrap();
        assert_eq!(conflict_copy, b"local version");
    }
}
