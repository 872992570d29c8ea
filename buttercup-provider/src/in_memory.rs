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

//! The in-memory provider (§4.3.2): the `in-memory` provider type, used by
//! the synchronizer's own test suite in place of a real filesystem or
//! bucket. Mirrors `InMemoryProvider.go`, including its one real
//! divergence from the other three backends: mutating calls are rejected
//! with [`Code::Locked`] while the lock is held by someone else, rather
//! than merely guarding a well-known lockfile that nothing else enforces.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use buttercup_error::{make_err, Code, Error};
use buttercup_util::buf_channel::{read_to_end, reader_from_bytes, DropCloserReadHalf};
use buttercup_util::FileRecord;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::Provider;

#[derive(Default)]
struct State {
    files: HashMap<String, FileRecord>,
    payloads: HashMap<String, Bytes>,
    lock_holder: Option<String>,
}

pub struct InMemoryProvider {
    client_name: String,
    state: StdMutex<State>,
}

impl InMemoryProvider {
    pub fn new(client_name: impl Into<String>) -> Self {
        InMemoryProvider {
            client_name: client_name.into(),
            state: StdMutex::new(State::default()),
        }
    }

    /// Mutating calls are allowed when nobody holds the lock, or when the
    /// caller itself holds it; any other holder blocks the write.
    fn can_write(state: &State, client_name: &str) -> bool {
        match &state.lock_holder {
            None => true,
            Some(holder) => holder == client_name,
        }
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    async fn retrieve_file(&self, path: &str) -> Result<DropCloserReadHalf, Error> {
        let state = self.state.lock().expect("in-memory provider mutex poisoned");
        let fi = state
            .files
            .get(path)
            .ok_or_else(|| make_err!(Code::NotFound, "no such file: {path}"))?;
        if fi.deleted {
            return Err(make_err!(Code::NotFound, "file is deleted: {path}"));
        }
        let data = state
            .payloads
            .get(path)
            .cloned()
            .ok_or_else(|| make_err!(Code::NotFound, "no payload stored for: {path}"))?;
        Ok(reader_from_bytes(data))
    }

    async fn store_file(&self, fi: FileRecord, reader: DropCloserReadHalf) -> Result<(), Error> {
        let data = read_to_end(reader).await?;
        let mut state = self.state.lock().expect("in-memory provider mutex poisoned");
        if !Self::can_write(&state, &self.client_name) {
            return Err(make_err!(Code::Locked, "store is locked by another client"));
        }

        let mut record = state
            .files
            .get(&fi.path)
            .cloned()
            .unwrap_or_else(|| FileRecord::new(fi.path.clone(), fi.updated));
        record.updated = fi.updated;
        record.deleted = false;

        state.payloads.insert(fi.path.clone(), data.into());
        state.files.insert(fi.path.clone(), record);
        Ok(())
    }

    async fn remove_file(&self, fi: FileRecord) -> Result<(), Error> {
        let mut state = self.state.lock().expect("in-memory provider mutex poisoned");
        if !Self::can_write(&state, &self.client_name) {
            return Err(make_err!(Code::Locked, "store is locked by another client"));
        }

        state.payloads.remove(&fi.path);
        let mut record = state
            .files
            .get(&fi.path)
            .cloned()
            .unwrap_or_else(|| FileRecord::new(fi.path.clone(), fi.updated));
        record.deleted = true;
        record.updated = fi.updated;
        state.files.insert(fi.path.clone(), record);
        Ok(())
    }

    async fn move_file(&self, old_path: &str, new_path: &str) -> Result<(), Error> {
        let mut state = self.state.lock().expect("in-memory provider mutex poisoned");
        if !Self::can_write(&state, &self.client_name) {
            return Err(make_err!(Code::Locked, "store is locked by another client"));
        }

        let mut record = state
            .files
            .remove(old_path)
            .ok_or_else(|| make_err!(Code::NotFound, "no such file: {old_path}"))?;
        record.path = new_path.to_string();
        state.files.insert(new_path.to_string(), record);

        if let Some(data) = state.payloads.remove(old_path) {
            state.payloads.insert(new_path.to_string(), data);
        }
        Ok(())
    }

    async fn set_last_synced(&self, path: &str, date: DateTime<Utc>) -> Result<(), Error> {
        let mut state = self.state.lock().expect("in-memory provider mutex poisoned");
        let fi = state
            .files
            .get_mut(path)
            .ok_or_else(|| make_err!(Code::NotFound, "no such file: {path}"))?;
        fi.last_synced = date;
        Ok(())
    }

    async fn get_file_info(&self, path: &str) -> Result<FileRecord, Error> {
        let state = self.state.lock().expect("in-memory provider mutex poisoned");
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| make_err!(Code::NotFound, "no such file: {path}"))
    }

    async fn get_file_infos(&self, limit: i64, offset: i64) -> Result<Vec<FileRecord>, Error> {
        let state = self.state.lock().expect("in-memory provider mutex poisoned");
        let mut paths: Vec<&String> = state.files.keys().collect();
        paths.sort_by_key(|p| p.to_lowercase());

        let offset = offset.max(0) as usize;
        let iter = paths.into_iter().skip(offset);
        let records: Vec<FileRecord> = if limit <= 0 {
            iter.map(|p| state.files[p].clone()).collect()
        } else {
            iter.take(limit as usize).map(|p| state.files[p].clone()).collect()
        };
        Ok(records)
    }

    async fn lock(&self) -> Result<(), Error> {
        let mut state = self.state.lock().expect("in-memory provider mutex poisoned");
        if state.lock_holder.is_some() {
            return Err(make_err!(Code::Locked, "cannot set lock, already locked"));
        }
        state.lock_holder = Some(self.client_name.clone());
        Ok(())
    }

    async fn unlock(&self) -> Result<(), Error> {
        let mut state = self.state.lock().expect("in-memory provider mutex poisoned");
        match &state.lock_holder {
            None => Err(make_err!(Code::Locked, "already unlocked")),
            Some(holder) if holder != &self.client_name => Err(make_err!(
                Code::Locked,
                "store locked by another client: {holder}"
            )),
            Some(_) => {
                state.lock_holder = None;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq; // Must be declared in every module.

    #[tokio::test]
    async fn store_then_retrieve_round_trips_bytes() {
        let provider = InMemoryProvider::new("client");
        provider
            .store_file(FileRecord::new("foo.txt", Utc::now()), reader_from_bytes(Bytes::from_static(b"hello")))
            .await
            .unwrap();
        let data = read_to_end(provider.retrieve_file("foo.txt").await.unwrap()).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn lock_held_by_other_client_blocks_writes() {
        let provider = InMemoryProvider::new("client-a");
        {
            let mut state = provider.state.lock().unwrap();
            state.lock_holder = Some("client-b".to_string());
        }

        let err = provider
            .store_file(FileRecord::new("foo.txt", Utc::now()), reader_from_bytes(Bytes::from_static(b"x")))
            .await
            .unwrap_err();
        assert_eq!(err.code, Code::Locked);

        let err = provider.remove_file(FileRecord::new("foo.txt", Utc::now())).await.unwrap_err();
        assert_eq!(err.code, Code::Locked);
    }

    #[tokio::test]
    async fn own_lock_does_not_block_own_writes() {
        let provider = InMemoryProvider::new("client-a");
        provider.lock().await.unwrap();
        provider
            .store_file(FileRecord::new("foo.txt", Utc::now()), reader_from_bytes(Bytes::from_static(b"x")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_file_infos_pages_in_sorted_order() {
        let provider = InMemoryProvider::new("client");
        for name in ["banana.txt", "Apple.txt", "cherry.txt"] {
            provider
                .store_file(FileRecord::new(name, Utc::now()), reader_from_bytes(Bytes::from_static(b"x")))
                .await
                .unwrap();
        }

        let page = provider.get_file_infos(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].path, "Apple.txt");
        assert_eq!(page[1].path, "banana.txt");
    }

    #[tokio::test]
    async fn unlock_without_lock_fails() {
        let provider = InMemoryProvider::new("client");
        let err = provider.unlock().await.unwrap_err();
        assert_eq!(err.code, Code::Locked);
    }
}
