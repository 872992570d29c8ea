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

//! The provider (§4.3): the externally visible capability bundle every
//! store variant exposes -- stream read/write/delete/rename, per-file
//! metadata, paging, and the lock protocol (§4.3.1). Four concrete
//! implementations share this one contract: a plaintext local filesystem,
//! an encrypted local filesystem, an encrypted S3-compatible object store,
//! and an in-memory provider used for tests, mirroring `FileProvider.go`
//! and its four `New*Provider` constructors.

mod encrypted_fs;
mod in_memory;
mod plaintext_fs;
mod random_path;
mod s3;

pub use encrypted_fs::EncryptedFsProvider;
pub use in_memory::InMemoryProvider;
pub use plaintext_fs::PlaintextFsProvider;
pub use random_path::create_random_path;
pub use s3::S3Provider;

use std::sync::Arc;

use async_trait::async_trait;
use buttercup_config::{ProviderConfig, TYPE_EFS, TYPE_FS, TYPE_IN_MEMORY, TYPE_S3};
use buttercup_error::{make_err, Code, Error};
use buttercup_util::buf_channel::DropCloserReadHalf;
use buttercup_util::FileRecord;
use chrono::{DateTime, Utc};

/// Well-known object/file holding the advisory lock (§4.3.1): its content
/// is the acquiring client's name.
pub const LOCK_FILE_NAME: &str = ".buttercup.lock";

/// The provider contract (§4.3). Every mutating operation upserts or
/// tombstones the backing record the way the original's four provider
/// implementations do; callers hold one `Provider` per side of a sync
/// (local, remote).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Opens a streaming reader over the plaintext payload. `Code::NotFound`
    /// if the record is absent or tombstoned.
    async fn retrieve_file(&self, path: &str) -> Result<DropCloserReadHalf, Error>;

    /// Consumes `reader` to end, writes the payload, and upserts the
    /// record with `fi.updated` and `deleted = false`.
    async fn store_file(&self, fi: FileRecord, reader: DropCloserReadHalf) -> Result<(), Error>;

    /// Deletes the payload (ignoring a missing one) and tombstones the
    /// record; inserts a fresh tombstone if the record didn't exist yet.
    async fn remove_file(&self, fi: FileRecord) -> Result<(), Error>;

    /// Renames a record (and, for unencrypted backends, its payload).
    async fn move_file(&self, old_path: &str, new_path: &str) -> Result<(), Error>;

    /// Updates `last_synced` for an existing record. `Code::NotFound` if
    /// absent.
    async fn set_last_synced(&self, path: &str, date: DateTime<Utc>) -> Result<(), Error>;

    async fn get_file_info(&self, path: &str) -> Result<FileRecord, Error>;

    /// `limit <= 0` means "no limit".
    async fn get_file_infos(&self, limit: i64, offset: i64) -> Result<Vec<FileRecord>, Error>;

    /// Sets the advisory lock (§4.3.1). Fails if already locked.
    async fn lock(&self) -> Result<(), Error>;

    /// Releases the advisory lock and persists the index. Fails if already
    /// unlocked or held by another client.
    async fn unlock(&self) -> Result<(), Error>;
}

/// Builds the concrete provider named by `config.provider_type`, mirroring
/// `GetProvider.go`'s switch. A config mismatch or unknown type surfaces as
/// `Code::ConfigError` instead of the original's process-ending panic (§9:
/// "do not panic in library code").
pub async fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>, Error> {
    match config.provider_type.as_str() {
        TYPE_FS => {
            let fs = config
                .fs_config
                .as_ref()
                .ok_or_else(|| make_err!(Code::ConfigError, "fs config is not defined"))?;
            let provider = PlaintextFsProvider::new(&fs.path, &config.client_name).await?;
            Ok(Arc::new(provider))
        }
        TYPE_EFS => {
            let efs = config
                .efs_config
                .as_ref()
                .ok_or_else(|| make_err!(Code::ConfigError, "efs config is not defined"))?;
            let passphrase = efs
                .passphrase
                .clone()
                .ok_or_else(|| make_err!(Code::ConfigError, "efs config is missing a passphrase"))?;
            let provider = EncryptedFsProvider::new(&efs.path, &config.client_name, passphrase).await?;
            Ok(Arc::new(provider))
        }
        TYPE_S3 => {
            let s3_config = config
                .s3_config
                .as_ref()
                .ok_or_else(|| make_err!(Code::ConfigError, "s3 config is not defined"))?;
            let provider = S3Provider::new(s3_config, &config.client_name).await?;
            Ok(Arc::new(provider))
        }
        TYPE_IN_MEMORY => Ok(Arc::new(InMemoryProvider::new(&config.client_name))),
        other => Err(make_err!(Code::ConfigError, "unknown provider type: {other}")),
    }
}
