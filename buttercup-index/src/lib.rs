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

//! The index store (§4.2): a relational record of every path a provider
//! knows about, keyed to one of three concrete backends depending on what
//! the folder's provider config asks for.

mod encrypted_file;
mod plaintext;
mod remote;
mod sqlite_store;

pub use encrypted_file::EncryptedFileIndex;
pub use plaintext::{PlaintextIndex, INDEX_FILE_NAME};
pub use remote::{RemoteEncryptedIndex, INDEX_OBJECT_KEY};

use buttercup_error::Error;
use buttercup_util::FileRecord;

/// The index store contract (§4.2). Every method implicitly loads the
/// backing store if it has not been loaded yet, mirroring the original's
/// "every operation opens the db on demand" behavior; callers that want to
/// control exactly when the (possibly expensive, possibly networked) load
/// happens can call [`Index::load`] up front.
#[async_trait::async_trait]
pub trait Index: Send + Sync {
    /// Makes the store ready for use: opens (and for the encrypted
    /// variants, decrypts) the backing sqlite file. Calling `load` more
    /// than once is a no-op.
    async fn load(&self) -> Result<(), Error>;

    /// Flushes and releases the backing store: for the encrypted variants
    /// this re-encrypts the sqlite file (and for the remote variant,
    /// re-uploads it). Calling `close` without a prior `load` is a no-op.
    async fn close(&self) -> Result<(), Error>;

    /// Looks up a single record. `Code::NotFound` if `path` isn't indexed.
    async fn get_file_info(&self, path: &str) -> Result<FileRecord, Error>;

    /// Inserts or overwrites a record.
    async fn set_file_info(&self, record: FileRecord) -> Result<(), Error>;

    /// Renames a record in place, preserving every other column.
    /// `Code::NotFound` if `old_path` isn't indexed.
    async fn update_path(&self, old_path: &str, new_path: &str) -> Result<(), Error>;

    /// Returns up to `limit` records starting at `offset`, in unspecified
    /// order. `limit <= 0` means "no limit".
    async fn get_page(&self, offset: i64, limit: i64) -> Result<Vec<FileRecord>, Error>;

    /// Tombstones every non-deleted record whose `tracking_value` differs
    /// from `tracking_value` (§4.3.2): used by the plaintext filesystem
    /// provider's rescan to detect files removed out from under it between
    /// runs.
    async fn mark_deleted(&self, tracking_value: i64) -> Result<(), Error>;
}
