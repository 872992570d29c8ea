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

//! A minimal key/blob store capability, used as the shared seam between
//! `buttercup-s3`'s thin object-store adapter, `buttercup-index`'s
//! remote-object index backend, and `buttercup-provider`'s S3 provider and
//! lock protocol. Per §9's design note: "composition of `Index + BlobBackend
//! + Codec`" rather than inheritance between provider variants.

use bytes::Bytes;
use buttercup_error::Error;

#[async_trait::async_trait]
pub trait BlobBackend: Send + Sync {
    /// Downloads `key`. Returns `Ok(None)` if the key does not exist,
    /// rather than a [`buttercup_error::Code::NotFound`] error -- callers
    /// that need a hard failure on a missing key should map that
    /// themselves.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error>;

    /// Uploads `data` under `key`, overwriting any existing object.
    async fn put(&self, key: &str, data: Bytes) -> Result<(), Error>;

    /// Deletes `key`. Deleting a key that doesn't exist is not an error
    /// (mirrors `S3client.go`'s `DeleteFile`).
    async fn delete(&self, key: &str) -> Result<(), Error>;

    /// Cheaper existence check than `get`, used by the lock protocol.
    async fn exists(&self, key: &str) -> Result<bool, Error>;
}
