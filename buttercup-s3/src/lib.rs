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

//! A thin object-store adapter over `aws-sdk-s3`, named out of §1's
//! non-goal list (building another S3 client) but required to let the
//! encrypted-S3 provider and the remote index backend talk to a bucket.
//! Mirrors `fileprovider/s3client/S3client.go`: every key is joined under a
//! configured `base_path` prefix, and a missing key is never an error on
//! its own.

use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use buttercup_config::S3ProviderConfig;
use buttercup_error::{make_err, Code, Error};
use buttercup_util::BlobBackend;
use bytes::Bytes;

/// A bucket plus a fixed key prefix, built once from a folder's
/// [`S3ProviderConfig`] and reused for the lifetime of a sync run.
pub struct S3Client {
    client: Client,
    bucket: String,
    base_path: String,
}

impl S3Client {
    /// Builds the underlying `aws-sdk-s3` client from static credentials
    /// and a region/endpoint pair, same shape as `getClient` in the
    /// original -- no ambient AWS profile/instance-role resolution, since
    /// folder configs always carry their own credentials (§6).
    pub async fn new(config: &S3ProviderConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "buttercup-config",
        );
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .endpoint_url(&config.endpoint)
            .force_path_style(config.force_path_style)
            .build();

        S3Client {
            client: Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            base_path: config.base_path.clone(),
        }
    }

    fn full_key(&self, path: &str) -> String {
        if self.base_path.is_empty() {
            return path.to_string();
        }
        format!("{}/{}", self.base_path.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// Uploads `content` to `path`, overwriting any existing object.
    pub async fn upload_file(&self, path: &str, content: Bytes) -> Result<(), Error> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(path))
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| make_err!(Code::BackendError, "upload to s3 failed: {e}"))?;
        Ok(())
    }

    /// Downloads `path`'s full contents.
    pub async fn download_file(&self, path: &str) -> Result<Bytes, Error> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(path))
            .send()
            .await
            .map_err(|e| make_err!(Code::BackendError, "download from s3 failed: {e}"))?;
        let body = result
            .body
            .collect()
            .await
            .map_err(|e| make_err!(Code::BackendError, "could not read s3 response body: {e}"))?;
        Ok(body.into_bytes())
    }

    /// Deletes `path`. A missing key is not an error (mirrors
    /// `DeleteFile`'s comment: S3 doesn't error on deleting what's absent).
    pub async fn delete_file(&self, path: &str) -> Result<(), Error> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(path))
            .send()
            .await
            .map_err(|e| make_err!(Code::BackendError, "delete from s3 failed: {e}"))?;
        Ok(())
    }

    /// Deletes every object whose key starts with `prefix` (joined under
    /// `base_path`). Not used by the synchronizer directly, kept as a
    /// utility for clearing a bucket between test runs, mirroring
    /// `DeleteFolder`.
    pub async fn delete_folder(&self, prefix: &str) -> Result<(), Error> {
        let listing = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.full_key(prefix))
            .send()
            .await
            .map_err(|e| make_err!(Code::BackendError, "could not list items in folder: {e}"))?;

        let object_ids: Vec<_> = listing
            .contents()
            .iter()
            .filter_map(|o| o.key())
            .map(|key| {
                aws_sdk_s3::types::ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .expect("key is always set above")
            })
            .collect();

        if object_ids.is_empty() {
            return Ok(());
        }

        let delete = aws_sdk_s3::types::Delete::builder()
            .set_objects(Some(object_ids))
            .build()
            .map_err(|e| make_err!(Code::BackendError, "could not build delete request: {e}"))?;

        self.client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| make_err!(Code::BackendError, "could not delete folder: {e}"))?;
        Ok(())
    }

    /// Cheap existence check via `HeadObject`, mirroring `HasFile`.
    pub async fn has_file(&self, path: &str) -> Result<bool, Error> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(path))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    Ok(false)
                } else {
                    Err(make_err!(Code::BackendError, "could not head item: {e}"))
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl BlobBackend for S3Client {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        if !self.has_file(key).await? {
            return Ok(None);
        }
        self.download_file(key).await.map(Some)
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<(), Error> {
        self.upload_file(key, data).await
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.delete_file(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, Error> {
        self.has_file(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq; // Must be declared in every module.

    fn config() -> S3ProviderConfig {
        S3ProviderConfig {
            access_key: "test".to_string(),
            secret_key: "test".to_string(),
            bucket: "my-bucket".to_string(),
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            base_path: "Buttercup-files".to_string(),
            force_path_style: true,
            passphrase: "pw".to_string(),
        }
    }

    #[tokio::test]
    async fn full_key_joins_under_base_path() {
        let client = S3Client::new(&config()).await;
        assert_eq!(client.full_key("foo/bar.txt"), "Buttercup-files/foo/bar.txt");
    }

    #[tokio::test]
    async fn full_key_with_no_base_path_is_unprefixed() {
        let mut cfg = config();
        cfg.base_path = String::new();
        let client = S3Client::new(&cfg).await;
        assert_eq!(client.full_key("foo.txt"), "foo.txt");
    }
}
