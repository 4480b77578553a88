/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http::{HeaderMap, HeaderValue};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, Attributes, ClientOptions, ObjectStore, PutMultipartOpts, PutOptions, PutPayload,
    WriteMultipart,
};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use super::input::load_secret;
use super::types::Cli;

const PART_SIZE: usize = 8 * 1024 * 1024;
const MAX_CONCURRENT_PARTS: usize = 4;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Canned ACL applied to every written object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acl {
    Private,
    PublicRead,
}

impl Acl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
        }
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {0} could not be found")]
    NotFound(String),
    #[error("invalid object key {0}")]
    InvalidKey(String),
    #[error("object store error: {0}")]
    Backend(#[from] object_store::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait BlobStore: Send + Sync + fmt::Debug {
    async fn upload(
        &self,
        key: &str,
        body: Bytes,
        acl: Acl,
        content_type: &str,
    ) -> Result<(), StorageError>;

    async fn download(&self, key: &str) -> Result<Bytes, StorageError>;

    async fn copy(&self, from: &str, to: &str, acl: Acl) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Deletes every object below `prefix/`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError>;

    async fn upload_file(
        &self,
        key: &str,
        path: &Path,
        acl: Acl,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let body = tokio::fs::read(path).await?;
        self.upload(key, Bytes::from(body), acl, content_type).await
    }

    async fn download_to(&self, key: &str, path: &Path) -> Result<u64, StorageError> {
        let body = self.download(key).await?;
        tokio::fs::write(path, &body).await?;
        Ok(body.len() as u64)
    }
}

/// S3 backed store. Two clients share the bucket and differ only in the
/// `x-amz-acl` header they send.
#[derive(Debug)]
pub struct S3BlobStore {
    private: AmazonS3,
    public_read: AmazonS3,
}

impl S3BlobStore {
    pub fn new(cli: &Cli) -> Result<Self, StorageError> {
        Ok(Self {
            private: build_s3(cli, Acl::Private)?,
            public_read: build_s3(cli, Acl::PublicRead)?,
        })
    }

    fn client(&self, acl: Acl) -> &AmazonS3 {
        match acl {
            Acl::Private => &self.private,
            Acl::PublicRead => &self.public_read,
        }
    }
}

fn build_s3(cli: &Cli, acl: Acl) -> Result<AmazonS3, StorageError> {
    let mut headers = HeaderMap::new();
    headers.insert("x-amz-acl", HeaderValue::from_static(acl.as_str()));

    let mut builder = AmazonS3Builder::from_env()
        .with_bucket_name(&cli.s3_bucket)
        .with_region(&cli.s3_region)
        .with_client_options(
            ClientOptions::default()
                .with_timeout(REQUEST_TIMEOUT)
                .with_default_headers(headers),
        );

    if let Some(endpoint) = &cli.s3_endpoint {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"))
            .with_virtual_hosted_style_request(false);
    }

    if let Some(access_key_id) = &cli.s3_access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }

    if let Some(file) = &cli.s3_secret_access_key_file {
        builder = builder.with_secret_access_key(load_secret(file));
    }

    Ok(builder.build()?)
}

fn object_path(key: &str) -> Result<ObjectPath, StorageError> {
    ObjectPath::parse(key).map_err(|_| StorageError::InvalidKey(key.to_string()))
}

fn content_type_attributes(content_type: &str) -> Attributes {
    let mut attributes = Attributes::new();
    if !content_type.is_empty() {
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
    }
    attributes
}

fn map_not_found(key: &str, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
        e => StorageError::Backend(e),
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(
        &self,
        key: &str,
        body: Bytes,
        acl: Acl,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let options = PutOptions {
            attributes: content_type_attributes(content_type),
            ..Default::default()
        };

        self.client(acl)
            .put_opts(&object_path(key)?, PutPayload::from(body), options)
            .await?;

        debug!(key, %acl, "Uploaded object");
        Ok(())
    }

    async fn upload_file(
        &self,
        key: &str,
        path: &Path,
        acl: Acl,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let options = PutMultipartOpts {
            attributes: content_type_attributes(content_type),
            ..Default::default()
        };

        let upload = self
            .client(acl)
            .put_multipart_opts(&object_path(key)?, options)
            .await?;

        let mut writer = WriteMultipart::new_with_chunk_size(upload, PART_SIZE);
        let mut file = tokio::fs::File::open(path).await?;
        let mut buf = vec![0u8; PART_SIZE];

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            writer.wait_for_capacity(MAX_CONCURRENT_PARTS).await?;
            writer.write(&buf[..n]);
        }

        writer.finish().await?;
        debug!(key, %acl, "Uploaded file");
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        let result = self
            .private
            .get(&object_path(key)?)
            .await
            .map_err(|e| map_not_found(key, e))?;

        Ok(result.bytes().await?)
    }

    async fn download_to(&self, key: &str, path: &Path) -> Result<u64, StorageError> {
        let result = self
            .private
            .get(&object_path(key)?)
            .await
            .map_err(|e| map_not_found(key, e))?;

        let mut stream = result.into_stream();
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        Ok(written)
    }

    async fn copy(&self, from: &str, to: &str, acl: Acl) -> Result<(), StorageError> {
        self.client(acl)
            .copy(&object_path(from)?, &object_path(to)?)
            .await
            .map_err(|e| map_not_found(from, e))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self.private.delete(&object_path(key)?).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let prefix = object_path(prefix.trim_end_matches('/'))?;
        let locations = self
            .private
            .list(Some(&prefix))
            .map_ok(|meta| meta.location)
            .boxed();

        let mut deleted = self.private.delete_stream(locations);
        let mut count = 0;

        while let Some(result) = deleted.next().await {
            result?;
            count += 1;
        }

        Ok(count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Bytes,
    pub acl: Acl,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    Upload {
        key: String,
        acl: Acl,
        content_type: String,
    },
    Download {
        key: String,
    },
    Copy {
        from: String,
        to: String,
    },
    Delete {
        key: String,
    },
    DeletePrefix {
        prefix: String,
    },
}

/// In-process store recording every call, used by tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    calls: Mutex<Vec<StorageCall>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, body: impl Into<Bytes>, acl: Acl, content_type: &str) {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                key.to_string(),
                StoredObject {
                    body: body.into(),
                    acl,
                    content_type: content_type.to_string(),
                },
            );
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, call: StorageCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        key: &str,
        body: Bytes,
        acl: Acl,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.record(StorageCall::Upload {
            key: key.to_string(),
            acl,
            content_type: content_type.to_string(),
        });
        self.insert(key, body, acl, content_type);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        self.record(StorageCall::Download {
            key: key.to_string(),
        });
        self.get(key)
            .map(|object| object.body)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn copy(&self, from: &str, to: &str, acl: Acl) -> Result<(), StorageError> {
        self.record(StorageCall::Copy {
            from: from.to_string(),
            to: to.to_string(),
        });
        let object = self
            .get(from)
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        self.insert(to, object.body, acl, &object.content_type);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.record(StorageCall::Delete {
            key: key.to_string(),
        });
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        self.record(StorageCall::DeletePrefix {
            prefix: prefix.to_string(),
        });
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let before = objects.len();
        objects.retain(|key, _| !key.starts_with(&dir));
        Ok(before - objects.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryBlobStore::new();
        store
            .upload(
                "domains/foo.com/meta.json",
                Bytes::from_static(b"{}"),
                Acl::PublicRead,
                "application/json",
            )
            .await
            .unwrap();

        let object = store.get("domains/foo.com/meta.json").unwrap();
        assert_eq!(object.acl, Acl::PublicRead);
        assert_eq!(object.content_type, "application/json");
        assert_eq!(
            store.download("domains/foo.com/meta.json").await.unwrap(),
            Bytes::from_static(b"{}")
        );
        assert!(matches!(
            store.download("missing").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_delete_prefix() {
        let store = MemoryBlobStore::new();
        store.insert("deployments/ab-1/raw-bundle.tar.gz", "a", Acl::Private, "");
        store.insert("deployments/ab-1/webroot/index.html", "b", Acl::PublicRead, "text/html");
        store.insert("deployments/ab-10/raw-bundle.tar.gz", "c", Acl::Private, "");

        let deleted = store.delete_prefix("deployments/ab-1").await.unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(store.keys(), vec!["deployments/ab-10/raw-bundle.tar.gz"]);
        assert_eq!(
            store.calls(),
            vec![StorageCall::DeletePrefix {
                prefix: "deployments/ab-1".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_memory_store_files() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("bundle.tar.gz");
        let dest = tmp.path().join("copy.tar.gz");
        tokio::fs::write(&src, b"bundle").await.unwrap();

        let store = MemoryBlobStore::new();
        store
            .upload_file("deployments/ab-1/raw-bundle.tar.gz", &src, Acl::Private, "")
            .await
            .unwrap();
        store
            .copy(
                "deployments/ab-1/raw-bundle.tar.gz",
                "deployments/cd-2/raw-bundle.tar.gz",
                Acl::Private,
            )
            .await
            .unwrap();

        let written = store
            .download_to("deployments/cd-2/raw-bundle.tar.gz", &dest)
            .await
            .unwrap();
        assert_eq!(written, 6);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"bundle");
    }

    #[test]
    fn test_acl_names() {
        assert_eq!(Acl::Private.as_str(), "private");
        assert_eq!(Acl::PublicRead.to_string(), "public-read");
    }
}
