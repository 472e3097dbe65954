// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Store and catalog client capabilities.
//!
//! The drivers are generic over these traits; the concrete clients (an
//! S3-compatible HTTP client, an Iceberg REST catalog client) live outside
//! this crate and are injected through a [ClientPool].

use crate::source::ChunkStream;
use gale_record::{Error, Result};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The error returned by store and catalog clients.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct StoreError {
    /// The classified status of the failure.
    pub code: StatusCode,
    /// The server or transport message.
    pub message: String,
}

impl StoreError {
    pub fn new<S: Into<String>>(code: StatusCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::Conflict, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::Transport, message)
    }

    /// Whether a retry with back-off may succeed.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

/// Classified failure codes.
///
/// The mapping from wire-level errors (HTTP status, catalog error payloads)
/// to these codes is the client's responsibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    /// The request conflicted with concurrent state changes.
    Conflict,
    NotFound,
    /// The request was rejected for throttling.
    TooManyRequests,
    /// A server-side 5xx failure.
    Internal,
    ServiceUnavailable,
    /// The request never reached the server, or the connection broke.
    Transport,
    InvalidRequest,
    Other,
}

impl StatusCode {
    /// The short allowlist of codes that justify automatic back-off retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StatusCode::Conflict
                | StatusCode::TooManyRequests
                | StatusCode::Internal
                | StatusCode::ServiceUnavailable
                | StatusCode::Transport
        )
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StatusCode::Conflict => "conflict",
            StatusCode::NotFound => "not found",
            StatusCode::TooManyRequests => "too many requests",
            StatusCode::Internal => "internal server error",
            StatusCode::ServiceUnavailable => "service unavailable",
            StatusCode::Transport => "transport error",
            StatusCode::InvalidRequest => "invalid request",
            StatusCode::Other => "error",
        };
        write!(f, "{name}")
    }
}

/// The result type for store and catalog calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Metadata for a stored object.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: i64,
    pub version_id: Option<String>,
}

/// The result of an upload.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadInfo {
    pub key: String,
    pub size: i64,
    pub version_id: Option<String>,
}

/// One completed part of a multipart upload.
#[derive(Clone, Debug, PartialEq)]
pub struct PartInfo {
    pub number: u32,
    pub etag: String,
    pub size: i64,
}

/// Options for uploads.
#[derive(Clone, Debug, Default)]
pub struct PutOpts {
    pub content_type: String,
}

/// A stream of payload bytes from the server.
pub type ByteStream = Pin<Box<dyn futures::Stream<Item = StoreResult<bytes::Bytes>> + Send>>;

/// A stream of listed objects.
pub type ObjectInfoStream = Pin<Box<dyn futures::Stream<Item = StoreResult<ObjectInfo>> + Send>>;

/// The storage operations the workload drivers need.
#[async_trait::async_trait]
pub trait StoreClient: Send + Sync {
    async fn bucket_create(&self, bucket: &str) -> StoreResult<()>;
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool>;
    async fn set_versioning(&self, bucket: &str, enabled: bool) -> StoreResult<()>;

    /// Uploads `size` bytes read from `data`.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: ChunkStream,
        size: i64,
        opts: PutOpts,
    ) -> StoreResult<UploadInfo>;

    /// Opens an object for reading. The returned stream yields the payload
    /// in chunks; the first yielded chunk marks the time to first byte.
    async fn get(&self, bucket: &str, key: &str, version_id: Option<&str>)
    -> StoreResult<ByteStream>;

    async fn stat(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StoreResult<ObjectInfo>;

    async fn remove(&self, bucket: &str, key: &str, version_id: Option<&str>) -> StoreResult<()>;

    /// Removes a batch of objects, returning the per-key failures.
    async fn remove_many(&self, bucket: &str, keys: Vec<String>) -> Vec<(String, StoreError)>;

    async fn list(&self, bucket: &str, prefix: &str, recursive: bool)
    -> StoreResult<ObjectInfoStream>;

    async fn new_multipart_upload(&self, bucket: &str, key: &str) -> StoreResult<String>;

    async fn put_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        number: u32,
        data: ChunkStream,
        size: i64,
    ) -> StoreResult<PartInfo>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<PartInfo>,
    ) -> StoreResult<UploadInfo>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StoreResult<()>;

    /// Uploads the same payload under every key in one server-side call.
    async fn fanout_put(
        &self,
        bucket: &str,
        keys: Vec<String>,
        data: bytes::Bytes,
        opts: PutOpts,
    ) -> StoreResult<Vec<UploadInfo>>;
}

/// The catalog operations the commit driver needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    async fn create_table(&self, table: &str) -> StoreResult<()>;

    /// Commits a batch of data files to the table metadata.
    async fn commit_table(&self, table: &str, files: Vec<String>) -> StoreResult<()>;

    async fn drop_table(&self, table: &str) -> StoreResult<()>;
}

/// A pool of store clients, one per endpoint.
///
/// Workers acquire a client per operation; acquisitions round-robin across
/// the endpoints and are safe to make concurrently.
pub struct ClientPool {
    endpoints: Vec<(String, Arc<dyn StoreClient>)>,
    cursor: AtomicUsize,
}

impl ClientPool {
    /// Creates a pool over the given `(endpoint, client)` pairs.
    pub fn new(endpoints: Vec<(String, Arc<dyn StoreClient>)>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::config("at least one endpoint is required"));
        }
        Ok(Self {
            endpoints,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Creates a pool with a single endpoint.
    pub fn single<S: Into<String>>(endpoint: S, client: Arc<dyn StoreClient>) -> Self {
        Self {
            endpoints: vec![(endpoint.into(), client)],
            cursor: AtomicUsize::new(0),
        }
    }

    /// Acquires the next client and its endpoint.
    pub fn acquire(&self) -> (Arc<dyn StoreClient>, String) {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        let (endpoint, client) = &self.endpoints[i];
        (Arc::clone(client), endpoint.clone())
    }

    /// The endpoints served by this pool.
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.iter().map(|(e, _)| e.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("endpoints", &self.endpoints())
            .finish()
    }
}
