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

//! Test helpers: an in-memory store client and record factories.

use crate::client::{
    ByteStream, ObjectInfo, ObjectInfoStream, PartInfo, PutOpts, StoreClient, StoreError,
    StoreResult, UploadInfo,
};
use crate::source::ChunkStream;
use bytes::Bytes;
use futures::StreamExt;
use gale_record::{Categories, Operation};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use time::macros::datetime;

pub(crate) fn sample_op(op_type: &str, thread: u16) -> Operation {
    let start = datetime!(2025-06-01 10:00:00 UTC) + time::Duration::milliseconds(i64::from(thread) * 10);
    Operation {
        op_type: op_type.to_string(),
        client_id: "test-client".to_string(),
        endpoint: "mem://a".to_string(),
        thread,
        object_count: 1,
        size_bytes: 1000,
        file: format!("obj-{thread}"),
        start,
        first_byte: None,
        end: start + time::Duration::milliseconds(5),
        err: String::new(),
        categories: Categories::empty(),
    }
}

#[derive(Debug, Default)]
struct MultipartState {
    bucket: String,
    key: String,
    parts: HashMap<u32, Bytes>,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashSet<String>,
    objects: HashMap<(String, String), Bytes>,
    multiparts: HashMap<String, MultipartState>,
    versioning: bool,
    uploads: u64,
    put_error: Option<StoreError>,
    truncate_put: Option<usize>,
}

/// A store client backed by process memory.
#[derive(Debug, Default)]
pub(crate) struct InMemoryStore {
    state: Mutex<State>,
}

async fn drain(mut data: ChunkStream) -> Bytes {
    let mut buf = Vec::new();
    while let Some(chunk) = data.next().await {
        buf.extend_from_slice(&chunk);
    }
    Bytes::from(buf)
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("in-memory store lock is poisoned")
    }

    pub fn bucket_create_now(&self, bucket: &str) {
        self.lock().buckets.insert(bucket.to_string());
    }

    pub fn object_count(&self, bucket: &str) -> usize {
        self.lock()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .count()
    }

    pub fn object_size(&self, bucket: &str, key: &str) -> Option<i64> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|b| b.len() as i64)
    }

    /// The next `put` fails with `err`.
    pub fn inject_put_error(&self, err: StoreError) {
        self.lock().put_error = Some(err);
    }

    /// The next `put` stores only the first `n` bytes, simulating a short
    /// transfer observed by the server.
    pub fn truncate_next_put(&self, n: usize) {
        self.lock().truncate_put = Some(n);
    }
}

#[async_trait::async_trait]
impl StoreClient for InMemoryStore {
    async fn bucket_create(&self, bucket: &str) -> StoreResult<()> {
        self.lock().buckets.insert(bucket.to_string());
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        Ok(self.lock().buckets.contains(bucket))
    }

    async fn set_versioning(&self, _bucket: &str, enabled: bool) -> StoreResult<()> {
        self.lock().versioning = enabled;
        Ok(())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: ChunkStream,
        _size: i64,
        _opts: PutOpts,
    ) -> StoreResult<UploadInfo> {
        let mut body = drain(data).await;
        let mut state = self.lock();
        if let Some(err) = state.put_error.take() {
            return Err(err);
        }
        if !state.buckets.contains(bucket) {
            return Err(StoreError::not_found(format!("no such bucket {bucket:?}")));
        }
        if let Some(n) = state.truncate_put.take() {
            body = body.slice(0..n.min(body.len()));
        }
        state.uploads += 1;
        let version_id = state.versioning.then(|| format!("v{}", state.uploads));
        let size = body.len() as i64;
        state
            .objects
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(UploadInfo {
            key: key.to_string(),
            size,
            version_id,
        })
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
        _version_id: Option<&str>,
    ) -> StoreResult<ByteStream> {
        let body = self
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("no such object {key:?}")))?;
        let chunks: Vec<StoreResult<Bytes>> = (0..body.len().max(1))
            .step_by(8 * 1024)
            .map(|off| Ok(body.slice(off.min(body.len())..(off + 8 * 1024).min(body.len()))))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn stat(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StoreResult<ObjectInfo> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|b| ObjectInfo {
                key: key.to_string(),
                size: b.len() as i64,
                version_id: version_id.map(String::from),
            })
            .ok_or_else(|| StoreError::not_found(format!("no such object {key:?}")))
    }

    async fn remove(&self, bucket: &str, key: &str, _version_id: Option<&str>) -> StoreResult<()> {
        self.lock()
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    async fn remove_many(&self, bucket: &str, keys: Vec<String>) -> Vec<(String, StoreError)> {
        let mut state = self.lock();
        let mut failures = Vec::new();
        for key in keys {
            if state
                .objects
                .remove(&(bucket.to_string(), key.clone()))
                .is_none()
            {
                failures.push((key, StoreError::not_found("no such object")));
            }
        }
        failures
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        _recursive: bool,
    ) -> StoreResult<ObjectInfoStream> {
        let mut entries: Vec<ObjectInfo> = self
            .lock()
            .objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), body)| ObjectInfo {
                key: k.clone(),
                size: body.len() as i64,
                version_id: None,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(Box::pin(futures::stream::iter(entries.into_iter().map(Ok))))
    }

    async fn new_multipart_upload(&self, bucket: &str, key: &str) -> StoreResult<String> {
        let mut state = self.lock();
        state.uploads += 1;
        let id = format!("mp-{}", state.uploads);
        state.multiparts.insert(
            id.clone(),
            MultipartState {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: HashMap::new(),
            },
        );
        Ok(id)
    }

    async fn put_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        number: u32,
        data: ChunkStream,
        _size: i64,
    ) -> StoreResult<PartInfo> {
        let body = drain(data).await;
        let size = body.len() as i64;
        let mut state = self.lock();
        let upload = state
            .multiparts
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::not_found(format!("no such upload {upload_id:?}")))?;
        upload.parts.insert(number, body);
        Ok(PartInfo {
            number,
            etag: format!("etag-{number}-{size}"),
            size,
        })
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        mut parts: Vec<PartInfo>,
    ) -> StoreResult<UploadInfo> {
        let mut state = self.lock();
        let upload = state
            .multiparts
            .remove(upload_id)
            .ok_or_else(|| StoreError::not_found(format!("no such upload {upload_id:?}")))?;
        parts.sort_by_key(|p| p.number);
        let mut body = Vec::new();
        for part in &parts {
            let chunk = upload
                .parts
                .get(&part.number)
                .ok_or_else(|| StoreError::new(
                    crate::client::StatusCode::InvalidRequest,
                    format!("part {} was never uploaded", part.number),
                ))?;
            body.extend_from_slice(chunk);
        }
        let size = body.len() as i64;
        state
            .objects
            .insert((upload.bucket, upload.key.clone()), Bytes::from(body));
        Ok(UploadInfo {
            key: upload.key,
            size,
            version_id: None,
        })
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> StoreResult<()> {
        self.lock().multiparts.remove(upload_id);
        Ok(())
    }

    async fn fanout_put(
        &self,
        bucket: &str,
        keys: Vec<String>,
        data: Bytes,
        _opts: PutOpts,
    ) -> StoreResult<Vec<UploadInfo>> {
        let mut state = self.lock();
        if !state.buckets.contains(bucket) {
            return Err(StoreError::not_found(format!("no such bucket {bucket:?}")));
        }
        let size = data.len() as i64;
        Ok(keys
            .into_iter()
            .map(|key| {
                state
                    .objects
                    .insert((bucket.to_string(), key.clone()), data.clone());
                UploadInfo {
                    key,
                    size,
                    version_id: None,
                }
            })
            .collect())
    }
}
