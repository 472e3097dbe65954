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

//! The workload driver contract and shared worker plumbing.
//!
//! A driver prepares server state, releases a set of concurrent workers
//! that emit operation records until the run context is cancelled, and
//! cleans up afterwards. Cancellation is cooperative: workers poll the run
//! token between operations, and an in-flight storage call is never raced
//! against it, so cancellation cannot manufacture failure records.

use crate::client::ClientPool;
use crate::object_pool::{ObjectPool, PoolObject};
use crate::rate::{RateLimiter, Unlimited};
use crate::source::{SourceFactory, default_factory};
use gale_record::{Categories, Error, Operation, Operations, Result};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Configuration shared by every workload driver.
#[derive(Clone)]
pub struct WorkloadConfig {
    /// The bucket all operations target.
    pub bucket: String,
    /// Identifies this benchmark client in emitted records.
    pub client_id: String,
    /// The number of concurrent workers.
    pub concurrency: u16,
    /// The store clients, one per endpoint.
    pub clients: Arc<ClientPool>,
    /// The global request rate limiter.
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Hands each worker its own payload source.
    pub source_factory: SourceFactory,
    /// Extra sinks receiving every record as it is collected.
    pub outputs: Vec<mpsc::Sender<Operation>>,
}

impl WorkloadConfig {
    pub fn new<S: Into<String>>(bucket: S, clients: Arc<ClientPool>) -> Self {
        Self {
            bucket: bucket.into(),
            client_id: "gale".to_string(),
            concurrency: 16,
            clients,
            rate_limiter: Arc::new(Unlimited),
            source_factory: default_factory(),
            outputs: Vec::new(),
        }
    }

    pub fn with_client_id<S: Into<String>>(mut self, v: S) -> Self {
        self.client_id = v.into();
        self
    }

    pub fn with_concurrency(mut self, v: u16) -> Self {
        self.concurrency = v;
        self
    }

    pub fn with_rate_limiter(mut self, v: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = v;
        self
    }

    pub fn with_source_factory(mut self, v: SourceFactory) -> Self {
        self.source_factory = v;
        self
    }

    /// Adds a fan-out sink for collected records.
    pub fn with_output(mut self, v: mpsc::Sender<Operation>) -> Self {
        self.outputs.push(v);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(Error::config("a bucket name is required"));
        }
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be at least 1"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkloadConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadConfig")
            .field("bucket", &self.bucket)
            .field("client_id", &self.client_id)
            .field("concurrency", &self.concurrency)
            .field("endpoints", &self.clients.endpoints())
            .finish()
    }
}

/// A benchmark workload.
#[async_trait::async_trait]
pub trait Workload: Send {
    /// The workload's display name.
    fn name(&self) -> &'static str;

    /// Creates buckets, seeds objects, and fills shared pools.
    ///
    /// May take arbitrarily long; honours `ctx` cancellation.
    async fn prepare(&mut self, ctx: &CancellationToken) -> Result<()>;

    /// Releases the workers and runs until `ctx` is cancelled.
    ///
    /// Workers block on `release` before their first operation so that a
    /// coordinator can line up several clients. Returns the accumulated
    /// log.
    async fn start(
        &mut self,
        ctx: &CancellationToken,
        release: watch::Receiver<bool>,
    ) -> Result<Operations>;

    /// Best-effort removal of created state. Failures are logged.
    async fn cleanup(&mut self);
}

/// Runs a workload end to end, releasing the workers immediately.
///
/// Coordinators that line up several benchmark clients call the trait
/// methods themselves and flip the release gate once every client reports
/// ready.
pub async fn run(workload: &mut dyn Workload, ctx: &CancellationToken) -> Result<Operations> {
    workload.prepare(ctx).await?;
    let (release_tx, release_rx) = watch::channel(false);
    release_tx.send_replace(true);
    let result = workload.start(ctx, release_rx).await;
    workload.cleanup().await;
    result
}

/// Blocks until the release gate opens.
pub(crate) async fn wait_release(release: &mut watch::Receiver<bool>) {
    // An error means the sender is gone; treat that as released.
    let _ = release.wait_for(|open| *open).await;
}

/// Stamps and assembles one operation record.
///
/// Created immediately before the storage call, finished immediately
/// after; the conversion to [Operation] applies the end stamp.
#[derive(Debug)]
pub(crate) struct OpRecorder {
    op_type: &'static str,
    client_id: String,
    endpoint: String,
    thread: u16,
    file: String,
    start: OffsetDateTime,
    first_byte: Option<OffsetDateTime>,
}

impl OpRecorder {
    pub(crate) fn start(
        op_type: &'static str,
        client_id: &str,
        endpoint: &str,
        thread: u16,
        file: String,
    ) -> Self {
        Self {
            op_type,
            client_id: client_id.to_string(),
            endpoint: endpoint.to_string(),
            thread,
            file,
            start: OffsetDateTime::now_utc(),
            first_byte: None,
        }
    }

    /// Stamps the first-byte time, once.
    pub(crate) fn first_byte(&mut self) {
        if self.first_byte.is_none() {
            self.first_byte = Some(OffsetDateTime::now_utc());
        }
    }

    pub(crate) fn finish_ok(self, size_bytes: i64, object_count: u32) -> Operation {
        self.finish(size_bytes, object_count, String::new())
    }

    pub(crate) fn finish_err<E: std::fmt::Display>(self, err: E) -> Operation {
        self.finish(0, 0, err.to_string())
    }

    fn finish(self, size_bytes: i64, object_count: u32, err: String) -> Operation {
        Operation {
            op_type: self.op_type.to_string(),
            client_id: self.client_id,
            endpoint: self.endpoint,
            thread: self.thread,
            object_count,
            size_bytes,
            file: self.file,
            start: self.start,
            first_byte: self.first_byte,
            end: OffsetDateTime::now_utc(),
            err,
            categories: Categories::empty(),
        }
    }
}

/// Uploads `count` seed objects concurrently and registers them with `pool`.
///
/// The first upload failure is captured and returned after every uploader
/// has stopped.
pub(crate) async fn seed_objects(
    cfg: &WorkloadConfig,
    ctx: &CancellationToken,
    count: u32,
    prefix: &str,
    pool: &Arc<ObjectPool>,
) -> Result<()> {
    let next = Arc::new(AtomicU32::new(0));
    let group_err: Arc<Mutex<Option<Error>>> = Arc::default();
    let mut handles = Vec::new();
    for thread in 0..cfg.concurrency {
        let cfg = cfg.clone();
        let ctx = ctx.clone();
        let next = Arc::clone(&next);
        let group_err = Arc::clone(&group_err);
        let pool = Arc::clone(pool);
        let prefix = prefix.to_string();
        let mut source = (cfg.source_factory)(thread);
        handles.push(tokio::spawn(async move {
            loop {
                if ctx.is_cancelled() || next.fetch_add(1, Ordering::Relaxed) >= count {
                    return;
                }
                let (client, _) = cfg.clients.acquire();
                let mut payload = source.object();
                if !prefix.is_empty() {
                    payload.prefix = prefix.clone();
                }
                let key = payload.path();
                let opts = crate::client::PutOpts {
                    content_type: payload.content_type.clone(),
                };
                match client
                    .put(&cfg.bucket, &key, payload.data, payload.size, opts)
                    .await
                {
                    Ok(info) => pool.insert(PoolObject {
                        key,
                        size: info.size,
                        version_id: info.version_id,
                    }),
                    Err(e) => {
                        let mut slot = group_err.lock().expect("group error lock is poisoned");
                        slot.get_or_insert_with(|| {
                            Error::other(format!("seeding object {key} failed: {e}"))
                        });
                        return;
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| Error::other(format!("seed task panicked: {e}")))?;
    }
    if let Some(err) = group_err.lock().expect("group error lock is poisoned").take() {
        return Err(err);
    }
    if ctx.is_cancelled() {
        return Err(Error::other("cancelled while seeding objects"));
    }
    Ok(())
}

/// Deletes every object under `prefix`, logging failures.
pub(crate) async fn remove_prefix(cfg: &WorkloadConfig, prefix: &str) {
    use futures::StreamExt;
    let (client, _) = cfg.clients.acquire();
    let mut stream = match client.list(&cfg.bucket, prefix, true).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("cleanup: listing {prefix:?} failed: {e}");
            return;
        }
    };
    let mut keys = Vec::new();
    while let Some(entry) = stream.next().await {
        match entry {
            Ok(info) => keys.push(info.key),
            Err(e) => {
                tracing::warn!("cleanup: listing {prefix:?} failed: {e}");
                break;
            }
        }
    }
    for (key, e) in client.remove_many(&cfg.bucket, keys).await {
        tracing::warn!("cleanup: removing {key:?} failed: {e}");
    }
}
