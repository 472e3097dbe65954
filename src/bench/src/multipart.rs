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

//! The multipart workload: workers upload parts of one large object
//! concurrently; once they drain, the upload is assembled and recorded
//! as a `COMPLETE` operation.

use crate::client::PartInfo;
use crate::collector::Collector;
use crate::workload::{OpRecorder, Workload, WorkloadConfig, wait_release};
use gale_record::{Error, Operations, Result, op};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// The S3 multipart part-number ceiling.
const MAX_PARTS: u32 = 10_000;

/// Uploads parts of a single object from every worker.
pub struct Multipart {
    cfg: WorkloadConfig,
    key: String,
    upload_id: Option<String>,
    parts: Arc<Mutex<Vec<PartInfo>>>,
    next_part: Arc<AtomicU32>,
}

impl Multipart {
    pub fn new<S: Into<String>>(cfg: WorkloadConfig, key: S) -> Result<Self> {
        cfg.validate()?;
        let key = key.into();
        if key.is_empty() {
            return Err(Error::config("an object key is required"));
        }
        Ok(Self {
            cfg,
            key,
            upload_id: None,
            parts: Arc::default(),
            next_part: Arc::new(AtomicU32::new(1)),
        })
    }
}

#[async_trait::async_trait]
impl Workload for Multipart {
    fn name(&self) -> &'static str {
        "multipart"
    }

    async fn prepare(&mut self, _ctx: &CancellationToken) -> Result<()> {
        let (client, _) = self.cfg.clients.acquire();
        if !client
            .bucket_exists(&self.cfg.bucket)
            .await
            .map_err(Error::other)?
        {
            client
                .bucket_create(&self.cfg.bucket)
                .await
                .map_err(Error::other)?;
        }
        let id = client
            .new_multipart_upload(&self.cfg.bucket, &self.key)
            .await
            .map_err(Error::other)?;
        self.upload_id = Some(id);
        Ok(())
    }

    async fn start(
        &mut self,
        ctx: &CancellationToken,
        release: watch::Receiver<bool>,
    ) -> Result<Operations> {
        let upload_id = self
            .upload_id
            .clone()
            .ok_or_else(|| Error::other("start called before prepare"))?;
        let collector = Collector::new();
        for output in &self.cfg.outputs {
            collector.add_output(output.clone());
        }
        let mut workers = Vec::new();
        for thread in 0..self.cfg.concurrency {
            let cfg = self.cfg.clone();
            let run = ctx.clone();
            let mut release = release.clone();
            let tx = collector.sender();
            let key = self.key.clone();
            let upload_id = upload_id.clone();
            let parts = Arc::clone(&self.parts);
            let next_part = Arc::clone(&self.next_part);
            let mut source = (cfg.source_factory)(thread);
            workers.push(tokio::spawn(async move {
                wait_release(&mut release).await;
                loop {
                    if run.is_cancelled() {
                        return;
                    }
                    if cfg.rate_limiter.acquire(&run).await.is_err() {
                        return;
                    }
                    let number = next_part.fetch_add(1, Ordering::Relaxed);
                    if number > MAX_PARTS {
                        tracing::warn!("part number ceiling reached, worker {thread} stops");
                        return;
                    }
                    let (client, endpoint) = cfg.clients.acquire();
                    let payload = source.object();
                    let want = payload.size;
                    let rec = OpRecorder::start(
                        op::UPLOAD,
                        &cfg.client_id,
                        &endpoint,
                        thread,
                        format!("{key}[{number}]"),
                    );
                    let record = match client
                        .put_part(&cfg.bucket, &key, &upload_id, number, payload.data, want)
                        .await
                    {
                        Ok(info) if info.size != want => rec.finish_err(format!(
                            "short transfer: server reports {} bytes, want {want}",
                            info.size
                        )),
                        Ok(info) => {
                            parts
                                .lock()
                                .expect("multipart parts lock is poisoned")
                                .push(info.clone());
                            rec.finish_ok(info.size, 1)
                        }
                        Err(e) => {
                            tracing::error!("part {number} of {key:?} failed: {e}");
                            rec.finish_err(e)
                        }
                    };
                    if tx.send(record).await.is_err() {
                        return;
                    }
                }
            }));
        }
        for worker in workers {
            worker
                .await
                .map_err(|e| Error::other(format!("part upload worker panicked: {e}")))?;
        }

        // Assembling the parts is measured work: one COMPLETE record,
        // emitted after the workers have drained.
        let mut parts = std::mem::take(
            &mut *self.parts.lock().expect("multipart parts lock is poisoned"),
        );
        if !parts.is_empty() {
            parts.sort_by_key(|p| p.number);
            let (client, endpoint) = self.cfg.clients.acquire();
            let rec = OpRecorder::start(
                op::COMPLETE,
                &self.cfg.client_id,
                &endpoint,
                0,
                self.key.clone(),
            );
            let record = match client
                .complete_multipart_upload(&self.cfg.bucket, &self.key, &upload_id, parts)
                .await
            {
                Ok(_) => {
                    self.upload_id = None;
                    rec.finish_ok(0, 1)
                }
                Err(e) => {
                    tracing::error!("completing upload {upload_id:?} failed: {e}");
                    rec.finish_err(e)
                }
            };
            let _ = collector.sender().send(record).await;
        }
        Ok(collector.close().await)
    }

    async fn cleanup(&mut self) {
        // Only uploads that were never assembled are left to abort.
        let Some(upload_id) = self.upload_id.take() else {
            return;
        };
        let (client, _) = self.cfg.clients.acquire();
        if let Err(e) = client
            .abort_multipart_upload(&self.cfg.bucket, &self.key, &upload_id)
            .await
        {
            tracing::warn!("cleanup: aborting upload {upload_id:?} failed: {e}");
        }
    }
}
