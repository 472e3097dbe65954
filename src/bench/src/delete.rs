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

//! The delete workload: workers remove seeded objects in batches until
//! none are left.

use crate::collector::Collector;
use crate::object_pool::ObjectPool;
use crate::workload::{
    OpRecorder, Workload, WorkloadConfig, remove_prefix, seed_objects, wait_release,
};
use gale_record::{Error, Operations, Result, op};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Removes seeded objects in batches.
///
/// The run ends on its own once the pool is drained; deleted objects are
/// never returned to it.
pub struct Delete {
    cfg: WorkloadConfig,
    objects: u32,
    batch_size: u32,
    pool: Arc<ObjectPool>,
    prefix: String,
}

impl Delete {
    pub fn new(cfg: WorkloadConfig, objects: u32, batch_size: u32) -> Result<Self> {
        cfg.validate()?;
        if batch_size == 0 {
            return Err(Error::config("the delete batch size must be at least 1"));
        }
        if objects < batch_size {
            return Err(Error::config(format!(
                "need at least one batch of objects: {objects} < {batch_size}"
            )));
        }
        let prefix = format!("{}/delete", cfg.client_id);
        Ok(Self {
            cfg,
            objects,
            batch_size,
            pool: Arc::new(ObjectPool::new(0)),
            prefix,
        })
    }
}

#[async_trait::async_trait]
impl Workload for Delete {
    fn name(&self) -> &'static str {
        "delete"
    }

    async fn prepare(&mut self, ctx: &CancellationToken) -> Result<()> {
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
        seed_objects(&self.cfg, ctx, self.objects, &self.prefix, &self.pool).await
    }

    async fn start(
        &mut self,
        ctx: &CancellationToken,
        release: watch::Receiver<bool>,
    ) -> Result<Operations> {
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
            let pool = Arc::clone(&self.pool);
            let batch_size = self.batch_size as usize;
            workers.push(tokio::spawn(async move {
                wait_release(&mut release).await;
                loop {
                    if run.is_cancelled() {
                        return;
                    }
                    if cfg.rate_limiter.acquire(&run).await.is_err() {
                        return;
                    }
                    let batch = pool.take_batch(batch_size);
                    if batch.is_empty() {
                        return;
                    }
                    let (client, endpoint) = cfg.clients.acquire();
                    let keys: Vec<String> = batch.iter().map(|o| o.key.clone()).collect();
                    let rec = OpRecorder::start(
                        op::DELETE,
                        &cfg.client_id,
                        &endpoint,
                        thread,
                        keys[0].clone(),
                    );
                    let failures = client.remove_many(&cfg.bucket, keys).await;
                    let record = match failures.first() {
                        None => rec.finish_ok(0, batch.len() as u32),
                        Some((key, e)) => {
                            tracing::error!("delete {key:?} failed: {e}");
                            rec.finish_err(format!("deleting {key:?}: {e}"))
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
                .map_err(|e| Error::other(format!("delete worker panicked: {e}")))?;
        }
        Ok(collector.close().await)
    }

    async fn cleanup(&mut self) {
        // The run itself deletes the seeds; this catches leftovers after
        // cancellation.
        remove_prefix(&self.cfg, &self.prefix).await;
    }
}
