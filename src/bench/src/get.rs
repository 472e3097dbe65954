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

//! The download workload: workers read seeded objects at random and
//! record time to first byte.

use crate::collector::Collector;
use crate::object_pool::{ObjectPool, PoolObject};
use crate::workload::{
    OpRecorder, Workload, WorkloadConfig, remove_prefix, seed_objects, wait_release,
};
use futures::StreamExt;
use gale_record::{Error, Operations, Result, op};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Reads random seeded objects.
pub struct Get {
    cfg: WorkloadConfig,
    objects: u32,
    seeded: Arc<Vec<PoolObject>>,
    prefix: String,
}

impl std::fmt::Debug for Get {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Get")
            .field("objects", &self.objects)
            .field("seeded_len", &self.seeded.len())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Get {
    /// Creates the workload; `objects` seed objects are uploaded by
    /// [prepare][Workload::prepare].
    pub fn new(cfg: WorkloadConfig, objects: u32) -> Result<Self> {
        cfg.validate()?;
        if objects == 0 {
            return Err(Error::config("at least one seed object is required"));
        }
        let prefix = format!("{}/get", cfg.client_id);
        Ok(Self {
            cfg,
            objects,
            seeded: Arc::new(Vec::new()),
            prefix,
        })
    }
}

#[async_trait::async_trait]
impl Workload for Get {
    fn name(&self) -> &'static str {
        "get"
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
        let pool = Arc::new(ObjectPool::new(0));
        seed_objects(&self.cfg, ctx, self.objects, &self.prefix, &pool).await?;
        self.seeded = Arc::new(pool.take_batch(pool.len()));
        Ok(())
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
            let seeded = Arc::clone(&self.seeded);
            let mut rng = StdRng::seed_from_u64(u64::from(thread));
            workers.push(tokio::spawn(async move {
                wait_release(&mut release).await;
                loop {
                    if run.is_cancelled() {
                        return;
                    }
                    if cfg.rate_limiter.acquire(&run).await.is_err() {
                        return;
                    }
                    let obj = &seeded[rng.random_range(0..seeded.len())];
                    let (client, endpoint) = cfg.clients.acquire();
                    let mut rec = OpRecorder::start(
                        op::GET,
                        &cfg.client_id,
                        &endpoint,
                        thread,
                        obj.key.clone(),
                    );
                    let record = match client
                        .get(&cfg.bucket, &obj.key, obj.version_id.as_deref())
                        .await
                    {
                        Err(e) => {
                            tracing::error!("get {:?} failed: {e}", obj.key);
                            rec.finish_err(e)
                        }
                        Ok(mut stream) => {
                            let mut received: i64 = 0;
                            let mut failure: Option<String> = None;
                            while let Some(chunk) = stream.next().await {
                                match chunk {
                                    Ok(bytes) => {
                                        rec.first_byte();
                                        received += bytes.len() as i64;
                                    }
                                    Err(e) => {
                                        failure = Some(e.to_string());
                                        break;
                                    }
                                }
                            }
                            if failure.is_none() && received != obj.size {
                                failure = Some(format!(
                                    "short transfer: received {received} bytes, want {}",
                                    obj.size
                                ));
                            }
                            match failure {
                                None => rec.finish_ok(received, 1),
                                Some(e) => {
                                    tracing::error!("get {:?} failed: {e}", obj.key);
                                    rec.finish_err(e)
                                }
                            }
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
                .map_err(|e| Error::other(format!("download worker panicked: {e}")))?;
        }
        Ok(collector.close().await)
    }

    async fn cleanup(&mut self) {
        remove_prefix(&self.cfg, &self.prefix).await;
    }
}
