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

//! The listing workload: each worker repeatedly lists its own prefix.

use crate::collector::Collector;
use crate::object_pool::ObjectPool;
use crate::workload::{
    OpRecorder, Workload, WorkloadConfig, remove_prefix, seed_objects, wait_release,
};
use futures::StreamExt;
use gale_record::{Error, Operations, Result, op};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lists per-worker prefixes seeded with a known object count.
pub struct List {
    cfg: WorkloadConfig,
    objects_per_thread: u32,
    prefix: String,
}

impl List {
    pub fn new(cfg: WorkloadConfig, objects_per_thread: u32) -> Result<Self> {
        cfg.validate()?;
        if objects_per_thread == 0 {
            return Err(Error::config("at least one object per worker is required"));
        }
        let prefix = format!("{}/list", cfg.client_id);
        Ok(Self {
            cfg,
            objects_per_thread,
            prefix,
        })
    }

    fn thread_prefix(&self, thread: u16) -> String {
        format!("{}/{}", self.prefix, thread)
    }
}

#[async_trait::async_trait]
impl Workload for List {
    fn name(&self) -> &'static str {
        "list"
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
        for thread in 0..self.cfg.concurrency {
            if ctx.is_cancelled() {
                return Err(Error::other("cancelled while seeding listings"));
            }
            let pool = Arc::new(ObjectPool::new(0));
            seed_objects(
                &self.cfg,
                ctx,
                self.objects_per_thread,
                &self.thread_prefix(thread),
                &pool,
            )
            .await?;
        }
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
            let prefix = self.thread_prefix(thread);
            let want = u64::from(self.objects_per_thread);
            workers.push(tokio::spawn(async move {
                wait_release(&mut release).await;
                loop {
                    if run.is_cancelled() {
                        return;
                    }
                    if cfg.rate_limiter.acquire(&run).await.is_err() {
                        return;
                    }
                    let (client, endpoint) = cfg.clients.acquire();
                    let rec = OpRecorder::start(
                        op::LIST,
                        &cfg.client_id,
                        &endpoint,
                        thread,
                        prefix.clone(),
                    );
                    let record = match client.list(&cfg.bucket, &prefix, true).await {
                        Err(e) => {
                            tracing::error!("list {prefix:?} failed: {e}");
                            rec.finish_err(e)
                        }
                        Ok(mut stream) => {
                            let mut listed: u64 = 0;
                            let mut failure: Option<String> = None;
                            while let Some(entry) = stream.next().await {
                                match entry {
                                    Ok(_) => listed += 1,
                                    Err(e) => {
                                        failure = Some(e.to_string());
                                        break;
                                    }
                                }
                            }
                            if failure.is_none() && listed != want {
                                failure =
                                    Some(format!("listing returned {listed} objects, want {want}"));
                            }
                            match failure {
                                None => rec.finish_ok(0, listed as u32),
                                Some(e) => {
                                    tracing::error!("list {prefix:?} failed: {e}");
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
                .map_err(|e| Error::other(format!("list worker panicked: {e}")))?;
        }
        Ok(collector.close().await)
    }

    async fn cleanup(&mut self) {
        remove_prefix(&self.cfg, &self.prefix).await;
    }
}
