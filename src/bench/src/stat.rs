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

//! The metadata workload: workers stat seeded objects at random.

use crate::collector::Collector;
use crate::object_pool::{ObjectPool, PoolObject};
use crate::workload::{
    OpRecorder, Workload, WorkloadConfig, remove_prefix, seed_objects, wait_release,
};
use gale_record::{Error, Operations, Result, op};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Requests object metadata for random seeded objects.
pub struct Stat {
    cfg: WorkloadConfig,
    objects: u32,
    seeded: Arc<Vec<PoolObject>>,
    prefix: String,
}

impl Stat {
    pub fn new(cfg: WorkloadConfig, objects: u32) -> Result<Self> {
        cfg.validate()?;
        if objects == 0 {
            return Err(Error::config("at least one seed object is required"));
        }
        let prefix = format!("{}/stat", cfg.client_id);
        Ok(Self {
            cfg,
            objects,
            seeded: Arc::new(Vec::new()),
            prefix,
        })
    }
}

#[async_trait::async_trait]
impl Workload for Stat {
    fn name(&self) -> &'static str {
        "stat"
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
                    let rec = OpRecorder::start(
                        op::STAT,
                        &cfg.client_id,
                        &endpoint,
                        thread,
                        obj.key.clone(),
                    );
                    // Metadata requests transfer no payload bytes.
                    let record = match client
                        .stat(&cfg.bucket, &obj.key, obj.version_id.as_deref())
                        .await
                    {
                        Ok(info) if info.size != obj.size => rec.finish_err(format!(
                            "stat size mismatch: server reports {} bytes, want {}",
                            info.size, obj.size
                        )),
                        Ok(_) => rec.finish_ok(0, 1),
                        Err(e) => {
                            tracing::error!("stat {:?} failed: {e}", obj.key);
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
                .map_err(|e| Error::other(format!("stat worker panicked: {e}")))?;
        }
        Ok(collector.close().await)
    }

    async fn cleanup(&mut self) {
        remove_prefix(&self.cfg, &self.prefix).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientPool;
    use crate::source::RandomSource;
    use crate::testing::InMemoryStore;
    use crate::workload::run;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn stats_are_byteless_records() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryStore::new());
        let (watch_tx, mut watch_rx) = mpsc::channel(64);
        let cfg = WorkloadConfig::new("bench", Arc::new(ClientPool::single("mem://a", store)))
            .with_concurrency(2)
            .with_client_id("t")
            .with_source_factory(Arc::new(|thread| {
                Box::new(RandomSource::new(1024, u64::from(thread)))
            }))
            .with_output(watch_tx);
        let mut workload = Stat::new(cfg, 5)?;
        let ctx = CancellationToken::new();
        let runner = {
            let ctx = ctx.clone();
            tokio::spawn(async move { run(&mut workload, &ctx).await })
        };
        for _ in 0..8 {
            watch_rx.recv().await.expect("a stat record");
        }
        ctx.cancel();
        drop(watch_rx);
        let ops = runner.await??;
        assert!(ops.len() >= 8);
        for o in &ops {
            assert_eq!(o.op_type, op::STAT);
            assert!(o.is_ok(), "{}", o.err);
            assert_eq!(o.size_bytes, 0);
            assert_eq!(o.object_count, 1);
            assert!(o.first_byte.is_none());
        }
        Ok(())
    }
}
