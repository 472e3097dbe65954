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

//! The upload workload: every worker uploads fresh payloads in a loop.

use crate::client::PutOpts;
use crate::collector::Collector;
use crate::workload::{OpRecorder, Workload, WorkloadConfig, remove_prefix, wait_release};
use gale_record::{Error, Operations, Result, op};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Uploads a fresh payload per iteration.
pub struct Put {
    cfg: WorkloadConfig,
    prefix: String,
}

impl Put {
    pub fn new(cfg: WorkloadConfig) -> Result<Self> {
        cfg.validate()?;
        let prefix = format!("{}/put", cfg.client_id);
        Ok(Self { cfg, prefix })
    }
}

#[async_trait::async_trait]
impl Workload for Put {
    fn name(&self) -> &'static str {
        "put"
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
            let mut source = (cfg.source_factory)(thread);
            let prefix = self.prefix.clone();
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
                    let mut payload = source.object();
                    payload.prefix = prefix.clone();
                    let key = payload.path();
                    let want = payload.size;
                    let opts = PutOpts {
                        content_type: payload.content_type.clone(),
                    };
                    let rec =
                        OpRecorder::start(op::PUT, &cfg.client_id, &endpoint, thread, key.clone());
                    // The call itself is never raced against the run token:
                    // cancellation takes effect at the top of the loop.
                    let record = match client
                        .put(&cfg.bucket, &key, payload.data, want, opts)
                        .await
                    {
                        Ok(info) if info.size != want => rec.finish_err(format!(
                            "short transfer: server reports {} bytes, want {want}",
                            info.size
                        )),
                        Ok(info) => rec.finish_ok(info.size, 1),
                        Err(e) => {
                            tracing::error!("put {key:?} failed: {e}");
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
                .map_err(|e| Error::other(format!("upload worker panicked: {e}")))?;
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
    use crate::client::{ClientPool, StoreError};
    use crate::source::RandomSource;
    use crate::testing::InMemoryStore;
    use crate::workload::run;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn config(store: Arc<InMemoryStore>, watch: mpsc::Sender<gale_record::Operation>) -> WorkloadConfig {
        WorkloadConfig::new("bench", Arc::new(ClientPool::single("mem://a", store)))
            .with_concurrency(2)
            .with_client_id("t")
            .with_source_factory(Arc::new(|thread| {
                Box::new(RandomSource::new(4096, u64::from(thread)))
            }))
            .with_output(watch)
    }

    #[tokio::test]
    async fn uploads_until_cancelled() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryStore::new());
        let (watch_tx, mut watch_rx) = mpsc::channel(64);
        let mut workload = Put::new(config(Arc::clone(&store), watch_tx))?;
        let ctx = CancellationToken::new();
        let runner = {
            let ctx = ctx.clone();
            tokio::spawn(async move { run(&mut workload, &ctx).await })
        };
        for _ in 0..10 {
            watch_rx.recv().await.expect("a put record");
        }
        ctx.cancel();
        drop(watch_rx);
        let ops = runner.await??;
        assert!(ops.len() >= 10);
        assert!(ops.iter().all(|o| o.op_type == op::PUT));
        assert!(ops.iter().all(|o| o.is_ok() && o.size_bytes == 4096));
        // Cleanup removed everything the run uploaded.
        assert_eq!(store.object_count("bench"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn failures_are_recorded_not_fatal() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryStore::new());
        store.bucket_create_now("bench");
        store.inject_put_error(StoreError::internal("injected"));
        let (watch_tx, mut watch_rx) = mpsc::channel(64);
        let mut workload = Put::new(config(Arc::clone(&store), watch_tx))?;
        let ctx = CancellationToken::new();
        let runner = {
            let ctx = ctx.clone();
            tokio::spawn(async move { run(&mut workload, &ctx).await })
        };
        let mut saw_error = false;
        for _ in 0..20 {
            let op = watch_rx.recv().await.expect("a record");
            if !op.is_ok() {
                assert!(op.err.contains("injected"), "{}", op.err);
                assert_eq!(op.size_bytes, 0);
                saw_error = true;
                break;
            }
        }
        ctx.cancel();
        drop(watch_rx);
        let ops = runner.await??;
        assert!(saw_error, "the injected failure surfaced as a record");
        assert!(ops.total_errors() >= 1);
        Ok(())
    }

    #[tokio::test]
    async fn short_transfers_are_recorded_as_errors() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryStore::new());
        store.bucket_create_now("bench");
        store.truncate_next_put(100);
        let (watch_tx, mut watch_rx) = mpsc::channel(64);
        let mut workload = Put::new(config(Arc::clone(&store), watch_tx))?;
        let ctx = CancellationToken::new();
        let runner = {
            let ctx = ctx.clone();
            tokio::spawn(async move { run(&mut workload, &ctx).await })
        };
        let mut saw_short = false;
        for _ in 0..20 {
            let op = watch_rx.recv().await.expect("a record");
            if !op.is_ok() {
                assert!(op.err.contains("short transfer"), "{}", op.err);
                saw_short = true;
                break;
            }
        }
        ctx.cancel();
        drop(watch_rx);
        runner.await??;
        assert!(saw_short);
        Ok(())
    }
}
