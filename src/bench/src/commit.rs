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

//! The catalog commit workload.
//!
//! Each iteration uploads a batch of data files and then commits them to
//! the table metadata. Commits losing a race get retried with truncated
//! exponential back-off and jitter; a single logical commit produces one
//! `COMMIT` record spanning the entire retry sequence.

use crate::client::{Catalog, PutOpts, StatusCode};
use crate::collector::Collector;
use crate::workload::{OpRecorder, Workload, WorkloadConfig, remove_prefix, wait_release};
use gale_record::{Error, Operations, Result, op};
use rand::Rng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Truncated exponential back-off with jitter for commit retries.
#[derive(Clone, Copy, Debug)]
pub struct CommitBackoff {
    /// The delay before the first retry.
    pub base: Duration,
    /// The ceiling for the exponential delay, before jitter.
    pub max: Duration,
    /// Retries after the initial attempt.
    pub max_retries: u32,
}

impl Default for CommitBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            max: Duration::from_secs(10),
            max_retries: 5,
        }
    }
}

impl CommitBackoff {
    /// The delay before retry `attempt` (zero-based):
    /// `min(base * 2^attempt, max)` plus up to half of that in jitter.
    fn delay(&self, attempt: u32, rng: &mut StdRng) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max);
        exp + rng.random_range(Duration::ZERO..=exp / 2)
    }
}

/// Uploads file batches and commits them to a catalog table.
pub struct Commit {
    cfg: WorkloadConfig,
    catalog: Arc<dyn Catalog>,
    table: String,
    files_per_commit: u32,
    backoff: CommitBackoff,
    prefix: String,
}

impl Commit {
    pub fn new<S: Into<String>>(
        cfg: WorkloadConfig,
        catalog: Arc<dyn Catalog>,
        table: S,
        files_per_commit: u32,
        backoff: CommitBackoff,
    ) -> Result<Self> {
        cfg.validate()?;
        if files_per_commit == 0 {
            return Err(Error::config("each commit needs at least one file"));
        }
        let table = table.into();
        if table.is_empty() {
            return Err(Error::config("a table name is required"));
        }
        let prefix = format!("{}/commit", cfg.client_id);
        Ok(Self {
            cfg,
            catalog,
            table,
            files_per_commit,
            backoff,
            prefix,
        })
    }
}

#[async_trait::async_trait]
impl Workload for Commit {
    fn name(&self) -> &'static str {
        "commit"
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
        match self.catalog.create_table(&self.table).await {
            Ok(()) => Ok(()),
            // Another client won the race to create it.
            Err(e) if e.code == StatusCode::Conflict => Ok(()),
            Err(e) => Err(Error::other(e)),
        }
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
            let catalog = Arc::clone(&self.catalog);
            let table = self.table.clone();
            let prefix = self.prefix.clone();
            let files_per_commit = self.files_per_commit;
            let backoff = self.backoff;
            let mut source = (cfg.source_factory)(thread);
            let mut rng: StdRng = rand::SeedableRng::seed_from_u64(u64::from(thread));
            workers.push(tokio::spawn(async move {
                wait_release(&mut release).await;
                loop {
                    if run.is_cancelled() {
                        return;
                    }
                    if cfg.rate_limiter.acquire(&run).await.is_err() {
                        return;
                    }

                    // Upload the batch; each file is its own record.
                    let mut files = Vec::new();
                    for _ in 0..files_per_commit {
                        let (client, endpoint) = cfg.clients.acquire();
                        let mut payload = source.object();
                        payload.prefix = prefix.clone();
                        let key = payload.path();
                        let want = payload.size;
                        let opts = PutOpts {
                            content_type: payload.content_type.clone(),
                        };
                        let rec = OpRecorder::start(
                            op::UPLOAD,
                            &cfg.client_id,
                            &endpoint,
                            thread,
                            key.clone(),
                        );
                        let record = match client
                            .put(&cfg.bucket, &key, payload.data, want, opts)
                            .await
                        {
                            Ok(info) => {
                                files.push(key);
                                rec.finish_ok(info.size, 1)
                            }
                            Err(e) => {
                                tracing::error!("upload {key:?} failed: {e}");
                                rec.finish_err(e)
                            }
                        };
                        if tx.send(record).await.is_err() {
                            return;
                        }
                    }
                    if files.is_empty() {
                        continue;
                    }

                    // One record spans the whole retry sequence.
                    let (_, endpoint) = cfg.clients.acquire();
                    let rec = OpRecorder::start(
                        op::COMMIT,
                        &cfg.client_id,
                        &endpoint,
                        thread,
                        table.clone(),
                    );
                    let file_count = files.len() as u32;
                    let mut attempt = 0u32;
                    let record = loop {
                        match catalog.commit_table(&table, files.clone()).await {
                            Ok(()) => break rec.finish_ok(0, file_count),
                            Err(e) if e.is_retryable() && attempt < backoff.max_retries => {
                                let delay = backoff.delay(attempt, &mut rng);
                                tracing::warn!(
                                    "commit to {table:?} lost attempt {attempt}: {e}; \
                                     retrying in {delay:?}"
                                );
                                tokio::time::sleep(delay).await;
                                attempt += 1;
                            }
                            Err(e) => {
                                tracing::error!("commit to {table:?} failed: {e}");
                                break rec.finish_err(e);
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
                .map_err(|e| Error::other(format!("commit worker panicked: {e}")))?;
        }
        Ok(collector.close().await)
    }

    async fn cleanup(&mut self) {
        if let Err(e) = self.catalog.drop_table(&self.table).await {
            tracing::warn!("cleanup: dropping table {:?} failed: {e}", self.table);
        }
        remove_prefix(&self.cfg, &self.prefix).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientPool, MockCatalog, StoreError};
    use crate::source::RandomSource;
    use crate::testing::InMemoryStore;
    use crate::workload::run;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    fn tight_backoff() -> CommitBackoff {
        CommitBackoff {
            base: Duration::from_millis(1),
            max: Duration::from_millis(4),
            max_retries: 5,
        }
    }

    fn config(
        store: Arc<InMemoryStore>,
        watch: mpsc::Sender<gale_record::Operation>,
    ) -> WorkloadConfig {
        WorkloadConfig::new("bench", Arc::new(ClientPool::single("mem://a", store)))
            .with_concurrency(1)
            .with_client_id("t")
            .with_source_factory(Arc::new(|thread| {
                Box::new(RandomSource::new(1024, u64::from(thread)))
            }))
            .with_output(watch)
    }

    #[tokio::test]
    async fn conflicts_are_retried_with_backoff() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryStore::new());
        let (watch_tx, mut watch_rx) = mpsc::channel(64);

        let attempts = Arc::new(AtomicU32::new(0));
        let mut catalog = MockCatalog::new();
        catalog.expect_create_table().returning(|_| Ok(()));
        catalog.expect_drop_table().returning(|_| Ok(()));
        let seen = Arc::clone(&attempts);
        catalog.expect_commit_table().returning(move |_, files| {
            assert_eq!(files.len(), 2);
            // The first two attempts lose the race.
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::conflict("metadata version moved"))
            } else {
                Ok(())
            }
        });

        let mut workload = Commit::new(
            config(store, watch_tx),
            Arc::new(catalog),
            "db.table",
            2,
            tight_backoff(),
        )?;
        let ctx = CancellationToken::new();
        let runner = {
            let ctx = ctx.clone();
            tokio::spawn(async move { run(&mut workload, &ctx).await })
        };
        let commit = loop {
            let record = watch_rx.recv().await.expect("a record");
            if record.op_type == op::COMMIT {
                break record;
            }
            assert_eq!(record.op_type, op::UPLOAD);
        };
        ctx.cancel();
        drop(watch_rx);
        let ops = runner.await??;

        assert!(commit.is_ok(), "{}", commit.err);
        assert_eq!(commit.object_count, 2);
        assert!(attempts.load(Ordering::SeqCst) >= 3, "two conflicts then success");
        // The commit record spans the retries: with two ~1-4ms waits it
        // cannot be instantaneous.
        assert!(commit.duration() >= time::Duration::milliseconds(2));
        assert!(ops.iter().any(|o| o.op_type == op::UPLOAD));
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_retries_record_the_failure() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryStore::new());
        let (watch_tx, mut watch_rx) = mpsc::channel(64);

        let mut catalog = MockCatalog::new();
        catalog.expect_create_table().returning(|_| Ok(()));
        catalog.expect_drop_table().returning(|_| Ok(()));
        catalog
            .expect_commit_table()
            .returning(|_, _| Err(StoreError::conflict("always busy")));

        let backoff = CommitBackoff {
            max_retries: 2,
            ..tight_backoff()
        };
        let mut workload = Commit::new(
            config(store, watch_tx),
            Arc::new(catalog),
            "db.table",
            1,
            backoff,
        )?;
        let ctx = CancellationToken::new();
        let runner = {
            let ctx = ctx.clone();
            tokio::spawn(async move { run(&mut workload, &ctx).await })
        };
        let commit = loop {
            let record = watch_rx.recv().await.expect("a record");
            if record.op_type == op::COMMIT {
                break record;
            }
        };
        ctx.cancel();
        drop(watch_rx);
        runner.await??;
        assert!(!commit.is_ok());
        assert!(commit.err.contains("always busy"), "{}", commit.err);
        Ok(())
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryStore::new());
        let (watch_tx, mut watch_rx) = mpsc::channel(64);

        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let mut catalog = MockCatalog::new();
        catalog.expect_create_table().returning(|_| Ok(()));
        catalog.expect_drop_table().returning(|_| Ok(()));
        catalog.expect_commit_table().returning(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::new(StatusCode::InvalidRequest, "bad schema"))
        });

        // A slow rate limiter keeps the worker from starting a second
        // logical commit before the cancellation lands.
        let cfg = config(store, watch_tx)
            .with_rate_limiter(Arc::new(crate::rate::OpsPerSec::new(0.2)?));
        let mut workload = Commit::new(cfg, Arc::new(catalog), "db.table", 1, tight_backoff())?;
        let ctx = CancellationToken::new();
        let runner = {
            let ctx = ctx.clone();
            tokio::spawn(async move { run(&mut workload, &ctx).await })
        };
        let commit = loop {
            let record = watch_rx.recv().await.expect("a record");
            if record.op_type == op::COMMIT {
                break record;
            }
        };
        ctx.cancel();
        drop(watch_rx);
        runner.await??;
        assert!(!commit.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 1, "no retries");
        Ok(())
    }

    #[test]
    fn backoff_is_truncated_and_jittered() {
        let backoff = CommitBackoff {
            base: Duration::from_millis(100),
            max: Duration::from_millis(400),
            max_retries: 5,
        };
        let mut rng: StdRng = rand::SeedableRng::seed_from_u64(1);
        for attempt in 0..6 {
            let exp = Duration::from_millis(100)
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(Duration::from_millis(400));
            let d = backoff.delay(attempt, &mut rng);
            assert!(d >= exp, "attempt {attempt}: {d:?} < {exp:?}");
            assert!(d <= exp + exp / 2, "attempt {attempt}: {d:?} too large");
        }
    }
}
