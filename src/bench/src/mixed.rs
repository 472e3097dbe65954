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

//! The mixed workload: a weighted blend of GET, PUT, DELETE, and STAT
//! over a shared object pool.

use crate::client::PutOpts;
use crate::collector::Collector;
use crate::distrib::Schedule;
use crate::object_pool::{ObjectPool, PoolObject};
use crate::workload::{
    OpRecorder, Workload, WorkloadConfig, remove_prefix, seed_objects, wait_release,
};
use futures::StreamExt;
use gale_record::{Error, Operations, Result, op};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Relative operation frequencies for [Mixed].
///
/// The delete weight must not exceed the put weight, or the shared object
/// pool would drain over time.
#[derive(Clone, Copy, Debug)]
pub struct MixedWeights {
    pub get: f64,
    pub put: f64,
    pub delete: f64,
    pub stat: f64,
}

impl Default for MixedWeights {
    fn default() -> Self {
        Self {
            get: 45.0,
            put: 15.0,
            delete: 10.0,
            stat: 30.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Get,
    Put,
    Delete,
    Stat,
}

/// Issues a weighted mix of operations against a shared object pool.
pub struct Mixed {
    cfg: WorkloadConfig,
    objects: u32,
    schedule: Arc<Schedule<Kind>>,
    pool: Arc<ObjectPool>,
    prefix: String,
}

impl std::fmt::Debug for Mixed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixed")
            .field("objects", &self.objects)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl Mixed {
    /// Creates the workload with the given weights and seed-object count.
    ///
    /// The dispatch cycle is shuffled with `seed`, so two clients given
    /// the same seed issue the same sequence.
    pub fn new(cfg: WorkloadConfig, weights: MixedWeights, objects: u32, seed: u64) -> Result<Self> {
        cfg.validate()?;
        if objects == 0 {
            return Err(Error::config("at least one seed object is required"));
        }
        if weights.delete > weights.put {
            return Err(Error::config(format!(
                "the delete weight ({}) must not exceed the put weight ({}): \
                 the object pool would drain",
                weights.delete, weights.put
            )));
        }
        let schedule = Schedule::new(
            &[
                (Kind::Get, weights.get),
                (Kind::Put, weights.put),
                (Kind::Delete, weights.delete),
                (Kind::Stat, weights.stat),
            ],
            seed,
        )?;
        let prefix = format!("{}/mixed", cfg.client_id);
        Ok(Self {
            cfg,
            objects,
            schedule: Arc::new(schedule),
            pool: Arc::new(ObjectPool::new(seed)),
            prefix,
        })
    }
}

#[async_trait::async_trait]
impl Workload for Mixed {
    fn name(&self) -> &'static str {
        "mixed"
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
            let schedule = Arc::clone(&self.schedule);
            let pool = Arc::clone(&self.pool);
            let prefix = self.prefix.clone();
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
                    let (client, endpoint) = cfg.clients.acquire();
                    let record = match schedule.next_op() {
                        Kind::Put => {
                            let mut payload = source.object();
                            payload.prefix = prefix.clone();
                            let key = payload.path();
                            let want = payload.size;
                            let opts = PutOpts {
                                content_type: payload.content_type.clone(),
                            };
                            let rec = OpRecorder::start(
                                op::PUT,
                                &cfg.client_id,
                                &endpoint,
                                thread,
                                key.clone(),
                            );
                            match client
                                .put(&cfg.bucket, &key, payload.data, want, opts)
                                .await
                            {
                                Ok(info) => {
                                    pool.insert(PoolObject {
                                        key,
                                        size: info.size,
                                        version_id: info.version_id,
                                    });
                                    rec.finish_ok(info.size, 1)
                                }
                                Err(e) => {
                                    tracing::error!("put {key:?} failed: {e}");
                                    rec.finish_err(e)
                                }
                            }
                        }
                        Kind::Get => {
                            let obj = pool.take_expect();
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
                                        Some(e) => rec.finish_err(e),
                                    }
                                }
                            };
                            // Taken objects come back whether or not the
                            // read succeeded.
                            pool.put_back(obj);
                            record
                        }
                        Kind::Stat => {
                            let obj = pool.take_expect();
                            let rec = OpRecorder::start(
                                op::STAT,
                                &cfg.client_id,
                                &endpoint,
                                thread,
                                obj.key.clone(),
                            );
                            let record = match client
                                .stat(&cfg.bucket, &obj.key, obj.version_id.as_deref())
                                .await
                            {
                                Ok(_) => rec.finish_ok(0, 1),
                                Err(e) => {
                                    tracing::error!("stat {:?} failed: {e}", obj.key);
                                    rec.finish_err(e)
                                }
                            };
                            pool.put_back(obj);
                            record
                        }
                        Kind::Delete => {
                            let obj = pool.take_expect();
                            let rec = OpRecorder::start(
                                op::DELETE,
                                &cfg.client_id,
                                &endpoint,
                                thread,
                                obj.key.clone(),
                            );
                            match client
                                .remove(&cfg.bucket, &obj.key, obj.version_id.as_deref())
                                .await
                            {
                                // Deleted objects are gone for good.
                                Ok(()) => rec.finish_ok(0, 1),
                                Err(e) => {
                                    tracing::error!("delete {:?} failed: {e}", obj.key);
                                    pool.put_back(obj);
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
                .map_err(|e| Error::other(format!("mixed worker panicked: {e}")))?;
        }
        Ok(collector.close().await)
    }

    async fn cleanup(&mut self) {
        remove_prefix(&self.cfg, &self.prefix).await;
    }
}
