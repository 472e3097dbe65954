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

//! Payload sources.
//!
//! A payload source produces named byte streams for upload-type operations.
//! Sources hold internal RNG state and are owned by a single worker; they
//! must not be shared. [RandomSource] is the reference implementation;
//! generators for structured data (CSV, text, Parquet) live outside this
//! crate and plug in through the same trait.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::pin::Pin;
use std::sync::Arc;

/// A stream of payload chunks for one upload.
pub type ChunkStream = Pin<Box<dyn futures::Stream<Item = Bytes> + Send>>;

const CHUNK_SIZE: usize = 64 * 1024;

/// One payload produced by a [PayloadSource].
pub struct Payload {
    /// The object name, unique per payload.
    pub name: String,
    /// Key prefix, possibly empty.
    pub prefix: String,
    /// Payload size in bytes.
    pub size: i64,
    pub content_type: String,
    /// Version to address, for versioned workloads.
    pub version_id: Option<String>,
    /// The payload bytes.
    pub data: ChunkStream,
}

impl Payload {
    /// The full object key: `prefix/name`, or just `name` without a prefix.
    pub fn path(&self) -> String {
        if self.prefix.is_empty() {
            return self.name.clone();
        }
        format!("{}/{}", self.prefix, self.name)
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Payload")
            .field("name", &self.name)
            .field("prefix", &self.prefix)
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .finish()
    }
}

/// Produces payload streams for one worker.
pub trait PayloadSource: Send {
    /// Returns the next payload.
    fn object(&mut self) -> Payload;
}

/// A factory handing each worker its own payload source.
pub type SourceFactory = Arc<dyn Fn(u16) -> Box<dyn PayloadSource> + Send + Sync>;

/// Generates fixed-size payloads of random bytes.
///
/// The buffer is generated once at construction; payloads serve slices of
/// it. Random data avoids results skewed by transparent compression.
pub struct RandomSource {
    buf: Bytes,
    size: i64,
    prefix: String,
    rng: StdRng,
}

impl RandomSource {
    /// Creates a source producing `size`-byte payloads.
    pub fn new(size: i64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut buf = vec![0u8; usize::try_from(size).unwrap_or_default()];
        rng.fill(buf.as_mut_slice());
        Self {
            buf: Bytes::from(buf),
            size,
            prefix: String::new(),
            rng,
        }
    }

    /// Prefix every payload name with `prefix`.
    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn random_name(&mut self) -> String {
        (&mut self.rng)
            .sample_iter(&rand::distr::Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }
}

impl PayloadSource for RandomSource {
    fn object(&mut self) -> Payload {
        let name = self.random_name();
        let buf = self.buf.clone();
        let chunks = (0..buf.len())
            .step_by(CHUNK_SIZE)
            .map(move |off| buf.slice(off..(off + CHUNK_SIZE).min(buf.len())))
            .collect::<Vec<_>>();
        Payload {
            name,
            prefix: self.prefix.clone(),
            size: self.size,
            content_type: "application/octet-stream".to_string(),
            version_id: None,
            data: Box::pin(futures::stream::iter(chunks)),
        }
    }
}

/// The default source factory: 1 MiB random payloads, seeded per worker.
pub(crate) fn default_factory() -> SourceFactory {
    Arc::new(|thread| {
        let seed = 0x67616c65u64 ^ u64::from(thread);
        Box::new(RandomSource::new(1024 * 1024, seed))
    })
}
