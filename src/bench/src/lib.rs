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

//! Workload execution for gale.
//!
//! This crate drives the benchmark itself: concurrent workers issue
//! storage operations through injected [client][crate::client] capabilities
//! and feed their records to a [Collector]. The collector fans records out
//! to subscribers, keeps the in-memory log, and can watch its own
//! throughput to cancel the run once it stabilizes (auto-termination).
//!
//! One [Workload] implementation exists per benchmark kind; see [put::Put],
//! [get::Get], [mixed::Mixed], [commit::Commit], and friends.

pub use gale_record::{Error, ErrorKind, Result};

pub mod client;
pub mod collector;
pub mod distrib;
pub mod object_pool;
pub mod rate;
pub mod source;
pub mod workload;

mod autoterm;

pub mod commit;
pub mod delete;
pub mod get;
pub mod list;
pub mod mixed;
pub mod multipart;
pub mod put;
pub mod stat;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ClientPool, StatusCode, StoreClient, StoreError};
pub use collector::Collector;
pub use rate::{OpsPerSec, RateLimiter, Unlimited};
pub use source::{Payload, PayloadSource, RandomSource};
pub use workload::{Workload, WorkloadConfig, run};
