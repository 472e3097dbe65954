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

//! The per-operation record.

use crate::Categories;
use time::OffsetDateTime;

/// Well-known operation type names.
///
/// Operation types are plain strings so that catalog operations and future
/// extensions need no code changes; these constants cover the types the
/// built-in workloads emit. The empty string means "any" in filters.
pub mod op {
    pub const GET: &str = "GET";
    pub const PUT: &str = "PUT";
    pub const STAT: &str = "STAT";
    pub const DELETE: &str = "DELETE";
    pub const LIST: &str = "LIST";
    pub const UPLOAD: &str = "UPLOAD";
    pub const COMMIT: &str = "COMMIT";
    pub const COMPLETE: &str = "COMPLETE";
}

/// A single recorded storage operation.
///
/// Records are created by a worker when a request completes and are immutable
/// from then on. Timestamps are wall-clock with nanosecond precision.
///
/// Invariants: `start <= first_byte <= end` when `first_byte` is present,
/// `size_bytes >= 0`, and an empty `err` means `size_bytes` reflects the
/// server-observed size.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    /// Short operation type identifier, e.g. `GET` or `PUT`.
    pub op_type: String,
    /// Opaque identifier of the benchmark client that emitted this record.
    pub client_id: String,
    /// URL-shaped identifier of the target server.
    pub endpoint: String,
    /// Worker number, unique within one client.
    pub thread: u16,
    /// Number of logical objects touched; more than one for batched
    /// deletes, listings, and fan-out uploads.
    pub object_count: u32,
    /// Bytes transferred. Zero for metadata operations.
    pub size_bytes: i64,
    /// Object key or identifier.
    pub file: String,
    /// When the request started.
    pub start: OffsetDateTime,
    /// When the first payload byte arrived. Only read-like operations
    /// record this.
    pub first_byte: Option<OffsetDateTime>,
    /// When the request finished.
    pub end: OffsetDateTime,
    /// Empty on success, the failure message otherwise.
    pub err: String,
    /// Category tags. Metadata only.
    pub categories: Categories,
}

impl Operation {
    /// The total duration of the operation.
    pub fn duration(&self) -> time::Duration {
        self.end - self.start
    }

    /// Time to first byte, when recorded.
    pub fn ttfb(&self) -> Option<time::Duration> {
        self.first_byte.map(|fb| fb - self.start)
    }

    /// Whether the operation succeeded.
    pub fn is_ok(&self) -> bool {
        self.err.is_empty()
    }
}
