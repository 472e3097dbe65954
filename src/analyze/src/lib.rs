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

//! Analysis of gale operation logs.
//!
//! The entry point is [segment::segment], which slices an operation log into
//! fixed-width time windows, attributing operations that straddle a window
//! boundary fractionally to each side. [stats] derives throughput, latency,
//! and time-to-first-byte distributions; [compare] computes before/after
//! deltas between two runs of the same operation type.

pub use gale_record::{Error, Result};

pub mod compare;
pub mod segment;
pub mod stats;

pub use compare::{Comparison, Metric, compare};
pub use segment::{Segment, SegmentOptions, Segments, segment, total};
pub use stats::{DurationStats, Ttfb, durations, throughput, ttfb};
