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

//! Time segmentation of operation logs.
//!
//! A segmentation slices the active part of a run into half-open windows of
//! equal width. Operations fully inside a window are credited whole;
//! operations straddling a boundary are credited fractionally to each window
//! they overlap, proportional to the overlap. Failed operations are charged
//! to the window they started in and never receive byte or object credit.

use gale_record::{Error, Operation, Operations, Result};
use time::{Duration, OffsetDateTime};

/// Options for [segment].
#[derive(Clone, Debug)]
pub struct SegmentOptions {
    /// Only fold operations of this type; empty matches all.
    pub op_filter: String,
    /// Skip windows before this instant. Clamped up to the active start.
    pub from: OffsetDateTime,
    /// The width of each window.
    pub per_seg_duration: Duration,
    /// Use the per-worker active range instead of the single-exclusion one.
    pub all_threads: bool,
    /// Accept logs containing several operation types.
    pub multi_op: bool,
}

impl SegmentOptions {
    /// Creates options with the given window width.
    pub fn new(per_seg_duration: Duration) -> Self {
        Self {
            op_filter: String::new(),
            from: OffsetDateTime::UNIX_EPOCH,
            per_seg_duration,
            all_threads: true,
            multi_op: false,
        }
    }

    /// Restrict the segmentation to one operation type.
    pub fn with_op_filter<S: Into<String>>(mut self, v: S) -> Self {
        self.op_filter = v.into();
        self
    }

    /// Skip windows before `v`.
    pub fn with_from(mut self, v: OffsetDateTime) -> Self {
        self.from = v;
        self
    }

    /// Change the active-range policy.
    pub fn with_all_threads(mut self, v: bool) -> Self {
        self.all_threads = v;
        self
    }

    /// Accept logs containing several operation types.
    pub fn with_multi_op(mut self, v: bool) -> Self {
        self.multi_op = v;
        self
    }
}

/// One time window with aggregated counters.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    /// The operation type folded into this segment; empty when mixed.
    pub op_type: String,
    /// The endpoint, when the log targets a single one.
    pub host: String,
    /// Objects per operation, taken from the folded operations.
    pub objs_per_op: u32,
    /// Window start (inclusive).
    pub start: OffsetDateTime,
    /// Window end (exclusive).
    pub ends_before: OffsetDateTime,
    /// Operations that started in this window.
    pub ops_started: u64,
    /// Operations that ended in this window.
    pub ops_ended: u64,
    /// Operations fully contained in this window.
    pub full_ops: u64,
    /// Operations overlapping a window boundary.
    pub partial_ops: u64,
    /// Failed operations charged to this window.
    pub errors: u64,
    /// Bytes credited to this window, including fractional credit.
    pub total_bytes: i64,
    /// Objects credited to this window; fractional for partial operations.
    pub objects: f64,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self::new(Duration::seconds(1))
    }
}

impl Default for Segment {
    fn default() -> Self {
        Segment {
            op_type: Default::default(),
            host: Default::default(),
            objs_per_op: Default::default(),
            start: OffsetDateTime::UNIX_EPOCH,
            ends_before: OffsetDateTime::UNIX_EPOCH,
            ops_started: Default::default(),
            ops_ended: Default::default(),
            full_ops: Default::default(),
            partial_ops: Default::default(),
            errors: Default::default(),
            total_bytes: Default::default(),
            objects: Default::default(),
        }
    }
}

impl Segment {
    fn new(op_type: &str, host: &str, start: OffsetDateTime, ends_before: OffsetDateTime) -> Self {
        Segment {
            op_type: op_type.to_string(),
            host: host.to_string(),
            start,
            ends_before,
            ..Segment::default()
        }
    }

    /// The window width.
    pub fn duration(&self) -> Duration {
        self.ends_before - self.start
    }

    /// Credited bytes per second.
    pub fn bytes_per_sec(&self) -> f64 {
        self.total_bytes as f64 / self.duration().as_seconds_f64()
    }

    /// Credited bytes per second, in MiB.
    pub fn mib_per_sec(&self) -> f64 {
        self.bytes_per_sec() / (1024.0 * 1024.0)
    }

    /// Completed operations per second.
    pub fn ops_per_sec(&self) -> f64 {
        self.ops_ended as f64 / self.duration().as_seconds_f64()
    }

    /// Credited objects per second.
    pub fn objects_per_sec(&self) -> f64 {
        self.objects / self.duration().as_seconds_f64()
    }

    /// Folds one operation into this window.
    fn add(&mut self, o: &Operation) {
        if o.end < self.start || o.start >= self.ends_before {
            return;
        }
        if self.objs_per_op == 0 {
            self.objs_per_op = o.object_count;
        }
        let started_in = o.start >= self.start;
        let ended_in = o.end < self.ends_before;
        if started_in && ended_in {
            if !o.is_ok() {
                self.errors += 1;
                return;
            }
            self.ops_started += 1;
            self.ops_ended += 1;
            self.full_ops += 1;
            self.total_bytes += o.size_bytes;
            self.objects += f64::from(o.object_count);
            return;
        }
        self.partial_ops += 1;
        if started_in {
            self.ops_started += 1;
            // Failures are charged to the window the operation started in.
            if !o.is_ok() {
                self.errors += 1;
                return;
            }
        }
        if ended_in {
            self.ops_ended += 1;
            if !o.is_ok() {
                return;
            }
        }
        if !o.is_ok() {
            return;
        }
        let dur_ns = (o.end - o.start).whole_nanoseconds();
        let overlap_end = std::cmp::min(o.end, self.ends_before);
        let overlap_start = std::cmp::max(o.start, self.start);
        let overlap_ns = (overlap_end - overlap_start).whole_nanoseconds();
        let credited = (i128::from(o.size_bytes) * overlap_ns + dur_ns / 2) / dur_ns;
        assert!(
            credited >= 0 && credited <= i128::from(o.size_bytes),
            "partial byte credit {credited} out of range for operation of {} bytes",
            o.size_bytes
        );
        self.total_bytes += credited as i64;
        self.objects += f64::from(o.object_count) * overlap_ns as f64 / dur_ns as f64;
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.2} MiB/s, {:.2} obj/s, {:.2} ops ended/s",
            self.mib_per_sec(),
            self.objects_per_sec(),
            self.ops_per_sec(),
        )?;
        if self.errors > 0 {
            write!(f, ", {} errors", self.errors)?;
        }
        Ok(())
    }
}

/// A dense sequence of equal-width segments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Segments(Vec<Segment>);

impl Segments {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Segment] {
        &self.0
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// Sorts by credited throughput, slowest first; ties break on start time.
    pub fn sort_by_throughput(&mut self) {
        self.0.sort_by(|a, b| {
            a.bytes_per_sec()
                .total_cmp(&b.bytes_per_sec())
                .then(a.start.cmp(&b.start))
        });
    }

    /// Sorts by completed operations, fewest first.
    pub fn sort_by_ops_ended(&mut self) {
        self.0
            .sort_by(|a, b| (a.ops_ended, a.start).cmp(&(b.ops_ended, b.start)));
    }

    /// Sorts by credited objects per second, slowest first.
    pub fn sort_by_objs_per_sec(&mut self) {
        self.0.sort_by(|a, b| {
            a.objects_per_sec()
                .total_cmp(&b.objects_per_sec())
                .then(a.start.cmp(&b.start))
        });
    }

    /// Sorts by window start time.
    pub fn sort_by_time(&mut self) {
        self.0.sort_by_key(|s| s.start);
    }

    /// Returns the element at position `round(m * len)`, clamped to the
    /// valid range, in the current sort order.
    ///
    /// Callers sort by the desired metric first; `0.0` is then the smallest
    /// element, `0.5` the median, and `1.0` the largest.
    pub fn median(&self, m: f64) -> Option<&Segment> {
        if self.0.is_empty() {
            return None;
        }
        let idx = (m * self.0.len() as f64).round() as usize;
        self.0.get(idx.min(self.0.len() - 1))
    }

    /// The mean credited throughput across segments, in bytes per second.
    pub fn avg_bytes_per_sec(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.0.iter().map(Segment::bytes_per_sec).sum::<f64>() / self.0.len() as f64
    }

    /// The mean credited objects per second across segments.
    pub fn avg_objects_per_sec(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.0.iter().map(Segment::objects_per_sec).sum::<f64>() / self.0.len() as f64
    }

    /// The mean completed operations per second across segments.
    pub fn avg_ops_per_sec(&self) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        self.0.iter().map(Segment::ops_per_sec).sum::<f64>() / self.0.len() as f64
    }

    /// The sum of all credited bytes.
    pub fn total_bytes(&self) -> i64 {
        self.0.iter().map(|s| s.total_bytes).sum()
    }
}

impl<'a> IntoIterator for &'a Segments {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn shared_host(ops: &Operations) -> String {
    match ops.endpoints().as_slice() {
        [single] => single.clone(),
        _ => String::new(),
    }
}

/// Slices `ops` into equal-width segments covering the active time range.
///
/// Only whole windows are produced: the tail of the range shorter than
/// `per_seg_duration` is not reported. A degenerate active range, such as
/// a log whose operations never leave the ramp windows, yields no
/// segments at all.
pub fn segment(ops: &Operations, opts: &SegmentOptions) -> Result<Segments> {
    if opts.per_seg_duration <= Duration::ZERO {
        return Err(Error::config("segment duration must be positive"));
    }
    let ops = ops.filter_by_op(&opts.op_filter);
    if !opts.multi_op && ops.is_mixed() {
        return Err(Error::config(
            "log contains multiple operation types; filter to one or allow multi-op",
        ));
    }
    let Some((active_start, active_end)) = ops.active_time_range(opts.all_threads) else {
        return Ok(Segments::default());
    };
    let op_type = if opts.op_filter.is_empty() && !ops.is_mixed() {
        ops.first_op_type().unwrap_or_default().to_string()
    } else {
        opts.op_filter.clone()
    };
    let host = shared_host(&ops);

    let mut seg_start = std::cmp::max(opts.from, active_start);
    let mut segments = Vec::new();
    while seg_start + opts.per_seg_duration <= active_end {
        segments.push(Segment::new(
            &op_type,
            &host,
            seg_start,
            seg_start + opts.per_seg_duration,
        ));
        seg_start += opts.per_seg_duration;
    }
    if segments.is_empty() {
        return Ok(Segments::default());
    }

    let base = segments[0].start;
    let per_ns = opts.per_seg_duration.whole_nanoseconds();
    for o in &ops {
        if o.end < base {
            continue;
        }
        let first = ((std::cmp::max(o.start, base) - base).whole_nanoseconds() / per_ns) as usize;
        let last = ((o.end - base).whole_nanoseconds() / per_ns) as usize;
        let segments_len = segments.len();
        for seg in segments
            .iter_mut()
            .skip(first.min(segments_len))
            .take(last.saturating_sub(first) + 1)
        {
            seg.add(o);
        }
    }
    Ok(Segments(segments))
}

/// Produces a single segment covering the whole active range.
///
/// The window width is the active range less one nanosecond, so that the
/// final operations count as boundary-straddling rather than being dropped.
/// Returns `None` when the active range is degenerate.
pub fn total(ops: &Operations, all_threads: bool) -> Option<Segment> {
    let (active_start, active_end) = ops.active_time_range(all_threads)?;
    let width = (active_end - active_start) - Duration::nanoseconds(1);
    if width <= Duration::ZERO {
        return None;
    }
    let op_type = if ops.is_mixed() {
        String::new()
    } else {
        ops.first_op_type().unwrap_or_default().to_string()
    };
    let mut seg = Segment::new(&op_type, &shared_host(ops), active_start, active_start + width);
    for o in ops {
        seg.add(o);
    }
    Some(seg)
}
