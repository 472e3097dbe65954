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

//! Ordered sequences of operation records.

use crate::Operation;
use std::collections::BTreeSet;
use time::OffsetDateTime;

/// An ordered sequence of [Operation] records.
///
/// The default order is emission order. The log is append-only and may
/// contain duplicates. Filters return fresh buffers: mutating a filtered
/// sequence never affects the sequence it was derived from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Operations(Vec<Operation>);

impl Operations {
    /// Creates an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Operation> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Operation] {
        &self.0
    }

    pub fn push(&mut self, op: Operation) {
        self.0.push(op);
    }

    /// Appends every record of `other`, preserving the order of both logs.
    ///
    /// Used to combine logs shipped from multiple benchmark clients before
    /// analysis.
    pub fn merge(&mut self, other: Operations) {
        self.0.extend(other.0);
    }

    /// Returns the records whose type matches `op_type`.
    ///
    /// An empty `op_type` matches all records.
    pub fn filter_by_op(&self, op_type: &str) -> Operations {
        if op_type.is_empty() {
            return self.clone();
        }
        Operations(
            self.0
                .iter()
                .filter(|o| o.op_type == op_type)
                .cloned()
                .collect(),
        )
    }

    /// Returns the records against the given endpoint.
    pub fn filter_by_endpoint(&self, endpoint: &str) -> Operations {
        Operations(
            self.0
                .iter()
                .filter(|o| o.endpoint == endpoint)
                .cloned()
                .collect(),
        )
    }

    /// Returns the records emitted by the given client.
    pub fn filter_by_client(&self, client_id: &str) -> Operations {
        Operations(
            self.0
                .iter()
                .filter(|o| o.client_id == client_id)
                .cloned()
                .collect(),
        )
    }

    /// Returns only the successful records.
    pub fn ok_only(&self) -> Operations {
        Operations(self.0.iter().filter(|o| o.is_ok()).cloned().collect())
    }

    /// Returns the records that overlap `[from, to]`.
    pub fn filter_by_range(&self, from: OffsetDateTime, to: OffsetDateTime) -> Operations {
        Operations(
            self.0
                .iter()
                .filter(|o| o.end >= from && o.start <= to)
                .cloned()
                .collect(),
        )
    }

    /// The number of failed operations.
    pub fn total_errors(&self) -> usize {
        self.0.iter().filter(|o| !o.is_ok()).count()
    }

    /// The sum of all transferred bytes.
    pub fn total_bytes(&self) -> i64 {
        self.0.iter().map(|o| o.size_bytes).sum()
    }

    /// The sum of all logical objects touched.
    pub fn total_objects(&self) -> u64 {
        self.0.iter().map(|o| u64::from(o.object_count)).sum()
    }

    /// The type of the first record, if any.
    pub fn first_op_type(&self) -> Option<&str> {
        self.0.first().map(|o| o.op_type.as_str())
    }

    /// Whether the sequence contains more than one operation type.
    pub fn is_mixed(&self) -> bool {
        let mut types = self.0.iter().map(|o| o.op_type.as_str());
        match types.next() {
            None => false,
            Some(first) => types.any(|t| t != first),
        }
    }

    /// The distinct `(client, thread)` worker identities in the sequence.
    pub fn threads(&self) -> usize {
        self.0
            .iter()
            .map(|o| (o.client_id.as_str(), o.thread))
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// The distinct endpoints in the sequence.
    pub fn endpoints(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|o| o.endpoint.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// The distinct client identifiers in the sequence.
    pub fn clients(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|o| o.client_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Sorts by start time, then end time.
    pub fn sort_by_start(&mut self) {
        self.0.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)));
    }

    /// Sorts by total request duration, shortest first.
    pub fn sort_by_duration(&mut self) {
        self.0
            .sort_by(|a, b| (a.duration(), a.start).cmp(&(b.duration(), b.start)));
    }

    /// Sorts by time to first byte, fastest first. Records without a
    /// first-byte stamp sort last.
    pub fn sort_by_ttfb(&mut self) {
        self.0.sort_by(|a, b| {
            let key = |o: &Operation| (o.ttfb().is_none(), o.ttfb(), o.start);
            key(a).cmp(&key(b))
        });
    }

    /// The full time range covered: earliest start to latest end.
    pub fn time_range(&self) -> Option<(OffsetDateTime, OffsetDateTime)> {
        let start = self.0.iter().map(|o| o.start).min()?;
        let end = self.0.iter().map(|o| o.end).max()?;
        Some((start, end))
    }

    /// The active time range, excluding ramp-up and ramp-down.
    ///
    /// With `all_threads` set, the range starts once every worker has
    /// completed at least one operation and ends at the earliest of the
    /// workers' final starts. A degenerate result collapses to
    /// `(start, start)`.
    ///
    /// Without `all_threads`, only one operation is excluded at each end:
    /// the range runs from the first completion to the last start. This is
    /// always at least as wide as the per-worker range.
    pub fn active_time_range(&self, all_threads: bool) -> Option<(OffsetDateTime, OffsetDateTime)> {
        if self.0.is_empty() {
            return None;
        }
        if !all_threads {
            let start = self.0.iter().map(|o| o.end).min()?;
            let end = self.0.iter().map(|o| o.start).max()?;
            if start > end {
                return Some((start, start));
            }
            return Some((start, end));
        }
        let mut first_end = std::collections::BTreeMap::new();
        let mut last_start = std::collections::BTreeMap::new();
        for o in &self.0 {
            let key = (o.client_id.as_str(), o.thread);
            first_end
                .entry(key)
                .and_modify(|e| {
                    if o.end < *e {
                        *e = o.end;
                    }
                })
                .or_insert(o.end);
            last_start
                .entry(key)
                .and_modify(|s| {
                    if o.start > *s {
                        *s = o.start;
                    }
                })
                .or_insert(o.start);
        }
        let start = first_end.values().max().copied()?;
        let end = last_start.values().min().copied()?;
        if start > end {
            return Some((start, start));
        }
        Some((start, end))
    }

    /// The mean request duration.
    pub fn avg_duration(&self) -> time::Duration {
        if self.0.is_empty() {
            return time::Duration::ZERO;
        }
        let total: i128 = self
            .0
            .iter()
            .map(|o| o.duration().whole_nanoseconds())
            .sum();
        time::Duration::nanoseconds((total / self.0.len() as i128) as i64)
    }

    /// The population standard deviation of request durations.
    pub fn std_dev(&self) -> time::Duration {
        if self.0.len() < 2 {
            return time::Duration::ZERO;
        }
        let mean = self.avg_duration().whole_nanoseconds() as f64;
        let var = self
            .0
            .iter()
            .map(|o| {
                let d = o.duration().whole_nanoseconds() as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / self.0.len() as f64;
        time::Duration::nanoseconds(var.sqrt() as i64)
    }
}

impl From<Vec<Operation>> for Operations {
    fn from(value: Vec<Operation>) -> Self {
        Operations(value)
    }
}

impl IntoIterator for Operations {
    type Item = Operation;
    type IntoIter = std::vec::IntoIter<Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Operations {
    type Item = &'a Operation;
    type IntoIter = std::slice::Iter<'a, Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Operation> for Operations {
    fn from_iter<T: IntoIterator<Item = Operation>>(iter: T) -> Self {
        Operations(iter.into_iter().collect())
    }
}
