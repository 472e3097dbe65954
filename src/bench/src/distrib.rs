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

//! Weighted operation dispatch.
//!
//! Mixed workloads pick the next operation from a precomputed shuffled
//! cycle rather than rolling dice per request: each operation appears in
//! the cycle in proportion to its weight, so observed frequencies are
//! deterministic, while the seeded shuffle interleaves the kinds. All
//! workers share a single cursor into the cycle.

use gale_record::{Error, Result};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use std::sync::Mutex;

/// The length of the dispatch cycle.
const SCHEDULE_SIZE: usize = 1000;

/// Normalizes weights into probabilities.
///
/// Rejects negative weights and a non-positive total. Normalizing an
/// already-normalized vector returns it unchanged.
pub fn normalize(weights: &[f64]) -> Result<Vec<f64>> {
    if let Some(w) = weights.iter().find(|w| **w < 0.0) {
        return Err(Error::config(format!("weights must not be negative, got {w}")));
    }
    let total: f64 = weights.iter().sum();
    if !(total > 0.0) {
        return Err(Error::config(format!(
            "the total weight must be positive, got {total}"
        )));
    }
    Ok(weights.iter().map(|w| w / total).collect())
}

/// A shuffled dispatch cycle shared by all workers.
#[derive(Debug)]
pub struct Schedule<T> {
    entries: Vec<T>,
    cursor: Mutex<usize>,
}

impl<T: Clone> Schedule<T> {
    /// Builds the cycle from `(operation, weight)` pairs.
    ///
    /// Each operation appears `round(probability * 1000)` times; the cycle
    /// is shuffled with the given seed so repeated runs dispatch in the
    /// same order.
    pub fn new(weighted: &[(T, f64)], seed: u64) -> Result<Self> {
        let probs = normalize(&weighted.iter().map(|(_, w)| *w).collect::<Vec<_>>())?;
        let mut entries = Vec::with_capacity(SCHEDULE_SIZE);
        for ((op, _), p) in weighted.iter().zip(probs) {
            let count = (p * SCHEDULE_SIZE as f64).round() as usize;
            entries.extend(std::iter::repeat_n(op.clone(), count));
        }
        if entries.is_empty() {
            return Err(Error::config("no operation received a positive weight"));
        }
        entries.shuffle(&mut rand::rngs::StdRng::seed_from_u64(seed));
        Ok(Self {
            entries,
            cursor: Mutex::new(0),
        })
    }

    /// Returns the next operation, advancing the shared cursor.
    pub fn next_op(&self) -> T {
        let mut cursor = self.cursor.lock().expect("schedule cursor lock is poisoned");
        let op = self.entries[*cursor].clone();
        *cursor = (*cursor + 1) % self.entries.len();
        op
    }

    /// The cycle length.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How often `op` appears in one cycle.
    pub fn count(&self, op: &T) -> usize
    where
        T: PartialEq,
    {
        self.entries.iter().filter(|e| *e == op).count()
    }
}
