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

//! In-process auto-termination.
//!
//! The controller watches the collector's log and cancels the run once
//! measured throughput has stabilized: the active range is split into
//! equal segments and the trailing segments are compared against the last
//! one. Segments with byte traffic compare MiB/s; byte-less workloads
//! compare objects per second.

use crate::collector::Collector;
use gale_analyze::segment::{SegmentOptions, segment};
use gale_record::Operations;
use time::Duration;
use tokio_util::sync::CancellationToken;

impl Collector {
    /// Spawns the auto-termination controller.
    ///
    /// Returns a child of `ctx` that is cancelled when throughput is
    /// stable: every one of the `want_samples` segments preceding the
    /// baseline (the last of `split_into` equal segments over the active
    /// range) is within `threshold` of the baseline rate. No decision is
    /// attempted before the active range exceeds
    /// `min_dur * split_into / want_samples`.
    ///
    /// `op_type` restricts the watched records; empty watches all.
    ///
    /// # Panics
    ///
    /// When `split_into` is zero or `want_samples >= split_into`.
    pub fn auto_term(
        &self,
        ctx: &CancellationToken,
        op_type: &str,
        threshold: f64,
        want_samples: usize,
        split_into: usize,
        min_dur: Duration,
    ) -> CancellationToken {
        assert!(split_into > 0, "split_into must be positive");
        assert!(
            want_samples < split_into,
            "want_samples ({want_samples}) must be less than split_into ({split_into})"
        );
        let derived = ctx.child_token();
        let handle = derived.clone();
        let log = std::sync::Arc::clone(&self.log);
        let op_type = op_type.to_string();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = handle.cancelled() => return,
                    _ = tick.tick() => {}
                }
                let snapshot: Operations = {
                    let log = log.lock().expect("collector log lock is poisoned");
                    log.iter()
                        .filter(|o| op_type.is_empty() || o.op_type == op_type)
                        .cloned()
                        .collect()
                };
                if throughput_stable(&snapshot, threshold, want_samples, split_into, min_dur) {
                    tracing::debug!(
                        records = snapshot.len(),
                        "throughput is stable, cancelling the run"
                    );
                    handle.cancel();
                    return;
                }
            }
        });
        derived
    }
}

/// Decides whether the recorded throughput has stabilized.
///
/// Never panics on short or empty data; it just answers `false` until
/// enough of the run is visible.
pub(crate) fn throughput_stable(
    ops: &Operations,
    threshold: f64,
    want_samples: usize,
    split_into: usize,
    min_dur: Duration,
) -> bool {
    if want_samples == 0 {
        return false;
    }
    let Some((active_start, active_end)) = ops.active_time_range(false) else {
        return false;
    };
    let span = active_end - active_start;
    if span <= min_dur * (split_into as i32) / (want_samples as i32) {
        return false;
    }
    let per = span / (split_into as i32);
    if per <= Duration::ZERO {
        return false;
    }
    let opts = SegmentOptions::new(per)
        .with_from(active_start)
        .with_all_threads(false)
        .with_multi_op(true);
    let Ok(segments) = segment(ops, &opts) else {
        return false;
    };
    if segments.len() < want_samples + 1 {
        return false;
    }
    let baseline = segments.last().expect("at least one segment");
    let samples = &segments.as_slice()[segments.len() - 1 - want_samples..segments.len() - 1];
    let base_mib = baseline.mib_per_sec();
    samples.iter().all(|s| {
        if base_mib > 0.0 {
            (s.mib_per_sec() - base_mib).abs() <= threshold * base_mib
        } else {
            let base_obj = baseline.objects_per_sec();
            (s.objects_per_sec() - base_obj).abs() <= threshold * base_obj
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_op;
    use gale_record::{Categories, Operation, op};
    use time::macros::datetime;

    // A constant-rate stream: one 1 ms operation per millisecond.
    fn steady(millis: i64, size: i64) -> Operations {
        (0..millis)
            .map(|i| {
                let start = datetime!(2025-06-01 10:00:00 UTC) + Duration::milliseconds(i);
                Operation {
                    op_type: op::GET.into(),
                    client_id: "c1".into(),
                    endpoint: "http://a".into(),
                    thread: 0,
                    object_count: 1,
                    size_bytes: size,
                    file: format!("obj-{i}"),
                    start,
                    first_byte: None,
                    end: start + Duration::milliseconds(1),
                    err: String::new(),
                    categories: Categories::empty(),
                }
            })
            .collect()
    }

    #[test]
    fn too_little_data_is_never_stable() {
        let ops = steady(3_000, 1000);
        // min_dur 1s with 25/7 sampling requires > ~3.57s of active range.
        assert!(!throughput_stable(&ops, 0.05, 7, 25, Duration::seconds(1)));
        assert!(!throughput_stable(&Operations::new(), 0.05, 7, 25, Duration::seconds(1)));
    }

    #[test]
    fn constant_throughput_is_stable() {
        let ops = steady(5_000, 1000);
        assert!(throughput_stable(&ops, 0.05, 7, 25, Duration::seconds(1)));
    }

    #[test]
    fn byteless_stream_compares_objects() {
        let ops = steady(5_000, 0);
        assert!(throughput_stable(&ops, 0.05, 7, 25, Duration::seconds(1)));
    }

    #[test]
    fn ramping_throughput_is_not_stable() {
        // Operation sizes keep growing, so the trailing segments never
        // agree with the baseline.
        let ops: Operations = (0..5_000i64)
            .map(|i| {
                let start = datetime!(2025-06-01 10:00:00 UTC) + Duration::milliseconds(i);
                Operation {
                    op_type: op::GET.into(),
                    client_id: "c1".into(),
                    endpoint: "http://a".into(),
                    thread: 0,
                    object_count: 1,
                    size_bytes: 1000 + 10 * i,
                    file: format!("obj-{i}"),
                    start,
                    first_byte: None,
                    end: start + Duration::milliseconds(1),
                    err: String::new(),
                    categories: Categories::empty(),
                }
            })
            .collect();
        assert!(!throughput_stable(&ops, 0.05, 7, 25, Duration::seconds(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn controller_cancels_on_stable_throughput() {
        let collector = Collector::new();
        let ctx = CancellationToken::new();
        let derived = collector.auto_term(&ctx, op::GET, 0.05, 7, 25, Duration::milliseconds(100));

        let tx = collector.sender();
        for op in steady(5_000, 1000) {
            tx.send(op).await.unwrap();
        }
        drop(tx);

        tokio::time::timeout(std::time::Duration::from_secs(30), derived.cancelled())
            .await
            .expect("the controller should cancel the derived context");
        assert!(!ctx.is_cancelled(), "only the derived context is cancelled");
        collector.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn controller_exits_on_external_cancellation() {
        let collector = Collector::new();
        let ctx = CancellationToken::new();
        let derived = collector.auto_term(&ctx, "", 0.05, 2, 10, Duration::seconds(1));
        let tx = collector.sender();
        tx.send(sample_op(op::GET, 0)).await.unwrap();
        ctx.cancel();
        derived.cancelled().await;
        drop(tx);
        collector.close().await;
    }

    #[test]
    #[should_panic(expected = "want_samples")]
    fn bad_sampling_preconditions_panic() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        let collector = Collector::new();
        let ctx = CancellationToken::new();
        let _ = collector.auto_term(&ctx, "", 0.05, 10, 10, Duration::seconds(1));
    }
}
