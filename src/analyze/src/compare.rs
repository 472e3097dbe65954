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

//! Before/after comparison of two benchmark runs.

use crate::segment::{SegmentOptions, Segments, segment};
use crate::stats::{self, Ttfb};
use gale_record::{Error, Operations, Result};
use time::Duration;

/// One compared value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Metric {
    pub before: f64,
    pub after: f64,
}

impl Metric {
    fn new(before: f64, after: f64) -> Self {
        Self { before, after }
    }

    /// The absolute change.
    pub fn delta(&self) -> f64 {
        self.after - self.before
    }

    /// The percentage change relative to the before value.
    pub fn percent(&self) -> f64 {
        if self.before == 0.0 {
            return 0.0;
        }
        (self.after - self.before) / self.before * 100.0
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.2} -> {:.2} ({:+.1}%)",
            self.before,
            self.after,
            self.percent()
        )
    }
}

/// Segment-level rates compared at one point of the distribution.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SegmentComparison {
    /// Credited bytes per second, in MiB.
    pub mib_per_sec: Metric,
    /// Credited objects per second.
    pub objects_per_sec: Metric,
    /// Completed operations per second.
    pub ops_per_sec: Metric,
}

/// Time-to-first-byte compared percentile by percentile, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TtfbComparison {
    pub average: Metric,
    pub best: Metric,
    pub worst: Metric,
    pub p25: Metric,
    pub median: Metric,
    pub p75: Metric,
    pub p90: Metric,
    pub p99: Metric,
}

/// Request durations compared percentile by percentile, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DurationComparison {
    pub average: Metric,
    pub fastest: Metric,
    pub slowest: Metric,
    pub p25: Metric,
    pub median: Metric,
    pub p75: Metric,
    pub p90: Metric,
    pub p99: Metric,
}

/// The full report produced by [compare].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Comparison {
    /// The operation type both runs consist of.
    pub op: String,
    /// Whether rates compare objects per second instead of bytes.
    pub byteless: bool,
    pub average: SegmentComparison,
    pub slowest: SegmentComparison,
    pub median: SegmentComparison,
    pub fastest: SegmentComparison,
    /// Present when both runs recorded first-byte stamps.
    pub ttfb: Option<TtfbComparison>,
    pub durations: DurationComparison,
}

fn ms(d: Duration) -> f64 {
    d.as_seconds_f64() * 1000.0
}

fn segment_sorted(ops: &Operations, analysis: Duration, byteless: bool) -> Result<Segments> {
    let opts = SegmentOptions::new(analysis);
    let mut segments = segment(ops, &opts)?;
    if segments.is_empty() {
        return Err(Error::config(
            "run too short for the requested analysis duration",
        ));
    }
    if byteless {
        segments.sort_by_objs_per_sec();
    } else {
        segments.sort_by_throughput();
    }
    Ok(segments)
}

fn at(before: &Segments, after: &Segments, m: f64) -> SegmentComparison {
    let b = before.median(m).expect("segments are never empty here");
    let a = after.median(m).expect("segments are never empty here");
    SegmentComparison {
        mib_per_sec: Metric::new(b.mib_per_sec(), a.mib_per_sec()),
        objects_per_sec: Metric::new(b.objects_per_sec(), a.objects_per_sec()),
        ops_per_sec: Metric::new(b.ops_per_sec(), a.ops_per_sec()),
    }
}

fn ttfb_comparison(before: &Ttfb, after: &Ttfb) -> Option<TtfbComparison> {
    if before.is_empty() || after.is_empty() {
        return None;
    }
    Some(TtfbComparison {
        average: Metric::new(ms(before.average), ms(after.average)),
        best: Metric::new(ms(before.best), ms(after.best)),
        worst: Metric::new(ms(before.worst), ms(after.worst)),
        p25: Metric::new(ms(before.p25), ms(after.p25)),
        median: Metric::new(ms(before.median), ms(after.median)),
        p75: Metric::new(ms(before.p75), ms(after.p75)),
        p90: Metric::new(ms(before.p90), ms(after.p90)),
        p99: Metric::new(ms(before.p99), ms(after.p99)),
    })
}

/// Compares two runs of the same operation type.
///
/// Each run is segmented into `analysis`-wide windows, sorted by throughput
/// (objects per second when neither run moved bytes), and compared at the
/// slowest, median, and fastest segments as well as across averages.
/// Runs of mismatched operation types or containing failed operations are
/// rejected.
pub fn compare(before: &Operations, after: &Operations, analysis: Duration) -> Result<Comparison> {
    let op = before
        .first_op_type()
        .ok_or_else(|| Error::config("the before run is empty"))?
        .to_string();
    if after.first_op_type() != Some(op.as_str()) {
        return Err(Error::config(format!(
            "operation type mismatch: {:?} vs {:?}",
            op,
            after.first_op_type().unwrap_or_default()
        )));
    }
    if before.is_mixed() || after.is_mixed() {
        return Err(Error::config(
            "runs with mixed operation types cannot be compared; filter to one type",
        ));
    }
    if before.total_errors() > 0 || after.total_errors() > 0 {
        return Err(Error::config("runs with errors cannot be compared"));
    }

    let byteless = before.total_bytes() == 0 && after.total_bytes() == 0;
    let segs_before = segment_sorted(before, analysis, byteless)?;
    let segs_after = segment_sorted(after, analysis, byteless)?;

    let average = SegmentComparison {
        mib_per_sec: Metric::new(
            segs_before.avg_bytes_per_sec() / (1024.0 * 1024.0),
            segs_after.avg_bytes_per_sec() / (1024.0 * 1024.0),
        ),
        objects_per_sec: Metric::new(
            segs_before.avg_objects_per_sec(),
            segs_after.avg_objects_per_sec(),
        ),
        ops_per_sec: Metric::new(segs_before.avg_ops_per_sec(), segs_after.avg_ops_per_sec()),
    };

    let dur_before = stats::durations(before);
    let dur_after = stats::durations(after);
    let durations = DurationComparison {
        average: Metric::new(ms(dur_before.average), ms(dur_after.average)),
        fastest: Metric::new(ms(dur_before.fastest), ms(dur_after.fastest)),
        slowest: Metric::new(ms(dur_before.slowest), ms(dur_after.slowest)),
        p25: Metric::new(ms(dur_before.p25), ms(dur_after.p25)),
        median: Metric::new(ms(dur_before.median), ms(dur_after.median)),
        p75: Metric::new(ms(dur_before.p75), ms(dur_after.p75)),
        p90: Metric::new(ms(dur_before.p90), ms(dur_after.p90)),
        p99: Metric::new(ms(dur_before.p99), ms(dur_after.p99)),
    };

    Ok(Comparison {
        op,
        byteless,
        average,
        slowest: at(&segs_before, &segs_after, 0.0),
        median: at(&segs_before, &segs_after, 0.5),
        fastest: at(&segs_before, &segs_after, 1.0),
        ttfb: ttfb_comparison(&stats::ttfb(before), &stats::ttfb(after)),
        durations,
    })
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Operation: {}", self.op)?;
        let rate = |s: &SegmentComparison| {
            if self.byteless {
                format!("{} obj/s", s.objects_per_sec)
            } else {
                format!("{} MiB/s", s.mib_per_sec)
            }
        };
        writeln!(f, "  Average: {}", rate(&self.average))?;
        writeln!(f, "  Slowest: {}", rate(&self.slowest))?;
        writeln!(f, "  Median:  {}", rate(&self.median))?;
        writeln!(f, "  Fastest: {}", rate(&self.fastest))?;
        writeln!(f, "  Duration: median {} ms", self.durations.median)?;
        if let Some(ttfb) = &self.ttfb {
            writeln!(f, "  TTFB: median {} ms", ttfb.median)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gale_record::{Categories, Operation, op};
    use time::macros::datetime;

    // A run of back-to-back one-second ops, each moving `bps` bytes.
    fn steady_run(op_type: &str, seconds: i64, bps: i64, ttfb: bool) -> Operations {
        (0..seconds)
            .map(|i| {
                let start = datetime!(2025-06-01 10:00:00 UTC) + Duration::seconds(i);
                Operation {
                    op_type: op_type.into(),
                    client_id: "c1".into(),
                    endpoint: "http://a".into(),
                    thread: 0,
                    object_count: 1,
                    size_bytes: bps,
                    file: format!("obj-{i}"),
                    start,
                    first_byte: ttfb.then(|| start + Duration::milliseconds(20)),
                    end: start + Duration::seconds(1),
                    err: String::new(),
                    categories: Categories::empty(),
                }
            })
            .collect()
    }

    #[test]
    fn doubled_throughput_reports_plus_hundred_percent() -> anyhow::Result<()> {
        let before = steady_run(op::GET, 60, 1024 * 1024, true);
        let after = steady_run(op::GET, 60, 2 * 1024 * 1024, true);
        let cmp = compare(&before, &after, Duration::seconds(5))?;
        assert!(!cmp.byteless);
        assert!((cmp.median.mib_per_sec.before - 1.0).abs() < 0.01);
        assert!((cmp.median.mib_per_sec.after - 2.0).abs() < 0.01);
        assert!((cmp.median.mib_per_sec.percent() - 100.0).abs() < 1.0);
        assert!((cmp.average.mib_per_sec.delta() - 1.0).abs() < 0.01);
        let ttfb = cmp.ttfb.expect("both runs have first-byte stamps");
        assert!((ttfb.median.before - 20.0).abs() < 0.1);
        Ok(())
    }

    #[test]
    fn byteless_runs_compare_objects() -> anyhow::Result<()> {
        let before = steady_run(op::STAT, 60, 0, false);
        let after = steady_run(op::STAT, 60, 0, false);
        let cmp = compare(&before, &after, Duration::seconds(5))?;
        assert!(cmp.byteless);
        assert!(cmp.ttfb.is_none());
        assert!((cmp.median.objects_per_sec.percent()).abs() < 0.01);
        Ok(())
    }

    #[test]
    fn mismatched_op_types_are_rejected() {
        let before = steady_run(op::GET, 60, 1024, false);
        let after = steady_run(op::PUT, 60, 1024, false);
        let err = compare(&before, &after, Duration::seconds(5)).unwrap_err();
        assert_eq!(err.kind(), gale_record::ErrorKind::Config);
    }

    #[test]
    fn runs_with_errors_are_rejected() {
        let before = steady_run(op::GET, 60, 1024, false);
        let mut after = steady_run(op::GET, 60, 1024, false);
        let mut failed = after.as_slice()[0].clone();
        failed.err = "timeout".into();
        after.push(failed);
        let err = compare(&before, &after, Duration::seconds(5)).unwrap_err();
        assert_eq!(err.kind(), gale_record::ErrorKind::Config);
    }

    #[test]
    fn short_runs_are_rejected() {
        let before = steady_run(op::GET, 3, 1024, false);
        let after = steady_run(op::GET, 3, 1024, false);
        let err = compare(&before, &after, Duration::seconds(30)).unwrap_err();
        assert_eq!(err.kind(), gale_record::ErrorKind::Config);
    }

    #[test]
    fn report_renders() -> anyhow::Result<()> {
        let before = steady_run(op::GET, 60, 1024 * 1024, true);
        let after = steady_run(op::GET, 60, 2 * 1024 * 1024, true);
        let cmp = compare(&before, &after, Duration::seconds(5))?;
        let report = format!("{cmp}");
        assert!(report.contains("Operation: GET"), "{report}");
        assert!(report.contains("Median:"), "{report}");
        assert!(report.contains("+100.0%"), "{report}");
        Ok(())
    }
}
