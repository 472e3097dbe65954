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

//! Latency and throughput statistics over operation logs.

use gale_record::Operations;
use time::Duration;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = (p * sorted.len() as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// The time-to-first-byte distribution of a run.
///
/// Default (all zero) when no operation recorded a first-byte stamp.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Ttfb {
    pub average: Duration,
    pub best: Duration,
    pub worst: Duration,
    pub p25: Duration,
    pub median: Duration,
    pub p75: Duration,
    pub p90: Duration,
    pub p99: Duration,
}

impl Ttfb {
    /// Whether any sample carried a first-byte stamp.
    pub fn is_empty(&self) -> bool {
        *self == Ttfb::default()
    }
}

impl std::fmt::Display for Ttfb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "TTFB: no samples");
        }
        write!(
            f,
            "TTFB: avg {:.1}ms, best {:.1}ms, 25th {:.1}ms, median {:.1}ms, \
             75th {:.1}ms, 90th {:.1}ms, 99th {:.1}ms, worst {:.1}ms",
            ms(self.average),
            ms(self.best),
            ms(self.p25),
            ms(self.median),
            ms(self.p75),
            ms(self.p90),
            ms(self.p99),
            ms(self.worst),
        )
    }
}

fn ms(d: Duration) -> f64 {
    d.as_seconds_f64() * 1000.0
}

/// Computes the time-to-first-byte distribution.
///
/// Operations without a first-byte stamp do not contribute.
pub fn ttfb(ops: &Operations) -> Ttfb {
    let mut samples: Vec<Duration> = ops.iter().filter_map(|o| o.ttfb()).collect();
    if samples.is_empty() {
        return Ttfb::default();
    }
    samples.sort();
    let total: i128 = samples.iter().map(|d| d.whole_nanoseconds()).sum();
    Ttfb {
        average: Duration::nanoseconds((total / samples.len() as i128) as i64),
        best: samples[0],
        worst: samples[samples.len() - 1],
        p25: percentile(&samples, 0.25),
        median: percentile(&samples, 0.5),
        p75: percentile(&samples, 0.75),
        p90: percentile(&samples, 0.9),
        p99: percentile(&samples, 0.99),
    }
}

/// The request-duration distribution of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DurationStats {
    pub average: Duration,
    pub std_dev: Duration,
    pub fastest: Duration,
    pub slowest: Duration,
    pub p25: Duration,
    pub median: Duration,
    pub p75: Duration,
    pub p90: Duration,
    pub p99: Duration,
}

/// Computes the request-duration distribution.
pub fn durations(ops: &Operations) -> DurationStats {
    if ops.is_empty() {
        return DurationStats::default();
    }
    let mut samples: Vec<Duration> = ops.iter().map(|o| o.duration()).collect();
    samples.sort();
    DurationStats {
        average: ops.avg_duration(),
        std_dev: ops.std_dev(),
        fastest: samples[0],
        slowest: samples[samples.len() - 1],
        p25: percentile(&samples, 0.25),
        median: percentile(&samples, 0.5),
        p75: percentile(&samples, 0.75),
        p90: percentile(&samples, 0.9),
        p99: percentile(&samples, 0.99),
    }
}

/// Per-operation throughput in bytes per second.
///
/// Divides the transferred bytes by the *summed* per-operation durations
/// rather than the wall clock, so the result is independent of worker
/// concurrency. Failed operations contribute neither bytes nor time.
pub fn throughput(ops: &Operations) -> f64 {
    let ok = ops.ok_only();
    let elapsed: i128 = ok.iter().map(|o| o.duration().whole_nanoseconds()).sum();
    if elapsed <= 0 {
        return 0.0;
    }
    let bytes = ok.total_bytes() as f64;
    bytes / (elapsed as f64 / 1e9)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gale_record::{Categories, Operation, op};
    use time::macros::datetime;

    fn read_op(start_ms: i64, dur_ms: i64, ttfb_ms: Option<i64>, size: i64) -> Operation {
        let start = datetime!(2025-06-01 10:00:00 UTC) + Duration::milliseconds(start_ms);
        Operation {
            op_type: op::GET.into(),
            client_id: "c1".into(),
            endpoint: "http://a".into(),
            thread: 0,
            object_count: 1,
            size_bytes: size,
            file: "obj".into(),
            start,
            first_byte: ttfb_ms.map(|ms| start + Duration::milliseconds(ms)),
            end: start + Duration::milliseconds(dur_ms),
            err: String::new(),
            categories: Categories::empty(),
        }
    }

    #[test]
    fn ttfb_distribution() {
        let ops: Operations = (1..=100)
            .map(|i| read_op(i * 10, 500, Some(i), 1000))
            .collect();
        let got = ttfb(&ops);
        assert!(!got.is_empty());
        assert_eq!(got.best, Duration::milliseconds(1));
        assert_eq!(got.worst, Duration::milliseconds(100));
        // round(0.5 * 100) = 50, zero-based index into 1..=100.
        assert_eq!(got.median, Duration::milliseconds(51));
        assert_eq!(got.p99, Duration::milliseconds(100));
        assert_eq!(got.average, Duration::milliseconds(50) + Duration::microseconds(500));
    }

    #[test]
    fn ttfb_empty_when_no_first_byte() {
        let ops: Operations = (0..10).map(|i| read_op(i * 10, 100, None, 0)).collect();
        assert!(ttfb(&ops).is_empty());
        assert_eq!(format!("{}", ttfb(&ops)), "TTFB: no samples");
    }

    #[test]
    fn duration_distribution() {
        let ops: Operations = (1..=10).map(|i| read_op(0, i * 100, None, 0)).collect();
        let got = durations(&ops);
        assert_eq!(got.fastest, Duration::milliseconds(100));
        assert_eq!(got.slowest, Duration::milliseconds(1000));
        assert_eq!(got.average, Duration::milliseconds(550));
        assert!(got.std_dev > Duration::ZERO);
    }

    #[test]
    fn throughput_ignores_wall_clock_gaps() {
        // Two 1 s ops of 1 MiB each, far apart in wall time: per-op
        // throughput is still 1 MiB/s.
        let a = read_op(0, 1000, None, 1024 * 1024);
        let b = read_op(3_600_000, 1000, None, 1024 * 1024);
        let ops = Operations::from(vec![a, b]);
        let got = throughput(&ops);
        assert!((got - 1024.0 * 1024.0).abs() < 1.0, "{got}");
    }

    #[test]
    fn throughput_excludes_failures() {
        let mut failed = read_op(0, 1000, None, 1024);
        failed.err = "timeout".into();
        let ok = read_op(2000, 1000, None, 2048);
        let ops = Operations::from(vec![failed, ok]);
        assert!((throughput(&ops) - 2048.0).abs() < 1.0);
        assert_eq!(throughput(&Operations::new()), 0.0);
    }
}
