//! Aggregate statistics over cold-start samples and warm request results.
//!
//! Percentiles are nearest-rank over the successful subset only. When no
//! sample succeeded every aggregate stays at its zero default.

use std::time::Duration;

use crate::contract::{ColdStartMeasurement, WarmRequestResult};

/// Nearest-rank percentile of an ascending slice.
///
/// Returns the first element for `p <= 0`, the last for `p >= 100`, otherwise
/// the element at `floor(p * n / 100)` clamped to `n - 1`.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let Some(first) = sorted.first() else {
        return Duration::ZERO;
    };
    let last_index = sorted.len() - 1;
    if p <= 0.0 {
        return *first;
    }
    if p >= 100.0 {
        return sorted[last_index];
    }
    let index = ((p * sorted.len() as f64) / 100.0).floor() as usize;
    sorted[index.min(last_index)]
}

fn average(values: &[Duration]) -> Duration {
    if values.is_empty() {
        return Duration::ZERO;
    }
    let total: u128 = values.iter().map(Duration::as_nanos).sum();
    let avg = total / values.len() as u128;
    Duration::from_nanos(u64::try_from(avg).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySummary {
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

impl LatencySummary {
    /// Summarize an unsorted latency list.
    pub fn from_unsorted(mut values: Vec<Duration>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_unstable();
        Self {
            min: values[0],
            max: values[values.len() - 1],
            avg: average(&values),
            p50: percentile(&values, 50.0),
            p95: percentile(&values, 95.0),
            p99: percentile(&values, 99.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColdStartStats {
    pub samples: Vec<ColdStartMeasurement>,
    pub ttfb: LatencySummary,
    pub container_startup_min: Duration,
    pub container_startup_max: Duration,
    pub container_startup_avg: Duration,
    pub success_count: usize,
    pub failure_count: usize,
}

impl ColdStartStats {
    pub fn from_samples(samples: Vec<ColdStartMeasurement>) -> Self {
        let mut stats = Self {
            samples,
            ..Self::default()
        };
        stats.calculate();
        stats
    }

    /// Recompute every aggregate from `samples`.
    pub fn calculate(&mut self) {
        let successful: Vec<&ColdStartMeasurement> =
            self.samples.iter().filter(|s| s.is_success()).collect();

        self.success_count = successful.len();
        self.failure_count = self.samples.len() - successful.len();
        self.ttfb = LatencySummary::from_unsorted(successful.iter().map(|s| s.ttfb).collect());

        let startups: Vec<Duration> = successful
            .iter()
            .filter_map(|s| s.container_startup)
            .filter(|d| !d.is_zero())
            .collect();
        self.container_startup_min = startups.iter().min().copied().unwrap_or_default();
        self.container_startup_max = startups.iter().max().copied().unwrap_or_default();
        self.container_startup_avg = average(&startups);
    }

    pub fn total(&self) -> usize {
        self.samples.len()
    }

    pub fn has_successes(&self) -> bool {
        self.success_count > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmRequestStats {
    pub total_requests: usize,
    pub successful: usize,
    pub failed: usize,
    pub latency: LatencySummary,
    pub duration: Duration,
    pub requests_per_second: f64,
}

impl WarmRequestStats {
    /// Aggregate a finished batch that took `duration` of wall-clock time.
    pub fn from_results(results: &[WarmRequestResult], duration: Duration) -> Self {
        let latencies: Vec<Duration> = results
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.latency)
            .collect();
        let successful = latencies.len();
        let requests_per_second = if successful > 0 && !duration.is_zero() {
            results.len() as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_requests: results.len(),
            successful,
            failed: results.len() - successful,
            latency: LatencySummary::from_unsorted(latencies),
            duration,
            requests_per_second,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total_requests as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn ms(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|v| Duration::from_millis(*v)).collect()
    }

    fn sample(ttfb_ms: u64, status_code: u16, error: Option<&str>) -> ColdStartMeasurement {
        ColdStartMeasurement {
            timestamp: Utc.with_ymd_and_hms(2026, 1, 22, 10, 0, 0).unwrap(),
            ttfb: Duration::from_millis(ttfb_ms),
            container_startup: None,
            status_code,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn percentile_boundaries() {
        let sorted = ms(&[10, 20, 30, 40, 50]);
        assert_eq!(percentile(&sorted, 0.0), Duration::from_millis(10));
        assert_eq!(percentile(&sorted, -5.0), Duration::from_millis(10));
        assert_eq!(percentile(&sorted, 100.0), Duration::from_millis(50));
        assert_eq!(percentile(&sorted, 150.0), Duration::from_millis(50));
        assert_eq!(percentile(&sorted, 50.0), Duration::from_millis(30));
        assert_eq!(percentile(&sorted, 99.0), Duration::from_millis(50));
        assert_eq!(percentile(&[], 50.0), Duration::ZERO);
    }

    #[test]
    fn percentile_is_monotonic_in_p() {
        let sorted: Vec<Duration> = (1..=37).map(|v| Duration::from_millis(v * 3)).collect();
        let mut previous = Duration::ZERO;
        for step in 0..=200 {
            let value = percentile(&sorted, step as f64 * 0.5);
            assert!(value >= previous, "p={} went backwards", step as f64 * 0.5);
            previous = value;
        }
    }

    #[test]
    fn cold_start_stats_over_five_samples() {
        let stats = ColdStartStats::from_samples(vec![
            sample(50, 200, None),
            sample(10, 200, None),
            sample(40, 200, None),
            sample(20, 200, None),
            sample(30, 200, None),
        ]);

        assert_eq!(stats.ttfb.p50, Duration::from_millis(30));
        assert_eq!(stats.ttfb.min, Duration::from_millis(10));
        assert_eq!(stats.ttfb.max, Duration::from_millis(50));
        assert_eq!(stats.ttfb.avg, Duration::from_millis(30));
        assert_eq!(stats.success_count, 5);
        assert_eq!(stats.failure_count, 0);
    }

    #[test]
    fn failures_are_counted_but_excluded_from_percentiles() {
        let stats = ColdStartStats::from_samples(vec![
            sample(10, 200, None),
            sample(9_000, 503, None),
            sample(0, 0, Some("connection reset")),
            sample(20, 200, None),
        ]);

        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failure_count, 2);
        assert_eq!(stats.success_count + stats.failure_count, stats.total());
        assert_eq!(stats.ttfb.max, Duration::from_millis(20));
    }

    #[test]
    fn zero_successes_leave_aggregates_at_zero() {
        let stats = ColdStartStats::from_samples(vec![
            sample(0, 0, Some("scale-to-zero timeout")),
            sample(120, 500, None),
        ]);
        assert_eq!(stats.ttfb, LatencySummary::default());
        assert_eq!(stats.container_startup_avg, Duration::ZERO);
        assert_eq!(stats.failure_count, 2);

        let warm = WarmRequestStats::from_results(
            &[WarmRequestResult {
                latency: Duration::from_millis(5),
                status_code: 0,
                error: Some("refused".to_string()),
            }],
            Duration::from_secs(1),
        );
        assert_eq!(warm.latency, LatencySummary::default());
        assert_eq!(warm.requests_per_second, 0.0);
        assert_eq!(warm.failed, 1);
    }

    #[test]
    fn container_startup_uses_enriched_successes_only() {
        let mut enriched = sample(900, 200, None);
        enriched.container_startup = Some(Duration::from_millis(400));
        let mut other = sample(700, 200, None);
        other.container_startup = Some(Duration::from_millis(200));
        let mut failed = sample(0, 0, Some("timeout"));
        failed.container_startup = Some(Duration::from_secs(9));

        let stats = ColdStartStats::from_samples(vec![enriched, other, failed, sample(500, 200, None)]);
        assert_eq!(stats.container_startup_min, Duration::from_millis(200));
        assert_eq!(stats.container_startup_max, Duration::from_millis(400));
        assert_eq!(stats.container_startup_avg, Duration::from_millis(300));
    }

    #[test]
    fn warm_rps_counts_every_issued_request() {
        let mut results: Vec<WarmRequestResult> = (1..=9)
            .map(|i| WarmRequestResult {
                latency: Duration::from_millis(i),
                status_code: 200,
                error: None,
            })
            .collect();
        results.push(WarmRequestResult {
            latency: Duration::from_millis(1),
            status_code: 401,
            error: None,
        });

        let stats = WarmRequestStats::from_results(&results, Duration::from_secs(2));
        assert_eq!(stats.total_requests, 10);
        assert_eq!(stats.successful, 9);
        assert_eq!(stats.failed, 1);
        assert!((stats.requests_per_second - 5.0).abs() < f64::EPSILON);
        assert!((stats.success_rate() - 90.0).abs() < 1e-9);
        assert!(stats.latency.p50 <= stats.latency.p95);
        assert!(stats.latency.p95 <= stats.latency.p99);
    }
}
