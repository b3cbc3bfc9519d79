//! Strategy and global recovery metrics.
//!
//! Each strategy kind owns one mutex-guarded bucket so concurrent loops
//! recording different strategies never contend. Global totals,
//! distributions and rolling windows share a second lock.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ironloop_core::{ErrorKind, Severity, StrategyKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use crate::monitor::ResourceUsage;

/// Counters for one strategy kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrategyMetrics {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Running mean of execution time
    pub average_time_ms: f64,
    /// Resource usage at the most recent execution
    pub resource_usage: ResourceUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WindowStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

impl WindowStats {
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }
}

/// Snapshot of everything the tracker knows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryMetrics {
    pub total_attempts: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    /// In `[0, 1]`
    pub recovery_success_rate: f64,
    pub average_recovery_time_ms: f64,
    /// Fraction of recoveries per error kind
    pub error_distribution: BTreeMap<String, f64>,
    /// Fraction of recoveries per severity
    pub severity_distribution: BTreeMap<String, f64>,
    pub strategies: BTreeMap<String, StrategyMetrics>,
    pub hourly: WindowStats,
    pub daily: WindowStats,
    pub weekly: WindowStats,
}

#[derive(Default)]
struct GlobalState {
    total: u64,
    successes: u64,
    failures: u64,
    total_time_ms: f64,
    error_counts: HashMap<ErrorKind, u64>,
    severity_counts: HashMap<Severity, u64>,
    history: VecDeque<(DateTime<Utc>, bool)>,
}

/// Thread-safe metrics recorder shared by every loop using one manager.
pub struct MetricsTracker {
    buckets: HashMap<StrategyKind, Mutex<StrategyMetrics>>,
    global: Mutex<GlobalState>,
}

/// One executed recovery, as seen by the tracker.
#[derive(Debug, Clone, Copy)]
pub struct RecordedRun {
    pub strategy: StrategyKind,
    pub error_kind: ErrorKind,
    pub severity: Severity,
    pub success: bool,
    pub duration: Duration,
    pub resource_usage: ResourceUsage,
}

impl MetricsTracker {
    const RETENTION_DAYS: i64 = 7;

    pub fn new() -> Self {
        let buckets = StrategyKind::ALL
            .into_iter()
            .map(|kind| (kind, Mutex::new(StrategyMetrics::default())))
            .collect();
        Self {
            buckets,
            global: Mutex::new(GlobalState::default()),
        }
    }

    pub fn record(&self, run: RecordedRun) {
        self.record_at(run, Utc::now());
    }

    fn record_at(&self, run: RecordedRun, now: DateTime<Utc>) {
        let elapsed_ms = run.duration.as_secs_f64() * 1000.0;

        if let Some(bucket) = self.buckets.get(&run.strategy) {
            let mut metrics = bucket.lock();
            metrics.attempts += 1;
            if run.success {
                metrics.successes += 1;
            } else {
                metrics.failures += 1;
            }
            metrics.average_time_ms +=
                (elapsed_ms - metrics.average_time_ms) / metrics.attempts as f64;
            metrics.resource_usage = run.resource_usage;
            metrics.last_run_at = Some(now);
        }

        let mut global = self.global.lock();
        global.total += 1;
        if run.success {
            global.successes += 1;
        } else {
            global.failures += 1;
        }
        global.total_time_ms += elapsed_ms;
        *global.error_counts.entry(run.error_kind).or_default() += 1;
        *global.severity_counts.entry(run.severity).or_default() += 1;
        global.history.push_back((now, run.success));

        let cutoff = now - ChronoDuration::days(Self::RETENTION_DAYS);
        while global.history.front().is_some_and(|(at, _)| *at < cutoff) {
            global.history.pop_front();
        }
    }

    /// Counters for one strategy kind.
    pub fn strategy(&self, kind: StrategyKind) -> StrategyMetrics {
        self.buckets
            .get(&kind)
            .map(|bucket| bucket.lock().clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> RecoveryMetrics {
        self.snapshot_at(Utc::now())
    }

    fn snapshot_at(&self, now: DateTime<Utc>) -> RecoveryMetrics {
        let strategies = StrategyKind::ALL
            .into_iter()
            .map(|kind| (kind.to_string(), self.strategy(kind)))
            .collect();

        let global = self.global.lock();
        let total = global.total;
        let fraction = |count: u64| {
            if total == 0 {
                0.0
            } else {
                count as f64 / total as f64
            }
        };

        let window = |span: ChronoDuration| {
            let since = now - span;
            global
                .history
                .iter()
                .filter(|(at, _)| *at >= since)
                .fold(WindowStats::default(), |mut stats, (_, success)| {
                    stats.attempts += 1;
                    if *success {
                        stats.successes += 1;
                    } else {
                        stats.failures += 1;
                    }
                    stats
                })
        };

        RecoveryMetrics {
            total_attempts: total,
            successful_recoveries: global.successes,
            failed_recoveries: global.failures,
            recovery_success_rate: fraction(global.successes),
            average_recovery_time_ms: if total == 0 {
                0.0
            } else {
                global.total_time_ms / total as f64
            },
            error_distribution: global
                .error_counts
                .iter()
                .map(|(kind, count)| (kind.to_string(), fraction(*count)))
                .collect(),
            severity_distribution: global
                .severity_counts
                .iter()
                .map(|(severity, count)| (severity.to_string(), fraction(*count)))
                .collect(),
            strategies,
            hourly: window(ChronoDuration::hours(1)),
            daily: window(ChronoDuration::days(1)),
            weekly: window(ChronoDuration::days(Self::RETENTION_DAYS)),
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(strategy: StrategyKind, kind: ErrorKind, success: bool, ms: u64) -> RecordedRun {
        RecordedRun {
            strategy,
            error_kind: kind,
            severity: Severity::Medium,
            success,
            duration: Duration::from_millis(ms),
            resource_usage: ResourceUsage::default(),
        }
    }

    #[test]
    fn empty_tracker_reports_zeroes() {
        let metrics = MetricsTracker::new().snapshot();
        assert_eq!(metrics.total_attempts, 0);
        assert_eq!(metrics.recovery_success_rate, 0.0);
        assert!(metrics.error_distribution.is_empty());
        assert_eq!(metrics.strategies.len(), 6);
    }

    #[test]
    fn running_mean_and_counters() {
        let tracker = MetricsTracker::new();
        tracker.record(run(StrategyKind::Retry, ErrorKind::Network, true, 100));
        tracker.record(run(StrategyKind::Retry, ErrorKind::Network, false, 300));

        let retry = tracker.strategy(StrategyKind::Retry);
        assert_eq!(retry.attempts, 2);
        assert_eq!(retry.successes, 1);
        assert_eq!(retry.failures, 1);
        assert!((retry.average_time_ms - 200.0).abs() < 1e-6);
        assert_eq!(tracker.strategy(StrategyKind::CircuitBreaker).attempts, 0);
    }

    #[test]
    fn distributions_sum_to_one() {
        let tracker = MetricsTracker::new();
        tracker.record(run(StrategyKind::Retry, ErrorKind::Network, true, 10));
        tracker.record(run(StrategyKind::Retry, ErrorKind::Timeout, true, 10));
        tracker.record(run(StrategyKind::AgentRestart, ErrorKind::Network, false, 10));

        let metrics = tracker.snapshot();
        let sum: f64 = metrics.error_distribution.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!((metrics.error_distribution["network"] - 2.0 / 3.0).abs() < 1e-9);
        assert!((metrics.severity_distribution["medium"] - 1.0).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&metrics.recovery_success_rate));
    }

    #[test]
    fn rolling_windows_prune_old_records() {
        let tracker = MetricsTracker::new();
        let now = Utc::now();
        tracker.record_at(run(StrategyKind::Retry, ErrorKind::Network, true, 10), now - ChronoDuration::days(8));
        tracker.record_at(run(StrategyKind::Retry, ErrorKind::Network, true, 10), now - ChronoDuration::days(2));
        tracker.record_at(run(StrategyKind::Retry, ErrorKind::Network, false, 10), now - ChronoDuration::hours(3));
        tracker.record_at(run(StrategyKind::Retry, ErrorKind::Network, true, 10), now);

        let metrics = tracker.snapshot_at(now);
        assert_eq!(metrics.total_attempts, 4);
        assert_eq!(metrics.hourly.attempts, 1);
        assert_eq!(metrics.daily.attempts, 2);
        assert_eq!(metrics.weekly.attempts, 3);
        assert_eq!(metrics.daily.failures, 1);
        assert!((metrics.daily.success_rate() - 0.5).abs() < 1e-9);
    }
}
