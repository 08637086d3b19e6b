//! Execution statistics
//!
//! Each worker owns a [`WorkerStatistics`] aggregating per-action counters
//! and timings. Wall-clock action time and server-side SQL time are
//! tracked separately.

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// Recording was attempted before `start_action`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsError {
    NotStarted,
}

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsError::NotStarted => {
                write!(f, "start must be called before recording results")
            }
        }
    }
}

impl Error for StatsError {}

/// Result type for statistics recording
pub type StatsResult<T> = Result<T, StatsError>;

/// Min/max/average over recorded durations
#[derive(Debug, Clone, Copy)]
pub struct TimingStatistics {
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
    pub count: u64,
}

impl Default for TimingStatistics {
    fn default() -> Self {
        Self {
            total: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
            count: 0,
        }
    }
}

impl TimingStatistics {
    pub fn record(&mut self, duration: Duration) {
        self.total += duration;
        self.min = self.min.min(duration);
        self.max = self.max.max(duration);
        self.count += 1;
    }

    pub fn average_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.total.as_secs_f64() * 1000.0 / self.count as f64
    }

    pub fn min_ms(&self) -> f64 {
        if self.count == 0 || self.min == Duration::MAX {
            return 0.0;
        }
        self.min.as_secs_f64() * 1000.0
    }

    pub fn max_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.max.as_secs_f64() * 1000.0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

/// Counters and timings for one action kind
#[derive(Debug, Clone, Default)]
pub struct ActionStatistics {
    pub success_count: u64,
    pub action_failure_count: u64,
    pub sql_failure_count: u64,
    pub other_failure_count: u64,

    /// Action error name -> occurrences
    pub action_error_names: BTreeMap<String, u64>,
    /// SQL error code -> occurrences
    pub sql_error_codes: BTreeMap<String, u64>,

    /// Wall-clock from start to record
    pub execution_timing: TimingStatistics,
    /// Server-side time reported by the connection
    pub sql_timing: TimingStatistics,

    start_time: Option<Instant>,
}

impl ActionStatistics {
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    fn execution_time(&self) -> StatsResult<Duration> {
        match self.start_time {
            Some(start) => Ok(start.elapsed()),
            None => Err(StatsError::NotStarted),
        }
    }

    pub fn record_success(&mut self, sql_time: Duration) -> StatsResult<()> {
        let exec_time = self.execution_time()?;
        self.success_count += 1;
        self.execution_timing.record(exec_time);
        self.sql_timing.record(sql_time);
        Ok(())
    }

    pub fn record_action_failure(
        &mut self,
        error_name: &str,
        sql_time: Duration,
    ) -> StatsResult<()> {
        let exec_time = self.execution_time()?;
        self.action_failure_count += 1;
        *self
            .action_error_names
            .entry(error_name.to_string())
            .or_insert(0) += 1;
        self.execution_timing.record(exec_time);
        self.sql_timing.record(sql_time);
        Ok(())
    }

    pub fn record_sql_failure(&mut self, error_code: &str, sql_time: Duration) -> StatsResult<()> {
        let exec_time = self.execution_time()?;
        self.sql_failure_count += 1;
        *self
            .sql_error_codes
            .entry(error_code.to_string())
            .or_insert(0) += 1;
        self.execution_timing.record(exec_time);
        self.sql_timing.record(sql_time);
        Ok(())
    }

    pub fn record_other_failure(&mut self, sql_time: Duration) -> StatsResult<()> {
        let exec_time = self.execution_time()?;
        self.other_failure_count += 1;
        self.execution_timing.record(exec_time);
        self.sql_timing.record(sql_time);
        Ok(())
    }

    pub fn total_count(&self) -> u64 {
        self.success_count
            + self.action_failure_count
            + self.sql_failure_count
            + self.other_failure_count
    }

    pub fn total_failure_count(&self) -> u64 {
        self.action_failure_count + self.sql_failure_count + self.other_failure_count
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total_count();
        if total == 0 {
            return 0.0;
        }
        self.success_count as f64 / total as f64 * 100.0
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn has_data(&self) -> bool {
        self.total_count() > 0
    }
}

/// Per-worker aggregation over action names
#[derive(Debug, Clone, Default)]
pub struct WorkerStatistics {
    pub action_stats: HashMap<String, ActionStatistics>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

impl WorkerStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_action(&mut self, action_name: &str) {
        self.action_stats
            .entry(action_name.to_string())
            .or_default()
            .start();
    }

    pub fn record_success(&mut self, action_name: &str, sql_time: Duration) -> StatsResult<()> {
        self.entry(action_name).record_success(sql_time)
    }

    pub fn record_action_failure(
        &mut self,
        action_name: &str,
        error_name: &str,
        sql_time: Duration,
    ) -> StatsResult<()> {
        self.entry(action_name)
            .record_action_failure(error_name, sql_time)
    }

    pub fn record_sql_failure(
        &mut self,
        action_name: &str,
        error_code: &str,
        sql_time: Duration,
    ) -> StatsResult<()> {
        self.entry(action_name)
            .record_sql_failure(error_code, sql_time)
    }

    pub fn record_other_failure(
        &mut self,
        action_name: &str,
        sql_time: Duration,
    ) -> StatsResult<()> {
        self.entry(action_name).record_other_failure(sql_time)
    }

    fn entry(&mut self, action_name: &str) -> &mut ActionStatistics {
        self.action_stats.entry(action_name.to_string()).or_default()
    }

    pub fn start(&mut self) {
        let now = Instant::now();
        self.start_time = Some(now);
        self.end_time = Some(now);
    }

    pub fn stop(&mut self) {
        self.end_time = Some(Instant::now());
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn total_duration_seconds(&self) -> f64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).as_secs_f64(),
            _ => 0.0,
        }
    }

    pub fn total_action_count(&self) -> u64 {
        self.action_stats.values().map(|s| s.total_count()).sum()
    }

    pub fn total_success_count(&self) -> u64 {
        self.action_stats.values().map(|s| s.success_count).sum()
    }

    pub fn total_failure_count(&self) -> u64 {
        self.action_stats
            .values()
            .map(|s| s.total_failure_count())
            .sum()
    }

    pub fn overall_success_rate(&self) -> f64 {
        let total = self.total_action_count();
        if total == 0 {
            return 0.0;
        }
        self.total_success_count() as f64 / total as f64 * 100.0
    }

    pub fn actions_per_second(&self) -> f64 {
        let duration = self.total_duration_seconds();
        if duration <= 0.0 {
            return 0.0;
        }
        self.total_action_count() as f64 / duration
    }

    pub fn has_data(&self) -> bool {
        self.total_action_count() > 0
    }

    pub fn report_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Worker Summary:");
        let _ = writeln!(out, "  Total actions: {}", self.total_action_count());
        let _ = writeln!(out, "  Successful: {}", self.total_success_count());
        let _ = writeln!(out, "  Failed: {}", self.total_failure_count());
        let _ = writeln!(out, "  Success rate: {:.2}%", self.overall_success_rate());
        let _ = writeln!(out, "  Duration: {:.2}s", self.total_duration_seconds());
        let _ = writeln!(out, "  Actions/sec: {:.2}", self.actions_per_second());
        out
    }

    pub fn report_detailed(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\nDetailed Action Statistics:");
        let _ = writeln!(out, "{}", "-".repeat(80));

        // deterministic report order
        let mut names: Vec<&String> = self.action_stats.keys().collect();
        names.sort();

        for name in names {
            let stats = &self.action_stats[name];
            if !stats.has_data() {
                continue;
            }

            let _ = writeln!(out, "Action: {}", name);
            let _ = writeln!(
                out,
                "  Total: {} (Success: {}, Action Fail: {}, SQL Fail: {}, Other Fail: {})",
                stats.total_count(),
                stats.success_count,
                stats.action_failure_count,
                stats.sql_failure_count,
                stats.other_failure_count
            );
            let _ = writeln!(out, "  Success Rate: {:.2}%", stats.success_rate());

            if stats.execution_timing.has_data() {
                let _ = writeln!(
                    out,
                    "  Execution Time: avg={:.2}ms, min={:.2}ms, max={:.2}ms",
                    stats.execution_timing.average_ms(),
                    stats.execution_timing.min_ms(),
                    stats.execution_timing.max_ms()
                );
            }

            if stats.sql_timing.has_data() {
                let _ = writeln!(
                    out,
                    "  SQL Time: avg={:.2}ms, min={:.2}ms, max={:.2}ms",
                    stats.sql_timing.average_ms(),
                    stats.sql_timing.min_ms(),
                    stats.sql_timing.max_ms()
                );
            }

            if !stats.action_error_names.is_empty() {
                let errors: Vec<String> = stats
                    .action_error_names
                    .iter()
                    .map(|(name, count)| format!("{}={}", name, count))
                    .collect();
                let _ = writeln!(out, "  Action Errors: {}", errors.join(", "));
            }

            if !stats.sql_error_codes.is_empty() {
                let errors: Vec<String> = stats
                    .sql_error_codes
                    .iter()
                    .map(|(code, count)| format!("{}={}", code, count))
                    .collect();
                let _ = writeln!(out, "  SQL Errors: {}", errors.join(", "));
            }

            let _ = writeln!(out);
        }
        out
    }

    pub fn report(&self) -> String {
        format!("{}{}", self.report_summary(), self.report_detailed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_timing_statistics_initial_state() {
        let timing = TimingStatistics::default();
        assert!(!timing.has_data());
        assert_eq!(timing.count, 0);
        assert_eq!(timing.average_ms(), 0.0);
        assert_eq!(timing.min_ms(), 0.0);
        assert_eq!(timing.max_ms(), 0.0);
    }

    #[test]
    fn test_timing_statistics_records() {
        let mut timing = TimingStatistics::default();
        timing.record(Duration::from_millis(1));
        timing.record(Duration::from_millis(2));
        timing.record(Duration::from_millis(3));

        assert_eq!(timing.count, 3);
        assert!((timing.average_ms() - 2.0).abs() < 0.001);
        assert!((timing.min_ms() - 1.0).abs() < 0.001);
        assert!((timing.max_ms() - 3.0).abs() < 0.001);

        timing.reset();
        assert!(!timing.has_data());
        assert_eq!(timing.average_ms(), 0.0);
    }

    #[test]
    fn test_action_statistics_success() {
        let mut stats = ActionStatistics::default();
        stats.start();
        sleep(Duration::from_millis(1));
        stats.record_success(Duration::from_micros(500)).unwrap();

        assert!(stats.has_data());
        assert_eq!(stats.total_count(), 1);
        assert_eq!(stats.total_failure_count(), 0);
        assert_eq!(stats.success_count, 1);
        assert!((stats.success_rate() - 100.0).abs() < 0.001);

        assert!(stats.execution_timing.has_data());
        assert!(stats.execution_timing.average_ms() >= 1.0);
        assert!((stats.sql_timing.average_ms() - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_action_statistics_failures_tracked_by_name() {
        let mut stats = ActionStatistics::default();

        stats.start();
        stats
            .record_action_failure("test-error", Duration::from_micros(300))
            .unwrap();
        stats.start();
        stats
            .record_action_failure("test-error", Duration::ZERO)
            .unwrap();
        stats.start();
        stats
            .record_sql_failure("sql-error-code", Duration::from_micros(700))
            .unwrap();
        stats.start();
        stats.record_other_failure(Duration::ZERO).unwrap();

        assert_eq!(stats.action_failure_count, 2);
        assert_eq!(stats.sql_failure_count, 1);
        assert_eq!(stats.other_failure_count, 1);
        assert_eq!(stats.action_error_names["test-error"], 2);
        assert_eq!(stats.sql_error_codes["sql-error-code"], 1);
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn test_recording_before_start_fails() {
        let mut stats = ActionStatistics::default();
        assert_eq!(
            stats.record_success(Duration::ZERO),
            Err(StatsError::NotStarted)
        );

        let mut worker = WorkerStatistics::new();
        assert_eq!(
            worker.record_success("nope", Duration::ZERO),
            Err(StatsError::NotStarted)
        );
    }

    #[test]
    fn test_total_count_is_conserved() {
        let mut stats = ActionStatistics::default();
        for i in 0..20 {
            stats.start();
            match i % 4 {
                0 => stats.record_success(Duration::ZERO).unwrap(),
                1 => stats
                    .record_action_failure("err", Duration::ZERO)
                    .unwrap(),
                2 => stats.record_sql_failure("code", Duration::ZERO).unwrap(),
                _ => stats.record_other_failure(Duration::ZERO).unwrap(),
            }
        }

        assert_eq!(
            stats.total_count(),
            stats.success_count
                + stats.action_failure_count
                + stats.sql_failure_count
                + stats.other_failure_count
        );
        assert_eq!(stats.total_count(), 20);
    }

    #[test]
    fn test_worker_statistics_aggregates_over_actions() {
        let mut worker = WorkerStatistics::new();
        worker.start();

        worker.start_action("insert");
        worker
            .record_success("insert", Duration::from_millis(1))
            .unwrap();
        worker.start_action("insert");
        worker
            .record_sql_failure("insert", "40001", Duration::ZERO)
            .unwrap();
        worker.start_action("drop");
        worker
            .record_action_failure("drop", "empty-metadata", Duration::ZERO)
            .unwrap();

        worker.stop();

        assert_eq!(worker.total_action_count(), 3);
        assert_eq!(worker.total_success_count(), 1);
        assert_eq!(worker.total_failure_count(), 2);
        assert!((worker.overall_success_rate() - 100.0 / 3.0).abs() < 0.001);
        assert!(worker.has_data());

        // conservation across the aggregate
        assert_eq!(
            worker.total_action_count(),
            worker.total_success_count() + worker.total_failure_count()
        );
    }

    #[test]
    fn test_reports_mention_actions_and_errors() {
        let mut worker = WorkerStatistics::new();
        worker.start();
        worker.start_action("insert_some_data");
        worker
            .record_sql_failure("insert_some_data", "23505", Duration::from_millis(2))
            .unwrap();
        worker.stop();

        let report = worker.report();
        assert!(report.contains("Worker Summary:"));
        assert!(report.contains("Total actions: 1"));
        assert!(report.contains("Action: insert_some_data"));
        assert!(report.contains("SQL Errors: 23505=1"));
    }

    #[test]
    fn test_actions_per_second_uses_wall_clock() {
        let mut worker = WorkerStatistics::new();
        worker.start();
        for _ in 0..10 {
            worker.start_action("noop");
            worker.record_success("noop", Duration::ZERO).unwrap();
        }
        sleep(Duration::from_millis(20));
        worker.stop();

        let aps = worker.actions_per_second();
        assert!(aps > 0.0);
        assert!(aps < 10.0 / 0.02 + 1.0);
    }
}
