//! Tick performance monitoring
//!
//! Tracks tick durations against the tick budget so the loop can report
//! degradation and warn about overruns without flooding the log.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::warn;

/// Minimum samples before the status moves off `Good`
const MIN_SAMPLES: usize = 10;

/// Overrun warnings are emitted at most once per this many overruns
const OVERRUN_WARN_INTERVAL: u64 = 50;

/// Performance status levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PerformanceStatus {
    /// Comfortably within budget
    #[default]
    Good,
    /// Average tick uses most of the budget
    Warning,
    /// Average tick is at or over budget
    Critical,
}

impl PerformanceStatus {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, PerformanceStatus::Good)
    }
}

/// Rolling tick-duration monitor
pub struct PerformanceMonitor {
    tick_durations: VecDeque<Duration>,
    max_samples: usize,
    /// Tick budget
    target_tick_duration: Duration,
    /// Fraction of budget that starts `Warning`
    warning_threshold: f32,
    /// Fraction of budget that starts `Critical`
    critical_threshold: f32,
    status: PerformanceStatus,
    tick_start: Option<Instant>,
    overruns: u64,
    last_entity_count: usize,
}

impl PerformanceMonitor {
    pub fn new(tick_rate: u32) -> Self {
        let target_tick_duration = Duration::from_secs_f32(1.0 / tick_rate.max(1) as f32);
        // About four seconds of history
        let max_samples = (tick_rate.max(1) as usize * 4).max(MIN_SAMPLES);

        Self {
            tick_durations: VecDeque::with_capacity(max_samples),
            max_samples,
            target_tick_duration,
            warning_threshold: 0.7,
            critical_threshold: 1.0,
            status: PerformanceStatus::Good,
            tick_start: None,
            overruns: 0,
            last_entity_count: 0,
        }
    }

    /// Start timing a tick
    pub fn tick_start(&mut self) {
        self.tick_start = Some(Instant::now());
    }

    /// End timing a tick. Returns the new status if it changed.
    pub fn tick_end(&mut self, entity_count: usize) -> Option<PerformanceStatus> {
        let start = self.tick_start.take()?;
        self.last_entity_count = entity_count;
        self.record_tick(start.elapsed())
    }

    /// Record a tick duration. Returns the new status if it changed.
    pub fn record_tick(&mut self, duration: Duration) -> Option<PerformanceStatus> {
        if duration > self.target_tick_duration {
            self.overruns += 1;
            if self.overruns == 1 || self.overruns % OVERRUN_WARN_INTERVAL == 0 {
                warn!(
                    "Tick took {:.2}ms, budget {:.2}ms ({} overruns)",
                    duration.as_secs_f32() * 1000.0,
                    self.target_tick_duration.as_secs_f32() * 1000.0,
                    self.overruns
                );
            }
        }

        self.tick_durations.push_back(duration);
        while self.tick_durations.len() > self.max_samples {
            self.tick_durations.pop_front();
        }

        let previous = self.status;
        self.update_status();
        (self.status != previous).then_some(self.status)
    }

    fn update_status(&mut self) {
        if self.tick_durations.len() < MIN_SAMPLES {
            return;
        }
        let ratio = self.budget_usage_percent() / 100.0;
        self.status = if ratio < self.warning_threshold {
            PerformanceStatus::Good
        } else if ratio < self.critical_threshold {
            PerformanceStatus::Warning
        } else {
            PerformanceStatus::Critical
        };
    }

    pub fn average_tick_duration(&self) -> Duration {
        if self.tick_durations.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.tick_durations.iter().sum();
        sum / self.tick_durations.len() as u32
    }

    /// 95th percentile tick duration
    pub fn p95_tick_duration(&self) -> Duration {
        if self.tick_durations.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<_> = self.tick_durations.iter().copied().collect();
        sorted.sort();
        let idx = (sorted.len() as f32 * 0.95) as usize;
        sorted.get(idx.min(sorted.len() - 1)).copied().unwrap_or(Duration::ZERO)
    }

    pub fn status(&self) -> PerformanceStatus {
        self.status
    }

    /// Budget usage as percentage (0-100+)
    pub fn budget_usage_percent(&self) -> f32 {
        let avg = self.average_tick_duration();
        (avg.as_secs_f32() / self.target_tick_duration.as_secs_f32()) * 100.0
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn last_entity_count(&self) -> usize {
        self.last_entity_count
    }

    pub fn status_message(&self) -> String {
        format!(
            "{:?} - {:.1}% budget, p95 {:.2}ms, {} entities",
            self.status,
            self.budget_usage_percent(),
            self.p95_tick_duration().as_secs_f32() * 1000.0,
            self.last_entity_count
        )
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 30 Hz budget is ~33.3ms

    #[test]
    fn test_starts_good() {
        let monitor = PerformanceMonitor::new(30);
        assert_eq!(monitor.status(), PerformanceStatus::Good);
        assert_eq!(monitor.average_tick_duration(), Duration::ZERO);
    }

    #[test]
    fn test_not_enough_samples_keeps_status() {
        let mut monitor = PerformanceMonitor::new(30);
        for _ in 0..MIN_SAMPLES - 1 {
            assert_eq!(monitor.record_tick(Duration::from_millis(50)), None);
        }
        assert_eq!(monitor.status(), PerformanceStatus::Good);
    }

    #[test]
    fn test_warning_band() {
        let mut monitor = PerformanceMonitor::new(30);
        for _ in 0..20 {
            monitor.record_tick(Duration::from_millis(28));
        }
        assert_eq!(monitor.status(), PerformanceStatus::Warning);
        assert!(monitor.status().is_degraded());
        assert_eq!(monitor.overruns(), 0);
    }

    #[test]
    fn test_critical_reports_transition_once() {
        let mut monitor = PerformanceMonitor::new(30);
        let transitions: Vec<_> = (0..20)
            .filter_map(|_| monitor.record_tick(Duration::from_millis(40)))
            .collect();
        assert_eq!(transitions, vec![PerformanceStatus::Critical]);
        assert_eq!(monitor.overruns(), 20);
    }

    #[test]
    fn test_recovers_when_window_rolls_over() {
        let mut monitor = PerformanceMonitor::new(30);
        for _ in 0..20 {
            monitor.record_tick(Duration::from_millis(40));
        }
        for _ in 0..monitor.max_samples {
            monitor.record_tick(Duration::from_millis(2));
        }
        assert_eq!(monitor.status(), PerformanceStatus::Good);
    }

    #[test]
    fn test_tick_timing() {
        let mut monitor = PerformanceMonitor::new(30);
        assert_eq!(monitor.tick_end(3), None);
        monitor.tick_start();
        std::thread::sleep(Duration::from_millis(1));
        monitor.tick_end(10);

        assert_eq!(monitor.tick_durations.len(), 1);
        assert_eq!(monitor.last_entity_count(), 10);
        assert!(monitor.p95_tick_duration() >= Duration::from_millis(1));
    }
}
