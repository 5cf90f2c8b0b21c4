//! Running statistics about reconcile ticks.
//!
//! `HealthStats` is updated by the reconcile loop and rendered as a
//! plain-text table by the `/health` endpoint.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Clone, Copy, Default)]
struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

#[derive(Default)]
struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// Returns (current, average, max, min, count).
    fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

/// Aggregated tick statistics shared between the reconcile loop and HTTP handlers.
pub struct HealthStats {
    apps_observed: Stat,
    apps_watched: Stat,
    tick_duration_seconds: Stat,
    total_ticks: AtomicU64,
    fetch_failures: AtomicU64,
    action_failures: AtomicU64,
    started_at: Instant,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self {
            apps_observed: Stat::default(),
            apps_watched: Stat::default(),
            tick_duration_seconds: Stat::default(),
            total_ticks: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            action_failures: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }
}

impl HealthStats {
    pub fn new() -> Self {
        Default::default()
    }

    /// Records a tick whose snapshot fetch succeeded.
    pub fn record_tick(&self, observed: usize, watched: usize, duration_seconds: f64, failed_actions: usize) {
        self.apps_observed.add_sample(observed as f64);
        self.apps_watched.add_sample(watched as f64);
        self.tick_duration_seconds.add_sample(duration_seconds);
        self.total_ticks.fetch_add(1, Ordering::Relaxed);
        self.action_failures
            .fetch_add(failed_actions as u64, Ordering::Relaxed);
    }

    /// Records a tick abandoned because the snapshot could not be fetched.
    pub fn record_fetch_failure(&self, duration_seconds: f64) {
        self.tick_duration_seconds.add_sample(duration_seconds);
        self.total_ticks.fetch_add(1, Ordering::Relaxed);
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    pub fn action_failures(&self) -> u64 {
        self.action_failures.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn render_table(&self) -> String {
        let (ob_cur, ob_avg, ob_max, ob_min, _) = self.apps_observed.snapshot();
        let (wa_cur, wa_avg, wa_max, wa_min, _) = self.apps_watched.snapshot();
        let (td_cur, td_avg, td_max, td_min, _) = self.tick_duration_seconds.snapshot();

        let left_col = 22usize;
        let col_w = 12usize;

        let mut out = String::new();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "metric",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();

        writeln!(out, "{}", "-".repeat(left_col + 3 + (col_w + 3) * 4)).ok();

        let rows = [
            ("apps observed", ob_cur, ob_avg, ob_max, ob_min, 0usize),
            ("apps watched", wa_cur, wa_avg, wa_max, wa_min, 0usize),
            ("tick duration (s)", td_cur, td_avg, td_max, td_min, 3usize),
        ];
        for (label, cur, avg, max, min, precision) in rows {
            writeln!(
                out,
                "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
                label,
                format!("{:.p$}", cur, p = precision),
                format!("{:.p$}", avg, p = precision.max(1)),
                format!("{:.p$}", max, p = precision),
                format!("{:.p$}", min, p = precision),
                left = left_col,
                col = col_w
            )
            .ok();
        }

        writeln!(out).ok();
        writeln!(out, "number of ticks: {}", self.total_ticks()).ok();
        writeln!(out, "failed fetches: {}", self.fetch_failures()).ok();
        writeln!(out, "failed watcher actions: {}", self.action_failures()).ok();
        writeln!(out, "uptime (s): {}", self.uptime_seconds()).ok();

        out
    }
}
