//! Advisory counters and timings per stage.
//!
//! Workers bump these with relaxed atomics; nothing in the pipeline reads
//! them back to make decisions.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Fetch,
    Rate,
    Select,
    Summarize,
    Render,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Fetch,
        StageKind::Rate,
        StageKind::Select,
        StageKind::Summarize,
        StageKind::Render,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Fetch => "fetch",
            StageKind::Rate => "rate",
            StageKind::Select => "select",
            StageKind::Summarize => "summarize",
            StageKind::Render => "render",
        }
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct StageStats {
    pub batches: Counter,
    pub advanced: Counter,
    pub skipped: Counter,
    pub failed: Counter,
    busy_micros: Counter,
    timed_items: Counter,
}

impl StageStats {
    pub fn record_item_time(&self, elapsed: Duration) {
        self.busy_micros.add(elapsed.as_micros() as u64);
        self.timed_items.inc();
    }

    pub fn mean_item_ms(&self) -> f64 {
        let count = self.timed_items.get();
        if count == 0 {
            return 0.0;
        }
        self.busy_micros.get() as f64 / count as f64 / 1000.0
    }

    fn snapshot(&self, stage: StageKind) -> StageSnapshot {
        StageSnapshot {
            stage,
            batches: self.batches.get(),
            advanced: self.advanced.get(),
            skipped: self.skipped.get(),
            failed: self.failed.get(),
            busy_secs: self.busy_micros.get() as f64 / 1_000_000.0,
            mean_item_ms: self.mean_item_ms(),
        }
    }
}

#[derive(Debug)]
pub struct PipelineStats {
    started: Instant,
    fetch: StageStats,
    rate: StageStats,
    select: StageStats,
    summarize: StageStats,
    render: StageStats,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            fetch: StageStats::default(),
            rate: StageStats::default(),
            select: StageStats::default(),
            summarize: StageStats::default(),
            render: StageStats::default(),
        }
    }

    pub fn stage(&self, kind: StageKind) -> &StageStats {
        match kind {
            StageKind::Fetch => &self.fetch,
            StageKind::Rate => &self.rate,
            StageKind::Select => &self.select,
            StageKind::Summarize => &self.summarize,
            StageKind::Render => &self.render,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            stages: StageKind::ALL
                .iter()
                .map(|kind| self.stage(*kind).snapshot(*kind))
                .collect(),
        }
    }

    /// Human-readable summary, one line per stage.
    pub fn render_report(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        let _ = writeln!(out, "pipeline statistics ({:.2}s total)", snapshot.elapsed_secs);
        for stage in &snapshot.stages {
            let _ = writeln!(
                out,
                "  {:<9} batches={} advanced={} skipped={} failed={} busy={:.2}s avg={:.1}ms",
                stage.stage.name(),
                stage.batches,
                stage.advanced,
                stage.skipped,
                stage.failed,
                stage.busy_secs,
                stage.mean_item_ms,
            );
        }
        out
    }

    pub fn log_report(&self) {
        for stage in self.snapshot().stages {
            tracing::info!(
                stage = stage.stage.name(),
                batches = stage.batches,
                advanced = stage.advanced,
                skipped = stage.skipped,
                failed = stage.failed,
                busy_secs = stage.busy_secs,
                "stage totals"
            );
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    pub stage: StageKind,
    pub batches: u64,
    pub advanced: u64,
    pub skipped: u64,
    pub failed: u64,
    pub busy_secs: f64,
    pub mean_item_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub elapsed_secs: f64,
    pub stages: Vec<StageSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_per_stage() {
        let stats = PipelineStats::new();
        stats.stage(StageKind::Rate).advanced.add(3);
        stats.stage(StageKind::Rate).failed.inc();
        stats.stage(StageKind::Fetch).skipped.inc();

        let snapshot = stats.snapshot();
        let rate = snapshot.stages.iter().find(|s| s.stage == StageKind::Rate).unwrap();
        assert_eq!((rate.advanced, rate.failed, rate.skipped), (3, 1, 0));
        let fetch = snapshot.stages.iter().find(|s| s.stage == StageKind::Fetch).unwrap();
        assert_eq!(fetch.skipped, 1);
    }

    #[test]
    fn mean_time_ignores_empty_stages() {
        let stats = PipelineStats::new();
        assert_eq!(stats.stage(StageKind::Render).mean_item_ms(), 0.0);

        let summarize = stats.stage(StageKind::Summarize);
        summarize.record_item_time(Duration::from_millis(10));
        summarize.record_item_time(Duration::from_millis(30));
        assert!((summarize.mean_item_ms() - 20.0).abs() < 0.001);
    }

    #[test]
    fn report_lists_every_stage() {
        let report = PipelineStats::new().render_report();
        for kind in StageKind::ALL {
            assert!(report.contains(kind.name()));
        }
    }
}
