use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub enum Stage {
    Extract,
    Graph,
    Compliance,
    Retrieval,
    Answer,
}

#[derive(Default)]
struct StageTimer {
    total_us: AtomicU64,
    runs: AtomicUsize,
}

impl StageTimer {
    fn record(&self, duration: Duration) {
        self.total_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.runs.fetch_add(1, Ordering::Relaxed);
    }

    fn avg_ms(&self) -> f64 {
        let total = self.total_us.load(Ordering::Relaxed) as f64;
        let runs = self.runs.load(Ordering::Relaxed) as f64;
        if runs > 0.0 {
            total / runs / 1000.0 // Convert to ms
        } else {
            0.0
        }
    }
}

#[derive(Default)]
pub struct Metrics {
    // Counters
    documents_analyzed: AtomicUsize,
    stage_failures: AtomicUsize,
    questions_answered: AtomicUsize,
    answer_failures: AtomicUsize,
    unsupported_answers: AtomicUsize,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,

    // Timing
    extract: StageTimer,
    graph: StageTimer,
    compliance: StageTimer,
    retrieval: StageTimer,
    answer: StageTimer,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn timer(&self, stage: Stage) -> &StageTimer {
        match stage {
            Stage::Extract => &self.extract,
            Stage::Graph => &self.graph,
            Stage::Compliance => &self.compliance,
            Stage::Retrieval => &self.retrieval,
            Stage::Answer => &self.answer,
        }
    }

    pub fn record_stage(&self, stage: Stage, duration: Duration, success: bool) {
        self.timer(stage).record(duration);
        if !success {
            self.stage_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_document(&self) {
        self.documents_analyzed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_answer(&self, unsupported: bool, failed: bool) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
        if unsupported {
            self.unsupported_answers.fetch_add(1, Ordering::Relaxed);
        }
        if failed {
            self.answer_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_analyzed: self.documents_analyzed.load(Ordering::Relaxed),
            stage_failures: self.stage_failures.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            answer_failures: self.answer_failures.load(Ordering::Relaxed),
            unsupported_answers: self.unsupported_answers.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            avg_extract_time_ms: self.extract.avg_ms(),
            avg_graph_time_ms: self.graph.avg_ms(),
            avg_compliance_time_ms: self.compliance.avg_ms(),
            avg_retrieval_time_ms: self.retrieval.avg_ms(),
            avg_answer_time_ms: self.answer.avg_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub documents_analyzed: usize,
    pub stage_failures: usize,
    pub questions_answered: usize,
    pub answer_failures: usize,
    pub unsupported_answers: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub avg_extract_time_ms: f64,
    pub avg_graph_time_ms: f64,
    pub avg_compliance_time_ms: f64,
    pub avg_retrieval_time_ms: f64,
    pub avg_answer_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages() {
        let metrics = Metrics::new();
        metrics.record_stage(Stage::Graph, Duration::from_millis(4), true);
        metrics.record_stage(Stage::Graph, Duration::from_millis(2), false);
        metrics.record_answer(true, true);
        metrics.record_answer(false, false);
        metrics.record_cache(true);
        metrics.record_cache(false);
        metrics.record_cache(false);

        let snap = metrics.snapshot();
        assert!((snap.avg_graph_time_ms - 3.0).abs() < 1e-9);
        assert_eq!(snap.avg_answer_time_ms, 0.0);
        assert_eq!(snap.stage_failures, 1);
        assert_eq!(snap.questions_answered, 2);
        assert_eq!(snap.unsupported_answers, 1);
        assert_eq!(snap.answer_failures, 1);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 2);
    }
}
