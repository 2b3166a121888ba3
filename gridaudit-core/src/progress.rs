use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Instant;

/// Counts items of one check and logs every `interval` items plus once at the
/// end. Clones share the counter, so worker threads can report into it; the
/// logged counts are then approximate in order but never skipped.
#[derive(Clone)]
pub struct Progress {
    stage: Arc<str>,
    interval: usize,
    total: usize,
    done: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
    reports: Arc<AtomicUsize>,
    t0: Instant,
}

impl Progress {
    pub fn new(stage: &str, interval: usize, total: usize) -> Self {
        Self {
            stage: Arc::from(stage),
            interval: interval.max(1),
            total,
            done: Arc::new(AtomicUsize::new(0)),
            errors: Arc::new(AtomicUsize::new(0)),
            reports: Arc::new(AtomicUsize::new(0)),
            t0: Instant::now(),
        }
    }

    /// Record one finished item; returns the running count.
    pub fn inc(&self, failed: bool) -> usize {
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        let n = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.interval == 0 {
            self.report(n);
        }
        n
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    pub fn finish(&self) {
        self.report(self.done());
    }

    /// Progress lines emitted so far, including the final one.
    pub fn reports(&self) -> usize {
        self.reports.load(Ordering::Relaxed)
    }

    fn report(&self, n: usize) {
        self.reports.fetch_add(1, Ordering::Relaxed);
        let pct = if self.total > 0 { (n as f64 / self.total as f64) * 100.0 } else { 100.0 };
        tracing::info!(
            stage = %self.stage,
            done = n,
            total = self.total,
            errors = self.errors.load(Ordering::Relaxed),
            elapsed_s = self.t0.elapsed().as_secs(),
            "checked {}/{} ({}%)",
            n,
            self.total,
            pct as i32
        );
    }
}
