//! Node counters exposed on the monitor surface.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters. Cheap to bump from any thread; rendered as plain
/// text by the monitor listener.
#[derive(Debug, Default)]
pub struct Metrics {
    pub tasks_begun: AtomicU64,
    pub tasks_dispatched: AtomicU64,
    pub tasks_reported_ok: AtomicU64,
    pub tasks_reported_err: AtomicU64,
    pub tasks_retried: AtomicU64,
    pub txs_submitted: AtomicU64,
    pub txs_failed: AtomicU64,
    pub upload_bytes: AtomicU64,
    pub download_bytes: AtomicU64,
    pub rpc_requests: AtomicU64,
}

impl Metrics {
    pub fn new() -> Metrics {
        Metrics::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Plain-text dump, one `name value` line per counter.
    pub fn render_text(&self) -> String {
        let pairs = [
            ("tasks_begun", &self.tasks_begun),
            ("tasks_dispatched", &self.tasks_dispatched),
            ("tasks_reported_ok", &self.tasks_reported_ok),
            ("tasks_reported_err", &self.tasks_reported_err),
            ("tasks_retried", &self.tasks_retried),
            ("txs_submitted", &self.txs_submitted),
            ("txs_failed", &self.txs_failed),
            ("upload_bytes", &self.upload_bytes),
            ("download_bytes", &self.download_bytes),
            ("rpc_requests", &self.rpc_requests),
        ];
        let mut out = String::new();
        for (name, counter) in pairs {
            out.push_str(name);
            out.push(' ');
            out.push_str(&counter.load(Ordering::Relaxed).to_string());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_every_counter() {
        let m = Metrics::new();
        Metrics::incr(&m.tasks_dispatched);
        Metrics::add(&m.upload_bytes, 1024);
        let text = m.render_text();
        assert!(text.contains("tasks_dispatched 1\n"));
        assert!(text.contains("upload_bytes 1024\n"));
        assert_eq!(text.lines().count(), 10);
    }
}
