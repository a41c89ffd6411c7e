//! Per-connection runtime statistics.
//!
//! The balancer reads these counters when scoring endpoints. Updates are
//! lock-free; a snapshot is a plain copy of the counters and may be torn
//! across fields under concurrent load, which is acceptable for scoring.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::Instant;

use crate::error::Error;

/// Atomic call counters for one connection.
#[derive(Debug, Default)]
pub struct ConnStats {
    ops_started: AtomicU64,
    ops_succeeded: AtomicU64,
    ops_failed: AtomicU64,
    op_micros_total: AtomicU64,
    streams_started: AtomicU64,
    streams_done: AtomicU64,
}

/// Point-in-time copy of [`ConnStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Unary calls started.
    pub ops_started: u64,
    /// Unary calls finished without a metrics-visible error.
    pub ops_succeeded: u64,
    /// Unary calls finished with a metrics-visible error.
    pub ops_failed: u64,
    /// Total wall time spent in finished unary calls, in microseconds.
    pub op_micros_total: u64,
    /// Streams opened (including failed setups).
    pub streams_started: u64,
    /// Streams terminated.
    pub streams_done: u64,
}

impl ConnStats {
    /// Record a unary call entering the pipeline.
    pub fn operation_start(&self) {
        self.ops_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a unary call leaving the pipeline.
    ///
    /// `error` is the metrics-visible error, which the pipeline reclassifies
    /// before reporting; it is not necessarily the error the caller saw.
    pub fn operation_done(&self, started_at: Instant, error: Option<&Error>) {
        let elapsed = started_at.elapsed();
        self.op_micros_total
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        if error.is_some() {
            self.ops_failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.ops_succeeded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a stream entering setup.
    pub fn stream_start(&self) {
        self.streams_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stream terminating.
    pub fn stream_done(&self, _error: Option<&Error>) {
        self.streams_done.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ops_started: self.ops_started.load(Ordering::Relaxed),
            ops_succeeded: self.ops_succeeded.load(Ordering::Relaxed),
            ops_failed: self.ops_failed.load(Ordering::Relaxed),
            op_micros_total: self.op_micros_total.load(Ordering::Relaxed),
            streams_started: self.streams_started.load(Ordering::Relaxed),
            streams_done: self.streams_done.load(Ordering::Relaxed),
        }
    }
}
