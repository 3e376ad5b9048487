//! Server-side call timing.
//!
//! Counters are atomics; the per-method table sits behind a tokio
//! `RwLock` and is only write-locked the first time a method is seen.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Operation count plus min/max/total of a duration, in microseconds.
#[derive(Debug)]
pub struct TimeVaryingRate {
    ops: AtomicU64,
    total_us: AtomicU64,
    min_us: AtomicU64,
    max_us: AtomicU64,
}

impl Default for TimeVaryingRate {
    fn default() -> Self {
        Self {
            ops: AtomicU64::new(0),
            total_us: AtomicU64::new(0),
            min_us: AtomicU64::new(u64::MAX),
            max_us: AtomicU64::new(0),
        }
    }
}

impl TimeVaryingRate {
    /// A rate with no operations recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one operation that took `elapsed`.
    pub fn inc(&self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.ops.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
        self.min_us.fetch_min(us, Ordering::Relaxed);
        self.max_us.fetch_max(us, Ordering::Relaxed);
    }

    /// Counts and timings recorded so far.
    pub fn snapshot(&self) -> RateSnapshot {
        let ops = self.ops.load(Ordering::Relaxed);
        RateSnapshot {
            ops,
            total_us: self.total_us.load(Ordering::Relaxed),
            min_us: if ops == 0 {
                0
            } else {
                self.min_us.load(Ordering::Relaxed)
            },
            max_us: self.max_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a [`TimeVaryingRate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateSnapshot {
    pub ops: u64,
    pub total_us: u64,
    pub min_us: u64,
    pub max_us: u64,
}

impl RateSnapshot {
    /// Mean duration per operation, 0 when nothing was recorded.
    pub fn avg_us(&self) -> u64 {
        self.total_us.checked_div(self.ops).unwrap_or(0)
    }
}

/// Point-in-time view of [`RpcMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queue_time: RateSnapshot,
    pub processing_time: RateSnapshot,
    pub methods: BTreeMap<String, RateSnapshot>,
    pub authorization_successes: u64,
    pub authorization_failures: u64,
}

/// Call timing for one dispatcher.
#[derive(Debug, Default)]
pub struct RpcMetrics {
    queue_time: TimeVaryingRate,
    processing_time: TimeVaryingRate,
    methods: RwLock<HashMap<String, Arc<TimeVaryingRate>>>,
    authorization_successes: AtomicU64,
    authorization_failures: AtomicU64,
}

impl RpcMetrics {
    /// Empty counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invoked call: time queued and time spent in the handler.
    pub async fn record_call(&self, method: &str, queued: Duration, processing: Duration) {
        self.queue_time.inc(queued);
        self.processing_time.inc(processing);
        self.method_rate(method).await.inc(processing);
        debug!(
            method,
            queue_us = queued.as_micros() as u64,
            processing_us = processing.as_micros() as u64,
            "served"
        );
    }

    /// Count one authorization decision.
    pub fn record_authorization(&self, allowed: bool) {
        let counter = if allowed {
            &self.authorization_successes
        } else {
            &self.authorization_failures
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    async fn method_rate(&self, method: &str) -> Arc<TimeVaryingRate> {
        if let Some(rate) = self.methods.read().await.get(method) {
            return rate.clone();
        }
        self.methods
            .write()
            .await
            .entry(method.to_string())
            .or_default()
            .clone()
    }

    /// Point-in-time copy of every counter.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let methods = self
            .methods
            .read()
            .await
            .iter()
            .map(|(name, rate)| (name.clone(), rate.snapshot()))
            .collect();
        MetricsSnapshot {
            queue_time: self.queue_time.snapshot(),
            processing_time: self.processing_time.snapshot(),
            methods,
            authorization_successes: self.authorization_successes.load(Ordering::Relaxed),
            authorization_failures: self.authorization_failures.load(Ordering::Relaxed),
        }
    }
}
