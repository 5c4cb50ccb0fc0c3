// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event Object Pool
//!
//! Freelists for event objects so the hot path reuses the capacity of
//! contents maps and tag vectors instead of reallocating per event.
//!
//! The shared pool is double-buffered: acquires drain `pool` while releases
//! land in `pool_bak`, and an empty `pool` swaps the two under both locks.
//! This limits producer/consumer contention to one swap per drain cycle.
//! A `min_unused` watermark per freelist drives periodic GC.

use std::sync::Mutex;

use thread_local::ThreadLocal;

use super::log_event::LogEvent;
use super::metric_event::MetricEvent;
use super::raw_event::RawEvent;
use super::span_event::SpanEvent;

pub const DEFAULT_GC_INTERVAL_SECS: i64 = 60;

#[derive(Default)]
struct PoolSet {
    logs: Vec<LogEvent>,
    metrics: Vec<MetricEvent>,
    spans: Vec<SpanEvent>,
    raws: Vec<RawEvent>,
}

/// Primary freelists plus the min-unused watermark each GC round consumes.
struct PrimaryPool {
    set: PoolSet,
    min_unused_logs: usize,
    min_unused_metrics: usize,
    min_unused_spans: usize,
    min_unused_raws: usize,
}

impl Default for PrimaryPool {
    fn default() -> Self {
        Self {
            set: PoolSet::default(),
            min_unused_logs: usize::MAX,
            min_unused_metrics: usize::MAX,
            min_unused_spans: usize::MAX,
            min_unused_raws: usize::MAX,
        }
    }
}

pub struct EventPool {
    // Lock order: pool before pool_bak, always.
    pool: Mutex<PrimaryPool>,
    pool_bak: Mutex<PoolSet>,
    last_gc_time: Mutex<i64>,
    gc_interval_secs: i64,
}

impl Default for EventPool {
    fn default() -> Self {
        Self::new(DEFAULT_GC_INTERVAL_SECS)
    }
}

macro_rules! pool_accessors {
    ($acquire:ident, $release:ident, $field:ident, $watermark:ident, $ty:ty) => {
        /// Never fails: falls back to allocation when both freelists are dry.
        pub fn $acquire(&self) -> $ty {
            let mut pool = self.pool.lock().expect("event pool lock");
            if pool.set.$field.is_empty() {
                let mut bak = self.pool_bak.lock().expect("event pool bak lock");
                std::mem::swap(&mut pool.set.$field, &mut bak.$field);
            }
            let mut event = pool.set.$field.pop().unwrap_or_default();
            pool.$watermark = pool.$watermark.min(pool.set.$field.len());
            drop(pool);
            event.reset();
            event
        }

        pub fn $release(&self, mut events: Vec<$ty>) {
            let mut bak = self.pool_bak.lock().expect("event pool bak lock");
            bak.$field.append(&mut events);
        }
    };
}

impl EventPool {
    pub fn new(gc_interval_secs: i64) -> Self {
        Self {
            pool: Mutex::new(PrimaryPool::default()),
            pool_bak: Mutex::new(PoolSet::default()),
            last_gc_time: Mutex::new(0),
            gc_interval_secs,
        }
    }

    pool_accessors!(acquire_log_event, release_log_events, logs, min_unused_logs, LogEvent);
    pool_accessors!(
        acquire_metric_event,
        release_metric_events,
        metrics,
        min_unused_metrics,
        MetricEvent
    );
    pool_accessors!(acquire_span_event, release_span_events, spans, min_unused_spans, SpanEvent);
    pool_accessors!(acquire_raw_event, release_raw_events, raws, min_unused_raws, RawEvent);

    /// Runs GC at most once per configured interval. Each freelist shrinks
    /// by the smallest unused count observed since the previous GC, never
    /// more; the backup freelists are emptied wholesale.
    pub fn check_gc(&self, now: i64) {
        {
            let mut last = self.last_gc_time.lock().expect("event pool gc lock");
            if now - *last <= self.gc_interval_secs {
                return;
            }
            *last = now;
        }

        let mut pool = self.pool.lock().expect("event pool lock");
        let mut bak = self.pool_bak.lock().expect("event pool bak lock");

        fn do_gc<T>(pool: &mut Vec<T>, bak: &mut Vec<T>, min_unused: &mut usize, kind: &str) {
            let take = if *min_unused == usize::MAX {
                pool.len()
            } else {
                (*min_unused).min(pool.len())
            };
            let bak_len = bak.len();
            let keep = pool.len() - take;
            pool.truncate(keep);
            bak.clear();
            if take != 0 || bak_len != 0 {
                tracing::info!(
                    event_type = kind,
                    gc_event_cnt = take + bak_len,
                    pool_size = pool.len(),
                    "event pool gc done"
                );
            }
            *min_unused = usize::MAX;
        }

        let PrimaryPool {
            set,
            min_unused_logs,
            min_unused_metrics,
            min_unused_spans,
            min_unused_raws,
        } = &mut *pool;
        do_gc(&mut set.logs, &mut bak.logs, min_unused_logs, "log");
        do_gc(&mut set.metrics, &mut bak.metrics, min_unused_metrics, "metric");
        do_gc(&mut set.spans, &mut bak.spans, min_unused_spans, "span");
        do_gc(&mut set.raws, &mut bak.raws, min_unused_raws, "raw");
    }

    /// Unused elements currently pooled, for tests and introspection.
    pub fn pooled_counts(&self) -> (usize, usize, usize, usize) {
        let pool = self.pool.lock().expect("event pool lock");
        let bak = self.pool_bak.lock().expect("event pool bak lock");
        (
            pool.set.logs.len() + bak.logs.len(),
            pool.set.metrics.len() + bak.metrics.len(),
            pool.set.spans.len() + bak.spans.len(),
            pool.set.raws.len() + bak.raws.len(),
        )
    }
}

/// Per-thread pools with no cross-thread contention: each worker thread
/// gets its own `EventPool` whose locks are only ever uncontended.
#[derive(Default)]
pub struct ThreadedEventPool {
    pools: ThreadLocal<EventPool>,
}

impl ThreadedEventPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> &EventPool {
        self.pools.get_or(EventPool::default)
    }
}
