// SPDX-License-Identifier: MIT OR Apache-2.0

//! Send Statistics
//!
//! Windowed per-(project, logstore) counters feeding the retry decision:
//! a high server-error ratio stops the immediate-retry path.

use std::collections::HashMap;
use std::sync::Mutex;

const WINDOW_SECS: i64 = 60;

#[derive(Default)]
struct Counters {
    window_start: i64,
    total: u64,
    server_error: u64,
}

#[derive(Default)]
pub struct SendStatistics {
    inner: Mutex<HashMap<String, Counters>>,
}

impl SendStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(project: &str, logstore: &str) -> String {
        format!("{project}#{logstore}")
    }

    pub fn inc_total(&self, project: &str, logstore: &str, now: i64) {
        let mut inner = self.inner.lock().expect("send statistics lock");
        let counters = inner.entry(Self::key(project, logstore)).or_default();
        roll(counters, now);
        counters.total += 1;
    }

    /// Records one server/network error and returns the error ratio of the
    /// current window.
    pub fn inc_server_error(&self, project: &str, logstore: &str, now: i64) -> f64 {
        let mut inner = self.inner.lock().expect("send statistics lock");
        let counters = inner.entry(Self::key(project, logstore)).or_default();
        roll(counters, now);
        counters.total += 1;
        counters.server_error += 1;
        counters.server_error as f64 / counters.total as f64
    }
}

fn roll(counters: &mut Counters, now: i64) {
    if now - counters.window_start >= WINDOW_SECS {
        counters.window_start = now;
        counters.total = 0;
        counters.server_error = 0;
    }
}
