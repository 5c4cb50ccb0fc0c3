// SPDX-License-Identifier: MIT OR Apache-2.0

//! Send Flow Control
//!
//! Token-bucket style bytes/second cap applied per sending thread, with
//! separate budgets for the realtime path and the disk replay path.
//! Callers sleep until the one-second window resets.

use std::sync::Mutex;
use std::time::Duration;

struct Window {
    start_secs: i64,
    bytes: usize,
}

pub struct RateLimiter {
    bytes_per_second: usize,
    window: Mutex<Window>,
}

impl RateLimiter {
    /// `bytes_per_second` of zero disables the limiter.
    pub fn new(bytes_per_second: usize) -> Self {
        Self {
            bytes_per_second,
            window: Mutex::new(Window {
                start_secs: 0,
                bytes: 0,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.bytes_per_second > 0
    }

    /// Accounts `size` bytes, sleeping into the next window when the
    /// current one is exhausted.
    pub fn flow_control(&self, size: usize) {
        if !self.is_enabled() {
            return;
        }
        loop {
            let now = unix_now_millis();
            let now_secs = now / 1000;
            let mut window = self.window.lock().expect("rate limiter lock");
            if window.start_secs != now_secs {
                window.start_secs = now_secs;
                window.bytes = 0;
            }
            if window.bytes < self.bytes_per_second {
                window.bytes += size;
                return;
            }
            drop(window);
            let ms_into_window = (now % 1000) as u64;
            std::thread::sleep(Duration::from_millis(1000 - ms_into_window));
        }
    }
}

fn unix_now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_disabled_limiter_never_sleeps() {
        let limiter = RateLimiter::new(0);
        let start = Instant::now();
        for _ in 0..1000 {
            limiter.flow_control(1 << 20);
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_limited_budget_sleeps_into_next_window() {
        let limiter = RateLimiter::new(10);
        let start = Instant::now();
        // First call fits, second exhausts the window and must wait.
        limiter.flow_control(10);
        limiter.flow_control(10);
        limiter.flow_control(10);
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
