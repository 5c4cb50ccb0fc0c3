// SPDX-License-Identifier: MIT OR Apache-2.0

//! Condvar Fan-In
//!
//! Many producers signal one daemon. The flag is level-triggered so a
//! signal arriving before `wait` is never lost.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct QueueSignal {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl QueueSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut flag = self.flag.lock().expect("queue signal lock");
        *flag = true;
        self.cv.notify_all();
    }

    /// Waits until signalled or `timeout` elapses; returns whether a signal
    /// was consumed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let flag = self.flag.lock().expect("queue signal lock");
        let (mut flag, _res) = self
            .cv
            .wait_timeout_while(flag, timeout, |signalled| !*signalled)
            .expect("queue signal wait");
        let was_signalled = *flag;
        *flag = false;
        was_signalled
    }
}
