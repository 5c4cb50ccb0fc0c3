// SPDX-License-Identifier: MIT OR Apache-2.0

//! Out-Of-Band Alarms
//!
//! Alarms report data loss and subsystem failures independently of the log
//! stream. Emission is rate-limited per alarm type; suppressed alarms are
//! counted and surfaced when the window rolls over.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AlarmType {
    DiscardData,
    SecondaryReadWrite,
    EncryptDecryptFail,
    DiscardSecondary,
    SendQuotaExceed,
    SendDataFail,
    CategoryConfig,
    ExactlyOnce,
    LogGroupParseFail,
    SendCompressFail,
    Shutdown,
}

struct AlarmWindow {
    window_start: i64,
    emitted: u64,
    suppressed: u64,
    total: u64,
}

pub struct AlarmManager {
    window_secs: i64,
    max_per_window: u64,
    windows: Mutex<HashMap<AlarmType, AlarmWindow>>,
}

impl Default for AlarmManager {
    fn default() -> Self {
        Self::new(60, 10)
    }
}

impl AlarmManager {
    pub fn new(window_secs: i64, max_per_window: u64) -> Self {
        Self {
            window_secs,
            max_per_window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn send_alarm(&self, alarm_type: AlarmType, message: impl AsRef<str>) {
        self.send_alarm_for(alarm_type, message, "", "", "");
    }

    pub fn send_alarm_for(
        &self,
        alarm_type: AlarmType,
        message: impl AsRef<str>,
        project: &str,
        logstore: &str,
        region: &str,
    ) {
        let now = unix_now();
        let mut windows = self.windows.lock().expect("alarm windows lock");
        let window = windows.entry(alarm_type).or_insert(AlarmWindow {
            window_start: now,
            emitted: 0,
            suppressed: 0,
            total: 0,
        });
        window.total += 1;

        if now - window.window_start >= self.window_secs {
            if window.suppressed > 0 {
                tracing::warn!(
                    alarm = ?alarm_type,
                    suppressed = window.suppressed,
                    "alarms suppressed in previous window"
                );
            }
            window.window_start = now;
            window.emitted = 0;
            window.suppressed = 0;
        }

        if window.emitted < self.max_per_window {
            window.emitted += 1;
            tracing::warn!(
                alarm = ?alarm_type,
                project,
                logstore,
                region,
                "{}",
                message.as_ref()
            );
        } else {
            window.suppressed += 1;
        }
    }

    /// Total alarms raised for a type, emitted or suppressed.
    pub fn count(&self, alarm_type: AlarmType) -> u64 {
        self.windows
            .lock()
            .expect("alarm windows lock")
            .get(&alarm_type)
            .map(|w| w.total)
            .unwrap_or(0)
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_accumulate() {
        let alarms = AlarmManager::default();
        alarms.send_alarm(AlarmType::DiscardData, "dropped a batch");
        alarms.send_alarm(AlarmType::DiscardData, "dropped another");
        assert_eq!(alarms.count(AlarmType::DiscardData), 2);
        assert_eq!(alarms.count(AlarmType::Shutdown), 0);
    }

    #[test]
    fn test_rate_limit_suppresses_but_counts() {
        let alarms = AlarmManager::new(60, 2);
        for _ in 0..5 {
            alarms.send_alarm(AlarmType::SendDataFail, "send failed");
        }
        assert_eq!(alarms.count(AlarmType::SendDataFail), 5);
    }
}
