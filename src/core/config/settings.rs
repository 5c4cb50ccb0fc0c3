// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime Settings
//!
//! Every tunable flag of the runtime with its default, hydrated once at
//! boot from the environment and optional overrides, then handed around
//! inside the agent context.

use std::path::PathBuf;

use serde::Deserialize;

pub const DATA_DIR_ENV: &str = "LOONGCOLLECTOR_DATA_DIR";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base directory for buffer files and other local state.
    pub data_dir: PathBuf,

    // Queues.
    pub process_queue_capacity: usize,
    pub sender_queue_capacity: usize,

    // Batching.
    pub max_send_log_group_size: usize,
    pub merge_log_count_limit: usize,
    pub batch_expire_interval_secs: i64,

    // Sending.
    pub send_request_concurrency: usize,
    pub send_retrytimes: u32,
    pub unauthorized_send_retrytimes: u32,
    pub unknown_error_try_max: u32,
    pub unauthorized_allowed_delay_after_reset_secs: i64,
    pub discard_send_fail_interval_secs: i64,
    pub send_server_error_retry_ratio: f64,
    pub send_client_timeout_interval_secs: i64,
    pub reset_region_concurrency_error_count: u32,
    pub send_flow_bytes_per_second: usize,
    pub replay_flow_bytes_per_second: usize,
    pub enable_log_time_auto_adjust: bool,

    // Disk buffer.
    pub buffer_file_alive_interval_secs: i64,
    pub log_expire_time_secs: i64,
    pub secondary_buffer_count_limit: usize,
    pub buffer_check_period_secs: i64,
    pub quota_exceed_wait_interval_secs: i64,
    pub num_of_buffer_files: usize,
    pub local_file_size_bytes: u64,
    pub file_encryption_header_length: usize,

    // Event pool.
    pub event_pool_gc_interval_secs: i64,

    // Config watch.
    pub config_scan_interval_secs: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            process_queue_capacity: 20,
            sender_queue_capacity: 20,
            max_send_log_group_size: 5 * 1024 * 1024,
            merge_log_count_limit: 4000,
            batch_expire_interval_secs: 3,
            send_request_concurrency: (num_cpus::get() * 4).clamp(10, 50),
            send_retrytimes: 3,
            unauthorized_send_retrytimes: 5,
            unknown_error_try_max: 5,
            unauthorized_allowed_delay_after_reset_secs: 30,
            discard_send_fail_interval_secs: 6 * 3600,
            send_server_error_retry_ratio: 0.3,
            send_client_timeout_interval_secs: 43200,
            reset_region_concurrency_error_count: 5,
            send_flow_bytes_per_second: 0,
            replay_flow_bytes_per_second: 0,
            enable_log_time_auto_adjust: false,
            buffer_file_alive_interval_secs: 300,
            log_expire_time_secs: 24 * 3600,
            secondary_buffer_count_limit: 20,
            buffer_check_period_secs: 60,
            quota_exceed_wait_interval_secs: 5,
            num_of_buffer_files: 25,
            local_file_size_bytes: 20 * 1024 * 1024,
            file_encryption_header_length: 128,
            event_pool_gc_interval_secs: 60,
            config_scan_interval_secs: 3,
        }
    }
}

impl Settings {
    /// Defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.is_empty() {
                settings.data_dir = PathBuf::from(dir);
            }
        }
        settings
    }
}
