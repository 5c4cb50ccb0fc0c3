// SPDX-License-Identifier: MIT OR Apache-2.0

//! Agent Context
//!
//! Process-wide collaborators constructed once during boot and handed to
//! every pipeline: settings, alarms and host identity. Passing a handle
//! keeps the runtime free of mutable global state.

use std::path::PathBuf;
use std::sync::Arc;

use super::settings::Settings;
use crate::core::alarm::AlarmManager;

#[derive(Clone)]
pub struct AgentContext {
    settings: Arc<Settings>,
    alarms: Arc<AlarmManager>,
    host_ip: String,
    default_region: String,
}

impl AgentContext {
    pub fn new(settings: Settings, host_ip: impl Into<String>, default_region: impl Into<String>) -> Self {
        Self {
            settings: Arc::new(settings),
            alarms: Arc::new(AlarmManager::default()),
            host_ip: host_ip.into(),
            default_region: default_region.into(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn alarms(&self) -> &Arc<AlarmManager> {
        &self.alarms
    }

    pub fn host_ip(&self) -> &str {
        &self.host_ip
    }

    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.settings.data_dir
    }
}

impl Default for AgentContext {
    fn default() -> Self {
        Self::new(Settings::from_env(), "127.0.0.1", "default")
    }
}
