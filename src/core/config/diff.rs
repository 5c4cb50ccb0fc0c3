// SPDX-License-Identifier: MIT OR Apache-2.0

//! Config Diffs
//!
//! Output of one watcher scan: what to build, rebuild and stop.

use super::pipeline_config::{PipelineConfig, TaskConfig};

#[derive(Debug, Default)]
pub struct PipelineConfigDiff {
    pub added: Vec<PipelineConfig>,
    pub modified: Vec<PipelineConfig>,
    pub removed: Vec<String>,
}

impl PipelineConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TaskConfigDiff {
    pub added: Vec<TaskConfig>,
    pub modified: Vec<TaskConfig>,
    pub removed: Vec<String>,
}

impl TaskConfigDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }
}
