// SPDX-License-Identifier: MIT OR Apache-2.0

//! Config Watcher
//!
//! Scans inner (built-in) configs and the watch directories every tick,
//! classifies each candidate against the running state and emits pipeline
//! and task diffs. Parse errors never disturb a running pipeline; a config
//! that becomes disabled while running is removed. Configs declaring the
//! same singleton input are arbitrated by `(create_time, name)`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use super::diff::{PipelineConfigDiff, TaskConfigDiff};
use super::pipeline_config::{
    config_type, is_config_enabled, load_config_detail_from_file, parse_config_detail,
    ConfigType, PipelineConfig, TaskConfig,
};
use crate::core::alarm::AlarmType;
use crate::core::config::context::AgentContext;
use crate::core::pipeline::manager::PipelineManager;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DiffKind {
    Added,
    Modified,
}

struct SingletonCandidate {
    config: PipelineConfig,
    kind: DiffKind,
}

type SingletonCache = HashMap<String, SingletonCandidate>;

pub struct ConfigWatcher {
    ctx: AgentContext,
    manager: Arc<PipelineManager>,
    source_dirs: Vec<PathBuf>,
    inner_configs: Mutex<BTreeMap<String, String>>,
    inner_config_cache: Mutex<HashMap<String, String>>,
    file_info: Mutex<HashMap<PathBuf, (u64, SystemTime)>>,
}

impl ConfigWatcher {
    pub fn new(ctx: AgentContext, manager: Arc<PipelineManager>, source_dirs: Vec<PathBuf>) -> Self {
        Self {
            ctx,
            manager,
            source_dirs,
            inner_configs: Mutex::new(BTreeMap::new()),
            inner_config_cache: Mutex::new(HashMap::new()),
            file_info: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a built-in pipeline expressed as inline JSON.
    pub fn add_inner_config(&self, name: impl Into<String>, content: impl Into<String>) {
        self.inner_configs
            .lock()
            .expect("inner configs lock")
            .insert(name.into(), content.into());
    }

    /// One scan: the union of inner configs and config files, classified
    /// into diffs against the running state.
    pub fn check_config_diff(&self) -> (PipelineConfigDiff, TaskConfigDiff) {
        let mut pipeline_diff = PipelineConfigDiff::default();
        let mut task_diff = TaskConfigDiff::default();
        let mut config_set: HashSet<String> = HashSet::new();
        let mut singleton_cache: SingletonCache = HashMap::new();

        self.insert_inner_pipelines(
            &mut pipeline_diff,
            &mut task_diff,
            &mut config_set,
            &mut singleton_cache,
        );
        self.insert_pipelines(
            &mut pipeline_diff,
            &mut task_diff,
            &mut config_set,
            &mut singleton_cache,
        );

        // Singleton winners join the diff last.
        for (_, candidate) in singleton_cache {
            match candidate.kind {
                DiffKind::Added => pipeline_diff.added.push(candidate.config),
                DiffKind::Modified => pipeline_diff.modified.push(candidate.config),
            }
        }

        for name in self.manager.all_config_names() {
            if !config_set.contains(&name) {
                tracing::info!(config = %name, "existing valid config is removed, prepare to stop current running pipeline");
                pipeline_diff.removed.push(name);
            }
        }
        for name in self.manager.all_task_names() {
            if !config_set.contains(&name) {
                tracing::info!(config = %name, "existing valid config is removed, prepare to stop current running task");
                task_diff.removed.push(name);
            }
        }
        {
            let mut file_info = self.file_info.lock().expect("file info lock");
            file_info.retain(|path, _| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|stem| config_set.contains(stem))
                    .unwrap_or(false)
            });
        }

        if !pipeline_diff.is_empty() {
            tracing::info!(
                added = pipeline_diff.added.len(),
                modified = pipeline_diff.modified.len(),
                removed = pipeline_diff.removed.len(),
                "config files scan done, got updates, begin to update pipelines"
            );
        }
        (pipeline_diff, task_diff)
    }

    fn insert_inner_pipelines(
        &self,
        pipeline_diff: &mut PipelineConfigDiff,
        task_diff: &mut TaskConfigDiff,
        config_set: &mut HashSet<String>,
        singleton_cache: &mut SingletonCache,
    ) {
        let inner = self.inner_configs.lock().expect("inner configs lock").clone();
        for (name, content) in inner {
            if !config_set.insert(name.clone()) {
                tracing::warn!(config = %name, "more than 1 config with the same name is found, skip current config");
                continue;
            }
            let cached = self
                .inner_config_cache
                .lock()
                .expect("inner config cache lock")
                .get(&name)
                .cloned();
            let changed = cached.as_deref() != Some(content.as_str());
            let existed = cached.is_some();
            if !changed {
                continue;
            }
            self.inner_config_cache
                .lock()
                .expect("inner config cache lock")
                .insert(name.clone(), content.clone());

            let detail = match parse_config_detail(&content, "json") {
                Ok(detail) => detail,
                Err(e) => {
                    tracing::warn!(config = %name, error = %e, "inner config format error, skip current object");
                    continue;
                }
            };
            if !is_config_enabled(&detail) {
                self.handle_disabled(&name, &detail, pipeline_diff, task_diff);
                continue;
            }
            if existed {
                self.check_modified_config(name, detail, pipeline_diff, task_diff, singleton_cache);
            } else {
                self.check_added_config(name, detail, pipeline_diff, task_diff, singleton_cache);
            }
        }
    }

    fn insert_pipelines(
        &self,
        pipeline_diff: &mut PipelineConfigDiff,
        task_diff: &mut TaskConfigDiff,
        config_set: &mut HashSet<String>,
        singleton_cache: &mut SingletonCache,
    ) {
        for dir in &self.source_dirs {
            if !dir.is_dir() {
                tracing::warn!(dir = %dir.display(), "config dir path not a directory, skip current object");
                continue;
            }
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "failed to read config dir");
                    continue;
                }
            };
            let mut paths: Vec<PathBuf> = entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .filter(|p| {
                    matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("json") | Some("yaml") | Some("yml")
                    )
                })
                .collect();
            paths.sort();

            for path in paths {
                let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
                else {
                    continue;
                };
                if !config_set.insert(name.clone()) {
                    tracing::warn!(filepath = %path.display(), "more than 1 config with the same name is found, skip current config");
                    continue;
                }

                let Ok(meta) = std::fs::metadata(&path) else {
                    continue;
                };
                let size = meta.len();
                let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                let previous = {
                    let mut file_info = self.file_info.lock().expect("file info lock");
                    file_info.insert(path.clone(), (size, mtime))
                };

                match previous {
                    None => {
                        let detail = match load_config_detail_from_file(&path) {
                            Ok(detail) => detail,
                            Err(e) => {
                                self.alarm_invalid(&name, &e.to_string());
                                continue;
                            }
                        };
                        if !is_config_enabled(&detail) {
                            tracing::info!(config = %name, "new config found and disabled, skip current object");
                            continue;
                        }
                        self.check_added_config(
                            name,
                            detail,
                            pipeline_diff,
                            task_diff,
                            singleton_cache,
                        );
                    }
                    Some(info) if info != (size, mtime) => {
                        // For a config currently running, leave it untouched
                        // if the new content is invalid.
                        let detail = match load_config_detail_from_file(&path) {
                            Ok(detail) => detail,
                            Err(e) => {
                                self.alarm_invalid(&name, &e.to_string());
                                continue;
                            }
                        };
                        if !is_config_enabled(&detail) {
                            self.handle_disabled(&name, &detail, pipeline_diff, task_diff);
                            continue;
                        }
                        self.check_modified_config(
                            name,
                            detail,
                            pipeline_diff,
                            task_diff,
                            singleton_cache,
                        );
                    }
                    Some(_) => {
                        tracing::debug!(config = %name, "existing config file unchanged, skip current object");
                    }
                }
            }
        }
    }

    fn handle_disabled(
        &self,
        name: &str,
        detail: &serde_json::Value,
        pipeline_diff: &mut PipelineConfigDiff,
        task_diff: &mut TaskConfigDiff,
    ) {
        match config_type(detail) {
            ConfigType::Pipeline => {
                if self.manager.find_config_by_name(name).is_some() {
                    tracing::info!(config = %name, "existing valid config modified and disabled, prepare to stop current running pipeline");
                    pipeline_diff.removed.push(name.to_string());
                }
            }
            ConfigType::Task => {
                if self.manager.find_task_by_name(name).is_some() {
                    tracing::info!(config = %name, "existing valid config modified and disabled, prepare to stop current running task");
                    task_diff.removed.push(name.to_string());
                }
            }
        }
    }

    fn check_added_config(
        &self,
        name: String,
        detail: serde_json::Value,
        pipeline_diff: &mut PipelineConfigDiff,
        task_diff: &mut TaskConfigDiff,
        singleton_cache: &mut SingletonCache,
    ) {
        match config_type(&detail) {
            ConfigType::Pipeline => {
                let mut config = PipelineConfig::new(name.clone(), detail);
                if let Err(e) = config.parse() {
                    tracing::error!(config = %name, error = %e, "new config found but invalid, skip current object");
                    self.alarm_invalid(&name, &e.to_string());
                    return;
                }
                self.push_pipeline_config(config, DiffKind::Added, pipeline_diff, singleton_cache);
            }
            ConfigType::Task => {
                let mut config = TaskConfig::new(name.clone(), detail);
                if let Err(e) = config.parse() {
                    tracing::error!(config = %name, error = %e, "new config found but invalid, skip current object");
                    self.alarm_invalid(&name, &e.to_string());
                    return;
                }
                tracing::info!(config = %name, "new config found and passed topology check, prepare to build task");
                task_diff.added.push(config);
            }
        }
    }

    fn check_modified_config(
        &self,
        name: String,
        detail: serde_json::Value,
        pipeline_diff: &mut PipelineConfigDiff,
        task_diff: &mut TaskConfigDiff,
        singleton_cache: &mut SingletonCache,
    ) {
        match config_type(&detail) {
            ConfigType::Pipeline => {
                let running = self.manager.find_config_by_name(&name);
                if let Some(pipeline) = &running {
                    if pipeline.detail() == &detail {
                        tracing::debug!(config = %name, "existing valid config file modified, but no change found, skip current object");
                        return;
                    }
                }
                let mut config = PipelineConfig::new(name.clone(), detail);
                if let Err(e) = config.parse() {
                    if running.is_some() {
                        tracing::error!(config = %name, error = %e, "existing valid config modified and becomes invalid, keep current pipeline running");
                    } else {
                        tracing::error!(config = %name, error = %e, "existing invalid config modified and remains invalid, skip current object");
                    }
                    self.alarm_invalid(&name, &e.to_string());
                    return;
                }
                self.push_pipeline_config(config, DiffKind::Modified, pipeline_diff, singleton_cache);
            }
            ConfigType::Task => {
                let running = self.manager.find_task_by_name(&name);
                if running.as_ref() == Some(&detail) {
                    return;
                }
                let mut config = TaskConfig::new(name.clone(), detail);
                if let Err(e) = config.parse() {
                    tracing::error!(config = %name, error = %e, "modified task config invalid, keep current task running");
                    self.alarm_invalid(&name, &e.to_string());
                    return;
                }
                if running.is_some() {
                    task_diff.modified.push(config);
                } else {
                    task_diff.added.push(config);
                }
            }
        }
    }

    /// Singleton arbitration: for configs declaring the same singleton
    /// input, the oldest create time wins, name breaking ties. The loser
    /// is skipped, and stopped if it is currently running.
    fn push_pipeline_config(
        &self,
        config: PipelineConfig,
        kind: DiffKind,
        pipeline_diff: &mut PipelineConfigDiff,
        singleton_cache: &mut SingletonCache,
    ) {
        let Some(singleton_input) = config.singleton_input.clone() else {
            match kind {
                DiffKind::Added => {
                    tracing::info!(config = %config.name, "new config found and passed topology check, prepare to build pipeline");
                    pipeline_diff.added.push(config);
                }
                DiffKind::Modified => {
                    tracing::info!(config = %config.name, "modified config passed topology check, prepare to rebuild pipeline");
                    pipeline_diff.modified.push(config);
                }
            }
            return;
        };

        if let Some(existing) = singleton_cache.get(&singleton_input) {
            let existing_wins = existing.config.create_time < config.create_time
                || (existing.config.create_time == config.create_time
                    && existing.config.name < config.name);
            if existing_wins {
                tracing::warn!(
                    config = %config.name,
                    input_type = %singleton_input,
                    "global singleton plugin found, but another older config or smaller name config already exists, skip current object"
                );
                if self.manager.find_config_by_name(&config.name).is_some() {
                    pipeline_diff.removed.push(config.name);
                }
                return;
            }
            if self.manager.find_config_by_name(&existing.config.name).is_some() {
                tracing::warn!(
                    config = %existing.config.name,
                    "existing valid config with global singleton plugin loses arbitration, prepare to stop current running pipeline"
                );
                pipeline_diff.removed.push(existing.config.name.clone());
            }
        }
        singleton_cache.insert(singleton_input, SingletonCandidate { config, kind });
    }

    fn alarm_invalid(&self, name: &str, message: &str) {
        self.ctx.alarms().send_alarm(
            AlarmType::CategoryConfig,
            format!("config invalid: skip current object, config: {name}: {message}"),
        );
    }
}
