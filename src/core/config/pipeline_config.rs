// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pipeline and Task Configs
//!
//! Loading, type detection and validation of one config. A config is
//! either a pipeline (`inputs`/`processors`/`flushers`) or a task (`task`
//! object); the `enable` flag defaults to on.

use std::path::Path;

use serde_json::Value;

use crate::core::exception::{LogFluxError, LogFluxResult};

/// Input plugins that may run at most once across all active configs.
pub const SINGLETON_INPUTS: &[&str] = &[
    "input_file_security",
    "input_process_security",
    "input_network_security",
    "input_network_observer",
    "input_internal_metrics",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigType {
    Pipeline,
    Task,
}

pub fn config_type(detail: &Value) -> ConfigType {
    if detail.get("task").is_some() {
        ConfigType::Task
    } else {
        ConfigType::Pipeline
    }
}

pub fn is_config_enabled(detail: &Value) -> bool {
    detail.get("enable").and_then(Value::as_bool).unwrap_or(true)
}

/// Parses file content by extension; `.json` or `.yaml`/`.yml`.
pub fn parse_config_detail(content: &str, extension: &str) -> LogFluxResult<Value> {
    match extension {
        "json" => Ok(serde_json::from_str(content)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(content)?),
        other => Err(LogFluxError::config_parse(
            format!("<{other}>"),
            "unsupported config extension",
        )),
    }
}

pub fn load_config_detail_from_file(path: &Path) -> LogFluxResult<Value> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let content = std::fs::read_to_string(path)?;
    parse_config_detail(&content, &extension).map_err(|e| {
        LogFluxError::config_parse(path.display().to_string(), e.to_string())
    })
}

/// Per-pipeline `global` options.
#[derive(Clone, Debug, Default)]
pub struct GlobalConfig {
    pub process_priority: i64,
    pub enable_timestamp_nanosecond: bool,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub name: String,
    pub detail: Value,
    pub create_time: i64,
    pub singleton_input: Option<String>,
    pub inputs: Vec<Value>,
    pub processors: Vec<Value>,
    pub flushers: Vec<Value>,
    pub global: GlobalConfig,
    // Destination coordinates for alarms, from the first flusher.
    pub project: String,
    pub logstore: String,
    pub region: String,
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>, detail: Value) -> Self {
        Self {
            name: name.into(),
            detail,
            create_time: 0,
            singleton_input: None,
            inputs: Vec::new(),
            processors: Vec::new(),
            flushers: Vec::new(),
            global: GlobalConfig::default(),
            project: String::new(),
            logstore: String::new(),
            region: String::new(),
        }
    }

    /// Validates the config shape and extracts the plugin lists. Returns
    /// an error with the first problem found; the caller decides whether a
    /// running pipeline is affected.
    pub fn parse(&mut self) -> LogFluxResult<()> {
        let detail = self
            .detail
            .as_object()
            .ok_or_else(|| LogFluxError::config_parse(&self.name, "config is not an object"))?;

        self.create_time = detail
            .get("createTime")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let inputs = detail
            .get("inputs")
            .and_then(Value::as_array)
            .ok_or_else(|| LogFluxError::config_parse(&self.name, "missing inputs"))?;
        if inputs.is_empty() {
            return Err(LogFluxError::config_parse(&self.name, "inputs is empty"));
        }
        for input in inputs {
            let input_type = plugin_type(input)
                .ok_or_else(|| LogFluxError::config_parse(&self.name, "input without Type"))?;
            if SINGLETON_INPUTS.contains(&input_type) {
                self.singleton_input = Some(input_type.to_string());
            }
        }
        self.inputs = inputs.clone();

        self.processors = detail
            .get("processors")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for processor in &self.processors {
            plugin_type(processor)
                .ok_or_else(|| LogFluxError::config_parse(&self.name, "processor without Type"))?;
        }

        let flushers = detail
            .get("flushers")
            .and_then(Value::as_array)
            .ok_or_else(|| LogFluxError::config_parse(&self.name, "missing flushers"))?;
        if flushers.is_empty() {
            return Err(LogFluxError::config_parse(&self.name, "flushers is empty"));
        }
        for flusher in flushers {
            plugin_type(flusher)
                .ok_or_else(|| LogFluxError::config_parse(&self.name, "flusher without Type"))?;
        }
        self.flushers = flushers.clone();

        if let Some(global) = detail.get("global") {
            self.global.process_priority = global
                .get("ProcessPriority")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            self.global.enable_timestamp_nanosecond = global
                .get("EnableTimestampNanosecond")
                .and_then(Value::as_bool)
                .unwrap_or(false);
        }

        if let Some(first) = self.flushers.first() {
            self.project = str_field(first, "Project");
            self.logstore = str_field(first, "Logstore");
            self.region = str_field(first, "Region");
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct TaskConfig {
    pub name: String,
    pub detail: Value,
}

impl TaskConfig {
    pub fn new(name: impl Into<String>, detail: Value) -> Self {
        Self {
            name: name.into(),
            detail,
        }
    }

    pub fn parse(&mut self) -> LogFluxResult<()> {
        let task = self
            .detail
            .get("task")
            .ok_or_else(|| LogFluxError::config_parse(&self.name, "missing task object"))?;
        plugin_type(task)
            .ok_or_else(|| LogFluxError::config_parse(&self.name, "task without Type"))?;
        Ok(())
    }
}

pub fn plugin_type(plugin: &Value) -> Option<&str> {
    plugin.get("Type").and_then(Value::as_str)
}

fn str_field(plugin: &Value, key: &str) -> String {
    plugin
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}
