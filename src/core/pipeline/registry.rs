// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plugin Registry
//!
//! Maps plugin type names from configs to constructors. Built-in plugins
//! register here at startup; input plugins live outside the core and hand
//! their groups straight to the process queues.

use std::collections::HashMap;

use crate::core::exception::{LogFluxError, LogFluxResult};
use crate::core::flusher::{Flusher, FlusherLogStore};
use crate::core::pipeline::processor::Processor;
use crate::core::processor::{ProcessorK8sMetadata, ProcessorPromParse, ProcessorPromRelabel};

type ProcessorBuilder = fn() -> Box<dyn Processor>;
type FlusherBuilder = fn() -> Box<dyn Flusher>;

pub struct PluginRegistry {
    processors: HashMap<&'static str, ProcessorBuilder>,
    flushers: HashMap<&'static str, FlusherBuilder>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        let mut registry = Self {
            processors: HashMap::new(),
            flushers: HashMap::new(),
        };
        registry.register_processor("processor_prom_parse_metric_native", || {
            Box::new(ProcessorPromParse::default())
        });
        registry.register_processor("processor_prom_relabel_metric_native", || {
            Box::new(ProcessorPromRelabel::default())
        });
        registry.register_processor("processor_k8s_metadata", || {
            Box::new(ProcessorK8sMetadata::default())
        });
        registry.register_flusher("flusher_log_store", || Box::new(FlusherLogStore::new()));
        registry
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_processor(&mut self, name: &'static str, builder: ProcessorBuilder) {
        self.processors.insert(name, builder);
    }

    pub fn register_flusher(&mut self, name: &'static str, builder: FlusherBuilder) {
        self.flushers.insert(name, builder);
    }

    pub fn create_processor(&self, name: &str) -> LogFluxResult<Box<dyn Processor>> {
        self.processors
            .get(name)
            .map(|b| b())
            .ok_or_else(|| LogFluxError::UnknownPlugin {
                plugin: name.to_string(),
            })
    }

    pub fn create_flusher(&self, name: &str) -> LogFluxResult<Box<dyn Flusher>> {
        self.flushers
            .get(name)
            .map(|b| b())
            .ok_or_else(|| LogFluxError::UnknownPlugin {
                plugin: name.to_string(),
            })
    }

    pub fn has_processor(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    pub fn has_flusher(&self, name: &str) -> bool {
        self.flushers.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_plugins_present() {
        let registry = PluginRegistry::new();
        assert!(registry.has_processor("processor_prom_parse_metric_native"));
        assert!(registry.has_processor("processor_prom_relabel_metric_native"));
        assert!(registry.has_flusher("flusher_log_store"));
        assert!(registry.create_processor("nope").is_err());
    }
}
