// SPDX-License-Identifier: MIT OR Apache-2.0

//! Processor Contract
//!
//! A processor is one ordered transform over event groups. Execution is
//! single-threaded per group; an event a processor does not support passes
//! through untouched; processors never panic outward — they log, alarm and
//! drop the offending event.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::config::context::AgentContext;
use crate::core::event::{PipelineEvent, PipelineEventGroup};
use crate::core::exception::LogFluxResult;

pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    fn init(&mut self, config: &serde_json::Value, ctx: &AgentContext) -> LogFluxResult<()>;

    /// Pure predicate: whether this processor acts on `event`.
    fn supports(&self, event: &PipelineEvent) -> bool;

    fn process(&self, group: &mut PipelineEventGroup);

    fn process_groups(&self, groups: &mut Vec<PipelineEventGroup>) {
        for group in groups.iter_mut() {
            self.process(group);
        }
    }
}

/// A processor plus its flow counters.
pub struct ProcessorInstance {
    inner: Box<dyn Processor>,
    in_events: AtomicU64,
    in_size_bytes: AtomicU64,
    out_events: AtomicU64,
}

impl ProcessorInstance {
    pub fn new(inner: Box<dyn Processor>) -> Self {
        Self {
            inner,
            in_events: AtomicU64::new(0),
            in_size_bytes: AtomicU64::new(0),
            out_events: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn process(&self, groups: &mut Vec<PipelineEventGroup>) {
        let (in_events, in_size) = groups
            .iter()
            .fold((0u64, 0u64), |(n, sz), g| {
                (n + g.events().len() as u64, sz + g.data_size() as u64)
            });
        self.in_events.fetch_add(in_events, Ordering::Relaxed);
        self.in_size_bytes.fetch_add(in_size, Ordering::Relaxed);

        self.inner.process_groups(groups);

        let out_events: u64 = groups.iter().map(|g| g.events().len() as u64).sum();
        self.out_events.fetch_add(out_events, Ordering::Relaxed);
    }

    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.in_events.load(Ordering::Relaxed),
            self.in_size_bytes.load(Ordering::Relaxed),
            self.out_events.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::SourceBuffer;

    struct DropAll;

    impl Processor for DropAll {
        fn name(&self) -> &'static str {
            "drop_all"
        }

        fn init(&mut self, _config: &serde_json::Value, _ctx: &AgentContext) -> LogFluxResult<()> {
            Ok(())
        }

        fn supports(&self, _event: &PipelineEvent) -> bool {
            true
        }

        fn process(&self, group: &mut PipelineEventGroup) {
            group.events_mut().clear();
        }
    }

    #[test]
    fn test_instance_counters() {
        let instance = ProcessorInstance::new(Box::new(DropAll));
        let mut group = PipelineEventGroup::new(SourceBuffer::new());
        group.add_raw_event();
        group.add_raw_event();
        let mut groups = vec![group];

        instance.process(&mut groups);
        let (in_events, _, out_events) = instance.counters();
        assert_eq!(in_events, 2);
        assert_eq!(out_events, 0);
        assert!(groups[0].is_empty());
    }
}
