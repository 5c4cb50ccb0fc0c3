// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pipeline Event Group
//!
//! The unit of pipeline flow: a batch of events plus group tags, metadata
//! and the arena that owns every byte the events reference.

use std::collections::HashMap;
use std::sync::Arc;

use super::pipeline_event::PipelineEvent;
use super::sized_map::SizedMap;
use super::source_buffer::SourceBuffer;
use super::string_view::StringView;
use super::{LogEvent, MetricEvent, RawEvent, SpanEvent};
use crate::core::sender::checkpoint::RangeCheckpoint;

/// Closed set of group metadata keys, flat for fast dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventGroupMetaKey {
    HostIp,
    LogFilePath,
    K8sPodName,
    SourceId,
    PrometheusStreamId,
    PrometheusScrapeTimestampMillisec,
    PrometheusScrapeDuration,
    PrometheusScrapeResponseSize,
    PrometheusSamplesScraped,
    PrometheusInstance,
    PrometheusUpState,
}

#[derive(Clone, Debug, Default)]
pub struct PipelineEventGroup {
    source_buffer: SourceBuffer,
    metadata: HashMap<EventGroupMetaKey, StringView>,
    tags: SizedMap,
    events: Vec<PipelineEvent>,
    exactly_once_checkpoint: Option<Arc<RangeCheckpoint>>,
}

impl PipelineEventGroup {
    pub fn new(source_buffer: SourceBuffer) -> Self {
        Self {
            source_buffer,
            ..Default::default()
        }
    }

    /// Copies `src` into this group's arena.
    pub fn copy_string(&mut self, src: impl AsRef<[u8]>) -> StringView {
        self.source_buffer.copy_string(src)
    }

    pub fn source_buffer(&self) -> &SourceBuffer {
        &self.source_buffer
    }

    pub fn take_source_buffer(&mut self) -> SourceBuffer {
        std::mem::take(&mut self.source_buffer)
    }

    pub fn set_metadata(&mut self, key: EventGroupMetaKey, val: StringView) {
        self.metadata.insert(key, val);
    }

    /// Copies `val` into the arena and records it under `key`.
    pub fn set_metadata_copy(&mut self, key: EventGroupMetaKey, val: impl AsRef<[u8]>) {
        let view = self.source_buffer.copy_string(val);
        self.metadata.insert(key, view);
    }

    pub fn get_metadata(&self, key: EventGroupMetaKey) -> Option<&StringView> {
        self.metadata.get(&key)
    }

    pub fn has_metadata(&self, key: EventGroupMetaKey) -> bool {
        self.metadata.contains_key(&key)
    }

    pub fn metadata(&self) -> &HashMap<EventGroupMetaKey, StringView> {
        &self.metadata
    }

    pub fn set_tag(&mut self, key: StringView, val: StringView) {
        self.tags.insert(key, val);
    }

    /// Copies both key and value into the arena before tagging.
    pub fn set_tag_copy(&mut self, key: impl AsRef<[u8]>, val: impl AsRef<[u8]>) {
        let k = self.source_buffer.copy_string(key);
        let v = self.source_buffer.copy_string(val);
        self.tags.insert(k, v);
    }

    pub fn get_tag(&self, key: &[u8]) -> Option<&StringView> {
        self.tags.get(key)
    }

    pub fn tags(&self) -> &SizedMap {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut SizedMap {
        &mut self.tags
    }

    pub fn events(&self) -> &[PipelineEvent] {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut Vec<PipelineEvent> {
        &mut self.events
    }

    pub fn push_event(&mut self, event: impl Into<PipelineEvent>) {
        self.events.push(event.into());
    }

    pub fn take_events(&mut self) -> Vec<PipelineEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn add_log_event(&mut self) -> &mut LogEvent {
        self.events.push(PipelineEvent::Log(LogEvent::default()));
        match self.events.last_mut() {
            Some(PipelineEvent::Log(e)) => e,
            _ => unreachable!(),
        }
    }

    pub fn add_metric_event(&mut self) -> &mut MetricEvent {
        self.events.push(PipelineEvent::Metric(MetricEvent::default()));
        match self.events.last_mut() {
            Some(PipelineEvent::Metric(e)) => e,
            _ => unreachable!(),
        }
    }

    pub fn add_span_event(&mut self) -> &mut SpanEvent {
        self.events.push(PipelineEvent::Span(SpanEvent::default()));
        match self.events.last_mut() {
            Some(PipelineEvent::Span(e)) => e,
            _ => unreachable!(),
        }
    }

    pub fn add_raw_event(&mut self) -> &mut RawEvent {
        self.events.push(PipelineEvent::Raw(RawEvent::default()));
        match self.events.last_mut() {
            Some(PipelineEvent::Raw(e)) => e,
            _ => unreachable!(),
        }
    }

    pub fn exactly_once_checkpoint(&self) -> Option<&Arc<RangeCheckpoint>> {
        self.exactly_once_checkpoint.as_ref()
    }

    pub fn set_exactly_once_checkpoint(&mut self, cpt: Arc<RangeCheckpoint>) {
        self.exactly_once_checkpoint = Some(cpt);
    }

    pub fn take_exactly_once_checkpoint(&mut self) -> Option<Arc<RangeCheckpoint>> {
        self.exactly_once_checkpoint.take()
    }

    /// O(events) size of everything this group carries.
    pub fn data_size(&self) -> usize {
        self.tags.data_size() + self.events.iter().map(PipelineEvent::data_size).sum::<usize>()
    }
}
