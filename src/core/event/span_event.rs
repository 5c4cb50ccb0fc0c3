// SPDX-License-Identifier: MIT OR Apache-2.0

//! Span Event

use super::sized_map::SizedMap;
use super::string_view::StringView;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanKind {
    #[default]
    Unspecified = 0,
    Internal = 1,
    Server = 2,
    Client = 3,
    Producer = 4,
    Consumer = 5,
}

impl SpanKind {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => SpanKind::Internal,
            2 => SpanKind::Server,
            3 => SpanKind::Client,
            4 => SpanKind::Producer,
            5 => SpanKind::Consumer,
            _ => SpanKind::Unspecified,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanStatus {
    #[default]
    Unset = 0,
    Ok = 1,
    Error = 2,
}

impl SpanStatus {
    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => SpanStatus::Ok,
            2 => SpanStatus::Error,
            _ => SpanStatus::Unset,
        }
    }
}

/// Timestamped event attached inside a span.
#[derive(Clone, Debug, Default)]
pub struct InnerEvent {
    pub timestamp_ns: u64,
    pub name: StringView,
    pub tags: SizedMap,
}

impl InnerEvent {
    pub fn set_tag(&mut self, key: StringView, val: StringView) {
        self.tags.insert(key, val);
    }

    pub fn data_size(&self) -> usize {
        self.name.len() + self.tags.data_size()
    }
}

/// Link from one span to another trace.
#[derive(Clone, Debug, Default)]
pub struct SpanLink {
    pub trace_id: StringView,
    pub span_id: StringView,
    pub trace_state: StringView,
    pub tags: SizedMap,
}

impl SpanLink {
    pub fn set_tag(&mut self, key: StringView, val: StringView) {
        self.tags.insert(key, val);
    }

    pub fn data_size(&self) -> usize {
        self.trace_id.len() + self.span_id.len() + self.trace_state.len() + self.tags.data_size()
    }
}

#[derive(Clone, Debug, Default)]
pub struct SpanEvent {
    timestamp_s: i64,
    timestamp_ns: Option<u32>,
    trace_id: StringView,
    span_id: StringView,
    trace_state: StringView,
    parent_span_id: StringView,
    name: StringView,
    kind: SpanKind,
    start_time_ns: u64,
    end_time_ns: u64,
    tags: SizedMap,
    events: Vec<InnerEvent>,
    links: Vec<SpanLink>,
    status: SpanStatus,
    scope_tags: SizedMap,
}

impl SpanEvent {
    pub fn timestamp(&self) -> i64 {
        self.timestamp_s
    }

    pub fn timestamp_ns(&self) -> Option<u32> {
        self.timestamp_ns
    }

    pub fn set_timestamp(&mut self, seconds: i64, nanos: Option<u32>) {
        self.timestamp_s = seconds;
        self.timestamp_ns = nanos;
    }

    pub fn trace_id(&self) -> &StringView {
        &self.trace_id
    }

    pub fn set_trace_id(&mut self, v: StringView) {
        self.trace_id = v;
    }

    pub fn span_id(&self) -> &StringView {
        &self.span_id
    }

    pub fn set_span_id(&mut self, v: StringView) {
        self.span_id = v;
    }

    pub fn trace_state(&self) -> &StringView {
        &self.trace_state
    }

    pub fn set_trace_state(&mut self, v: StringView) {
        self.trace_state = v;
    }

    pub fn parent_span_id(&self) -> &StringView {
        &self.parent_span_id
    }

    pub fn set_parent_span_id(&mut self, v: StringView) {
        self.parent_span_id = v;
    }

    pub fn name(&self) -> &StringView {
        &self.name
    }

    pub fn set_name(&mut self, v: StringView) {
        self.name = v;
    }

    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: SpanKind) {
        self.kind = kind;
    }

    pub fn start_time_ns(&self) -> u64 {
        self.start_time_ns
    }

    pub fn set_start_time_ns(&mut self, ns: u64) {
        self.start_time_ns = ns;
    }

    pub fn end_time_ns(&self) -> u64 {
        self.end_time_ns
    }

    pub fn set_end_time_ns(&mut self, ns: u64) {
        self.end_time_ns = ns;
    }

    pub fn set_tag(&mut self, key: StringView, val: StringView) {
        self.tags.insert(key, val);
    }

    pub fn get_tag(&self, key: &[u8]) -> Option<&StringView> {
        self.tags.get(key)
    }

    pub fn has_tag(&self, key: &[u8]) -> bool {
        self.tags.contains_key(key)
    }

    pub fn tags(&self) -> &SizedMap {
        &self.tags
    }

    pub fn add_event(&mut self) -> &mut InnerEvent {
        self.events.push(InnerEvent::default());
        self.events.last_mut().expect("just pushed")
    }

    pub fn events(&self) -> &[InnerEvent] {
        &self.events
    }

    pub fn add_link(&mut self) -> &mut SpanLink {
        self.links.push(SpanLink::default());
        self.links.last_mut().expect("just pushed")
    }

    pub fn links(&self) -> &[SpanLink] {
        &self.links
    }

    pub fn status(&self) -> SpanStatus {
        self.status
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        self.status = status;
    }

    pub fn set_scope_tag(&mut self, key: StringView, val: StringView) {
        self.scope_tags.insert(key, val);
    }

    pub fn scope_tags(&self) -> &SizedMap {
        &self.scope_tags
    }

    pub fn data_size(&self) -> usize {
        self.trace_id.len()
            + self.span_id.len()
            + self.trace_state.len()
            + self.parent_span_id.len()
            + self.name.len()
            + self.tags.data_size()
            + self.scope_tags.data_size()
            + self.events.iter().map(InnerEvent::data_size).sum::<usize>()
            + self.links.iter().map(SpanLink::data_size).sum::<usize>()
    }

    pub fn reset(&mut self) {
        self.timestamp_s = 0;
        self.timestamp_ns = None;
        self.trace_id = StringView::default();
        self.span_id = StringView::default();
        self.trace_state = StringView::default();
        self.parent_span_id = StringView::default();
        self.name = StringView::default();
        self.kind = SpanKind::Unspecified;
        self.start_time_ns = 0;
        self.end_time_ns = 0;
        self.tags.clear();
        self.events.clear();
        self.links.clear();
        self.status = SpanStatus::Unset;
        self.scope_tags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sv(s: &'static str) -> StringView {
        StringView::from_static(s)
    }

    #[test]
    fn test_span_structure() {
        let mut e = SpanEvent::default();
        e.set_trace_id(sv("trace-1"));
        e.set_span_id(sv("span-1"));
        e.set_kind(SpanKind::Server);
        e.set_start_time_ns(1_000);
        e.set_end_time_ns(2_000);
        e.set_tag(sv("rpc"), sv("get"));

        let inner = e.add_event();
        inner.timestamp_ns = 1_500;
        inner.name = sv("retry");

        let link = e.add_link();
        link.trace_id = sv("trace-2");

        assert_eq!(e.events().len(), 1);
        assert_eq!(e.links().len(), 1);
        assert_eq!(e.kind(), SpanKind::Server);
        assert!(e.has_tag(b"rpc"));
    }

    #[test]
    fn test_kind_status_round_trip() {
        for v in 0..=5 {
            assert_eq!(SpanKind::from_i32(v) as i32, v);
        }
        for v in 0..=2 {
            assert_eq!(SpanStatus::from_i32(v) as i32, v);
        }
    }
}
