// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event Group <-> Wire Model Conversion
//!
//! Lossless for timestamps (to the nanosecond), tags and event order. A
//! group on the wire carries exactly one event family.

use super::models as pb;
use crate::core::event::{
    EventGroupMetaKey, MetricValue, PipelineEvent, PipelineEventGroup, SourceBuffer, SpanKind,
    SpanStatus, StringView,
};
use crate::core::exception::{LogFluxError, LogFluxResult};

const NANOS_PER_SEC: u64 = 1_000_000_000;

fn fuse_timestamp(seconds: i64, nanos: Option<u32>) -> u64 {
    seconds.max(0) as u64 * NANOS_PER_SEC + nanos.unwrap_or(0) as u64
}

fn split_timestamp(fused: u64) -> (i64, Option<u32>) {
    let seconds = (fused / NANOS_PER_SEC) as i64;
    let nanos = (fused % NANOS_PER_SEC) as u32;
    (seconds, if nanos > 0 { Some(nanos) } else { None })
}

pub fn event_group_to_pb(group: &PipelineEventGroup) -> LogFluxResult<pb::PipelineEventGroupPb> {
    let mut dst = pb::PipelineEventGroupPb::default();

    for (k, v) in group.tags().iter() {
        dst.tags.insert(k.to_string(), v.to_string());
    }
    if let Some(source_id) = group.get_metadata(EventGroupMetaKey::SourceId) {
        dst.metadata
            .insert("source_id".to_string(), source_id.to_string());
    }

    let Some(first) = group.events().first() else {
        return Err(LogFluxError::serialization("no events in group"));
    };
    match first {
        PipelineEvent::Log(_) => {
            let mut events = Vec::with_capacity(group.events().len());
            for event in group.events() {
                let e = event.as_log().ok_or_else(|| {
                    LogFluxError::serialization("mixed event types in group")
                })?;
                let mut log = pb::LogEventPb {
                    timestamp: fuse_timestamp(e.timestamp(), e.timestamp_ns()),
                    level: e.level().to_string(),
                    file_offset: e.position().0,
                    raw_size: e.position().1,
                    ..Default::default()
                };
                for (k, v) in e.contents() {
                    log.contents.push(pb::KeyValuePb {
                        key: k.to_string(),
                        value: v.to_string(),
                    });
                }
                events.push(log);
            }
            dst.pipeline_events = Some(pb::pipeline_event_group_pb::PipelineEvents::Logs(
                pb::LogEventsPb { events },
            ));
        }
        PipelineEvent::Metric(_) => {
            let mut events = Vec::with_capacity(group.events().len());
            for event in group.events() {
                let e = event.as_metric().ok_or_else(|| {
                    LogFluxError::serialization("mixed event types in group")
                })?;
                let mut metric = pb::MetricEventPb {
                    timestamp: fuse_timestamp(e.timestamp(), e.timestamp_ns()),
                    name: e.name().to_string(),
                    ..Default::default()
                };
                for (k, v) in e.tags().iter() {
                    metric.tags.insert(k.to_string(), v.to_string());
                }
                metric.value = Some(match e.value() {
                    MetricValue::UntypedSingle(v) => {
                        pb::metric_event_pb::Value::UntypedSingleValue(pb::UntypedSingleValuePb {
                            value: *v,
                        })
                    }
                    MetricValue::UntypedMulti(values) => {
                        let mut multi = pb::UntypedMultiValuePb::default();
                        for (k, v) in values.iter() {
                            multi.values.insert(k.to_string(), v);
                        }
                        pb::metric_event_pb::Value::UntypedMultiValue(multi)
                    }
                });
                events.push(metric);
            }
            dst.pipeline_events = Some(pb::pipeline_event_group_pb::PipelineEvents::Metrics(
                pb::MetricEventsPb { events },
            ));
        }
        PipelineEvent::Span(_) => {
            let mut events = Vec::with_capacity(group.events().len());
            for event in group.events() {
                let e = event.as_span().ok_or_else(|| {
                    LogFluxError::serialization("mixed event types in group")
                })?;
                let mut span = pb::SpanEventPb {
                    timestamp: fuse_timestamp(e.timestamp(), e.timestamp_ns()),
                    trace_id: e.trace_id().to_string(),
                    span_id: e.span_id().to_string(),
                    trace_state: e.trace_state().to_string(),
                    parent_span_id: e.parent_span_id().to_string(),
                    name: e.name().to_string(),
                    kind: e.kind() as i32,
                    start_time: e.start_time_ns(),
                    end_time: e.end_time_ns(),
                    status: e.status() as i32,
                    ..Default::default()
                };
                for (k, v) in e.tags().iter() {
                    span.tags.insert(k.to_string(), v.to_string());
                }
                for (k, v) in e.scope_tags().iter() {
                    span.scope_tags.insert(k.to_string(), v.to_string());
                }
                for inner in e.events() {
                    let mut ie = pb::InnerEventPb {
                        timestamp: inner.timestamp_ns,
                        name: inner.name.to_string(),
                        ..Default::default()
                    };
                    for (k, v) in inner.tags.iter() {
                        ie.tags.insert(k.to_string(), v.to_string());
                    }
                    span.events.push(ie);
                }
                for link in e.links() {
                    let mut l = pb::SpanLinkPb {
                        trace_id: link.trace_id.to_string(),
                        span_id: link.span_id.to_string(),
                        trace_state: link.trace_state.to_string(),
                        ..Default::default()
                    };
                    for (k, v) in link.tags.iter() {
                        l.tags.insert(k.to_string(), v.to_string());
                    }
                    span.links.push(l);
                }
                events.push(span);
            }
            dst.pipeline_events = Some(pb::pipeline_event_group_pb::PipelineEvents::Spans(
                pb::SpanEventsPb { events },
            ));
        }
        PipelineEvent::Raw(_) => {
            return Err(LogFluxError::serialization(
                "raw events have no wire representation",
            ));
        }
    }

    Ok(dst)
}

pub fn pb_to_event_group(src: &pb::PipelineEventGroupPb) -> LogFluxResult<PipelineEventGroup> {
    let mut dst = PipelineEventGroup::new(SourceBuffer::new());

    match &src.pipeline_events {
        Some(pb::pipeline_event_group_pb::PipelineEvents::Logs(logs)) => {
            if logs.events.is_empty() {
                return Err(LogFluxError::serialization("no log events"));
            }
            for log in &logs.events {
                let (seconds, nanos) = split_timestamp(log.timestamp);
                let contents: Vec<(StringView, StringView)> = log
                    .contents
                    .iter()
                    .map(|c| (dst.copy_string(&c.key), dst.copy_string(&c.value)))
                    .collect();
                let level = dst.copy_string(&log.level);
                let e = dst.add_log_event();
                e.set_timestamp(seconds, nanos);
                for (k, v) in contents {
                    e.set_content(k, v);
                }
                e.set_level(level);
                e.set_position(log.file_offset, log.raw_size);
            }
        }
        Some(pb::pipeline_event_group_pb::PipelineEvents::Metrics(metrics)) => {
            if metrics.events.is_empty() {
                return Err(LogFluxError::serialization("no metric events"));
            }
            for metric in &metrics.events {
                let (seconds, nanos) = split_timestamp(metric.timestamp);
                let name = dst.copy_string(&metric.name);
                let mut tags: Vec<(String, String)> = metric
                    .tags
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                tags.sort();
                let tag_views: Vec<(StringView, StringView)> = tags
                    .iter()
                    .map(|(k, v)| (dst.copy_string(k), dst.copy_string(v)))
                    .collect();
                let value = match &metric.value {
                    Some(pb::metric_event_pb::Value::UntypedSingleValue(v)) => {
                        MetricValue::UntypedSingle(v.value)
                    }
                    Some(pb::metric_event_pb::Value::UntypedMultiValue(multi)) => {
                        let mut pairs: Vec<(String, f64)> = multi
                            .values
                            .iter()
                            .map(|(k, v)| (k.clone(), *v))
                            .collect();
                        pairs.sort_by(|a, b| a.0.cmp(&b.0));
                        let views: Vec<(StringView, f64)> = pairs
                            .iter()
                            .map(|(k, v)| (dst.copy_string(k), *v))
                            .collect();
                        let mut values = crate::core::event::UntypedMultiValues::default();
                        for (k, v) in views {
                            values.set_value(k, v);
                        }
                        MetricValue::UntypedMulti(values)
                    }
                    None => {
                        return Err(LogFluxError::serialization("metric event without value"));
                    }
                };
                let e = dst.add_metric_event();
                e.set_timestamp(seconds, nanos);
                e.set_name(name);
                e.set_value(value);
                for (k, v) in tag_views {
                    e.set_tag(k, v);
                }
            }
        }
        Some(pb::pipeline_event_group_pb::PipelineEvents::Spans(spans)) => {
            if spans.events.is_empty() {
                return Err(LogFluxError::serialization("no span events"));
            }
            for span in &spans.events {
                let (seconds, nanos) = split_timestamp(span.timestamp);
                let trace_id = dst.copy_string(&span.trace_id);
                let span_id = dst.copy_string(&span.span_id);
                let trace_state = dst.copy_string(&span.trace_state);
                let parent = dst.copy_string(&span.parent_span_id);
                let name = dst.copy_string(&span.name);
                let tags: Vec<(StringView, StringView)> = span
                    .tags
                    .iter()
                    .map(|(k, v)| (dst.copy_string(k), dst.copy_string(v)))
                    .collect();
                let scope_tags: Vec<(StringView, StringView)> = span
                    .scope_tags
                    .iter()
                    .map(|(k, v)| (dst.copy_string(k), dst.copy_string(v)))
                    .collect();
                let inner: Vec<(u64, StringView, Vec<(StringView, StringView)>)> = span
                    .events
                    .iter()
                    .map(|ie| {
                        let name = dst.copy_string(&ie.name);
                        let tags = ie
                            .tags
                            .iter()
                            .map(|(k, v)| (dst.copy_string(k), dst.copy_string(v)))
                            .collect();
                        (ie.timestamp, name, tags)
                    })
                    .collect();
                let links: Vec<(StringView, StringView, StringView, Vec<(StringView, StringView)>)> =
                    span.links
                        .iter()
                        .map(|l| {
                            let t = dst.copy_string(&l.trace_id);
                            let s = dst.copy_string(&l.span_id);
                            let st = dst.copy_string(&l.trace_state);
                            let tags = l
                                .tags
                                .iter()
                                .map(|(k, v)| (dst.copy_string(k), dst.copy_string(v)))
                                .collect();
                            (t, s, st, tags)
                        })
                        .collect();

                let e = dst.add_span_event();
                e.set_timestamp(seconds, nanos);
                e.set_trace_id(trace_id);
                e.set_span_id(span_id);
                e.set_trace_state(trace_state);
                e.set_parent_span_id(parent);
                e.set_name(name);
                e.set_kind(SpanKind::from_i32(span.kind));
                e.set_start_time_ns(span.start_time);
                e.set_end_time_ns(span.end_time);
                e.set_status(SpanStatus::from_i32(span.status));
                for (k, v) in tags {
                    e.set_tag(k, v);
                }
                for (k, v) in scope_tags {
                    e.set_scope_tag(k, v);
                }
                for (ts, name, tags) in inner {
                    let ie = e.add_event();
                    ie.timestamp_ns = ts;
                    ie.name = name;
                    for (k, v) in tags {
                        ie.set_tag(k, v);
                    }
                }
                for (t, s, st, tags) in links {
                    let l = e.add_link();
                    l.trace_id = t;
                    l.span_id = s;
                    l.trace_state = st;
                    for (k, v) in tags {
                        l.set_tag(k, v);
                    }
                }
            }
        }
        None => {
            return Err(LogFluxError::serialization("unsupported event type"));
        }
    }

    let mut tags: Vec<(String, String)> = src
        .tags
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    tags.sort();
    for (k, v) in tags {
        dst.set_tag_copy(k, v);
    }
    if let Some(source_id) = src.metadata.get("source_id") {
        dst.set_metadata_copy(EventGroupMetaKey::SourceId, source_id);
    }

    Ok(dst)
}
