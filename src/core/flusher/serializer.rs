// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batch Serialization
//!
//! Turns `BatchedEvents` into framed `LogGroup` bytes. The contract is
//! total: every event type yields a well-formed message with all tags
//! promoted, deterministic field ordering and seconds+nanos fused to
//! nanoseconds where the destination needs them.

use prost::Message;

use crate::core::batch::BatchedEvents;
use crate::core::event::{MetricValue, PipelineEvent};
use crate::core::exception::{LogFluxError, LogFluxResult};
use crate::core::protocol::models;

const METRIC_KEY_NAME: &str = "__name__";
const METRIC_KEY_LABELS: &str = "__labels__";
const METRIC_KEY_VALUE: &str = "__value__";
const METRIC_KEY_TIME_NANO: &str = "__time_nano__";
const LABEL_KV_SEP: &str = "#$#";
const LABEL_SEP: &str = "|";

pub trait Serializer: Send + Sync {
    fn serialize(&self, batch: &BatchedEvents) -> LogFluxResult<Vec<u8>>;
}

#[derive(Clone, Debug, Default)]
pub struct LogGroupSerializer {
    pub category: Option<String>,
    pub topic: Option<String>,
    pub source: Option<String>,
}

impl LogGroupSerializer {
    pub fn build_log_group(&self, batch: &BatchedEvents) -> LogFluxResult<models::LogGroup> {
        if batch.is_empty() {
            return Err(LogFluxError::serialization("empty batch"));
        }
        let mut group = models::LogGroup {
            category: self.category.clone(),
            topic: self.topic.clone(),
            source: self.source.clone(),
            ..Default::default()
        };
        for (k, v) in batch.tags.iter() {
            group.log_tags.push(models::LogTag {
                key: k.to_string(),
                value: v.to_string(),
            });
        }
        for event in &batch.events {
            group.logs.push(serialize_event(event));
        }
        Ok(group)
    }
}

impl Serializer for LogGroupSerializer {
    fn serialize(&self, batch: &BatchedEvents) -> LogFluxResult<Vec<u8>> {
        Ok(self.build_log_group(batch)?.encode_to_vec())
    }
}

fn fused_nanos(seconds: i64, nanos: Option<u32>) -> u64 {
    seconds.max(0) as u64 * 1_000_000_000 + nanos.unwrap_or(0) as u64
}

fn content(key: &str, value: String) -> models::LogContent {
    models::LogContent {
        key: key.to_string(),
        value,
    }
}

fn serialize_event(event: &PipelineEvent) -> models::Log {
    let mut log = models::Log {
        time: event.timestamp().max(0) as u32,
        time_ns: event.timestamp_ns(),
        contents: Vec::new(),
    };
    match event {
        PipelineEvent::Log(e) => {
            for (k, v) in e.contents() {
                log.contents.push(content(k.as_str(), v.to_string()));
            }
            if !e.level().is_empty() {
                log.contents.push(content("__level__", e.level().to_string()));
            }
        }
        PipelineEvent::Metric(e) => {
            log.contents.push(content(METRIC_KEY_NAME, e.name().to_string()));
            // Tag map iteration is sorted, so the label string is stable.
            let labels = e
                .tags()
                .iter()
                .map(|(k, v)| format!("{k}{LABEL_KV_SEP}{v}"))
                .collect::<Vec<_>>()
                .join(LABEL_SEP);
            log.contents.push(content(METRIC_KEY_LABELS, labels));
            let value = match e.value() {
                MetricValue::UntypedSingle(v) => format!("{v}"),
                MetricValue::UntypedMulti(values) => values
                    .iter()
                    .map(|(k, v)| format!("{k}{LABEL_KV_SEP}{v}"))
                    .collect::<Vec<_>>()
                    .join(LABEL_SEP),
            };
            log.contents.push(content(METRIC_KEY_VALUE, value));
            log.contents.push(content(
                METRIC_KEY_TIME_NANO,
                fused_nanos(e.timestamp(), e.timestamp_ns()).to_string(),
            ));
        }
        PipelineEvent::Span(e) => {
            log.contents.push(content("traceId", e.trace_id().to_string()));
            log.contents.push(content("spanId", e.span_id().to_string()));
            log.contents
                .push(content("parentSpanId", e.parent_span_id().to_string()));
            log.contents.push(content("spanName", e.name().to_string()));
            log.contents.push(content("kind", (e.kind() as i32).to_string()));
            log.contents
                .push(content("startTimeNano", e.start_time_ns().to_string()));
            log.contents
                .push(content("endTimeNano", e.end_time_ns().to_string()));
            log.contents
                .push(content("statusCode", (e.status() as i32).to_string()));
            let attributes = e
                .tags()
                .iter()
                .map(|(k, v)| format!("{k}{LABEL_KV_SEP}{v}"))
                .collect::<Vec<_>>()
                .join(LABEL_SEP);
            log.contents.push(content("attributes", attributes));
        }
        PipelineEvent::Raw(e) => {
            log.contents.push(content("content", e.content().to_string()));
        }
    }
    log
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::{PipelineEventGroup, SourceBuffer, StringView};

    fn batch_with_metric() -> BatchedEvents {
        let mut group = PipelineEventGroup::new(SourceBuffer::new());
        group.set_tag_copy("host", "node-1");
        let e = group.add_metric_event();
        e.set_name(StringView::from_static("up"));
        e.set_value(MetricValue::UntypedSingle(1.0));
        e.set_timestamp(1_700_000_000, Some(42));
        e.set_tag(StringView::from_static("job"), StringView::from_static("n"));
        e.set_tag(StringView::from_static("az"), StringView::from_static("a"));
        BatchedEvents::from_group(group, String::new())
    }

    #[test]
    fn test_metric_serialization_shape() {
        let serializer = LogGroupSerializer {
            category: Some("store".to_string()),
            ..Default::default()
        };
        let group = serializer.build_log_group(&batch_with_metric()).expect("group");

        assert_eq!(group.category.as_deref(), Some("store"));
        assert_eq!(group.log_tags.len(), 1);
        let log = &group.logs[0];
        assert_eq!(log.time, 1_700_000_000);
        assert_eq!(log.time_ns, Some(42));

        let kv: Vec<(&str, &str)> = log
            .contents
            .iter()
            .map(|c| (c.key.as_str(), c.value.as_str()))
            .collect();
        assert_eq!(kv[0], ("__name__", "up"));
        // Labels sorted by key.
        assert_eq!(kv[1], ("__labels__", "az#$#a|job#$#n"));
        assert_eq!(kv[2], ("__value__", "1"));
        assert_eq!(kv[3], ("__time_nano__", "1700000000000000042"));
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let serializer = LogGroupSerializer::default();
        let a = serializer.serialize(&batch_with_metric()).expect("bytes");
        let b = serializer.serialize(&batch_with_metric()).expect("bytes");
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let serializer = LogGroupSerializer::default();
        assert!(serializer.serialize(&BatchedEvents::default()).is_err());
    }

    #[test]
    fn test_all_variants_serialize() {
        let mut group = PipelineEventGroup::new(SourceBuffer::new());
        {
            let e = group.add_log_event();
            e.set_content(StringView::from_static("msg"), StringView::from_static("x"));
            e.set_level(StringView::from_static("info"));
        }
        let batch = BatchedEvents::from_group(group, String::new());
        let serializer = LogGroupSerializer::default();
        let bytes = serializer.serialize(&batch).expect("bytes");
        let parsed = models::LogGroup::decode(bytes.as_slice()).expect("decode");
        assert_eq!(parsed.logs.len(), 1);
        assert_eq!(parsed.logs[0].contents[0].key, "msg");
        assert_eq!(parsed.logs[0].contents[1].key, "__level__");
    }
}
