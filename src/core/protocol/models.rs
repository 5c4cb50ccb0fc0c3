// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire Models
//!
//! Hand-written prost messages: the pipeline event gateway family used to
//! move whole groups across process boundaries, the `LogGroup` family the
//! log-store flusher serializes into, and the disk-buffer record meta.

use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Pipeline event gateway
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PipelineEventGroupPb {
    #[prost(map = "string, string", tag = "1")]
    pub metadata: HashMap<String, String>,
    #[prost(map = "string, string", tag = "2")]
    pub tags: HashMap<String, String>,
    #[prost(oneof = "pipeline_event_group_pb::PipelineEvents", tags = "3, 4, 5")]
    pub pipeline_events: Option<pipeline_event_group_pb::PipelineEvents>,
}

pub mod pipeline_event_group_pb {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PipelineEvents {
        #[prost(message, tag = "3")]
        Logs(super::LogEventsPb),
        #[prost(message, tag = "4")]
        Metrics(super::MetricEventsPb),
        #[prost(message, tag = "5")]
        Spans(super::SpanEventsPb),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogEventsPb {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<LogEventPb>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetricEventsPb {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<MetricEventPb>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpanEventsPb {
    #[prost(message, repeated, tag = "1")]
    pub events: Vec<SpanEventPb>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogEventPb {
    /// Fused seconds+nanos timestamp in nanoseconds.
    #[prost(uint64, tag = "1")]
    pub timestamp: u64,
    #[prost(message, repeated, tag = "2")]
    pub contents: Vec<KeyValuePb>,
    #[prost(string, tag = "3")]
    pub level: String,
    #[prost(uint64, tag = "4")]
    pub file_offset: u64,
    #[prost(uint64, tag = "5")]
    pub raw_size: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetricEventPb {
    #[prost(uint64, tag = "1")]
    pub timestamp: u64,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(map = "string, string", tag = "3")]
    pub tags: HashMap<String, String>,
    #[prost(oneof = "metric_event_pb::Value", tags = "4, 5")]
    pub value: Option<metric_event_pb::Value>,
}

pub mod metric_event_pb {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Value {
        #[prost(message, tag = "4")]
        UntypedSingleValue(super::UntypedSingleValuePb),
        #[prost(message, tag = "5")]
        UntypedMultiValue(super::UntypedMultiValuePb),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UntypedSingleValuePb {
    #[prost(double, tag = "1")]
    pub value: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UntypedMultiValuePb {
    #[prost(map = "string, double", tag = "1")]
    pub values: HashMap<String, f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpanEventPb {
    #[prost(uint64, tag = "1")]
    pub timestamp: u64,
    #[prost(string, tag = "2")]
    pub trace_id: String,
    #[prost(string, tag = "3")]
    pub span_id: String,
    #[prost(string, tag = "4")]
    pub trace_state: String,
    #[prost(string, tag = "5")]
    pub parent_span_id: String,
    #[prost(string, tag = "6")]
    pub name: String,
    #[prost(int32, tag = "7")]
    pub kind: i32,
    #[prost(uint64, tag = "8")]
    pub start_time: u64,
    #[prost(uint64, tag = "9")]
    pub end_time: u64,
    #[prost(map = "string, string", tag = "10")]
    pub tags: HashMap<String, String>,
    #[prost(message, repeated, tag = "11")]
    pub events: Vec<InnerEventPb>,
    #[prost(message, repeated, tag = "12")]
    pub links: Vec<SpanLinkPb>,
    #[prost(int32, tag = "13")]
    pub status: i32,
    #[prost(map = "string, string", tag = "14")]
    pub scope_tags: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InnerEventPb {
    #[prost(uint64, tag = "1")]
    pub timestamp: u64,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(map = "string, string", tag = "3")]
    pub tags: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SpanLinkPb {
    #[prost(string, tag = "1")]
    pub trace_id: String,
    #[prost(string, tag = "2")]
    pub span_id: String,
    #[prost(string, tag = "3")]
    pub trace_state: String,
    #[prost(map = "string, string", tag = "4")]
    pub tags: HashMap<String, String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValuePb {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

// ---------------------------------------------------------------------------
// LogGroup wire family
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogContent {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Log {
    /// Seconds since epoch.
    #[prost(uint32, tag = "1")]
    pub time: u32,
    #[prost(message, repeated, tag = "2")]
    pub contents: Vec<LogContent>,
    #[prost(uint32, optional, tag = "4")]
    pub time_ns: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogTag {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LogGroup {
    #[prost(message, repeated, tag = "1")]
    pub logs: Vec<Log>,
    #[prost(string, optional, tag = "2")]
    pub category: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub topic: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub source: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub machine_uuid: Option<String>,
    #[prost(message, repeated, tag = "6")]
    pub log_tags: Vec<LogTag>,
}

// ---------------------------------------------------------------------------
// Disk-buffer record meta
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BufferMeta {
    #[prost(string, tag = "1")]
    pub project: String,
    #[prost(string, tag = "2")]
    pub endpoint: String,
    #[prost(string, tag = "3")]
    pub aliuid: String,
    #[prost(string, optional, tag = "4")]
    pub logstore: Option<String>,
    #[prost(int32, optional, tag = "5")]
    pub datatype: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    pub rawsize: Option<i32>,
    #[prost(string, optional, tag = "7")]
    pub shardhashkey: Option<String>,
    #[prost(int32, optional, tag = "8")]
    pub compresstype: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_buffer_meta_round_trip() {
        let meta = BufferMeta {
            project: "proj".to_string(),
            endpoint: "cn-test".to_string(),
            aliuid: String::new(),
            logstore: Some("store".to_string()),
            datatype: Some(0),
            rawsize: Some(1024),
            shardhashkey: None,
            compresstype: Some(1),
        };
        let bytes = meta.encode_to_vec();
        let parsed = BufferMeta::decode(bytes.as_slice()).expect("decode");
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_legacy_meta_has_no_logstore() {
        let meta = BufferMeta {
            project: "proj".to_string(),
            endpoint: "cn-test".to_string(),
            ..Default::default()
        };
        let parsed = BufferMeta::decode(meta.encode_to_vec().as_slice()).expect("decode");
        assert!(parsed.logstore.is_none());
    }
}
