// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pipeline Event Sum Type
//!
//! Processors dispatch on the variant by match; plugin processors see the
//! whole group and pick the events they support.

use super::log_event::LogEvent;
use super::metric_event::MetricEvent;
use super::raw_event::RawEvent;
use super::span_event::SpanEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineEventType {
    Log,
    Metric,
    Span,
    Raw,
}

#[derive(Clone, Debug)]
pub enum PipelineEvent {
    Log(LogEvent),
    Metric(MetricEvent),
    Span(SpanEvent),
    Raw(RawEvent),
}

impl PipelineEvent {
    pub fn event_type(&self) -> PipelineEventType {
        match self {
            PipelineEvent::Log(_) => PipelineEventType::Log,
            PipelineEvent::Metric(_) => PipelineEventType::Metric,
            PipelineEvent::Span(_) => PipelineEventType::Span,
            PipelineEvent::Raw(_) => PipelineEventType::Raw,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            PipelineEvent::Log(e) => e.timestamp(),
            PipelineEvent::Metric(e) => e.timestamp(),
            PipelineEvent::Span(e) => e.timestamp(),
            PipelineEvent::Raw(e) => e.timestamp(),
        }
    }

    pub fn timestamp_ns(&self) -> Option<u32> {
        match self {
            PipelineEvent::Log(e) => e.timestamp_ns(),
            PipelineEvent::Metric(e) => e.timestamp_ns(),
            PipelineEvent::Span(e) => e.timestamp_ns(),
            PipelineEvent::Raw(e) => e.timestamp_ns(),
        }
    }

    pub fn set_timestamp(&mut self, seconds: i64, nanos: Option<u32>) {
        match self {
            PipelineEvent::Log(e) => e.set_timestamp(seconds, nanos),
            PipelineEvent::Metric(e) => e.set_timestamp(seconds, nanos),
            PipelineEvent::Span(e) => e.set_timestamp(seconds, nanos),
            PipelineEvent::Raw(e) => e.set_timestamp(seconds, nanos),
        }
    }

    pub fn data_size(&self) -> usize {
        match self {
            PipelineEvent::Log(e) => e.data_size(),
            PipelineEvent::Metric(e) => e.data_size(),
            PipelineEvent::Span(e) => e.data_size(),
            PipelineEvent::Raw(e) => e.data_size(),
        }
    }

    pub fn is_log(&self) -> bool {
        matches!(self, PipelineEvent::Log(_))
    }

    pub fn is_metric(&self) -> bool {
        matches!(self, PipelineEvent::Metric(_))
    }

    pub fn is_span(&self) -> bool {
        matches!(self, PipelineEvent::Span(_))
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, PipelineEvent::Raw(_))
    }

    pub fn as_metric(&self) -> Option<&MetricEvent> {
        match self {
            PipelineEvent::Metric(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_metric_mut(&mut self) -> Option<&mut MetricEvent> {
        match self {
            PipelineEvent::Metric(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_log(&self) -> Option<&LogEvent> {
        match self {
            PipelineEvent::Log(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_log_mut(&mut self) -> Option<&mut LogEvent> {
        match self {
            PipelineEvent::Log(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_span(&self) -> Option<&SpanEvent> {
        match self {
            PipelineEvent::Span(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_span_mut(&mut self) -> Option<&mut SpanEvent> {
        match self {
            PipelineEvent::Span(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&RawEvent> {
        match self {
            PipelineEvent::Raw(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LogEvent> for PipelineEvent {
    fn from(e: LogEvent) -> Self {
        PipelineEvent::Log(e)
    }
}

impl From<MetricEvent> for PipelineEvent {
    fn from(e: MetricEvent) -> Self {
        PipelineEvent::Metric(e)
    }
}

impl From<SpanEvent> for PipelineEvent {
    fn from(e: SpanEvent) -> Self {
        PipelineEvent::Span(e)
    }
}

impl From<RawEvent> for PipelineEvent {
    fn from(e: RawEvent) -> Self {
        PipelineEvent::Raw(e)
    }
}
