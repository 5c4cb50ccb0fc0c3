// logflux_rust/src/core/event/mod.rs

pub mod event_pool;
pub mod group;
pub mod log_event;
pub mod metric_event;
pub mod pipeline_event;
pub mod raw_event;
pub mod sized_map;
pub mod source_buffer;
pub mod span_event;
pub mod string_view;
pub mod value;

pub use event_pool::{EventPool, ThreadedEventPool};
pub use group::{EventGroupMetaKey, PipelineEventGroup};
pub use log_event::LogEvent;
pub use metric_event::MetricEvent;
pub use pipeline_event::{PipelineEvent, PipelineEventType};
pub use raw_event::RawEvent;
pub use sized_map::SizedMap;
pub use source_buffer::SourceBuffer;
pub use span_event::{InnerEvent, SpanEvent, SpanKind, SpanLink, SpanStatus};
pub use string_view::StringView;
pub use value::{MetricValue, UntypedMultiValues};
