// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric Event

use super::sized_map::SizedMap;
use super::string_view::StringView;
use super::value::MetricValue;

#[derive(Clone, Debug, Default)]
pub struct MetricEvent {
    timestamp_s: i64,
    timestamp_ns: Option<u32>,
    name: StringView,
    value: MetricValue,
    tags: SizedMap,
}

impl MetricEvent {
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

    pub fn name(&self) -> &StringView {
        &self.name
    }

    pub fn set_name(&mut self, name: StringView) {
        self.name = name;
    }

    pub fn value(&self) -> &MetricValue {
        &self.value
    }

    pub fn set_value(&mut self, value: MetricValue) {
        self.value = value;
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

    pub fn del_tag(&mut self, key: &[u8]) {
        self.tags.erase(key);
    }

    pub fn tags(&self) -> &SizedMap {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut SizedMap {
        &mut self.tags
    }

    pub fn data_size(&self) -> usize {
        self.name.len() + self.value.data_size() + self.tags.data_size()
    }

    pub fn reset(&mut self) {
        self.timestamp_s = 0;
        self.timestamp_ns = None;
        self.name = StringView::default();
        self.value = MetricValue::default();
        self.tags.clear();
    }
}
