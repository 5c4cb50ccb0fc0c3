// SPDX-License-Identifier: MIT OR Apache-2.0

//! Raw Event
//!
//! Opaque content handed from an input to the first parsing processor.

use super::string_view::StringView;

#[derive(Clone, Debug, Default)]
pub struct RawEvent {
    timestamp_s: i64,
    timestamp_ns: Option<u32>,
    content: StringView,
}

impl RawEvent {
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

    pub fn content(&self) -> &StringView {
        &self.content
    }

    pub fn set_content(&mut self, content: StringView) {
        self.content = content;
    }

    pub fn data_size(&self) -> usize {
        self.content.len()
    }

    pub fn reset(&mut self) {
        self.timestamp_s = 0;
        self.timestamp_ns = None;
        self.content = StringView::default();
    }
}
