// SPDX-License-Identifier: MIT OR Apache-2.0

//! Log Event

use super::string_view::StringView;

/// A single log record: ordered key/value contents plus file position.
///
/// Contents preserve first-insertion order; replacing a value keeps the
/// original position of its key.
#[derive(Clone, Debug, Default)]
pub struct LogEvent {
    timestamp_s: i64,
    timestamp_ns: Option<u32>,
    contents: Vec<(StringView, StringView)>,
    contents_size: usize,
    level: StringView,
    file_offset: u64,
    raw_size: u64,
}

impl LogEvent {
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

    pub fn set_content(&mut self, key: StringView, val: StringView) {
        for (k, v) in self.contents.iter_mut() {
            if k == &key {
                self.contents_size += val.len();
                self.contents_size -= v.len();
                *v = val;
                return;
            }
        }
        self.contents_size += key.len() + val.len();
        self.contents.push((key, val));
    }

    pub fn get_content(&self, key: &[u8]) -> Option<&StringView> {
        self.contents
            .iter()
            .find(|(k, _)| k.as_bytes() == key)
            .map(|(_, v)| v)
    }

    pub fn del_content(&mut self, key: &[u8]) {
        if let Some(idx) = self.contents.iter().position(|(k, _)| k.as_bytes() == key) {
            let (k, v) = self.contents.remove(idx);
            self.contents_size -= k.len() + v.len();
        }
    }

    pub fn contents(&self) -> impl Iterator<Item = (&StringView, &StringView)> {
        self.contents.iter().map(|(k, v)| (k, v))
    }

    pub fn content_count(&self) -> usize {
        self.contents.len()
    }

    pub fn level(&self) -> &StringView {
        &self.level
    }

    pub fn set_level(&mut self, level: StringView) {
        self.level = level;
    }

    /// File position `(offset, size)` of the raw line this event came from.
    pub fn position(&self) -> (u64, u64) {
        (self.file_offset, self.raw_size)
    }

    pub fn set_position(&mut self, offset: u64, size: u64) {
        self.file_offset = offset;
        self.raw_size = size;
    }

    pub fn data_size(&self) -> usize {
        self.contents_size + self.level.len()
    }

    /// Clears all fields while keeping allocated capacity, for pool reuse.
    pub fn reset(&mut self) {
        self.timestamp_s = 0;
        self.timestamp_ns = None;
        self.contents.clear();
        self.contents_size = 0;
        self.level = StringView::default();
        self.file_offset = 0;
        self.raw_size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sv(s: &'static str) -> StringView {
        StringView::from_static(s)
    }

    #[test]
    fn test_contents_preserve_insertion_order() {
        let mut e = LogEvent::default();
        e.set_content(sv("b"), sv("2"));
        e.set_content(sv("a"), sv("1"));
        e.set_content(sv("b"), sv("22"));

        let keys: Vec<_> = e.contents().map(|(k, _)| k.as_str().to_string()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(e.get_content(b"b").map(|v| v.as_str()), Some("22"));
        assert_eq!(e.data_size(), 1 + 2 + 1 + 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut e = LogEvent::default();
        e.set_timestamp(100, Some(5));
        e.set_content(sv("k"), sv("v"));
        e.set_level(sv("warn"));
        e.set_position(10, 20);

        e.reset();
        assert_eq!(e.timestamp(), 0);
        assert_eq!(e.content_count(), 0);
        assert_eq!(e.data_size(), 0);
        assert_eq!(e.position(), (0, 0));
    }
}
