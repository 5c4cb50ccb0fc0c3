// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-Group Byte Arena
//!
//! A `SourceBuffer` owns all the bytes that the `StringView`s of one
//! `PipelineEventGroup` point into. Appends are amortized O(1) over chunked
//! storage and live bytes never move, so a view can never dangle on growth.
//! Moving a group transfers buffer ownership with it.

use bytes::{Bytes, BytesMut};

use super::string_view::StringView;

const MIN_CHUNK_BYTES: usize = 4096;

#[derive(Clone, Default, Debug)]
pub struct SourceBuffer {
    chunk: BytesMut,
    frozen: Vec<Bytes>,
    data_size: usize,
}

impl SourceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies `src` into the arena and returns a stable view of it.
    ///
    /// The returned view stays valid for as long as its bytes are
    /// referenced; the arena keeps a handle to every chunk it handed out so
    /// `contains` can answer ownership queries.
    pub fn copy_string(&mut self, src: impl AsRef<[u8]>) -> StringView {
        let src = src.as_ref();
        if src.is_empty() {
            return StringView::default();
        }
        if self.chunk.capacity() - self.chunk.len() < src.len() {
            self.chunk.reserve(MIN_CHUNK_BYTES.max(src.len()));
        }
        self.chunk.extend_from_slice(src);
        let bytes = self.chunk.split().freeze();
        self.frozen.push(bytes.clone());
        self.data_size += src.len();
        StringView::from_shared(bytes)
    }

    /// Whether `view` points into bytes owned by this arena.
    pub fn contains(&self, view: &StringView) -> bool {
        if view.is_empty() {
            return true;
        }
        let range = view.as_ptr_range();
        self.frozen.iter().any(|chunk| {
            let owned = chunk.as_ref().as_ptr_range();
            owned.start <= range.start && range.end <= owned.end
        })
    }

    /// Total bytes copied into this arena.
    pub fn data_size(&self) -> usize {
        self.data_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_string_roundtrip() {
        let mut buf = SourceBuffer::new();
        let v = buf.copy_string("hello");
        assert_eq!(v.as_str(), "hello");
        assert_eq!(buf.data_size(), 5);
    }

    #[test]
    fn test_views_survive_growth() {
        let mut buf = SourceBuffer::new();
        let first = buf.copy_string("first");
        // Force many appends well past the initial chunk.
        let mut views = Vec::new();
        for i in 0..1000 {
            views.push(buf.copy_string(format!("value-{i}").repeat(16)));
        }
        assert_eq!(first.as_str(), "first");
        for (i, v) in views.iter().enumerate() {
            assert_eq!(v.as_str(), format!("value-{i}").repeat(16));
        }
    }

    #[test]
    fn test_contains() {
        let mut buf = SourceBuffer::new();
        let owned = buf.copy_string("owned bytes");
        assert!(buf.contains(&owned));

        let mut other = SourceBuffer::new();
        let foreign = other.copy_string("foreign bytes");
        assert!(!buf.contains(&foreign));

        // Static literals are not arena bytes, empty views always pass.
        assert!(buf.contains(&StringView::default()));
        assert!(!buf.contains(&StringView::from_static("static")));
    }
}
