// SPDX-License-Identifier: MIT OR Apache-2.0

//! Size-Tracking Tag Map
//!
//! Map from `StringView` to `StringView` that maintains the cumulative
//! key+value byte size in O(1) per mutation, so flushers can decide batch
//! completion without rescanning tags.

use std::collections::BTreeMap;

use super::string_view::StringView;

#[derive(Clone, Default, Debug)]
pub struct SizedMap {
    inner: BTreeMap<StringView, StringView>,
    allocated: usize,
}

impl SizedMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: StringView, val: StringView) {
        match self.inner.get_mut(key.as_bytes()) {
            Some(existing) => {
                self.allocated += val.len();
                self.allocated -= existing.len();
                *existing = val;
            }
            None => {
                self.allocated += key.len() + val.len();
                self.inner.insert(key, val);
            }
        }
    }

    pub fn erase(&mut self, key: &[u8]) {
        if let Some((k, v)) = self.inner.remove_entry(key) {
            self.allocated -= k.len() + v.len();
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&StringView> {
        self.inner.get(key)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.inner.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StringView, &StringView)> {
        self.inner.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &StringView> {
        self.inner.keys()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn data_size(&self) -> usize {
        self.allocated
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.allocated = 0;
    }
}

impl FromIterator<(StringView, StringView)> for SizedMap {
    fn from_iter<T: IntoIterator<Item = (StringView, StringView)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sv(s: &'static str) -> StringView {
        StringView::from_static(s)
    }

    #[test]
    fn test_size_tracking() {
        let mut m = SizedMap::new();
        m.insert(sv("job"), sv("node"));
        assert_eq!(m.data_size(), 7);

        // Replacing a value adjusts by the delta only.
        m.insert(sv("job"), sv("nodeexporter"));
        assert_eq!(m.data_size(), 3 + 12);

        m.erase(b"job");
        assert_eq!(m.data_size(), 0);
        assert!(m.is_empty());
    }

    #[test]
    fn test_lookup_by_bytes() {
        let mut m = SizedMap::new();
        m.insert(sv("instance"), sv("localhost:8080"));
        assert_eq!(m.get(b"instance").map(|v| v.as_str()), Some("localhost:8080"));
        assert!(m.contains_key(b"instance"));
        assert!(!m.contains_key(b"missing"));
    }
}
