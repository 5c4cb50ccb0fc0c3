// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue Keys
//!
//! Cheap-clone key naming one queue of the fabric: the pipeline id for
//! process queues, the flusher target for sender queues.

use std::fmt;
use std::sync::Arc;

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct QueueKey(Arc<str>);

impl QueueKey {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for QueueKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for QueueKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
