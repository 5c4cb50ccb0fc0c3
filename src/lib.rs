// SPDX-License-Identifier: MIT OR Apache-2.0

//! logflux_rust — on-host telemetry event pipeline runtime.
//!
//! The crate moves `PipelineEventGroup`s from input sources through a chain
//! of processors into flushers that serialize batches and hand them to a
//! sending subsystem backed by a disk-spill write-ahead store.

pub mod core;

pub use crate::core::event::{PipelineEvent, PipelineEventGroup, SourceBuffer, StringView};
pub use crate::core::exception::{LogFluxError, LogFluxResult};
