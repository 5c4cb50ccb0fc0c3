// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod error;
pub use error::{LogFluxError, LogFluxResult};
