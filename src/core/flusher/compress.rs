// SPDX-License-Identifier: MIT OR Apache-2.0

//! Payload Compression
//!
//! Applied after serialization; the uncompressed size travels with the
//! item as `raw_size` so receivers and the replayer can decompress.

use crate::core::exception::{LogFluxError, LogFluxResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompressType {
    None,
    #[default]
    Lz4,
    Zstd,
}

impl CompressType {
    pub fn from_str(s: &str) -> Self {
        match s {
            "none" => CompressType::None,
            "zstd" => CompressType::Zstd,
            _ => CompressType::Lz4,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            CompressType::None => 0,
            CompressType::Lz4 => 1,
            CompressType::Zstd => 2,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            0 => CompressType::None,
            2 => CompressType::Zstd,
            _ => CompressType::Lz4,
        }
    }
}

/// Payload shape carried by a sender queue item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RawDataType {
    /// One serialized event group.
    #[default]
    EventGroup,
    /// A packed list of serialized groups.
    EventGroupList,
}

impl RawDataType {
    pub fn as_i32(self) -> i32 {
        match self {
            RawDataType::EventGroup => 0,
            RawDataType::EventGroupList => 1,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            1 => RawDataType::EventGroupList,
            _ => RawDataType::EventGroup,
        }
    }
}

pub fn compress(data: &[u8], compress_type: CompressType) -> LogFluxResult<Vec<u8>> {
    match compress_type {
        CompressType::None => Ok(data.to_vec()),
        CompressType::Lz4 => lz4::block::compress(data, None, false).map_err(|e| {
            LogFluxError::CompressionError {
                message: format!("lz4 compress: {e}"),
            }
        }),
        CompressType::Zstd => {
            zstd::stream::encode_all(data, 0).map_err(|e| LogFluxError::CompressionError {
                message: format!("zstd compress: {e}"),
            })
        }
    }
}

pub fn decompress(
    data: &[u8],
    raw_size: usize,
    compress_type: CompressType,
) -> LogFluxResult<Vec<u8>> {
    match compress_type {
        CompressType::None => Ok(data.to_vec()),
        CompressType::Lz4 => {
            lz4::block::decompress(data, Some(raw_size as i32)).map_err(|e| {
                LogFluxError::CompressionError {
                    message: format!("lz4 decompress: {e}"),
                }
            })
        }
        CompressType::Zstd => {
            zstd::stream::decode_all(data).map_err(|e| LogFluxError::CompressionError {
                message: format!("zstd decompress: {e}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_codecs() {
        let payload = b"some moderately repetitive payload payload payload".repeat(20);
        for ct in [CompressType::None, CompressType::Lz4, CompressType::Zstd] {
            let compressed = compress(&payload, ct).expect("compress");
            let restored = decompress(&compressed, payload.len(), ct).expect("decompress");
            assert_eq!(restored, payload, "{ct:?}");
        }
    }

    #[test]
    fn test_type_codes_round_trip() {
        for ct in [CompressType::None, CompressType::Lz4, CompressType::Zstd] {
            assert_eq!(CompressType::from_i32(ct.as_i32()), ct);
        }
        for dt in [RawDataType::EventGroup, RawDataType::EventGroupList] {
            assert_eq!(RawDataType::from_i32(dt.as_i32()), dt);
        }
    }
}
