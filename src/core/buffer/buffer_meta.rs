// SPDX-License-Identifier: MIT OR Apache-2.0

//! Disk Record Framing
//!
//! Every record starts with a fixed-size state meta, followed by the
//! encoded record meta and the ciphertext. `encoded_info_size` carries a
//! sentinel offset that distinguishes the protobuf-framed meta from the
//! legacy layout where the field held a bare project-string length.

use crate::core::exception::{LogFluxError, LogFluxResult};

/// Sentinel added to `encoded_info_size` when the meta is protobuf-framed.
pub const BUFFER_META_BASE_SIZE: i32 = 65536;

/// Fixed on-disk state header of one record, little-endian, 24 bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncryptionStateMeta {
    pub encoded_info_size: i32,
    pub log_data_size: i32,
    pub encryption_size: i32,
    pub timestamp: i32,
    /// 0 = pending, 1 = sent or permanently classified.
    pub handled: u8,
    pub retry_times: u8,
}

impl EncryptionStateMeta {
    pub const SIZE: usize = 24;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.encoded_info_size.to_le_bytes());
        out[4..8].copy_from_slice(&self.log_data_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.encryption_size.to_le_bytes());
        out[12..16].copy_from_slice(&self.timestamp.to_le_bytes());
        out[16] = self.handled;
        out[17] = self.retry_times;
        // Bytes 18..24 reserved.
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> LogFluxResult<Self> {
        if bytes.len() < Self::SIZE {
            return Err(LogFluxError::internal(format!(
                "state meta too short: {} bytes",
                bytes.len()
            )));
        }
        let read_i32 = |off: usize| {
            i32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };
        Ok(Self {
            encoded_info_size: read_i32(0),
            log_data_size: read_i32(4),
            encryption_size: read_i32(8),
            timestamp: read_i32(12),
            handled: bytes[16],
            retry_times: bytes[17],
        })
    }

    /// Size of the meta bytes that follow, with the sentinel stripped.
    pub fn meta_payload_size(&self) -> i32 {
        if self.encoded_info_size > BUFFER_META_BASE_SIZE {
            self.encoded_info_size - BUFFER_META_BASE_SIZE
        } else {
            self.encoded_info_size
        }
    }

    /// Whether the meta payload is protobuf-framed.
    pub fn is_pb_meta(&self) -> bool {
        self.encoded_info_size > BUFFER_META_BASE_SIZE
    }
}
