// logflux_rust/src/core/buffer/mod.rs

pub mod buffer_meta;
pub mod disk_buffer_writer;
pub mod file_encryption;

pub use buffer_meta::{EncryptionStateMeta, BUFFER_META_BASE_SIZE};
pub use disk_buffer_writer::DiskBufferWriter;
pub use file_encryption::FileEncryption;
