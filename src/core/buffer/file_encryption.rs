// SPDX-License-Identifier: MIT OR Apache-2.0

//! Buffer File Encryption
//!
//! XOR stream cipher keyed by a versioned per-install key. Position `i`
//! uses key byte `i % block_bytes`; output is padded with random printable
//! bytes up to the next block multiple. This is obfuscation for data at
//! rest kept for on-disk format compatibility; the seam allows a real AEAD
//! behind the same header later.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use once_cell::sync::Lazy;
use rand::Rng;

use crate::core::exception::{LogFluxError, LogFluxResult};

/// Magic prefix of every buffer file header.
pub const MAGIC: &[u8] = b"L\x01O\x01G\x01T\x01A\x01I\x01L\x01\x01E\x01N\x01C\x01R\x01Y\x01P\x01T";
pub const HEADER_LENGTH: usize = 128;
pub const FIELD_SPLITTER: u8 = 0x02;
pub const KEY_VALUE_SPLITTER: u8 = b':';
pub const FIELD_KEY_VERSION: &str = "key_version";

const FIRST_KEY_VERSION: i32 = 1;
const FIRST_KEY_VALUE: &[u8] = b"9f86d081884c7d659a2feaa0c55ad015";

struct KeyInfo {
    key: Vec<u8>,
    block_bytes: usize,
    version: i32,
}

pub struct FileEncryption {
    key_map: BTreeMap<i32, KeyInfo>,
    default_version: i32,
}

impl Default for FileEncryption {
    fn default() -> Self {
        Self::new()
    }
}

static INSTANCE: Lazy<FileEncryption> = Lazy::new(FileEncryption::new);

impl FileEncryption {
    /// Process-wide instance holding the per-install key ring.
    pub fn instance() -> &'static FileEncryption {
        &INSTANCE
    }

    pub fn new() -> Self {
        let mut key_map = BTreeMap::new();
        // Add new (version, key) pairs here; the latest version is default.
        key_map.insert(
            FIRST_KEY_VERSION,
            KeyInfo {
                key: FIRST_KEY_VALUE.to_vec(),
                block_bytes: FIRST_KEY_VALUE.len(),
                version: FIRST_KEY_VERSION,
            },
        );
        let default_version = key_map
            .values()
            .map(|k| k.version)
            .max()
            .unwrap_or(FIRST_KEY_VERSION);
        Self {
            key_map,
            default_version,
        }
    }

    pub fn default_key_version(&self) -> i32 {
        self.default_version
    }

    /// Encrypts with the keyed XOR stream; `version` zero selects the
    /// default key. Output length is the next block multiple of the input.
    pub fn encrypt(&self, src: &[u8], version: i32) -> LogFluxResult<Vec<u8>> {
        let key = if version == 0 {
            self.key_map.get(&self.default_version)
        } else {
            self.key_map.get(&version)
        }
        .ok_or(LogFluxError::InvalidKeyVersion { version })?;

        if src.is_empty() {
            return Err(LogFluxError::EncryptionError {
                message: "empty input".to_string(),
            });
        }
        let mut block_count = src.len() / key.block_bytes;
        if src.len() % key.block_bytes != 0 {
            block_count += 1;
        }
        let out_len = block_count * key.block_bytes;
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(out_len);
        for pos in 0..out_len {
            let key_byte = key.key[pos % key.block_bytes];
            let plain = if pos < src.len() {
                src[pos]
            } else {
                rng.gen_range(33u8..127u8)
            };
            out.push(plain ^ key_byte);
        }
        Ok(out)
    }

    /// Decrypts `plain_len` bytes out of the padded ciphertext.
    pub fn decrypt(&self, src: &[u8], plain_len: usize, version: i32) -> LogFluxResult<Vec<u8>> {
        let key = self
            .key_map
            .get(&version)
            .ok_or(LogFluxError::InvalidKeyVersion { version })?;
        if src.is_empty() || plain_len > src.len() {
            return Err(LogFluxError::EncryptionError {
                message: format!("decrypt size mismatch: src {} plain {}", src.len(), plain_len),
            });
        }
        if src.len() % key.block_bytes != 0 {
            return Err(LogFluxError::EncryptionError {
                message: format!("ciphertext not block aligned for key_version {version}"),
            });
        }
        let mut out = Vec::with_capacity(plain_len);
        for (pos, byte) in src.iter().take(plain_len).enumerate() {
            out.push(byte ^ key.key[pos % key.block_bytes]);
        }
        Ok(out)
    }

    /// The 128-byte file header: magic, `key_version:<n>`, zero padding.
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut header = Vec::with_capacity(HEADER_LENGTH);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(FIELD_KEY_VERSION.as_bytes());
        header.push(KEY_VALUE_SPLITTER);
        header.extend_from_slice(self.default_version.to_string().as_bytes());
        header.resize(HEADER_LENGTH, 0);
        header
    }

    /// Validates the header of `path` and returns its key/value fields.
    pub fn check_header(path: &Path) -> LogFluxResult<HashMap<String, String>> {
        let mut file = std::fs::File::open(path)?;
        let mut header = vec![0u8; HEADER_LENGTH];
        file.read_exact(&mut header).map_err(|_| {
            LogFluxError::buffer_corrupted(path.display().to_string(), "short header")
        })?;
        if !header.starts_with(MAGIC) {
            return Err(LogFluxError::buffer_corrupted(
                path.display().to_string(),
                "bad magic",
            ));
        }
        let reserve = &header[MAGIC.len()..];
        let reserve = match reserve.iter().position(|b| *b == 0) {
            Some(end) => &reserve[..end],
            None => reserve,
        };
        let mut fields = HashMap::new();
        for field in reserve.split(|b| *b == FIELD_SPLITTER) {
            if let Some(sep) = field.iter().position(|b| *b == KEY_VALUE_SPLITTER) {
                fields.insert(
                    String::from_utf8_lossy(&field[..sep]).to_string(),
                    String::from_utf8_lossy(&field[sep + 1..]).to_string(),
                );
            }
        }
        Ok(fields)
    }
}
