//! Error Types for the Pipeline Runtime
//!
//! Errors are propagated through result types; processors never panic
//! outward and queue callers always see a result.

use thiserror::Error;

/// Result type for pipeline runtime operations
pub type LogFluxResult<T> = Result<T, LogFluxError>;

#[derive(Error, Debug)]
pub enum LogFluxError {
    #[error("Configuration file not found: {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid config syntax in {file}: {message}")]
    ConfigParseError { file: String, message: String },

    #[error("Plugin '{plugin}' init failed: {message}")]
    PluginInitError { plugin: String, message: String },

    #[error("Unknown plugin type: {plugin}")]
    UnknownPlugin { plugin: String },

    #[error("Queue '{key}' does not exist")]
    NoSuchQueue { key: String },

    #[error("Queue '{key}' is full")]
    QueueFull { key: String },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Compression error: {message}")]
    CompressionError { message: String },

    #[error("Buffer file corrupted: {path}: {message}")]
    BufferFileCorrupted { path: String, message: String },

    #[error("Encrypt/decrypt error: {message}")]
    EncryptionError { message: String },

    #[error("Invalid key version: {version}")]
    InvalidKeyVersion { version: i32 },

    #[error("Network unavailable for region '{region}'")]
    NetworkUnavailable { region: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Protobuf decode error: {0}")]
    PbDecodeError(#[from] prost::DecodeError),
}

impl LogFluxError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn plugin_init(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PluginInitError {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    pub fn config_parse(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn buffer_corrupted(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BufferFileCorrupted {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LogFluxError::ConfigFileNotFound {
            path: "p1.yaml".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("Configuration file not found"));
        assert!(display.contains("p1.yaml"));
    }

    #[test]
    fn test_error_helpers() {
        let err = LogFluxError::plugin_init("processor_prom_relabel", "bad rule");
        assert!(matches!(err, LogFluxError::PluginInitError { .. }));

        let err = LogFluxError::buffer_corrupted("/tmp/f", "short header");
        assert!(matches!(err, LogFluxError::BufferFileCorrupted { .. }));
    }
}
