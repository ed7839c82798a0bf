//! Capture stage configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CaptureError, Result};

/// Capture stage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageConfig {
    /// Index of the capture device to open
    pub device_index: u32,
    /// Defaults used to fill unset buffer pool request fields
    pub pool: PoolConfig,
    /// Refuse to stream when the negotiated buffers are smaller than a frame
    pub strict_buffer_size: bool,
    /// Name given to the acquisition thread
    pub thread_name: String,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            pool: PoolConfig::default(),
            strict_buffer_size: true,
            thread_name: "capture-acquisition".to_string(),
        }
    }
}

impl StageConfig {
    /// Create config for a specific device
    pub fn for_device(index: u32) -> Self {
        Self {
            device_index: index,
            ..Default::default()
        }
    }

    /// Parse config from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StageConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        if self.thread_name.trim().is_empty() {
            return Err(CaptureError::Config(
                "thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Buffer pool request defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of buffers
    pub buffer_count: u32,
    /// Size of each buffer in bytes
    pub buffer_size: usize,
    /// Buffer alignment in bytes
    pub alignment: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            buffer_size: 230400, // 320x240 RGB24
            alignment: 1,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_count == 0 {
            return Err(CaptureError::Config(
                "pool.buffer_count must be greater than 0".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(CaptureError::Config(
                "pool.buffer_size must be greater than 0".to_string(),
            ));
        }
        if self.alignment != 0 && !self.alignment.is_power_of_two() {
            return Err(CaptureError::Config(format!(
                "pool.alignment must be a power of two, got {}",
                self.alignment
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StageConfig::default();
        assert_eq!(config.device_index, 0);
        assert_eq!(config.pool.buffer_count, 3);
        assert_eq!(config.pool.buffer_size, 230400);
        assert_eq!(config.pool.alignment, 1);
        assert!(config.strict_buffer_size);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = StageConfig::from_json(r#"{"device_index": 2, "pool": {"buffer_count": 5}}"#)
            .unwrap();
        assert_eq!(config.device_index, 2);
        assert_eq!(config.pool.buffer_count, 5);
        assert_eq!(config.pool.buffer_size, 230400);
        assert_eq!(config.thread_name, "capture-acquisition");
    }

    #[test]
    fn test_invalid_values() {
        let err = StageConfig::from_json(r#"{"pool": {"alignment": 3}}"#).unwrap_err();
        assert!(matches!(err, CaptureError::Config(_)));

        let err = StageConfig::from_json(r#"{"pool": {"buffer_count": 0}}"#).unwrap_err();
        assert!(matches!(err, CaptureError::Config(_)));

        let err = StageConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, CaptureError::Serialization(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"device_index": 1, "strict_buffer_size": false}}"#).unwrap();

        let config = StageConfig::load(file.path()).unwrap();
        assert_eq!(config.device_index, 1);
        assert!(!config.strict_buffer_size);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = StageConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, CaptureError::Io(_)));
    }
}
