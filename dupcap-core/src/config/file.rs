//! Configuration file loading
//!
//! Loads user configuration from `~/.config/dupcap/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::CaptureConfig;
use crate::error::{CaptureError, Result};

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Capture session settings
    #[serde(default)]
    pub capture: CaptureConfig,
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("dupcap").join("config.toml")
        } else if let Some(home) = dirs::home_dir() {
            home.join(".config").join("dupcap").join("config.toml")
        } else {
            PathBuf::from("dupcap.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    ///
    /// A missing file yields the defaults.
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| CaptureError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)
            .map_err(|e| CaptureError::Config(format!("Failed to parse config file: {}", e)))?;

        for warning in config.capture.validate() {
            warn!("{}", warning);
        }
        config.capture.validate_strict().map_err(CaptureError::Config)?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::default_path())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                CaptureError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| CaptureError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| CaptureError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Create a default config file if it doesn't exist
    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_path();
        if path.exists() {
            return Ok(false);
        }

        std::fs::create_dir_all(path.parent().unwrap_or(&path))
            .map_err(|e| CaptureError::Config(format!("Failed to create config directory: {}", e)))?;
        std::fs::write(&path, sample_config())
            .map_err(|e| CaptureError::Config(format!("Failed to write config file: {}", e)))?;
        info!("Created sample configuration at {:?}", path);
        Ok(true)
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# dupcap configuration

[capture]
# Adapter and output to duplicate (see `dupcap outputs`)
adapter = 0
output = 0

# Frame layout tokens: "yuv420" for planar YUV 4:2:0, "h264" for hardware
# H.264. Raw BGRA when neither is given; the last one wins if both are.
options = []

# Wait per acquire in milliseconds
acquire_timeout_ms = 1000

# Acquires carrying neither pixels nor cursor changes that capture() skips;
# one more ends it with a timeout
max_spurious_wakes = 16

# Attempts at obtaining the duplication interface, and the pause between them
duplicate_attempts = 2
duplicate_retry_delay_ms = 200

# GPU thread priority requested at initialize (-7 to 7)
gpu_thread_priority = 7

# Encoder pumps per H.264 get_frame before reporting a timeout
max_encoder_pumps = 64
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();
        assert_eq!(config.capture.adapter, 0);
        assert_eq!(config.capture.acquire_timeout_ms, 1000);
        assert!(config.capture.options.is_empty());
    }

    #[test]
    fn test_sample_config_parses() {
        let config: ConfigFile = toml::from_str(&sample_config()).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let config: ConfigFile = toml::from_str("[capture]\noutput = 2\n").unwrap();
        assert_eq!(config.capture.output, 2);
        assert_eq!(config.capture.duplicate_attempts, 2);
    }
}
