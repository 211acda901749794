//! Engine configuration loading and resolution
//!
//! Configuration is a small TOML file. Every field has a built-in default so
//! an empty file (or no file at all) yields a working engine.
//!
//! Resolution order:
//! 1. Command-line argument (highest priority)
//! 2. `CHIRP_CONFIG` environment variable
//! 3. User config file (`<config dir>/chirp/config.toml`, then `/etc/chirp/config.toml`)
//! 4. Built-in defaults (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "CHIRP_CONFIG";

/// Audio engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of concurrent playback slots
    pub max_streams: usize,

    /// Per-stream ring buffer budget in KiB (16-bit samples)
    ///
    /// The ring capacity is the largest power of two that fits.
    pub stream_buffer_kb: usize,

    /// Explicit ring capacity in samples (must be a power of two)
    ///
    /// Overrides `stream_buffer_kb` when set.
    pub ring_capacity: Option<usize>,

    /// Hardware output sample rate
    pub output_sample_rate: u32,

    /// Size of the MP3 decoder pool
    pub max_mp3_decoders: usize,

    /// Size of the AAC decoder pool (shared by .aac and .m4a sources)
    pub max_aac_decoders: usize,

    /// Memory budget for all pooled decoders in KiB
    pub decoder_arena_kb: usize,

    /// Maximum PCM samples read from a WAV source per fill tick
    pub pcm_chunk_samples: usize,

    /// Maximum compressed bytes handed to a decoder per fill tick
    pub compressed_read_bytes: usize,

    /// Maximum container frames decoded per stream per fill tick
    pub frames_per_tick: usize,

    /// Master output volume (0.0 to 1.0), applied after mixing
    pub master_volume: f32,

    /// Root directory of the removable card backend
    pub card_root: PathBuf,

    /// Root directory of the internal flash backend
    pub flash_root: PathBuf,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_streams: 3,
            stream_buffer_kb: 512,
            ring_capacity: None,
            output_sample_rate: 44_100,
            max_mp3_decoders: 2,
            max_aac_decoders: 2,
            decoder_arena_kb: 256,
            pcm_chunk_samples: 512,
            compressed_read_bytes: 512,
            frames_per_tick: 2,
            master_volume: 1.0,
            card_root: PathBuf::from("."),
            flash_root: get_default_flash_root(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading engine configuration from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Resolve configuration following the documented priority order
    ///
    /// A file named explicitly (CLI or environment) must load; the default
    /// locations are optional.
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&path));
        }

        if let Some(path) = find_config_file() {
            info!("Using configuration file {}", path.display());
            return Self::load(&path);
        }

        debug!("No configuration file found, using built-in defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.max_streams == 0 {
            return Err(Error::Config("max_streams must be at least 1".to_string()));
        }
        if let Some(capacity) = self.ring_capacity {
            if capacity < 2 || !capacity.is_power_of_two() {
                return Err(Error::Config(format!(
                    "ring_capacity must be a power of two >= 2 (got {})",
                    capacity
                )));
            }
        } else if self.stream_buffer_kb == 0 {
            return Err(Error::Config("stream_buffer_kb must be non-zero".to_string()));
        }
        if self.output_sample_rate == 0 {
            return Err(Error::Config("output_sample_rate must be non-zero".to_string()));
        }
        if self.pcm_chunk_samples == 0 || self.compressed_read_bytes == 0 || self.frames_per_tick == 0 {
            return Err(Error::Config(
                "pcm_chunk_samples, compressed_read_bytes and frames_per_tick must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.master_volume) {
            return Err(Error::Config(format!(
                "master_volume must be within 0.0..=1.0 (got {})",
                self.master_volume
            )));
        }
        Ok(())
    }

    /// Ring buffer capacity in samples for each stream
    pub fn ring_capacity(&self) -> usize {
        match self.ring_capacity {
            Some(capacity) => capacity,
            None => {
                let samples = (self.stream_buffer_kb * 1024 / 2).max(2);
                // Largest power of two not above the budget
                1usize << (usize::BITS - 1 - samples.leading_zeros())
            }
        }
    }
}

/// Find the first existing configuration file in the default locations
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("chirp").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/chirp/config.toml");
    if cfg!(unix) && system_config.exists() {
        return Some(system_config);
    }
    None
}

/// OS-dependent default location for the internal flash backend
fn get_default_flash_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("chirp").join("flash"))
        .unwrap_or_else(|| PathBuf::from("./flash"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_streams, 3);
        // 512 KiB of 16-bit samples
        assert_eq!(config.ring_capacity(), 262_144);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("max_streams = 5\nmaster_volume = 0.5\n").unwrap();
        assert_eq!(config.max_streams, 5);
        assert_eq!(config.master_volume, 0.5);
        assert_eq!(config.max_mp3_decoders, 2);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_ring_capacity_rounds_down_to_power_of_two() {
        let config = EngineConfig {
            stream_buffer_kb: 3,
            ..Default::default()
        };
        // 3 KiB = 1536 samples -> 1024
        assert_eq!(config.ring_capacity(), 1024);
    }

    #[test]
    fn test_explicit_ring_capacity_must_be_power_of_two() {
        let err = EngineConfig::from_toml_str("ring_capacity = 12\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = EngineConfig::from_toml_str("ring_capacity = 8\n").unwrap();
        assert_eq!(config.ring_capacity(), 8);
    }

    #[test]
    fn test_rejects_out_of_range_volume() {
        assert!(EngineConfig::from_toml_str("master_volume = 1.5\n").is_err());
    }

    #[test]
    fn test_rejects_zero_streams() {
        assert!(EngineConfig::from_toml_str("max_streams = 0\n").is_err());
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = EngineConfig::from_toml_str("max_streams = \"three\"\n").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    #[serial]
    fn test_resolve_prefers_cli_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_streams = 7").unwrap();

        std::env::set_var(CONFIG_ENV_VAR, "/nonexistent/chirp.toml");
        let config = EngineConfig::resolve(Some(file.path())).unwrap();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(config.max_streams, 7);
    }

    #[test]
    #[serial]
    fn test_resolve_env_var_must_exist() {
        std::env::set_var(CONFIG_ENV_VAR, "/nonexistent/chirp.toml");
        let result = EngineConfig::resolve(None);
        std::env::remove_var(CONFIG_ENV_VAR);

        assert!(matches!(result, Err(Error::Io(_))));
    }
}
