//! Configuration management for piper-speak-rs.
//!
//! Loads config from YAML files in standard locations. Every field has a
//! default, so a partial file (or no file at all) is valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("server.port must not be 0")]
    InvalidPort,

    #[error("synthesis.{0} must not be empty")]
    EmptyPath(&'static str),

    #[error("synthesis.timeout_secs must be greater than 0")]
    InvalidTimeout,

    #[error("{field} = {value} is outside the supported range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("effects.pitch.frame_size = {0} must be a power of two")]
    FrameSizeNotPowerOfTwo(usize),

    #[error("effects.pitch.overlap = {overlap} does not give a usable hop for frame_size = {frame_size}")]
    InvalidOverlap { frame_size: usize, overlap: usize },

    #[error("effects.pitch.gain = {0} must be finite and greater than 0")]
    InvalidGain(f32),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Path to the Piper executable.
    pub binary: PathBuf,
    /// Voice model passed as `--model`.
    pub model: PathBuf,
    /// Arguments placed before `--model`.
    pub extra_args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("etc/resource/piper/piper"),
            model: PathBuf::from("etc/resource/piper/cs_CZ-jirka-medium.onnx"),
            extra_args: Vec::new(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub output_dir: PathBuf,
    /// How long a file handed out by name stays on disk.
    pub retain_secs: u64,
    /// 0 disables the sweeper.
    pub sweep_interval_secs: u64,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            retain_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    pub enabled: bool,
    pub speed_factor: f64,
    pub chunk_size: usize,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            speed_factor: 0.95,
            chunk_size: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    pub enabled: bool,
    pub pitch_factor: f64,
    pub frame_size: usize,
    pub overlap: usize,
    pub gain: f32,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pitch_factor: 0.85,
            frame_size: 512,
            overlap: 480,
            gain: 3.0,
        }
    }
}

impl PitchConfig {
    pub fn hop(&self) -> usize {
        self.frame_size.saturating_sub(self.overlap)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub rate: RateConfig,
    pub pitch: PitchConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub synthesis: SynthesisConfig,
    pub artifacts: ArtifactConfig,
    pub effects: EffectsConfig,
}

impl Config {
    /// Load the service configuration.
    ///
    /// An explicit `--config` path wins; otherwise the first existing file
    /// from [`search_paths`] is used. A file that cannot be read or parsed
    /// leaves every setting at its default so the service still starts, and
    /// [`Config::validate`] decides whether the result is usable.
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path
            .map(Path::to_path_buf)
            .or_else(|| search_paths().into_iter().find(|p| p.exists()));

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match Self::from_file(&config_path) {
            Ok(config) => {
                info!("Loaded config from {}", config_path.display());
                config
            }
            Err(e) => {
                warn!("{e}, using defaults");
                Self::default()
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        serde_yml::from_str(&contents).map_err(|e| format!("Failed to parse {}: {e}", path.display()))
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if self.synthesis.binary.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("binary"));
        }
        if self.synthesis.model.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("model"));
        }
        if self.synthesis.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }

        let rate = &self.effects.rate;
        check_range("effects.rate.speed_factor", rate.speed_factor, 0.25, 4.0)?;
        check_range("effects.rate.chunk_size", rate.chunk_size as f64, 64.0, 65536.0)?;

        let pitch = &self.effects.pitch;
        check_range("effects.pitch.pitch_factor", pitch.pitch_factor, 0.25, 4.0)?;
        check_range("effects.pitch.frame_size", pitch.frame_size as f64, 64.0, 8192.0)?;
        if !pitch.frame_size.is_power_of_two() {
            return Err(ConfigError::FrameSizeNotPowerOfTwo(pitch.frame_size));
        }
        // Overlap-add only sums to a constant when the hop divides the frame
        // and at least four frames overlap each sample.
        let hop = pitch.hop();
        if pitch.overlap >= pitch.frame_size
            || pitch.frame_size % hop != 0
            || hop > pitch.frame_size / 4
        {
            return Err(ConfigError::InvalidOverlap {
                frame_size: pitch.frame_size,
                overlap: pitch.overlap,
            });
        }
        if !pitch.gain.is_finite() || pitch.gain <= 0.0 {
            return Err(ConfigError::InvalidGain(pitch.gain));
        }

        Ok(())
    }
}

/// Config files tried when no path is given, most local first:
/// `./config.yaml`, `~/.config/piper-speak/config.yaml`,
/// `/etc/piper-speak/config.yaml`.
pub fn search_paths() -> Vec<PathBuf> {
    [
        std::env::current_dir().ok().map(|d| d.join("config.yaml")),
        dirs::home_dir().map(|h| h.join(".config/piper-speak/config.yaml")),
        Some(PathBuf::from("/etc/piper-speak/config.yaml")),
    ]
    .into_iter()
    .flatten()
    .collect()
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(!config.effects.rate.enabled);
        assert!(!config.effects.pitch.enabled);
        assert_eq!(config.effects.pitch.hop(), 32);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
server:
  port: 9000
effects:
  pitch:
    enabled: true
    gain: 1.5
"#;
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.effects.pitch.enabled);
        assert_eq!(config.effects.pitch.gain, 1.5);
        assert_eq!(config.effects.pitch.frame_size, 512);
        assert_eq!(config.effects.rate.speed_factor, 0.95);
        assert_eq!(config.synthesis.timeout_secs, 60);
    }

    #[test]
    fn load_reads_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "synthesis:\n  binary: /opt/piper/piper\n  extra_args: [\"--speaker\", \"2\"]\n",
        )
        .unwrap();

        let config = Config::load(Some(&path));
        assert_eq!(config.synthesis.binary, PathBuf::from("/opt/piper/piper"));
        assert_eq!(config.synthesis.extra_args, vec!["--speaker", "2"]);
    }

    #[test]
    fn search_paths_go_from_local_to_system() {
        let paths = search_paths();
        assert_eq!(
            paths.first(),
            Some(&std::env::current_dir().unwrap().join("config.yaml"))
        );
        assert_eq!(
            paths.last(),
            Some(&PathBuf::from("/etc/piper-speak/config.yaml"))
        );
    }

    #[test]
    fn load_falls_back_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server: [this is not a map").unwrap();

        let config = Config::load(Some(&path));
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn rejects_out_of_range_factors() {
        let mut config = Config::default();
        config.effects.rate.speed_factor = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "effects.rate.speed_factor", .. })
        ));

        let mut config = Config::default();
        config.effects.pitch.pitch_factor = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "effects.pitch.pitch_factor", .. })
        ));
    }

    #[test]
    fn rejects_unusable_frames() {
        let mut config = Config::default();
        config.effects.pitch.frame_size = 500;
        config.effects.pitch.overlap = 400;
        assert_eq!(config.validate(), Err(ConfigError::FrameSizeNotPowerOfTwo(500)));

        let mut config = Config::default();
        config.effects.pitch.overlap = 512;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidOverlap { .. })));

        // hop of 48 does not divide 512
        let mut config = Config::default();
        config.effects.pitch.overlap = 464;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidOverlap { .. })));

        // hop of 256 leaves only two overlapping frames
        let mut config = Config::default();
        config.effects.pitch.overlap = 256;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidOverlap { .. })));
    }

    #[test]
    fn rejects_bad_gain_and_timeout() {
        let mut config = Config::default();
        config.effects.pitch.gain = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidGain(0.0)));

        let mut config = Config::default();
        config.synthesis.timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidTimeout));

        let mut config = Config::default();
        config.server.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort));
    }
}
