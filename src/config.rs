//! Configuration management for the looper core
//!
//! Runtime configuration is loaded from a JSON file so the hand-tuned
//! detection constants (debounce, threshold multiplier) can be adjusted
//! without recompilation. Every section falls back to its defaults when
//! missing from the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::LooperError;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub analysis: AnalysisConfig,
    pub onset_detection: OnsetDetectionConfig,
    pub classifier: ClassifierConfig,
    pub looper: LooperConfig,
}

/// Framing parameters shared by the spectrum analyzer and feature extractor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Audio sample rate in Hz
    pub sample_rate: u32,
    /// FFT window size in samples (hop = window / 4)
    pub window_size: usize,
}

impl AnalysisConfig {
    /// Hop size in samples (a quarter of the analysis window)
    pub fn hop_size(&self) -> usize {
        (self.window_size / 4).max(1)
    }

    /// Duration of one hop in seconds
    pub fn hop_secs(&self) -> f64 {
        self.hop_size() as f64 / self.sample_rate as f64
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            window_size: 1024,
        }
    }
}

/// Onset detection algorithm parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetDetectionConfig {
    /// Multiplier applied to the mean of recent flux values
    pub threshold_multiplier: f32,
    /// Number of flux values kept for the adaptive threshold
    pub history_len: usize,
    /// Fixed threshold used until the flux history is full
    pub warmup_floor: f32,
    /// Flux must also exceed this absolute value
    pub absolute_floor: f32,
    /// Minimum spacing between accepted onsets in milliseconds
    pub debounce_ms: u64,
}

impl Default for OnsetDetectionConfig {
    fn default() -> Self {
        Self {
            threshold_multiplier: 1.5,
            history_len: 32,
            warmup_floor: 5.0,
            absolute_floor: 0.5,
            debounce_ms: 120,
        }
    }
}

/// Classifier selection and intensity mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Labeled training CSV; heuristic fallback is used when absent
    pub training_data: Option<PathBuf>,
    /// Neighbors consulted by the k-NN classifier
    pub k: usize,
    /// Frame energy that maps to intensity 1.0
    pub full_scale_energy: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            training_data: None,
            k: 3,
            full_scale_energy: 0.25,
        }
    }
}

/// Track, recording and synchronization parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    /// Number of independent loop tracks
    pub track_count: usize,
    /// Directory holding `track_N_drums.txt` pattern files
    pub pattern_dir: PathBuf,
    /// Recording sessions longer than this are force-stopped
    pub max_recording_secs: f64,
    /// Takes shorter than this are discarded instead of looped
    pub min_loop_secs: f64,
    /// Watchdog polling interval
    pub watchdog_poll_ms: u64,
    /// Coordinator polling interval while no track is looping
    pub coordinator_poll_ms: u64,
    /// Duration changes below this are not worth rescaling events for
    pub fit_epsilon_secs: f64,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            track_count: 3,
            pattern_dir: PathBuf::from("patterns"),
            max_recording_secs: 60.0,
            min_loop_secs: 0.1,
            watchdog_poll_ms: 50,
            coordinator_poll_ms: 10,
            fit_epsilon_secs: 0.001,
        }
    }
}

impl LooperConfig {
    /// Path of the persisted pattern for a track
    pub fn pattern_path(&self, track: usize) -> PathBuf {
        self.pattern_dir.join(format!("track_{}_drums.txt", track))
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// Missing or unparsable files fall back to the defaults with a warning.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), LooperError> {
        let invalid = |reason: &str| {
            Err(LooperError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.looper.track_count == 0 {
            return invalid("track_count must be at least 1");
        }
        if self.analysis.window_size < 64 || !self.analysis.window_size.is_power_of_two() {
            return invalid("window_size must be a power of two >= 64");
        }
        if self.analysis.sample_rate == 0 {
            return invalid("sample_rate must be greater than 0");
        }
        if self.classifier.k == 0 {
            return invalid("classifier k must be at least 1");
        }
        if self.onset_detection.history_len == 0 {
            return invalid("history_len must be at least 1");
        }
        if self.looper.max_recording_secs <= 0.0 || self.looper.min_loop_secs < 0.0 {
            return invalid("recording durations must be positive");
        }
        if self.looper.watchdog_poll_ms == 0 || self.looper.coordinator_poll_ms == 0 {
            return invalid("polling intervals must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.onset_detection.threshold_multiplier, 1.5);
        assert_eq!(config.onset_detection.debounce_ms, 120);
        assert_eq!(config.analysis.window_size, 1024);
        assert_eq!(config.analysis.hop_size(), 256);
        assert_eq!(config.looper.track_count, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(
            parsed.onset_detection.absolute_floor,
            config.onset_detection.absolute_floor
        );
        assert_eq!(parsed.looper.pattern_dir, config.looper.pattern_dir);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{ "onset_detection": { "debounce_ms": 150 } }"#).unwrap();
        assert_eq!(parsed.onset_detection.debounce_ms, 150);
        assert_eq!(parsed.onset_detection.threshold_multiplier, 1.5);
        assert_eq!(parsed.looper.track_count, 3);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("/definitely/not/here.json");
        assert_eq!(config.classifier.k, 3);
    }

    #[test]
    fn test_validate_rejects_bad_window() {
        let mut config = AppConfig::default();
        config.analysis.window_size = 1000;
        assert!(matches!(
            config.validate(),
            Err(LooperError::InvalidConfig { .. })
        ));

        let mut config = AppConfig::default();
        config.looper.track_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pattern_path() {
        let config = LooperConfig::default();
        assert_eq!(
            config.pattern_path(2),
            PathBuf::from("patterns").join("track_2_drums.txt")
        );
    }
}
