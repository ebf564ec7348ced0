//! Configuration loading and validation.
//!
//! Loaded once at startup, validated, then immutable: no runtime mutation
//! path exists, and every tracker reads the same threshold table.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::frame::AttackType;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub thresholds: ThresholdTable,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or fall back to defaults.
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/airsentry/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("airsentry/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Reject out-of-range values before the pipeline starts.
    pub fn validate(&self) -> Result<()> {
        if !(100..=60_000).contains(&self.detection.window_ms) {
            bail!(
                "detection.window_ms must be between 100 and 60000, got {}",
                self.detection.window_ms
            );
        }
        if self.capture.queue_capacity == 0 {
            bail!("capture.queue_capacity must be at least 1");
        }
        for (attack, t) in [
            (AttackType::Deauth, &self.thresholds.deauth),
            (AttackType::BeaconFlood, &self.thresholds.beacon_flood),
            (AttackType::RogueAp, &self.thresholds.rogue_ap),
        ] {
            if t.min_predictions == 0 {
                bail!("thresholds.{}.min_predictions must be positive", attack);
            }
            if !(0.0..=1.0).contains(&t.confidence) {
                bail!(
                    "thresholds.{}.confidence must be in [0, 1], got {}",
                    attack,
                    t.confidence
                );
            }
            if t.rate_threshold <= 0.0 {
                bail!(
                    "thresholds.{}.rate_threshold must be positive, got {}",
                    attack,
                    t.rate_threshold
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How often pipeline counters are logged (seconds).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Monitor-mode interface to capture from.
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Promiscuous mode (usually true for monitor mode).
    #[serde(default = "default_true")]
    pub promiscuous: bool,

    /// Immediate mode (lower latency).
    #[serde(default = "default_true")]
    pub immediate: bool,

    /// Capture buffer size in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Frame queue capacity between capture and the pipeline. When full,
    /// the oldest unconsumed frame is evicted.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            promiscuous: true,
            immediate: true,
            buffer_size: default_buffer_size(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Feature window duration in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Prediction lookback (count-based). 0 means "same as each attack's
    /// min_predictions".
    #[serde(default)]
    pub lookback: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            lookback: 0,
        }
    }
}

/// Per-attack-type alert policy. Static after load.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Thresholds {
    /// Qualifying predictions required before an alert.
    pub min_predictions: u32,
    /// Confidence floor for a prediction to qualify (inclusive).
    pub confidence: f64,
    /// Minimum seconds between alerts of the same attack type.
    pub cooldown_secs: u64,
    /// Attack-relevant frames per second required.
    pub rate_threshold: f64,
    /// Absolute floor on attack-relevant frames across the qualifying
    /// windows. 0 disables the floor.
    #[serde(default)]
    pub min_frames: u64,
}

impl Thresholds {
    pub fn default_deauth() -> Self {
        Self {
            min_predictions: 15,
            confidence: 0.82,
            cooldown_secs: 60,
            rate_threshold: 8.0,
            min_frames: 0,
        }
    }

    pub fn default_beacon_flood() -> Self {
        Self {
            min_predictions: 12,
            confidence: 0.75,
            cooldown_secs: 90,
            rate_threshold: 30.0,
            min_frames: 50,
        }
    }

    pub fn default_rogue_ap() -> Self {
        Self {
            min_predictions: 15,
            confidence: 0.88,
            cooldown_secs: 180,
            rate_threshold: 10.0,
            min_frames: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdTable {
    #[serde(default = "Thresholds::default_deauth")]
    pub deauth: Thresholds,

    #[serde(default = "Thresholds::default_beacon_flood")]
    pub beacon_flood: Thresholds,

    #[serde(default = "Thresholds::default_rogue_ap")]
    pub rogue_ap: Thresholds,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            deauth: Thresholds::default_deauth(),
            beacon_flood: Thresholds::default_beacon_flood(),
            rogue_ap: Thresholds::default_rogue_ap(),
        }
    }
}

impl ThresholdTable {
    pub fn get(&self, attack: AttackType) -> &Thresholds {
        match attack {
            AttackType::Deauth => &self.deauth,
            AttackType::BeaconFlood => &self.beacon_flood,
            AttackType::RogueAp => &self.rogue_ap,
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    30
}

fn default_interface() -> String {
    "wlan0".to_string()
}

fn default_buffer_size() -> usize {
    65536
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_window_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.thresholds.deauth.min_predictions, 15);
        assert_eq!(config.thresholds.beacon_flood.cooldown_secs, 90);
        assert_eq!(config.thresholds.rogue_ap.cooldown_secs, 180);
        assert_eq!(config.detection.window_ms, 1000);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(
            parsed.thresholds.deauth.min_predictions,
            config.thresholds.deauth.min_predictions
        );
        assert_eq!(parsed.capture.interface, config.capture.interface);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [capture]
            interface = "wlan1mon"

            [thresholds.deauth]
            min_predictions = 8
            confidence = 0.9
            cooldown_secs = 30
            rate_threshold = 4.0
            "#,
        )
        .unwrap();
        assert_eq!(parsed.capture.interface, "wlan1mon");
        assert_eq!(parsed.thresholds.deauth.min_predictions, 8);
        assert_eq!(parsed.thresholds.deauth.min_frames, 0);
        // Untouched sections keep their defaults.
        assert_eq!(parsed.thresholds.beacon_flood.min_predictions, 12);
        assert_eq!(parsed.detection.window_ms, 1000);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.thresholds.deauth.confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.thresholds.beacon_flood.min_predictions = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.thresholds.rogue_ap.rate_threshold = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection.window_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::default();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.capture.interface, config.capture.interface);

        assert!(Config::load(dir.path().join("missing.toml")).is_err());
    }
}
