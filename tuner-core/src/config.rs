//! # Configuration Module
//!
//! Every tunable of the pipeline with its default. Values are validated on
//! write: anything out of range is clamped and reported with a warning, never
//! silently dropped. Configs load from and save to JSON.

use crate::error::ConfigError;
use crate::strings::{STANDARD_TUNING, StringTuning};
use crate::tuning;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::fs;
use std::path::Path;

/// Range the YIN threshold is clamped to.
pub const THRESHOLD_RANGE: (f32, f32) = (0.05, 0.5);

/// Settings of the YIN estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Absolute threshold on the normalized difference.
    pub threshold: f32,
    /// Lowest detectable frequency in Hz; sets the largest lag searched.
    pub min_frequency: f32,
    /// Highest detectable frequency in Hz; sets the smallest lag searched.
    pub max_frequency: f32,
    /// Samples per frame.
    pub frame_size: usize,
    /// RMS below which a frame counts as silence.
    pub amplitude_threshold: f32,
    /// Candidates below this frequency use `low_band_scale`.
    pub low_band_edge_hz: f32,
    /// Candidates above this frequency use `high_band_scale`.
    pub high_band_edge_hz: f32,
    pub low_band_scale: f32,
    pub high_band_scale: f32,
    /// Refine the YIN frequency against the FFT magnitude spectrum.
    pub spectral_refinement: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.15,
            min_frequency: 60.0,
            max_frequency: 1350.0,
            frame_size: crate::audio::BUFFER_SIZE,
            amplitude_threshold: 0.001,
            low_band_edge_hz: 120.0,
            high_band_edge_hz: 230.0,
            low_band_scale: 1.5,
            high_band_scale: 1.2,
            spectral_refinement: false,
        }
    }
}

impl EstimatorConfig {
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        self.threshold = clamp_f32(
            "estimator.threshold",
            self.threshold,
            THRESHOLD_RANGE.0,
            THRESHOLD_RANGE.1,
            defaults.threshold,
        );
        self.min_frequency = clamp_f32(
            "estimator.min_frequency",
            self.min_frequency,
            20.0,
            2000.0,
            defaults.min_frequency,
        );
        self.max_frequency = clamp_f32(
            "estimator.max_frequency",
            self.max_frequency,
            self.min_frequency * 2.0,
            5000.0,
            defaults.max_frequency,
        );
        self.frame_size = clamp_ord("estimator.frame_size", self.frame_size, 64, 16384);
        self.amplitude_threshold = clamp_f32(
            "estimator.amplitude_threshold",
            self.amplitude_threshold,
            0.0,
            0.5,
            defaults.amplitude_threshold,
        );
        self.low_band_edge_hz = clamp_f32(
            "estimator.low_band_edge_hz",
            self.low_band_edge_hz,
            0.0,
            5000.0,
            defaults.low_band_edge_hz,
        );
        self.high_band_edge_hz = clamp_f32(
            "estimator.high_band_edge_hz",
            self.high_band_edge_hz,
            self.low_band_edge_hz,
            5000.0,
            defaults.high_band_edge_hz,
        );
        self.low_band_scale = clamp_f32(
            "estimator.low_band_scale",
            self.low_band_scale,
            0.5,
            3.0,
            defaults.low_band_scale,
        );
        self.high_band_scale = clamp_f32(
            "estimator.high_band_scale",
            self.high_band_scale,
            0.5,
            3.0,
            defaults.high_band_scale,
        );
        self
    }

    /// Longest lag one frame can search: the difference window of lag `tau`
    /// needs `frame_size / 2 - tau` samples, and interpolation needs one more
    /// lag on the right.
    pub fn max_searchable_lag(&self) -> usize {
        (self.frame_size / 2).saturating_sub(2).max(1)
    }

    /// Lowest fundamental whose period fits the lag search at `sample_rate`.
    pub fn lowest_reachable_frequency(&self, sample_rate: u32) -> f32 {
        sample_rate as f32 / self.max_searchable_lag() as f32
    }

    /// `min_frequency`, raised to what the frame size can actually resolve.
    pub fn effective_min_frequency(&self, sample_rate: u32) -> f32 {
        self.min_frequency
            .max(self.lowest_reachable_frequency(sample_rate))
    }
}

/// How the filter turns its history into one frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Smoothing {
    /// Median of the history window.
    Median,
    /// `smoothed = alpha * new + (1 - alpha) * old`.
    Exponential { alpha: f32 },
}

/// Settings of the stability filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Number of recent frequencies kept, 3 to 15.
    pub history_len: usize,
    pub smoothing: Smoothing,
    /// Estimates below this confidence count as silence.
    pub min_confidence: f32,
    /// Seconds of continuous silence before the current note is cleared.
    pub silence_duration: f32,
    /// Seconds before the same note may be forwarded again.
    pub cooldown: f32,
    /// Confident frames required before a note is forwarded.
    pub confirm_frames: usize,
    pub snap_enabled: bool,
    /// Relative snapping tolerance for strings 1 and 2.
    pub snap_tolerance_high: f32,
    /// Relative snapping tolerance for strings 3 to 6.
    pub snap_tolerance_low: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            history_len: 5,
            smoothing: Smoothing::Median,
            min_confidence: 0.5,
            silence_duration: 0.4,
            cooldown: 0.15,
            confirm_frames: 2,
            snap_enabled: false,
            snap_tolerance_high: 0.01,
            snap_tolerance_low: 0.02,
        }
    }
}

impl FilterConfig {
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        self.history_len = clamp_ord("filter.history_len", self.history_len, 3, 15);
        if let Smoothing::Exponential { alpha } = self.smoothing {
            self.smoothing = Smoothing::Exponential {
                alpha: clamp_f32("filter.smoothing.alpha", alpha, 0.01, 1.0, 0.5),
            };
        }
        self.min_confidence = clamp_f32(
            "filter.min_confidence",
            self.min_confidence,
            0.0,
            1.0,
            defaults.min_confidence,
        );
        self.silence_duration = clamp_f32(
            "filter.silence_duration",
            self.silence_duration,
            0.05,
            5.0,
            defaults.silence_duration,
        );
        self.cooldown = clamp_f32("filter.cooldown", self.cooldown, 0.0, 2.0, defaults.cooldown);
        self.confirm_frames =
            clamp_ord("filter.confirm_frames", self.confirm_frames, 1, self.history_len);
        self.snap_tolerance_high = clamp_f32(
            "filter.snap_tolerance_high",
            self.snap_tolerance_high,
            0.0,
            0.1,
            defaults.snap_tolerance_high,
        );
        self.snap_tolerance_low = clamp_f32(
            "filter.snap_tolerance_low",
            self.snap_tolerance_low,
            0.0,
            0.1,
            defaults.snap_tolerance_low,
        );
        self
    }
}

/// What the session measures the cents deviation against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TuningMode {
    /// Nearest note of the chromatic scale.
    Chromatic,
    /// Nearest open string of the configured tuning.
    Strings,
    /// A fixed note, e.g. `"A4"`.
    Manual { note: String },
}

/// Settings of the tuner session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deviations smaller than this are "in tune".
    pub in_tune_cents: f32,
    /// Processing cycles between discards of the source backlog.
    pub discard_every: u32,
    pub mode: TuningMode,
    /// Open strings, lowest first.
    pub tuning: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            in_tune_cents: 5.0,
            discard_every: 16,
            mode: TuningMode::Strings,
            tuning: STANDARD_TUNING.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SessionConfig {
    pub fn validated(mut self) -> Self {
        self.in_tune_cents = clamp_f32("session.in_tune_cents", self.in_tune_cents, 0.5, 50.0, 5.0);
        self.discard_every = clamp_ord("session.discard_every", self.discard_every, 1, 1000);
        if let Err(e) = StringTuning::from_note_names(&self.tuning) {
            warn!("[CONFIG] session.tuning rejected ({}), using standard tuning", e);
            self.tuning = Self::default().tuning;
        }
        if let TuningMode::Manual { note } = &self.mode {
            if tuning::parse_note(note).is_none() {
                warn!("[CONFIG] session.mode target {:?} is not a note, using chromatic mode", note);
                self.mode = TuningMode::Chromatic;
            }
        }
        self
    }

    pub fn string_tuning(&self) -> Result<StringTuning, ConfigError> {
        StringTuning::from_note_names(&self.tuning)
    }
}

/// Complete tuner configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub estimator: EstimatorConfig,
    pub filter: FilterConfig,
    pub session: SessionConfig,
}

impl TunerConfig {
    pub fn validated(self) -> Self {
        Self {
            estimator: self.estimator.validated(),
            filter: self.filter.validated(),
            session: self.session.validated(),
        }
    }

    /// Loads a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> Result<Self, ConfigError> {
        let config: TunerConfig = serde_json::from_str(data)?;
        Ok(config.validated())
    }

    pub fn save_json_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json_string = serde_json::to_string_pretty(self)?;
        fs::write(path, json_string)?;
        Ok(())
    }
}

fn clamp_f32(name: &str, value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if !value.is_finite() {
        warn!("[CONFIG] {} = {} is not a number, using {}", name, value, fallback);
        return fallback;
    }
    clamp_ord(name, value, min, max)
}

fn clamp_ord<T: PartialOrd + Copy + Debug>(name: &str, value: T, min: T, max: T) -> T {
    let clamped = if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    };
    if clamped != value {
        warn!("[CONFIG] {} = {:?} out of range, clamped to {:?}", name, value, clamped);
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation_unchanged() {
        let config = TunerConfig::default();
        assert_eq!(config.clone().validated(), config);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut config = TunerConfig::default();
        config.estimator.threshold = 0.9;
        config.estimator.frame_size = 10;
        config.filter.history_len = 40;
        config.filter.confirm_frames = 0;
        config.filter.smoothing = Smoothing::Exponential { alpha: 3.0 };
        config.session.in_tune_cents = f32::NAN;

        let config = config.validated();
        assert_eq!(config.estimator.threshold, 0.5);
        assert_eq!(config.estimator.frame_size, 64);
        assert_eq!(config.filter.history_len, 15);
        assert_eq!(config.filter.confirm_frames, 1);
        assert_eq!(config.filter.smoothing, Smoothing::Exponential { alpha: 1.0 });
        assert_eq!(config.session.in_tune_cents, 5.0);
    }

    #[test]
    fn max_frequency_stays_above_min() {
        let mut config = EstimatorConfig::default();
        config.min_frequency = 300.0;
        config.max_frequency = 200.0;
        let config = config.validated();
        assert_eq!(config.max_frequency, 600.0);
    }

    #[test]
    fn frame_size_bounds_the_reachable_band() {
        let config = EstimatorConfig::default();
        assert_eq!(config.max_searchable_lag(), 1022);
        assert_eq!(config.effective_min_frequency(44100), 60.0);
        // Half a 2048 frame at 96 kHz is shorter than one period of E2.
        assert!(config.effective_min_frequency(96000) > 93.0);

        let small = EstimatorConfig {
            frame_size: 1024,
            ..EstimatorConfig::default()
        };
        assert_eq!(small.max_searchable_lag(), 510);
        assert!(small.effective_min_frequency(44100) > 86.0);
    }

    #[test]
    fn bad_tuning_falls_back_to_standard() {
        let config = SessionConfig {
            tuning: vec!["E2".into(), "nope".into()],
            mode: TuningMode::Manual { note: "Q9".into() },
            ..SessionConfig::default()
        }
        .validated();
        assert_eq!(config.tuning, SessionConfig::default().tuning);
        assert_eq!(config.mode, TuningMode::Chromatic);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = TunerConfig::from_json_str(
            r#"{ "estimator": { "threshold": 0.2 }, "session": { "mode": { "Manual": { "note": "A4" } } } }"#,
        )
        .unwrap();
        assert_eq!(config.estimator.threshold, 0.2);
        assert_eq!(config.estimator.frame_size, 2048);
        assert_eq!(config.filter, FilterConfig::default());
        assert_eq!(config.session.mode, TuningMode::Manual { note: "A4".into() });
    }

    #[test]
    fn config_survives_a_file_round_trip() {
        let path = std::env::temp_dir().join(format!("tuner-config-{}.json", std::process::id()));
        let mut config = TunerConfig::default();
        config.filter.snap_enabled = true;
        config.save_json_file(&path).unwrap();
        let loaded = TunerConfig::from_json_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn garbage_json_is_an_error() {
        assert!(matches!(
            TunerConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
