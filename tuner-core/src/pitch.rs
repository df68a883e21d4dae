//! # Pitch Detection Module
//!
//! A streaming YIN estimator tuned for the guitar's range.
//!
//! ## Algorithm
//! 1. Difference function over every candidate lag
//! 2. Cumulative mean normalized difference
//! 3. Absolute threshold search, with the threshold scaled per frequency band
//!    because the dip is shallower at both ends of the instrument, and a
//!    global-minimum fallback
//! 4. Parabolic interpolation for sub-sample accuracy
//!
//! A frame in which nothing is found does not produce an error. The estimator
//! repeats the last valid frequency with a confidence of exactly 0, so a
//! display keeps showing the last note until the session decides the input
//! has gone silent.

use crate::audio::AudioFrame;
use crate::config::EstimatorConfig;
use crate::error::{PitchError, PitchResult};
use crate::spectrum::SpectrumAnalyzer;
use log::{debug, warn};

/// The fallback minimum must be below this to count as a pitch.
pub const ABSOLUTE_CEILING: f32 = 0.5;

/// Largest shift parabolic interpolation may apply, in samples.
const MAX_INTERPOLATION_SHIFT: f32 = 1.0;

/// Relative slack on the band edges, so a tone sitting exactly on an edge
/// survives interpolation.
const BAND_MARGIN: f32 = 0.01;

/// One frame's worth of pitch information.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    /// Fundamental frequency in Hz.
    pub frequency: f32,
    /// Depth of the normalized difference dip, 0 to 1.
    pub confidence: f32,
    /// Fractional period in samples.
    pub lag: f32,
}

impl PitchEstimate {
    /// No pitch and no previous value to hold.
    pub const SILENT: PitchEstimate = PitchEstimate {
        frequency: 0.0,
        confidence: 0.0,
        lag: 0.0,
    };

    /// False when this frame had no pitch of its own.
    pub fn is_voiced(&self) -> bool {
        self.confidence > 0.0
    }
}

/// YIN fundamental frequency estimator.
///
/// Owns its difference buffer, so one instance serves one stream.
#[derive(Debug)]
pub struct YinEstimator {
    config: EstimatorConfig,
    yin_buffer: Vec<f32>,
    last_valid: Option<PitchEstimate>,
    spectrum: Option<SpectrumAnalyzer>,
    /// Sample rate the raised lower band edge was last reported for.
    reach_warned: Option<u32>,
}

impl YinEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        let mut estimator = Self {
            config: EstimatorConfig::default(),
            yin_buffer: Vec::new(),
            last_valid: None,
            spectrum: None,
            reach_warned: None,
        };
        estimator.set_config(config);
        estimator
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Replaces the configuration. Values are validated first.
    pub fn set_config(&mut self, config: EstimatorConfig) {
        self.config = config.validated();
        self.yin_buffer.resize(self.config.frame_size / 2, 0.0);
        self.reach_warned = None;
        self.spectrum = self
            .config
            .spectral_refinement
            .then(|| SpectrumAnalyzer::new(self.config.frame_size));
    }

    /// Sets the YIN threshold, clamped to 0.05..=0.5.
    pub fn set_threshold(&mut self, threshold: f32) {
        let mut config = self.config.clone();
        config.threshold = threshold;
        self.set_config(config);
    }

    /// Frequency that no-pitch frames currently repeat.
    pub fn last_valid_frequency(&self) -> Option<f32> {
        self.last_valid.map(|estimate| estimate.frequency)
    }

    /// Lowest frequency frames at `sample_rate` are searched down to.
    ///
    /// Above the configured `min_frequency` when half a frame is shorter
    /// than the period of `min_frequency`.
    pub fn effective_min_frequency(&self, sample_rate: u32) -> f32 {
        self.config.effective_min_frequency(sample_rate)
    }

    /// Forgets the held frequency.
    pub fn reset(&mut self) {
        self.last_valid = None;
    }

    /// Estimates the fundamental frequency of one frame.
    ///
    /// Frames longer than the configured frame size are analysed over their
    /// most recent `frame_size` samples.
    ///
    /// # Returns
    /// * `Ok(estimate)` - either a new pitch, or the held one with confidence 0
    /// * `Err(PitchError::InsufficientData)` - frame too short, skip this cycle
    pub fn estimate_pitch(&mut self, frame: &AudioFrame) -> PitchResult<PitchEstimate> {
        let frame_size = self.config.frame_size;
        if frame.sample_rate() == 0 {
            return Err(PitchError::InvalidSampleRate(0));
        }
        if frame.len() < frame_size {
            return Err(PitchError::InsufficientData {
                got: frame.len(),
                need: frame_size,
            });
        }

        let samples = frame.samples();
        let signal = &samples[samples.len() - frame_size..];
        let sample_rate = frame.sample_rate() as f32;

        // --- Noise gate ---
        let rms = (signal.iter().map(|&s| s * s).sum::<f32>() / frame_size as f32).sqrt();
        if rms < self.config.amplitude_threshold {
            debug!("[PITCH] rms {:.5} below noise gate", rms);
            return Ok(self.no_pitch());
        }

        let min_frequency = self.effective_min_frequency(frame.sample_rate());
        if min_frequency > self.config.min_frequency
            && self.reach_warned != Some(frame.sample_rate())
        {
            warn!(
                "[CONFIG] estimator.frame_size {} at {} Hz cannot reach min_frequency {:.1} Hz, \
                 searching down to {:.1} Hz",
                frame_size,
                frame.sample_rate(),
                self.config.min_frequency,
                min_frequency
            );
            self.reach_warned = Some(frame.sample_rate());
        }

        let min_lag = ((sample_rate / self.config.max_frequency).floor() as usize).max(2);
        let max_lag = ((sample_rate / min_frequency).ceil() as usize)
            .min(self.config.max_searchable_lag());
        if min_lag >= max_lag {
            debug!(
                "[PITCH] empty lag range {}..{} at {} Hz",
                min_lag, max_lag, sample_rate
            );
            return Ok(self.no_pitch());
        }

        difference_function(signal, &mut self.yin_buffer);
        cumulative_mean_normalized_difference(&mut self.yin_buffer);

        let Some(tau) = self.absolute_threshold(sample_rate, min_lag, max_lag) else {
            return Ok(self.no_pitch());
        };

        let better_tau = parabolic_interpolation(&self.yin_buffer, tau);
        let mut frequency = sample_rate / better_tau;

        if let Some(spectrum) = self.spectrum.as_mut() {
            if let Some(refined) = spectrum.refine(signal, sample_rate, frequency) {
                // Only accept refinements that stay within a semitone.
                if (refined / frequency).log2().abs() < 1.0 / 12.0 {
                    frequency = refined;
                }
            }
        }

        if !frequency.is_finite()
            || frequency < min_frequency * (1.0 - BAND_MARGIN)
            || frequency > self.config.max_frequency * (1.0 + BAND_MARGIN)
        {
            debug!("[PITCH] {:.2} Hz outside the instrument band", frequency);
            return Ok(self.no_pitch());
        }

        let estimate = PitchEstimate {
            frequency,
            confidence: (1.0 - self.yin_buffer[tau]).clamp(0.0, 1.0),
            lag: better_tau,
        };
        self.last_valid = Some(estimate);
        Ok(estimate)
    }

    /// Threshold applied to a candidate lag.
    fn threshold_for(&self, sample_rate: f32, tau: usize) -> f32 {
        let candidate = sample_rate / tau as f32;
        let scale = if candidate < self.config.low_band_edge_hz {
            self.config.low_band_scale
        } else if candidate > self.config.high_band_edge_hz {
            self.config.high_band_scale
        } else {
            1.0
        };
        (self.config.threshold * scale).min(ABSOLUTE_CEILING)
    }

    /// First lag whose normalized difference dips below the threshold,
    /// walked forward to the bottom of that dip. Falls back to the global
    /// minimum when it is below [`ABSOLUTE_CEILING`].
    fn absolute_threshold(&self, sample_rate: f32, min_lag: usize, max_lag: usize) -> Option<usize> {
        let buffer = &self.yin_buffer;
        // Leave room for the right-hand interpolation neighbour.
        let walk_limit = buffer.len() - 1;

        for tau in min_lag..=max_lag {
            if buffer[tau] < self.threshold_for(sample_rate, tau) {
                let mut tau = tau;
                while tau + 1 < walk_limit && buffer[tau + 1] < buffer[tau] {
                    tau += 1;
                }
                return settled(buffer, tau);
            }
        }

        let (tau, &value) = buffer[min_lag..=max_lag]
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        if value < ABSOLUTE_CEILING {
            settled(buffer, min_lag + tau)
        } else {
            debug!("[PITCH] no dip, global minimum {:.3} above ceiling", value);
            None
        }
    }

    fn no_pitch(&self) -> PitchEstimate {
        match self.last_valid {
            Some(last) => PitchEstimate {
                confidence: 0.0,
                ..last
            },
            None => PitchEstimate::SILENT,
        }
    }
}

/// `tau` if the dip has bottomed out there. A dip still falling at the last
/// searchable lag belongs to a period the frame cannot hold.
fn settled(buffer: &[f32], tau: usize) -> Option<usize> {
    if tau + 1 < buffer.len() && buffer[tau + 1] < buffer[tau] {
        debug!("[PITCH] dip still falling at lag {}, past the searchable range", tau);
        return None;
    }
    Some(tau)
}

/// Mean squared difference between the signal and itself shifted by `tau`,
/// for every `tau` in `1..yin_buffer.len()`.
///
/// The window for lag `tau` is `0..half - tau`, so no read goes past the
/// first `2 * half` samples.
///
/// Unlike the plain sum of textbook YIN, each entry is divided by its window
/// length. A shrinking window otherwise pulls long lags towards zero and
/// fakes a dip. The normalized difference, and with it the confidence
/// `1 - d'(tau)`, is therefore computed on the per-lag means.
pub fn difference_function(signal: &[f32], yin_buffer: &mut [f32]) {
    let half = yin_buffer.len().min(signal.len() / 2);
    yin_buffer.fill(0.0);
    for tau in 1..half {
        let window = half - tau;
        let mut diff = 0.0;
        for i in 0..window {
            let delta = signal[i] - signal[i + tau];
            diff += delta * delta;
        }
        yin_buffer[tau] = diff / window as f32;
    }
}

/// Turns a difference buffer into the cumulative mean normalized difference
/// in place. Entry 0 is fixed to 1.
pub fn cumulative_mean_normalized_difference(yin_buffer: &mut [f32]) {
    if yin_buffer.is_empty() {
        return;
    }
    yin_buffer[0] = 1.0;
    let mut running_sum = 0.0;
    for tau in 1..yin_buffer.len() {
        running_sum += yin_buffer[tau];
        yin_buffer[tau] = if running_sum > 0.0 {
            yin_buffer[tau] * tau as f32 / running_sum
        } else {
            1.0
        };
    }
}

/// Fractional lag of the minimum around `tau`, from a parabola through its
/// neighbours. The shift is clamped to one sample either way.
pub fn parabolic_interpolation(yin_buffer: &[f32], tau: usize) -> f32 {
    if tau == 0 || tau + 1 >= yin_buffer.len() {
        return tau as f32;
    }
    let y1 = yin_buffer[tau - 1];
    let y2 = yin_buffer[tau];
    let y3 = yin_buffer[tau + 1];
    let denom = y1 - 2.0 * y2 + y3;
    if denom.abs() < 1e-12 {
        return tau as f32;
    }
    let shift = (0.5 * (y1 - y3) / denom).clamp(-MAX_INTERPOLATION_SHIFT, MAX_INTERPOLATION_SHIFT);
    tau as f32 + shift
}
