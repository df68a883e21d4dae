//! # Stability Filter Module
//!
//! Raw estimates jump around from frame to frame. The filter keeps a short
//! history of confident frequencies, smooths it, and turns the stream into
//! discrete note events:
//!
//! - a `NoteOn` when the smoothed note differs from the last one forwarded,
//!   or when the same note comes back after the cooldown
//! - a `Cleared` once the input has stayed below the confidence threshold
//!   for the silence duration
//!
//! Time only advances through the `dt` passed with each estimate.

use crate::config::{FilterConfig, Smoothing};
use crate::pitch::PitchEstimate;
use crate::strings::StringTuning;
use crate::tuning::{self, NoteMapping};
use log::{debug, info};
use std::collections::VecDeque;
use std::time::Duration;

/// The filter's current view of the note being played.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteReading {
    /// Smoothed frequency, or the exact string reference when snapped.
    pub frequency: f32,
    pub mapping: NoteMapping,
    /// Confidence of the latest estimate that fed the history.
    pub confidence: f32,
    /// String whose reference the frequency was snapped to.
    pub snapped_string: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterEvent {
    NoteOn(NoteReading),
    Cleared,
}

/// Result of feeding one estimate to the filter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FilterUpdate {
    /// Note currently held by the filter, if any.
    pub reading: Option<NoteReading>,
    pub event: Option<FilterEvent>,
}

#[derive(Debug, Clone)]
pub struct StabilityFilter {
    config: FilterConfig,
    tuning: StringTuning,
    history: VecDeque<f32>,
    ema: Option<f32>,
    confident_run: usize,
    current: Option<NoteReading>,
    since_forward: f32,
    silence_time: f32,
}

impl StabilityFilter {
    pub fn new(config: FilterConfig, tuning: StringTuning) -> Self {
        let config = config.validated();
        Self {
            history: VecDeque::with_capacity(config.history_len),
            config,
            tuning,
            ema: None,
            confident_run: 0,
            current: None,
            since_forward: 0.0,
            silence_time: 0.0,
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Replaces the configuration, validating it. History beyond the new
    /// length is dropped, oldest first.
    pub fn set_config(&mut self, config: FilterConfig) {
        self.config = config.validated();
        while self.history.len() > self.config.history_len {
            self.history.pop_front();
        }
    }

    /// Note currently held, if any.
    pub fn current(&self) -> Option<&NoteReading> {
        self.current.as_ref()
    }

    /// Seconds of continuous low-confidence input.
    pub fn silence_time(&self) -> f32 {
        self.silence_time
    }

    /// Whether an estimate is strong enough to feed the history.
    pub fn is_confident(&self, estimate: &PitchEstimate) -> bool {
        estimate.is_voiced() && estimate.confidence >= self.config.min_confidence
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.history.is_empty()
    }

    /// Smoothed value of the history, before snapping.
    pub fn smoothed_frequency(&self) -> Option<f32> {
        match self.config.smoothing {
            Smoothing::Median => median(&self.history),
            Smoothing::Exponential { .. } => self.ema,
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.ema = None;
        self.confident_run = 0;
        self.current = None;
        self.since_forward = 0.0;
        self.silence_time = 0.0;
    }

    /// Feeds one estimate covering `dt` of audio.
    pub fn push(&mut self, estimate: &PitchEstimate, dt: Duration) -> FilterUpdate {
        let dt = dt.as_secs_f32();
        self.since_forward += dt;

        if !self.is_confident(estimate) {
            return self.push_silence(dt);
        }

        self.silence_time = 0.0;
        self.confident_run += 1;

        if self.history.len() == self.config.history_len {
            self.history.pop_front();
        }
        self.history.push_back(estimate.frequency);
        self.ema = Some(match (self.config.smoothing, self.ema) {
            (Smoothing::Exponential { alpha }, Some(old)) => {
                alpha * estimate.frequency + (1.0 - alpha) * old
            }
            _ => estimate.frequency,
        });

        let Some(smoothed) = self.smoothed_frequency() else {
            return self.update(None);
        };
        let Some(reading) = self.read(smoothed, estimate.confidence) else {
            return self.update(None);
        };

        if self.confident_run < self.config.confirm_frames {
            debug!(
                "[FILTER] {} unconfirmed ({}/{})",
                reading.mapping, self.confident_run, self.config.confirm_frames
            );
            return self.update(None);
        }

        let is_new = match &self.current {
            None => true,
            Some(previous) => {
                !previous.mapping.same_pitch(&reading.mapping)
                    || self.since_forward >= self.config.cooldown
            }
        };
        self.current = Some(reading);

        if is_new {
            self.since_forward = 0.0;
            debug!("[FILTER] forwarding {} at {:.2} Hz", reading.mapping, reading.frequency);
            self.update(Some(FilterEvent::NoteOn(reading)))
        } else {
            self.update(None)
        }
    }

    fn push_silence(&mut self, dt: f32) -> FilterUpdate {
        self.silence_time += dt;
        self.confident_run = 0;

        if self.silence_time >= self.config.silence_duration && !self.is_idle() {
            let had_note = self.current.is_some();
            let silence_time = self.silence_time;
            self.reset();
            self.silence_time = silence_time;
            if had_note {
                info!("[FILTER] silence for {:.2}s, note cleared", silence_time);
                return self.update(Some(FilterEvent::Cleared));
            }
        }
        self.update(None)
    }

    fn update(&self, event: Option<FilterEvent>) -> FilterUpdate {
        FilterUpdate {
            reading: self.current,
            event,
        }
    }

    fn read(&self, smoothed: f32, confidence: f32) -> Option<NoteReading> {
        let (frequency, snapped_string) = self.snap(smoothed);
        let mut mapping = tuning::map_frequency(frequency)?;
        if snapped_string.is_some() {
            mapping.cents_deviation = 0.0;
        }
        Some(NoteReading {
            frequency,
            mapping,
            confidence,
            snapped_string,
        })
    }

    /// Replaces a frequency close to an open string with that string's exact
    /// reference. Strings 1 and 2 use the tighter tolerance.
    fn snap(&self, freq: f32) -> (f32, Option<u8>) {
        if !self.config.snap_enabled {
            return (freq, None);
        }
        for (string_index, open) in self.tuning.iter() {
            let tolerance = if StringTuning::is_high_string(string_index) {
                self.config.snap_tolerance_high
            } else {
                self.config.snap_tolerance_low
            };
            if (freq - open.frequency).abs() <= open.frequency * tolerance {
                return (open.frequency, Some(string_index));
            }
        }
        (freq, None)
    }
}

/// Median of the window, averaging the middle pair for even lengths.
fn median(values: &VecDeque<f32>) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f32> = values.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}
