//! # Tuner Session
//!
//! Ties the estimator, note mapping and stability filter together and keeps
//! the state the display is drawn from.
//!
//! ```text
//! Idle -> Listening -> NoteHeld -> SilencePending -> Idle
//! ```
//!
//! Every transition happens inside [`TunerSession::process_frame`]; the
//! session owns no timers. Whoever drives it decides the cadence.

use crate::audio::{AudioFrame, AudioFrameSource};
use crate::config::{SessionConfig, TunerConfig, TuningMode};
use crate::pitch::{PitchEstimate, YinEstimator};
use crate::stability::{FilterEvent, NoteReading, StabilityFilter};
use crate::strings::{self, StringTuning};
use crate::tuning::{self, NoteMapping, NoteName};
use log::{debug, info};
use std::fmt;
use std::time::Duration;

/// Cents at which the sharp/flat severity saturates.
const FULL_SEVERITY_CENTS: f32 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing detected.
    Idle,
    /// Confident input seen, no note confirmed yet.
    Listening,
    NoteHeld,
    /// The held note has gone quiet but the silence timeout has not fired.
    SilencePending,
}

/// In-tune classification of a note against its target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TuningStatus {
    InTune,
    /// `severity` grows from 0 to 1 as the deviation reaches 50 cents.
    Flat { severity: f32 },
    Sharp { severity: f32 },
}

impl TuningStatus {
    pub fn classify(cents: f32, in_tune_cents: f32) -> Self {
        if cents.abs() < in_tune_cents {
            return TuningStatus::InTune;
        }
        let severity = (cents.abs() / FULL_SEVERITY_CENTS).min(1.0);
        if cents < 0.0 {
            TuningStatus::Flat { severity }
        } else {
            TuningStatus::Sharp { severity }
        }
    }

    pub fn is_in_tune(&self) -> bool {
        matches!(self, TuningStatus::InTune)
    }
}

impl fmt::Display for TuningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TuningStatus::InTune => write!(f, "in tune"),
            TuningStatus::Flat { severity } => write!(f, "flat ({:.0}%)", severity * 100.0),
            TuningStatus::Sharp { severity } => write!(f, "sharp ({:.0}%)", severity * 100.0),
        }
    }
}

/// The pitch a note is being tuned towards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Target {
    pub note: NoteName,
    pub octave: i32,
    pub reference_frequency: f32,
    /// Set when the target is an open string.
    pub string_index: Option<u8>,
}

impl Target {
    fn chromatic(mapping: &NoteMapping) -> Self {
        Self {
            note: mapping.note,
            octave: mapping.octave,
            reference_frequency: mapping.reference_frequency,
            string_index: None,
        }
    }

    fn from_note_name(name: &str) -> Option<Self> {
        let (note, octave) = tuning::parse_note(name)?;
        Some(Self {
            note,
            octave,
            reference_frequency: tuning::note_frequency(note, octave),
            string_index: None,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.note, self.octave)?;
        if let Some(string_index) = self.string_index {
            write!(f, " (string {})", string_index)?;
        }
        Ok(())
    }
}

/// Emitted when a new note is confirmed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    /// Smoothed frequency in Hz.
    pub frequency: f32,
    /// Nearest chromatic note.
    pub mapping: NoteMapping,
    pub target: Target,
    /// Deviation from `target`.
    pub cents: f32,
    pub status: TuningStatus,
    pub confidence: f32,
}

/// What a display needs to draw the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TunerState {
    pub state: SessionState,
    /// The held note, refreshed with the latest smoothed values.
    pub note: Option<NoteEvent>,
    pub smoothed_frequency: Option<f32>,
    pub cents: Option<f32>,
    pub status: Option<TuningStatus>,
    /// How long the current note has been shown.
    pub display_time: Duration,
    /// How long the input has been below the confidence threshold.
    pub silence_time: Duration,
}

/// One tuning session.
///
/// Construct one per input stream and hand out references; it holds the
/// estimator's buffers and all per-stream history.
#[derive(Debug)]
pub struct TunerSession {
    config: SessionConfig,
    tuning: StringTuning,
    manual_target: Option<Target>,
    estimator: YinEstimator,
    filter: StabilityFilter,
    state: SessionState,
    held: Option<NoteEvent>,
    /// Filter output behind `held`, kept so a mode switch can re-evaluate it.
    held_reading: Option<NoteReading>,
    display_time: f32,
    cycles: u64,
}

impl TunerSession {
    pub fn new(config: TunerConfig) -> Self {
        let config = config.validated();
        let tuning = config.session.string_tuning().unwrap_or_default();
        let manual_target = manual_target(&config.session.mode);
        Self {
            estimator: YinEstimator::new(config.estimator),
            filter: StabilityFilter::new(config.filter, tuning.clone()),
            config: config.session,
            tuning,
            manual_target,
            state: SessionState::Idle,
            held: None,
            held_reading: None,
            display_time: 0.0,
            cycles: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn estimator(&self) -> &YinEstimator {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut YinEstimator {
        &mut self.estimator
    }

    pub fn filter(&self) -> &StabilityFilter {
        &self.filter
    }

    pub fn tuning(&self) -> &StringTuning {
        &self.tuning
    }

    /// Switches the tuning mode. Unparseable manual targets fall back to
    /// chromatic mode.
    pub fn set_mode(&mut self, mode: TuningMode) {
        let config = SessionConfig {
            mode,
            ..self.config.clone()
        }
        .validated();
        self.manual_target = manual_target(&config.mode);
        info!("[SESSION] mode set to {:?}", config.mode);
        self.config = config;
        if let Some(reading) = self.held_reading {
            self.held = Some(self.evaluate(&reading));
        }
    }

    /// Back to `Idle`, forgetting every note and the held frequency.
    pub fn reset(&mut self) {
        self.estimator.reset();
        self.filter.reset();
        self.held = None;
        self.held_reading = None;
        self.display_time = 0.0;
        self.cycles = 0;
        self.transition(SessionState::Idle);
    }

    /// Pulls at most one frame from `source` and processes it.
    ///
    /// Every `discard_every` calls the source's backlog is dropped so latency
    /// cannot build up behind a slow consumer.
    pub fn poll<S: AudioFrameSource + ?Sized>(&mut self, source: &mut S) -> Option<NoteEvent> {
        self.cycles += 1;
        let event = source
            .next_frame()
            .and_then(|frame| self.process_frame(&frame));
        if self.cycles % self.config.discard_every as u64 == 0 {
            let backlog = source.frames_available();
            source.discard_buffered();
            if backlog > 0 {
                debug!("[SESSION] dropped {} stale frames", backlog);
            }
        }
        event
    }

    /// Runs one frame through the pipeline. Returns an event when a new note
    /// has been confirmed.
    ///
    /// Frames the estimator cannot use are skipped without touching the
    /// session's timers.
    pub fn process_frame(&mut self, frame: &AudioFrame) -> Option<NoteEvent> {
        match self.estimator.estimate_pitch(frame) {
            Ok(estimate) => self.process_estimate(&estimate, frame.duration()),
            Err(e) => {
                debug!("[SESSION] skipping frame: {}", e);
                None
            }
        }
    }

    /// Advances the session by one estimate covering `dt`.
    pub fn process_estimate(&mut self, estimate: &PitchEstimate, dt: Duration) -> Option<NoteEvent> {
        let confident = self.filter.is_confident(estimate);
        let update = self.filter.push(estimate, dt);

        if self.held.is_some() {
            self.display_time += dt.as_secs_f32();
        }

        match update.event {
            Some(FilterEvent::NoteOn(reading)) => {
                let is_new = self
                    .held_reading
                    .is_none_or(|held| !held.mapping.same_pitch(&reading.mapping));
                let event = self.hold(reading);
                self.transition(SessionState::NoteHeld);
                if is_new {
                    self.display_time = 0.0;
                    info!(
                        "[SESSION] {} at {:.2} Hz, {:+.1} cents vs {} ({})",
                        event.mapping, event.frequency, event.cents, event.target, event.status
                    );
                    return Some(event);
                }
                None
            }
            Some(FilterEvent::Cleared) => {
                self.held = None;
                self.held_reading = None;
                self.display_time = 0.0;
                self.transition(SessionState::Idle);
                None
            }
            None => {
                match update.reading {
                    Some(reading) if confident => {
                        self.hold(reading);
                        self.transition(SessionState::NoteHeld);
                    }
                    Some(_) => self.transition(SessionState::SilencePending),
                    None if self.filter.is_idle() => self.transition(SessionState::Idle),
                    None => self.transition(SessionState::Listening),
                }
                None
            }
        }
    }

    pub fn snapshot(&self) -> TunerState {
        TunerState {
            state: self.state,
            note: self.held,
            smoothed_frequency: self.held.map(|held| held.frequency),
            cents: self.held.map(|held| held.cents),
            status: self.held.map(|held| held.status),
            display_time: Duration::from_secs_f32(self.display_time),
            silence_time: Duration::from_secs_f32(self.filter.silence_time()),
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("[SESSION] {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn hold(&mut self, reading: NoteReading) -> NoteEvent {
        let event = self.evaluate(&reading);
        self.held = Some(event);
        self.held_reading = Some(reading);
        event
    }

    fn evaluate(&self, reading: &NoteReading) -> NoteEvent {
        let chromatic = (
            Target::chromatic(&reading.mapping),
            reading.mapping.cents_deviation,
        );
        let (target, cents) = match &self.config.mode {
            TuningMode::Chromatic => chromatic,
            TuningMode::Strings => {
                match strings::nearest_open_string(reading.frequency, &self.tuning) {
                    Some(nearest) => {
                        let target = Target {
                            note: nearest.open.note,
                            octave: nearest.open.octave,
                            reference_frequency: nearest.open.frequency,
                            string_index: Some(nearest.string_index),
                        };
                        let cents = if reading.snapped_string == Some(nearest.string_index) {
                            0.0
                        } else {
                            nearest.cents_deviation
                        };
                        (target, cents)
                    }
                    None => chromatic,
                }
            }
            TuningMode::Manual { .. } => match self.manual_target {
                Some(target) => (
                    target,
                    tuning::calculate_cents_deviation(
                        reading.frequency,
                        target.reference_frequency,
                    ),
                ),
                None => chromatic,
            },
        };

        NoteEvent {
            frequency: reading.frequency,
            mapping: reading.mapping,
            target,
            cents,
            status: TuningStatus::classify(cents, self.config.in_tune_cents),
            confidence: reading.confidence,
        }
    }
}

fn manual_target(mode: &TuningMode) -> Option<Target> {
    match mode {
        TuningMode::Manual { note } => Target::from_note_name(note),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame_channel;
    use crate::config::FilterConfig;
    use approx::assert_abs_diff_eq;

    const FRAME: Duration = Duration::from_millis(20);

    fn voiced(frequency: f32) -> PitchEstimate {
        PitchEstimate {
            frequency,
            confidence: 0.9,
            lag: 44100.0 / frequency,
        }
    }

    fn quiet(frequency: f32) -> PitchEstimate {
        PitchEstimate {
            frequency,
            confidence: 0.0,
            lag: 0.0,
        }
    }

    fn session_with(mode: TuningMode) -> TunerSession {
        let mut config = TunerConfig::default();
        config.session.mode = mode;
        TunerSession::new(config)
    }

    fn sine(freq: f32, len: usize) -> AudioFrame {
        let samples: Vec<f32> = (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 44100.0).sin())
            .collect();
        AudioFrame::new(samples, 44100)
    }

    #[test]
    fn status_classification() {
        assert_eq!(TuningStatus::classify(3.0, 5.0), TuningStatus::InTune);
        assert_eq!(TuningStatus::classify(-4.99, 5.0), TuningStatus::InTune);
        assert_eq!(
            TuningStatus::classify(-25.0, 5.0),
            TuningStatus::Flat { severity: 0.5 }
        );
        assert_eq!(
            TuningStatus::classify(80.0, 5.0),
            TuningStatus::Sharp { severity: 1.0 }
        );
        assert!(!TuningStatus::classify(5.0, 5.0).is_in_tune());
    }

    #[test]
    fn walks_through_every_state() {
        let mut session = session_with(TuningMode::Strings);
        assert_eq!(session.state(), SessionState::Idle);

        assert!(session.process_estimate(&voiced(110.0), FRAME).is_none());
        assert_eq!(session.state(), SessionState::Listening);

        let event = session.process_estimate(&voiced(110.0), FRAME).unwrap();
        assert_eq!(session.state(), SessionState::NoteHeld);
        assert_eq!(event.target.string_index, Some(5));
        assert!(event.status.is_in_tune());

        session.process_estimate(&quiet(110.0), FRAME);
        assert_eq!(session.state(), SessionState::SilencePending);

        for _ in 0..25 {
            session.process_estimate(&quiet(110.0), FRAME);
        }
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.snapshot().note.is_none());
    }

    #[test]
    fn held_note_is_not_re_emitted() {
        let mut session = session_with(TuningMode::Chromatic);
        let events: Vec<_> = (0..60)
            .filter_map(|_| session.process_estimate(&voiced(196.0), FRAME))
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(session.state(), SessionState::NoteHeld);
        assert!(session.snapshot().display_time > Duration::from_millis(1000));
    }

    #[test]
    fn short_dropout_resumes_without_a_new_event() {
        let mut session = session_with(TuningMode::Chromatic);
        session.process_estimate(&voiced(146.83), FRAME);
        assert!(session.process_estimate(&voiced(146.83), FRAME).is_some());
        for _ in 0..5 {
            session.process_estimate(&quiet(146.83), FRAME);
        }
        assert_eq!(session.state(), SessionState::SilencePending);
        for _ in 0..20 {
            assert!(session.process_estimate(&voiced(146.83), FRAME).is_none());
        }
        assert_eq!(session.state(), SessionState::NoteHeld);
    }

    #[test]
    fn strings_mode_measures_against_the_nearest_string() {
        let mut session = session_with(TuningMode::Strings);
        session.process_estimate(&voiced(84.0), FRAME);
        let event = session.process_estimate(&voiced(84.0), FRAME).unwrap();
        assert_eq!(event.target.note, NoteName::E);
        assert_eq!(event.target.octave, 2);
        assert_eq!(event.target.string_index, Some(6));
        assert!(matches!(event.status, TuningStatus::Sharp { .. }));
        assert_abs_diff_eq!(
            event.cents,
            tuning::calculate_cents_deviation(84.0, 82.406_89),
            epsilon = 0.05
        );
    }

    #[test]
    fn manual_mode_measures_against_the_fixed_note() {
        let mut session = session_with(TuningMode::Manual {
            note: "A4".to_string(),
        });
        session.process_estimate(&voiced(220.0), FRAME);
        let event = session.process_estimate(&voiced(220.0), FRAME).unwrap();
        assert_eq!(event.mapping.octave, 3);
        assert_eq!(event.target.to_string(), "A4");
        assert_abs_diff_eq!(event.cents, -1200.0, epsilon = 0.01);
        assert_eq!(event.status, TuningStatus::Flat { severity: 1.0 });
    }

    #[test]
    fn bad_manual_note_falls_back_to_chromatic() {
        let session = session_with(TuningMode::Manual {
            note: "H9".to_string(),
        });
        assert_eq!(session.config().mode, TuningMode::Chromatic);
    }

    #[test]
    fn switching_mode_re_evaluates_the_held_note() {
        let mut session = session_with(TuningMode::Chromatic);
        session.process_estimate(&voiced(440.0), FRAME);
        session.process_estimate(&voiced(440.0), FRAME);
        session.set_mode(TuningMode::Manual {
            note: "A#4".to_string(),
        });
        let cents = session.snapshot().cents.unwrap();
        assert_abs_diff_eq!(cents, -100.0, epsilon = 0.01);
    }

    #[test]
    fn snapped_string_reads_zero_cents() {
        let mut config = TunerConfig::default();
        config.filter = FilterConfig {
            snap_enabled: true,
            ..FilterConfig::default()
        };
        let mut session = TunerSession::new(config);
        session.process_estimate(&voiced(111.0), FRAME);
        let event = session.process_estimate(&voiced(111.0), FRAME).unwrap();
        assert_eq!(event.target.string_index, Some(5));
        assert_eq!(event.cents, 0.0);
        assert!(event.status.is_in_tune());
    }

    #[test]
    fn switching_mode_keeps_a_snapped_reading() {
        let mut config = TunerConfig::default();
        config.session.mode = TuningMode::Chromatic;
        config.filter = FilterConfig {
            snap_enabled: true,
            ..FilterConfig::default()
        };
        let mut session = TunerSession::new(config);
        session.process_estimate(&voiced(111.0), FRAME);
        session.process_estimate(&voiced(111.0), FRAME);
        assert_eq!(session.snapshot().note.unwrap().target.string_index, None);

        session.set_mode(TuningMode::Strings);
        let held = session.snapshot().note.unwrap();
        assert_eq!(held.target.string_index, Some(5));
        assert_eq!(held.cents, 0.0);
        assert_eq!(session.held_reading.unwrap().snapped_string, Some(5));

        session.set_mode(TuningMode::Manual {
            note: "A#2".to_string(),
        });
        assert_abs_diff_eq!(session.snapshot().cents.unwrap(), -100.0, epsilon = 0.01);
    }

    #[test]
    fn short_frames_are_skipped() {
        let mut session = session_with(TuningMode::Strings);
        assert!(session.process_frame(&sine(110.0, 512)).is_none());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.snapshot().silence_time, Duration::ZERO);
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut session = session_with(TuningMode::Strings);
        session.process_frame(&sine(110.0, 2048));
        session.process_frame(&sine(110.0, 2048));
        assert_eq!(session.state(), SessionState::NoteHeld);
        session.reset();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.snapshot().note.is_none());
        assert!(session.estimator().last_valid_frequency().is_none());
    }

    #[test]
    fn poll_discards_the_backlog_on_schedule() {
        let mut config = TunerConfig::default();
        config.session.discard_every = 2;
        let mut session = TunerSession::new(config);
        let (mut producer, mut source) = frame_channel(2048, 44100, 8);

        producer.push_samples(sine(110.0, 2048 * 5).samples());
        assert_eq!(source.frames_available(), 5);

        assert!(session.poll(&mut source).is_none());
        assert_eq!(source.frames_available(), 4);
        // Second cycle confirms the note, then drops the remaining three.
        assert!(session.poll(&mut source).is_some());
        assert_eq!(source.frames_available(), 0);

        assert!(session.poll(&mut source).is_none());
        assert_eq!(session.state(), SessionState::NoteHeld);
    }
}
