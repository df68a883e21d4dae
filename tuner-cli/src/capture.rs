//! # Audio Capture Module
//!
//! Live input through CPAL. The stream callback runs on the audio thread and
//! only pushes samples into a [`FrameProducer`]; the session reads complete
//! frames on the main thread.

use anyhow::{Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Receiver;
use log::{error, info};
use std::thread;
use std::time::{Duration, Instant};
use tuner_core::audio::DEFAULT_BACKLOG;
use tuner_core::{AudioFrameSource, ChannelFrameSource, FrameProducer, TunerSession, frame_channel};

const TARGET_SAMPLE_RATE: u32 = 44100;

/// How often the main loop looks for new frames.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A running input stream. Capture stops when this is dropped.
pub struct Capture {
    _stream: cpal::Stream,
    pub sample_rate: u32,
    errors: Receiver<cpal::StreamError>,
}

/// Starts audio capture from the default input device.
///
/// Picks an f32 input format as close to 44.1 kHz as the device allows and
/// downmixes every channel to mono.
pub fn start_audio_capture(frame_size: usize) -> Result<(Capture, ChannelFrameSource)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    info!("[AUDIO] Using input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, TARGET_SAMPLE_RATE)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let sample_rate = cpal::SampleRate(TARGET_SAMPLE_RATE).clamp(
        supported_config.min_sample_rate(),
        supported_config.max_sample_rate(),
    );
    let config = supported_config.with_sample_rate(sample_rate);
    let sample_rate_val = config.sample_rate().0;
    let channels = config.channels().max(1) as usize;
    let config: cpal::StreamConfig = config.into();

    info!("[AUDIO] {} Hz, {} channel(s)", sample_rate_val, channels);

    let (producer, source) = frame_channel(frame_size, sample_rate_val, DEFAULT_BACKLOG);
    let (error_tx, errors) = crossbeam_channel::bounded(4);
    let mut callback = InputCallback::new(producer, channels);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| callback.process(data),
        move |err| {
            let _ = error_tx.try_send(err);
        },
        None,
    )?;

    stream.play()?;

    let capture = Capture {
        _stream: stream,
        sample_rate: sample_rate_val,
        errors,
    };
    Ok((capture, source))
}

/// Feeds the session from the microphone until `duration` has passed.
pub fn run_live(mut session: TunerSession, duration: Duration) -> Result<()> {
    let frame_size = session.estimator().config().frame_size;
    let (capture, mut source) = start_audio_capture(frame_size)?;
    info!("Listening for {}s at {} Hz", duration.as_secs(), capture.sample_rate);

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if let Ok(err) = capture.errors.try_recv() {
            error!("[AUDIO] Stream error: {}", err);
            return Err(anyhow!("Audio stream failed: {}", err));
        }
        while source.frames_available() > 0 {
            if let Some(event) = session.poll(&mut source) {
                println!(
                    "{:<4} {:>8.2} Hz  {:+6.1} cents vs {}  {}",
                    event.mapping.to_string(),
                    event.frequency,
                    event.cents,
                    event.target,
                    event.status
                );
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}

/// State owned by the audio callback.
struct InputCallback {
    producer: FrameProducer,
    channels: usize,
    mono: Vec<f32>,
}

impl InputCallback {
    fn new(producer: FrameProducer, channels: usize) -> Self {
        Self {
            producer,
            channels,
            mono: Vec::with_capacity(4096),
        }
    }

    fn process(&mut self, data: &[f32]) {
        if self.channels == 1 {
            self.producer.push_samples(data);
            return;
        }
        self.mono.clear();
        self.mono.extend(
            data.chunks_exact(self.channels)
                .map(|frame| frame.iter().sum::<f32>() / self.channels as f32),
        );
        self.producer.push_samples(&self.mono);
    }
}

/// Finds the best supported audio configuration for the target sample rate.
///
/// Prefers f32 formats with the fewest channels, then the range closest to
/// `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let rate_diff = if (c.min_sample_rate().0..=c.max_sample_rate().0).contains(&target_rate) {
                0
            } else {
                let min_diff = (c.min_sample_rate().0 as i64 - target_rate as i64).abs();
                let max_diff = (c.max_sample_rate().0 as i64 - target_rate as i64).abs();
                min_diff.min(max_diff)
            };
            (c.channels(), rate_diff)
        })
}
