//! # Audio Frame Module
//!
//! Frames are the unit of work of the tuner: a fixed-length block of mono
//! samples together with the rate they were captured at.
//!
//! Capture itself happens elsewhere (a cpal callback, a file reader, a test).
//! Whatever produces samples writes them into a [`FrameProducer`]; the tuner
//! reads complete frames from the matching [`ChannelFrameSource`] on its own
//! cadence. The pair is a bounded single-producer/single-consumer channel, so
//! the capture thread never blocks and the backlog never grows past its
//! capacity.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, warn};
use std::time::Duration;

/// Default number of samples per audio frame.
///
/// Larger buffers reach lower frequencies but increase latency. 2048 samples
/// is ~46 ms at 44.1 kHz and holds more than two periods of the low E string.
pub const BUFFER_SIZE: usize = 2048;

/// Default number of frames the channel holds before the producer drops.
pub const DEFAULT_BACKLOG: usize = 8;

/// An immutable block of mono samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Box<[f32]>,
    sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: impl Into<Box<[f32]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Wall-clock time covered by the frame.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Where the tuner gets its frames from.
///
/// Implementations must never block: `next_frame` returns `None` when no
/// complete frame is buffered.
pub trait AudioFrameSource {
    fn next_frame(&mut self) -> Option<AudioFrame>;

    /// Number of complete frames waiting to be read.
    fn frames_available(&self) -> usize;

    /// Drops everything buffered so the next frame read is a fresh one.
    fn discard_buffered(&mut self);
}

/// Writing half of the frame channel. Lives on the capture thread.
#[derive(Debug)]
pub struct FrameProducer {
    sender: Sender<AudioFrame>,
    pending: Vec<f32>,
    frame_size: usize,
    sample_rate: u32,
    dropped: u64,
}

/// Reading half of the frame channel.
#[derive(Debug)]
pub struct ChannelFrameSource {
    receiver: Receiver<AudioFrame>,
}

/// Creates a connected producer/source pair holding at most `backlog`
/// complete frames.
pub fn frame_channel(
    frame_size: usize,
    sample_rate: u32,
    backlog: usize,
) -> (FrameProducer, ChannelFrameSource) {
    let (sender, receiver) = crossbeam_channel::bounded(backlog.max(1));
    let producer = FrameProducer {
        sender,
        pending: Vec::with_capacity(frame_size * 2),
        frame_size: frame_size.max(1),
        sample_rate,
        dropped: 0,
    };
    (producer, ChannelFrameSource { receiver })
}

impl FrameProducer {
    /// Appends samples of any block size and publishes every complete frame.
    ///
    /// Frames that do not fit in the channel are dropped. Returns `false`
    /// once the reading half is gone.
    pub fn push_samples(&mut self, data: &[f32]) -> bool {
        self.pending.extend_from_slice(data);

        while self.pending.len() >= self.frame_size {
            let frame = AudioFrame::new(&self.pending[..self.frame_size], self.sample_rate);
            self.pending.drain(..self.frame_size);

            match self.sender.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped += 1;
                    debug!("[AUDIO] Frame channel full, dropped frame ({} total)", self.dropped);
                }
                Err(TrySendError::Disconnected(_)) => {
                    warn!("[AUDIO] Frame consumer disconnected");
                    return false;
                }
            }
        }
        true
    }

    /// Number of frames dropped because the channel was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioFrameSource for ChannelFrameSource {
    fn next_frame(&mut self) -> Option<AudioFrame> {
        self.receiver.try_recv().ok()
    }

    fn frames_available(&self) -> usize {
        self.receiver.len()
    }

    fn discard_buffered(&mut self) {
        let discarded = self.receiver.try_iter().count();
        if discarded > 0 {
            debug!("[AUDIO] Discarded {} buffered frames", discarded);
        }
    }
}
