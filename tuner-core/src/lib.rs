// tuner-core/src/lib.rs

//! The core logic for the guitar tuner.
//! This crate turns a stream of mono audio frames into pitch estimates,
//! musical notes and debounced note events. It is completely headless:
//! capture and display belong to whoever drives a [`TunerSession`].
//!
//! ```no_run
//! use tuner_core::{AudioFrame, TunerConfig, TunerSession};
//!
//! let mut session = TunerSession::new(TunerConfig::default());
//! let frame = AudioFrame::new(vec![0.0; 2048], 44100);
//! if let Some(event) = session.process_frame(&frame) {
//!     println!("{} {:+.1} cents", event.mapping, event.cents);
//! }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod pitch;
pub mod session;
pub mod spectrum;
pub mod stability;
pub mod strings;
pub mod tuning;

pub use audio::{AudioFrame, AudioFrameSource, ChannelFrameSource, FrameProducer, frame_channel};
pub use config::{EstimatorConfig, FilterConfig, SessionConfig, Smoothing, TunerConfig, TuningMode};
pub use error::{ConfigError, PitchError, PitchResult};
pub use pitch::{PitchEstimate, YinEstimator};
pub use session::{NoteEvent, SessionState, Target, TunerSession, TunerState, TuningStatus};
pub use stability::{FilterEvent, FilterUpdate, NoteReading, StabilityFilter};
pub use strings::{StringPosition, StringTuning, map_to_nearest_string, nearest_open_string};
pub use tuning::{NoteMapping, NoteName, map_frequency};
