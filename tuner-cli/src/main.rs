//! Command line driver for the tuner core.
//!
//! Reads audio from a WAV file (or the default microphone with the `capture`
//! feature), feeds it through a `TunerSession` and prints every note change.

#[cfg(feature = "capture")]
mod capture;
mod wav;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tuner_core::{
    AudioFrameSource, NoteEvent, StringTuning, TunerConfig, TunerSession, TuningMode,
    frame_channel, map_frequency, map_to_nearest_string, nearest_open_string,
};

#[derive(Debug, Parser)]
#[command(name = "tuner", version, about = "Guitar tuner and note detector")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON configuration file. Missing fields take their defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// What deviations are measured against.
    #[arg(short, long, value_enum, global = true)]
    mode: Option<ModeArg>,

    /// Fixed target note such as "A4"; implies manual mode.
    #[arg(short, long, global = true)]
    target: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Chromatic,
    Strings,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyse a WAV file.
    File {
        path: PathBuf,
        /// Samples per block pushed into the frame channel.
        #[arg(long, default_value_t = 441)]
        block: usize,
    },
    /// Listen to the default input device.
    #[cfg(feature = "capture")]
    Listen {
        /// Stop after this many seconds.
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
    /// Show the note and string positions of a frequency.
    Note { frequency: f32 },
    /// Write the default configuration as JSON.
    DumpConfig { path: PathBuf },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match &cli.command {
        Command::File { path, block } => {
            let session = build_session(&cli)?;
            run_file(session, path, *block)
        }
        #[cfg(feature = "capture")]
        Command::Listen { seconds } => {
            let session = build_session(&cli)?;
            capture::run_live(session, Duration::from_secs(*seconds))
        }
        Command::Note { frequency } => {
            let config = load_config(&cli)?;
            let tuning = config
                .session
                .string_tuning()
                .context("Invalid tuning in configuration")?;
            describe_frequency(*frequency, &tuning)
        }
        Command::DumpConfig { path } => {
            TunerConfig::default()
                .save_json_file(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<TunerConfig> {
    let mut config = match &cli.config {
        Some(path) => TunerConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => TunerConfig::default(),
    };
    match (&cli.target, cli.mode) {
        (Some(note), _) => {
            config.session.mode = TuningMode::Manual { note: note.clone() };
        }
        (None, Some(ModeArg::Chromatic)) => config.session.mode = TuningMode::Chromatic,
        (None, Some(ModeArg::Strings)) => config.session.mode = TuningMode::Strings,
        (None, None) => {}
    }
    Ok(config.validated())
}

fn build_session(cli: &Cli) -> Result<TunerSession> {
    let config = load_config(cli)?;
    if let Some(target) = &cli.target {
        if !matches!(config.session.mode, TuningMode::Manual { .. }) {
            bail!("{:?} is not a note name", target);
        }
    }
    Ok(TunerSession::new(config))
}

fn run_file(mut session: TunerSession, path: &Path, block: usize) -> Result<()> {
    let (samples, sample_rate) = wav::read_mono(path)?;
    info!(
        "Analysing {} ({:.2}s at {} Hz)",
        path.display(),
        samples.len() as f32 / sample_rate as f32,
        sample_rate
    );

    let events = analyse(&mut session, &samples, sample_rate, block);
    for (at, event) in &events {
        print_event(*at, event);
    }
    info!("{} note changes, final state {:?}", events.len(), session.state());
    Ok(())
}

/// Frames one block can complete, plus room for a partial frame carried over.
fn file_backlog(block: usize, frame_size: usize) -> usize {
    block.div_ceil(frame_size.max(1)) + 1
}

/// Runs `samples` through the frame channel in `block`-sized pushes.
///
/// A file has no real-time deadline, so every frame is analysed and none
/// are discarded. Event times count the samples consumed.
fn analyse(
    session: &mut TunerSession,
    samples: &[f32],
    sample_rate: u32,
    block: usize,
) -> Vec<(Duration, NoteEvent)> {
    let block = block.max(1);
    let frame_size = session.estimator().config().frame_size;
    let (mut producer, mut source) =
        frame_channel(frame_size, sample_rate, file_backlog(block, frame_size));

    let mut consumed = 0u64;
    let mut events = Vec::new();
    for chunk in samples.chunks(block) {
        producer.push_samples(chunk);
        while let Some(frame) = source.next_frame() {
            consumed += frame.len() as u64;
            if let Some(event) = session.process_frame(&frame) {
                let at = Duration::from_secs_f64(consumed as f64 / sample_rate as f64);
                events.push((at, event));
            }
        }
    }
    if producer.dropped_frames() > 0 {
        warn!("[AUDIO] {} frames dropped while reading the file", producer.dropped_frames());
    }
    events
}

fn print_event(at: Duration, event: &NoteEvent) {
    println!(
        "{:>7.2}s  {:<4} {:>8.2} Hz  {:+6.1} cents vs {:<14} {}",
        at.as_secs_f32(),
        event.mapping.to_string(),
        event.frequency,
        event.cents,
        event.target.to_string(),
        event.status
    );
}

fn describe_frequency(frequency: f32, tuning: &StringTuning) -> Result<()> {
    let Some(mapping) = map_frequency(frequency) else {
        bail!("{} Hz has no note", frequency);
    };
    println!(
        "{:.2} Hz is {} ({:.2} Hz) {:+.1} cents",
        frequency, mapping, mapping.reference_frequency, mapping.cents_deviation
    );
    if let Some(open) = nearest_open_string(frequency, tuning) {
        println!(
            "nearest open string: {} ({}{}) {:+.1} cents",
            open.string_index, open.open.note, open.open.octave, open.cents_deviation
        );
    }
    if let Some(position) = map_to_nearest_string(frequency, tuning) {
        println!(
            "nearest fret: string {} fret {}",
            position.string_index, position.fret
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn target_overrides_mode() {
        let cli = Cli::parse_from(["tuner", "--mode", "strings", "--target", "D3", "note", "146.8"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(
            config.session.mode,
            TuningMode::Manual {
                note: "D3".to_string()
            }
        );
    }

    #[test]
    fn bad_target_is_rejected() {
        let cli = Cli::parse_from(["tuner", "--target", "Q7", "file", "x.wav"]);
        assert!(build_session(&cli).is_err());
    }

    fn tone(freq: f32, seconds: f32) -> Vec<f32> {
        (0..(44100.0 * seconds) as usize)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / 44100.0).sin())
            .collect()
    }

    #[test]
    fn backlog_holds_a_whole_block() {
        assert_eq!(file_backlog(441, 2048), 2);
        assert_eq!(file_backlog(2048, 2048), 2);
        assert_eq!(file_backlog(44100, 2048), 23);
    }

    #[test]
    fn large_blocks_keep_event_times_on_the_sample_clock() {
        let mut signal = tone(110.0, 1.0);
        signal.extend(vec![0.0; 44100]);
        signal.extend(tone(196.0, 1.0));

        for block in [441, 44100, signal.len()] {
            let mut session = TunerSession::new(TunerConfig::default());
            let events = analyse(&mut session, &signal, 44100, block);
            let names: Vec<String> = events.iter().map(|(_, e)| e.mapping.to_string()).collect();
            assert_eq!(names, ["A2", "G3"], "block {}", block);
            // G3 starts at 2.0 s and needs two frames to confirm.
            let at = events[1].0.as_secs_f32();
            assert!((2.0..2.2).contains(&at), "block {}: G3 at {}s", block, at);
        }
    }
}
