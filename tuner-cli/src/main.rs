//! # Harmonic Tuner - command line front end
//!
//! Opens the default microphone, runs a tuning session and prints one line
//! per processed frame.
//!
//! ## Architecture
//! - **Main Thread**: renders results and applies commands
//! - **Audio Thread**: owned by the core `Session`
//! - **Stdin Thread**: turns typed lines into commands
//! - **Communication**: crossbeam channels, multiplexed with `select!`

use anyhow::{Result, anyhow};
use clap::Parser;
use crossbeam_channel::{Receiver, select};
use std::io::BufRead;
use std::thread;
use tuner_core::audio::CpalFrameSource;
use tuner_core::config::{
    DEFAULT_FRAME_LENGTH, DEFAULT_MAX_DETECTABLE_HZ, DEFAULT_MIN_DETECTABLE_HZ,
    DEFAULT_SAMPLE_RATE_HZ, DEFAULT_SMOOTHING_WINDOW_MS,
};
use tuner_core::{Session, TunerConfig, TunerEvent, TuningResult, tuning};

/// Width of the cent meter on each side of the centre mark.
const METER_HALF_WIDTH: usize = 20;

#[derive(Debug, Parser)]
#[command(name = "harmonic-tuner", version, about = "Real-time instrument tuner")]
struct Cli {
    /// Target pitch in Hz (e.g. 440) or as a note (e.g. A4, C#3)
    #[arg(short, long, default_value = "440")]
    target: String,

    /// Averaging window in milliseconds
    #[arg(long, default_value_t = DEFAULT_SMOOTHING_WINDOW_MS)]
    window_ms: u64,

    /// Samples per analysis frame
    #[arg(long, default_value_t = DEFAULT_FRAME_LENGTH)]
    frame_length: usize,

    /// Capture sample rate in Hz
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE_HZ)]
    sample_rate: u32,

    /// Lowest detectable pitch in Hz
    #[arg(long, default_value_t = DEFAULT_MIN_DETECTABLE_HZ)]
    min_hz: f32,

    /// Highest detectable pitch in Hz
    #[arg(long, default_value_t = DEFAULT_MAX_DETECTABLE_HZ)]
    max_hz: f32,

    /// Print each result as a JSON line
    #[arg(long)]
    json: bool,
}

/// Commands typed by the user while a session runs.
#[derive(Debug)]
enum Command {
    SetTarget(String),
    Quit,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let target_hz = parse_target(&cli.target)?;
    let config = TunerConfig {
        target_frequency_hz: target_hz,
        smoothing_window_ms: cli.window_ms,
        frame_length: cli.frame_length,
        sample_rate_hz: cli.sample_rate,
        min_detectable_hz: cli.min_hz,
        max_detectable_hz: cli.max_hz,
        ..TunerConfig::default()
    };

    let mut session = Session::new(config)?;
    if let Some(warning) = frame_length_warning(session.config()) {
        log::warn!("{warning}");
    }
    let events = session.start(target_hz, CpalFrameSource::open_default)?;
    log::info!("Tuning to {target_hz:.2} Hz. Type a frequency or note to retarget, 'q' to quit.");

    let commands = spawn_stdin_reader();
    let outcome = run(&session, events, commands, cli.json);
    session.stop();
    outcome
}

/// Renders results and applies commands until the user quits or the session ends.
fn run(
    session: &Session,
    events: Receiver<TunerEvent>,
    commands: Receiver<Command>,
    json: bool,
) -> Result<()> {
    loop {
        select! {
            recv(events) -> msg => match msg {
                Ok(TunerEvent::Reading(result)) => render(&result, session.target_hz(), json)?,
                Ok(TunerEvent::DeviceError(e)) => return Err(e.into()),
                Err(_) => {
                    log::info!("Capture session ended");
                    return Ok(());
                }
            },
            recv(commands) -> cmd => match cmd {
                Ok(Command::SetTarget(text)) => {
                    match parse_target(&text).and_then(|hz| Ok(session.set_target(hz).map(|_| hz)?)) {
                        Ok(hz) => log::info!("Target set to {hz:.2} Hz"),
                        Err(e) => log::warn!("{e}"),
                    }
                }
                Ok(Command::Quit) | Err(_) => return Ok(()),
            },
        }
    }
}

/// Reads stdin on a detached thread; EOF counts as quit.
fn spawn_stdin_reader() -> Receiver<Command> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            let command = match line {
                "" => continue,
                "q" | "quit" => Command::Quit,
                other => Command::SetTarget(other.to_string()),
            };
            let quit = matches!(command, Command::Quit);
            if tx.send(command).is_err() || quit {
                return;
            }
        }
        let _ = tx.send(Command::Quit);
    });
    rx
}

/// Accepts a frequency in Hz or a note label.
fn parse_target(input: &str) -> Result<f32> {
    let input = input.trim();
    let input = input.strip_suffix("Hz").or_else(|| input.strip_suffix("hz")).unwrap_or(input);
    if let Ok(hz) = input.trim().parse::<f32>() {
        return Ok(hz);
    }
    tuning::note_from_name(input)
        .map(|note| note.frequency())
        .ok_or_else(|| anyhow!("'{input}' is neither a frequency nor a note name"))
}

/// Explains when low notes in the detectable range will be misread.
fn frame_length_warning(config: &TunerConfig) -> Option<String> {
    let floor = config.lowest_reliable_hz();
    (floor > config.min_detectable_hz).then(|| {
        format!(
            "Frames of {} samples misread pitches below {floor:.0} Hz; use --frame-length {} to tune down to {} Hz",
            config.frame_length,
            config.frame_length_for(config.min_detectable_hz),
            config.min_detectable_hz
        )
    })
}

fn render(result: &TuningResult, target_hz: f32, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(result)?);
    } else {
        println!("{}", format_line(result, target_hz));
    }
    Ok(())
}

fn format_line(result: &TuningResult, target_hz: f32) -> String {
    let detected = result
        .frequency
        .map_or_else(|| "---".to_string(), |f| format!("{f:.2}"));
    let cents = result
        .cents
        .map_or_else(|| "---".to_string(), |c| format!("{c:+.1}"));
    format!(
        "Detected: {detected:>8} Hz | Note: {:<4} | Cents: {cents:>7} (target {target_hz:.2} Hz) {}",
        result.note_label(),
        cent_meter(result.display_cents)
    )
}

/// A text meter with the needle at the clamped cent deviation.
fn cent_meter(display_cents: Option<f32>) -> String {
    let width = METER_HALF_WIDTH * 2 + 1;
    let mut cells = vec!['-'; width];
    cells[METER_HALF_WIDTH] = '|';
    if let Some(cents) = display_cents {
        let offset = (cents / 100.0 * METER_HALF_WIDTH as f32).round() as isize;
        let index = (METER_HALF_WIDTH as isize + offset).clamp(0, width as isize - 1) as usize;
        cells[index] = '●';
    }
    format!("[{}]", cells.into_iter().collect::<String>())
}
