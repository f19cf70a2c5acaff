//! # Session Module
//!
//! Drives a capture session: one dedicated worker thread pulls frames from a
//! [`FrameSource`], runs detection, smoothing and note mapping, and emits a
//! [`TuningResult`] per frame to the presentation side.
//!
//! ## Architecture
//! - **Caller thread**: owns the [`Session`], starts/stops it, edits the target
//! - **Worker thread**: owns the frame source and the smoothing window
//! - **Communication**: crossbeam channel for results, atomics for stop and target

use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::{AudioFrame, FrameSource};
use crate::config::{TunerConfig, validate_target};
use crate::error::TunerError;
use crate::pitch::PitchDetector;
use crate::smoothing::Smoother;
use crate::tuning::{self, Note};

/// How long `stop()` waits for the worker before detaching it.
pub const STOP_TIMEOUT: Duration = Duration::from_millis(300);

/// Shown in place of a note when there is no pitch.
pub const NO_PITCH_LABEL: &str = "---";

/// Represents the result of a single processed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningResult {
    /// The smoothed frequency in Hz.
    pub frequency: Option<f32>,
    /// The deviation from the target in cents, unclamped.
    pub cents: Option<f32>,
    /// `cents` clamped to [-100, 100] for bounded indicators.
    pub display_cents: Option<f32>,
    /// The nearest equal-tempered note.
    pub note: Option<Note>,
}

impl TuningResult {
    pub fn no_pitch() -> Self {
        Self {
            frequency: None,
            cents: None,
            display_cents: None,
            note: None,
        }
    }

    /// Maps a smoothed frequency against the current target.
    pub fn from_frequency(frequency: Option<f32>, target_hz: f32) -> Self {
        let Some(freq) = frequency else {
            return Self::no_pitch();
        };
        let cents = tuning::cents_offset(freq, target_hz);
        Self {
            frequency: Some(freq),
            cents,
            display_cents: cents.map(tuning::clamp_cents_for_display),
            note: tuning::nearest_note(freq),
        }
    }

    pub fn has_pitch(&self) -> bool {
        self.frequency.is_some()
    }

    /// Note label such as `A4`, or `---` without a pitch.
    pub fn note_label(&self) -> String {
        self.note
            .map(|n| n.to_string())
            .unwrap_or_else(|| NO_PITCH_LABEL.to_string())
    }
}

/// Messages emitted by the worker to the presentation side.
#[derive(Debug, Clone, PartialEq)]
pub enum TunerEvent {
    /// One result per processed frame.
    Reading(TuningResult),
    /// The device failed mid-session. Sent once; the session is over.
    DeviceError(TunerError),
}

/// Detection and smoothing state owned by the worker.
#[derive(Debug, Clone)]
pub struct Pipeline {
    detector: PitchDetector,
    smoother: Smoother,
}

impl Pipeline {
    pub fn new(config: &TunerConfig) -> Self {
        Self {
            detector: PitchDetector::from_config(config),
            smoother: Smoother::new(config.smoothing_window()),
        }
    }

    /// Runs one frame through detect → smooth → map.
    pub fn process(&mut self, frame: &AudioFrame, now: Instant, target_hz: f32) -> TuningResult {
        let estimate = self.detector.detect(frame);
        self.smoother.observe(estimate, now);
        let average = self.smoother.average(now);
        log::trace!(
            "frame of {} samples: estimate {estimate:?}, average {average:?} over {} readings",
            frame.len(),
            self.smoother.len()
        );
        TuningResult::from_frequency(average, target_hz)
    }

    pub fn reset(&mut self) {
        self.smoother.reset();
    }
}

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Capturing,
}

/// Target frequency shared with the worker, stored as f32 bits.
#[derive(Debug)]
struct SharedTarget(AtomicU32);

impl SharedTarget {
    fn new(hz: f32) -> Self {
        Self(AtomicU32::new(hz.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, hz: f32) {
        self.0.store(hz.to_bits(), Ordering::Relaxed);
    }
}

/// Audio worker thread management structure.
#[derive(Debug)]
struct Worker {
    running: Arc<AtomicBool>,
    thread_handle: JoinHandle<()>,
}

/// A start/stop tuning session over one frame source at a time.
#[derive(Debug)]
pub struct Session {
    config: TunerConfig,
    target: Arc<SharedTarget>,
    worker: Option<Worker>,
}

impl Session {
    /// Creates an idle session after validating `config`.
    pub fn new(config: TunerConfig) -> Result<Self, TunerError> {
        config.validate()?;
        let target = Arc::new(SharedTarget::new(config.target_frequency_hz));
        Ok(Self {
            config,
            target,
            worker: None,
        })
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        match &self.worker {
            Some(worker) if !worker.thread_handle.is_finished() => SessionState::Capturing,
            _ => SessionState::Idle,
        }
    }

    pub fn target_hz(&self) -> f32 {
        self.target.load()
    }

    /// Updates the target; the worker picks it up on its next frame.
    pub fn set_target(&self, target_hz: f32) -> Result<(), TunerError> {
        validate_target(target_hz)?;
        self.target.store(target_hz);
        Ok(())
    }

    /// Starts capturing towards `target_hz`.
    ///
    /// `open` runs on the worker thread and must return an open frame source.
    /// This call waits for it: a failure to open comes back here as
    /// `DeviceUnavailable` and the session stays idle. On success the
    /// returned receiver yields one [`TunerEvent`] per frame and disconnects
    /// when the worker exits.
    pub fn start<S, F>(&mut self, target_hz: f32, open: F) -> Result<Receiver<TunerEvent>, TunerError>
    where
        S: FrameSource + 'static,
        F: FnOnce(&TunerConfig) -> Result<S, TunerError> + Send + 'static,
    {
        validate_target(target_hz)?;
        if self.worker.is_some() {
            self.stop();
        }
        self.target.store(target_hz);

        let config = self.config.clone();
        let running = Arc::new(AtomicBool::new(true));
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let worker_running = Arc::clone(&running);
        let target = Arc::clone(&self.target);
        let thread_handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                log::info!("Starting audio capture thread...");
                let source = match open(&config) {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(()));
                        source
                    }
                    Err(e) => {
                        log::error!("Fatal error starting audio: {e}");
                        worker_running.store(false, Ordering::Release);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                run_capture_loop(source, &config, &worker_running, &target, &event_tx);
            })
            .map_err(|e| TunerError::DeviceUnavailable(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Capture session started, target {target_hz:.2} Hz");
                self.worker = Some(Worker {
                    running,
                    thread_handle,
                });
                Ok(event_rx)
            }
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(TunerError::DeviceUnavailable(
                    "capture thread exited before the device was opened".into(),
                ))
            }
        }
    }

    /// Signals the worker to exit and waits briefly for it.
    ///
    /// A worker that does not finish within [`STOP_TIMEOUT`] is detached
    /// and logged; the session is idle either way.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        log::info!("Shutting down audio worker...");
        worker.running.store(false, Ordering::Release);

        let deadline = Instant::now() + STOP_TIMEOUT;
        while !worker.thread_handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if worker.thread_handle.is_finished() {
            if worker.thread_handle.join().is_err() {
                log::error!("Audio worker panicked");
            }
        } else {
            log::warn!("Audio worker did not finish within {STOP_TIMEOUT:?}, detaching it");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The worker body. `source` is dropped on every exit path, releasing the device.
fn run_capture_loop<S: FrameSource>(
    mut source: S,
    config: &TunerConfig,
    running: &AtomicBool,
    target: &SharedTarget,
    events: &Sender<TunerEvent>,
) {
    let mut pipeline = Pipeline::new(config);
    log::info!("Entering audio processing loop...");

    while running.load(Ordering::Acquire) {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("Frame source reached end of stream");
                break;
            }
            Err(e) => {
                log::error!("Capture failed: {e}");
                let _ = events.send(TunerEvent::DeviceError(e));
                break;
            }
        };
        if !running.load(Ordering::Acquire) {
            break;
        }

        let result = pipeline.process(&frame, Instant::now(), target.load());
        if events.send(TunerEvent::Reading(result)).is_err() {
            log::info!("Result receiver dropped, stopping capture");
            break;
        }
    }

    pipeline.reset();
    running.store(false, Ordering::Release);
    drop(source);
    log::info!("Audio thread finished");
}
