//! # Audio Capture Module
//!
//! This module defines the frame contract consumed by the tuner and the
//! CPAL-backed source that fulfils it from a live input device.
//!
//! ## Features
//! - `FrameSource` trait: blocking, in-order delivery of fixed-length mono frames
//! - Default input device capture with sample rate negotiation
//! - f32 / i16 / u16 device formats, down-mixed to mono
//! - Stream errors surfaced as `DeviceUnavailable`, never as silent frames
//! - Stream released when the source is dropped

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::config::TunerConfig;
use crate::error::TunerError;

/// One capture buffer of normalized mono samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Samples in `[-1, 1]`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Producer of audio frames for a capture session.
///
/// Frames are delivered in arrival order. `Ok(None)` marks the end of the
/// stream. Implementations may block until a frame is available.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<AudioFrame>, TunerError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<AudioFrame>, TunerError> {
        (**self).next_frame()
    }
}

/// Decodes little-endian signed 16-bit PCM into normalized samples.
///
/// A trailing odd byte is ignored.
pub fn pcm16_le_to_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Messages from the audio callback to the capture thread.
enum CaptureMessage {
    Frame(Vec<f32>),
    StreamError(String),
}

/// Live capture from a CPAL input device.
///
/// Device handles can be bound to the thread that created them, so open
/// the source on the thread that will read from it.
pub struct CpalFrameSource {
    stream: cpal::Stream,
    receiver: Receiver<CaptureMessage>,
    sample_rate: u32,
    stall_timeout: Duration,
}

impl CpalFrameSource {
    /// Opens the host's default input device.
    pub fn open_default(config: &TunerConfig) -> Result<Self, TunerError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| TunerError::DeviceUnavailable("No input device available".into()))?;
        Self::open(&device, config)
    }

    /// Starts capturing from `device` with the configured frame length.
    ///
    /// The configured sample rate is used when the device supports it;
    /// otherwise the nearest supported rate is taken and carried on every frame.
    pub fn open(device: &cpal::Device, config: &TunerConfig) -> Result<Self, TunerError> {
        let name = device.name().unwrap_or_else(|_| "unknown device".to_string());
        log::info!("Using audio input device: {name}");

        let configs = device
            .supported_input_configs()
            .map_err(TunerError::device)?
            .collect::<Vec<_>>();
        let supported = find_supported_config(configs, config.sample_rate_hz).ok_or_else(|| {
            TunerError::DeviceUnavailable(format!("No supported input format on {name}"))
        })?;

        let sample_rate = config.sample_rate_hz.clamp(
            supported.min_sample_rate().0,
            supported.max_sample_rate().0,
        );
        if sample_rate != config.sample_rate_hz {
            log::warn!(
                "{name} cannot capture at {} Hz, using {sample_rate} Hz",
                config.sample_rate_hz
            );
        }
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig =
            supported.with_sample_rate(cpal::SampleRate(sample_rate)).into();

        log::info!(
            "Selected {sample_format:?}, {} channel(s), {sample_rate} Hz, {} samples per frame",
            stream_config.channels,
            config.frame_length
        );

        let (sender, receiver) = crossbeam_channel::unbounded();
        let frame_length = config.frame_length;
        let stream = match sample_format {
            SampleFormat::F32 => build_capture_stream::<f32>(device, &stream_config, frame_length, sender)?,
            SampleFormat::I16 => build_capture_stream::<i16>(device, &stream_config, frame_length, sender)?,
            SampleFormat::U16 => build_capture_stream::<u16>(device, &stream_config, frame_length, sender)?,
            other => {
                return Err(TunerError::DeviceUnavailable(format!(
                    "Unsupported sample format {other:?}"
                )));
            }
        };
        stream.play().map_err(TunerError::device)?;

        let frame_duration = Duration::from_secs_f64(frame_length as f64 / sample_rate.max(1) as f64);
        Ok(Self {
            stream,
            receiver,
            sample_rate,
            stall_timeout: Duration::from_secs(1) + frame_duration * 2,
        })
    }

}

impl FrameSource for CpalFrameSource {
    fn next_frame(&mut self) -> Result<Option<AudioFrame>, TunerError> {
        match self.receiver.recv_timeout(self.stall_timeout) {
            Ok(CaptureMessage::Frame(samples)) => Ok(Some(AudioFrame::new(samples, self.sample_rate))),
            Ok(CaptureMessage::StreamError(message)) => Err(TunerError::DeviceUnavailable(message)),
            Err(RecvTimeoutError::Timeout) => Err(TunerError::DeviceUnavailable(format!(
                "No audio received for {:?}",
                self.stall_timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }
}

impl Drop for CpalFrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.stream.pause() {
            log::warn!("Error pausing stream: {e}");
        }
        log::info!("Audio stream released");
    }
}

/// Builds an input stream that slices device callbacks into fixed-length mono frames.
fn build_capture_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frame_length: usize,
    sender: Sender<CaptureMessage>,
) -> Result<cpal::Stream, TunerError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    let error_sender = sender.clone();
    let err_fn = move |err: cpal::StreamError| {
        if ends_capture(&err) {
            log::error!("An error occurred on the audio stream: {err}");
            let _ = error_sender.send(CaptureMessage::StreamError(err.to_string()));
        } else {
            log::warn!("Audio stream hiccup: {err}");
        }
    };

    // This buffer will accumulate audio data from the callback.
    let mut audio_buffer: Vec<f32> = Vec::with_capacity(frame_length * 2);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                audio_buffer.extend(data.chunks(channels).map(|interleaved| {
                    let sum: f32 = interleaved
                        .iter()
                        .map(|&s| <f32 as cpal::Sample>::from_sample(s))
                        .sum();
                    sum / interleaved.len() as f32
                }));

                // While we have enough data for a full frame, send it.
                while audio_buffer.len() >= frame_length {
                    let frame: Vec<f32> = audio_buffer.drain(..frame_length).collect();
                    if sender.send(CaptureMessage::Frame(frame)).is_err() {
                        audio_buffer.clear();
                        return;
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(TunerError::device)
}

/// Only a lost device ends the session. Backend errors such as ALSA
/// overruns are transient and the stream keeps delivering afterwards.
fn ends_capture(err: &cpal::StreamError) -> bool {
    matches!(err, cpal::StreamError::DeviceNotAvailable)
}

/// Finds the best supported configuration for the target sample rate.
///
/// Preference order: a range containing the target rate (else the closest
/// range), then mono, then f32 over i16 over u16.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| format_rank(c.sample_format()).is_some())
        .min_by_key(|c| {
            let (min, max) = (c.min_sample_rate().0, c.max_sample_rate().0);
            let rate_distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (rate_distance, c.channels() != 1, format_rank(c.sample_format()))
        })
}

fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::F32 => Some(0),
        SampleFormat::I16 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::SupportedBufferSize;

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            cpal::SampleRate(min),
            cpal::SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn pcm16_decodes_little_endian() {
        let bytes = [0x00, 0x00, 0x00, 0x40, 0x00, 0x80, 0xff, 0x7f, 0x12];
        let samples = pcm16_le_to_samples(&bytes);
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[1], 0.5);
        assert_eq!(samples[2], -1.0);
        assert!((samples[3] - 32767.0 / 32768.0).abs() < 1e-7);
    }

    #[test]
    fn only_lost_device_ends_capture() {
        assert!(ends_capture(&cpal::StreamError::DeviceNotAvailable));
        let xrun = cpal::StreamError::BackendSpecific {
            err: cpal::BackendSpecificError {
                description: "buffer overrun".into(),
            },
        };
        assert!(!ends_capture(&xrun));
    }

    #[test]
    fn prefers_range_containing_target_rate() {
        let configs = vec![
            range(1, 8000, 16000, SampleFormat::F32),
            range(2, 44100, 48000, SampleFormat::I16),
        ];
        let chosen = find_supported_config(configs, 44100).unwrap();
        assert_eq!(chosen.channels(), 2);
        assert_eq!(chosen.sample_format(), SampleFormat::I16);
    }

    #[test]
    fn prefers_mono_float_among_equal_rates() {
        let configs = vec![
            range(2, 44100, 44100, SampleFormat::F32),
            range(1, 44100, 44100, SampleFormat::I16),
            range(1, 44100, 44100, SampleFormat::F32),
        ];
        let chosen = find_supported_config(configs, 44100).unwrap();
        assert_eq!(chosen.channels(), 1);
        assert_eq!(chosen.sample_format(), SampleFormat::F32);
    }

    #[test]
    fn skips_unsupported_formats() {
        let configs = vec![range(1, 44100, 44100, SampleFormat::I32)];
        assert!(find_supported_config(configs, 44100).is_none());
    }

    #[test]
    fn boxed_sources_forward_frames() {
        struct One(Option<AudioFrame>);
        impl FrameSource for One {
            fn next_frame(&mut self) -> Result<Option<AudioFrame>, TunerError> {
                Ok(self.0.take())
            }
        }
        let mut source: Box<dyn FrameSource> = Box::new(One(Some(AudioFrame::new(vec![0.1; 4], 8000))));
        assert_eq!(source.next_frame().unwrap().map(|f| f.len()), Some(4));
        assert_eq!(source.next_frame().unwrap(), None);
    }
}
