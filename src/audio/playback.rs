//! Speaker output using CPAL.

use crate::audio::capture::with_suppressed_stderr;
use crate::audio::{PcmAudio, mix_to_mono, resample};
use crate::error::{AvatarError, Result};
use crate::providers::AudioOutput;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Extra time given to the device beyond the clip length before giving up.
const DRAIN_SLACK: Duration = Duration::from_millis(500);
/// Lets the last device buffer reach the speaker before the stream drops.
const TAIL: Duration = Duration::from_millis(100);

fn playback_error(message: impl Into<String>) -> AvatarError {
    AvatarError::Playback {
        message: message.into(),
    }
}

/// Plays clips on an output device, resolving when the last sample has been
/// handed to the hardware.
#[derive(Debug, Clone)]
pub struct CpalAudioOutput {
    device_name: Option<String>,
}

impl CpalAudioOutput {
    /// Opens the named output device, or the system default.
    ///
    /// # Errors
    /// `AudioDeviceNotFound` if no such device exists.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        let device = find_output_device(device_name)?;
        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "Audio output initialized"
        );
        Ok(Self {
            device_name: device_name.map(str::to_string),
        })
    }
}

#[async_trait]
impl AudioOutput for CpalAudioOutput {
    async fn play(&self, audio: PcmAudio) -> Result<()> {
        let device_name = self.device_name.clone();
        tokio::task::spawn_blocking(move || play_blocking(device_name.as_deref(), &audio))
            .await
            .map_err(|e| playback_error(format!("Playback task failed: {e}")))?
    }
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let Some(name) = name else {
            return host
                .default_output_device()
                .ok_or_else(|| AvatarError::AudioDeviceNotFound {
                    device: "default output".to_string(),
                });
        };

        let devices = host
            .output_devices()
            .map_err(|e| playback_error(format!("Failed to enumerate output devices: {e}")))?;
        for device in devices {
            if let Ok(device_name) = device.name()
                && device_name == name
            {
                return Ok(device);
            }
        }

        Err(AvatarError::AudioDeviceNotFound {
            device: name.to_string(),
        })
    })
}

/// Stream settings and the samples laid out for them.
struct OutputPlan {
    config: cpal::StreamConfig,
    format: SampleFormat,
    samples: Vec<f32>,
}

/// Prefers an f32 config at the clip's own rate. Otherwise the clip is
/// resampled to the device default.
fn plan_output(device: &cpal::Device, audio: &PcmAudio) -> Result<OutputPlan> {
    let mono = mix_to_mono(&audio.samples, audio.channels as usize);
    let rate = cpal::SampleRate(audio.sample_rate);

    let exact = device.supported_output_configs().ok().and_then(|mut configs| {
        configs.find(|c| {
            c.sample_format() == SampleFormat::F32
                && c.channels() <= 2
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        })
    });

    let (supported, samples) = match exact {
        Some(range) => (range.with_sample_rate(rate), mono),
        None => {
            let native = device
                .default_output_config()
                .map_err(|e| playback_error(format!("No usable output config: {e}")))?;
            let resampled = resample(&mono, audio.sample_rate, native.sample_rate().0);
            tracing::debug!(
                from = audio.sample_rate,
                to = native.sample_rate().0,
                "Resampling clip for output device"
            );
            (native, resampled)
        }
    };

    Ok(OutputPlan {
        format: supported.sample_format(),
        samples: interleave(&samples, supported.channels() as usize),
        config: supported.config(),
    })
}

/// Copies every mono sample into each output channel.
fn interleave(mono: &[f32], channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    mono.iter()
        .flat_map(|&s| std::iter::repeat_n(s, channels))
        .collect()
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    samples: Vec<f32>,
    finished: Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let mut position = 0usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for out in data.iter_mut() {
                    let sample = samples.get(position).copied().unwrap_or(0.0);
                    *out = T::from_sample(sample);
                    position += 1;
                }
                if position >= samples.len() {
                    finished.store(true, Ordering::Release);
                }
            },
            output_stream_error,
            None,
        )
        .map_err(|e| playback_error(format!("Failed to build output stream: {e}")))
}

fn output_stream_error(err: cpal::StreamError) {
    tracing::error!(error = %err, "Audio output stream error");
}

fn play_blocking(device_name: Option<&str>, audio: &PcmAudio) -> Result<()> {
    if audio.is_empty() {
        return Ok(());
    }

    let device = find_output_device(device_name)?;
    let plan = plan_output(&device, audio)?;
    let sample_count = plan.samples.len();
    let finished = Arc::new(AtomicBool::new(false));

    let stream = with_suppressed_stderr(|| {
        let flag = Arc::clone(&finished);
        match plan.format {
            SampleFormat::F32 => build_stream::<f32>(&device, &plan.config, plan.samples, flag),
            SampleFormat::I16 => build_stream::<i16>(&device, &plan.config, plan.samples, flag),
            SampleFormat::U16 => build_stream::<u16>(&device, &plan.config, plan.samples, flag),
            other => Err(playback_error(format!(
                "Unsupported output sample format {other:?}"
            ))),
        }
    })?;
    stream
        .play()
        .map_err(|e| playback_error(format!("Failed to start playback: {e}")))?;

    let deadline = Instant::now() + audio.duration() + DRAIN_SLACK;
    while !finished.load(Ordering::Acquire) {
        if Instant::now() > deadline {
            tracing::warn!("Output device stalled, ending playback early");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    std::thread::sleep(TAIL);
    drop(stream);

    tracing::debug!(samples = sample_count, "Playback complete");
    Ok(())
}
