//! Microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::recorder::{AudioSource, AudioSourceConfig};
use crate::audio::{mix_to_mono, resample};
use crate::error::{AvatarError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// Silences the ALSA/JACK/PipeWire chatter CPAL triggers when probing
/// backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Quiet JACK/ALSA/PipeWire diagnostics before any audio backend is touched.
///
/// # Safety
/// Modifies environment variables, so it must run before other threads exist.
pub fn suppress_audio_warnings() {
    // SAFETY: called from main before the runtime starts
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never microphones.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

/// How long `start` waits for the first data callback before falling back
/// to the device's native format.
const FIRST_CALLBACK_WAIT: Duration = Duration::from_millis(200);

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// List usable input devices, marking preferred ones with "\[recommended\]".
///
/// # Errors
/// Returns `AvatarError::AudioCapture` if device enumeration fails.
pub fn list_devices() -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| cpal::default_host().input_devices()).map_err(|e| {
        AvatarError::AudioCapture {
            message: format!("Failed to enumerate input devices: {e}"),
        }
    })?;

    let mut device_names = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else { continue };
        if should_filter_device(&name) {
            continue;
        }
        if is_preferred_device(&name) {
            device_names.push(format!("{name} [recommended]"));
        } else {
            device_names.push(name);
        }
    }

    Ok(device_names)
}

/// Pick PipeWire or PulseAudio when present, otherwise the system default.
fn get_best_default_device() -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        host.default_input_device()
            .ok_or_else(|| AvatarError::AudioDeviceNotFound {
                device: "default".to_string(),
            })
    })
}

fn find_device(name: &str) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let devices =
            cpal::default_host()
                .input_devices()
                .map_err(|e| AvatarError::AudioCapture {
                    message: format!("Failed to enumerate devices: {e}"),
                })?;

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

/// Wrapper for `cpal::Stream` to make it Send.
///
/// SAFETY: the stream is only touched through the Mutex in `CpalAudioSource`
/// and never used from the audio callback thread.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone source delivering normalized mono samples.
///
/// Tries the target format first (f32, then i16, mono at the configured
/// rate) and falls back to the device's native config with software channel
/// mixing and resampling.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Arc<Mutex<Option<SendableStream>>>,
    buffer: Arc<Mutex<Vec<f32>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Open a device by name, or the best default when `device_name` is None.
    pub fn new(device_name: Option<&str>) -> Result<Self> {
        Self::with_config(device_name, AudioSourceConfig::default())
    }

    pub fn with_config(device_name: Option<&str>, config: AudioSourceConfig) -> Result<Self> {
        let device = match device_name {
            Some(name) => find_device(name)?,
            None => get_best_default_device()?,
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate,
            "Microphone opened"
        );

        Ok(Self {
            device,
            stream: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate: config.sample_rate,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(data.iter().map(|s| s.clamp(-1.0, 1.0)));
                }
            },
            stream_error,
            None,
        ) {
            return Ok(stream);
        }

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            },
            stream_error,
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    /// Build a stream at the device's native config, converting in software.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| AvatarError::AudioCapture {
                    message: format!("Failed to query default input config: {e}"),
                })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            channels = native_channels,
            sample_rate = native_rate,
            format = ?default_config.sample_format(),
            "Using native input format, converting in software"
        );

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);

        match default_config.sample_format() {
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let converted =
                            convert_to_target(data, native_channels, native_rate, target_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    stream_error,
                    None,
                )
                .map_err(|e| AvatarError::AudioCapture {
                    message: format!("Failed to build native f32 stream: {e}"),
                }),
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let normalized: Vec<f32> =
                            data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                        let converted = convert_to_target(
                            &normalized,
                            native_channels,
                            native_rate,
                            target_rate,
                        );
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    stream_error,
                    None,
                )
                .map_err(|e| AvatarError::AudioCapture {
                    message: format!("Failed to build native i16 stream: {e}"),
                }),
            fmt => Err(AvatarError::AudioCapture {
                message: format!(
                    "Unsupported native sample format: {fmt:?}. Try specifying a device with --device."
                ),
            }),
        }
    }

    fn lock_stream(&self) -> Result<std::sync::MutexGuard<'_, Option<SendableStream>>> {
        self.stream.lock().map_err(|e| AvatarError::AudioCapture {
            message: format!("Failed to lock stream: {e}"),
        })
    }
}

fn stream_error(err: cpal::StreamError) {
    tracing::error!(error = %err, "Audio input stream error");
}

/// Mix to mono and resample one callback's worth of audio.
fn convert_to_target(
    samples: &[f32],
    channels: usize,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let mono = mix_to_mono(samples, channels);
    resample(&mono, source_rate, target_rate)
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.lock_stream()?.is_some() {
            return Ok(());
        }

        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
        self.callback_count.store(0, Ordering::Relaxed);

        let stream = self.build_stream()?;
        stream.play().map_err(|e| AvatarError::AudioCapture {
            message: format!("Failed to start audio stream: {e}"),
        })?;

        // Some PipeWire-ALSA setups accept non-native configs but never
        // deliver data.
        std::thread::sleep(FIRST_CALLBACK_WAIT);

        let final_stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }
            tracing::debug!("No input callbacks, retrying with native format");

            let native_stream = self.build_stream_native()?;
            native_stream
                .play()
                .map_err(|e| AvatarError::AudioCapture {
                    message: format!("Failed to start native audio stream: {e}"),
                })?;
            native_stream
        } else {
            stream
        };

        *self.lock_stream()? = Some(SendableStream(final_stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(sendable_stream) = self.lock_stream()?.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| AvatarError::AudioCapture {
                    message: format!("Failed to stop audio stream: {e}"),
                })?;
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        let mut buffer = self.buffer.lock().map_err(|e| AvatarError::AudioCapture {
            message: format!("Failed to lock audio buffer: {e}"),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
