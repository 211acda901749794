//! Audio output using cpal
//!
//! The hardware sink. The device callback owns the `Mixer` and pulls one
//! interleaved block per callback; the callback never locks, allocates or
//! logs. Devices that want f32 or u16 samples get the block rendered into a
//! scratch buffer sized up front and converted in place.

use crate::error::{Error, Result};
use crate::playback::Mixer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Frames rendered per scratch pass for non-i16 devices
const SCRATCH_FRAMES: usize = 1024;

/// Audio output manager using cpal
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    stream: Option<Stream>,
    /// Set by the stream error callback
    error_flag: Arc<AtomicBool>,
    error_count: Arc<AtomicU32>,
}

impl AudioOutput {
    /// List available audio output devices
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .filter(|name| !name.is_empty())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device running at `sample_rate`
    ///
    /// # Arguments
    /// - `device_name`: Optional device name (None = default device)
    /// - `sample_rate`: Engine output rate; the device default is used if
    ///   no stereo configuration supports it
    ///
    /// A named device that cannot be found falls back to the default device.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => {
                let mut devices = host
                    .output_devices()
                    .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;

                match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                    Some(dev) => {
                        info!("Found requested audio device: {}", name);
                        dev
                    }
                    None => {
                        warn!("Requested device '{}' not found, falling back to default device", name);
                        host.default_output_device().ok_or_else(|| {
                            Error::AudioOutput(format!(
                                "Device '{}' not found and no default device available",
                                name
                            ))
                        })?
                    }
                }
            }
            None => host
                .default_output_device()
                .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?,
        };

        info!(
            "Using audio device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let (config, sample_format) = Self::get_best_config(&device, sample_rate)?;
        if config.sample_rate.0 != sample_rate {
            warn!(
                "Device does not offer {} Hz, running at {} Hz",
                sample_rate, config.sample_rate.0
            );
        }
        debug!(
            "Audio config: sample_rate={}, channels={}, format={:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        Ok(Self {
            device,
            config,
            sample_format,
            stream: None,
            error_flag: Arc::new(AtomicBool::new(false)),
            error_count: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Pick a stereo configuration at `sample_rate`, preferring i16 samples
    /// (the mixer's native format), then f32, then the device default
    fn get_best_config(device: &Device, sample_rate: u32) -> Result<(StreamConfig, SampleFormat)> {
        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
            .collect();

        for format in [SampleFormat::I16, SampleFormat::F32] {
            let preferred = supported.iter().find(|config| {
                config.channels() == 2
                    && config.min_sample_rate().0 <= sample_rate
                    && config.max_sample_rate().0 >= sample_rate
                    && config.sample_format() == format
            });
            if let Some(config) = preferred {
                let config = config.clone().with_sample_rate(cpal::SampleRate(sample_rate));
                return Ok((config.config(), format));
            }
        }

        let supported_config = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
        let sample_format = supported_config.sample_format();
        Ok((supported_config.config(), sample_format))
    }

    /// Start the device stream with `mixer` as its only producer
    pub fn start(&mut self, mut mixer: Mixer) -> Result<()> {
        info!("Starting audio stream");
        let channels = self.config.channels as usize;

        let stream = match self.sample_format {
            SampleFormat::I16 => self.build_stream(move |data: &mut [i16]| {
                mixer.render_channels(data, channels);
            })?,
            SampleFormat::F32 => {
                let mut scratch = vec![0i16; SCRATCH_FRAMES * channels];
                self.build_stream(move |data: &mut [f32]| {
                    for block in data.chunks_mut(scratch.len()) {
                        let pcm = &mut scratch[..block.len()];
                        mixer.render_channels(pcm, channels);
                        for (out, &sample) in block.iter_mut().zip(pcm.iter()) {
                            *out = i16_to_f32(sample);
                        }
                    }
                })?
            }
            SampleFormat::U16 => {
                let mut scratch = vec![0i16; SCRATCH_FRAMES * channels];
                self.build_stream(move |data: &mut [u16]| {
                    for block in data.chunks_mut(scratch.len()) {
                        let pcm = &mut scratch[..block.len()];
                        mixer.render_channels(pcm, channels);
                        for (out, &sample) in block.iter_mut().zip(pcm.iter()) {
                            *out = i16_to_u16(sample);
                        }
                    }
                })?
            }
            sample_format => {
                return Err(Error::AudioOutput(format!(
                    "Unsupported sample format: {:?}",
                    sample_format
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)))?;
        self.stream = Some(stream);

        info!("Audio stream started");
        Ok(())
    }

    fn build_stream<T, F>(&self, mut fill: F) -> Result<Stream>
    where
        T: cpal::SizedSample,
        F: FnMut(&mut [T]) + Send + 'static,
    {
        let error_flag = Arc::clone(&self.error_flag);
        let error_count = Arc::clone(&self.error_count);

        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| fill(data),
                move |err| {
                    error!("Audio stream error: {}", err);
                    error_flag.store(true, Ordering::SeqCst);
                    error_count.fetch_add(1, Ordering::SeqCst);
                },
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
    }

    /// Pause and drop the device stream (and the mixer it owns)
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            info!("Stopping audio stream");
            stream
                .pause()
                .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)))?;
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_some()
    }

    pub fn device_name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "Unknown".to_string())
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// True once the device has reported a stream error
    pub fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn clear_error(&self) {
        self.error_flag.store(false, Ordering::SeqCst);
        self.error_count.store(0, Ordering::SeqCst);
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

fn i16_to_u16(sample: i16) -> u16 {
    (sample as i32 + 32768) as u16
}
